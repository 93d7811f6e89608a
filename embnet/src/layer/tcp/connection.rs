//! The state of a single connection and the processing of arriving segments.
//!
//! Segment arrival follows RFC 793, section 3.9, with the reset handling and challenge ACK of RFC
//! 5961. Congestion control is NewReno as in RFC 5681 and RFC 6582 and the retransmission timeout
//! is computed as in RFC 6298.
use core::cmp;

use crate::buf::Buf;
use crate::managed::Slice;
use crate::storage::{Assembler, Contig, RingBuffer};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{Ipv4Address, TcpRepr, TcpSeqNumber};

use super::{AbortReason, Config, ConnId, Event, Events, FourTuple, ListenerId, DEFAULT_MSS, HEADERS_LEN};

/// The number of disjoint ranges of out-of-order data tracked per connection.
const OOO_RANGES: usize = 4;

/// Acknowledgments older than this are ignored without an answer.
const MAX_ACK_BEFORE: usize = 0xFFFF;

/// Duplicate acknowledgments that still inflate the window during fast recovery.
const MAX_EXTRA_DUP_ACKS: u8 = 32;

/// The largest window that can be announced without window scaling.
pub(super) const MAX_WINDOW: usize = 0xFFFF;

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// The connection slot is unused.
    Closed,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// The state of a connection.
///
/// Includes the current state machine state, the sequence space of both directions and the
/// caller supplied buffers of the two byte streams. A connection is created unused, as a slot of
/// the [`Tcp`] layer, and returns to that after each use.
///
/// [`Tcp`]: struct.Tcp.html
pub struct Connection<'a> {
    pub(super) state: State,
    pub(super) generation: u16,
    pub(super) tuple: FourTuple,
    pub(super) listener: Option<ListenerId>,
    /// Events are reported, from the start for active opens and once established otherwise.
    pub(super) announced: bool,
    pub(super) accepted: bool,
    pub(super) holds_pmtu: bool,
    pub(super) send: Send,
    pub(super) recv: Receive,
    pub(super) flow_control: NewReno,
    pub(super) rtt: Rtt,
    pub(super) timers: Timers,
    pub(super) pending: Pending,
    pub(super) tx: RingBuffer<'a, u8>,
    pub(super) rx: RingBuffer<'a, u8>,
    pub(super) out_of_order: Assembler<[Contig; OOO_RANGES]>,
}

#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct Send {
    /// The next not yet acknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    pub(super) unacked: TcpSeqNumber,

    /// The sequence number after everything sent so far.
    ///
    /// In RFC793 this is referred to as `SND.NXT`. It does not move back on retransmission, the
    /// `cursor` does.
    pub(super) next: TcpSeqNumber,

    /// The send window size indicated by the receiver.
    ///
    /// In RFC793 this is referred to as `SND.WND`.
    pub(super) window: usize,

    /// The sequence number of the segment that last updated the window, `SND.WL1`.
    pub(super) wl1: TcpSeqNumber,

    /// The acknowledgment of the segment that last updated the window, `SND.WL2`.
    pub(super) wl2: TcpSeqNumber,

    /// The initial sequence number, `ISS`.
    pub(super) initial_seq: TcpSeqNumber,

    /// Offset after `unacked` of the next byte to transmit.
    ///
    /// The FIN counts as the byte after all queued data.
    pub(super) cursor: usize,

    /// Segment size limit of our configuration and the MSS option of the peer.
    pub(super) base_mss: usize,

    /// Segment size limit of the path MTU.
    pub(super) path_mss: usize,
}

#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct Receive {
    /// The next expected sequence number.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub(super) next: TcpSeqNumber,

    /// The initial receive sequence number, `IRS`.
    pub(super) initial_seq: TcpSeqNumber,

    /// The right edge of the window announced last.
    pub(super) announced: TcpSeqNumber,
}

/// Models TCP NewReno flow control and congestion avoidance.
#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct NewReno {
    /// Decider between slow-start and congestion avoidance.
    ///
    /// Set to MAX initially, then updated on occurance of congestion.
    pub(super) ssthresh: usize,

    /// The window dictated by congestion.
    pub(super) congestion_window: usize,

    /// Bytes acknowledged since the window was last increased in congestion avoidance.
    pub(super) acked: usize,

    /// The highest sequence number sent when recovery last started.
    ///
    /// Fast recovery ends when this is acknowledged.
    pub(super) recover: Option<TcpSeqNumber>,

    /// The number of duplicate acknowledgments in a row.
    pub(super) dup_acks: u8,
}

#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct Rtt {
    /// The sequence number being timed and when it was sent.
    pub(super) timed: Option<(TcpSeqNumber, Instant)>,
    pub(super) srtt: Option<Duration>,
    pub(super) rttvar: Duration,
    /// The current retransmission timeout, backed off on every timeout.
    pub(super) rto: Duration,
    /// Timeouts since the last acknowledgment of new data.
    pub(super) retransmissions: u8,
}

#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct Timers {
    /// Retransmission, and persist while the peer window is closed.
    pub(super) retransmit: Expiration,
    /// The end of the handshake or of `TimeWait`.
    pub(super) linger: Expiration,
    /// Another attempt after output failed.
    pub(super) output_retry: Expiration,
}

/// Segments due at the next output.
#[derive(Clone, Copy, Debug, Default, Hash)]
pub(super) struct Pending {
    pub(super) ack: bool,
    pub(super) syn: bool,
    pub(super) fast_retransmit: bool,
    pub(super) probe: bool,
}

/// What the layer has to do after a segment was processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum Outcome {
    /// Send whatever became due.
    Output,
    /// Answer the segment with a reset, without a change of state.
    Refuse,
    /// Reset the connection and free it.
    Reset,
    /// Free the connection.
    Release,
}

impl State {
    /// Whether the application may still queue data.
    pub fn can_send(self) -> bool {
        match self {
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => true,
            _ => false,
        }
    }

    /// Whether data from the peer is still accepted.
    pub fn can_recv(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }

    /// Whether data or a FIN may be transmitted.
    pub(super) fn can_output(self) -> bool {
        match self {
            State::Established | State::CloseWait | State::FinWait1 | State::Closing
                | State::LastAck => true,
            _ => false,
        }
    }

    /// Whether our FIN is queued after the data.
    pub(super) fn fin_queued(self) -> bool {
        match self {
            State::FinWait1 | State::Closing | State::LastAck => true,
            _ => false,
        }
    }
}

impl<'a> Connection<'a> {
    /// Create an unused connection slot with the buffers of its byte streams.
    pub fn new<S, R>(send_buffer: S, recv_buffer: R) -> Self
        where S: Into<Slice<'a, u8>>, R: Into<Slice<'a, u8>>,
    {
        Connection {
            state: State::Closed,
            generation: 0,
            tuple: FourTuple::default(),
            listener: None,
            announced: false,
            accepted: false,
            holds_pmtu: false,
            send: Send::default(),
            recv: Receive::default(),
            flow_control: NewReno::default(),
            rtt: Rtt::default(),
            timers: Timers::default(),
            pending: Pending::default(),
            tx: RingBuffer::new(send_buffer),
            rx: RingBuffer::new(recv_buffer),
            out_of_order: Assembler::new([Contig::default(); OOO_RANGES]),
        }
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The local port.
    pub fn local_port(&self) -> u16 {
        self.tuple.local_port
    }

    /// Address and port of the peer.
    pub fn remote(&self) -> (Ipv4Address, u16) {
        (self.tuple.remote, self.tuple.remote_port)
    }

    /// Queued bytes that were not yet acknowledged.
    pub fn send_queue(&self) -> usize {
        self.tx.len()
    }

    /// Bytes that can currently be queued.
    pub fn send_capacity(&self) -> usize {
        self.tx.window()
    }

    /// Bytes that can be read.
    pub fn recv_available(&self) -> usize {
        self.rx.len()
    }

    /// The largest segment sent to the peer.
    pub fn send_mss(&self) -> usize {
        cmp::min(self.send.base_mss, self.send.path_mss)
    }

    /// The current congestion window.
    pub fn congestion_window(&self) -> usize {
        self.flow_control.congestion_window
    }

    /// The current retransmission timeout.
    pub fn retransmission_timeout(&self) -> Duration {
        self.rtt.rto
    }

    pub(super) fn id(&self, index: usize) -> ConnId {
        ConnId { index, generation: self.generation }
    }

    pub(super) fn matches(&self, remote: Ipv4Address, remote_port: u16, local_port: u16) -> bool {
        self.state != State::Closed
            && self.tuple.remote == remote
            && self.tuple.remote_port == remote_port
            && self.tuple.local_port == local_port
    }

    /// The earliest timer.
    pub(super) fn next_deadline(&self) -> Expiration {
        self.timers.retransmit
            .min(self.timers.linger)
            .min(self.timers.output_retry)
    }

    /// Start an active open, the SYN is sent by the next output.
    pub(super) fn open_active(&mut self, tuple: FourTuple, iss: TcpSeqNumber, now: Instant, config: &Config) {
        self.start(tuple, iss, config);
        self.state = State::SynSent;
        self.announced = true;
        self.accepted = true;
        self.timers.linger = Expiration::When(now + config.syn_sent_timeout);
    }

    /// Answer a SYN that arrived for a listener.
    pub(super) fn open_passive(
        &mut self,
        tuple: FourTuple,
        listener: ListenerId,
        seg: &TcpRepr,
        iss: TcpSeqNumber,
        now: Instant,
        config: &Config,
    ) {
        self.start(tuple, iss, config);
        self.state = State::SynReceived;
        self.listener = Some(listener);
        self.recv.initial_seq = seg.seq_number;
        self.recv.next = seg.seq_number + 1;
        self.send.base_mss = peer_mss(seg, config);
        self.update_window(seg.seq_number, iss, seg.window_len);
        self.timers.linger = Expiration::When(now + config.syn_rcvd_timeout);
    }

    fn start(&mut self, tuple: FourTuple, iss: TcpSeqNumber, config: &Config) {
        self.tuple = tuple;
        self.listener = None;
        self.announced = false;
        self.accepted = false;
        self.holds_pmtu = false;
        self.send = Send {
            unacked: iss,
            next: iss,
            initial_seq: iss,
            base_mss: usize::from(config.mss),
            path_mss: usize::from(config.mss),
            ..Send::default()
        };
        self.recv = Receive::default();
        self.flow_control = NewReno {
            ssthresh: usize::max_value(),
            ..NewReno::default()
        };
        self.rtt = Rtt {
            rto: config.rtx_initial,
            ..Rtt::default()
        };
        self.timers = Timers::default();
        self.pending = Pending {
            syn: true,
            ..Pending::default()
        };
        self.tx.clear();
        self.rx.clear();
        self.out_of_order.clear();
    }

    /// Use the path MTU entry of the remote host.
    pub(super) fn hold_path(&mut self, pmtu: usize) {
        self.holds_pmtu = true;
        self.send.path_mss = pmtu.saturating_sub(HEADERS_LEN);
    }

    /// Return the slot to the unused state.
    ///
    /// Returns the remote host if a path MTU reference is to be dropped.
    pub(super) fn release(&mut self) -> Option<Ipv4Address> {
        let pmtu = if self.holds_pmtu { Some(self.tuple.remote) } else { None };
        self.state = State::Closed;
        self.generation = self.generation.wrapping_add(1);
        self.listener = None;
        self.announced = false;
        self.accepted = false;
        self.holds_pmtu = false;
        self.timers = Timers::default();
        self.pending = Pending::default();
        self.tx.clear();
        self.rx.clear();
        self.out_of_order.clear();
        pmtu
    }

    pub(super) fn notify(&self, id: ConnId, event: Event, events: &mut Events) {
        if self.announced {
            events.push(id, event);
        }
    }

    pub(super) fn abort(&self, id: ConnId, reason: AbortReason, events: &mut Events) {
        net_debug!("tcp: connection to {} aborted: {:?}", self.tuple.remote, reason);
        self.notify(id, Event::Aborted(reason), events);
    }

    /// The window we can announce.
    pub(super) fn recv_window(&self) -> usize {
        cmp::min(self.rx.window(), MAX_WINDOW)
    }

    /// Queue data for sending.
    pub(super) fn queue(&mut self, data: &[u8]) -> usize {
        if !self.state.can_send() {
            return 0;
        }
        self.tx.enqueue_slice(data)
    }

    /// Read received data.
    ///
    /// Schedules a window update if reading opened the window enough.
    pub(super) fn read(&mut self, data: &mut [u8], config: &Config) -> usize {
        let read = self.rx.dequeue_slice(data);
        if read > 0 && self.state.can_recv() {
            let edge = self.recv.next + self.recv_window();
            let opened = edge.diff(self.recv.announced) as usize;
            let threshold = cmp::min(usize::from(config.mss), self.rx.capacity() / 2);
            if opened >= cmp::max(threshold, 1) {
                self.pending.ack = true;
            }
        }
        read
    }

    /// Close our side of the connection.
    ///
    /// Returns whether the connection is to be released.
    pub(super) fn close(&mut self, id: ConnId, events: &mut Events) -> bool {
        match self.state {
            State::SynSent => {
                self.notify(id, Event::Closed, events);
                true
            },
            State::Established => {
                self.state = State::FinWait1;
                false
            },
            State::CloseWait => {
                self.state = State::LastAck;
                false
            },
            _ => false,
        }
    }

    /// Process an arriving segment.
    pub(super) fn input(
        &mut self,
        id: ConnId,
        seg: &TcpRepr,
        payload: Buf,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) -> Outcome {
        match self.state {
            State::Closed => Outcome::Refuse,
            State::SynSent => self.input_syn_sent(id, seg, payload, events, now, config),
            _ => self.input_synchronized(id, seg, payload, events, now, config),
        }
    }

    fn input_syn_sent(
        &mut self,
        id: ConnId,
        seg: &TcpRepr,
        payload: Buf,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) -> Outcome {
        let flags = seg.flags;
        if let Some(ack) = seg.ack_number {
            if !self.acks_syn(ack) {
                return if flags.rst() { Outcome::Output } else { Outcome::Refuse };
            }
        }

        if flags.rst() {
            if seg.ack_number.is_none() {
                return Outcome::Output;
            }
            self.abort(id, AbortReason::Refused, events);
            return Outcome::Release;
        }

        if !flags.syn() {
            return Outcome::Output;
        }

        let ack = match seg.ack_number {
            Some(ack) => ack,
            // Simultaneous open is not supported.
            None => return Outcome::Refuse,
        };

        self.recv.initial_seq = seg.seq_number;
        self.recv.next = seg.seq_number + 1;
        self.send.base_mss = peer_mss(seg, config);
        self.send.unacked = ack;
        self.update_window(seg.seq_number, ack, seg.window_len);
        self.establish(id, ack, events, now, config);
        self.pending.ack = true;

        self.process_text(id, seg.seq_number + 1, flags.fin(), payload, events, now, config);
        Outcome::Output
    }

    fn input_synchronized(
        &mut self,
        id: ConnId,
        seg: &TcpRepr,
        payload: Buf,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) -> Outcome {
        let flags = seg.flags;
        let seq = seg.seq_number;

        if self.state == State::SynReceived && flags.syn() && !flags.rst() && seq + 1 == self.recv.next {
            net_trace!("tcp: repeated syn from {}", self.tuple.remote);
            self.pending.syn = true;
            self.timers.linger = Expiration::When(now + config.syn_rcvd_timeout);
            return Outcome::Output;
        }

        if !self.acceptable(seq, seg.sequence_len()) {
            if !flags.rst() {
                self.pending.ack = true;
                if self.state == State::TimeWait && flags.fin() {
                    self.timers.linger = Expiration::When(now + config.time_wait);
                }
            }
            return Outcome::Output;
        }

        if flags.rst() {
            if seq != self.recv.next {
                self.pending.ack = true;
                return Outcome::Output;
            }
            if self.state != State::TimeWait {
                self.abort(id, AbortReason::Reset, events);
            }
            return Outcome::Release;
        }

        if flags.syn() {
            self.abort(id, AbortReason::Reset, events);
            return Outcome::Reset;
        }

        let ack = match seg.ack_number {
            Some(ack) => ack,
            None => return Outcome::Output,
        };

        if self.state == State::SynReceived {
            if !self.acks_syn(ack) {
                return Outcome::Refuse;
            }
            self.send.unacked = ack;
            self.update_window(seq, ack, seg.window_len);
            self.announced = true;
            self.establish(id, ack, events, now, config);
        } else if let Some(outcome) = self.process_ack(id, seg, ack, payload.len(), events, now, config) {
            return outcome;
        }

        if self.state.can_recv() {
            self.process_text(id, seq, flags.fin(), payload, events, now, config);
        }
        Outcome::Output
    }

    /// Check the acknowledgment of our SYN, `ISS < ack <= SND.NXT`.
    fn acks_syn(&self, ack: TcpSeqNumber) -> bool {
        let iss = self.send.initial_seq;
        ack != iss && ack.diff(iss) <= self.send.next.diff(iss)
    }

    /// The acceptability test of RFC 793 against the receive window.
    fn acceptable(&self, seq: TcpSeqNumber, seg_len: usize) -> bool {
        let window = self.recv_window() as i64;
        let start = i64::from(seq.diff(self.recv.next) as i32);
        let end = start + seg_len as i64;
        if seg_len == 0 {
            0 <= start && start <= window
        } else {
            window > 0 && start < window && end > 0
        }
    }

    fn establish(&mut self, id: ConnId, ack: TcpSeqNumber, events: &mut Events, now: Instant, config: &Config) {
        net_debug!("tcp: connected to {}:{}", self.tuple.remote, self.tuple.remote_port);
        self.state = State::Established;
        self.send.cursor = 0;
        self.ack_timing(ack, now, config);
        self.flow_control.congestion_window = initial_window(self.send_mss());
        self.flow_control.ssthresh = usize::max_value();
        self.rtt.retransmissions = 0;
        self.timers.retransmit = Expiration::Never;
        self.timers.linger = Expiration::Never;
        self.pending.syn = false;
        self.notify(id, Event::Connected, events);
    }

    /// Process the acknowledgment of a synchronized connection.
    ///
    /// Returns an outcome if processing of the segment ends here.
    fn process_ack(
        &mut self,
        id: ConnId,
        seg: &TcpRepr,
        ack: TcpSeqNumber,
        payload_len: usize,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) -> Option<Outcome> {
        let unacked = self.send.unacked;
        let oldest = unacked - MAX_ACK_BEFORE;
        if ack.diff(oldest) > self.send.next.diff(oldest) {
            // Acknowledges something never sent, or something long gone.
            self.pending.ack = true;
            return Some(Outcome::Output);
        }

        if ack.diff(oldest) > unacked.diff(oldest) {
            let acked = ack.diff(unacked) as usize;
            if self.handle_acked(id, ack, acked, events, now, config) {
                return Some(Outcome::Release);
            }
        } else if self.is_duplicate_ack(seg, ack, payload_len) {
            self.handle_duplicate_ack(config);
        }

        let seq = seg.seq_number;
        if TcpSeqNumber::lt(self.send.wl1, seq, self.send.wl1)
            || (self.send.wl1 == seq && TcpSeqNumber::lte(self.send.wl2, ack, self.send.wl2))
        {
            self.update_window(seq, ack, seg.window_len);
        }

        // The peer answers our probes of its closed window.
        if self.send.window == 0 {
            self.rtt.retransmissions = 0;
        }
        None
    }

    /// Handle new acknowledged sequence space.
    ///
    /// Returns whether the connection is finished.
    fn handle_acked(
        &mut self,
        id: ConnId,
        ack: TcpSeqNumber,
        acked: usize,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) -> bool {
        let queued = self.tx.len();
        let fin_acked = self.state.fin_queued() && acked > queued;
        let data = cmp::min(acked, queued);

        self.ack_timing(ack, now, config);
        self.grow_window(ack, acked, config);

        self.tx.dequeue_allocated(data);
        self.send.cursor = self.send.cursor.saturating_sub(acked);
        self.send.window = self.send.window.saturating_sub(acked);
        self.send.unacked = ack;
        self.rtt.retransmissions = 0;
        self.timers.retransmit = Expiration::Never;

        if data > 0 {
            self.notify(id, Event::Sent(data), events);
        }

        if fin_acked {
            match self.state {
                State::FinWait1 => self.state = State::FinWait2,
                State::Closing => self.enter_time_wait(id, events, now, config),
                State::LastAck => {
                    self.notify(id, Event::Closed, events);
                    return true;
                },
                _ => (),
            }
        }
        false
    }

    fn grow_window(&mut self, ack: TcpSeqNumber, acked: usize, config: &Config) {
        let mss = self.send_mss();
        let unacked = self.send.unacked;
        let next = self.send.next;
        let reno = &mut self.flow_control;

        if reno.dup_acks < config.dup_ack_threshold {
            reno.dup_acks = 0;
            if reno.congestion_window <= reno.ssthresh {
                // Slow start.
                reno.congestion_window += cmp::min(acked, mss);
            } else {
                reno.acked = reno.acked.saturating_add(acked);
                if reno.acked >= reno.congestion_window {
                    reno.acked = 0;
                    reno.congestion_window += mss;
                }
            }
            return;
        }

        match reno.recover {
            Some(recover) if TcpSeqNumber::lt(ack, recover, unacked) => {
                // Partial acknowledgment, the next hole is retransmitted right away.
                reno.congestion_window = reno.congestion_window.saturating_sub(acked);
                if acked >= mss {
                    reno.congestion_window += mss;
                }
                self.pending.fast_retransmit = true;
            },
            _ => {
                let flight = next.diff(ack) as usize;
                reno.congestion_window = cmp::min(reno.ssthresh, cmp::max(flight, mss) + mss);
                reno.dup_acks = 0;
            },
        }
    }

    fn is_duplicate_ack(&self, seg: &TcpRepr, ack: TcpSeqNumber, payload_len: usize) -> bool {
        payload_len == 0
            && !seg.flags.syn()
            && !seg.flags.fin()
            && ack == self.send.unacked
            && usize::from(seg.window_len) == self.send.window
            && self.send.next != self.send.unacked
    }

    fn handle_duplicate_ack(&mut self, config: &Config) {
        let threshold = config.dup_ack_threshold;
        let mss = self.send_mss();
        let unacked = self.send.unacked;
        let next = self.send.next;
        let reno = &mut self.flow_control;

        if reno.dup_acks >= threshold {
            if reno.dup_acks < threshold.saturating_add(MAX_EXTRA_DUP_ACKS) {
                reno.dup_acks += 1;
                reno.congestion_window += mss;
            }
            return;
        }

        reno.dup_acks += 1;
        if reno.dup_acks < threshold {
            return;
        }

        // Only data sent after the last recovery started may trigger another one.
        let beyond_recover = reno.recover
            .map_or(true, |recover| TcpSeqNumber::lt(recover, unacked, recover));
        if !beyond_recover {
            reno.dup_acks = 0;
            return;
        }

        net_debug!("tcp: fast retransmit of {} to {}", unacked, self.tuple.remote);
        let flight = next.diff(unacked) as usize;
        reno.ssthresh = cmp::max(flight / 2, 2 * mss);
        reno.congestion_window = reno.ssthresh + 3 * mss;
        reno.recover = Some(next);
        self.pending.fast_retransmit = true;
    }

    fn update_window(&mut self, seq: TcpSeqNumber, ack: TcpSeqNumber, window: u16) {
        self.send.window = usize::from(window);
        self.send.wl1 = seq;
        self.send.wl2 = ack;
    }

    /// End a round trip time measurement covered by an acknowledgment.
    fn ack_timing(&mut self, ack: TcpSeqNumber, now: Instant, config: &Config) {
        if let Some((seq, sent)) = self.rtt.timed {
            if TcpSeqNumber::lt(seq, ack, seq) {
                self.rtt.timed = None;
                self.rtt.sample(now - sent, config);
            }
        }
    }

    fn enter_time_wait(&mut self, id: ConnId, events: &mut Events, now: Instant, config: &Config) {
        self.state = State::TimeWait;
        self.timers.linger = Expiration::When(now + config.time_wait);
        self.timers.retransmit = Expiration::Never;
        self.notify(id, Event::Closed, events);
    }

    /// Store the data of a segment and handle its FIN.
    ///
    /// Data before `RCV.NXT` or beyond the window is cut off. Data after a gap is stored at its
    /// offset in the receive buffer and becomes readable once the gap is filled.
    fn process_text(
        &mut self,
        id: ConnId,
        seq: TcpSeqNumber,
        fin: bool,
        payload: Buf,
        events: &mut Events,
        now: Instant,
        config: &Config,
    ) {
        let mut start = i64::from(seq.diff(self.recv.next) as i32);
        let mut data = payload;
        let mut fin = fin;

        if start < 0 {
            let skip = cmp::min((-start) as usize, data.len());
            data = data.sub_from(skip);
            start += skip as i64;
            if start < 0 {
                return;
            }
        }

        let offset = start as usize;
        let room = self.recv_window().saturating_sub(offset);
        if data.len() > room {
            data = data.sub_to(room);
            fin = false;
        }

        let fin_seq = self.recv.next + offset + data.len();
        if fin || !data.is_empty() {
            self.pending.ack = true;
        }

        if !data.is_empty() {
            let mut written = 0;
            for chunk in data.chunks() {
                written += self.rx.write_unallocated(offset + written, chunk);
            }

            if self.out_of_order.add(offset as u32, written as u32).is_err() {
                net_debug!("tcp: too many gaps, dropping segment {}", seq);
                return;
            }

            let ready = self.out_of_order.reduce_front() as usize;
            if ready > 0 {
                self.rx.enqueue_unallocated(ready);
                self.recv.next += ready;
                self.notify(id, Event::Received, events);
            }
        }

        if !fin || self.recv.next != fin_seq || !self.out_of_order.is_empty() {
            return;
        }

        self.recv.next += 1;
        self.notify(id, Event::PeerClosed, events);
        match self.state {
            State::Established => self.state = State::CloseWait,
            State::FinWait1 => self.state = State::Closing,
            State::FinWait2 => self.enter_time_wait(id, events, now, config),
            _ => (),
        }
    }
}

impl Rtt {
    /// Update the estimate with a measured round trip time.
    fn sample(&mut self, rtt: Duration, config: &Config) {
        let srtt = match self.srtt {
            None => {
                self.rttvar = rtt / 2;
                rtt
            },
            Some(srtt) => {
                let delta = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                (srtt * 7 + rtt) / 8
            },
        };
        self.srtt = Some(srtt);

        let variance = cmp::max(Duration::from_millis(1), self.rttvar * 4);
        self.rto = cmp::min(cmp::max(srtt + variance, config.rtx_min), config.rtx_max);
    }
}

/// The initial congestion window, RFC 3390.
fn initial_window(mss: usize) -> usize {
    if mss > 2190 {
        2 * mss
    } else if mss > 1095 {
        3 * mss
    } else {
        4 * mss
    }
}

/// The segment size limit of our configuration and the MSS option of a SYN.
fn peer_mss(seg: &TcpRepr, config: &Config) -> usize {
    let announced = seg.max_seg_size.unwrap_or(DEFAULT_MSS);
    cmp::min(usize::from(config.mss), usize::from(announced))
}
