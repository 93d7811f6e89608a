//! Building and sending segments, and the timers that decide when to.
use core::cmp;

use crate::buf::Pool;
use crate::layer::IpErr;
use crate::layer::ip::{Ip, SendFlags, HEADROOM};
use crate::nic::Driver;
use crate::retry::RequestId;
use crate::storage::RingBuffer;
use crate::time::{Expiration, Instant};
use crate::wire::{tcp_packet, IpProtocol, Ipv4Address, TcpFlags, TcpRepr, TcpSeqNumber, TtlProto};
use crate::wire::tcp::segment_checksum;

use super::{AbortReason, Config, ConnId, Events, HEADERS_LEN};
use super::connection::{Connection, Outcome, State};

/// The answer to a segment that belongs to no connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct Refusal {
    local_port: u16,
    remote_addr: Ipv4Address,
    remote_port: u16,
    seq: TcpSeqNumber,
    ack: Option<TcpSeqNumber>,
}

impl Refusal {
    /// The reset for a segment, see RFC 793 page 36.
    ///
    /// A reset is never answered.
    pub(super) fn answer(remote: Ipv4Address, seg: &TcpRepr) -> Option<Self> {
        if seg.flags.rst() {
            return None;
        }

        let (seq, ack) = match seg.ack_number {
            Some(ack) => (ack, None),
            None => (TcpSeqNumber(0), Some(seg.seq_number + seg.sequence_len())),
        };

        Some(Refusal {
            local_port: seg.dst_port,
            remote_addr: remote,
            remote_port: seg.src_port,
            seq,
            ack,
        })
    }

    pub(super) fn send<D: Driver>(&self, ip: &mut Ip<D>, tx: &mut Pool, now: Instant)
        -> Result<(), IpErr>
    {
        net_trace!("tcp: refusing segment from {}:{}", self.remote_addr, self.remote_port);
        let repr = TcpRepr {
            src_port: self.local_port,
            dst_port: self.remote_port,
            flags: TcpFlags::RST,
            seq_number: self.seq,
            ack_number: self.ack,
            window_len: 0,
            max_seg_size: None,
            payload_len: 0,
        };
        send(ip, tx, self.remote_addr, &repr, None, None, now)
    }
}

/// Send a segment, with its payload copied from a send buffer at an offset.
///
/// The segment is allocated in `tx` and released again before returning.
pub(super) fn send<D: Driver>(
    ip: &mut Ip<D>,
    tx: &mut Pool,
    dst_addr: Ipv4Address,
    repr: &TcpRepr,
    data: Option<(&RingBuffer<u8>, usize)>,
    retry: Option<RequestId>,
    now: Instant,
) -> Result<(), IpErr> {
    let src_addr = ip.ip4_addrs().ok_or(IpErr::NoIpRoute)?.addr;
    let mark = tx.mark();
    let sent = emit(ip, tx, src_addr, dst_addr, repr, data, retry, now);
    tx.release(mark);
    sent
}

fn emit<D: Driver>(
    ip: &mut Ip<D>,
    tx: &mut Pool,
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    repr: &TcpRepr,
    data: Option<(&RingBuffer<u8>, usize)>,
    retry: Option<RequestId>,
    now: Instant,
) -> Result<(), IpErr> {
    let header_len = repr.header_len();
    let len = header_len + repr.payload_len;
    let segment = tx.alloc(HEADROOM, len).ok_or(IpErr::BufferFull)?;

    {
        let bytes = tx.header_mut(segment, len).ok_or(IpErr::NoHeaderSpace)?;
        let (header, payload) = bytes.split_at_mut(header_len);
        repr.emit(tcp_packet::new_unchecked_mut(header));
        if let Some((ring, offset)) = data {
            let copied = ring.read_allocated(offset, payload);
            debug_assert_eq!(copied, payload.len());
        }
    }

    let checksum = segment_checksum(tx.buf(segment), src_addr, dst_addr);
    {
        let header = tx.header_mut(segment, header_len).ok_or(IpErr::NoHeaderSpace)?;
        tcp_packet::new_unchecked_mut(header).set_checksum(checksum);
    }

    net_trace!("tcp: sending {} to {}", repr, dst_addr);
    let ttl_proto = TtlProto::new(ip.config().ttl, IpProtocol::Tcp);
    let flags = SendFlags { dont_fragment: true };
    ip.send_dgram(tx, segment, dst_addr, ttl_proto, flags, retry, now)
}

impl<'a> Connection<'a> {
    /// Send everything that is due.
    ///
    /// A failure is retried, by the registered request when the eth layer accepted it and by a
    /// timer in any case.
    pub(super) fn output<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        retry: Option<RequestId>,
        now: Instant,
        config: &Config,
    ) {
        match self.transmit(ip, tx, retry, now, config) {
            Ok(()) => self.timers.output_retry = Expiration::Never,
            Err(err) => {
                net_debug!("tcp: output to {} failed: {}", self.tuple.remote, err);
                let delay = match err {
                    IpErr::BufferFull => config.output_retry_full,
                    _ => config.output_retry_other,
                };
                self.timers.output_retry = Expiration::When(now + delay);
            },
        }
        self.update_retransmit_timer(now, config);
    }

    fn transmit<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        retry: Option<RequestId>,
        now: Instant,
        config: &Config,
    ) -> Result<(), IpErr> {
        match self.state {
            State::SynSent | State::SynReceived => {
                if self.pending.syn {
                    self.send_syn(ip, tx, retry, now, config)?;
                    self.pending.syn = false;
                }
            },
            state if state.can_output() => {
                if self.pending.fast_retransmit {
                    let mss = self.send_mss();
                    self.resend_front(ip, tx, mss, retry, now)?;
                    self.pending.fast_retransmit = false;
                }
                if self.pending.probe {
                    self.resend_front(ip, tx, 1, retry, now)?;
                    self.pending.probe = false;
                }
                self.send_queued(ip, tx, retry, now)?;
            },
            _ => (),
        }

        if self.pending.ack && self.state != State::Closed {
            let seq = self.send.next;
            self.segment(ip, tx, TcpFlags::default(), seq, 0, retry, now)?;
        }
        Ok(())
    }

    fn send_syn<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        retry: Option<RequestId>,
        now: Instant,
        config: &Config,
    ) -> Result<(), IpErr> {
        let iss = self.send.initial_seq;
        let ack = match self.state {
            State::SynReceived => Some(self.recv.next),
            _ => None,
        };
        let mss = cmp::min(usize::from(config.mss), ip.mtu().saturating_sub(HEADERS_LEN));
        let window = self.recv_window();

        let repr = TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags: TcpFlags::SYN,
            seq_number: iss,
            ack_number: ack,
            window_len: window as u16,
            max_seg_size: Some(mss as u16),
            payload_len: 0,
        };
        send(ip, tx, self.tuple.remote, &repr, None, retry, now)?;

        if ack.is_some() {
            self.recv.announced = self.recv.next + window;
            self.pending.ack = false;
        }
        if self.send.next == iss {
            self.send.next = iss + 1;
        }
        if self.rtt.timed.is_none() && self.rtt.retransmissions == 0 {
            self.rtt.timed = Some((iss, now));
        }
        Ok(())
    }

    /// Send new data, and the FIN after it, as far as the windows allow.
    fn send_queued<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        let mss = self.send_mss();
        loop {
            let window = cmp::min(self.send.window, self.flow_control.congestion_window);
            let queued = self.tx.len();
            let offset = self.send.cursor;
            let room = window.saturating_sub(offset);
            let len = cmp::min(cmp::min(queued.saturating_sub(offset), room), mss);
            let fin = self.state.fin_queued() && offset + len == queued && room > len;

            if len == 0 && !fin {
                return Ok(());
            }
            self.send_data(ip, tx, offset, len, fin, retry, now)?;
        }
    }

    /// Send data from the front of the send buffer again.
    fn resend_front<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        limit: usize,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        let queued = self.tx.len();
        let len = cmp::min(limit, queued);
        let fin = self.state.fin_queued() && limit > queued;
        if len == 0 && !fin {
            return Ok(());
        }
        self.send_data(ip, tx, 0, len, fin, retry, now)
    }

    fn send_data<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        offset: usize,
        len: usize,
        fin: bool,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        let seq = self.send.unacked + offset;
        let mut flags = TcpFlags::default();
        flags.set_fin(fin);
        flags.set_psh(len > 0 && offset + len == self.tx.len());
        self.segment(ip, tx, flags, seq, len, retry, now)?;

        let end = offset + len + if fin { 1 } else { 0 };
        let sent = self.send.next.diff(self.send.unacked) as usize;
        if offset < sent {
            // Karn's algorithm, retransmissions are not timed.
            self.rtt.timed = None;
        } else if self.rtt.timed.is_none() {
            self.rtt.timed = Some((seq, now));
        }

        self.send.cursor = cmp::max(self.send.cursor, end);
        if end > sent {
            self.send.next = self.send.unacked + end;
        }
        Ok(())
    }

    /// Send a segment acknowledging everything received so far.
    ///
    /// Its `len` bytes of payload start at the same offset in the send buffer as `seq` lies
    /// after `SND.UNA`.
    fn segment<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        flags: TcpFlags,
        seq: TcpSeqNumber,
        len: usize,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        let window = self.recv_window();
        let repr = TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags,
            seq_number: seq,
            ack_number: Some(self.recv.next),
            window_len: window as u16,
            max_seg_size: None,
            payload_len: len,
        };

        let data = if len > 0 {
            Some((&self.tx, seq.diff(self.send.unacked) as usize))
        } else {
            None
        };
        send(ip, tx, self.tuple.remote, &repr, data, retry, now)?;

        self.recv.announced = self.recv.next + window;
        self.pending.ack = false;
        Ok(())
    }

    /// Send a reset for this connection.
    pub(super) fn send_reset<D: Driver>(&self, ip: &mut Ip<D>, tx: &mut Pool, now: Instant)
        -> Result<(), IpErr>
    {
        let ack = match self.state {
            State::Closed | State::SynSent => return Ok(()),
            _ => Some(self.recv.next),
        };

        let repr = TcpRepr {
            src_port: self.tuple.local_port,
            dst_port: self.tuple.remote_port,
            flags: TcpFlags::RST,
            seq_number: self.send.next,
            ack_number: ack,
            window_len: 0,
            max_seg_size: None,
            payload_len: 0,
        };
        send(ip, tx, self.tuple.remote, &repr, None, None, now)
    }

    /// Arm or cancel the retransmission and persist timer.
    fn update_retransmit_timer(&mut self, now: Instant, config: &Config) {
        let outstanding = self.send.next != self.send.unacked;
        let stalled = self.state.can_output()
            && self.send.window == 0
            && (!self.tx.is_empty() || self.state.fin_queued());

        if !outstanding && !stalled {
            self.timers.retransmit = Expiration::Never;
            return;
        }

        if self.timers.retransmit.is_set() {
            return;
        }

        let timeout = if outstanding {
            self.rtt.rto
        } else {
            cmp::min(cmp::max(self.rtt.rto, config.window_probe), config.rtx_max)
        };
        self.timers.retransmit = Expiration::When(now + timeout);
    }

    /// Handle the expired retransmission timer.
    ///
    /// Returns an outcome if the connection gave up.
    fn retransmit_timeout(&mut self, id: ConnId, events: &mut Events, config: &Config)
        -> Option<Outcome>
    {
        if self.rtt.retransmissions >= config.max_retransmissions {
            self.abort(id, AbortReason::Timeout, events);
            return Some(match self.state {
                State::SynSent => Outcome::Release,
                _ => Outcome::Reset,
            });
        }

        self.rtt.retransmissions += 1;
        self.rtt.timed = None;
        self.rtt.rto = cmp::min(self.rtt.rto * 2, config.rtx_max);

        let mss = self.send_mss();
        match self.state {
            State::SynSent | State::SynReceived => self.pending.syn = true,
            _ if self.send.window == 0 => {
                self.send.cursor = 0;
                self.pending.probe = true;
            },
            _ => {
                net_debug!("tcp: retransmission {} to {}", self.rtt.retransmissions, self.tuple.remote);
                let flight = self.send.next.diff(self.send.unacked) as usize;
                let reno = &mut self.flow_control;
                reno.ssthresh = cmp::max(flight / 2, 2 * mss);
                reno.congestion_window = mss;
                reno.acked = 0;
                reno.dup_acks = 0;
                reno.recover = Some(self.send.next);
                self.send.cursor = 0;
            },
        }
        None
    }

    /// Handle expired timers.
    ///
    /// Returns what the layer has to do, if anything.
    pub(super) fn poll(&mut self, id: ConnId, events: &mut Events, now: Instant, config: &Config)
        -> Option<Outcome>
    {
        if self.timers.linger.is_expired(now) {
            self.timers.linger = Expiration::Never;
            match self.state {
                State::TimeWait => return Some(Outcome::Release),
                State::SynSent => {
                    self.abort(id, AbortReason::Timeout, events);
                    return Some(Outcome::Release);
                },
                State::SynReceived => {
                    self.abort(id, AbortReason::Timeout, events);
                    return Some(Outcome::Reset);
                },
                _ => (),
            }
        }

        let mut output = false;
        if self.timers.retransmit.is_expired(now) {
            self.timers.retransmit = Expiration::Never;
            if let Some(outcome) = self.retransmit_timeout(id, events, config) {
                return Some(outcome);
            }
            output = true;
        }

        if self.timers.output_retry.is_expired(now) {
            self.timers.output_retry = Expiration::Never;
            output = true;
        }

        if output { Some(Outcome::Output) } else { None }
    }

    /// Use a lowered path MTU.
    ///
    /// Data in flight is sent again in smaller segments. Returns whether anything changed.
    pub(super) fn path_mtu_lowered(&mut self, mtu: usize) -> bool {
        let mss = mtu.saturating_sub(HEADERS_LEN);
        if mss >= self.send.path_mss {
            return false;
        }

        net_debug!("tcp: mss towards {} lowered to {}", self.tuple.remote, mss);
        self.send.path_mss = mss;
        if self.state.can_output() && self.send.cursor > 0 {
            self.send.cursor = 0;
            self.rtt.timed = None;
        }
        true
    }
}
