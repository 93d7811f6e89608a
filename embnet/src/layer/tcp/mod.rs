//! The TCP layer.
//!
//! Connections are kept in a fixed table of [`Connection`] slots, each with caller supplied
//! memory for the send and receive byte streams. Unlike the lower layers, the TCP layer does not
//! own the layer below it. It is handed the [`Ip`] layer and a packet pool whenever it may have to
//! send, which lets incoming segments be processed while the received datagram still borrows the
//! IP layer's memory.
//!
//! ## Receiving segments
//!
//! [`Tcp::input`] processes a segment against the connection it belongs to, or a listener, and
//! updates all state that does not require sending. What remains to be sent is returned as an
//! [`Action`] which the caller passes to [`Tcp::react`] once the datagram is released. An
//! application learns of changes through the events of [`Tcp::poll_event`].
//!
//! ## Sending
//!
//! Every segment is built freshly from the connection state and the send buffer. Nothing is kept
//! in the packet pool after the call returns, so a segment that could not be sent is simply built
//! again later: each connection owns the [`RequestId`] with the index of its slot, which the eth
//! layer registers when the failure is temporary. The owner of the layers routes dispatched
//! requests back into [`Tcp::on_retry`]. An output-retry timer is armed as well, for failures
//! that are not registered.
//!
//! ## Deviations
//!
//! There is neither a Nagle algorithm nor delayed acknowledgment, data is sent as soon as the
//! windows permit and every segment received is answered right away. Simultaneous open is
//! refused. Urgent data is ignored.
//!
//! [`Connection`]: struct.Connection.html
//! [`Ip`]: ../ip/struct.Ip.html
//! [`Tcp::input`]: struct.Tcp.html#method.input
//! [`Action`]: struct.Action.html
//! [`Tcp::react`]: struct.Tcp.html#method.react
//! [`Tcp::poll_event`]: struct.Tcp.html#method.poll_event
//! [`RequestId`]: ../../retry/struct.RequestId.html
//! [`Tcp::on_retry`]: struct.Tcp.html#method.on_retry
use core::cmp;

use crate::buf::Pool;
use crate::managed::Slice;
use crate::nic::Driver;
use crate::retry::RequestId;
use crate::storage::RingBuffer;
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{IpProtocol, Ipv4Address, TcpRepr};

use super::IpErr;
use super::ip::{Ip, Ip4Dgram};

mod connection;
mod isn;
mod output;
#[cfg(test)]
mod tests;

pub use self::connection::{Connection, State};
pub use self::isn::IsnGenerator;

use self::connection::Outcome;
use self::output::Refusal;

/// The first port used for active opens, see RFC 6335.
pub const EPHEMERAL_START: u16 = 49152;

/// The segment size assumed when a SYN carries no MSS option.
pub const DEFAULT_MSS: u16 = 536;

/// IPv4 and TCP header without options.
const HEADERS_LEN: usize = 40;

/// The four tuple identifying a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FourTuple {
    /// Our address.
    pub local: Ipv4Address,
    /// Our port.
    pub local_port: u16,
    /// The address of the peer.
    pub remote: Ipv4Address,
    /// The port of the peer.
    pub remote_port: u16,
}

/// Protocol constants of the TCP layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// The largest segment we receive, and send.
    pub mss: u16,
    /// The retransmission timeout before a round trip time was measured.
    pub rtx_initial: Duration,
    /// Lower bound of the retransmission timeout.
    pub rtx_min: Duration,
    /// Upper bound of the retransmission timeout, also of its backoff.
    pub rtx_max: Duration,
    /// Consecutive timeouts after which the connection is aborted.
    pub max_retransmissions: u8,
    /// The duration of `TimeWait`, twice the maximum segment lifetime.
    pub time_wait: Duration,
    /// How long a passive open may wait for the final ACK.
    pub syn_rcvd_timeout: Duration,
    /// How long an active open may wait for the SYN-ACK.
    pub syn_sent_timeout: Duration,
    /// The first interval of probes into a closed window.
    pub window_probe: Duration,
    /// Delay before output is tried again after the packet buffers were full.
    pub output_retry_full: Duration,
    /// Delay before output is tried again after any other failure.
    pub output_retry_other: Duration,
    /// Duplicate acknowledgments that trigger a fast retransmit.
    pub dup_ack_threshold: u8,
    /// The secret of the initial sequence numbers.
    pub isn_key: [u8; 16],
}

/// Caller supplied memory of the layer.
pub struct Storage<'a> {
    /// The connection slots.
    pub connections: Slice<'a, Connection<'a>>,
    /// The listener slots.
    pub listeners: Slice<'a, Listener>,
    /// Queue of events for the application.
    ///
    /// Up to one entry per connection, but at most half of the queue, is kept for `Closed` and
    /// `Aborted` which other events can not take.
    pub events: Slice<'a, (ConnId, Event)>,
}

/// A port accepting connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Listener {
    port: Option<u16>,
}

/// Handle of a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// Handle of a connection.
///
/// A handle becomes stale when its connection slot is released and then no longer refers to any
/// connection, even after the slot was reused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConnId {
    index: usize,
    generation: u16,
}

/// Something that happened to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// The handshake completed.
    Connected,
    /// New data can be read.
    Received,
    /// The peer acknowledged that many bytes, which freed space in the send buffer.
    Sent(usize),
    /// The peer will not send any more data.
    PeerClosed,
    /// The connection was closed on both sides.
    Closed,
    /// The connection failed.
    Aborted(AbortReason),
}

/// Why a connection was aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// The peer reset the connection.
    Reset,
    /// The peer did not answer in time.
    Timeout,
    /// The peer refused the connection attempt.
    Refused,
    /// The application aborted the connection.
    Local,
}

/// Sending owed after a segment was received.
///
/// Returned by [`Tcp::input`], to be handed to [`Tcp::react`].
///
/// [`Tcp::input`]: struct.Tcp.html#method.input
/// [`Tcp::react`]: struct.Tcp.html#method.react
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Action(Deferred);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Deferred {
    Output(usize),
    Accept(usize),
    Refuse(Refusal),
    Reset(usize),
    Release(usize),
}

struct Events<'a> {
    queue: RingBuffer<'a, (ConnId, Event)>,
    /// Free entries only the end of a connection may take.
    reserved: usize,
}

/// The TCP layer.
pub struct Tcp<'a> {
    connections: Slice<'a, Connection<'a>>,
    listeners: Slice<'a, Listener>,
    events: Events<'a>,
    isn: IsnGenerator,
    next_port: u16,
    config: Config,
}

impl<'a> Tcp<'a> {
    /// Create the layer with its memory.
    pub fn new(storage: Storage<'a>, config: Config) -> Self {
        let Storage { connections, mut listeners, events } = storage;
        listeners.iter_mut().for_each(|listener| *listener = Listener::default());
        let events = Events::new(events, connections.len());
        Tcp {
            connections,
            listeners,
            events,
            isn: IsnGenerator::from_secret_key_bytes(config.isn_key),
            next_port: EPHEMERAL_START,
            config,
        }
    }

    /// The configuration of the layer.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inspect a connection.
    pub fn connection(&self, conn: ConnId) -> Option<&Connection<'a>> {
        self.index(conn).map(|index| &self.connections[index])
    }

    /// The state of a connection, `Closed` for stale handles.
    pub fn state(&self, conn: ConnId) -> State {
        self.connection(conn).map_or(State::Closed, Connection::state)
    }

    /// Take the oldest event.
    pub fn poll_event(&mut self) -> Option<(ConnId, Event)> {
        self.events.pop()
    }

    /// Accept connections on a port.
    pub fn listen(&mut self, port: u16) -> Result<ListenerId, IpErr> {
        if self.listeners.iter().any(|listener| listener.port == Some(port)) {
            return Err(IpErr::NoPortAvail);
        }

        let index = self.listeners.iter()
            .position(|listener| listener.port.is_none())
            .ok_or(IpErr::NoPcbAvail)?;
        self.listeners[index].port = Some(port);
        Ok(ListenerId(index))
    }

    /// Stop accepting connections.
    ///
    /// Connections that were already opened are not affected.
    pub fn unlisten(&mut self, listener: ListenerId) {
        if let Some(slot) = self.listeners.get_mut(listener.0) {
            slot.port = None;
        }
    }

    /// Take an established connection of a listener.
    pub fn accept(&mut self, listener: ListenerId) -> Option<ConnId> {
        let index = self.connections.iter().position(|conn| {
            conn.state != State::Closed
                && conn.listener == Some(listener)
                && conn.announced
                && !conn.accepted
        })?;

        let conn = &mut self.connections[index];
        conn.accepted = true;
        Some(conn.id(index))
    }

    /// Open a connection.
    ///
    /// The SYN is sent right away if possible. Failures to send are retried like any other
    /// segment and do not fail the call.
    pub fn connect<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        remote: Ipv4Address,
        remote_port: u16,
        now: Instant,
    ) -> Result<ConnId, IpErr> {
        let addrs = ip.ip4_addrs().ok_or(IpErr::NoIpRoute)?;
        addrs.next_hop(remote).ok_or(IpErr::NoIpRoute)?;

        let index = self.connections.iter()
            .position(|conn| conn.state == State::Closed)
            .ok_or(IpErr::NoPcbAvail)?;
        let local_port = self.ephemeral_port().ok_or(IpErr::NoPortAvail)?;
        ip.pmtu_acquire(remote)?;

        let tuple = FourTuple {
            local: addrs.addr,
            local_port,
            remote,
            remote_port,
        };
        let iss = self.isn.get_isn(tuple, now);

        let conn = &mut self.connections[index];
        conn.open_active(tuple, iss, now, &self.config);
        conn.hold_path(ip.pmtu(remote));
        let id = conn.id(index);

        net_debug!("tcp: connecting {} to {}:{}", local_port, remote, remote_port);
        self.output(ip, tx, index, now);
        Ok(id)
    }

    /// Queue data, returning how much fit into the send buffer.
    pub fn send<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        conn: ConnId,
        data: &[u8],
        now: Instant,
    ) -> usize {
        let index = match self.index(conn) {
            Some(index) => index,
            None => return 0,
        };

        let queued = self.connections[index].queue(data);
        if queued > 0 {
            self.output(ip, tx, index, now);
        }
        queued
    }

    /// Read received data, returning how much was read.
    pub fn recv<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        conn: ConnId,
        data: &mut [u8],
        now: Instant,
    ) -> usize {
        let index = match self.index(conn) {
            Some(index) => index,
            None => return 0,
        };

        let read = self.connections[index].read(data, &self.config);
        if self.connections[index].pending.ack {
            self.output(ip, tx, index, now);
        }
        read
    }

    /// Close the sending side, the FIN follows all queued data.
    pub fn close<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, conn: ConnId, now: Instant) {
        let index = match self.index(conn) {
            Some(index) => index,
            None => return,
        };

        if self.connections[index].close(conn, &mut self.events) {
            self.release(ip, index);
        } else {
            self.output(ip, tx, index, now);
        }
    }

    /// Reset a connection and free it.
    pub fn abort<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, conn: ConnId, now: Instant) {
        let index = match self.index(conn) {
            Some(index) => index,
            None => return,
        };

        let connection = &self.connections[index];
        if let Err(err) = connection.send_reset(ip, tx, now) {
            net_debug!("tcp: reset to {} failed: {}", connection.tuple.remote, err);
        }
        if connection.state != State::TimeWait {
            connection.abort(conn, AbortReason::Local, &mut self.events);
        }
        self.release(ip, index);
    }

    /// Process a received datagram.
    ///
    /// `local` is the address of the interface, segments to broadcast addresses are dropped.
    /// Returns what has to be sent in answer.
    pub fn input(&mut self, dgram: &Ip4Dgram, local: Ipv4Address, now: Instant) -> Option<Action> {
        if dgram.dst_addr != local || dgram.ttl_proto.protocol() != IpProtocol::Tcp {
            return None;
        }

        let (seg, header_len) = match TcpRepr::parse(dgram.payload, dgram.src_addr, dgram.dst_addr) {
            Ok(parsed) => parsed,
            Err(err) => {
                net_debug!("tcp: dropping segment from {}: {}", dgram.src_addr, err);
                return None;
            },
        };
        let payload = dgram.payload.sub_from(header_len);
        let remote = dgram.src_addr;
        net_trace!("tcp: {} from {}", seg, remote);

        let found = self.connections.iter()
            .position(|conn| conn.matches(remote, seg.src_port, seg.dst_port));
        if let Some(index) = found {
            let conn = &mut self.connections[index];
            let id = conn.id(index);
            let deferred = match conn.input(id, &seg, payload, &mut self.events, now, &self.config) {
                Outcome::Output => Deferred::Output(index),
                Outcome::Refuse => return refuse(remote, &seg),
                Outcome::Reset => Deferred::Reset(index),
                Outcome::Release => Deferred::Release(index),
            };
            return Some(Action(deferred));
        }

        let listener = match self.listeners.iter().position(|l| l.port == Some(seg.dst_port)) {
            Some(listener) => ListenerId(listener),
            None => return refuse(remote, &seg),
        };

        if seg.flags.rst() {
            return None;
        }
        if seg.ack_number.is_some() {
            return refuse(remote, &seg);
        }
        if !seg.flags.syn() {
            return None;
        }

        let index = match self.connections.iter().position(|conn| conn.state == State::Closed) {
            Some(index) => index,
            None => {
                net_debug!("tcp: no slot for connection from {}:{}", remote, seg.src_port);
                return None;
            },
        };

        let tuple = FourTuple {
            local,
            local_port: seg.dst_port,
            remote,
            remote_port: seg.src_port,
        };
        let iss = self.isn.get_isn(tuple, now);
        self.connections[index].open_passive(tuple, listener, &seg, iss, now, &self.config);
        Some(Action(Deferred::Accept(index)))
    }

    /// Send what the processing of a segment left to do.
    pub fn react<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, action: Action, now: Instant) {
        match action.0 {
            Deferred::Output(index) => self.output(ip, tx, index, now),
            Deferred::Accept(index) => self.open_path(ip, tx, index, now),
            Deferred::Refuse(refusal) => {
                if let Err(err) = refusal.send(ip, tx, now) {
                    net_debug!("tcp: reset failed: {}", err);
                }
            },
            Deferred::Reset(index) => self.reset(ip, tx, index, now),
            Deferred::Release(index) => self.release(ip, index),
        }
    }

    /// Handle a dispatched retry request.
    pub fn on_retry<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, req: RequestId, now: Instant) {
        let index = req.index();
        match self.connections.get(index) {
            Some(conn) if conn.state != State::Closed => self.output(ip, tx, index, now),
            _ => (),
        }
    }

    /// Apply a lowered path MTU to the connections with the remote host.
    pub fn pmtu_lowered<D: Driver>(
        &mut self,
        ip: &mut Ip<D>,
        tx: &mut Pool,
        remote: Ipv4Address,
        mtu: usize,
        now: Instant,
    ) {
        for index in 0..self.connections.len() {
            let conn = &mut self.connections[index];
            if conn.holds_pmtu && conn.tuple.remote == remote && conn.path_mtu_lowered(mtu) {
                self.output(ip, tx, index, now);
            }
        }
    }

    /// Handle all expired timers.
    pub fn poll<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, now: Instant) {
        for index in 0..self.connections.len() {
            let conn = &mut self.connections[index];
            if conn.state == State::Closed {
                continue;
            }

            let id = conn.id(index);
            match conn.poll(id, &mut self.events, now, &self.config) {
                Some(Outcome::Output) => self.output(ip, tx, index, now),
                Some(Outcome::Reset) => self.reset(ip, tx, index, now),
                Some(Outcome::Release) => self.release(ip, index),
                Some(Outcome::Refuse) | None => (),
            }
        }
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.connections.iter()
            .filter(|conn| conn.state != State::Closed)
            .map(Connection::next_deadline)
            .min()
            .unwrap_or(Expiration::Never)
    }

    fn index(&self, conn: ConnId) -> Option<usize> {
        match self.connections.get(conn.index) {
            Some(slot) if slot.generation == conn.generation && slot.state != State::Closed => {
                Some(conn.index)
            },
            _ => None,
        }
    }

    fn ephemeral_port(&mut self) -> Option<u16> {
        let count = usize::from(u16::max_value() - EPHEMERAL_START) + 1;
        for _ in 0..count {
            let port = self.next_port;
            self.next_port = port.checked_add(1).unwrap_or(EPHEMERAL_START);
            let in_use = self.listeners.iter().any(|l| l.port == Some(port))
                || self.connections.iter()
                    .any(|conn| conn.state != State::Closed && conn.tuple.local_port == port);
            if !in_use {
                return Some(port);
            }
        }
        None
    }

    /// The retry request of a connection slot, if the eth layer has one for it.
    fn retry_id<D: Driver>(ip: &Ip<D>, index: usize) -> Option<RequestId> {
        if index < ip.eth().retry().request_count() {
            Some(RequestId::new(index))
        } else {
            None
        }
    }

    fn output<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, index: usize, now: Instant) {
        let retry = Self::retry_id(ip, index);
        self.connections[index].output(ip, tx, retry, now, &self.config);
    }

    /// Finish a passive open once the connection was taken.
    fn open_path<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, index: usize, now: Instant) {
        let remote = self.connections[index].tuple.remote;
        if let Err(err) = ip.pmtu_acquire(remote) {
            net_debug!("tcp: refusing connection from {}: {}", remote, err);
            return self.reset(ip, tx, index, now);
        }

        let conn = &mut self.connections[index];
        conn.hold_path(ip.pmtu(remote));
        if conn.send_mss() < ip.config().min_mtu.saturating_sub(HEADERS_LEN) {
            net_debug!("tcp: refusing connection from {}: mss too small", remote);
            return self.reset(ip, tx, index, now);
        }

        self.output(ip, tx, index, now);
    }

    fn reset<D: Driver>(&mut self, ip: &mut Ip<D>, tx: &mut Pool, index: usize, now: Instant) {
        let conn = &self.connections[index];
        if let Err(err) = conn.send_reset(ip, tx, now) {
            net_debug!("tcp: reset to {} failed: {}", conn.tuple.remote, err);
        }
        self.release(ip, index);
    }

    fn release<D: Driver>(&mut self, ip: &mut Ip<D>, index: usize) {
        if let Some(remote) = self.connections[index].release() {
            ip.pmtu_release(remote);
        }
        if let Some(req) = Self::retry_id(ip, index) {
            ip.eth_mut().retry_mut().remove_request(req);
        }
    }
}

impl<'a> Events<'a> {
    fn new(queue: Slice<'a, (ConnId, Event)>, connections: usize) -> Self {
        let queue = RingBuffer::from(queue);
        let reserved = cmp::min(connections, queue.capacity() / 2);
        Events { queue, reserved }
    }

    fn push(&mut self, conn: ConnId, event: Event) {
        if !event.is_terminal() && self.queue.window() <= self.reserved {
            net_debug!("tcp: event queue full, dropping {:?}", event);
            return;
        }

        match self.queue.enqueue_one() {
            Some(slot) => *slot = (conn, event),
            None => net_debug!("tcp: event queue full, dropping {:?}", event),
        }
    }

    fn pop(&mut self) -> Option<(ConnId, Event)> {
        self.queue.dequeue_one().map(|event| *event)
    }
}

impl Event {
    /// Whether this is the last event of a connection.
    pub fn is_terminal(self) -> bool {
        match self {
            Event::Closed | Event::Aborted(_) => true,
            _ => false,
        }
    }
}

impl ConnId {
    /// The index of the connection slot.
    pub fn index(self) -> usize {
        self.index
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mss: 1460,
            rtx_initial: Duration::from_secs(1),
            rtx_min: Duration::from_millis(250),
            rtx_max: Duration::from_secs(60),
            max_retransmissions: 12,
            time_wait: Duration::from_secs(120),
            syn_rcvd_timeout: Duration::from_secs(20),
            syn_sent_timeout: Duration::from_secs(30),
            window_probe: Duration::from_secs(1),
            output_retry_full: Duration::from_millis(100),
            output_retry_other: Duration::from_secs(2),
            dup_ack_threshold: 3,
            isn_key: [0; 16],
        }
    }
}

fn refuse(remote: Ipv4Address, seg: &TcpRepr) -> Option<Action> {
    Refusal::answer(remote, seg).map(|refusal| Action(Deferred::Refuse(refusal)))
}
