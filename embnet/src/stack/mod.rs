//! The composition of all layers behind one interface.
//!
//! A [`Stack`] owns the driver, the layers on top of it and the packet pool used for everything
//! the stack sends. It is driven entirely from the outside, by a single event loop:
//!
//! * the driver's receive path hands each frame to [`recv_frame`],
//! * changes of the driver are reported with [`link_changed`] and [`tx_ready`],
//! * and [`poll`] is called whenever [`next_deadline`] has passed.
//!
//! In between, applications use the connection methods. None of these block. After each call
//! the stack hands the retry requests that became ready to the TCP connections owning them, so
//! that a blocked segment goes out as soon as the resource it waited for is available.
//!
//! [`Stack`]: struct.Stack.html
//! [`recv_frame`]: struct.Stack.html#method.recv_frame
//! [`link_changed`]: struct.Stack.html#method.link_changed
//! [`tx_ready`]: struct.Stack.html#method.tx_ready
//! [`poll`]: struct.Stack.html#method.poll
//! [`next_deadline`]: struct.Stack.html#method.next_deadline
use crate::buf::{Buf, Pool, Segment};
use crate::layer::IpErr;
use crate::layer::eth::{self, Eth};
use crate::layer::ip::{self, Delivery, Ip, Ip4Addrs, SendFlags, HEADROOM};
use crate::layer::tcp::{self, ConnId, Connection, Event, ListenerId, State, Tcp};
use crate::managed::Slice;
use crate::nic::{Driver, LinkState};
use crate::time::{Expiration, Instant};
use crate::wire::{IpProtocol, Ipv4Address, TtlProto};


/// The configuration of all layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Config {
    /// Address resolution.
    pub eth: eth::Config,
    /// IPv4.
    pub ip: ip::Config,
    /// TCP.
    pub tcp: tcp::Config,
}

/// Caller supplied memory of all layers.
pub struct Storage<'a> {
    /// Memory of the ethernet layer.
    pub eth: eth::Storage<'a>,
    /// Memory of the IP layer.
    pub ip: ip::Storage<'a>,
    /// Memory of the TCP layer.
    pub tcp: tcp::Storage<'a>,
    /// Memory for packets while they are sent.
    ///
    /// Must hold the largest segment with headers, plus fragment headers.
    pub tx_memory: Slice<'a, u8>,
    /// Descriptors for packets while they are sent.
    pub tx_segments: Slice<'a, Segment>,
}

/// What remains to be done after a frame was received.
enum Followup {
    Tcp(tcp::Action),
    PmtuLowered(Ipv4Address, usize),
}

/// A network stack on a single interface.
pub struct Stack<'a, D> {
    ip: Ip<'a, D>,
    tcp: Tcp<'a>,
    tx: Pool<'a>,
}

impl<'a, D: Driver> Stack<'a, D> {
    /// Create the stack on top of a driver.
    ///
    /// The interface has no address until one is set with `set_ip4_addrs`.
    pub fn new(driver: D, storage: Storage<'a>, config: Config) -> Self {
        let Storage { eth, ip, tcp, tx_memory, tx_segments } = storage;
        let eth = Eth::new(driver, eth, config.eth);
        Stack {
            ip: Ip::new(eth, ip, config.ip),
            tcp: Tcp::new(tcp, config.tcp),
            tx: Pool::new(tx_memory, tx_segments),
        }
    }

    /// Access the driver.
    pub fn driver(&self) -> &D {
        self.ip.eth().driver()
    }

    /// Mutably access the driver.
    pub fn driver_mut(&mut self) -> &mut D {
        self.ip.eth_mut().driver_mut()
    }

    /// The IP layer, including the ethernet layer.
    pub fn ip(&self) -> &Ip<'a, D> {
        &self.ip
    }

    /// The TCP layer.
    pub fn tcp(&self) -> &Tcp<'a> {
        &self.tcp
    }

    /// Configure the address of the interface, or remove it.
    pub fn set_ip4_addrs(&mut self, addrs: Option<(Ipv4Address, u8)>) {
        self.ip.set_ip4_addrs(addrs);
    }

    /// The address configuration of the interface.
    pub fn ip4_addrs(&self) -> Option<Ip4Addrs> {
        self.ip.ip4_addrs()
    }

    /// Process a frame received by the driver.
    pub fn recv_frame(&mut self, frame: Buf, now: Instant) {
        let local = self.ip.ip4_addrs().map(|addrs| addrs.addr);
        let Stack { ip, tcp, tx } = self;

        let followup = match ip.recv(frame, tx, now) {
            Some(Delivery::Dgram(dgram)) => match (dgram.ttl_proto.protocol(), local) {
                (IpProtocol::Tcp, Some(local)) => tcp.input(&dgram, local, now).map(Followup::Tcp),
                (protocol, _) => {
                    net_trace!("stack: no handler for {} from {}", protocol, dgram.src_addr);
                    None
                },
            },
            Some(Delivery::PmtuLowered { remote, mtu }) => Some(Followup::PmtuLowered(remote, mtu)),
            None => None,
        };

        match followup {
            Some(Followup::Tcp(action)) => tcp.react(ip, tx, action, now),
            Some(Followup::PmtuLowered(remote, mtu)) => tcp.pmtu_lowered(ip, tx, remote, mtu, now),
            None => (),
        }
        self.run_retries(now);
    }

    /// Check the link state after the driver reported a change.
    pub fn link_changed(&mut self, now: Instant) -> LinkState {
        let state = self.ip.link_changed();
        self.run_retries(now);
        state
    }

    /// The driver can accept frames again after it returned `BufferFull`.
    pub fn tx_ready(&mut self, now: Instant) {
        self.ip.tx_ready();
        self.run_retries(now);
    }

    /// Handle all expired timers.
    pub fn poll(&mut self, now: Instant) {
        self.ip.poll(now);
        self.tcp.poll(&mut self.ip, &mut self.tx, now);
        self.run_retries(now);
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.ip.next_deadline().min(self.tcp.next_deadline())
    }

    /// Send a datagram of another protocol.
    ///
    /// The datagram is not retried. If the next hop is being resolved a copy waits for the
    /// answer, which is still reported as `ArpQuery`.
    pub fn send_dgram(
        &mut self,
        payload: &[u8],
        dst_addr: Ipv4Address,
        protocol: IpProtocol,
        now: Instant,
    ) -> Result<(), IpErr> {
        let mark = self.tx.mark();
        let sent = self.emit_dgram(payload, dst_addr, protocol, now);
        self.tx.release(mark);
        self.run_retries(now);
        sent
    }

    fn emit_dgram(
        &mut self,
        payload: &[u8],
        dst_addr: Ipv4Address,
        protocol: IpProtocol,
        now: Instant,
    ) -> Result<(), IpErr> {
        let packet = self.tx.alloc(HEADROOM, payload.len()).ok_or(IpErr::BufferFull)?;
        self.tx.copy_in(packet, payload);
        let ttl_proto = TtlProto::new(self.ip.config().ttl, protocol);
        self.ip.send_dgram(&mut self.tx, packet, dst_addr, ttl_proto, SendFlags::default(), None, now)
    }

    /// Accept connections on a port.
    pub fn listen(&mut self, port: u16) -> Result<ListenerId, IpErr> {
        self.tcp.listen(port)
    }

    /// Stop accepting connections on a port.
    pub fn unlisten(&mut self, listener: ListenerId) {
        self.tcp.unlisten(listener)
    }

    /// Take an established connection of a listener.
    pub fn accept(&mut self, listener: ListenerId) -> Option<ConnId> {
        self.tcp.accept(listener)
    }

    /// Open a connection to a remote host.
    pub fn connect(&mut self, remote: Ipv4Address, port: u16, now: Instant) -> Result<ConnId, IpErr> {
        let conn = self.tcp.connect(&mut self.ip, &mut self.tx, remote, port, now);
        self.run_retries(now);
        conn
    }

    /// Queue data on a connection, returning how much was queued.
    pub fn send(&mut self, conn: ConnId, data: &[u8], now: Instant) -> usize {
        let queued = self.tcp.send(&mut self.ip, &mut self.tx, conn, data, now);
        self.run_retries(now);
        queued
    }

    /// Read received data of a connection, returning how much was read.
    pub fn recv(&mut self, conn: ConnId, data: &mut [u8], now: Instant) -> usize {
        let read = self.tcp.recv(&mut self.ip, &mut self.tx, conn, data, now);
        self.run_retries(now);
        read
    }

    /// Close the sending side of a connection.
    pub fn close(&mut self, conn: ConnId, now: Instant) {
        self.tcp.close(&mut self.ip, &mut self.tx, conn, now);
        self.run_retries(now);
    }

    /// Reset a connection.
    pub fn abort(&mut self, conn: ConnId, now: Instant) {
        self.tcp.abort(&mut self.ip, &mut self.tx, conn, now);
        self.run_retries(now);
    }

    /// The state of a connection.
    pub fn state(&self, conn: ConnId) -> State {
        self.tcp.state(conn)
    }

    /// Inspect a connection.
    pub fn connection(&self, conn: ConnId) -> Option<&Connection<'a>> {
        self.tcp.connection(conn)
    }

    /// Take the oldest connection event.
    pub fn poll_event(&mut self) -> Option<(ConnId, Event)> {
        self.tcp.poll_event()
    }

    /// Hand every dispatched retry request to its connection, once.
    fn run_retries(&mut self, now: Instant) {
        while let Some(req) = self.ip.eth_mut().retry_mut().pop_ready() {
            net_trace!("stack: retrying request {}", req.index());
            self.tcp.on_retry(&mut self.ip, &mut self.tx, req, now);
        }
    }
}
