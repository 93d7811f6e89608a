//! The ethernet layer.
//!
//! This is tasked with decoding the framed ethernet data that the physical device deals with, and
//! putting IPv4 datagrams into an ethernet framing. Most of its state is the ARP neighbor cache
//! that resolves next hops to hardware addresses.
//!
//! A datagram for an unresolved next hop can not be sent. Instead one ARP request goes out and
//! the sender is registered with the retry list of the cache entry, or, if the sender has no way
//! of being retried, a copy of the datagram is parked in the entry. Once the reply arrives the list
//! is dispatched and a parked datagram sent. Similarly, senders that found the link down or the
//! driver queue full wait in the list of the interface which is dispatched when the driver
//! reports a change.
use crate::buf::{Buf, BufRef, Pool};
use crate::managed::Slice;
use crate::nic::{Driver, LinkState};
use crate::retry::{ListHead, ListId, Request, RequestId, SendRetry};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{
    arp::PACKET_LEN as ARP_PACKET_LEN,
    arp_packet,
    ethernet_frame,
    ArpOperation,
    ArpRepr,
    EthernetAddress,
    EthernetProtocol,
    EthernetRepr,
    Ipv4Address,
    ETHERNET_HEADER_LEN,
};

use super::IpErr;
use super::ip::Ip4Addrs;

mod arp;

pub use self::arp::{
    Cache as ArpCache,
    Entry as ArpEntry,
    State as ArpState,
};

use self::arp::Timeout;

/// The retry list of senders waiting for the interface itself.
///
/// Dispatched when the link comes up, the driver has transmit capacity again, or the address
/// configuration changes.
pub const INTERFACE_LIST: ListId = ListId::new(0);

/// Timing and eviction of address resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// The number of broadcast requests before giving up.
    pub query_attempts: u8,
    /// The number of unicast requests to refresh a stale entry before broadcasting again.
    pub refresh_attempts: u8,
    /// The time to wait for the first response, doubled for every further attempt.
    pub response_timeout: Duration,
    /// The time a resolved mapping is used without refreshing it.
    pub valid_time: Duration,
    /// The number of entries used for sending that unsolicited traffic can not take over.
    ///
    /// An entry learned from a packet nobody asked for only replaces an entry used for sending
    /// while more than this many of those exist. Clamped to the cache size.
    pub protect_count: usize,
}

/// Caller supplied memory of the layer.
pub struct Storage<'a> {
    /// The entries of the neighbor cache.
    pub arp: Slice<'a, ArpEntry>,
    /// One retry request per sender that can be retried, indexed by `RequestId`.
    pub requests: Slice<'a, Request>,
    /// The retry lists, one for the interface and one for each cache entry.
    ///
    /// Must hold exactly one more element than `arp`.
    pub lists: Slice<'a, ListHead>,
    /// Memory for parked datagrams, split evenly between the cache entries.
    pub hold: Slice<'a, u8>,
}

/// A received IPv4 frame.
#[derive(Clone, Copy, Debug)]
pub struct Ip4Frame<'f> {
    /// The sender of the frame.
    pub src_addr: EthernetAddress,
    /// Our address or broadcast.
    pub dst_addr: EthernetAddress,
    /// The IPv4 packet, possibly followed by link layer padding.
    pub payload: Buf<'f>,
}

/// The ethernet layer with its driver.
pub struct Eth<'a, D> {
    driver: D,
    cache: ArpCache<'a>,
    retry: SendRetry<'a>,
    hold: Slice<'a, u8>,
    hold_len: usize,
    addrs: Option<Ip4Addrs>,
    link: LinkState,
    config: Config,
}

/// The retry list of a cache entry.
fn entry_list(index: usize) -> ListId {
    ListId::new(index + 1)
}

impl<'a, D: Driver> Eth<'a, D> {
    /// Create the layer on top of a driver.
    ///
    /// # Panics
    /// This function panics if the number of retry lists is not one more than the number of
    /// cache entries.
    pub fn new(driver: D, storage: Storage<'a>, config: Config) -> Self {
        let Storage { arp, requests, lists, hold } = storage;
        assert_eq!(lists.len(), arp.len() + 1, "one retry list per cache entry and the interface");

        let cache = ArpCache::new(arp);
        let hold_len = match cache.capacity() {
            0 => 0,
            entries => hold.len() / entries,
        };
        let link = driver.link_state();

        Eth {
            driver,
            cache,
            retry: SendRetry::new(requests, lists),
            hold,
            hold_len,
            addrs: None,
            link,
            config,
        }
    }

    /// Access the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The hardware address of the interface.
    pub fn mac_addr(&self) -> EthernetAddress {
        self.driver.mac_addr()
    }

    /// The IP MTU of the link.
    pub fn mtu(&self) -> usize {
        self.driver.link_mtu()
    }

    /// The link state as of the last `link_changed`.
    pub fn link_state(&self) -> LinkState {
        self.link
    }

    /// The address configuration used to decide which hosts are on the link.
    pub fn addrs(&self) -> Option<Ip4Addrs> {
        self.addrs
    }

    /// Change the address configuration.
    ///
    /// Any change forgets all neighbors, including parked datagrams and registered senders, and
    /// dispatches the interface list.
    pub fn set_addrs(&mut self, addrs: Option<Ip4Addrs>) {
        if self.addrs == addrs {
            return;
        }

        for index in 0..self.cache.capacity() {
            self.retry.reset_list(entry_list(index));
        }
        self.cache.clear();
        self.addrs = addrs;
        self.retry.dispatch(INTERFACE_LIST);
    }

    /// Inspect the neighbor cache.
    pub fn cache(&self) -> &ArpCache<'a> {
        &self.cache
    }

    /// Inspect the retry registry.
    pub fn retry(&self) -> &SendRetry<'a> {
        &self.retry
    }

    /// Access the retry registry, to take dispatched requests or register senders.
    pub fn retry_mut(&mut self) -> &mut SendRetry<'a> {
        &mut self.retry
    }

    /// Check the link state reported by the driver.
    ///
    /// When the link came up, the senders waiting for the interface are dispatched.
    pub fn link_changed(&mut self) -> LinkState {
        let state = self.driver.link_state();
        if state != self.link {
            net_debug!("eth: link {:?}", state);
            self.link = state;
            if state == LinkState::Up {
                self.retry.dispatch(INTERFACE_LIST);
            }
        }
        state
    }

    /// The driver can accept frames again.
    pub fn tx_ready(&mut self) {
        self.retry.dispatch(INTERFACE_LIST);
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.cache.next_deadline()
    }

    /// Handle resolution timeouts.
    pub fn poll(&mut self, now: Instant) {
        for index in 0..self.cache.capacity() {
            match self.cache.timeout(index, now, &self.config) {
                Timeout::Nothing => (),
                Timeout::Resend(request) => self.send_request(request),
                Timeout::Failed => self.retry.reset_list(entry_list(index)),
            }
        }
    }

    /// Find the hardware address of a next hop.
    ///
    /// On `ArpQuery` the sender is registered with the list of the cache entry, on `LinkDown` and
    /// `NoHwRoute` with the interface list.
    pub fn resolve(&mut self, next_hop: Ipv4Address, retry: Option<RequestId>, now: Instant)
        -> Result<EthernetAddress, IpErr>
    {
        if self.link == LinkState::Down {
            self.register(INTERFACE_LIST, retry);
            return Err(IpErr::LinkDown);
        }

        let addrs = match self.addrs {
            Some(addrs) if addrs.is_broadcast(next_hop) => return Ok(EthernetAddress::BROADCAST),
            Some(addrs) if addrs.contains(next_hop) && next_hop != addrs.addr => addrs,
            _ => {
                self.register(INTERFACE_LIST, retry);
                return Err(IpErr::NoHwRoute);
            },
        };

        if !next_hop.is_unicast() {
            return Err(IpErr::NoHwRoute);
        }

        let lookup = match self.cache.resolve(next_hop, now, &self.config) {
            Some(lookup) => lookup,
            None => return Err(IpErr::NoHwRoute),
        };

        if lookup.fresh {
            // Whoever waited for the previous address of this entry is out of luck.
            self.retry.reset_list(entry_list(lookup.index));
        }

        if let Some(request) = lookup.request {
            net_trace!("arp: asking for {} as {}", next_hop, addrs.addr);
            self.send_request(request);
        }

        match lookup.hardware_addr {
            Some(hardware_addr) => Ok(hardware_addr),
            None => {
                self.register(entry_list(lookup.index), retry);
                Err(IpErr::ArpQuery)
            },
        }
    }

    /// Send an IPv4 packet to a next hop on the link.
    ///
    /// The packet must have room for the ethernet header in front of it. If the next hop is not
    /// resolved and there is no retry request, a copy of the packet is parked and sent once the
    /// address is known. The return value is still `ArpQuery` in that case.
    pub fn send_ip4(
        &mut self,
        pool: &mut Pool,
        packet: BufRef,
        next_hop: Ipv4Address,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        match self.resolve(next_hop, retry, now) {
            Ok(hardware_addr) => self.send_to(pool, packet, hardware_addr, retry),
            Err(IpErr::ArpQuery) => {
                if retry.is_none() {
                    self.park(pool.buf(packet), next_hop);
                }
                Err(IpErr::ArpQuery)
            },
            Err(err) => Err(err),
        }
    }

    /// Send an IPv4 packet to a known hardware address.
    ///
    /// On `BufferFull` and `LinkDown` the sender is registered with the interface list.
    pub fn send_to(
        &mut self,
        pool: &mut Pool,
        packet: BufRef,
        dst_addr: EthernetAddress,
        retry: Option<RequestId>,
    ) -> Result<(), IpErr> {
        let frame = packet.reveal_header(ETHERNET_HEADER_LEN)
            .ok_or(IpErr::NoHeaderSpace)?;
        let header = pool.header_mut(frame, ETHERNET_HEADER_LEN)
            .ok_or(IpErr::NoHeaderSpace)?;
        EthernetRepr {
            src_addr: self.driver.mac_addr(),
            dst_addr,
            ethertype: EthernetProtocol::Ipv4,
        }.emit(ethernet_frame::new_unchecked_mut(header));

        match self.driver.send_frame(pool.buf(frame)) {
            Ok(()) => Ok(()),
            Err(err) => {
                net_debug!("eth: send to {} failed: {}", dst_addr, err);
                if let IpErr::BufferFull | IpErr::LinkDown = err {
                    self.register(INTERFACE_LIST, retry);
                }
                Err(err)
            },
        }
    }

    /// Receive a frame from the driver.
    ///
    /// ARP packets are consumed. IPv4 frames sent to us or to broadcast are returned, everything
    /// else is dropped.
    pub fn recv_frame<'f>(&mut self, frame: Buf<'f>, now: Instant) -> Option<Ip4Frame<'f>> {
        let mut header = [0; ETHERNET_HEADER_LEN];
        if frame.copy_out(&mut header) < ETHERNET_HEADER_LEN {
            net_debug!("eth: truncated frame of {} bytes", frame.len());
            return None;
        }

        let repr = match EthernetRepr::parse(ethernet_frame::new_unchecked(&header)) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("eth: dropping frame: {}", err);
                return None;
            },
        };

        if repr.dst_addr != self.driver.mac_addr() && !repr.dst_addr.is_broadcast() {
            net_trace!("eth: frame for {}", repr.dst_addr);
            return None;
        }

        let payload = frame.sub_from(ETHERNET_HEADER_LEN);
        match repr.ethertype {
            EthernetProtocol::Ipv4 => Some(Ip4Frame {
                src_addr: repr.src_addr,
                dst_addr: repr.dst_addr,
                payload,
            }),
            EthernetProtocol::Arp => {
                self.recv_arp(payload, now);
                None
            },
            other => {
                net_trace!("eth: unhandled ethertype {}", other);
                None
            },
        }
    }

    fn recv_arp(&mut self, payload: Buf, now: Instant) {
        let mut bytes = [0; ARP_PACKET_LEN];
        if payload.copy_out(&mut bytes) < ARP_PACKET_LEN {
            net_debug!("arp: truncated packet");
            return;
        }

        let repr = match ArpRepr::parse(arp_packet::new_unchecked(&bytes)) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("arp: dropping packet: {}", err);
                return;
            },
        };

        let addrs = match self.addrs {
            Some(addrs) => addrs,
            None => return,
        };

        let sender = repr.source_protocol_addr;
        let sender_mac = repr.source_hardware_addr;
        if !sender_mac.is_unicast() || sender_mac == self.driver.mac_addr() {
            return;
        }

        if sender == addrs.addr {
            net_debug!("arp: {} claims our address {}", sender_mac, sender);
            return;
        }

        let for_us = repr.target_protocol_addr == addrs.addr;
        if addrs.contains(sender) && sender.is_unicast() && !addrs.is_broadcast(sender) {
            let update = self.cache.update(sender, sender_mac, true, now, &self.config);
            if let Some(update) = update {
                if update.fresh {
                    self.retry.reset_list(entry_list(update.index));
                }
                if update.resolved {
                    net_debug!("arp: {} is at {}", sender, sender_mac);
                    self.resolved(update.index, sender_mac);
                }
            }
        }

        if repr.operation == ArpOperation::Request && for_us {
            self.send_arp(sender_mac, ArpRepr {
                operation: ArpOperation::Reply,
                source_hardware_addr: self.driver.mac_addr(),
                source_protocol_addr: addrs.addr,
                target_hardware_addr: sender_mac,
                target_protocol_addr: sender,
            });
        }
    }

    /// An entry became usable, wake up its waiting senders.
    fn resolved(&mut self, index: usize, hardware_addr: EthernetAddress) {
        self.retry.dispatch(entry_list(index));

        let held = self.cache.entry(index).held;
        if held == 0 {
            return;
        }
        self.cache.entry_mut(index).held = 0;

        let start = index * self.hold_len;
        let frame = &mut self.hold[start..start + held];
        EthernetRepr {
            src_addr: self.driver.mac_addr(),
            dst_addr: hardware_addr,
            ethertype: EthernetProtocol::Ipv4,
        }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));

        if let Err(err) = self.driver.send_frame(Buf::flat(frame)) {
            net_debug!("eth: dropping parked packet: {}", err);
        }
    }

    /// Keep a copy of a packet until its next hop is resolved.
    fn park(&mut self, packet: Buf, next_hop: Ipv4Address) {
        let index = match self.cache.find(next_hop) {
            Some(index) => index,
            None => return,
        };

        let held = ETHERNET_HEADER_LEN + packet.len();
        if held > self.hold_len {
            net_debug!("eth: packet of {} bytes too large to park", packet.len());
            return;
        }

        let start = index * self.hold_len;
        let slot = &mut self.hold[start..start + held];
        packet.copy_out(&mut slot[ETHERNET_HEADER_LEN..]);
        self.cache.entry_mut(index).held = held;
    }

    fn register(&mut self, list: ListId, retry: Option<RequestId>) {
        if let Some(request) = retry {
            self.retry.add_request(list, request);
        }
    }

    fn send_request(&mut self, request: arp::Request) {
        let addrs = match self.addrs {
            Some(addrs) => addrs,
            None => return,
        };

        let (dst_addr, target) = match request {
            arp::Request::Broadcast(target) => (EthernetAddress::BROADCAST, target),
            arp::Request::Unicast(target, hardware_addr) => (hardware_addr, target),
        };

        self.send_arp(dst_addr, ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: self.driver.mac_addr(),
            source_protocol_addr: addrs.addr,
            target_hardware_addr: EthernetAddress::ZERO,
            target_protocol_addr: target,
        });
    }

    fn send_arp(&mut self, dst_addr: EthernetAddress, repr: ArpRepr) {
        let mut frame = [0; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
        EthernetRepr {
            src_addr: self.driver.mac_addr(),
            dst_addr,
            ethertype: EthernetProtocol::Arp,
        }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));
        repr.emit(arp_packet::new_unchecked_mut(&mut frame[ETHERNET_HEADER_LEN..]));

        // A lost request is sent again by the entry timer.
        if let Err(err) = self.driver.send_frame(Buf::flat(&frame)) {
            net_debug!("arp: send failed: {}", err);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            query_attempts: 3,
            refresh_attempts: 2,
            response_timeout: Duration::from_secs(1),
            valid_time: Duration::from_secs(60),
            protect_count: 8,
        }
    }
}
