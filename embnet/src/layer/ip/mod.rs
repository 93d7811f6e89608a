//! The IP layer.
//!
//! Validates and routes datagrams of the single IPv4 interface. The layer owns the [`Eth`] layer
//! below it, the reassembly of incoming fragments and the path MTU cache used by TCP.
//!
//! ## Structure
//!
//! The interface is configured with an address and prefix length, see [`Ip4Addrs`]. Destinations
//! on that network are sent directly to their hardware address and broadcasts to the broadcast
//! hardware address. There is no gateway, every other destination is unroutable.
//!
//! ## Receiving packets
//!
//! Malformed packets and packets not addressed to the interface are dropped without any answer.
//! Fragments are collected in one of a fixed number of reassembly slots until the datagram is
//! complete. ICMP is handled in the layer itself: echo requests are answered and reports of a
//! too small path MTU update the cache. Everything else is returned to the caller as a
//! [`Delivery`].
//!
//! ## Transmitting packets
//!
//! A sender allocates its payload with [`HEADROOM`] bytes in front. The IPv4 header is written
//! into that space, and so is the ethernet header afterwards. Datagrams that exceed the MTU of the
//! link are fragmented unless the sender forbids it. Fragmentation does not copy the payload: each
//! fragment is a new chain of two segments, the header followed by a part of the payload, built
//! from descriptors that are released again as soon as the fragment has been handed to the
//! driver.
//!
//! [`Eth`]: ../eth/struct.Eth.html
//! [`Ip4Addrs`]: struct.Ip4Addrs.html
//! [`Delivery`]: enum.Delivery.html
//! [`HEADROOM`]: constant.HEADROOM.html
use core::cmp;

use crate::buf::{Buf, BufRef, Pool};
use crate::managed::Slice;
use crate::nic::{Driver, LinkState};
use crate::retry::RequestId;
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{
    ipv4_packet,
    EthernetAddress,
    IpProtocol,
    Ipv4Address,
    Ipv4Repr,
    TtlProto,
    ETHERNET_HEADER_LEN,
    IPV4_HEADER_LEN,
    IPV4_MAX_HEADER_LEN,
};

use super::IpErr;
use super::eth::Eth;

mod icmp;
mod pmtu;
mod reassembly;
mod route;
#[cfg(test)]
mod tests;

pub use self::pmtu::{PmtuCache, PmtuEntry};
pub use self::reassembly::{Reassembly, Slot as ReassemblySlot};
pub use self::route::Ip4Addrs;

/// The space a sender must reserve in front of its payload for all headers.
pub const HEADROOM: usize = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN;

/// The number of disjoint ranges a datagram under reassembly may consist of.
pub const MAX_HOLES: usize = 10;

/// The largest datagram including its header.
const MAX_DATAGRAM_LEN: usize = 65535;

/// Protocol constants of the IP layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// The time to live of datagrams originating in the layer itself.
    pub ttl: u8,
    /// The longest time to wait for the fragments of a datagram.
    ///
    /// A datagram is also dropped once its TTL, read as seconds, has passed.
    pub reassembly_timeout: Duration,
    /// The time after which a lowered path MTU is raised to the interface MTU again.
    pub pmtu_timeout: Duration,
    /// A path MTU is never lowered below this.
    pub min_mtu: usize,
}

/// Caller supplied memory of the layer.
pub struct Storage<'a> {
    /// One slot per datagram that can be reassembled at the same time.
    pub reassembly: Slice<'a, ReassemblySlot>,
    /// Memory for reassembled datagrams, split evenly between the slots.
    pub reassembly_buffer: Slice<'a, u8>,
    /// The path MTU entries, one per remote host that TCP connections can talk to.
    pub pmtu: Slice<'a, PmtuEntry>,
}

/// Options for sending a datagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SendFlags {
    /// Fail with `FragNeeded` instead of fragmenting, and set the flag in the header.
    pub dont_fragment: bool,
}

/// A received datagram.
#[derive(Clone, Copy, Debug)]
pub struct Ip4Dgram<'r> {
    /// The sender.
    pub src_addr: Ipv4Address,
    /// Our address or a broadcast address.
    pub dst_addr: Ipv4Address,
    /// The received TTL and the protocol of the payload.
    pub ttl_proto: TtlProto,
    /// The complete payload, reassembled if necessary.
    pub payload: Buf<'r>,
}

/// The outcome of receiving a frame that concerns upper layers.
#[derive(Clone, Copy, Debug)]
pub enum Delivery<'r> {
    /// A datagram for a transport protocol.
    Dgram(Ip4Dgram<'r>),
    /// The path MTU towards a remote host was lowered.
    PmtuLowered {
        /// The remote host.
        remote: Ipv4Address,
        /// The new path MTU.
        mtu: usize,
    },
}

/// The IPv4 layer with the interface below it.
pub struct Ip<'a, D> {
    out: Output<'a, D>,
    reassembly: Reassembly<'a>,
    pmtu: PmtuCache<'a>,
    config: Config,
}

/// The sending half of the layer.
///
/// Kept apart so that answers can be sent while a received datagram still borrows the reassembly
/// memory.
struct Output<'a, D> {
    eth: Eth<'a, D>,
    next_ident: u16,
}

impl<'a, D: Driver> Ip<'a, D> {
    /// Create the layer on top of an ethernet layer.
    pub fn new(eth: Eth<'a, D>, storage: Storage<'a>, config: Config) -> Self {
        let Storage { reassembly, reassembly_buffer, pmtu } = storage;
        Ip {
            out: Output {
                eth,
                next_ident: 0,
            },
            reassembly: Reassembly::new(reassembly, reassembly_buffer),
            pmtu: PmtuCache::new(pmtu),
            config,
        }
    }

    /// Access the ethernet layer.
    pub fn eth(&self) -> &Eth<'a, D> {
        &self.out.eth
    }

    /// Mutable access to the ethernet layer.
    pub fn eth_mut(&mut self) -> &mut Eth<'a, D> {
        &mut self.out.eth
    }

    /// The configuration of the layer.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inspect the reassembly.
    pub fn reassembly(&self) -> &Reassembly<'a> {
        &self.reassembly
    }

    /// Configure the interface address and prefix length, or remove it.
    ///
    /// A change forgets all hardware addresses, partial datagrams and path MTU estimates.
    pub fn set_ip4_addrs(&mut self, addrs: Option<(Ipv4Address, u8)>) {
        let addrs = addrs.map(|(addr, prefix)| Ip4Addrs::new(addr, prefix));
        if addrs == self.out.eth.addrs() {
            return;
        }

        match addrs {
            Some(addrs) => net_debug!("ip: interface address {}", addrs),
            None => net_debug!("ip: interface address removed"),
        }
        self.out.eth.set_addrs(addrs);
        self.reassembly.clear();
        self.pmtu.reset(self.out.eth.mtu());
    }

    /// The interface configuration.
    pub fn ip4_addrs(&self) -> Option<Ip4Addrs> {
        self.out.eth.addrs()
    }

    /// The MTU of the interface.
    pub fn mtu(&self) -> usize {
        self.out.eth.mtu()
    }

    /// Reference the path MTU entry of a remote host.
    pub fn pmtu_acquire(&mut self, remote: Ipv4Address) -> Result<(), IpErr> {
        let mtu = self.out.eth.mtu();
        self.pmtu.acquire(remote, mtu)
    }

    /// Drop a reference taken with `pmtu_acquire`.
    pub fn pmtu_release(&mut self, remote: Ipv4Address) {
        self.pmtu.release(remote)
    }

    /// The path MTU towards a remote host.
    ///
    /// This is the interface MTU for hosts without a referenced entry.
    pub fn pmtu(&self, remote: Ipv4Address) -> usize {
        let mtu = self.out.eth.mtu();
        self.pmtu.get(remote).map_or(mtu, |pmtu| cmp::min(pmtu, mtu))
    }

    /// Check the link state of the driver.
    pub fn link_changed(&mut self) -> LinkState {
        self.out.eth.link_changed()
    }

    /// The driver can accept frames again.
    pub fn tx_ready(&mut self) {
        self.out.eth.tx_ready()
    }

    /// Send a datagram.
    ///
    /// The payload must be preceded by `HEADROOM` reserved bytes. Descriptors for fragments are
    /// pushed into `pool` and released before returning. Errors that are retried register `retry`
    /// with the eth layer.
    pub fn send_dgram(
        &mut self,
        pool: &mut Pool,
        payload: BufRef,
        dst_addr: Ipv4Address,
        ttl_proto: TtlProto,
        flags: SendFlags,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        self.out.send_dgram(pool, payload, dst_addr, ttl_proto, flags, retry, now)
    }

    /// Report to the sender of a datagram that it must be fragmented to fit `mtu`.
    ///
    /// `datagram` starts with the IPv4 header of the offending datagram. Nothing is sent for
    /// datagrams that do not warrant an error message, such as other ICMP errors or fragments
    /// after the first.
    pub fn send_frag_needed(&mut self, pool: &mut Pool, datagram: Buf, mtu: u16, now: Instant)
        -> Result<(), IpErr>
    {
        self.out.send_frag_needed(pool, datagram, mtu, &self.config, now)
    }

    /// Process a received frame.
    ///
    /// Answers to ICMP messages are allocated in `tx`.
    pub fn recv<'r>(&'r mut self, frame: Buf<'r>, tx: &mut Pool, now: Instant)
        -> Option<Delivery<'r>>
    {
        let Ip { out, reassembly, pmtu, config } = self;
        let packet = out.eth.recv_frame(frame, now)?.payload;
        let addrs = out.eth.addrs()?;

        let mut header = [0; IPV4_MAX_HEADER_LEN];
        let copied = packet.copy_out(&mut header);
        let parsed = ipv4_packet::new_checked(&header[..copied])
            .and_then(|ip| Ipv4Repr::parse(ip, packet.len()));
        let (repr, header_len) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                net_debug!("ip: dropping packet: {}", err);
                return None;
            },
        };

        if !addrs.accepts(repr.dst_addr) {
            net_trace!("ip: not for us: {}", repr);
            return None;
        }

        if !repr.src_addr.is_unicast() || addrs.is_broadcast(repr.src_addr) {
            net_debug!("ip: invalid source: {}", repr);
            return None;
        }

        net_trace!("ip: {}", repr);
        let payload = packet.range(header_len, repr.payload_len);
        let (ttl_proto, payload) = if repr.is_fragment() {
            let complete = reassembly.add(&repr, payload, now, config)?;
            (complete.ttl_proto, complete.payload)
        } else {
            (repr.ttl_proto, payload)
        };

        let dgram = Ip4Dgram {
            src_addr: repr.src_addr,
            dst_addr: repr.dst_addr,
            ttl_proto,
            payload,
        };

        if ttl_proto.protocol() == IpProtocol::Icmp {
            return out.recv_icmp(pmtu, &dgram, tx, config, now)
                .map(|(remote, mtu)| Delivery::PmtuLowered { remote, mtu });
        }

        Some(Delivery::Dgram(dgram))
    }

    /// Handle all timeouts of the layer and the eth layer.
    pub fn poll(&mut self, now: Instant) {
        self.out.eth.poll(now);
        self.reassembly.poll(now);
        self.pmtu.poll(now, self.out.eth.mtu());
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.out.eth.next_deadline()
            .min(self.reassembly.next_deadline())
            .min(self.pmtu.next_deadline())
    }
}

impl<'a, D: Driver> Output<'a, D> {
    fn send_dgram(
        &mut self,
        pool: &mut Pool,
        payload: BufRef,
        dst_addr: Ipv4Address,
        ttl_proto: TtlProto,
        flags: SendFlags,
        retry: Option<RequestId>,
        now: Instant,
    ) -> Result<(), IpErr> {
        let addrs = self.eth.addrs().ok_or(IpErr::NoIpRoute)?;
        let next_hop = addrs.next_hop(dst_addr).ok_or(IpErr::NoIpRoute)?;

        let total_len = IPV4_HEADER_LEN + payload.len;
        if total_len > MAX_DATAGRAM_LEN {
            return Err(IpErr::PktTooLarge);
        }

        let mtu = self.eth.mtu();
        if total_len > mtu && flags.dont_fragment {
            return Err(IpErr::FragNeeded);
        }

        let repr = Ipv4Repr {
            src_addr: addrs.addr,
            dst_addr,
            ttl_proto,
            ident: self.next_ident,
            dont_frag: flags.dont_fragment,
            more_frags: false,
            frag_offset: 0,
            payload_len: payload.len,
        };
        self.next_ident = self.next_ident.wrapping_add(1);

        let packet = payload.reveal_header(IPV4_HEADER_LEN)
            .ok_or(IpErr::NoHeaderSpace)?;
        if total_len <= mtu {
            let header = pool.header_mut(packet, IPV4_HEADER_LEN)
                .ok_or(IpErr::NoHeaderSpace)?;
            repr.emit(ipv4_packet::new_unchecked_mut(header));
            return self.eth.send_ip4(pool, packet, next_hop, retry, now);
        }

        // Fragment offsets count in units of eight bytes.
        let frag_len = (mtu.saturating_sub(IPV4_HEADER_LEN)) & !7;
        if frag_len == 0 {
            return Err(IpErr::PktTooLarge);
        }

        let hardware_addr = self.eth.resolve(next_hop, retry, now)?;
        let header = packet.sub_to(IPV4_HEADER_LEN);
        let mut offset = 0;
        while offset < payload.len {
            let len = cmp::min(frag_len, payload.len - offset);
            let fragment = Ipv4Repr {
                more_frags: offset + len < payload.len,
                frag_offset: offset as u16,
                payload_len: len,
                ..repr
            };

            net_trace!("ip: sending fragment {}", fragment);
            let mark = pool.mark();
            let sent = self.send_fragment(pool, header, payload, fragment, hardware_addr, retry);
            pool.release(mark);
            sent?;
            offset += len;
        }

        Ok(())
    }

    /// Chain the shared header to a part of the payload and send it.
    fn send_fragment(
        &mut self,
        pool: &mut Pool,
        header: BufRef,
        payload: BufRef,
        repr: Ipv4Repr,
        hardware_addr: EthernetAddress,
        retry: Option<RequestId>,
    ) -> Result<(), IpErr> {
        let offset = usize::from(repr.frag_offset);
        let part = pool.split_off(payload, offset)
            .ok_or(IpErr::BufferFull)?
            .sub_to(repr.payload_len);
        let packet = pool.chain(header, part)
            .ok_or(IpErr::BufferFull)?;
        let bytes = pool.header_mut(packet, IPV4_HEADER_LEN)
            .ok_or(IpErr::NoHeaderSpace)?;
        repr.emit(ipv4_packet::new_unchecked_mut(bytes));
        self.eth.send_to(pool, packet, hardware_addr, retry)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ttl: 64,
            reassembly_timeout: Duration::from_secs(60),
            pmtu_timeout: Duration::from_secs(10 * 60),
            min_mtu: 256,
        }
    }
}
