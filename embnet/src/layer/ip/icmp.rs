//! The ICMP handling of the IP layer, see RFC 792 and RFC 1122.
//!
//! Only two messages are answered or generated. Echo requests to our unicast address get a reply
//! with the same data, and upper layers can report a datagram that was too large. An incoming
//! report of the latter kind lowers the path MTU. No error message is ever sent in response to
//! another error message.
use crate::buf::{Buf, BufRef, Pool};
use crate::layer::IpErr;
use crate::nic::Driver;
use crate::time::Instant;
use crate::wire::{
    icmpv4,
    icmpv4_packet,
    ipv4_packet,
    Icmpv4DstUnreachable,
    Icmpv4Message,
    Icmpv4Repr,
    IpProtocol,
    Ipv4Address,
    Ipv4Repr,
    TtlProto,
    IPV4_MAX_HEADER_LEN,
};
use crate::wire::ip::checksum;

use super::{Config, Ip4Dgram, Output, PmtuCache, SendFlags, HEADROOM};

impl<'a, D: Driver> Output<'a, D> {
    /// Handle a received ICMP message.
    ///
    /// Returns the remote host and new path MTU if a report lowered it.
    pub(super) fn recv_icmp(
        &mut self,
        pmtu: &mut PmtuCache,
        dgram: &Ip4Dgram,
        tx: &mut Pool,
        config: &Config,
        now: Instant,
    ) -> Option<(Ipv4Address, usize)> {
        let addrs = self.eth.addrs()?;
        let repr = match Icmpv4Repr::parse(dgram.payload) {
            Ok(repr) => repr,
            Err(err) => {
                net_debug!("icmp: dropping message from {}: {}", dgram.src_addr, err);
                return None;
            },
        };

        net_trace!("icmp: {} from {}", repr, dgram.src_addr);
        match repr {
            Icmpv4Repr::EchoRequest { .. } => {
                // Broadcast pings are not answered.
                if dgram.dst_addr != addrs.addr {
                    return None;
                }

                let reply = repr.echo_reply()?;
                let data = dgram.payload.sub_from(icmpv4::HEADER_LEN);
                if let Err(err) = self.send_icmp(tx, dgram.src_addr, reply, data, config.ttl, now) {
                    net_debug!("icmp: echo reply to {} failed: {}", dgram.src_addr, err);
                }
                None
            },
            Icmpv4Repr::DstUnreachable {
                reason: Icmpv4DstUnreachable::FragRequired,
                next_hop_mtu,
                header,
            } => {
                // The quoted header is of a datagram we sent.
                if header.src_addr != addrs.addr {
                    return None;
                }

                let remote = header.dst_addr;
                pmtu.lower(remote, next_hop_mtu, self.eth.mtu(), now, config)
                    .map(|mtu| (remote, mtu))
            },
            _ => None,
        }
    }

    /// Send a fragmentation needed error about a datagram.
    pub(super) fn send_frag_needed(
        &mut self,
        pool: &mut Pool,
        datagram: Buf,
        mtu: u16,
        config: &Config,
        now: Instant,
    ) -> Result<(), IpErr> {
        let mut bytes = [0; IPV4_MAX_HEADER_LEN];
        let copied = datagram.copy_out(&mut bytes);
        let parsed = ipv4_packet::new_checked(&bytes[..copied])
            .and_then(|ip| Ipv4Repr::parse(ip, datagram.len()));
        let (header, header_len) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                net_debug!("icmp: not reporting malformed datagram: {}", err);
                return Ok(());
            },
        };

        if !self.warrants_error(&header, datagram.sub_from(header_len)) {
            return Ok(());
        }

        let repr = Icmpv4Repr::DstUnreachable {
            reason: Icmpv4DstUnreachable::FragRequired,
            next_hop_mtu: mtu,
            header,
        };
        let quote = icmpv4::quote_len(header_len, header_len + header.payload_len);
        self.send_icmp(pool, header.src_addr, repr, datagram.sub_to(quote), config.ttl, now)
    }

    /// Decide if an error message about a datagram may be sent, see RFC 1122 3.2.2.
    fn warrants_error(&self, header: &Ipv4Repr, payload: Buf) -> bool {
        let addrs = match self.eth.addrs() {
            Some(addrs) => addrs,
            None => return false,
        };

        if !header.src_addr.is_unicast() || addrs.is_broadcast(header.src_addr) {
            return false;
        }

        if header.dst_addr.is_multicast() || addrs.is_broadcast(header.dst_addr) {
            return false;
        }

        if header.frag_offset != 0 {
            return false;
        }

        if header.ttl_proto.protocol() == IpProtocol::Icmp {
            if payload.is_empty() {
                return false;
            }
            match Icmpv4Message::from(payload.at(0)) {
                Icmpv4Message::EchoRequest | Icmpv4Message::EchoReply => (),
                _ => return false,
            }
        }

        true
    }

    /// Build an ICMP message in the pool and send it.
    ///
    /// The message is released before returning, an unresolved destination keeps a copy of it
    /// in the eth layer.
    fn send_icmp(
        &mut self,
        pool: &mut Pool,
        dst_addr: Ipv4Address,
        repr: Icmpv4Repr,
        data: Buf,
        ttl: u8,
        now: Instant,
    ) -> Result<(), IpErr> {
        let mark = pool.mark();
        let sent = self.emit_icmp(pool, dst_addr, repr, data, ttl, now);
        pool.release(mark);
        sent
    }

    fn emit_icmp(
        &mut self,
        pool: &mut Pool,
        dst_addr: Ipv4Address,
        repr: Icmpv4Repr,
        data: Buf,
        ttl: u8,
        now: Instant,
    ) -> Result<(), IpErr> {
        let message = pool.alloc(HEADROOM, repr.buffer_len() + data.len())
            .ok_or(IpErr::BufferFull)?;

        {
            let header = pool.header_mut(message, repr.buffer_len())
                .ok_or(IpErr::NoHeaderSpace)?;
            repr.emit(icmpv4_packet::new_unchecked_mut(header));
        }
        copy_chain(pool, message.sub_from(repr.buffer_len()), data);

        let checksum = !checksum::chain(pool.buf(message));
        {
            let header = pool.header_mut(message, repr.buffer_len())
                .ok_or(IpErr::NoHeaderSpace)?;
            icmpv4_packet::new_unchecked_mut(header).set_checksum(checksum);
        }

        let ttl_proto = TtlProto::new(ttl, IpProtocol::Icmp);
        self.send_dgram(pool, message, dst_addr, ttl_proto, SendFlags::default(), None, now)
    }
}

/// Copy all bytes of a chain to the front of pool memory.
fn copy_chain(pool: &mut Pool, target: BufRef, data: Buf) {
    let mut offset = 0;
    for chunk in data.chunks() {
        offset += pool.copy_in(target.sub_from(offset), chunk);
    }
}
