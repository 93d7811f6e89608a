use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        Icmp      = 0x01,
        Tcp       = 0x06,
        Udp       = 0x11,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp        => write!(f, "ICMP"),
            Protocol::Tcp         => write!(f, "TCP"),
            Protocol::Udp         => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id),
        }
    }
}

/// The time-to-live and protocol of a datagram, packed as in the IPv4 header.
///
/// The high byte is the TTL and the low byte the protocol number, which are exactly the bytes
/// `8..10` of the header read as a big endian word. Senders pass this pair down to the IP layer
/// instead of a full header representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TtlProto(pub u16);

impl TtlProto {
    /// Pack a TTL and a protocol.
    pub fn new(ttl: u8, protocol: Protocol) -> Self {
        TtlProto(u16::from(ttl) << 8 | u16::from(u8::from(protocol)))
    }

    /// The time-to-live.
    pub fn ttl(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The encapsulated protocol.
    pub fn protocol(self) -> Protocol {
        Protocol::from(self.0 as u8)
    }
}

impl fmt::Display for TtlProto {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ttl={}", self.protocol(), self.ttl())
    }
}

/// The Internet checksum of RFC 1071.
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::Protocol;
    use crate::buf::Buf;
    use crate::wire::Ipv4Address;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// The one's complement sum of a byte slice, without the final complement.
    ///
    /// An odd trailing byte is padded with zero.
    pub fn data(bytes: &[u8]) -> u16 {
        let mut words = bytes.chunks_exact(2);
        let mut accum: u32 = 0;
        for (idx, word) in (&mut words).enumerate() {
            accum += u32::from(NetworkEndian::read_u16(word));
            // Fold before the accumulator can overflow.
            if idx & 0x7fff == 0x7fff {
                accum = propagate_carries(accum).into();
            }
        }
        if let Some(&high) = words.remainder().first() {
            accum += u32::from(high) << 8;
        }
        propagate_carries(accum)
    }

    /// Add up partial sums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let accum: u32 = checksums.iter().map(|&sum| u32::from(sum)).sum();
        propagate_carries(accum)
    }

    /// The sum of the IPv4 pseudo header of a transport segment.
    pub fn pseudo_header(
        src_addr: Ipv4Address,
        dst_addr: Ipv4Address,
        protocol: Protocol,
        length: u16,
    ) -> u16 {
        let mut header = [0u8; 12];
        header[..4].copy_from_slice(&src_addr.0);
        header[4..8].copy_from_slice(&dst_addr.0);
        header[9] = protocol.into();
        NetworkEndian::write_u16(&mut header[10..], length);
        data(&header)
    }

    /// Compute the checksum (without the final complement) of a segment chain.
    ///
    /// The result depends only on the bytes and not on how they are split into segments. A
    /// segment of odd length leaves its last byte as the high half of a word that the next
    /// segment completes.
    pub fn chain(buf: Buf) -> u16 {
        let mut accum: u32 = 0;
        let mut pending_low = false;
        for mut chunk in buf.chunks() {
            if pending_low {
                match chunk.split_first() {
                    Some((&low, rest)) => {
                        accum += u32::from(low);
                        chunk = rest;
                        pending_low = false;
                    },
                    None => continue,
                }
            }

            let even = chunk.len() & !1;
            accum += u32::from(data(&chunk[..even]));
            if let Some(&high) = chunk.get(even) {
                accum += u32::from(high) << 8;
                pending_low = true;
            }
            accum = propagate_carries(accum).into();
        }
        propagate_carries(accum)
    }
}
