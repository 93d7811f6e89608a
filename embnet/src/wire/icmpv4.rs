use core::{cmp, fmt};
use byteorder::{ByteOrder, NetworkEndian};

use crate::buf::Buf;
use super::{Error, Result};
use super::ip::checksum;
use super::{Ipv4Repr, ipv4_packet};

enum_with_unknown! {
    /// The type of a control message.
    ///
    /// Only echo and destination unreachable messages are understood by the stack.
    pub doc enum Message(u8) {
        /// Answer to an echo request.
        EchoReply      =  0,
        /// A datagram could not be delivered.
        DstUnreachable =  3,
        /// Route redirection.
        Redirect       =  5,
        /// Ping.
        EchoRequest    =  8,
        /// The time to live of a datagram ran out.
        TimeExceeded   = 11,
        /// A header could not be processed.
        ParamProblem   = 12,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Message::EchoReply => "echo reply",
            Message::DstUnreachable => "destination unreachable",
            Message::Redirect => "redirect",
            Message::EchoRequest => "echo request",
            Message::TimeExceeded => "time exceeded",
            Message::ParamProblem => "parameter problem",
            Message::Unknown(id) => return write!(f, "type {}", id),
        };
        f.write_str(name)
    }
}

enum_with_unknown! {
    /// The code of a destination unreachable message.
    pub doc enum DstUnreachable(u8) {
        /// The network can not be reached.
        NetUnreachable   =  0,
        /// The host can not be reached.
        HostUnreachable  =  1,
        /// The transport protocol is not served by the host.
        ProtoUnreachable =  2,
        /// No one listens on the port.
        PortUnreachable  =  3,
        /// The datagram was too large for a link but must not be fragmented.
        FragRequired     =  4,
    }
}

impl fmt::Display for DstUnreachable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DstUnreachable::NetUnreachable => "network unreachable",
            DstUnreachable::HostUnreachable => "host unreachable",
            DstUnreachable::ProtoUnreachable => "protocol unreachable",
            DstUnreachable::PortUnreachable => "port unreachable",
            DstUnreachable::FragRequired => "fragmentation needed",
            DstUnreachable::Unknown(code) => return write!(f, "code {}", code),
        };
        f.write_str(name)
    }
}

byte_wrapper! {
    /// A byte sequence representing an ICMPv4 message, header and payload.
    #[derive(Debug, PartialEq, Eq)]
    pub struct icmpv4([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const TYPE:       usize = 0;
    pub(crate) const CODE:       usize = 1;
    pub(crate) const CHECKSUM:   Field = 2..4;

    pub(crate) const UNUSED:     Field = 4..8;

    pub(crate) const ECHO_IDENT: Field = 4..6;
    pub(crate) const ECHO_SEQNO: Field = 6..8;

    pub(crate) const NEXT_HOP_MTU: Field = 6..8;

    pub(crate) const HEADER_END: usize = 8;
}

/// The length of the ICMPv4 header.
pub const HEADER_LEN: usize = field::HEADER_END;

/// The number of datagram payload bytes quoted by error messages.
pub const QUOTE_LEN: usize = 8;

impl icmpv4 {
    /// Imbue a raw octet buffer with ICMPv4 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &icmpv4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with ICMPv4 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut icmpv4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Like `new_unchecked`, but fails if the header does not fit.
    pub fn new_checked(data: &[u8]) -> Result<&icmpv4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `Err(Error::Truncated)` if the eight header bytes are not all present.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::HEADER_END {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn msg_type(&self) -> Message {
        Message::from(self.0[field::TYPE])
    }

    #[inline]
    pub fn msg_code(&self) -> u8 {
        self.0[field::CODE]
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Echo messages only.
    #[inline]
    pub fn echo_ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_IDENT])
    }

    #[inline]
    pub fn echo_seq_no(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::ECHO_SEQNO])
    }

    /// Return the next-hop MTU of a "fragmentation required" message, see RFC 1191.
    ///
    /// Zero if the router predates RFC 1191.
    #[inline]
    pub fn next_hop_mtu(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::NEXT_HOP_MTU])
    }

    /// Validate the checksum over the whole buffer, which must be exactly the message.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(self.as_bytes()) == !0
    }

    #[inline]
    pub fn set_msg_type(&mut self, value: Message) {
        self.0[field::TYPE] = value.into();
    }

    #[inline]
    pub fn set_msg_code(&mut self, value: u8) {
        self.0[field::CODE] = value;
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value);
    }

    #[inline]
    pub fn set_echo_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::ECHO_IDENT], value);
    }

    #[inline]
    pub fn set_echo_seq_no(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::ECHO_SEQNO], value);
    }

    /// Set the unused field of error messages to zero.
    #[inline]
    pub fn clear_unused(&mut self) {
        NetworkEndian::write_u32(&mut self.0[field::UNUSED], 0);
    }

    /// Set the next-hop MTU of a "fragmentation required" message.
    #[inline]
    pub fn set_next_hop_mtu(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::NEXT_HOP_MTU], value);
    }

    /// Compute and fill in the checksum, assuming the buffer holds the complete message.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = !checksum::data(&self.0);
        self.set_checksum(checksum);
    }

    /// The bytes after the header, which is everything when the message is contiguous.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::HEADER_END..]
    }
}

impl AsRef<[u8]> for icmpv4 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an Internet Control Message Protocol version 4 header.
///
/// The payload of echo messages and the quoted datagram of error messages are not part of the
/// representation, they follow the header in the same buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr {
    EchoRequest {
        ident:  u16,
        seq_no: u16,
    },
    EchoReply {
        ident:  u16,
        seq_no: u16,
    },
    DstUnreachable {
        reason: DstUnreachable,
        /// Only meaningful for `FragRequired`.
        next_hop_mtu: u16,
        /// The header of the datagram that caused the error.
        header: Ipv4Repr,
    },
}

impl Repr {
    /// Get the echo reply request if this is an echo request.
    pub fn echo_reply(self) -> Option<Repr> {
        match self {
            Repr::EchoRequest { ident, seq_no, } =>
                Some(Repr::EchoReply { ident, seq_no, }),
            _ => None,
        }
    }

    /// Check if this is an error message.
    ///
    /// No error messages are ever sent in response to these.
    pub fn is_error(&self) -> bool {
        match self {
            Repr::DstUnreachable { .. } => true,
            _ => false,
        }
    }

    /// Parse a complete Internet Control Message Protocol version 4 message.
    ///
    /// The checksum is verified across all segments of the message.
    pub fn parse(message: Buf) -> Result<Repr> {
        let mut bytes = [0; HEADER_LEN + super::ipv4::MAX_HEADER_LEN + QUOTE_LEN];
        let copied = message.copy_out(&mut bytes);
        let packet = icmpv4::new_checked(&bytes[..copied])?;

        // Valid checksum is expected.
        if !cfg!(fuzzing) && checksum::chain(message) != !0 {
            return Err(Error::WrongChecksum)
        }

        match (packet.msg_type(), packet.msg_code()) {
            (Message::EchoRequest, 0) => {
                Ok(Repr::EchoRequest {
                    ident:  packet.echo_ident(),
                    seq_no: packet.echo_seq_no(),
                })
            },

            (Message::EchoReply, 0) => {
                Ok(Repr::EchoReply {
                    ident:  packet.echo_ident(),
                    seq_no: packet.echo_seq_no(),
                })
            },

            (Message::DstUnreachable, code) => {
                let quote = packet.payload_slice();
                let header = Self::parse_quote(quote)?;
                Ok(Repr::DstUnreachable {
                    reason: DstUnreachable::from(code),
                    next_hop_mtu: packet.next_hop_mtu(),
                    header,
                })
            }

            // Unknown types are not as specified in the standard and iana registry.
            (Message::Unknown(_), _) => Err(Error::Unrecognized),
            // Others are just not supported.
            _ => Err(Error::Unsupported),
        }
    }

    /// Parse the datagram header quoted by an error message.
    ///
    /// Its total length refers to the original datagram of which only a part is quoted.
    fn parse_quote(quote: &[u8]) -> Result<Ipv4Repr> {
        let ip_packet = ipv4_packet::new_checked(quote)?;
        if ip_packet.version() != 4 { return Err(Error::Malformed) }
        if !ip_packet.verify_checksum() { return Err(Error::WrongChecksum) }

        let header_len = usize::from(ip_packet.header_len());
        // RFC 792 requires exactly eight bytes to be returned.
        // We allow more, since there isn't a reason not to, but require at least eight.
        if quote.len() < header_len + QUOTE_LEN { return Err(Error::Truncated) }

        Ok(Ipv4Repr {
            src_addr: ip_packet.src_addr(),
            dst_addr: ip_packet.dst_addr(),
            ttl_proto: ip_packet.ttl_proto(),
            ident: ip_packet.ident(),
            dont_frag: ip_packet.dont_frag(),
            more_frags: ip_packet.more_frags(),
            frag_offset: ip_packet.frag_offset(),
            payload_len: usize::from(ip_packet.total_len()).saturating_sub(header_len),
        })
    }

    /// Return the length of the header that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        field::HEADER_END
    }

    /// Emit the header of a high-level representation.
    ///
    /// The checksum field is zeroed. It covers the payload and must be filled in afterwards, for
    /// example with [`checksum::chain`] over the complete message.
    ///
    /// [`checksum::chain`]: ../ip/checksum/fn.chain.html
    pub fn emit(&self, packet: &mut icmpv4) {
        packet.set_msg_code(0);
        match *self {
            Repr::EchoRequest { ident, seq_no } => {
                packet.set_msg_type(Message::EchoRequest);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
            },

            Repr::EchoReply { ident, seq_no } => {
                packet.set_msg_type(Message::EchoReply);
                packet.set_echo_ident(ident);
                packet.set_echo_seq_no(seq_no);
            },

            Repr::DstUnreachable { reason, next_hop_mtu, .. } => {
                packet.set_msg_type(Message::DstUnreachable);
                packet.set_msg_code(reason.into());
                packet.clear_unused();
                if reason == DstUnreachable::FragRequired {
                    packet.set_next_hop_mtu(next_hop_mtu);
                }
            },
        }

        packet.set_checksum(0);
    }
}

/// The number of bytes of a datagram that an error message quotes.
///
/// This is its header and at most eight bytes of its payload.
pub fn quote_len(header_len: usize, datagram_len: usize) -> usize {
    cmp::min(datagram_len, header_len + QUOTE_LEN)
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Repr::EchoRequest { ident, seq_no } =>
                write!(f, "ICMPv4 echo request id={} seq={}",
                       ident, seq_no),
            &Repr::EchoReply { ident, seq_no } =>
                write!(f, "ICMPv4 echo reply id={} seq={}",
                       ident, seq_no),
            &Repr::DstUnreachable { reason, next_hop_mtu, header } =>
                write!(f, "ICMPv4 destination unreachable ({}) mtu={} about {}",
                       reason, next_hop_mtu, header),
        }
    }
}
