use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};
use super::ip::{checksum, TtlProto};

/// Minimum MTU required of all links supporting IPv4. See [RFC 791 § 3.1].
///
/// [RFC 791 § 3.1]: https://tools.ietf.org/html/rfc791#section-3.1
pub const MIN_MTU: usize = 576;

/// The length of a header without options.
pub const HEADER_LEN: usize = field::DST_ADDR.end;

/// The longest possible header, with 40 bytes of options.
pub const MAX_HEADER_LEN: usize = 60;

/// An IPv4 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 4]);

impl Address {
    /// `0.0.0.0`
    pub const UNSPECIFIED: Address = Address([0; 4]);

    /// The limited broadcast address `255.255.255.255`.
    pub const BROADCAST: Address = Address([0xff; 4]);

    pub const fn new(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address([a0, a1, a2, a3])
    }

    /// Copy an address out of four octets.
    ///
    /// # Panics
    /// When `data` is not exactly four octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut octets = [0; 4];
        octets.copy_from_slice(data);
        Address(octets)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The address as a number, the first octet being the most significant.
    pub fn to_network_integer(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_network_integer(num: u32) -> Self {
        Address(num.to_be_bytes())
    }

    /// Whether the address can name a single host.
    pub fn is_unicast(&self) -> bool {
        !self.is_broadcast() && !self.is_multicast() && !self.is_unspecified()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Address::BROADCAST
    }

    /// Whether the address is in `224.0.0.0/4`.
    pub fn is_multicast(&self) -> bool {
        self.0[0] >> 4 == 0xe
    }

    /// Whether the address is in `0.0.0.0/8`, "this network".
    pub fn is_unspecified(&self) -> bool {
        self.0[0] == 0
    }

    /// The netmask of a prefix length, lengths above 32 act as 32.
    pub fn netmask(prefix: u8) -> Address {
        let host_bits = u32::max_value().checked_shr(prefix.into()).unwrap_or(0);
        Address::from_network_integer(!host_bits)
    }

    /// Clear all bits after the first `prefix` ones.
    ///
    /// ```rust
    /// # use embnet::wire::Ipv4Address as Address;
    /// assert_eq!(Address::new(192, 168, 178, 32).mask(24), Address::new(192, 168, 178, 0));
    /// ```
    pub fn mask(&self, prefix: u8) -> Address {
        let bits = self.to_network_integer() & Address::netmask(prefix).to_network_integer();
        Address::from_network_integer(bits)
    }
}

#[cfg(feature = "std")]
impl From<::std::net::Ipv4Addr> for Address {
    fn from(addr: ::std::net::Ipv4Addr) -> Address {
        Address(addr.octets())
    }
}

#[cfg(feature = "std")]
impl From<Address> for ::std::net::Ipv4Addr {
    fn from(Address(octets): Address) -> ::std::net::Ipv4Addr {
        octets.into()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

byte_wrapper! {
    /// The header of an IPv4 packet, including options.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ipv4([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const VER_IHL:   usize = 0;
    pub(crate) const DSCP_ECN:  usize = 1;
    pub(crate) const LENGTH:    Field = 2..4;
    pub(crate) const IDENT:     Field = 4..6;
    pub(crate) const FLG_OFF:   Field = 6..8;
    pub(crate) const TTL_PROTO: Field = 8..10;
    pub(crate) const CHECKSUM:  Field = 10..12;
    pub(crate) const SRC_ADDR:  Field = 12..16;
    pub(crate) const DST_ADDR:  Field = 16..20;

    pub(crate) const FLG_DF: u16 = 0x4000;
    pub(crate) const FLG_MF: u16 = 0x2000;
    pub(crate) const OFFSET: u16 = 0x1fff;
}

impl ipv4 {
    /// Imbue a raw octet buffer with IPv4 header structure.
    pub fn new_unchecked(buffer: &[u8]) -> &ipv4 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with IPv4 header structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut ipv4 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// `new_unchecked` followed by `check_len`.
    pub fn new_checked(data: &[u8]) -> Result<&ipv4> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is shorter than the header length field
    /// claims and `Err(Error::Malformed)` if the header length field is below the minimum. The
    /// buffer only needs to hold the header; the total length is checked against the datagram by
    /// the caller, see [`Repr::parse`].
    ///
    /// [`Repr::parse`]: struct.Repr.html#method.parse
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let header_len = usize::from(self.header_len());
        if header_len < HEADER_LEN {
            Err(Error::Malformed)
        } else if len < header_len {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn version(&self) -> u8 {
        self.0[field::VER_IHL] >> 4
    }

    /// The header length in octets.
    pub fn header_len(&self) -> u8 {
        (self.0[field::VER_IHL] & 0x0f) * 4
    }

    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::IDENT])
    }

    fn flags_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::FLG_OFF])
    }

    pub fn dont_frag(&self) -> bool {
        self.flags_offset() & field::FLG_DF != 0
    }

    pub fn more_frags(&self) -> bool {
        self.flags_offset() & field::FLG_MF != 0
    }

    /// The fragment offset in octets.
    pub fn frag_offset(&self) -> u16 {
        (self.flags_offset() & field::OFFSET) << 3
    }

    pub fn ttl_proto(&self) -> TtlProto {
        TtlProto(NetworkEndian::read_u16(&self.0[field::TTL_PROTO]))
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// Validate the header checksum, options included.
    ///
    /// # Fuzzing
    /// This function always returns `true` when fuzzing.
    pub fn verify_checksum(&self) -> bool {
        if cfg!(fuzzing) { return true }

        checksum::data(self.header()) == !0
    }

    fn header(&self) -> &[u8] {
        &self.0[..usize::from(self.header_len())]
    }

    /// Set version 4 and the header length in octets.
    pub fn set_version_and_len(&mut self, header_len: u8) {
        debug_assert_eq!(header_len % 4, 0);
        self.0[field::VER_IHL] = 0x40 | (header_len / 4 & 0x0f);
    }

    pub fn set_total_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::IDENT], value)
    }

    /// Set flags and fragment offset at once.
    ///
    /// The offset is in octets and must be a multiple of eight.
    pub fn set_flags_and_offset(&mut self, dont_frag: bool, more_frags: bool, offset: u16) {
        debug_assert_eq!(offset % 8, 0);
        let mut raw = offset >> 3;
        if dont_frag { raw |= field::FLG_DF }
        if more_frags { raw |= field::FLG_MF }
        NetworkEndian::write_u16(&mut self.0[field::FLG_OFF], raw);
    }

    pub fn set_ttl_proto(&mut self, value: TtlProto) {
        NetworkEndian::write_u16(&mut self.0[field::TTL_PROTO], value.0)
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(&value.0)
    }

    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(&value.0)
    }

    /// Overwrite the checksum with the one of the current header.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = !checksum::data(self.header());
        self.set_checksum(checksum)
    }
}

impl AsRef<[u8]> for ipv4 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an Internet Protocol version 4 header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// The source of the packet.
    pub src_addr:    Address,
    /// The destination of the packet.
    pub dst_addr:    Address,
    /// The remaining hop limit and the encapsulated protocol.
    pub ttl_proto:   TtlProto,
    /// The identification shared by all fragments of a datagram.
    pub ident:       u16,
    /// Whether routers may fragment the packet.
    pub dont_frag:   bool,
    /// Whether more fragments of the datagram follow.
    pub more_frags:  bool,
    /// The offset of the payload in the datagram, in octets.
    pub frag_offset: u16,
    /// The length of the payload of this packet.
    pub payload_len: usize,
}

impl Repr {
    /// Parse an IPv4 header of a packet with `packet_len` received bytes.
    ///
    /// Returns the representation and the header length including options. Bytes beyond the total
    /// length field are link layer padding and not part of the payload.
    pub fn parse(packet: &ipv4, packet_len: usize) -> Result<(Repr, usize)> {
        packet.check_len()?;
        // Version 4 is expected.
        if packet.version() != 4 { return Err(Error::Malformed) }
        // Valid checksum is expected.
        if !packet.verify_checksum() { return Err(Error::WrongChecksum) }

        let header_len = usize::from(packet.header_len());
        let total_len = usize::from(packet.total_len());
        if total_len < header_len { return Err(Error::Malformed) }
        if packet_len < total_len { return Err(Error::Truncated) }

        // Type of service and time to live carry no meaning for an end host.
        Ok((Repr {
            src_addr:    packet.src_addr(),
            dst_addr:    packet.dst_addr(),
            ttl_proto:   packet.ttl_proto(),
            ident:       packet.ident(),
            dont_frag:   packet.dont_frag(),
            more_frags:  packet.more_frags(),
            frag_offset: packet.frag_offset(),
            payload_len: total_len - header_len,
        }, header_len))
    }

    /// Check if the packet is only part of a datagram.
    pub fn is_fragment(&self) -> bool {
        self.more_frags || self.frag_offset != 0
    }

    /// The number of header bytes `emit` writes.
    pub fn buffer_len(&self) -> usize {
        // We never emit any options.
        HEADER_LEN
    }

    /// Emit a high-level representation into an IPv4 header, including the checksum.
    pub fn emit(&self, packet: &mut ipv4) {
        packet.set_version_and_len(HEADER_LEN as u8);
        packet.0[field::DSCP_ECN] = 0;
        packet.set_total_len((HEADER_LEN + self.payload_len) as u16);
        packet.set_ident(self.ident);
        packet.set_flags_and_offset(self.dont_frag, self.more_frags, self.frag_offset);
        packet.set_ttl_proto(self.ttl_proto);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv4 src={} dst={} proto={} len={}",
               self.src_addr, self.dst_addr, self.ttl_proto.protocol(), self.payload_len)?;
        if self.is_fragment() {
            write!(f, " id={} off={}", self.ident, self.frag_offset)?;
            if self.more_frags {
                write!(f, " mf")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::IpProtocol as Protocol;

    fn fragment_repr() -> Repr {
        Repr {
            src_addr: Address::new(10, 20, 30, 40),
            dst_addr: Address::new(10, 20, 30, 1),
            ttl_proto: TtlProto::new(17, Protocol::Udp),
            ident: 0xbeef,
            dont_frag: false,
            more_frags: true,
            frag_offset: 1480,
            payload_len: 8,
        }
    }

    /// A header of `fragment_repr` followed by its payload and four bytes of padding.
    fn fragment() -> [u8; 32] {
        let mut bytes = [0; 32];
        fragment_repr().emit(ipv4::new_unchecked_mut(&mut bytes[..20]));
        bytes[20..28].copy_from_slice(b"fragment");
        bytes
    }

    #[test]
    fn header_fields() {
        let bytes = fragment();
        assert_eq!(bytes[0], 0x45);
        assert_eq!(&bytes[2..4], &[0, 28]);
        // MF and 1480 / 8 = 185.
        assert_eq!(&bytes[6..8], &[0x20, 0xb9]);
        assert_eq!(&bytes[8..10], &[17, 17]);

        let packet = ipv4::new_checked(&bytes[..20]).unwrap();
        assert_eq!(packet.version(), 4);
        assert_eq!(packet.ident(), 0xbeef);
        assert!(!packet.dont_frag());
        assert!(packet.more_frags());
        assert_eq!(packet.frag_offset(), 1480);
        assert!(packet.verify_checksum());
    }

    #[test]
    fn parse_fragment() {
        let bytes = fragment();
        let packet = ipv4::new_checked(&bytes[..20]).unwrap();
        let (repr, header_len) = Repr::parse(packet, 28).unwrap();
        assert_eq!(repr, fragment_repr());
        assert_eq!(header_len, 20);
        assert!(repr.is_fragment());
        // Link layer padding is not part of the payload.
        assert_eq!(Repr::parse(packet, bytes.len()).map(|(repr, _)| repr.payload_len), Ok(8));
        assert_eq!(Repr::parse(packet, 27), Err(Error::Truncated));
    }

    #[test]
    fn reject_bad_headers() {
        let mut v6 = fragment();
        v6[0] = 0x65;
        ipv4::new_unchecked_mut(&mut v6[..20]).fill_checksum();
        assert_eq!(Repr::parse(ipv4::new_unchecked(&v6[..20]), 28), Err(Error::Malformed));

        let mut corrupt = fragment();
        corrupt[12] ^= 0x80;
        assert_eq!(Repr::parse(ipv4::new_unchecked(&corrupt[..20]), 28), Err(Error::WrongChecksum));

        let mut short_total = fragment();
        short_total[3] = 16;
        ipv4::new_unchecked_mut(&mut short_total[..20]).fill_checksum();
        assert_eq!(Repr::parse(ipv4::new_unchecked(&short_total[..20]), 28), Err(Error::Malformed));
    }

    #[test]
    fn header_length_bounds() {
        let mut bytes = [0; 24];
        bytes[0] = 0x44;
        assert_eq!(ipv4::new_checked(&bytes), Err(Error::Malformed));
        bytes[0] = 0x47;
        assert_eq!(ipv4::new_checked(&bytes), Err(Error::Truncated));
        bytes[0] = 0x46;
        assert!(ipv4::new_checked(&bytes).is_ok());
        assert_eq!(ipv4::new_checked(&bytes[..19]), Err(Error::Truncated));
    }

    #[test]
    fn address_classes() {
        assert!(!Address::BROADCAST.is_unicast());
        assert!(Address::new(239, 255, 255, 250).is_multicast());
        assert!(!Address::new(240, 0, 0, 1).is_multicast());
        assert!(Address::new(0, 1, 2, 3).is_unspecified());
        assert!(Address::new(172, 16, 0, 1).is_unicast());
        assert_eq!(Address::netmask(20), Address::new(255, 255, 240, 0));
        assert_eq!(Address::netmask(0), Address::UNSPECIFIED);
        assert_eq!(Address::netmask(40), Address::BROADCAST);
        assert_eq!(Address::new(172, 31, 9, 9).mask(12), Address::new(172, 16, 0, 0));
        assert_eq!(format!("{}", Address::new(172, 16, 0, 1)), "172.16.0.1");
    }
}
