use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};
use super::{EthernetAddress, EthernetProtocol, Ipv4Address};

enum_with_unknown! {
    /// ARP hardware type.
    pub enum Hardware(u16) {
        Ethernet = 1
    }
}

enum_with_unknown! {
    /// ARP operation type.
    pub enum Operation(u16) {
        Request = 1,
        Reply = 2
    }
}

byte_wrapper!{
    /// An ARP packet for IPv4 over Ethernet.
    ///
    /// Address fields are only meaningful when the length fields are six and four, see
    /// [`Repr::parse`](struct.Repr.html#method.parse).
    #[derive(Debug, PartialEq, Eq)]
    pub struct arp([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const HTYPE: Field = 0..2;
    pub(crate) const PTYPE: Field = 2..4;
    pub(crate) const HLEN: usize = 4;
    pub(crate) const PLEN: usize = 5;
    pub(crate) const OPER: Field = 6..8;
    pub(crate) const SHA: Field = 8..14;
    pub(crate) const SPA: Field = 14..18;
    pub(crate) const THA: Field = 18..24;
    pub(crate) const TPA: Field = 24..28;
}

/// The length of an Ethernet and IPv4 ARP packet.
pub const PACKET_LEN: usize = field::TPA.end;

impl arp {
    /// Imbue a raw octet buffer with ARP packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &arp {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with ARP packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut arp {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// `new_unchecked` followed by `check_len`.
    pub fn new_checked(data: &[u8]) -> Result<&arp> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// Unwrap the packet as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `Err(Error::Truncated)` if the buffer can not hold the packet.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < PACKET_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn hardware_type(&self) -> Hardware {
        Hardware::from(NetworkEndian::read_u16(&self.0[field::HTYPE]))
    }

    pub fn protocol_type(&self) -> EthernetProtocol {
        EthernetProtocol::from(NetworkEndian::read_u16(&self.0[field::PTYPE]))
    }

    pub fn hardware_len(&self) -> u8 {
        self.0[field::HLEN]
    }

    pub fn protocol_len(&self) -> u8 {
        self.0[field::PLEN]
    }

    pub fn operation(&self) -> Operation {
        Operation::from(NetworkEndian::read_u16(&self.0[field::OPER]))
    }

    pub fn source_hardware_addr(&self) -> EthernetAddress {
        EthernetAddress::from_bytes(&self.0[field::SHA])
    }

    pub fn source_protocol_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.0[field::SPA])
    }

    pub fn target_hardware_addr(&self) -> EthernetAddress {
        EthernetAddress::from_bytes(&self.0[field::THA])
    }

    pub fn target_protocol_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.0[field::TPA])
    }

    /// Fill in the fixed fields of IPv4 over Ethernet and the operation.
    pub fn set_header(&mut self, operation: Operation) {
        NetworkEndian::write_u16(&mut self.0[field::HTYPE], Hardware::Ethernet.into());
        NetworkEndian::write_u16(&mut self.0[field::PTYPE], EthernetProtocol::Ipv4.into());
        self.0[field::HLEN] = 6;
        self.0[field::PLEN] = 4;
        NetworkEndian::write_u16(&mut self.0[field::OPER], operation.into());
    }

    pub fn set_source_addrs(&mut self, hardware: EthernetAddress, protocol: Ipv4Address) {
        self.0[field::SHA].copy_from_slice(hardware.as_bytes());
        self.0[field::SPA].copy_from_slice(protocol.as_bytes());
    }

    pub fn set_target_addrs(&mut self, hardware: EthernetAddress, protocol: Ipv4Address) {
        self.0[field::THA].copy_from_slice(hardware.as_bytes());
        self.0[field::TPA].copy_from_slice(protocol.as_bytes());
    }
}

impl AsRef<[u8]> for arp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an Ethernet and IPv4 Address Resolution Protocol packet.
///
/// Other hardware or protocol types are not recognized.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub operation: Operation,
    pub source_hardware_addr: EthernetAddress,
    pub source_protocol_addr: Ipv4Address,
    pub target_hardware_addr: EthernetAddress,
    pub target_protocol_addr: Ipv4Address,
}

impl Repr {
    /// Parse a request or reply resolving IPv4 to Ethernet addresses.
    ///
    /// Any other combination of types is `Unrecognized`.
    pub fn parse(packet: &arp) -> Result<Repr> {
        packet.check_len()?;
        let for_ipv4 = packet.hardware_type() == Hardware::Ethernet
            && packet.protocol_type() == EthernetProtocol::Ipv4
            && packet.hardware_len() == 6
            && packet.protocol_len() == 4;
        let operation = packet.operation();
        if !for_ipv4 || operation.is_unknown() {
            return Err(Error::Unrecognized);
        }

        Ok(Repr {
            operation,
            source_hardware_addr: packet.source_hardware_addr(),
            source_protocol_addr: packet.source_protocol_addr(),
            target_hardware_addr: packet.target_hardware_addr(),
            target_protocol_addr: packet.target_protocol_addr(),
        })
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    pub fn buffer_len(&self) -> usize {
        PACKET_LEN
    }

    /// Emit a high-level representation into an Address Resolution Protocol packet.
    pub fn emit(&self, packet: &mut arp) {
        packet.set_header(self.operation);
        packet.set_source_addrs(self.source_hardware_addr, self.source_protocol_addr);
        packet.set_target_addrs(self.target_hardware_addr, self.target_protocol_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = match self.operation {
            Operation::Request => "request",
            Operation::Reply => "reply",
            Operation::Unknown(_) => "unknown",
        };
        write!(f, "ARP {} {}/{} -> {}/{}", op,
            self.source_hardware_addr, self.source_protocol_addr,
            self.target_hardware_addr, self.target_protocol_addr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Who has 192.168.0.1? Tell 192.168.0.23
    #[rustfmt::skip]
    static REQUEST: [u8; 28] = [
        0x00, 0x01, 0x08, 0x00,
        0x06, 0x04, 0x00, 0x01,
        0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xc0, 0xa8, 0x00, 0x17,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0xc0, 0xa8, 0x00, 0x01,
    ];

    fn request_repr() -> Repr {
        Repr {
            operation: Operation::Request,
            source_hardware_addr: EthernetAddress([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
            source_protocol_addr: Ipv4Address::new(192, 168, 0, 23),
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: Ipv4Address::new(192, 168, 0, 1),
        }
    }

    #[test]
    fn request_fields() {
        let packet = arp::new_checked(&REQUEST[..]).unwrap();
        assert_eq!(packet.hardware_type(), Hardware::Ethernet);
        assert_eq!(packet.protocol_type(), EthernetProtocol::Ipv4);
        assert_eq!(packet.operation(), Operation::Request);
        assert_eq!(packet.source_protocol_addr(), Ipv4Address::new(192, 168, 0, 23));
        assert_eq!(packet.target_protocol_addr(), Ipv4Address::new(192, 168, 0, 1));
        assert_eq!(arp::new_checked(&REQUEST[..27]), Err(Error::Truncated));
    }

    #[test]
    fn parse_and_emit() {
        assert_eq!(Repr::parse(arp::new_unchecked(&REQUEST[..])), Ok(request_repr()));

        let mut bytes = [0xff; 28];
        request_repr().emit(arp::new_unchecked_mut(&mut bytes));
        assert_eq!(bytes, REQUEST);
    }

    #[test]
    fn only_ipv4_over_ethernet() {
        let mut reply = REQUEST;
        reply[7] = 2;
        assert_eq!(Repr::parse(arp::new_unchecked(&reply)).map(|repr| repr.operation),
                   Ok(Operation::Reply));

        let mut rarp = REQUEST;
        rarp[7] = 3;
        assert_eq!(Repr::parse(arp::new_unchecked(&rarp)), Err(Error::Unrecognized));

        let mut ipv6 = REQUEST;
        ipv6[2..4].copy_from_slice(&[0x86, 0xdd]);
        assert_eq!(Repr::parse(arp::new_unchecked(&ipv6)), Err(Error::Unrecognized));

        let mut long_hw = REQUEST;
        long_hw[4] = 8;
        assert_eq!(Repr::parse(arp::new_unchecked(&long_hw)), Err(Error::Unrecognized));
    }
}
