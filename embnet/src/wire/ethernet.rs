use core::{fmt, str::FromStr};
use byteorder::{ByteOrder, NetworkEndian};

use crate::wire::{Error, Result};

enum_with_unknown! {
    /// The EtherType of a frame.
    ///
    /// Only the two types the stack speaks are named.
    pub enum EtherType(u16) {
        Ipv4 = 0x0800,
        Arp  = 0x0806,
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EtherType::Ipv4 => f.write_str("IPv4"),
            EtherType::Arp => f.write_str("ARP"),
            EtherType::Unknown(raw) => write!(f, "ethertype 0x{:04x}", raw),
        }
    }
}

/// A MAC address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// The all-zero address, the unknown target of an ARP request.
    pub const ZERO: Address = Address([0; 6]);

    /// The address every station receives.
    pub const BROADCAST: Address = Address([0xff; 6]);

    /// Copy an address out of six octets.
    ///
    /// # Panics
    /// When `data` is not exactly six octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut octets = [0; 6];
        octets.copy_from_slice(data);
        Address(octets)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the address names a single station.
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Address::BROADCAST
    }

    /// Whether the group bit is set, this includes the broadcast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, octet) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

/// The text was not six colon separated hex octets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseAddressError(());

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid ethernet address")
    }
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(src: &str) -> core::result::Result<Self, ParseAddressError> {
        let mut octets = [0; 6];
        let mut parts = src.split(':');
        for octet in octets.iter_mut() {
            *octet = parts.next()
                .filter(|part| part.len() <= 2)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
                .ok_or(ParseAddressError(()))?;
        }

        if parts.next().is_some() {
            return Err(ParseAddressError(()));
        }

        Ok(Address(octets))
    }
}

byte_wrapper! {
    /// The header of an Ethernet II frame.
    ///
    /// VLAN tags are not recognized, a tagged frame has an unknown ethertype.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ethernet([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const DST_ADDR:  Field =  0..6;
    pub(crate) const SRC_ADDR:  Field =  6..12;
    pub(crate) const ETHERTYPE: Field = 12..14;
}

/// The length of the Ethernet II header.
pub const HEADER_LEN: usize = field::ETHERTYPE.end;

impl ethernet {
    /// Imbue a raw octet buffer with Ethernet frame structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with Ethernet frame structure.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Shorthand for a combination of `new_unchecked` and `check_len`.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let frame = Self::new_unchecked(data);
        frame.check_len()?;
        Ok(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `Err(Error::Truncated)` if the buffer can not hold a header.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < HEADER_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    pub fn ethertype(&self) -> EtherType {
        EtherType::from(NetworkEndian::read_u16(&self.0[field::ETHERTYPE]))
    }

    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(&value.0)
    }

    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(&value.0)
    }

    pub fn set_ethertype(&mut self, value: EtherType) {
        NetworkEndian::write_u16(&mut self.0[field::ETHERTYPE], value.into())
    }
}

impl AsRef<[u8]> for ethernet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an Ethernet II header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr:    Address,
    pub dst_addr:    Address,
    pub ethertype:   EtherType,
}

impl Repr {
    pub fn parse(frame: &ethernet) -> Result<Repr> {
        frame.check_len()?;
        Ok(Repr {
            src_addr: frame.src_addr(),
            dst_addr: frame.dst_addr(),
            ethertype: frame.ethertype(),
        })
    }

    /// The number of header bytes `emit` writes.
    pub fn header_len(&self) -> usize {
        HEADER_LEN
    }

    pub fn emit(&self, frame: &mut ethernet) {
        frame.set_dst_addr(self.dst_addr);
        frame.set_src_addr(self.src_addr);
        frame.set_ethertype(self.ethertype);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ethernet {} -> {} {}", self.src_addr, self.dst_addr, self.ethertype)
    }
}
