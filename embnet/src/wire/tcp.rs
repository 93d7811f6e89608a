use core::{fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use crate::buf::Buf;
use super::{Error, IpProtocol, Ipv4Address, Result};
use super::ip::checksum;

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>. There is no
/// total order on such numbers, two of them can only be compared relative to some reference point
/// with [`lte`] and [`lt`].
///
/// [`lte`]: #method.lte
/// [`lt`]: #method.lt
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl SeqNumber {
    /// The signed position relative to a reference point.
    fn aligned(self, reference: SeqNumber) -> i32 {
        self.0.wrapping_sub(reference.0) as i32
    }

    /// Compare two numbers within the 2<sup>31</sup> wide windows on both sides of `reference`.
    ///
    /// For numbers less than 2<sup>31</sup> apart from the reference this is exactly the integer
    /// comparison of the distances.
    pub fn lte(a: SeqNumber, b: SeqNumber, reference: SeqNumber) -> bool {
        a.aligned(reference) <= b.aligned(reference)
    }

    /// Strict comparison within the windows around `reference`, see [`lte`].
    ///
    /// [`lte`]: #method.lte
    pub fn lt(a: SeqNumber, b: SeqNumber, reference: SeqNumber) -> bool {
        a.aligned(reference) < b.aligned(reference)
    }

    /// The distance from `base` forward to `self`, modulo 2<sup>32</sup>.
    pub fn diff(self, base: SeqNumber) -> u32 {
        self.0.wrapping_sub(base.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        debug_assert!(rhs <= i32::max_value() as usize, "sequence number offset overflow");
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        debug_assert!(rhs <= i32::max_value() as usize, "sequence number offset overflow");
        SeqNumber(self.0.wrapping_sub(rhs as u32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

byte_wrapper! {
    /// A byte sequence representing a TCP header, including options.
    #[derive(Debug, PartialEq, Eq)]
    pub struct tcp([u8]);
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM:  Field = 4..8;
    pub(crate) const ACK_NUM:  Field = 8..12;
    pub(crate) const FLAGS:    Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT:   Field = 18..20;

    pub(crate) fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub(crate) const FLG_FIN: u16 = 0x001;
    pub(crate) const FLG_SYN: u16 = 0x002;
    pub(crate) const FLG_RST: u16 = 0x004;
    pub(crate) const FLG_PSH: u16 = 0x008;
    pub(crate) const FLG_ACK: u16 = 0x010;
    pub(crate) const FLG_URG: u16 = 0x020;
    pub(crate) const FLG_MASK: u16 = 0x1ff;

    pub(crate) const OPT_END: u8 = 0x00;
    pub(crate) const OPT_NOP: u8 = 0x01;
    pub(crate) const OPT_MSS: u8 = 0x02;
}

/// The length of a header without options.
pub const HEADER_LEN: usize = field::URGENT.end;

/// The longest possible header.
pub const MAX_HEADER_LEN: usize = 60;

/// The length of a header carrying only the MSS option.
pub const MSS_HEADER_LEN: usize = HEADER_LEN + 4;

impl tcp {
    /// Imbue a raw octet buffer with TCP header structure.
    pub fn new_unchecked(buffer: &[u8]) -> &tcp {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with TCP header structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut tcp {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// `new_unchecked` followed by `check_len`.
    pub fn new_checked(data: &[u8]) -> Result<&tcp> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// View the header as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check that the fixed header and the options announced by the data offset are present.
    ///
    /// A data offset below five words is `Malformed`. Changing the header length afterwards voids
    /// the check.
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::URGENT.end {
            Err(Error::Truncated)
        } else {
            let header_len = usize::from(self.header_len());
            if len < header_len {
                Err(Error::Truncated)
            } else if header_len < field::URGENT.end {
                Err(Error::Malformed)
            } else {
                Ok(())
            }
        }
    }

    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::SRC_PORT])
    }

    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::DST_PORT])
    }

    #[inline]
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.0[field::SEQ_NUM]))
    }

    #[inline]
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.0[field::ACK_NUM]))
    }

    /// Return all flags.
    #[inline]
    pub fn flags(&self) -> Flags {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        Flags(raw & field::FLG_MASK)
    }

    /// The data offset in bytes.
    #[inline]
    pub fn header_len(&self) -> u8 {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    #[inline]
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::WIN_SIZE])
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    #[inline]
    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::URGENT])
    }

    /// Return the options.
    pub fn options(&self) -> &[u8] {
        &self.0[field::OPTIONS(self.header_len())]
    }

    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::SRC_PORT], value)
    }

    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::DST_PORT], value)
    }

    #[inline]
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.0[field::SEQ_NUM], value.0)
    }

    #[inline]
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.0[field::ACK_NUM], value.0)
    }

    /// Set all flags, keeping the header length.
    #[inline]
    pub fn set_flags(&mut self, Flags(flags): Flags) {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        let raw = (raw & !field::FLG_MASK) | (flags & field::FLG_MASK);
        NetworkEndian::write_u16(&mut self.0[field::FLAGS], raw)
    }

    /// Set the data offset, `value` in bytes and a multiple of four.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let raw = NetworkEndian::read_u16(&self.0[field::FLAGS]);
        let raw = (raw & 0x0fff) | (u16::from(value) / 4) << 12;
        NetworkEndian::write_u16(&mut self.0[field::FLAGS], raw)
    }

    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::WIN_SIZE], value)
    }

    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::URGENT], value)
    }

    /// Return the options as a mutable slice.
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.0[field::OPTIONS(header_len)]
    }
}

impl AsRef<[u8]> for tcp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

macro_rules! flag_accessors {
    ($($(#[$attr:meta])* $get:ident, $set:ident = $flag:ident;)*) => {
        $(
            $(#[$attr])*
            #[inline]
            pub fn $get(&self) -> bool {
                self.0 & field::$flag != 0
            }

            $(#[$attr])*
            #[inline]
            pub fn $set(&mut self, value: bool) {
                let flag = if value { field::$flag } else { 0 };
                let without = self.0 & !field::$flag;
                self.0 = without | flag;
            }
        )*
    };
}

impl Flags {
    /// The FIN flag alone.
    pub const FIN: Flags = Flags(field::FLG_FIN);
    /// The SYN flag alone.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// The RST flag alone.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// The ACK flag alone.
    pub const ACK: Flags = Flags(field::FLG_ACK);

    flag_accessors! {
        /// The FIN flag.
        fin, set_fin = FLG_FIN;
        /// The SYN flag.
        syn, set_syn = FLG_SYN;
        /// The RST flag.
        rst, set_rst = FLG_RST;
        /// The PSH flag.
        psh, set_psh = FLG_PSH;
        /// The ACK flag.
        ack, set_ack = FLG_ACK;
        /// The URG flag.
        urg, set_urg = FLG_URG;
    }

    /// One for each of SYN and FIN, which occupy sequence space.
    pub fn sequence_len(self) -> usize {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 }  else { 0 })
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.syn() { write!(f, " syn")? }
        if self.fin() { write!(f, " fin")? }
        if self.rst() { write!(f, " rst")? }
        if self.psh() { write!(f, " psh")? }
        if self.ack() { write!(f, " ack")? }
        if self.urg() { write!(f, " urg")? }
        Ok(())
    }
}

/// A single TCP option.
///
/// Only the maximum segment size is interpreted, everything else is carried as raw data.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    Unknown { kind: u8, data: &'a [u8] }
}

impl<'a> TcpOption<'a> {
    /// Parse the option at the start of `buffer`, returning it and the remaining bytes.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let kind = *buffer.first().ok_or(Error::Truncated)?;
        if kind == field::OPT_END || kind == field::OPT_NOP {
            let option = if kind == field::OPT_END {
                TcpOption::EndOfList
            } else {
                TcpOption::NoOperation
            };
            return Ok((&buffer[1..], option));
        }

        let length = usize::from(*buffer.get(1).ok_or(Error::Truncated)?);
        let data = buffer.get(2..length).ok_or(Error::Truncated)?;
        let option = match kind {
            field::OPT_MSS if data.len() == 2 => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
            field::OPT_MSS => return Err(Error::Malformed),
            kind => TcpOption::Unknown { kind, data },
        };
        Ok((&buffer[length..], option))
    }

    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Write the option to the start of `buffer` and return the bytes after it.
    ///
    /// The end of list option pads the whole buffer.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length = self.buffer_len();
        match *self {
            TcpOption::EndOfList => {
                buffer.iter_mut().for_each(|byte| *byte = field::OPT_END);
                let end = buffer.len();
                return &mut buffer[end..];
            },
            TcpOption::NoOperation => buffer[0] = field::OPT_NOP,
            TcpOption::MaxSegmentSize(mss) => {
                buffer[..2].copy_from_slice(&[field::OPT_MSS, 4]);
                NetworkEndian::write_u16(&mut buffer[2..4], mss);
            },
            TcpOption::Unknown { kind, data } => {
                buffer[..2].copy_from_slice(&[kind, length as u8]);
                buffer[2..length].copy_from_slice(data);
            },
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of a Transmission Control Protocol header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port:     u16,
    pub dst_port:     u16,
    pub flags:        Flags,
    pub seq_number:   SeqNumber,
    pub ack_number:   Option<SeqNumber>,
    pub window_len:   u16,
    pub max_seg_size: Option<u16>,
    pub payload_len:  usize,
}

/// The checksum of a complete segment with its pseudo header.
///
/// The result is the value of the checksum field if the field is zero, and zero if the checksum
/// field of the segment is valid.
pub fn segment_checksum(segment: Buf, src_addr: Ipv4Address, dst_addr: Ipv4Address) -> u16 {
    let pseudo = checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, segment.len() as u16);
    !checksum::combine(&[pseudo, checksum::chain(segment)])
}

impl Repr {
    /// Parse a complete Transmission Control Protocol segment.
    ///
    /// Returns the representation and the header length. The checksum is verified against the
    /// pseudo header of the given addresses. Options other than the maximum segment size are
    /// skipped by their length, malformed ones included; a length below two ends the option list.
    pub fn parse(segment: Buf, src_addr: Ipv4Address, dst_addr: Ipv4Address)
        -> Result<(Repr, usize)>
    {
        let mut bytes = [0; MAX_HEADER_LEN];
        let copied = segment.copy_out(&mut bytes);
        let packet = tcp::new_checked(&bytes[..copied])?;
        let header_len = usize::from(packet.header_len());

        // Source and destination ports must be present.
        if packet.src_port() == 0 { return Err(Error::Malformed) }
        if packet.dst_port() == 0 { return Err(Error::Malformed) }

        // Valid checksum is expected.
        if !cfg!(fuzzing) && segment_checksum(segment, src_addr, dst_addr) != 0 {
            return Err(Error::WrongChecksum)
        }

        let flags = packet.flags();
        let ack_number = if flags.ack() {
            Some(packet.ack_number())
        } else {
            None
        };
        // The PSH flag is ignored.
        // The URG flag and the urgent field is ignored.

        let mut max_seg_size = None;
        let mut options = packet.options();
        while let Some(&kind) = options.first() {
            match kind {
                field::OPT_END => break,
                field::OPT_NOP => {
                    options = &options[1..];
                    continue;
                },
                _ => (),
            }

            let length = match options.get(1) {
                Some(&length) if length >= 2 => usize::from(length),
                _ => break,
            };

            let option = match options.get(..length) {
                Some(option) => option,
                None => break,
            };

            match TcpOption::parse(option) {
                Ok((_, TcpOption::MaxSegmentSize(value))) => max_seg_size = Some(value),
                Ok(_) => (),
                Err(_) => net_trace!("tcp: skipping malformed option {}", kind),
            }
            options = &options[length..];
        }

        Ok((Repr {
            src_port:     packet.src_port(),
            dst_port:     packet.dst_port(),
            flags:        flags,
            seq_number:   packet.seq_number(),
            ack_number:   ack_number,
            window_len:   packet.window_len(),
            max_seg_size: max_seg_size,
            payload_len:  segment.len() - header_len,
        }, header_len))
    }

    /// The number of header bytes `emit` writes.
    ///
    /// The TCP header length is a multiple of 4.
    pub fn header_len(&self) -> usize {
        if self.max_seg_size.is_some() {
            MSS_HEADER_LEN
        } else {
            HEADER_LEN
        }
    }

    /// Emit the header of this representation.
    ///
    /// The checksum is zeroed, fill it with [`segment_checksum`] once the payload is in place.
    ///
    /// [`segment_checksum`]: fn.segment_checksum.html
    pub fn emit(&self, packet: &mut tcp) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        packet.set_flags(flags);
        packet.set_checksum(0);
        packet.set_urgent_at(0);
        if let Some(value) = self.max_seg_size {
            TcpOption::MaxSegmentSize(value).emit(packet.options_mut());
        }
    }

    /// Payload length plus SYN and FIN.
    pub fn sequence_len(&self) -> usize {
        self.payload_len + self.flags.sequence_len()
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP src={} dst={}{}",
               self.src_port, self.dst_port, self.flags)?;
        write!(f, " seq={}", self.seq_number)?;
        if let Some(ack_number) = self.ack_number {
            write!(f, " ack={}", ack_number)?;
        }
        write!(f, " win={}", self.window_len)?;
        write!(f, " len={}", self.payload_len)?;
        if let Some(max_seg_size) = self.max_seg_size {
            write!(f, " mss={}", max_seg_size)?;
        }
        Ok(())
    }
}
