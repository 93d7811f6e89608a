use core::fmt;

/// The error type for parsing incoming packets.
///
/// These never leave the receive path. A packet that fails to parse is dropped without any
/// response, only the reason is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// An incoming packet could not be parsed because it was shorter than assumed.
    ///
    /// The packet may be shorter than the minimum length specified, or a length field claims more
    /// bytes than were actually received.
    Truncated,

    /// An incoming packet had an incorrect checksum and was dropped.
    WrongChecksum,

    /// An incoming packet could not be recognized and was dropped.
    ///
    /// E.g. an Ethernet packet with an unknown EtherType or an ARP packet for another protocol
    /// address space than IPv4.
    Unrecognized,

    /// An incoming packet was recognized but was self-contradictory.
    ///
    /// Examples: an IPv4 header length below 20 bytes; a TCP data offset pointing beyond the end
    /// of the segment.
    Malformed,

    /// Parsing depends on a feature that is not implemented.
    Unsupported,
}

/// The result type for packet parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Unrecognized  => write!(f, "unrecognized packet"),
            Error::Unsupported   => write!(f, "unsupported option"),
            Error::Malformed     => write!(f, "malformed packet"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
