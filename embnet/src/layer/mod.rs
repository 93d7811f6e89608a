//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol layer is split into two parts; the packet logic contained in `wire` and the
//! processing part in this module. A layer owns the local state of its protocol and the layer
//! directly below it: [`ip::Ip`] owns the [`eth::Eth`] layer which in turn owns the driver. The
//! TCP layer is kept beside them and is handed the IP layer whenever it sends.
//!
//! ## Receiving
//!
//! Frames are parsed from the bottom up. The eth layer consumes ARP and passes IPv4 payloads on,
//! the IP layer validates, reassembles and answers ICMP, then returns a [`ip::Delivery`] for the
//! transport layer. Anything malformed is dropped on the way without an answer.
//!
//! ## Sending
//!
//! Senders allocate their packet in a [`buf::Pool`] with [`ip::HEADROOM`] bytes reserved in
//! front of it. Each layer reveals its header in that headroom, so a packet is never copied on
//! its way down. Fragmentation cuts the payload into pieces by pushing additional segment
//! descriptors only.
//!
//! ## Waiting
//!
//! No operation blocks. A send that can not currently succeed fails with an [`IpErr`] and, when
//! the condition is temporary, registers the sender with a list of the [`SendRetry`] registry.
//! The owner of the list dispatches it once the resource is available.
//!
//! [`ip::Ip`]: ip/struct.Ip.html
//! [`eth::Eth`]: eth/struct.Eth.html
//! [`ip::Delivery`]: ip/enum.Delivery.html
//! [`buf::Pool`]: ../buf/struct.Pool.html
//! [`ip::HEADROOM`]: ip/constant.HEADROOM.html
//! [`IpErr`]: enum.IpErr.html
//! [`SendRetry`]: ../retry/struct.SendRetry.html
use core::fmt;

pub mod eth;
pub mod ip;
pub mod tcp;

/// Every way an operation of the stack can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpErr {
    /// The hardware address of the next hop is being resolved.
    ///
    /// An ARP request has been sent. The sender is retried once a reply arrives.
    ArpQuery,

    /// The packet buffer has not enough headroom for a header.
    NoHeaderSpace,

    /// The driver or the packet pool can not take another packet right now.
    BufferFull,

    /// The next hop is not on the local link.
    NoHwRoute,

    /// There is no route towards the destination, or the interface has no address.
    NoIpRoute,

    /// The packet exceeds the maximum size that can be sent.
    PktTooLarge,

    /// All local ports are in use.
    NoPortAvail,

    /// There is no free connection slot.
    NoPcbAvail,

    /// There is no free path MTU cache entry.
    NoPmtuSpace,

    /// The datagram does not fit the MTU but must not be fragmented.
    FragNeeded,

    /// The driver reported a failure.
    HwError,

    /// The link is down.
    LinkDown,
}

impl IpErr {
    /// Whether a registered sender will eventually be retried.
    ///
    /// These are the conditions that register the sender with a retry list.
    pub fn is_retried(self) -> bool {
        match self {
            IpErr::ArpQuery | IpErr::BufferFull | IpErr::NoHwRoute | IpErr::LinkDown => true,
            _ => false,
        }
    }
}

impl fmt::Display for IpErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IpErr::ArpQuery      => write!(f, "hardware address resolution pending"),
            IpErr::NoHeaderSpace => write!(f, "no space for header"),
            IpErr::BufferFull    => write!(f, "transmit buffer full"),
            IpErr::NoHwRoute     => write!(f, "no hardware route"),
            IpErr::NoIpRoute     => write!(f, "no route to host"),
            IpErr::PktTooLarge   => write!(f, "packet too large"),
            IpErr::NoPortAvail   => write!(f, "no local port available"),
            IpErr::NoPcbAvail    => write!(f, "no connection slot available"),
            IpErr::NoPmtuSpace   => write!(f, "no path MTU entry available"),
            IpErr::FragNeeded    => write!(f, "fragmentation needed"),
            IpErr::HwError       => write!(f, "hardware error"),
            IpErr::LinkDown      => write!(f, "link down"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IpErr {}
