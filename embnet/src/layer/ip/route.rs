//! The address configuration of the interface, relevant rfc950 and rfc1122.
use core::fmt;

use crate::wire::Ipv4Address;

/// The IPv4 configuration of an interface.
///
/// All members are derived from the address and prefix length given to [`new`], so that the
/// network and broadcast address always agree with the netmask.
///
/// [`new`]: #method.new
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ip4Addrs {
    /// The address of the interface.
    pub addr: Ipv4Address,
    /// The netmask for the prefix length.
    pub netmask: Ipv4Address,
    /// The network address, `addr & netmask`.
    pub netaddr: Ipv4Address,
    /// The directed broadcast address, `netaddr | !netmask`.
    pub bcast: Ipv4Address,
    /// The number of network bits.
    pub prefix: u8,
}

impl Ip4Addrs {
    /// Configure an address with a prefix length.
    ///
    /// The prefix is clamped to 32.
    ///
    /// ```
    /// # use embnet::layer::ip::Ip4Addrs;
    /// # use embnet::wire::Ipv4Address;
    /// let addrs = Ip4Addrs::new(Ipv4Address::new(192, 168, 1, 17), 24);
    /// assert_eq!(addrs.netaddr, Ipv4Address::new(192, 168, 1, 0));
    /// assert_eq!(addrs.bcast, Ipv4Address::new(192, 168, 1, 255));
    /// ```
    pub fn new(addr: Ipv4Address, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        let netmask = Ipv4Address::netmask(prefix);
        let mask = netmask.to_network_integer();
        let net = addr.to_network_integer() & mask;
        Ip4Addrs {
            addr,
            netmask,
            netaddr: Ipv4Address::from_network_integer(net),
            bcast: Ipv4Address::from_network_integer(net | !mask),
            prefix,
        }
    }

    /// Check if an address is on the local network.
    pub fn contains(&self, addr: Ipv4Address) -> bool {
        addr.mask(self.prefix) == self.netaddr
    }

    /// Check if the address is the limited or the directed broadcast of the network.
    pub fn is_broadcast(&self, addr: Ipv4Address) -> bool {
        addr == Ipv4Address::BROADCAST || addr == self.bcast
    }

    /// Check if a datagram for `dst` should be accepted by the interface.
    pub fn accepts(&self, dst: Ipv4Address) -> bool {
        dst == self.addr || self.is_broadcast(dst)
    }

    /// The address a datagram for `dst` is handed to on the link.
    ///
    /// This is `dst` itself for destinations on the network and broadcasts. There is no gateway,
    /// everything else is unroutable.
    pub fn next_hop(&self, dst: Ipv4Address) -> Option<Ipv4Address> {
        if self.is_broadcast(dst) || self.contains(dst) {
            Some(dst)
        } else {
            None
        }
    }
}

impl fmt::Display for Ip4Addrs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}
