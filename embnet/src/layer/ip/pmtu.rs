//! Path MTU discovery, see RFC 1191.
use crate::layer::IpErr;
use crate::managed::Slice;
use crate::time::{Expiration, Instant};
use crate::wire::Ipv4Address;

use super::Config;

/// The path MTU towards one remote host.
///
/// An entry is in use while it is referenced. References are held by the senders that adapt to
/// the path MTU, i.e. TCP connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PmtuEntry {
    remote: Ipv4Address,
    refs: usize,
    mtu: usize,
    expires: Expiration,
}

/// A fixed table of path MTU entries.
#[derive(Debug)]
pub struct PmtuCache<'a> {
    entries: Slice<'a, PmtuEntry>,
}

impl PmtuEntry {
    /// The remote host, if the entry is in use.
    pub fn remote(&self) -> Option<Ipv4Address> {
        if self.refs > 0 {
            Some(self.remote)
        } else {
            None
        }
    }

    /// The currently estimated path MTU.
    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

impl<'a> PmtuCache<'a> {
    /// Create a cache with all entries unused.
    pub fn new<T>(storage: T) -> Self
        where T: Into<Slice<'a, PmtuEntry>>,
    {
        let mut entries = storage.into();
        entries.iter_mut().for_each(|entry| *entry = PmtuEntry::default());
        PmtuCache { entries }
    }

    /// Inspect all entries.
    pub fn entries(&self) -> &[PmtuEntry] {
        &self.entries
    }

    /// Reference the entry of a remote host, starting at the interface MTU if it is new.
    pub fn acquire(&mut self, remote: Ipv4Address, iface_mtu: usize) -> Result<(), IpErr> {
        if let Some(entry) = self.find_mut(remote) {
            entry.refs += 1;
            return Ok(());
        }

        let entry = self.entries.iter_mut()
            .find(|entry| entry.refs == 0)
            .ok_or(IpErr::NoPmtuSpace)?;
        *entry = PmtuEntry {
            remote,
            refs: 1,
            mtu: iface_mtu,
            expires: Expiration::Never,
        };
        Ok(())
    }

    /// Drop one reference to the entry of a remote host.
    pub fn release(&mut self, remote: Ipv4Address) {
        if let Some(entry) = self.find_mut(remote) {
            entry.refs -= 1;
            if entry.refs == 0 {
                *entry = PmtuEntry::default();
            }
        }
    }

    /// The path MTU towards a referenced remote host.
    pub fn get(&self, remote: Ipv4Address) -> Option<usize> {
        self.entries.iter()
            .find(|entry| entry.refs > 0 && entry.remote == remote)
            .map(|entry| entry.mtu)
    }

    /// Handle a report that a datagram was too big.
    ///
    /// A reported MTU of zero (from routers predating RFC 1191) or below the configured minimum
    /// is raised to that minimum. Returns the new path MTU if it was lowered.
    pub(crate) fn lower(
        &mut self,
        remote: Ipv4Address,
        reported: u16,
        iface_mtu: usize,
        now: Instant,
        config: &Config,
    ) -> Option<usize> {
        let entry = self.find_mut(remote)?;
        let mtu = usize::from(reported)
            .max(config.min_mtu)
            .min(iface_mtu);
        if mtu >= entry.mtu {
            return None;
        }

        net_debug!("ip: path mtu to {} lowered to {}", remote, mtu);
        entry.mtu = mtu;
        entry.expires = Expiration::When(now + config.pmtu_timeout);
        Some(mtu)
    }

    /// Revert expired estimates to the interface MTU, probing for a larger path MTU.
    pub(crate) fn poll(&mut self, now: Instant, iface_mtu: usize) {
        for entry in self.entries.iter_mut().filter(|entry| entry.refs > 0) {
            if entry.expires.is_expired(now) {
                net_debug!("ip: path mtu to {} reset", entry.remote);
                entry.mtu = iface_mtu;
                entry.expires = Expiration::Never;
            }
        }
    }

    /// Forget all estimates, after the interface changed.
    pub(crate) fn reset(&mut self, iface_mtu: usize) {
        for entry in self.entries.iter_mut().filter(|entry| entry.refs > 0) {
            entry.mtu = iface_mtu;
            entry.expires = Expiration::Never;
        }
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.entries.iter()
            .filter(|entry| entry.refs > 0)
            .map(|entry| entry.expires)
            .min()
            .unwrap_or(Expiration::Never)
    }

    fn find_mut(&mut self, remote: Ipv4Address) -> Option<&mut PmtuEntry> {
        self.entries.iter_mut()
            .find(|entry| entry.refs > 0 && entry.remote == remote)
    }
}
