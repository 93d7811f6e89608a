// Heads up! Before working on this file you should read, at least,
// the parts of RFC 1122 that discuss ARP.
use crate::managed::Slice;
use crate::time::{Expiration, Instant};
use crate::wire::{EthernetAddress, Ipv4Address};

use super::Config;

/// The resolution state of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// The entry is unused.
    Free,
    /// No hardware address is known, broadcast requests are being sent.
    Query,
    /// The hardware address is known.
    ///
    /// Once the timer has expired the mapping is stale and refreshed on its next use.
    Valid,
    /// The hardware address is stale but still used while unicast requests are sent to it.
    Refreshing,
}

/// A cached neighbor.
///
/// A neighbor mapping translates from a protocol address to a hardware address. Entries are
/// reused in least recently used order, preferring those that were created only because of
/// unsolicited traffic (weak entries).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Entry {
    state: State,
    weak: bool,
    protocol_addr: Ipv4Address,
    hardware_addr: EthernetAddress,
    attempts: u8,
    timer: Expiration,
    last_use: u32,
    pub(crate) held: usize,
}

/// A request that the owner of the cache should send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Request {
    /// Ask everyone on the link.
    Broadcast(Ipv4Address),
    /// Ask the host at the stale hardware address again.
    Unicast(Ipv4Address, EthernetAddress),
}

/// The outcome of looking up an address for sending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Lookup {
    /// The entry of the address.
    pub index: usize,
    /// The address to use, if any.
    pub hardware_addr: Option<EthernetAddress>,
    /// A request to send for the entry.
    pub request: Option<Request>,
    /// The entry was newly (re-)allocated and anything waiting on its previous use must go.
    pub fresh: bool,
}

/// What became of an entry after new information arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Update {
    /// The entry of the address.
    pub index: usize,
    /// The entry was not usable before, waiting senders may proceed.
    pub resolved: bool,
    /// The entry was newly (re-)allocated.
    pub fresh: bool,
}

/// The outcome of an expired entry timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Timeout {
    /// Nothing to do.
    Nothing,
    /// Send another request.
    Resend(Request),
    /// Resolution failed and the entry is now free.
    Failed,
}

/// The neighbor cache.
///
/// On systems without heap, use:
///
/// ```rust
/// use embnet::layer::eth::{ArpEntry, ArpCache};
///
/// let mut storage = [ArpEntry::default(); 8];
/// let cache = ArpCache::new(&mut storage[..]);
/// assert_eq!(cache.capacity(), 8);
/// ```
#[derive(Debug)]
pub struct Cache<'a> {
    entries: Slice<'a, Entry>,
    clock: u32,
}

impl Entry {
    /// The resolution state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The protocol address of a used entry.
    pub fn protocol_addr(&self) -> Option<Ipv4Address> {
        match self.state {
            State::Free => None,
            _ => Some(self.protocol_addr),
        }
    }

    /// The hardware address if it may be used for sending.
    pub fn hardware_addr(&self) -> Option<EthernetAddress> {
        match self.state {
            State::Valid | State::Refreshing => Some(self.hardware_addr),
            State::Free | State::Query => None,
        }
    }

    /// Whether the entry was created from unsolicited traffic and never used.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    fn deadline(&self) -> Expiration {
        match self.state {
            State::Query | State::Refreshing => self.timer,
            // Expiry of a valid entry only takes effect on the next use.
            State::Free | State::Valid => Expiration::Never,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.state == State::Valid && self.timer.is_expired(now)
    }

    fn validate(&mut self, hardware_addr: EthernetAddress, now: Instant, config: &Config) {
        self.state = State::Valid;
        self.hardware_addr = hardware_addr;
        self.attempts = 0;
        self.timer = Expiration::When(now + config.valid_time);
    }

    /// Enter the query state and count the first request.
    fn query(&mut self, now: Instant, config: &Config) -> Request {
        self.state = State::Query;
        self.attempts = 1;
        self.timer = Expiration::When(now + config.response_timeout);
        Request::Broadcast(self.protocol_addr)
    }

    fn refresh(&mut self, now: Instant, config: &Config) -> Request {
        self.state = State::Refreshing;
        self.attempts = 1;
        self.timer = Expiration::When(now + config.response_timeout);
        Request::Unicast(self.protocol_addr, self.hardware_addr)
    }
}

impl<'a> Cache<'a> {
    /// Create a cache.
    ///
    /// The backing storage is created logically empty.
    pub fn new<T>(storage: T) -> Self
        where T: Into<Slice<'a, Entry>>,
    {
        let mut entries = storage.into();
        entries.iter_mut().for_each(|entry| *entry = Entry::default());
        Cache {
            entries,
            clock: 0,
        }
    }

    /// The number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Inspect an entry.
    pub fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut Entry {
        &mut self.entries[index]
    }

    /// Find the used entry for an address.
    pub fn find(&self, protocol_addr: Ipv4Address) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.state != State::Free && entry.protocol_addr == protocol_addr
        })
    }

    /// The usable hardware address of a protocol address.
    pub fn lookup(&self, protocol_addr: Ipv4Address) -> Option<EthernetAddress> {
        self.find(protocol_addr)
            .and_then(|index| self.entries[index].hardware_addr())
    }

    /// Free all entries.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = Entry::default());
    }

    /// The earliest point at which `timeout` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.entries.iter()
            .map(Entry::deadline)
            .min()
            .unwrap_or(Expiration::Never)
    }

    /// Look up an address to send a packet to it.
    ///
    /// Creates an entry and starts a query if necessary. A stale mapping is still returned but
    /// starts a refresh. Returns `None` only for a cache without entries.
    pub(crate) fn resolve(&mut self, protocol_addr: Ipv4Address, now: Instant, config: &Config)
        -> Option<Lookup>
    {
        let (index, fresh) = match self.find(protocol_addr) {
            Some(index) => (index, false),
            None => (self.allocate(protocol_addr, false, config)?, true),
        };

        self.touch(index);
        let entry = &mut self.entries[index];
        entry.weak = false;

        let request = if fresh {
            Some(entry.query(now, config))
        } else if entry.is_stale(now) {
            Some(entry.refresh(now, config))
        } else {
            None
        };

        Some(Lookup {
            index,
            hardware_addr: entry.hardware_addr(),
            request,
            fresh,
        })
    }

    /// Learn a mapping from a received packet.
    ///
    /// An existing entry is always updated. A new entry is only created if `create` is set, it is
    /// weak until used for sending. Returns `None` when no entry may be taken for it.
    pub(crate) fn update(
        &mut self,
        protocol_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
        create: bool,
        now: Instant,
        config: &Config,
    ) -> Option<Update> {
        let (index, fresh) = match self.find(protocol_addr) {
            Some(index) => (index, false),
            None if create => {
                let index = self.allocate(protocol_addr, true, config)?;
                self.entries[index].weak = true;
                (index, true)
            },
            None => return None,
        };

        self.touch(index);
        let entry = &mut self.entries[index];
        let resolved = entry.hardware_addr().is_none();
        entry.validate(hardware_addr, now, config);
        Some(Update { index, resolved, fresh })
    }

    /// Handle the timer of an entry.
    pub(crate) fn timeout(&mut self, index: usize, now: Instant, config: &Config) -> Timeout {
        let entry = &mut self.entries[index];
        if !entry.deadline().is_expired(now) {
            return Timeout::Nothing;
        }

        let (limit, request) = match entry.state {
            State::Query => (config.query_attempts, Request::Broadcast(entry.protocol_addr)),
            State::Refreshing => (
                config.refresh_attempts,
                Request::Unicast(entry.protocol_addr, entry.hardware_addr)),
            State::Free | State::Valid => return Timeout::Nothing,
        };

        if entry.attempts < limit {
            // Wait twice as long for every further answer.
            let backoff = 1u32 << u32::from(entry.attempts.min(16));
            entry.attempts += 1;
            entry.timer = Expiration::When(now + config.response_timeout * backoff);
            return Timeout::Resend(request);
        }

        match entry.state {
            State::Refreshing => {
                net_debug!("arp: {} stopped answering", entry.protocol_addr);
                Timeout::Resend(entry.query(now, config))
            },
            _ => {
                net_debug!("arp: no answer from {}", entry.protocol_addr);
                *entry = Entry::default();
                Timeout::Failed
            },
        }
    }

    /// Take a free entry, else recycle the least recently used weak or hard one.
    ///
    /// Up to `protect_count` hard entries are safe from new weak ones: below that bound a weak
    /// entry only replaces another weak entry, or is not created at all. A hard entry replaces a
    /// weak one while weak entries occupy more than the unprotected rest of the cache.
    fn allocate(&mut self, protocol_addr: Ipv4Address, weak: bool, config: &Config)
        -> Option<usize>
    {
        let index = match self.entries.iter().position(|entry| entry.state == State::Free) {
            Some(index) => index,
            None => {
                let capacity = self.entries.len();
                let protected = config.protect_count.min(capacity);
                let num_hard = self.entries.iter().filter(|entry| !entry.weak).count();
                let last_weak = self.least_recent(true);
                let last_hard = self.least_recent(false);

                let recycled = if weak {
                    if num_hard > protected {
                        last_hard.or(last_weak)
                    } else {
                        last_weak
                    }
                } else if capacity - num_hard > capacity - protected || last_hard.is_none() {
                    last_weak.or(last_hard)
                } else {
                    last_hard
                };
                recycled?
            },
        };

        if let Some(evicted) = self.entries[index].protocol_addr() {
            net_debug!("arp: evicting {}", evicted);
        }

        self.entries[index] = Entry {
            protocol_addr,
            ..Entry::default()
        };
        Some(index)
    }

    fn least_recent(&self, weak: bool) -> Option<usize> {
        let clock = self.clock;
        self.entries.iter()
            .enumerate()
            .filter(|(_, entry)| entry.state != State::Free && entry.weak == weak)
            .max_by_key(|(_, entry)| clock.wrapping_sub(entry.last_use))
            .map(|(index, _)| index)
    }

    fn touch(&mut self, index: usize) {
        self.clock = self.clock.wrapping_add(1);
        self.entries[index].last_use = self.clock;
    }
}

impl Default for State {
    fn default() -> Self {
        State::Free
    }
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            state: State::Free,
            weak: false,
            protocol_addr: Ipv4Address::UNSPECIFIED,
            hardware_addr: EthernetAddress::ZERO,
            attempts: 0,
            timer: Expiration::Never,
            last_use: 0,
            held: 0,
        }
    }
}
