//! Reassembly of fragmented datagrams, see RFC 815.
//!
//! Every slot owns an equal share of the reassembly memory and collects the fragments of one
//! datagram at their offset in it. Received ranges are tracked with an `Assembler` whose fixed
//! capacity bounds the number of holes. Anything inconsistent drops the whole datagram, there is
//! no attempt to resolve conflicting overlaps.
use crate::buf::Buf;
use crate::managed::Slice;
use crate::storage::{Assembler, Contig};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{IpProtocol, Ipv4Address, Ipv4Repr, TtlProto};

use super::{Config, MAX_HOLES};

/// Identifies the fragments belonging to one datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Key {
    src_addr: Ipv4Address,
    dst_addr: Ipv4Address,
    protocol: IpProtocol,
    ident: u16,
}

/// The state of one datagram being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    key: Option<Key>,
    expires: Expiration,
    total_len: Option<usize>,
    ttl_proto: TtlProto,
    received: Assembler<[Contig; MAX_HOLES]>,
}

/// A completely reassembled datagram.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Complete<'r> {
    pub ttl_proto: TtlProto,
    pub payload: Buf<'r>,
}

/// All reassembly slots and their memory.
pub struct Reassembly<'a> {
    slots: Slice<'a, Slot>,
    buffer: Slice<'a, u8>,
    slot_len: usize,
}

impl Slot {
    /// Check if the slot currently collects a datagram.
    pub fn is_used(&self) -> bool {
        self.key.is_some()
    }

    fn free(&mut self) {
        *self = Slot::default();
    }
}

impl<'a> Reassembly<'a> {
    /// Create the reassembly, splitting the buffer evenly between all slots.
    pub fn new<S, B>(slots: S, buffer: B) -> Self
        where S: Into<Slice<'a, Slot>>, B: Into<Slice<'a, u8>>,
    {
        let mut slots = slots.into();
        slots.iter_mut().for_each(Slot::free);
        let buffer = buffer.into();
        let slot_len = match slots.len() {
            0 => 0,
            count => buffer.len() / count,
        };

        Reassembly {
            slots,
            buffer,
            slot_len,
        }
    }

    /// The largest datagram payload that can be reassembled.
    pub fn max_len(&self) -> usize {
        self.slot_len
    }

    /// The number of slots collecting a datagram.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_used()).count()
    }

    /// Drop all partial datagrams.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(Slot::free);
    }

    /// Add one fragment.
    ///
    /// Returns the datagram if this fragment completed it. Its memory stays valid until the
    /// reassembly is used again.
    pub(crate) fn add<'r>(
        &'r mut self,
        repr: &Ipv4Repr,
        payload: Buf,
        now: Instant,
        config: &Config,
    ) -> Option<Complete<'r>> {
        debug_assert!(repr.is_fragment());
        if payload.is_empty() {
            return None;
        }

        let key = Key {
            src_addr: repr.src_addr,
            dst_addr: repr.dst_addr,
            protocol: repr.ttl_proto.protocol(),
            ident: repr.ident,
        };

        let index = match self.find(now, key) {
            Some(index) => index,
            None => self.allocate(now, key, repr.ttl_proto, config)?,
        };

        let slot_len = self.slot_len;
        let slot = &mut self.slots[index];
        let memory = &mut self.buffer[index * slot_len..(index + 1) * slot_len];

        let offset = usize::from(repr.frag_offset);
        let end = offset + payload.len();
        let consistent = if end > slot_len {
            net_debug!("ip: datagram {} exceeds reassembly space", repr.ident);
            false
        } else if repr.more_frags {
            // Only the last fragment may end anywhere.
            payload.len() % 8 == 0 && slot.total_len.map_or(true, |total| end <= total)
        } else {
            slot.total_len.map_or(true, |total| total == end)
                && slot.received.end() as usize <= end
        };

        if !consistent || slot.received.add(offset as u32, payload.len() as u32).is_err() {
            net_debug!("ip: dropping reassembly of {}", repr.ident);
            slot.free();
            return None;
        }

        if !repr.more_frags {
            slot.total_len = Some(end);
        }
        payload.copy_out(&mut memory[offset..end]);

        let total = slot.total_len?;
        if !slot.received.is_complete(total as u32) {
            return None;
        }

        let ttl_proto = slot.ttl_proto;
        slot.free();
        Some(Complete {
            ttl_proto,
            payload: Buf::flat(&memory[..total]),
        })
    }

    /// Drop expired datagrams.
    pub fn poll(&mut self, now: Instant) {
        for slot in self.slots.iter_mut() {
            if slot.is_used() && slot.expires.is_expired(now) {
                net_debug!("ip: reassembly timed out");
                slot.free();
            }
        }
    }

    /// The earliest point at which `poll` needs to be called.
    pub fn next_deadline(&self) -> Expiration {
        self.slots.iter()
            .filter(|slot| slot.is_used())
            .map(|slot| slot.expires)
            .min()
            .unwrap_or(Expiration::Never)
    }

    fn find(&mut self, now: Instant, key: Key) -> Option<usize> {
        self.poll(now);
        self.slots.iter().position(|slot| slot.key == Some(key))
    }

    /// Take a free slot or the one closest to expiry.
    fn allocate(&mut self, now: Instant, key: Key, ttl_proto: TtlProto, config: &Config)
        -> Option<usize>
    {
        let index = self.slots.iter()
            .position(|slot| !slot.is_used())
            .or_else(|| self.slots.iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.expires)
                .map(|(index, _)| index))?;

        // A datagram does not outlive its hop limit in seconds.
        let lifetime = Duration::from_secs(u64::from(ttl_proto.ttl()))
            .min(config.reassembly_timeout);

        let slot = &mut self.slots[index];
        if slot.is_used() {
            net_debug!("ip: recycling reassembly slot {}", index);
        }
        slot.free();
        slot.key = Some(key);
        slot.ttl_proto = ttl_proto;
        slot.expires = Expiration::When(now + lifetime);
        Some(index)
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            key: None,
            expires: Expiration::Never,
            total_len: None,
            ttl_proto: TtlProto(0),
            received: Assembler::new([Contig::default(); MAX_HOLES]),
        }
    }
}
