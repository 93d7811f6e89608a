//! Implementation of a software loop-back device.
use byteorder::{ByteOrder, NetworkEndian};

use crate::buf::Buf;
use crate::layer::IpErr;
use crate::managed::Slice;
use crate::storage::RingBuffer;
use crate::wire::{EthernetAddress, ETHERNET_HEADER_LEN};

use super::{Driver, LinkState};

/// A software loop-back device.
///
/// Every transmitted frame is queued in a byte ring, prefixed with its length, until it is taken
/// out again with [`recv`]. The ring is the transmit queue: once it can not hold another frame
/// sending fails with `BufferFull`, which makes the device useful for exercising back pressure.
///
/// [`recv`]: #method.recv
pub struct Loopback<'r> {
    queue: RingBuffer<'r, u8>,
    mac: EthernetAddress,
    mtu: usize,
    link: LinkState,
    frames: usize,
}

const LEN_PREFIX: usize = 2;

impl<'r> Loopback<'r> {
    /// Create a loop-back device queueing frames in `buffer`.
    pub fn new<S>(buffer: S, mac: EthernetAddress, mtu: usize) -> Self
        where S: Into<Slice<'r, u8>>,
    {
        Loopback {
            queue: RingBuffer::new(buffer),
            mac,
            mtu,
            link: LinkState::Up,
            frames: 0,
        }
    }

    /// Change the reported link state.
    ///
    /// The stack only learns about it through `Stack::link_changed`.
    pub fn set_link_state(&mut self, link: LinkState) {
        self.link = link;
    }

    /// The number of queued frames.
    pub fn pending(&self) -> usize {
        self.frames
    }

    /// Take the oldest queued frame.
    ///
    /// Returns the length of the frame. Bytes that do not fit into `buffer` are discarded.
    pub fn recv(&mut self, buffer: &mut [u8]) -> Option<usize> {
        if self.frames == 0 {
            return None;
        }

        let mut prefix = [0; LEN_PREFIX];
        self.queue.dequeue_slice(&mut prefix);
        let len = usize::from(NetworkEndian::read_u16(&prefix));
        let copied = self.queue.read_allocated(0, buffer);
        self.queue.dequeue_allocated(len);
        self.frames -= 1;
        Some(copied.min(len))
    }

    /// Drop all queued frames.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.frames = 0;
    }
}

impl Driver for Loopback<'_> {
    fn send_frame(&mut self, frame: Buf<'_>) -> Result<(), IpErr> {
        if self.link == LinkState::Down {
            return Err(IpErr::LinkDown);
        }

        if frame.len() > self.mtu + ETHERNET_HEADER_LEN {
            return Err(IpErr::HwError);
        }

        if self.queue.window() < frame.len() + LEN_PREFIX {
            return Err(IpErr::BufferFull);
        }

        let mut prefix = [0; LEN_PREFIX];
        NetworkEndian::write_u16(&mut prefix, frame.len() as u16);
        self.queue.enqueue_slice(&prefix);
        for chunk in frame.chunks() {
            self.queue.enqueue_slice(chunk);
        }
        self.frames += 1;
        Ok(())
    }

    fn mac_addr(&self) -> EthernetAddress {
        self.mac
    }

    fn link_mtu(&self) -> usize {
        self.mtu
    }

    fn link_state(&self) -> LinkState {
        self.link
    }
}
