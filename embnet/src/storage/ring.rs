// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// Some parts from `smoltcp` originally distributed under 0-clause BSD
use core::cmp;

use crate::managed::Slice;

/// A ring buffer.
///
/// The buffer is a FIFO of elements in caller supplied memory. Besides the usual queue operations
/// it allows reading allocated elements at an offset without dequeuing them (for retransmission of
/// unacknowledged data) and writing into the unallocated space at an offset before enqueuing it
/// (for data that arrives out of order).
#[derive(Debug)]
pub struct RingBuffer<'a, T: 'a> {
    storage: Slice<'a, T>,
    read_at: usize,
    length: usize,
}

impl<'a, T: 'a> RingBuffer<'a, T> {
    /// Create a ring buffer with the given storage.
    ///
    /// During creation, every element in `storage` is reset.
    pub fn new<S>(storage: S) -> RingBuffer<'a, T>
        where S: Into<Slice<'a, T>>, T: Default,
    {
        let mut storage = storage.into();
        storage.iter_mut().for_each(|elem| *elem = T::default());
        RingBuffer {
            storage,
            read_at: 0,
            length: 0,
        }
    }

    /// Clear the ring buffer.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    /// Return the maximum number of elements in the ring buffer.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Return the current number of elements in the ring buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Return the number of elements that can be added to the ring buffer.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Query whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query whether the buffer is full.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    fn get_idx(&self, idx: usize) -> usize {
        let len = self.capacity();
        if len > 0 {
            (self.read_at + idx) % len
        } else {
            0
        }
    }

    /// Enqueue a single element, returning a reference to fill in.
    ///
    /// Returns `None` if the buffer is full.
    pub fn enqueue_one(&mut self) -> Option<&mut T> {
        if self.is_full() {
            return None;
        }

        let index = self.get_idx(self.length);
        self.length += 1;
        Some(&mut self.storage[index])
    }

    /// Dequeue a single element.
    ///
    /// Returns `None` if the buffer is empty.
    pub fn dequeue_one(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            return None;
        }

        let index = self.read_at;
        self.length -= 1;
        self.read_at = self.get_idx(1);
        Some(&mut self.storage[index])
    }

    /// Mark `count` elements of the unallocated space as allocated.
    ///
    /// # Panics
    /// This function panics if `count` exceeds the window.
    pub fn enqueue_unallocated(&mut self, count: usize) {
        assert!(count <= self.window());
        self.length += count;
    }

    /// Drop up to `count` allocated elements from the front.
    ///
    /// Returns the number of dropped elements.
    pub fn dequeue_allocated(&mut self, count: usize) -> usize {
        let count = cmp::min(count, self.length);
        // The position is kept when emptied, data written out of order stays in place.
        self.read_at = self.get_idx(count);
        self.length -= count;
        count
    }
}

impl<'a, T: Copy + 'a> RingBuffer<'a, T> {
    /// Enqueue as many elements of `data` as fit, returning their number.
    pub fn enqueue_slice(&mut self, data: &[T]) -> usize {
        let written = self.write_unallocated(0, data);
        self.enqueue_unallocated(written);
        written
    }

    /// Dequeue elements into `data`, returning their number.
    pub fn dequeue_slice(&mut self, data: &mut [T]) -> usize {
        let read = self.read_allocated(0, data);
        self.dequeue_allocated(read)
    }

    /// Write elements into the unallocated space after `offset` without enqueuing them.
    ///
    /// Returns the number of elements written, which is less than `data.len()` when the window
    /// ends earlier.
    pub fn write_unallocated(&mut self, offset: usize, data: &[T]) -> usize {
        let window = self.window();
        if offset >= window {
            return 0;
        }

        let amount = cmp::min(data.len(), window - offset);
        let start = self.get_idx(self.length + offset);
        let capacity = self.capacity();
        let first = cmp::min(amount, capacity - start);
        self.storage[start..start + first].copy_from_slice(&data[..first]);
        let second = amount - first;
        self.storage[..second].copy_from_slice(&data[first..amount]);
        amount
    }

    /// Read allocated elements starting at `offset` without dequeuing them.
    ///
    /// Returns the number of elements read.
    pub fn read_allocated(&self, offset: usize, data: &mut [T]) -> usize {
        if offset >= self.length {
            return 0;
        }

        let amount = cmp::min(data.len(), self.length - offset);
        let start = self.get_idx(offset);
        let capacity = self.capacity();
        let first = cmp::min(amount, capacity - start);
        data[..first].copy_from_slice(&self.storage[start..start + first]);
        let second = amount - first;
        data[first..amount].copy_from_slice(&self.storage[..second]);
        amount
    }
}

impl<'a, T: 'a> From<Slice<'a, T>> for RingBuffer<'a, T> {
    fn from(storage: Slice<'a, T>) -> Self {
        RingBuffer {
            storage,
            read_at: 0,
            length: 0,
        }
    }
}
