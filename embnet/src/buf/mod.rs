//! Scatter/gather packet buffers.
//!
//! Packet data lives in the memory of a [`Pool`]. The pool also holds a small arena of segment
//! descriptors, each naming a range of that memory and optionally the descriptor of the following
//! range. A packet is then described by a [`BufRef`]: a head descriptor, an offset into it and a
//! total length. None of this is ever copied while a packet moves through the layers.
//!
//! * To read a packet, borrow the pool and turn the reference into a [`Buf`]. All accessors walk
//!   the descriptors and cross segment boundaries transparently.
//! * Headers are prepended by moving the start of the reference back into the headroom of its
//!   head segment, see [`BufRef::reveal_header`]. Senders therefore allocate their payload with
//!   some headroom, [`Pool::alloc`] does exactly that.
//! * Several descriptors may name the same memory. This lets the IP layer cut a large payload into
//!   fragments by pushing two descriptors per fragment instead of copying any data.
//!
//! Descriptors are allocated like a stack. Take a [`Mark`] before pushing temporary descriptors
//! and release it once the packet using them has been handed to the driver.
//!
//! [`Pool`]: struct.Pool.html
//! [`Pool::alloc`]: struct.Pool.html#method.alloc
//! [`BufRef`]: struct.BufRef.html
//! [`BufRef::reveal_header`]: struct.BufRef.html#method.reveal_header
//! [`Buf`]: struct.Buf.html
//! [`Mark`]: struct.Mark.html
use core::{cmp, fmt, mem, ops};

use crate::managed::Slice;

/// Index of a segment descriptor in its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentId(usize);

/// A descriptor of a range of pool memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Segment {
    /// The first byte of the range in the pool memory.
    pub start: usize,
    /// The length of the range.
    pub len: usize,
    /// The segment holding the bytes after this one.
    pub next: Option<SegmentId>,
}

/// A saved allocation state of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark {
    segments: usize,
    memory: usize,
}

/// A reference to bytes of a pool.
///
/// This is a plain index structure and does not borrow the pool. It is turned into a readable
/// [`Buf`] with [`Pool::buf`].
///
/// [`Buf`]: struct.Buf.html
/// [`Pool::buf`]: struct.Pool.html#method.buf
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufRef {
    /// The first segment.
    pub head: SegmentId,
    /// Offset of the first byte, relative to the start of the head segment.
    pub offset: usize,
    /// The number of bytes, possibly spanning many segments.
    pub len: usize,
}

/// Caller supplied memory for packets and their segment descriptors.
pub struct Pool<'a> {
    memory: Slice<'a, u8>,
    segments: Slice<'a, Segment>,
    used: usize,
    allocated: usize,
}

/// A read-only view of a chain of segments.
///
/// This is the type handed to drivers and passed up the receive path. It borrows memory and
/// descriptors immutably and is cheap to copy.
#[derive(Clone, Copy)]
pub struct Buf<'p> {
    memory: &'p [u8],
    segments: &'p [Segment],
    head: SegmentId,
    offset: usize,
    len: usize,
}

/// Iterator over the contiguous byte slices of a `Buf`.
#[derive(Clone)]
pub struct Chunks<'p> {
    memory: &'p [u8],
    ranges: Ranges<'p>,
}

/// Iterator over memory ranges, shared by reading and writing.
#[derive(Clone)]
struct Ranges<'p> {
    segments: &'p [Segment],
    next: Option<SegmentId>,
    offset: usize,
    remaining: usize,
}

/// A descriptor covering all of a flat slice.
static FLAT: [Segment; 1] = [Segment { start: 0, len: usize::max_value(), next: None }];

impl SegmentId {
    /// The index of the descriptor.
    pub fn index(self) -> usize {
        self.0
    }
}

impl BufRef {
    /// Extend the reference to the front into the reserved space of its head segment.
    ///
    /// Returns `None` if fewer than `n` bytes precede the referenced data in the head segment.
    pub fn reveal_header(self, n: usize) -> Option<BufRef> {
        let offset = self.offset.checked_sub(n)?;
        Some(BufRef {
            head: self.head,
            offset,
            len: self.len + n,
        })
    }

    /// Skip `n` bytes at the front.
    pub fn sub_from(self, n: usize) -> BufRef {
        debug_assert!(n <= self.len);
        let n = cmp::min(n, self.len);
        BufRef {
            head: self.head,
            offset: self.offset + n,
            len: self.len - n,
        }
    }

    /// Truncate to the first `n` bytes.
    pub fn sub_to(self, n: usize) -> BufRef {
        debug_assert!(n <= self.len);
        BufRef {
            len: cmp::min(n, self.len),
            ..self
        }
    }
}

impl<'a> Pool<'a> {
    /// Create a pool from memory and descriptor storage.
    pub fn new<M, S>(memory: M, segments: S) -> Self
        where M: Into<Slice<'a, u8>>, S: Into<Slice<'a, Segment>>,
    {
        Pool {
            memory: memory.into(),
            segments: segments.into(),
            used: 0,
            allocated: 0,
        }
    }

    /// The number of bytes of memory.
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// The number of bytes not yet handed out by `alloc`.
    pub fn available(&self) -> usize {
        self.memory.len() - self.allocated
    }

    /// The number of descriptors that can still be pushed.
    pub fn free_segments(&self) -> usize {
        self.segments.len() - self.used
    }

    /// Push a new segment descriptor.
    ///
    /// Returns `None` if the range is not within the pool memory or all descriptors are in use.
    pub fn push(&mut self, start: usize, len: usize, next: Option<SegmentId>) -> Option<SegmentId> {
        let end = start.checked_add(len)?;
        if end > self.memory.len() || self.used == self.segments.len() {
            return None;
        }

        debug_assert!(next.map_or(true, |next| next.0 < self.used));
        let id = SegmentId(self.used);
        self.segments[self.used] = Segment { start, len, next };
        self.used += 1;
        Some(id)
    }

    /// Get a copy of a pushed descriptor.
    pub fn segment(&self, id: SegmentId) -> Option<Segment> {
        self.segments[..self.used].get(id.0).copied()
    }

    /// Remember the current allocation state.
    pub fn mark(&self) -> Mark {
        Mark {
            segments: self.used,
            memory: self.allocated,
        }
    }

    /// Free all descriptors and memory allocated since the mark was taken.
    pub fn release(&mut self, mark: Mark) {
        debug_assert!(mark.segments <= self.used && mark.memory <= self.allocated);
        self.used = cmp::min(mark.segments, self.used);
        self.allocated = cmp::min(mark.memory, self.allocated);
    }

    /// Free everything.
    pub fn clear(&mut self) {
        self.used = 0;
        self.allocated = 0;
    }

    /// Allocate `len` bytes preceded by `headroom` reserved bytes in a single segment.
    ///
    /// The returned reference covers only the `len` bytes. Headers can later be revealed in front
    /// of them.
    pub fn alloc(&mut self, headroom: usize, len: usize) -> Option<BufRef> {
        let start = self.allocated;
        let total = headroom.checked_add(len)?;
        let head = self.push(start, total, None)?;
        self.allocated = start + total;
        Some(BufRef { head, offset: headroom, len })
    }

    /// Describe consecutive memory starting at `start` with a chain of segments of the given
    /// lengths.
    ///
    /// The memory is not reserved against `alloc`; the caller decides which bytes it names.
    pub fn carve(&mut self, start: usize, lens: &[usize]) -> Option<BufRef> {
        let total: usize = lens.iter().sum();
        if lens.is_empty() || start.checked_add(total)? > self.memory.len() {
            return None;
        }

        let mark = self.mark();
        let mut next = None;
        let mut end = start + total;
        // Build from the back so that each descriptor knows its successor.
        for &len in lens.iter().rev() {
            end -= len;
            match self.push(end, len, next) {
                Some(id) => next = Some(id),
                None => {
                    self.release(mark);
                    return None;
                },
            }
        }

        let head = next?;
        Some(BufRef { head, offset: 0, len: total })
    }

    /// A descriptor chain for the bytes of `buf` from offset `at` on.
    ///
    /// The new head segment starts exactly at the byte so that another segment can link to it.
    pub fn split_off(&mut self, buf: BufRef, at: usize) -> Option<BufRef> {
        debug_assert!(at <= buf.len);
        let (id, offset) = seek(&self.segments[..self.used], buf.head, buf.offset + at);
        let seg = self.segment(id)?;
        let start = seg.start.checked_add(offset)?;
        let head = self.push(start, seg.len.checked_sub(offset)?, seg.next)?;
        Some(BufRef { head, offset: 0, len: buf.len - at })
    }

    /// Link the contiguous bytes of `front` to the bytes of `back`.
    ///
    /// The head segment of the result also covers the bytes preceding `front` in its segment,
    /// which stay available to `reveal_header`. The original descriptors are not modified.
    pub fn chain(&mut self, front: BufRef, back: BufRef) -> Option<BufRef> {
        let (id, offset) = seek(&self.segments[..self.used], front.head, front.offset);
        let seg = self.segment(id)?;
        if offset + front.len > seg.len {
            return None;
        }

        let back = if back.offset == 0 { back } else { self.split_off(back, 0)? };
        let head = self.push(seg.start, offset + front.len, Some(back.head))?;
        Some(BufRef {
            head,
            offset,
            len: front.len + back.len,
        })
    }

    /// View referenced bytes.
    pub fn buf(&self, buf: BufRef) -> Buf<'_> {
        Buf {
            memory: &self.memory,
            segments: &self.segments[..self.used],
            head: buf.head,
            offset: buf.offset,
            len: buf.len,
        }
    }

    /// Copy data into the front of the referenced bytes.
    ///
    /// Returns the number of copied bytes.
    pub fn copy_in(&mut self, buf: BufRef, data: &[u8]) -> usize {
        let ranges = Ranges::new(&self.segments[..self.used], buf);
        let memory = self.memory.as_mut_slice();
        let mut copied = 0;
        for range in ranges {
            if copied == data.len() {
                break;
            }
            let target = match memory.get_mut(range) {
                Some(target) => target,
                None => break,
            };
            let count = cmp::min(target.len(), data.len() - copied);
            target[..count].copy_from_slice(&data[copied..copied + count]);
            copied += count;
        }
        copied
    }

    /// Mutable access to the first `n` referenced bytes, if they are contiguous.
    pub fn header_mut(&mut self, buf: BufRef, n: usize) -> Option<&mut [u8]> {
        if n > buf.len {
            return None;
        }

        let (id, offset) = seek(&self.segments[..self.used], buf.head, buf.offset);
        let seg = self.segment(id)?;
        if offset + n > seg.len {
            return None;
        }

        let start = seg.start + offset;
        self.memory.get_mut(start..start + n)
    }

    /// All of the pool memory.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }
}

impl<'p> Buf<'p> {
    /// View a contiguous slice as a single segment chain.
    pub fn flat(data: &'p [u8]) -> Self {
        Buf {
            memory: data,
            segments: &FLAT,
            head: SegmentId(0),
            offset: 0,
            len: data.len(),
        }
    }

    /// The number of bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The index structure describing these bytes.
    ///
    /// Only meaningful for the pool the buffer was borrowed from.
    pub fn handle(&self) -> BufRef {
        BufRef {
            head: self.head,
            offset: self.offset,
            len: self.len,
        }
    }

    /// The byte at index `i`.
    pub fn at(&self, i: usize) -> u8 {
        debug_assert!(i < self.len);
        self.sub_from(i)
            .chunks()
            .next()
            .map_or(0, |chunk| chunk[0])
    }

    /// Skip `n` bytes at the front.
    pub fn sub_from(&self, n: usize) -> Buf<'p> {
        debug_assert!(n <= self.len);
        let n = cmp::min(n, self.len);
        let (head, offset) = seek(self.segments, self.head, self.offset + n);
        Buf {
            head,
            offset,
            len: self.len - n,
            ..*self
        }
    }

    /// Truncate to the first `n` bytes.
    pub fn sub_to(&self, n: usize) -> Buf<'p> {
        debug_assert!(n <= self.len);
        Buf {
            len: cmp::min(n, self.len),
            ..*self
        }
    }

    /// The `len` bytes starting at `offset`.
    pub fn range(&self, offset: usize, len: usize) -> Buf<'p> {
        self.sub_from(offset).sub_to(len)
    }

    /// Iterate over the contiguous pieces of memory.
    pub fn chunks(&self) -> Chunks<'p> {
        Chunks {
            memory: self.memory,
            ranges: Ranges::new(self.segments, self.handle()),
        }
    }

    /// Iterate over all bytes.
    pub fn bytes(&self) -> impl Iterator<Item=u8> + 'p {
        self.chunks().flat_map(|chunk| chunk.iter().copied())
    }

    /// Compare the content with another buffer.
    ///
    /// The segment structure of both buffers is irrelevant.
    pub fn equal_to(&self, other: &Buf) -> bool {
        self.len == other.len && self.bytes().eq(other.bytes())
    }

    /// Check if the buffer starts with the given bytes.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.len >= prefix.len()
            && self.bytes().zip(prefix.iter()).all(|(a, &b)| a == b)
    }

    /// Remove a prefix if the buffer starts with it.
    pub fn remove_prefix(&mut self, prefix: &[u8]) -> bool {
        if self.starts_with(prefix) {
            *self = self.sub_from(prefix.len());
            true
        } else {
            false
        }
    }

    /// Copy bytes from the front into `data`.
    ///
    /// Returns the number of copied bytes, the smaller of both lengths.
    pub fn copy_out(&self, data: &mut [u8]) -> usize {
        let mut copied = 0;
        for chunk in self.chunks() {
            if copied == data.len() {
                break;
            }
            let count = cmp::min(chunk.len(), data.len() - copied);
            data[copied..copied + count].copy_from_slice(&chunk[..count]);
            copied += count;
        }
        copied
    }

    /// The first `n` bytes, if they are contiguous in memory.
    pub fn header(&self, n: usize) -> Option<&'p [u8]> {
        if n > self.len {
            return None;
        }
        if n == 0 {
            return Some(&[]);
        }
        self.chunks()
            .next()
            .filter(|chunk| chunk.len() >= n)
            .map(|chunk| &chunk[..n])
    }
}

impl fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buf")
            .field("head", &self.head)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl<'p> Ranges<'p> {
    fn new(segments: &'p [Segment], buf: BufRef) -> Self {
        Ranges {
            segments,
            next: Some(buf.head),
            offset: buf.offset,
            remaining: buf.len,
        }
    }
}

impl Iterator for Ranges<'_> {
    type Item = ops::Range<usize>;

    fn next(&mut self) -> Option<ops::Range<usize>> {
        while self.remaining > 0 {
            let seg = self.segments.get(self.next?.0)?;
            self.next = seg.next;
            let offset = mem::replace(&mut self.offset, 0);
            if offset >= seg.len {
                self.offset = offset - seg.len;
                continue;
            }

            let take = cmp::min(seg.len - offset, self.remaining);
            self.remaining -= take;
            let start = seg.start + offset;
            return Some(start..start + take);
        }
        None
    }
}

impl<'p> Iterator for Chunks<'p> {
    type Item = &'p [u8];

    fn next(&mut self) -> Option<&'p [u8]> {
        let range = self.ranges.next()?;
        self.memory.get(range)
    }
}

/// Walk forward until `offset` lies within the segment or no segment follows.
fn seek(segments: &[Segment], mut head: SegmentId, mut offset: usize) -> (SegmentId, usize) {
    while let Some(seg) = segments.get(head.0) {
        match seg.next {
            Some(next) if offset >= seg.len => {
                offset -= seg.len;
                head = next;
            },
            _ => break,
        }
    }
    (head, offset)
}
