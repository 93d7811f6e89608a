use core::{borrow, fmt, ops};

/// The contig list of an assembler, without its container.
#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
#[allow(non_camel_case_types)]
pub struct assembly {
    contigs: [Contig],
}

/// A bounded tracker of received byte ranges.
///
/// Ranges are added in any order. Overlapping and adjacent ranges are merged; the number of
/// disjoint ranges that can be tracked is the length of the container. This bounds the number of
/// holes of a reassembled IP datagram and of the out-of-order data of a TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Assembler<C> {
    container: C,
}

/// An iterator over the `(start, end)` data ranges of an assembly.
pub struct AssemblerIter<'a> {
    assembler: &'a assembly,
    index: usize,
    offset: u32,
}

/// A contiguous chunk of absent data, followed by a contiguous chunk of present data.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contig {
    hole_size: u32,
    data_size: u32,
}

impl Contig {
    fn empty() -> Contig {
        Contig { hole_size: 0, data_size: 0 }
    }

    fn hole_and_data(hole_size: u32, data_size: u32) -> Contig {
        Contig { hole_size, data_size }
    }

    fn has_hole(&self) -> bool {
        self.hole_size != 0
    }

    fn has_data(&self) -> bool {
        self.data_size != 0
    }

    fn total_size(&self) -> u32 {
        self.hole_size + self.data_size
    }
}

impl fmt::Display for Contig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_hole() { write!(f, "({})", self.hole_size)?; }
        if self.has_hole() && self.has_data() { write!(f, " ")?; }
        if self.has_data() { write!(f, "{}",   self.data_size)?; }
        Ok(())
    }
}

impl fmt::Display for assembly {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for contig in self.contigs.iter().take_while(|contig| contig.has_data()) {
            write!(f, "{} ", contig)?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

impl assembly {
    fn from_slice_unchecked(contigs: &[Contig]) -> &Self {
        // SAFETY: this is safe due to repr(transparent)
        unsafe { &*(contigs as *const [Contig] as *const assembly) }
    }

    fn from_mut_slice_unchecked(contigs: &mut [Contig]) -> &mut Self {
        // SAFETY: this is safe due to repr(transparent)
        unsafe { &mut *(contigs as *mut [Contig] as *mut assembly) }
    }

    /// Forget all ranges.
    pub fn clear(&mut self) {
        self.contigs.iter_mut().for_each(|v| *v = Contig::empty());
    }

    /// Return whether the assembler contains no data.
    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// The number of disjoint data ranges.
    pub fn used(&self) -> usize {
        self.contigs.iter().take_while(|contig| contig.has_data()).count()
    }

    /// The maximum number of disjoint data ranges.
    pub fn capacity(&self) -> usize {
        self.contigs.len()
    }

    /// The number of bytes available contiguously from offset `0`.
    pub fn front(&self) -> u32 {
        match self.contigs.first() {
            Some(first) if !first.has_hole() => first.data_size,
            _ => 0,
        }
    }

    /// The end of the last data range.
    pub fn end(&self) -> u32 {
        self.contigs.iter()
            .take_while(|contig| contig.has_data())
            .map(Contig::total_size)
            .sum()
    }

    /// Check whether exactly the range `0..len` has been received.
    pub fn is_complete(&self, len: u32) -> bool {
        self.used() == 1 && self.front() == len
    }

    /// Remove the data available at the front and make its end the new offset `0`.
    ///
    /// Returns the number of removed bytes.
    pub fn reduce_front(&mut self) -> u32 {
        let front = self.front();
        if front > 0 {
            let used = self.used();
            self.contigs[..used].rotate_left(1);
            self.contigs[used - 1] = Contig::empty();
        }
        front
    }

    /// Move the offset `0` forward by `count` bytes that were never received.
    ///
    /// Data ranges before the new origin are cut off.
    pub fn advance(&mut self, count: u32) {
        let mut remaining = count;
        while remaining > 0 {
            let first = match self.contigs.first_mut() {
                Some(first) if first.has_data() => first,
                _ => return,
            };

            if remaining < first.hole_size {
                first.hole_size -= remaining;
                return;
            }

            remaining -= first.hole_size;
            first.hole_size = 0;
            if remaining < first.data_size {
                first.data_size -= remaining;
                return;
            }

            remaining -= first.data_size;
            first.data_size = 0;
            let used = self.used_from(1) + 1;
            self.contigs[..used].rotate_left(1);
            self.contigs[used - 1] = Contig::empty();
        }
    }

    fn used_from(&self, start: usize) -> usize {
        self.contigs[start..].iter().take_while(|contig| contig.has_data()).count()
    }

    /// Add a new contiguous range `start..start+size` to the assembler.
    ///
    /// Returns `Err(())` without modifying the assembler if the range is disjoint from all
    /// present ranges and no further range can be tracked.
    ///
    /// ## Example
    ///
    /// ```
    /// # use embnet::storage::{Contig, Assembler};
    /// let mut asm = Assembler::new([Contig::default(); 2]);
    ///
    /// // Add four bytes not at the start.
    /// assert_eq!(asm.add(4, 4), Ok(()));
    /// // Add missing four bytes at the start, which assembles the chunk.
    /// assert_eq!(asm.add(0, 4), Ok(()));
    /// assert_eq!(asm.front(), 8);
    /// ```
    pub fn add(&mut self, start: u32, size: u32) -> Result<(), ()> {
        if size == 0 {
            return Ok(());
        }

        let end = start + size;
        let used = self.used();

        // First range ending at or after `start`, i.e. the first range we touch or precede.
        let mut first = used;
        let mut first_start = 0;
        // End of the range preceding `first`.
        let mut prev_end = 0;
        let mut offset = 0;
        for (idx, contig) in self.contigs[..used].iter().enumerate() {
            let range_start = offset + contig.hole_size;
            let range_end = range_start + contig.data_size;
            if range_end >= start {
                first = idx;
                first_start = range_start;
                break;
            }
            prev_end = range_end;
            offset = range_end;
        }

        // Find the last range starting at or before `end`.
        let mut last = None;
        let mut last_end = 0;
        let mut offset = prev_end;
        for (idx, contig) in self.contigs[first..used].iter().enumerate() {
            let range_start = offset + contig.hole_size;
            let range_end = range_start + contig.data_size;
            if range_start > end {
                break;
            }
            last = Some(first + idx);
            last_end = range_end;
            offset = range_end;
        }

        match last {
            None => {
                // Disjoint from everything, insert before `first`.
                if used == self.contigs.len() {
                    return Err(());
                }

                self.contigs[first..=used].rotate_right(1);
                self.contigs[first] = Contig::hole_and_data(start - prev_end, size);
                if first < used {
                    // The following range now starts after our end.
                    self.contigs[first + 1].hole_size -= end - prev_end;
                }
            },
            Some(last) => {
                let new_start = start.min(first_start);
                let new_end = end.max(last_end);
                self.contigs[first] = Contig::hole_and_data(new_start - prev_end, new_end - new_start);
                if last + 1 < used {
                    let next_start = last_end + self.contigs[last + 1].hole_size;
                    self.contigs[last + 1].hole_size = next_start - new_end;
                }

                let absorbed = last - first;
                if absorbed > 0 {
                    self.contigs[first + 1..used].rotate_left(absorbed);
                    self.contigs[used - absorbed..used]
                        .iter_mut()
                        .for_each(|v| *v = Contig::empty());
                }
            },
        }

        Ok(())
    }

    /// Iterate over all of the contiguous data ranges.
    ///
    /// ```text
    ///    Data        Hole        Data
    /// |--- 100 ---|--- 200 ---|--- 100 ---|
    ///
    /// ```
    ///
    /// This would return the ranges: ``(0, 100), (300, 400)``
    pub fn iter_data(&self) -> AssemblerIter<'_> {
        AssemblerIter {
            assembler: self,
            index: 0,
            offset: 0,
        }
    }
}

impl<C> Assembler<C> {
    /// Wrap a container of contigs, forgetting its previous content.
    pub fn new(mut container: C) -> Self
        where C: borrow::BorrowMut<[Contig]>,
    {
        assembly::from_mut_slice_unchecked(container.borrow_mut()).clear();
        Assembler { container }
    }

    /// Unwrap the underlying container.
    pub fn into_inner(self) -> C {
        self.container
    }
}

impl<C: borrow::Borrow<[Contig]>> ops::Deref for Assembler<C> {
    type Target = assembly;

    fn deref(&self) -> &assembly {
        assembly::from_slice_unchecked(self.container.borrow())
    }
}

impl<C: borrow::BorrowMut<[Contig]>> ops::DerefMut for Assembler<C> {
    fn deref_mut(&mut self) -> &mut assembly {
        assembly::from_mut_slice_unchecked(self.container.borrow_mut())
    }
}

impl<'a> Iterator for AssemblerIter<'a> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        let contig = self.assembler.contigs.get(self.index)?;
        if !contig.has_data() {
            return None;
        }

        let left = self.offset + contig.hole_size;
        let right = left + contig.data_size;
        self.offset = right;
        self.index += 1;
        Some((left, right))
    }
}
