//! Specialized containers over caller supplied memory.
//!
//! Both structures only ever bookkeep indices into a `Slice` they were given at construction.
//! The [`Assembler`] tracks which ranges of a byte stream or datagram have arrived, while the
//! [`RingBuffer`] stores the actual bytes of TCP streams and queued events.
//!
//! [`Assembler`]: struct.Assembler.html
//! [`RingBuffer`]: struct.RingBuffer.html
pub mod assembler;
mod ring;

pub use self::assembler::{Assembler, AssemblerIter, Contig};
pub use self::ring::RingBuffer;
