//! An assortment of non-owning containers.
//!
//! All memory of the stack is handed in by the caller. The containers here can be constructed
//! from borrowed slices instead of allocating resources dynamically, while tests and hosted
//! programs may still hand in a `Vec` with the `std` feature.
mod slice;

pub use self::slice::Slice;
