//! An allocation-free Ethernet, IPv4 and TCP engine for small devices.
//!
//! ## Table of contents
//!
//! This is also a recommended reading order but feel free to skip ahead, each chapter tries to be
//! somewhat self-contained.
//!
//! 1. [Highlights](#highlights)
//! 2. [Design](#design-and-relevant-core-concepts)
//! 3. [Packet buffers](buf/index.html)
//! 4. [The wire module](wire/index.html)
//! 5. [The layers](layer/index.html)
//!    1. [The eth layer](layer/eth/index.html)
//!    1. [The ip layer](layer/ip/index.html)
//!    1. [The tcp layer](layer/tcp/index.html)
//! 6. [Waiting for resources](retry/index.html)
//! 7. [Putting it together](stack/index.html)
//! 8. [Network interfaces](nic/index.html)
//! 9. Internals
//!    1. [The managed module](managed/index.html)
//!    2. [The storage module](storage/index.html)
//!
//! ## Highlights
//!
//! The most interesting features in overview:
//!
//! * Zero-copy packet chains, fragmentation never copies the payload
//! * TCP that keeps no packets around, segments are rebuilt from the send buffer on demand
//! * Blocked senders are woken by the resource they wait for, nothing busy-polls
//!
//! The packet codecs of the `wire` module descend from those of [`smoltcp`] by @whitequark,
//! through `ethox`. The layers above them are structured differently.
//!
//! [`smoltcp`]: https://github.com/m-labs/smoltcp
//!
//! ## Design and relevant core concepts
//!
//! The stack serves a single interface and runs on a single thread. It never blocks: every
//! operation returns immediately, and progress happens when the event loop calls back in with a
//! received frame, a driver change or an expired timer. See [`Stack`] for those entry points.
//!
//! Nothing within `embnet` *ever* dynamically allocates memory (and there is no arbitrary
//! recursion). Setup code explicitely passes in preallocated memory for every table, queue and
//! buffer instead of it being a runtime choice. The philosophy of upfront, explicit resource
//! management also extends beyond allocation. Connections, cache entries and reassembly slots
//! are fixed in number and running out of them is an ordinary error, never a crash.
//!
//! [`Stack`]: stack/struct.Stack.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

#[macro_use] mod macros;
pub mod buf;
pub mod layer;
pub mod managed;
pub mod nic;
pub mod retry;
pub mod stack;
pub mod storage;
pub mod time;
pub mod wire;
