/*! Low-level packet access and construction.

# An overview over packet representations

The `wire` module deals with the packet *representation*. It provides two levels of
functionality.

 * First, it provides functions to extract fields from sequences of octets, and to insert fields
   into sequences of octets. This happens in the lowercase structures e.g. [`ethernet_frame`] or
   [`ipv4_packet`]. These wrap the contiguous *header* bytes only.
 * Second, it provides a compact, high-level representation of header data that can be created from
   parsing and emitted into a sequence of octets. This happens through the `Repr` family of structs
   and enums, e.g. [`ArpRepr`] or [`Ipv4Repr`].

[`ethernet_frame`]: struct.ethernet_frame.html
[`ipv4_packet`]: struct.ipv4_packet.html
[`ArpRepr`]: struct.ArpRepr.html
[`Ipv4Repr`]: struct.Ipv4Repr.html

Payloads are never part of these structures. A packet travels through the stack as a [`Buf`], a
chain of segments, and only its headers are ever required to be contiguous. Where a checksum
covers the payload as well, as for ICMP and TCP, it is computed by streaming over the segments with
[`checksum::chain`]. Parsing always verifies checksums.

[`Buf`]: ../buf/struct.Buf.html
[`checksum::chain`]: ip/checksum/fn.chain.html

The lowercase family of data structures guarantees that, if the `packet::check_len()` method
returned `Ok(())`, then no field accessor or setter method will panic; however, the guarantee only
hold while specific fields are mutated, which are listed in the documentation for the specific
packet.

In the `Repr` family of data structures, the `Repr::parse()` method never panics and the
`Repr::emit()` method never panics as long as the underlying buffer is exactly `Repr::buffer_len()`
octets long if provided.

# Examples

To emit an IP packet header into an octet buffer, and then parse it back:

```rust
use embnet::wire::*;
let repr = Ipv4Repr {
    src_addr:    Ipv4Address::new(10, 0, 0, 1),
    dst_addr:    Ipv4Address::new(10, 0, 0, 2),
    ttl_proto:   TtlProto::new(64, IpProtocol::Tcp),
    ident:       0,
    dont_frag:   true,
    more_frags:  false,
    frag_offset: 0,
    payload_len: 10,
};
let mut buffer = [0; 30];
{ // emission
    let packet = ipv4_packet::new_unchecked_mut(&mut buffer[..repr.buffer_len()]);
    repr.emit(packet);
}
{ // parsing
    let packet = ipv4_packet::new_checked(&buffer)
        .expect("truncated packet");
    let (parsed, header_len) = Ipv4Repr::parse(packet, buffer.len())
        .expect("malformed packet");
    assert_eq!(repr, parsed);
    assert_eq!(header_len, 20);
}
```
*/
// Copyright (C) 2016 whitequark@whitequark.org
// Copyright (C) 2019 Andreas Molzer <andreas.molzer@tum.de>
//
// in large parts from `smoltcp` originally distributed under 0-clause BSD
//
// Applies to files in this folder unless otherwise noted. These are:
// * `arp.rs`
// * `error.rs`
// * `ethernet.rs`
// * `icmpv4.rs`
// * `ip.rs`
// * `ipv4.rs`
// * `mod.rs` (this file)
// * `tcp.rs`

// Accessors are named after the header fields they read.
#![allow(missing_docs)]

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
    pub(crate) type Rest  = ::core::ops::RangeFrom<usize>;
}

mod ethernet;
mod error;
pub mod arp;
pub mod ip;
mod ipv4;
pub mod icmpv4;
pub mod tcp;

pub use self::ethernet::{
    ethernet as ethernet_frame,
    EtherType as EthernetProtocol,
    Address as EthernetAddress,
    ParseAddressError as EthernetParseError,
    Repr as EthernetRepr,
    HEADER_LEN as ETHERNET_HEADER_LEN};

pub use self::error::{
    Error,
    Result};

pub use self::arp::{
    arp as arp_packet,
    Hardware as ArpHardware,
    Operation as ArpOperation,
    Repr as ArpRepr};

pub use self::ip::{
    Protocol as IpProtocol,
    TtlProto};

pub use self::ipv4::{
    ipv4 as ipv4_packet,
    Address as Ipv4Address,
    Repr as Ipv4Repr,
    HEADER_LEN as IPV4_HEADER_LEN,
    MAX_HEADER_LEN as IPV4_MAX_HEADER_LEN,
    MIN_MTU as IPV4_MIN_MTU};

pub use self::icmpv4::{
    icmpv4 as icmpv4_packet,
    Message as Icmpv4Message,
    DstUnreachable as Icmpv4DstUnreachable,
    Repr as Icmpv4Repr};

pub use self::tcp::{
    tcp as tcp_packet,
    SeqNumber as TcpSeqNumber,
    TcpOption,
    Repr as TcpRepr,
    Flags as TcpFlags};
