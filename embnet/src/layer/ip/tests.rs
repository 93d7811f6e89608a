use crate::buf::{Buf, Pool, Segment};
use crate::layer::IpErr;
use crate::layer::eth::{self, ArpEntry, Eth};
use crate::nic::Loopback;
use crate::retry::{ListHead, Request};
use crate::time::Instant;
use crate::wire::{
    arp_packet,
    ethernet_frame,
    icmpv4_packet,
    ipv4_packet,
    ArpOperation,
    ArpRepr,
    EthernetAddress,
    EthernetProtocol,
    EthernetRepr,
    Icmpv4DstUnreachable,
    Icmpv4Repr,
    IpProtocol,
    Ipv4Address,
    Ipv4Repr,
    TtlProto,
    ETHERNET_HEADER_LEN,
    IPV4_HEADER_LEN,
};

use super::*;

const MAC_ADDR_HOST: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
const IP_ADDR_HOST: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const MAC_ADDR_OTHER: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
const IP_ADDR_OTHER: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

fn endpoint(mac: EthernetAddress, addr: Ipv4Address, mtu: usize)
    -> Ip<'static, Loopback<'static>>
{
    let nic = Loopback::new(vec![0; 8192], mac, mtu);
    let eth = Eth::new(nic, eth::Storage {
        arp: vec![ArpEntry::default(); 2].into(),
        requests: vec![Request::default(); 2].into(),
        lists: vec![ListHead::default(); 3].into(),
        hold: vec![0; 2 * 128].into(),
    }, eth::Config::default());

    let mut ip = Ip::new(eth, Storage {
        reassembly: vec![ReassemblySlot::default(); 2].into(),
        reassembly_buffer: vec![0; 2 * 4096].into(),
        pmtu: vec![PmtuEntry::default(); 2].into(),
    }, Config::default());
    ip.set_ip4_addrs(Some((addr, 24)));
    ip
}

fn buffers(len: usize) -> Pool<'static> {
    Pool::new(vec![0; len], vec![Segment::default(); 16])
}

/// Make a host known to the neighbor cache.
fn learn(ip: &mut Ip<Loopback>, mac: EthernetAddress, addr: Ipv4Address) {
    let own_mac = ip.eth().mac_addr();
    let own_addr = ip.ip4_addrs().unwrap().addr;
    let mut frame = [0; 42];
    EthernetRepr {
        src_addr: mac,
        dst_addr: own_mac,
        ethertype: EthernetProtocol::Arp,
    }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));
    ArpRepr {
        operation: ArpOperation::Reply,
        source_hardware_addr: mac,
        source_protocol_addr: addr,
        target_hardware_addr: own_mac,
        target_protocol_addr: own_addr,
    }.emit(arp_packet::new_unchecked_mut(&mut frame[ETHERNET_HEADER_LEN..]));

    let mut tx = buffers(64);
    assert!(ip.recv(Buf::flat(&frame), &mut tx, Instant::from_millis(0)).is_none());
    assert_eq!(ip.eth().cache().lookup(addr), Some(mac));
}

/// Take all frames sent so far.
fn take_frames(ip: &mut Ip<Loopback>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut buffer = [0; 2048];
    while let Some(len) = ip.eth_mut().driver_mut().recv(&mut buffer) {
        frames.push(buffer[..len].to_vec());
    }
    frames
}

fn parse_ip(frame: &[u8]) -> Ipv4Repr {
    let packet = &frame[ETHERNET_HEADER_LEN..];
    let (repr, header_len) = Ipv4Repr::parse(ipv4_packet::new_checked(packet).unwrap(), packet.len())
        .expect("valid ipv4 header");
    assert_eq!(header_len, IPV4_HEADER_LEN);
    repr
}

/// Build a complete frame from the other host.
fn frame_from_other(repr: Ipv4Repr, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0; HEADROOM + payload.len()];
    EthernetRepr {
        src_addr: MAC_ADDR_OTHER,
        dst_addr: MAC_ADDR_HOST,
        ethertype: EthernetProtocol::Ipv4,
    }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));
    repr.emit(ipv4_packet::new_unchecked_mut(&mut frame[ETHERNET_HEADER_LEN..HEADROOM]));
    frame[HEADROOM..].copy_from_slice(payload);
    frame
}

fn header_from_other(protocol: IpProtocol, payload_len: usize) -> Ipv4Repr {
    Ipv4Repr {
        src_addr: IP_ADDR_OTHER,
        dst_addr: IP_ADDR_HOST,
        ttl_proto: TtlProto::new(64, protocol),
        ident: 0x1234,
        dont_frag: false,
        more_frags: false,
        frag_offset: 0,
        payload_len,
    }
}

#[test]
fn simple_ipv4() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);

    let mut pool = buffers(256);
    let payload = pool.alloc(HEADROOM, 50).unwrap();
    pool.copy_in(payload, &[0xaa; 50]);
    let flags = SendFlags { dont_fragment: true };
    assert_eq!(
        ip.send_dgram(&mut pool, payload, IP_ADDR_OTHER, TtlProto::new(64, IpProtocol::Udp), flags, None, now),
        Ok(()));

    let frames = take_frames(&mut ip);
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.len(), HEADROOM + 50);
    let eth = EthernetRepr::parse(ethernet_frame::new_unchecked(&frame[..ETHERNET_HEADER_LEN])).unwrap();
    assert_eq!(eth.dst_addr, MAC_ADDR_OTHER);
    assert_eq!(eth.ethertype, EthernetProtocol::Ipv4);

    let repr = parse_ip(frame);
    assert_eq!(repr.src_addr, IP_ADDR_HOST);
    assert_eq!(repr.dst_addr, IP_ADDR_OTHER);
    assert_eq!(repr.ttl_proto.protocol(), IpProtocol::Udp);
    assert_eq!(repr.payload_len, 50);
    assert!(repr.dont_frag);
    assert!(!repr.is_fragment());
    assert_eq!(&frame[HEADROOM..], &[0xaa; 50][..]);
}

#[test]
fn fragment_and_reassemble() {
    let now = Instant::from_millis(0);
    let mut sender = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 576);
    let mut receiver = endpoint(MAC_ADDR_OTHER, IP_ADDR_OTHER, 1500);
    learn(&mut sender, MAC_ADDR_OTHER, IP_ADDR_OTHER);

    let data: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
    let mut pool = buffers(4096);
    let payload = pool.alloc(HEADROOM, data.len()).unwrap();
    pool.copy_in(payload, &data);
    let segments = pool.free_segments();

    let ttl_proto = TtlProto::new(64, IpProtocol::Udp);
    assert_eq!(
        sender.send_dgram(&mut pool, payload, IP_ADDR_OTHER, ttl_proto, SendFlags::default(), None, now),
        Ok(()));
    // All fragment descriptors were released again.
    assert_eq!(pool.free_segments(), segments);

    let frames = take_frames(&mut sender);
    assert_eq!(frames.len(), 4);
    let reprs: Vec<Ipv4Repr> = frames.iter().map(|frame| parse_ip(frame)).collect();
    let offsets: Vec<u16> = reprs.iter().map(|repr| repr.frag_offset).collect();
    // Every fragment but the last carries the largest multiple of eight fitting into 576 - 20
    // bytes, which is 552 and not a smaller multiple.
    assert_eq!(offsets, vec![0, 552, 1104, 1656]);
    for (frame, repr) in frames.iter().zip(&reprs) {
        assert!(frame.len() - ETHERNET_HEADER_LEN <= 576);
        assert_eq!(repr.ident, reprs[0].ident);
        assert_eq!(&frame[HEADROOM..], &data[usize::from(repr.frag_offset)..][..repr.payload_len]);
    }
    assert!(reprs[..3].iter().all(|repr| repr.more_frags && repr.payload_len % 8 == 0));
    assert!(!reprs[3].more_frags);
    assert_eq!(reprs[3].payload_len, 2000 - 1656);

    // Deliver in reverse order.
    let mut tx = buffers(64);
    for frame in frames[1..].iter().rev() {
        assert!(receiver.recv(Buf::flat(frame), &mut tx, now).is_none());
    }
    match receiver.recv(Buf::flat(&frames[0]), &mut tx, now) {
        Some(Delivery::Dgram(dgram)) => {
            assert_eq!(dgram.src_addr, IP_ADDR_HOST);
            assert_eq!(dgram.ttl_proto.protocol(), IpProtocol::Udp);
            assert_eq!(dgram.payload.len(), 2000);
            assert!(dgram.payload.equal_to(&Buf::flat(&data)));
        },
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(receiver.reassembly().in_use(), 0);
}

#[test]
fn reassemble_interleaved() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    let data: Vec<u8> = (0..1000).map(|i| (i % 241) as u8).collect();

    let fragment = |offset: usize, len: usize| {
        let repr = Ipv4Repr {
            more_frags: offset + len < data.len(),
            frag_offset: offset as u16,
            ..header_from_other(IpProtocol::Udp, len)
        };
        frame_from_other(repr, &data[offset..offset + len])
    };
    let frames = [fragment(0, 256), fragment(256, 256), fragment(512, 256), fragment(768, 232)];

    // Middle, first, last, the first again, and only then the gap.
    let mut tx = buffers(64);
    for &index in &[2, 0, 3, 0] {
        assert!(ip.recv(Buf::flat(&frames[index]), &mut tx, now).is_none());
        assert_eq!(ip.reassembly().in_use(), 1);
    }
    match ip.recv(Buf::flat(&frames[1]), &mut tx, now) {
        Some(Delivery::Dgram(dgram)) => {
            assert_eq!(dgram.src_addr, IP_ADDR_OTHER);
            assert_eq!(dgram.payload.len(), 1000);
            assert!(dgram.payload.equal_to(&Buf::flat(&data)));
        },
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ip.reassembly().in_use(), 0);
}

#[test]
fn dont_fragment() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 576);
    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);

    let mut pool = buffers(4096);
    let payload = pool.alloc(HEADROOM, 2000).unwrap();
    let flags = SendFlags { dont_fragment: true };
    assert_eq!(
        ip.send_dgram(&mut pool, payload, IP_ADDR_OTHER, TtlProto::new(64, IpProtocol::Tcp), flags, None, now),
        Err(IpErr::FragNeeded));
    assert!(take_frames(&mut ip).is_empty());
}

#[test]
fn routing_errors() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    let mut pool = buffers(70_000);
    let ttl_proto = TtlProto::new(64, IpProtocol::Udp);
    let flags = SendFlags::default();

    let small = pool.alloc(HEADROOM, 8).unwrap();
    assert_eq!(
        ip.send_dgram(&mut pool, small, Ipv4Address::new(192, 168, 0, 1), ttl_proto, flags, None, now),
        Err(IpErr::NoIpRoute));

    let large = pool.alloc(HEADROOM, 65_516).unwrap();
    assert_eq!(
        ip.send_dgram(&mut pool, large, IP_ADDR_OTHER, ttl_proto, flags, None, now),
        Err(IpErr::PktTooLarge));

    let cramped = pool.alloc(4, 8).unwrap();
    assert_eq!(
        ip.send_dgram(&mut pool, cramped, IP_ADDR_OTHER, ttl_proto, flags, None, now),
        Err(IpErr::NoHeaderSpace));

    ip.set_ip4_addrs(None);
    assert_eq!(
        ip.send_dgram(&mut pool, small, IP_ADDR_OTHER, ttl_proto, flags, None, now),
        Err(IpErr::NoIpRoute));
}

#[test]
fn unresolved_is_parked() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    let mut pool = buffers(256);
    let payload = pool.alloc(HEADROOM, 8).unwrap();
    pool.copy_in(payload, &[7; 8]);

    let ttl_proto = TtlProto::new(64, IpProtocol::Udp);
    assert_eq!(
        ip.send_dgram(&mut pool, payload, IP_ADDR_OTHER, ttl_proto, SendFlags::default(), None, now),
        Err(IpErr::ArpQuery));
    // Only the request went out.
    assert_eq!(take_frames(&mut ip).len(), 1);

    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);
    let frames = take_frames(&mut ip);
    assert_eq!(frames.len(), 1);
    let repr = parse_ip(&frames[0]);
    assert_eq!(repr.dst_addr, IP_ADDR_OTHER);
    assert_eq!(&frames[0][HEADROOM..], &[7; 8]);
}

#[test]
fn drop_invalid() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    let mut tx = buffers(256);

    // For another host.
    let mut header = header_from_other(IpProtocol::Udp, 4);
    header.dst_addr = Ipv4Address::new(10, 0, 0, 9);
    let frame = frame_from_other(header, &[1, 2, 3, 4]);
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());

    // From a broadcast address.
    let mut header = header_from_other(IpProtocol::Udp, 4);
    header.src_addr = Ipv4Address::new(10, 0, 0, 255);
    let frame = frame_from_other(header, &[1, 2, 3, 4]);
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());

    // Broken checksum.
    let mut frame = frame_from_other(header_from_other(IpProtocol::Udp, 4), &[1, 2, 3, 4]);
    frame[ETHERNET_HEADER_LEN + 10] ^= 0xff;
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());

    // Truncated, the total length claims more than present.
    let frame = frame_from_other(header_from_other(IpProtocol::Udp, 8), &[1, 2, 3, 4]);
    assert!(ip.recv(Buf::flat(&frame[..HEADROOM + 4]), &mut tx, now).is_none());

    // Well-formed, with link layer padding.
    let mut frame = frame_from_other(header_from_other(IpProtocol::Udp, 4), &[1, 2, 3, 4]);
    frame.extend_from_slice(&[0; 10]);
    match ip.recv(Buf::flat(&frame), &mut tx, now) {
        Some(Delivery::Dgram(dgram)) => {
            assert_eq!(dgram.payload.len(), 4);
            assert!(dgram.payload.starts_with(&[1, 2, 3, 4]));
        },
        other => panic!("unexpected {:?}", other),
    }

    assert!(take_frames(&mut ip).is_empty());
}

#[test]
fn echo_reply() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);

    let mut message = [0; 8 + 12];
    Icmpv4Repr::EchoRequest { ident: 0x4242, seq_no: 7 }
        .emit(icmpv4_packet::new_unchecked_mut(&mut message[..8]));
    message[8..].copy_from_slice(b"ping payload");
    icmpv4_packet::new_unchecked_mut(&mut message[..]).fill_checksum();

    let frame = frame_from_other(header_from_other(IpProtocol::Icmp, message.len()), &message);
    let mut tx = buffers(512);
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());

    let frames = take_frames(&mut ip);
    assert_eq!(frames.len(), 1);
    let repr = parse_ip(&frames[0]);
    assert_eq!(repr.dst_addr, IP_ADDR_OTHER);
    assert_eq!(repr.ttl_proto.protocol(), IpProtocol::Icmp);
    let reply = &frames[0][HEADROOM..];
    assert_eq!(
        Icmpv4Repr::parse(Buf::flat(reply)),
        Ok(Icmpv4Repr::EchoReply { ident: 0x4242, seq_no: 7 }));
    assert_eq!(&reply[8..], b"ping payload");
}

#[test]
fn broadcast_echo_ignored() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);

    let mut message = [0; 8];
    Icmpv4Repr::EchoRequest { ident: 1, seq_no: 1 }
        .emit(icmpv4_packet::new_unchecked_mut(&mut message[..]));
    icmpv4_packet::new_unchecked_mut(&mut message[..]).fill_checksum();

    let mut header = header_from_other(IpProtocol::Icmp, message.len());
    header.dst_addr = Ipv4Address::new(10, 0, 0, 255);
    let frame = frame_from_other(header, &message);
    let mut tx = buffers(512);
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());
    assert!(take_frames(&mut ip).is_empty());
}

#[test]
fn frag_needed_lowers_pmtu() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    let remote = IP_ADDR_OTHER;
    assert_eq!(ip.pmtu_acquire(remote), Ok(()));
    assert_eq!(ip.pmtu(remote), 1500);

    // The error quotes a datagram we sent to the remote host.
    let quoted = Ipv4Repr {
        src_addr: IP_ADDR_HOST,
        dst_addr: remote,
        ttl_proto: TtlProto::new(64, IpProtocol::Tcp),
        ident: 9,
        dont_frag: true,
        more_frags: false,
        frag_offset: 0,
        payload_len: 1480,
    };
    let mut message = [0; 8 + 20 + 8];
    let repr = Icmpv4Repr::DstUnreachable {
        reason: Icmpv4DstUnreachable::FragRequired,
        next_hop_mtu: 1000,
        header: quoted,
    };
    repr.emit(icmpv4_packet::new_unchecked_mut(&mut message[..8]));
    quoted.emit(ipv4_packet::new_unchecked_mut(&mut message[8..28]));
    icmpv4_packet::new_unchecked_mut(&mut message[..]).fill_checksum();

    // Sent by a router, which here is the other host.
    let frame = frame_from_other(header_from_other(IpProtocol::Icmp, message.len()), &message);
    let mut tx = buffers(512);
    match ip.recv(Buf::flat(&frame), &mut tx, now) {
        Some(Delivery::PmtuLowered { remote: lowered, mtu }) => {
            assert_eq!(lowered, remote);
            assert_eq!(mtu, 1000);
        },
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ip.pmtu(remote), 1000);

    // The same report again changes nothing.
    assert!(ip.recv(Buf::flat(&frame), &mut tx, now).is_none());

    // Reverts after the timeout.
    let later = now + ip.config().pmtu_timeout;
    ip.poll(later);
    assert_eq!(ip.pmtu(remote), 1500);

    ip.pmtu_release(remote);
    assert!(take_frames(&mut ip).is_empty());
}

#[test]
fn send_frag_needed() {
    let now = Instant::from_millis(0);
    let mut ip = endpoint(MAC_ADDR_HOST, IP_ADDR_HOST, 1500);
    learn(&mut ip, MAC_ADDR_OTHER, IP_ADDR_OTHER);
    let mut tx = buffers(512);

    let payload = [0x55; 40];
    let frame = frame_from_other(header_from_other(IpProtocol::Udp, payload.len()), &payload);
    let datagram = Buf::flat(&frame[ETHERNET_HEADER_LEN..]);
    assert_eq!(ip.send_frag_needed(&mut tx, datagram, 576, now), Ok(()));

    let frames = take_frames(&mut ip);
    assert_eq!(frames.len(), 1);
    let repr = parse_ip(&frames[0]);
    assert_eq!(repr.dst_addr, IP_ADDR_OTHER);
    assert_eq!(repr.payload_len, 8 + 20 + 8);
    match Icmpv4Repr::parse(Buf::flat(&frames[0][HEADROOM..])) {
        Ok(Icmpv4Repr::DstUnreachable { reason, next_hop_mtu, header }) => {
            assert_eq!(reason, Icmpv4DstUnreachable::FragRequired);
            assert_eq!(next_hop_mtu, 576);
            assert_eq!(header.src_addr, IP_ADDR_OTHER);
            assert_eq!(header.ident, 0x1234);
        },
        other => panic!("unexpected {:?}", other),
    }

    // Never about an error message.
    let mut error = [0; 8 + 20 + 8];
    let repr = Icmpv4Repr::DstUnreachable {
        reason: Icmpv4DstUnreachable::PortUnreachable,
        next_hop_mtu: 0,
        header: header_from_other(IpProtocol::Udp, 8),
    };
    repr.emit(icmpv4_packet::new_unchecked_mut(&mut error[..8]));
    icmpv4_packet::new_unchecked_mut(&mut error[..]).fill_checksum();
    let frame = frame_from_other(header_from_other(IpProtocol::Icmp, error.len()), &error);
    let datagram = Buf::flat(&frame[ETHERNET_HEADER_LEN..]);
    assert_eq!(ip.send_frag_needed(&mut tx, datagram, 576, now), Ok(()));
    assert!(take_frames(&mut ip).is_empty());
}
