use crate::buf::{Buf, Pool, Segment};
use crate::layer::IpErr;
use crate::layer::eth::{self, ArpEntry, Eth};
use crate::layer::ip::{self, Delivery, Ip, Ip4Dgram, PmtuEntry, ReassemblySlot, HEADROOM};
use crate::nic::Loopback;
use crate::retry::{ListHead, Request};
use crate::time::{Expiration, Instant};
use crate::wire::{
    arp_packet,
    ethernet_frame,
    icmpv4_packet,
    ipv4_packet,
    tcp_packet,
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
    TcpFlags,
    TcpRepr,
    TcpSeqNumber,
    TtlProto,
    ETHERNET_HEADER_LEN,
};
use crate::wire::tcp::segment_checksum;

use super::*;

const MAC_ADDR_HOST: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
const IP_ADDR_HOST: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const MAC_ADDR_OTHER: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
const IP_ADDR_OTHER: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

const PEER_ISS: TcpSeqNumber = TcpSeqNumber(1000);
const PEER_PORT: u16 = 80;

struct Host {
    ip: Ip<'static, Loopback<'static>>,
    tcp: Tcp<'static>,
    tx: Pool<'static>,
}

/// A segment seen on the wire.
struct Sent {
    repr: TcpRepr,
    payload: Vec<u8>,
}

fn host(config: Config) -> Host {
    let nic = Loopback::new(vec![0; 8192], MAC_ADDR_HOST, 1500);
    let eth = Eth::new(nic, eth::Storage {
        arp: vec![ArpEntry::default(); 2].into(),
        requests: vec![Request::default(); 2].into(),
        lists: vec![ListHead::default(); 3].into(),
        hold: vec![0; 2 * 128].into(),
    }, eth::Config::default());

    let mut ip = Ip::new(eth, ip::Storage {
        reassembly: vec![ReassemblySlot::default(); 1].into(),
        reassembly_buffer: vec![0; 2048].into(),
        pmtu: vec![PmtuEntry::default(); 2].into(),
    }, ip::Config::default());
    ip.set_ip4_addrs(Some((IP_ADDR_HOST, 24)));

    let connections: Vec<_> = (0..2)
        .map(|_| Connection::new(vec![0; 1024], vec![0; 1024]))
        .collect();
    let tcp = Tcp::new(Storage {
        connections: connections.into(),
        listeners: vec![Listener::default(); 2].into(),
        events: vec![(ConnId::default(), Event::Connected); 16].into(),
    }, config);

    Host {
        ip,
        tcp,
        tx: Pool::new(vec![0; 4096], vec![Segment::default(); 16]),
    }
}

/// Make the other host known to the neighbor cache.
fn learn(host: &mut Host) {
    let mut frame = [0; 42];
    EthernetRepr {
        src_addr: MAC_ADDR_OTHER,
        dst_addr: MAC_ADDR_HOST,
        ethertype: EthernetProtocol::Arp,
    }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));
    ArpRepr {
        operation: ArpOperation::Reply,
        source_hardware_addr: MAC_ADDR_OTHER,
        source_protocol_addr: IP_ADDR_OTHER,
        target_hardware_addr: MAC_ADDR_HOST,
        target_protocol_addr: IP_ADDR_HOST,
    }.emit(arp_packet::new_unchecked_mut(&mut frame[ETHERNET_HEADER_LEN..]));

    assert!(host.ip.recv(Buf::flat(&frame), &mut host.tx, Instant::from_millis(0)).is_none());
    assert_eq!(host.ip.eth().cache().lookup(IP_ADDR_OTHER), Some(MAC_ADDR_OTHER));
}

fn repr(local_port: u16, flags: TcpFlags, seq: TcpSeqNumber, ack: Option<TcpSeqNumber>) -> TcpRepr {
    TcpRepr {
        src_port: PEER_PORT,
        dst_port: local_port,
        flags,
        seq_number: seq,
        ack_number: ack,
        window_len: 4096,
        max_seg_size: None,
        payload_len: 0,
    }
}

/// Hand a segment from the other host to the layer.
fn deliver(host: &mut Host, repr: TcpRepr, payload: &[u8], now: Instant) {
    let header_len = repr.header_len();
    let mut bytes = vec![0; header_len + payload.len()];
    repr.emit(tcp_packet::new_unchecked_mut(&mut bytes[..header_len]));
    bytes[header_len..].copy_from_slice(payload);
    let checksum = segment_checksum(Buf::flat(&bytes), IP_ADDR_OTHER, IP_ADDR_HOST);
    tcp_packet::new_unchecked_mut(&mut bytes[..header_len]).set_checksum(checksum);

    let dgram = Ip4Dgram {
        src_addr: IP_ADDR_OTHER,
        dst_addr: IP_ADDR_HOST,
        ttl_proto: TtlProto::new(64, IpProtocol::Tcp),
        payload: Buf::flat(&bytes),
    };
    if let Some(action) = host.tcp.input(&dgram, IP_ADDR_HOST, now) {
        host.tcp.react(&mut host.ip, &mut host.tx, action, now);
    }
}

/// Take all segments sent so far.
fn sent(host: &mut Host) -> Vec<Sent> {
    let mut segments = Vec::new();
    let mut buffer = [0; 2048];
    while let Some(len) = host.ip.eth_mut().driver_mut().recv(&mut buffer) {
        let frame = &buffer[..len];
        let packet = &frame[ETHERNET_HEADER_LEN..];
        let (ip, header_len) = Ipv4Repr::parse(ipv4_packet::new_checked(packet).unwrap(), packet.len())
            .expect("valid ipv4 header");
        assert_eq!(ip.ttl_proto.protocol(), IpProtocol::Tcp);
        assert_eq!(ip.dst_addr, IP_ADDR_OTHER);
        assert!(ip.dont_frag);

        let segment = &packet[header_len..header_len + ip.payload_len];
        let (repr, tcp_len) = TcpRepr::parse(Buf::flat(segment), IP_ADDR_HOST, IP_ADDR_OTHER)
            .expect("valid tcp segment");
        segments.push(Sent {
            repr,
            payload: segment[tcp_len..].to_vec(),
        });
    }
    segments
}

fn events(host: &mut Host) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some((_, event)) = host.tcp.poll_event() {
        events.push(event);
    }
    events
}

fn deadline(host: &Host) -> Instant {
    match host.tcp.next_deadline() {
        Expiration::When(deadline) => deadline,
        Expiration::Never => panic!("no timer armed"),
    }
}

/// An active open that completed.
struct Open {
    conn: ConnId,
    local_port: u16,
    iss: TcpSeqNumber,
}

fn open_active(host: &mut Host) -> Open {
    open_with_mss(host, 1000)
}

/// An active open to a peer announcing `mss`.
fn open_with_mss(host: &mut Host, mss: u16) -> Open {
    let now = Instant::from_millis(0);
    let conn = host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now)
        .expect("connection slot available");
    let syn = sent(host).pop().expect("syn sent");
    let local_port = syn.repr.src_port;
    let iss = syn.repr.seq_number;

    let mut syn_ack = repr(local_port, TcpFlags::SYN, PEER_ISS, Some(iss + 1));
    syn_ack.max_seg_size = Some(mss);
    deliver(host, syn_ack, &[], now);
    assert_eq!(host.tcp.state(conn), State::Established);
    assert_eq!(sent(host).len(), 1);
    assert_eq!(events(host), [Event::Connected]);

    Open { conn, local_port, iss }
}

#[test]
fn active_open() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);

    let conn = host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now)
        .unwrap();
    assert_eq!(host.tcp.state(conn), State::SynSent);

    let mut segments = sent(&mut host);
    assert_eq!(segments.len(), 1);
    let syn = segments.pop().unwrap();
    assert!(syn.repr.flags.syn());
    assert_eq!(syn.repr.ack_number, None);
    assert_eq!(syn.repr.dst_port, PEER_PORT);
    assert!(syn.repr.src_port >= EPHEMERAL_START);
    assert_eq!(syn.repr.max_seg_size, Some(1460));
    assert_eq!(syn.repr.window_len, 1024);
    let iss = syn.repr.seq_number;

    let mut syn_ack = repr(syn.repr.src_port, TcpFlags::SYN, PEER_ISS, Some(iss + 1));
    syn_ack.max_seg_size = Some(1000);
    deliver(&mut host, syn_ack, &[], now);

    assert_eq!(host.tcp.state(conn), State::Established);
    assert_eq!(host.tcp.connection(conn).unwrap().send_mss(), 1000);
    assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 4000);
    assert_eq!(host.tcp.poll_event(), Some((conn, Event::Connected)));

    let ack = sent(&mut host).pop().unwrap();
    assert!(!ack.repr.flags.syn());
    assert_eq!(ack.repr.seq_number, iss + 1);
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 1));
    assert_eq!(host.tcp.next_deadline(), Expiration::Never);
}

#[test]
fn syn_ack_with_wrong_ack_is_refused() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);

    let conn = host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now)
        .unwrap();
    let syn = sent(&mut host).pop().unwrap();
    let bad_ack = syn.repr.seq_number + 5;
    deliver(&mut host, repr(syn.repr.src_port, TcpFlags::SYN, PEER_ISS, Some(bad_ack)), &[], now);

    assert_eq!(host.tcp.state(conn), State::SynSent);
    let rst = sent(&mut host).pop().unwrap();
    assert!(rst.repr.flags.rst());
    assert_eq!(rst.repr.seq_number, bad_ack);

    // A reset acknowledging the SYN refuses the connection.
    let ack = syn.repr.seq_number + 1;
    deliver(&mut host, repr(syn.repr.src_port, TcpFlags::RST, PEER_ISS, Some(ack)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Closed);
    assert_eq!(events(&mut host), [Event::Aborted(AbortReason::Refused)]);
}

#[test]
fn passive_open() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let listener = host.tcp.listen(7).unwrap();

    let mut syn = repr(7, TcpFlags::SYN, PEER_ISS, None);
    syn.max_seg_size = Some(1200);
    deliver(&mut host, syn, &[], now);

    let syn_ack = sent(&mut host).pop().expect("syn-ack sent");
    assert!(syn_ack.repr.flags.syn());
    assert_eq!(syn_ack.repr.src_port, 7);
    assert_eq!(syn_ack.repr.dst_port, PEER_PORT);
    assert_eq!(syn_ack.repr.ack_number, Some(PEER_ISS + 1));
    assert_eq!(syn_ack.repr.max_seg_size, Some(1460));
    let iss = syn_ack.repr.seq_number;

    // Not yet established.
    assert_eq!(host.tcp.accept(listener), None);
    assert!(events(&mut host).is_empty());

    deliver(&mut host, repr(7, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1)), &[], now);
    assert!(sent(&mut host).is_empty());
    let conn = host.tcp.accept(listener).expect("established connection");
    assert_eq!(host.tcp.accept(listener), None);
    assert_eq!(host.tcp.state(conn), State::Established);
    assert_eq!(host.tcp.connection(conn).unwrap().send_mss(), 1200);
    assert_eq!(host.tcp.connection(conn).unwrap().remote(), (IP_ADDR_OTHER, PEER_PORT));
    assert_eq!(events(&mut host), [Event::Connected]);

    deliver(&mut host, repr(7, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1)), b"hello", now);
    assert_eq!(events(&mut host), [Event::Received]);
    let ack = sent(&mut host).pop().unwrap();
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 6));
    assert_eq!(ack.repr.window_len, 1024 - 5);

    let mut data = [0; 16];
    assert_eq!(host.tcp.recv(&mut host.ip, &mut host.tx, conn, &mut data, now), 5);
    assert_eq!(&data[..5], b"hello");
}

#[test]
fn listener_errors() {
    let mut host = host(Config::default());
    let listener = host.tcp.listen(80).unwrap();
    assert_eq!(host.tcp.listen(80), Err(IpErr::NoPortAvail));
    host.tcp.listen(81).unwrap();
    assert_eq!(host.tcp.listen(82), Err(IpErr::NoPcbAvail));
    host.tcp.unlisten(listener);
    host.tcp.listen(82).unwrap();
}

#[test]
fn closed_port_is_refused() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);

    deliver(&mut host, repr(81, TcpFlags::SYN, PEER_ISS, None), &[], now);
    let rst = sent(&mut host).pop().expect("reset sent");
    assert!(rst.repr.flags.rst());
    assert_eq!(rst.repr.src_port, 81);
    assert_eq!(rst.repr.dst_port, PEER_PORT);
    assert_eq!(rst.repr.seq_number, TcpSeqNumber(0));
    assert_eq!(rst.repr.ack_number, Some(PEER_ISS + 1));

    // A segment with an acknowledgment gets a reset with that sequence number.
    deliver(&mut host, repr(81, TcpFlags::default(), PEER_ISS, Some(TcpSeqNumber(77))), b"x", now);
    let rst = sent(&mut host).pop().expect("reset sent");
    assert_eq!(rst.repr.seq_number, TcpSeqNumber(77));
    assert_eq!(rst.repr.ack_number, None);

    // Resets are never answered.
    deliver(&mut host, repr(81, TcpFlags::RST, PEER_ISS, None), &[], now);
    assert!(sent(&mut host).is_empty());
}

#[test]
fn send_and_acknowledge() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    assert_eq!(host.tcp.send(&mut host.ip, &mut host.tx, conn, b"data", now), 4);
    let segment = sent(&mut host).pop().unwrap();
    assert_eq!(segment.payload, b"data");
    assert_eq!(segment.repr.seq_number, iss + 1);
    assert!(segment.repr.flags.psh());
    assert_eq!(host.tcp.connection(conn).unwrap().send_queue(), 4);
    assert!(host.tcp.next_deadline().is_set());

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 5)), &[], now);
    assert_eq!(events(&mut host), [Event::Sent(4)]);
    assert_eq!(host.tcp.connection(conn).unwrap().send_queue(), 0);
    assert_eq!(host.tcp.next_deadline(), Expiration::Never);
    assert!(sent(&mut host).is_empty());
}

#[test]
fn peer_closes_first() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    deliver(&mut host, repr(local_port, TcpFlags::FIN, PEER_ISS + 1, Some(iss + 1)), &[], now);
    assert_eq!(host.tcp.state(conn), State::CloseWait);
    assert_eq!(events(&mut host), [Event::PeerClosed]);
    let ack = sent(&mut host).pop().unwrap();
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 2));

    host.tcp.close(&mut host.ip, &mut host.tx, conn, now);
    assert_eq!(host.tcp.state(conn), State::LastAck);
    let fin = sent(&mut host).pop().unwrap();
    assert!(fin.repr.flags.fin());
    assert_eq!(fin.repr.seq_number, iss + 1);

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 2, Some(iss + 2)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Closed);
    assert_eq!(events(&mut host), [Event::Closed]);
    assert!(host.tcp.connection(conn).is_none());
    assert_eq!(host.tcp.send(&mut host.ip, &mut host.tx, conn, b"late", now), 0);
}

#[test]
fn local_close_waits_in_time_wait() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    host.tcp.send(&mut host.ip, &mut host.tx, conn, b"bye", now);
    host.tcp.close(&mut host.ip, &mut host.tx, conn, now);
    assert_eq!(host.tcp.state(conn), State::FinWait1);
    let segments = sent(&mut host);
    assert_eq!(segments.len(), 2);
    assert!(segments[1].repr.flags.fin());
    assert_eq!(segments[1].repr.seq_number, iss + 4);

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 5)), &[], now);
    assert_eq!(host.tcp.state(conn), State::FinWait2);
    assert_eq!(events(&mut host), [Event::Sent(3)]);

    deliver(&mut host, repr(local_port, TcpFlags::FIN, PEER_ISS + 1, Some(iss + 5)), &[], now);
    assert_eq!(host.tcp.state(conn), State::TimeWait);
    assert_eq!(events(&mut host), [Event::PeerClosed, Event::Closed]);
    let ack = sent(&mut host).pop().unwrap();
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 2));

    let end = deadline(&host);
    assert_eq!(end, now + host.tcp.config().time_wait);
    host.tcp.poll(&mut host.ip, &mut host.tx, end);
    assert_eq!(host.tcp.state(conn), State::Closed);
    assert!(events(&mut host).is_empty());
}

#[test]
fn retransmission_and_abort() {
    let config = Config {
        max_retransmissions: 2,
        ..Config::default()
    };
    let now = Instant::from_millis(0);
    let mut host = host(config);
    learn(&mut host);
    let Open { conn, iss, .. } = open_active(&mut host);

    host.tcp.send(&mut host.ip, &mut host.tx, conn, b"data", now);
    assert_eq!(sent(&mut host).len(), 1);
    let rto = host.tcp.connection(conn).unwrap().retransmission_timeout();
    assert_eq!(deadline(&host), now + rto);

    for _ in 0..2 {
        let expired = deadline(&host);
        host.tcp.poll(&mut host.ip, &mut host.tx, expired);
        let resent = sent(&mut host).pop().expect("retransmission");
        assert_eq!(resent.repr.seq_number, iss + 1);
        assert_eq!(resent.payload, b"data");
        assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 1000);
    }
    assert_eq!(host.tcp.connection(conn).unwrap().retransmission_timeout(), rto * 4);

    let expired = deadline(&host);
    host.tcp.poll(&mut host.ip, &mut host.tx, expired);
    let rst = sent(&mut host).pop().expect("reset");
    assert!(rst.repr.flags.rst());
    assert_eq!(host.tcp.state(conn), State::Closed);
    assert_eq!(events(&mut host), [Event::Aborted(AbortReason::Timeout)]);
}

#[test]
fn out_of_order_data() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 6, Some(iss + 1)), b"world", now);
    assert!(events(&mut host).is_empty());
    assert_eq!(host.tcp.connection(conn).unwrap().recv_available(), 0);
    let ack = sent(&mut host).pop().unwrap();
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 1));

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1)), b"hello", now);
    assert_eq!(events(&mut host), [Event::Received]);
    let ack = sent(&mut host).pop().unwrap();
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 11));

    let mut data = [0; 16];
    assert_eq!(host.tcp.recv(&mut host.ip, &mut host.tx, conn, &mut data, now), 10);
    assert_eq!(&data[..10], b"helloworld");
}

#[test]
fn reset_aborts() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    // Not exactly at the expected sequence number, answered with an ACK.
    deliver(&mut host, repr(local_port, TcpFlags::RST, PEER_ISS + 3, Some(iss + 1)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Established);
    let ack = sent(&mut host).pop().expect("challenge ack");
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 1));

    deliver(&mut host, repr(local_port, TcpFlags::RST, PEER_ISS + 1, Some(iss + 1)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Closed);
    assert_eq!(events(&mut host), [Event::Aborted(AbortReason::Reset)]);
    assert!(sent(&mut host).is_empty());
}

#[test]
fn connect_errors() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());

    let off_link = Ipv4Address::new(192, 168, 1, 1);
    assert_eq!(
        host.tcp.connect(&mut host.ip, &mut host.tx, off_link, PEER_PORT, now),
        Err(IpErr::NoIpRoute));

    // Unresolved, the SYN waits for the ARP reply.
    host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now).unwrap();
    host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now).unwrap();
    assert_eq!(
        host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now),
        Err(IpErr::NoPcbAvail));

    host.ip.set_ip4_addrs(None);
    assert_eq!(
        host.tcp.connect(&mut host.ip, &mut host.tx, IP_ADDR_OTHER, PEER_PORT, now),
        Err(IpErr::NoIpRoute));
}

#[test]
fn closed_window_persists() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    host.tcp.send(&mut host.ip, &mut host.tx, conn, b"data", now);
    assert_eq!(sent(&mut host).len(), 1);
    let closed = TcpRepr {
        window_len: 0,
        ..repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 5))
    };
    deliver(&mut host, closed, &[], now);
    assert_eq!(events(&mut host), [Event::Sent(4)]);
    assert_eq!(host.tcp.next_deadline(), Expiration::Never);

    // Nothing fits into the closed window, the persist timer starts instead.
    assert_eq!(host.tcp.send(&mut host.ip, &mut host.tx, conn, b"more", now), 4);
    assert!(sent(&mut host).is_empty());
    let expired = deadline(&host);
    assert_eq!(expired, now + host.tcp.config().window_probe);

    host.tcp.poll(&mut host.ip, &mut host.tx, expired);
    let persist = sent(&mut host).pop().expect("persist segment");
    assert_eq!(persist.repr.seq_number, iss + 5);
    assert_eq!(persist.payload, b"m");

    // Still closed, the byte is sent again and the connection stays.
    let still_closed = TcpRepr {
        window_len: 0,
        ..repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 5))
    };
    deliver(&mut host, still_closed, &[], expired);
    assert!(sent(&mut host).is_empty());
    let expired = deadline(&host);
    host.tcp.poll(&mut host.ip, &mut host.tx, expired);
    let persist = sent(&mut host).pop().expect("persist segment");
    assert_eq!(persist.repr.seq_number, iss + 5);
    assert_eq!(persist.payload, b"m");
    assert_eq!(host.tcp.state(conn), State::Established);

    // The window opens and takes the byte, the rest follows.
    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 6)), &[], expired);
    assert_eq!(events(&mut host), [Event::Sent(1)]);
    let rest = sent(&mut host).pop().expect("remaining data");
    assert_eq!(rest.repr.seq_number, iss + 6);
    assert_eq!(rest.payload, b"ore");
}

#[test]
fn fast_retransmit_and_recovery() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_with_mss(&mut host, 200);
    assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 800);

    let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    assert_eq!(host.tcp.send(&mut host.ip, &mut host.tx, conn, &data, now), 1000);
    let segments = sent(&mut host);
    let seqs: Vec<_> = segments.iter().map(|segment| segment.repr.seq_number).collect();
    assert_eq!(seqs, [iss + 1, iss + 201, iss + 401, iss + 601]);

    // The first segment was lost, the peer repeats its acknowledgment.
    let dup_ack = repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1));
    for _ in 0..2 {
        deliver(&mut host, dup_ack, &[], now);
        assert!(sent(&mut host).is_empty());
    }

    deliver(&mut host, dup_ack, &[], now);
    let segments = sent(&mut host);
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].repr.seq_number, iss + 1);
    assert_eq!(segments[0].payload, &data[..200]);
    // The inflated window admits new data.
    assert_eq!(segments[1].repr.seq_number, iss + 801);
    assert_eq!(segments[1].payload, &data[800..]);
    assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 1000);

    // A partial acknowledgment, the next hole is sent right away.
    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 401)), &[], now);
    assert_eq!(events(&mut host), [Event::Sent(400)]);
    let segments = sent(&mut host);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].repr.seq_number, iss + 401);
    assert_eq!(segments[0].payload, &data[400..600]);
    assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 800);

    // Everything up to the recovery point, the window deflates to the threshold.
    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1001)), &[], now);
    assert_eq!(events(&mut host), [Event::Sent(600)]);
    assert!(sent(&mut host).is_empty());
    assert_eq!(host.tcp.connection(conn).unwrap().congestion_window(), 400);
    assert_eq!(host.tcp.next_deadline(), Expiration::Never);
}

/// A router on the way to the other host reports a datagram of ours as too large.
fn frag_required(next_hop_mtu: u16) -> Vec<u8> {
    let quoted = Ipv4Repr {
        src_addr: IP_ADDR_HOST,
        dst_addr: IP_ADDR_OTHER,
        ttl_proto: TtlProto::new(64, IpProtocol::Tcp),
        ident: 1,
        dont_frag: true,
        more_frags: false,
        frag_offset: 0,
        payload_len: 1020,
    };
    let mut message = [0; 8 + 20 + 8];
    Icmpv4Repr::DstUnreachable {
        reason: Icmpv4DstUnreachable::FragRequired,
        next_hop_mtu,
        header: quoted,
    }.emit(icmpv4_packet::new_unchecked_mut(&mut message[..8]));
    quoted.emit(ipv4_packet::new_unchecked_mut(&mut message[8..28]));
    icmpv4_packet::new_unchecked_mut(&mut message[..]).fill_checksum();

    let mut frame = vec![0; HEADROOM + message.len()];
    EthernetRepr {
        src_addr: MAC_ADDR_OTHER,
        dst_addr: MAC_ADDR_HOST,
        ethertype: EthernetProtocol::Ipv4,
    }.emit(ethernet_frame::new_unchecked_mut(&mut frame[..ETHERNET_HEADER_LEN]));
    Ipv4Repr {
        src_addr: IP_ADDR_OTHER,
        dst_addr: IP_ADDR_HOST,
        ttl_proto: TtlProto::new(64, IpProtocol::Icmp),
        ident: 7,
        dont_frag: false,
        more_frags: false,
        frag_offset: 0,
        payload_len: message.len(),
    }.emit(ipv4_packet::new_unchecked_mut(&mut frame[ETHERNET_HEADER_LEN..HEADROOM]));
    frame[HEADROOM..].copy_from_slice(&message);
    frame
}

#[test]
fn path_mtu_shrinks_segments() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    host.tcp.send(&mut host.ip, &mut host.tx, conn, &data, now);
    let segments = sent(&mut host);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].payload.len(), 1000);

    let frame = frag_required(576);
    let (remote, mtu) = match host.ip.recv(Buf::flat(&frame), &mut host.tx, now) {
        Some(Delivery::PmtuLowered { remote, mtu }) => (remote, mtu),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!((remote, mtu), (IP_ADDR_OTHER, 576));

    host.tcp.pmtu_lowered(&mut host.ip, &mut host.tx, remote, mtu, now);
    assert_eq!(host.tcp.connection(conn).unwrap().send_mss(), 536);

    // The data in flight is sent again in segments that fit the path.
    let segments = sent(&mut host);
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].repr.seq_number, iss + 1);
    assert_eq!(segments[0].payload, &data[..536]);
    assert_eq!(segments[1].repr.seq_number, iss + 537);
    assert_eq!(segments[1].payload, &data[536..]);

    // A higher report changes nothing.
    host.tcp.pmtu_lowered(&mut host.ip, &mut host.tx, remote, 1000, now);
    assert!(sent(&mut host).is_empty());

    deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1, Some(iss + 1001)), &[], now);
    assert_eq!(events(&mut host), [Event::Sent(1000)]);
}

#[test]
fn syn_in_window_resets() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    // A repeated SYN-ACK lies before the window and is only acknowledged.
    deliver(&mut host, repr(local_port, TcpFlags::SYN, PEER_ISS, Some(iss + 1)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Established);
    let ack = sent(&mut host).pop().expect("ack");
    assert!(!ack.repr.flags.rst());
    assert_eq!(ack.repr.ack_number, Some(PEER_ISS + 1));

    deliver(&mut host, repr(local_port, TcpFlags::SYN, PEER_ISS + 10, None), &[], now);
    assert_eq!(host.tcp.state(conn), State::Closed);
    let rst = sent(&mut host).pop().expect("reset");
    assert!(rst.repr.flags.rst());
    assert_eq!(rst.repr.seq_number, iss + 1);
    assert_eq!(rst.repr.ack_number, Some(PEER_ISS + 1));
    assert_eq!(events(&mut host), [Event::Aborted(AbortReason::Reset)]);
}

#[test]
fn abort_reported_with_full_event_queue() {
    let now = Instant::from_millis(0);
    let mut host = host(Config::default());
    learn(&mut host);
    let Open { conn, local_port, iss } = open_active(&mut host);

    for i in 0..20 {
        deliver(&mut host, repr(local_port, TcpFlags::default(), PEER_ISS + 1 + i, Some(iss + 1)), b"x", now);
    }
    deliver(&mut host, repr(local_port, TcpFlags::RST, PEER_ISS + 21, Some(iss + 1)), &[], now);
    assert_eq!(host.tcp.state(conn), State::Closed);

    // Two of the sixteen entries are kept for the end of the two connections.
    let events = events(&mut host);
    assert_eq!(events.len(), 15);
    assert!(events[..14].iter().all(|event| *event == Event::Received));
    assert_eq!(events[14], Event::Aborted(AbortReason::Reset));
}
