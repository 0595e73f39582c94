//! Wire-format checks: byte-exact layouts for each PDU and
//! property-based round-trips over generated values.

use netsim::addr::{Ipv4Address, MacAddress, SubnetMask};
use netsim::net::arp::{ArpOperation, ArpPacket, ARP_PACKET_SIZE};
use netsim::net::dhcp::{DhcpMessageType, DhcpPacket, BOOTP_HEADER_SIZE, MAGIC_COOKIE};
use netsim::net::ethernet::{EtherType, EthernetFrame, ETHERNET_HEADER_SIZE, ETHERNET_MIN_SIZE};
use netsim::net::icmp::{IcmpPacket, ICMP_ECHO_REQUEST};
use netsim::net::ipv4::{internet_checksum, IpProtocol, Ipv4Packet, IPV4_HEADER_SIZE};
use netsim::net::udp::UdpDatagram;
use proptest::prelude::*;

#[test]
fn arp_request_wire_layout() {
    let packet = ArpPacket {
        operation: ArpOperation::Request,
        sender_mac: MacAddress([0x02, 0x4E, 0x53, 0x00, 0x00, 0x01]),
        sender_ip: Ipv4Address::new(192, 168, 1, 10),
        target_mac: MacAddress::ZERO,
        target_ip: Ipv4Address::new(192, 168, 1, 20),
    };
    let bytes = packet.to_bytes();
    assert_eq!(
        bytes,
        vec![
            0x00, 0x01, // htype: Ethernet
            0x08, 0x00, // ptype: IPv4
            0x06, 0x04, // hlen, plen
            0x00, 0x01, // op: request
            0x02, 0x4E, 0x53, 0x00, 0x00, 0x01, // sha
            192, 168, 1, 10, // spa
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // tha
            192, 168, 1, 20, // tpa
        ]
    );
    assert_eq!(bytes.len(), ARP_PACKET_SIZE);
}

#[test]
fn ethernet_frame_wire_layout() {
    let frame = EthernetFrame::new(
        MacAddress::BROADCAST,
        MacAddress([0x02, 0, 0, 0, 0, 7]),
        EtherType::Arp,
        vec![0xAB; 28],
    );
    let bytes = frame.to_bytes();
    assert_eq!(&bytes[0..6], &[0xFF; 6]);
    assert_eq!(&bytes[6..12], &[0x02, 0, 0, 0, 0, 7]);
    assert_eq!(&bytes[12..14], &[0x08, 0x06]);
    // 14 + 28 = 42, padded to the 60-byte minimum.
    assert_eq!(bytes.len(), ETHERNET_MIN_SIZE);
    assert!(bytes[ETHERNET_HEADER_SIZE + 28..].iter().all(|&b| b == 0));
}

#[test]
fn ipv4_header_wire_layout() {
    let packet = Ipv4Packet::new(
        Ipv4Address::new(10, 0, 0, 1),
        Ipv4Address::new(10, 0, 0, 2),
        IpProtocol::Udp,
        vec![1, 2, 3],
    )
    .with_ttl(64);
    let bytes = packet.to_bytes();

    assert_eq!(bytes[0], 0x45); // version 4, IHL 5
    assert_eq!(bytes[1], 0); // TOS
    assert_eq!(
        u16::from_be_bytes([bytes[2], bytes[3]]) as usize,
        IPV4_HEADER_SIZE + 3
    );
    assert_eq!(&bytes[6..8], &[0x40, 0x00]); // DF, no fragment offset
    assert_eq!(bytes[8], 64); // TTL
    assert_eq!(bytes[9], 17); // UDP
    assert_eq!(&bytes[12..16], &[10, 0, 0, 1]);
    assert_eq!(&bytes[16..20], &[10, 0, 0, 2]);
    // A correct header checksum folds the header to zero.
    assert_eq!(internet_checksum(&bytes[..IPV4_HEADER_SIZE]), 0);
}

#[test]
fn icmp_echo_wire_layout() {
    let bytes = IcmpPacket::echo_request(0x1234, 0x0002, b"pingdata".to_vec()).to_bytes();
    assert_eq!(bytes[0], ICMP_ECHO_REQUEST);
    assert_eq!(bytes[1], 0);
    assert_eq!(&bytes[4..6], &[0x12, 0x34]); // identifier
    assert_eq!(&bytes[6..8], &[0x00, 0x02]); // sequence
    assert_eq!(&bytes[8..], b"pingdata");
    assert_eq!(internet_checksum(&bytes), 0);
}

#[test]
fn dhcp_packet_wire_layout() {
    let mac = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]);
    let packet = DhcpPacket::client_request(mac, 0xDEADBEEF, DhcpMessageType::Discover);
    let bytes = packet.to_bytes();

    assert_eq!(bytes[0], 1); // BOOTREQUEST
    assert_eq!(bytes[1], 1); // htype Ethernet
    assert_eq!(bytes[2], 6); // hlen
    assert_eq!(&bytes[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]); // xid
    assert_eq!(&bytes[10..12], &[0x80, 0x00]); // broadcast flag
    assert_eq!(&bytes[28..34], &mac.0); // chaddr
    assert_eq!(&bytes[BOOTP_HEADER_SIZE..BOOTP_HEADER_SIZE + 4], &MAGIC_COOKIE);
    // Message type is the first option, end marker closes the packet.
    assert_eq!(
        &bytes[BOOTP_HEADER_SIZE + 4..BOOTP_HEADER_SIZE + 7],
        &[53, 1, 1]
    );
    assert_eq!(*bytes.last().unwrap(), 0xFF);
}

fn arb_ip() -> impl Strategy<Value = Ipv4Address> {
    any::<[u8; 4]>().prop_map(Ipv4Address)
}

fn arb_mac() -> impl Strategy<Value = MacAddress> {
    any::<[u8; 6]>().prop_map(MacAddress)
}

proptest! {
    #[test]
    fn ethernet_roundtrip(
        dst in arb_mac(),
        src in arb_mac(),
        arp in any::<bool>(),
        payload in proptest::collection::vec(any::<u8>(), 46..=200),
    ) {
        let ethertype = if arp { EtherType::Arp } else { EtherType::Ipv4 };
        let frame = EthernetFrame::new(dst, src, ethertype, payload);
        prop_assert_eq!(EthernetFrame::from_bytes(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn arp_roundtrip(
        request in any::<bool>(),
        sender_mac in arb_mac(),
        sender_ip in arb_ip(),
        target_mac in arb_mac(),
        target_ip in arb_ip(),
    ) {
        let packet = ArpPacket {
            operation: if request { ArpOperation::Request } else { ArpOperation::Reply },
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        };
        prop_assert_eq!(ArpPacket::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn ipv4_roundtrip(
        src in arb_ip(),
        dst in arb_ip(),
        proto in prop_oneof![Just(IpProtocol::Icmp), Just(IpProtocol::Tcp), Just(IpProtocol::Udp)],
        ttl in 1u8..=255,
        payload in proptest::collection::vec(any::<u8>(), 0..=128),
    ) {
        let packet = Ipv4Packet::new(src, dst, proto, payload).with_ttl(ttl);
        prop_assert_eq!(Ipv4Packet::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn icmp_echo_roundtrip(
        reply in any::<bool>(),
        identifier in any::<u16>(),
        sequence in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=64),
    ) {
        let request = IcmpPacket::echo_request(identifier, sequence, payload);
        let packet = if reply { IcmpPacket::echo_reply_to(&request) } else { request };
        prop_assert_eq!(IcmpPacket::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn udp_roundtrip(
        src_port in any::<u16>(),
        dst_port in any::<u16>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=300),
    ) {
        let dgram = UdpDatagram::new(src_port, dst_port, payload);
        prop_assert_eq!(UdpDatagram::from_bytes(&dgram.to_bytes()).unwrap(), dgram);
    }

    #[test]
    fn dhcp_roundtrip(
        mac in arb_mac(),
        xid in any::<u32>(),
        kind in 0usize..6,
        yiaddr in arb_ip(),
        server in proptest::option::of(arb_ip()),
        requested in proptest::option::of(arb_ip()),
        prefix in 0u8..=32,
        lease in proptest::option::of(any::<u32>()),
        hostname in proptest::option::of("[a-z]{1,12}"),
    ) {
        let kinds = [
            DhcpMessageType::Discover,
            DhcpMessageType::Offer,
            DhcpMessageType::Request,
            DhcpMessageType::Ack,
            DhcpMessageType::Nak,
            DhcpMessageType::Release,
        ];
        let mut packet = DhcpPacket::client_request(mac, xid, kinds[kind]);
        packet.yiaddr = yiaddr;
        packet.options.server_id = server;
        packet.options.requested_ip = requested;
        packet.options.subnet_mask = Some(SubnetMask::from_prefix(prefix).unwrap());
        packet.options.lease_time = lease;
        packet.options.hostname = hostname;
        prop_assert_eq!(DhcpPacket::from_bytes(&packet.to_bytes()).unwrap(), packet);
    }

    /// The internet checksum of a buffer with its own checksum
    /// appended folds to zero (RFC 1071).
    #[test]
    fn checksum_self_verifies(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut buf = data;
        if buf.len() % 2 != 0 {
            buf.push(0);
        }
        let sum = internet_checksum(&buf);
        buf.extend_from_slice(&sum.to_be_bytes());
        prop_assert_eq!(internet_checksum(&buf), 0);
    }
}
