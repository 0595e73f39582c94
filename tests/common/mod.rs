//! Helpers shared by the scenario tests.
#![allow(dead_code)] // each test binary uses its own subset

use netsim::addr::{Ipv4Address, MacAddress, SubnetMask};
use netsim::device::{DeviceId, Host};
use netsim::net::arp::{ArpOperation, ArpPacket};
use netsim::net::ethernet::{EtherType, EthernetFrame};
use netsim::net::icmp::IcmpPacket;
use netsim::net::ipv4::{IpProtocol, Ipv4Packet};
use netsim::sim::Simulator;

pub fn ip(s: &str) -> Ipv4Address {
    s.parse().unwrap()
}

pub fn mask(s: &str) -> SubnetMask {
    s.parse().unwrap()
}

/// Configure and raise `eth0` on a registered host.
pub fn configure_host(sim: &mut Simulator, id: DeviceId, addr: &str, gateway: Option<&str>) {
    sim.host_mut(id)
        .unwrap()
        .configure_interface(
            "eth0",
            Some((ip(addr), mask("/24"))),
            gateway.map(ip),
            Some(true),
        )
        .unwrap();
}

pub fn host_mac(sim: &Simulator, id: DeviceId) -> MacAddress {
    sim.host(id).unwrap().interfaces()[0].mac()
}

pub fn register_host(sim: &mut Simulator, name: &str, addr: &str) -> DeviceId {
    let id = sim.register(Host::new(name)).unwrap();
    configure_host(sim, id, addr, None);
    id
}

/// Decode an ARP payload if the frame carries one of the given op.
pub fn as_arp(frame: &EthernetFrame, op: ArpOperation) -> Option<ArpPacket> {
    if frame.ethertype != EtherType::Arp {
        return None;
    }
    ArpPacket::from_bytes(&frame.payload)
        .ok()
        .filter(|p| p.operation == op)
}

/// Decode an ICMP-over-IPv4 frame of the given ICMP type.
pub fn as_icmp(frame: &EthernetFrame, icmp_type: u8) -> Option<(Ipv4Packet, IcmpPacket)> {
    if frame.ethertype != EtherType::Ipv4 {
        return None;
    }
    let packet = Ipv4Packet::from_bytes(&frame.payload).ok()?;
    if packet.protocol != IpProtocol::Icmp {
        return None;
    }
    let icmp = IcmpPacket::from_bytes(&packet.payload).ok()?;
    (icmp.icmp_type == icmp_type).then_some((packet, icmp))
}
