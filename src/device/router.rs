//! Layer-3 forwarding
//!
//! A router owns several addressed interfaces, one ARP service per
//! interface, a longest-prefix-match route table and, optionally, a
//! DHCP server per interface. Forwarding decrements TTL and answers
//! expiry with ICMP Time Exceeded; a missing route earns Destination
//! Unreachable. Packets whose next-hop MAC is unknown are parked in a
//! small queue while an ARP request goes out; the queue is flushed as
//! replies arrive, and overflow evicts the oldest entry.

use std::collections::BTreeMap;

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::device::{DeviceOutput, DeviceStatus, Transmit};
use crate::error::ConfigError;
use crate::iface::NetworkInterface;
use crate::net::arp::{ArpPacket, ArpService};
use crate::net::dhcp::server::{DhcpServer, DhcpServerConfig};
use crate::net::dhcp::DhcpPacket;
use crate::net::ethernet::{EtherType, EthernetFrame};
use crate::net::icmp::{IcmpPacket, ICMP_ECHO_REQUEST};
use crate::net::ipv4::{IpProtocol, Ipv4Packet};
use crate::net::udp::{UdpDatagram, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::sim::event::DropReason;

/// Packets parked per router awaiting ARP resolution.
const MAX_PENDING_ARP: usize = 16;

/// One route. `next_hop == None` means directly connected: the packet
/// is delivered straight to its destination on the egress interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTableEntry {
    pub network: Ipv4Address,
    pub mask: SubnetMask,
    pub next_hop: Option<Ipv4Address>,
    /// Egress interface index
    pub egress: u8,
    pub directly_connected: bool,
}

impl RouteTableEntry {
    pub fn contains(&self, dst: Ipv4Address) -> bool {
        self.mask.network(dst) == self.network
    }
}

/// Longest-prefix-match route table. Ties on prefix length go to the
/// earliest-inserted entry.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteTableEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable::default()
    }

    pub fn add(&mut self, entry: RouteTableEntry) {
        // Replace an identical destination outright.
        self.entries
            .retain(|e| !(e.network == entry.network && e.mask == entry.mask));
        self.entries.push(entry);
    }

    pub fn remove(&mut self, network: Ipv4Address, mask: SubnetMask) {
        self.entries
            .retain(|e| !(e.network == network && e.mask == mask));
    }

    /// The most specific route containing `dst`, falling back to a
    /// default (/0) entry if one exists.
    pub fn lookup(&self, dst: Ipv4Address) -> Option<&RouteTableEntry> {
        let mut best: Option<&RouteTableEntry> = None;
        for entry in &self.entries {
            if !entry.contains(dst) {
                continue;
            }
            let better = match best {
                Some(b) => entry.mask.prefix_len() > b.mask.prefix_len(),
                None => true,
            };
            if better {
                best = Some(entry);
            }
        }
        best
    }

    pub fn entries(&self) -> &[RouteTableEntry] {
        &self.entries
    }
}

/// Forwarding counters, monotonic within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
}

#[derive(Debug)]
struct PendingForward {
    next_hop: Ipv4Address,
    egress: u8,
    packet: Ipv4Packet,
    /// Original frame, kept for the drop event on eviction
    frame: EthernetFrame,
    /// Transit traffic counts toward the forwarding stats; locally
    /// originated ICMP feedback does not.
    transit: bool,
}

/// A simulated router.
#[derive(Debug)]
pub struct Router {
    name: String,
    status: DeviceStatus,
    interfaces: Vec<NetworkInterface>,
    /// One ARP service per interface, index-aligned
    arp: Vec<ArpService>,
    routes: RouteTable,
    dhcp_servers: BTreeMap<usize, DhcpServer>,
    pending: Vec<PendingForward>,
    stats: RouterStats,
}

impl Router {
    pub fn new(name: impl Into<String>) -> Self {
        Router {
            name: name.into(),
            status: DeviceStatus::Online,
            interfaces: Vec::new(),
            arp: Vec::new(),
            routes: RouteTable::new(),
            dhcp_servers: BTreeMap::new(),
            pending: Vec::new(),
            stats: RouterStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    pub fn port_count(&self) -> u8 {
        self.interfaces.len() as u8
    }

    pub fn port_ready(&self, port: u8) -> bool {
        self.status == DeviceStatus::Online
            && self
                .interfaces
                .get(port as usize)
                .is_some_and(|i| i.is_up())
    }

    pub fn add_interface(&mut self, name: impl Into<String>) -> usize {
        self.interfaces.push(NetworkInterface::new(name));
        self.arp.push(ArpService::new());
        self.interfaces.len() - 1
    }

    pub fn interface(&self, index: usize) -> Option<&NetworkInterface> {
        self.interfaces.get(index)
    }

    pub fn interface_mut(&mut self, index: usize) -> Option<&mut NetworkInterface> {
        self.interfaces.get_mut(index)
    }

    pub fn interface_index(&self, name: &str) -> Result<usize, ConfigError> {
        self.interfaces
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| ConfigError::UnknownInterface(name.into()))
    }

    pub fn arp_service(&self, index: usize) -> Option<&ArpService> {
        self.arp.get(index)
    }

    pub fn set_power(&mut self, on: bool) {
        if on {
            self.status = DeviceStatus::Online;
            return;
        }
        self.status = DeviceStatus::Offline;
        for iface in &mut self.interfaces {
            iface.down();
        }
        self.pending.clear();
    }

    /// Address an interface, bring it up, and install its connected
    /// route.
    pub fn configure_interface(
        &mut self,
        index: usize,
        ip: Ipv4Address,
        mask: SubnetMask,
    ) -> Result<(), ConfigError> {
        let iface = self
            .interfaces
            .get_mut(index)
            .ok_or(ConfigError::UnknownPort(index as u8))?;
        iface.set_ip(ip, mask);
        iface.up();

        self.routes.add(RouteTableEntry {
            network: mask.network(ip),
            mask,
            next_hop: None,
            egress: index as u8,
            directly_connected: true,
        });
        Ok(())
    }

    // --- route table surface ---

    pub fn add_route(
        &mut self,
        network: Ipv4Address,
        mask: SubnetMask,
        next_hop: Option<Ipv4Address>,
        egress: u8,
    ) -> Result<(), ConfigError> {
        if self.interfaces.get(egress as usize).is_none() {
            return Err(ConfigError::UnknownPort(egress));
        }
        self.routes.add(RouteTableEntry {
            network: mask.network(network),
            mask,
            next_hop,
            egress,
            directly_connected: false,
        });
        Ok(())
    }

    pub fn remove_route(&mut self, network: Ipv4Address, mask: SubnetMask) {
        self.routes.remove(network, mask);
    }

    pub fn set_default_route(
        &mut self,
        next_hop: Ipv4Address,
        egress: u8,
    ) -> Result<(), ConfigError> {
        let any = SubnetMask::from_prefix(0).map_err(ConfigError::Addr)?;
        self.add_route(Ipv4Address::UNSPECIFIED, any, Some(next_hop), egress)
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    // --- DHCP server surface ---

    /// Run a DHCP server on an interface; the interface address becomes
    /// the server identifier.
    pub fn dhcp_server_enable(
        &mut self,
        index: usize,
        config: DhcpServerConfig,
    ) -> Result<(), ConfigError> {
        let iface = self
            .interfaces
            .get(index)
            .ok_or(ConfigError::UnknownPort(index as u8))?;
        let server_ip = iface.ip().ok_or_else(|| {
            ConfigError::UnknownInterface(format!("{} has no address", iface.name()))
        })?;
        let server = DhcpServer::new(server_ip, config)?;
        self.dhcp_servers.insert(index, server);
        Ok(())
    }

    pub fn dhcp_server_disable(&mut self, index: usize) {
        self.dhcp_servers.remove(&index);
    }

    pub fn dhcp_server(&self, index: usize) -> Option<&DhcpServer> {
        self.dhcp_servers.get(&index)
    }

    // --- L2 dispatch ---

    pub fn receive(&mut self, port: u8, frame: EthernetFrame, now: u64) -> DeviceOutput {
        let index = port as usize;
        if self.status == DeviceStatus::Offline
            || !self
                .interfaces
                .get(index)
                .is_some_and(|i| i.is_up())
        {
            return DeviceOutput::none();
        }

        match frame.ethertype {
            EtherType::Arp => self.receive_arp(index, &frame, now),
            EtherType::Ipv4 => self.receive_ipv4(index, &frame, now),
        }
    }

    fn receive_arp(&mut self, index: usize, frame: &EthernetFrame, now: u64) -> DeviceOutput {
        let packet = match ArpPacket::from_bytes(&frame.payload) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("ARP: {} dropped malformed packet: {}", self.name, e);
                return DeviceOutput::none();
            }
        };

        let iface = &self.interfaces[index];
        let needs_reply = self.arp[index].process_packet(&packet, iface.ip(), now);

        let mut out = DeviceOutput::none();
        if needs_reply {
            if let Some(our_ip) = iface.ip() {
                let reply = ArpService::create_reply(
                    our_ip,
                    iface.mac(),
                    packet.sender_ip,
                    packet.sender_mac,
                );
                out.transmits.push(Transmit {
                    port: index as u8,
                    frame: EthernetFrame::new(
                        packet.sender_mac,
                        iface.mac(),
                        EtherType::Arp,
                        reply.to_bytes(),
                    ),
                });
            }
        }

        // A new mapping may unblock parked packets.
        self.flush_pending(&mut out);
        out
    }

    fn receive_ipv4(&mut self, index: usize, frame: &EthernetFrame, now: u64) -> DeviceOutput {
        let packet = match Ipv4Packet::from_bytes(&frame.payload) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("NET: {} dropped malformed IPv4 packet: {}", self.name, e);
                return DeviceOutput::none();
            }
        };

        // DHCP first: clients talk from 0.0.0.0 to the broadcast
        // address, which no route would match.
        if packet.protocol == IpProtocol::Udp {
            if let Ok(dgram) = UdpDatagram::from_bytes(&packet.payload) {
                if dgram.dst_port == DHCP_SERVER_PORT {
                    return self.receive_dhcp(index, &dgram, now);
                }
            }
        }

        if packet.dst.is_broadcast() {
            return DeviceOutput::none();
        }

        let local = self.interfaces.iter().any(|i| i.ip() == Some(packet.dst));
        if local {
            return self.receive_local(&packet);
        }

        self.forward(index, frame, packet)
    }

    /// An IPv4 packet addressed to one of our own interfaces: answer
    /// pings, swallow the rest.
    fn receive_local(&mut self, packet: &Ipv4Packet) -> DeviceOutput {
        if packet.protocol != IpProtocol::Icmp {
            return DeviceOutput::none();
        }
        let Ok(icmp) = IcmpPacket::from_bytes(&packet.payload) else {
            return DeviceOutput::none();
        };
        if icmp.icmp_type != ICMP_ECHO_REQUEST {
            return DeviceOutput::none();
        }

        log::debug!(
            "ICMP: {} answering echo from {} seq={}",
            self.name,
            packet.src,
            icmp.sequence
        );
        let reply = IcmpPacket::echo_reply_to(&icmp);
        let reply_packet = Ipv4Packet::new(
            packet.dst,
            packet.src,
            IpProtocol::Icmp,
            reply.to_bytes(),
        );
        let mut out = DeviceOutput::none();
        self.send_ipv4(reply_packet, None, &mut out);
        out
    }

    fn receive_dhcp(&mut self, index: usize, dgram: &UdpDatagram, now: u64) -> DeviceOutput {
        let Ok(request) = DhcpPacket::from_bytes(&dgram.payload) else {
            return DeviceOutput::none();
        };
        let Some(server) = self.dhcp_servers.get_mut(&index) else {
            return DeviceOutput::none();
        };
        let Some(reply) = server.handle_packet(&request, now) else {
            return DeviceOutput::none();
        };

        let iface = &self.interfaces[index];
        let broadcast = reply.flags & 0x8000 != 0 || reply.yiaddr.is_unspecified();
        let dst_mac = if broadcast {
            MacAddress::BROADCAST
        } else {
            reply.client_mac
        };
        let dst_ip = if broadcast {
            Ipv4Address::BROADCAST
        } else {
            reply.yiaddr
        };

        let udp = UdpDatagram::new(DHCP_SERVER_PORT, DHCP_CLIENT_PORT, reply.to_bytes());
        let ip = Ipv4Packet::new(
            iface.ip().unwrap_or(Ipv4Address::UNSPECIFIED),
            dst_ip,
            IpProtocol::Udp,
            udp.to_bytes(),
        );
        DeviceOutput::transmit(
            index as u8,
            EthernetFrame::new(dst_mac, iface.mac(), EtherType::Ipv4, ip.to_bytes()),
        )
    }

    // --- forwarding ---

    fn forward(&mut self, ingress: usize, frame: &EthernetFrame, packet: Ipv4Packet) -> DeviceOutput {
        let mut out = DeviceOutput::none();

        if packet.ttl <= 1 {
            log::debug!(
                "NET: {} TTL expired for {} -> {}",
                self.name,
                packet.src,
                packet.dst
            );
            self.stats.packets_dropped += 1;
            self.emit_feedback(ingress, &packet, IcmpPacket::time_exceeded(&packet), &mut out);
            out.drops.push((frame.clone(), DropReason::TtlExpired));
            return out;
        }

        if self.routes.lookup(packet.dst).is_none() {
            log::debug!("NET: {} no route to {}", self.name, packet.dst);
            self.stats.packets_dropped += 1;
            self.emit_feedback(
                ingress,
                &packet,
                IcmpPacket::destination_unreachable(&packet),
                &mut out,
            );
            out.drops.push((frame.clone(), DropReason::NoRoute));
            return out;
        }

        let mut forwarded = packet;
        forwarded.ttl -= 1;
        self.send_ipv4(forwarded, Some(frame), &mut out);
        out
    }

    /// Route and emit one IPv4 packet. On an ARP miss the packet is
    /// parked and a request goes out; `origin_frame` feeds the drop
    /// event if the park queue overflows.
    fn send_ipv4(
        &mut self,
        packet: Ipv4Packet,
        origin_frame: Option<&EthernetFrame>,
        out: &mut DeviceOutput,
    ) {
        let Some(route) = self.routes.lookup(packet.dst) else {
            // Callers check reachability for forwarded traffic; locally
            // generated feedback with no return route is dropped quietly.
            return;
        };
        let egress = route.egress as usize;
        let next_hop = route.next_hop.unwrap_or(packet.dst);

        let iface = &self.interfaces[egress];
        if !iface.is_up() || iface.ip().is_none() {
            if let Some(frame) = origin_frame {
                self.stats.packets_dropped += 1;
                out.drops.push((frame.clone(), DropReason::InterfaceDown));
            }
            return;
        }

        match self.arp[egress].resolve(next_hop) {
            Some(mac) => {
                if origin_frame.is_some() {
                    self.stats.packets_forwarded += 1;
                }
                out.transmits.push(Transmit {
                    port: egress as u8,
                    frame: EthernetFrame::new(
                        mac,
                        iface.mac(),
                        EtherType::Ipv4,
                        packet.to_bytes(),
                    ),
                });
            }
            None => {
                let request = ArpService::create_request(
                    iface.ip().unwrap_or(Ipv4Address::UNSPECIFIED),
                    iface.mac(),
                    next_hop,
                );
                out.transmits.push(Transmit {
                    port: egress as u8,
                    frame: EthernetFrame::new(
                        MacAddress::BROADCAST,
                        iface.mac(),
                        EtherType::Arp,
                        request.to_bytes(),
                    ),
                });

                let placeholder = origin_frame.cloned().unwrap_or_else(|| {
                    EthernetFrame::new(
                        MacAddress::BROADCAST,
                        iface.mac(),
                        EtherType::Ipv4,
                        packet.to_bytes(),
                    )
                });
                if self.pending.len() >= MAX_PENDING_ARP {
                    let evicted = self.pending.remove(0);
                    if evicted.transit {
                        self.stats.packets_dropped += 1;
                    }
                    out.drops.push((evicted.frame, DropReason::ArpFailed));
                }
                self.pending.push(PendingForward {
                    next_hop,
                    egress: egress as u8,
                    packet,
                    frame: placeholder,
                    transit: origin_frame.is_some(),
                });
            }
        }
    }

    /// Retry parked packets whose next hop has since resolved.
    fn flush_pending(&mut self, out: &mut DeviceOutput) {
        let parked = std::mem::take(&mut self.pending);
        for entry in parked {
            let egress = entry.egress as usize;
            match self.arp[egress].resolve(entry.next_hop) {
                Some(mac) => {
                    let iface = &self.interfaces[egress];
                    if entry.transit {
                        self.stats.packets_forwarded += 1;
                    }
                    out.transmits.push(Transmit {
                        port: entry.egress,
                        frame: EthernetFrame::new(
                            mac,
                            iface.mac(),
                            EtherType::Ipv4,
                            entry.packet.to_bytes(),
                        ),
                    });
                }
                None => self.pending.push(entry),
            }
        }
    }

    /// ICMP error feedback to the offender, sourced from the ingress
    /// interface address.
    fn emit_feedback(
        &mut self,
        ingress: usize,
        original: &Ipv4Packet,
        feedback: IcmpPacket,
        out: &mut DeviceOutput,
    ) {
        let Some(src_ip) = self.interfaces[ingress].ip() else {
            return;
        };
        let packet = Ipv4Packet::new(
            src_ip,
            original.src,
            IpProtocol::Icmp,
            feedback.to_bytes(),
        );
        self.send_ipv4(packet, None, out);
    }
}
