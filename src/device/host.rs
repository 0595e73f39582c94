//! End hosts (workstations and servers)
//!
//! A host owns its interfaces, one ARP service, one ICMP echo service
//! and a DHCP client per DHCP-enabled interface. Hosts never forward:
//! an IPv4 packet that is not addressed to the receiving interface is
//! dropped silently. Outgoing packets resolve their next hop through
//! the ARP cache only; on a miss the host emits an ARP request and
//! reports the packet unsendable rather than queueing it.

use std::collections::BTreeMap;

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::device::{DeviceOutput, DeviceStatus, Transmit};
use crate::error::{ConfigError, SendError};
use crate::iface::NetworkInterface;
use crate::net::arp::{ArpPacket, ArpService};
use crate::net::dhcp::client::{DhcpClient, DhcpClientEvent};
use crate::net::dhcp::DhcpPacket;
use crate::net::ethernet::{EtherType, EthernetFrame};
use crate::net::icmp::{
    IcmpPacket, IcmpService, ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST,
    ICMP_TIME_EXCEEDED,
};
use crate::net::ipv4::{IpProtocol, Ipv4Packet};
use crate::net::udp::{UdpDatagram, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::terminal::OsPersona;

/// Result of asking a host to begin one echo attempt.
#[derive(Debug)]
pub enum EchoStart {
    /// The request frame is on its way; await the keyed outcome.
    Started { transmit: Transmit, key: (u16, u16) },
    /// The next hop is not in the ARP cache; this request frame was
    /// emitted instead. Pump and retry.
    NeedArp { transmit: Transmit },
    /// Not sendable at all.
    Failed(SendError),
}

/// A simulated end host.
#[derive(Debug)]
pub struct Host {
    name: String,
    persona: OsPersona,
    status: DeviceStatus,
    interfaces: Vec<NetworkInterface>,
    arp: ArpService,
    icmp: IcmpService,
    dhcp: BTreeMap<usize, DhcpClient>,
    dns_servers: Vec<Ipv4Address>,
}

impl Host {
    /// A host with a single `eth0` interface.
    pub fn new(name: impl Into<String>) -> Self {
        Host {
            name: name.into(),
            persona: OsPersona::Linux,
            status: DeviceStatus::Online,
            interfaces: vec![NetworkInterface::new("eth0")],
            arp: ArpService::new(),
            icmp: IcmpService::new(),
            dhcp: BTreeMap::new(),
            dns_servers: Vec::new(),
        }
    }

    pub fn with_persona(mut self, persona: OsPersona) -> Self {
        self.persona = persona;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persona(&self) -> OsPersona {
        self.persona
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
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

    /// Add another interface; returns its index (== port number).
    pub fn add_interface(&mut self, name: impl Into<String>) -> usize {
        self.interfaces.push(NetworkInterface::new(name));
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

    /// DNS servers learned from the most recent DHCP lease.
    pub fn dns_servers(&self) -> &[Ipv4Address] {
        &self.dns_servers
    }

    pub fn arp(&self) -> &ArpService {
        &self.arp
    }

    pub fn arp_mut(&mut self) -> &mut ArpService {
        &mut self.arp
    }

    pub fn icmp(&self) -> &IcmpService {
        &self.icmp
    }

    pub fn icmp_mut(&mut self) -> &mut IcmpService {
        &mut self.icmp
    }

    /// Power transition. Powering off forces every interface down and
    /// cancels outstanding echo and DHCP exchanges.
    pub fn set_power(&mut self, on: bool) {
        if on {
            self.status = DeviceStatus::Online;
            return;
        }
        self.status = DeviceStatus::Offline;
        for iface in &mut self.interfaces {
            iface.down();
        }
        self.icmp.cancel_all();
        for client in self.dhcp.values_mut() {
            client.reset();
        }
    }

    // --- DHCP client surface ---

    /// Attach a DHCP client to an interface (idempotent).
    pub fn dhcp_enable(&mut self, iface_index: usize, hostname: Option<String>) {
        let mac = self.interfaces[iface_index].mac();
        self.dhcp
            .entry(iface_index)
            .or_insert_with(|| DhcpClient::new(mac, hostname));
    }

    pub fn dhcp_client(&self, iface_index: usize) -> Option<&DhcpClient> {
        self.dhcp.get(&iface_index)
    }

    /// Kick off DISCOVER on an interface with a DHCP client attached.
    pub fn dhcp_start_discover(&mut self, iface_index: usize) -> Option<Transmit> {
        let client = self.dhcp.get_mut(&iface_index)?;
        let discover = client.start_discover();
        Some(self.wrap_dhcp(iface_index, &discover))
    }

    pub fn dhcp_start_renewal(&mut self, iface_index: usize) -> Option<Transmit> {
        let client = self.dhcp.get_mut(&iface_index)?;
        let request = client.start_renewal()?;
        Some(self.wrap_dhcp(iface_index, &request))
    }

    /// Release the lease and clear the interface addressing.
    pub fn dhcp_release(&mut self, iface_index: usize) -> Option<Transmit> {
        let client = self.dhcp.get_mut(&iface_index)?;
        let release = client.release()?;
        let transmit = self.wrap_dhcp(iface_index, &release);
        if let Some(iface) = self.interfaces.get_mut(iface_index) {
            iface.clear_ip();
            iface.set_gateway(None);
        }
        Some(transmit)
    }

    /// Encapsulate a client-originated DHCP packet. DORA traffic is
    /// broadcast; renew/release unicast to the server when its MAC is
    /// already cached, broadcast otherwise.
    fn wrap_dhcp(&self, iface_index: usize, packet: &DhcpPacket) -> Transmit {
        let iface = &self.interfaces[iface_index];
        let src_ip = iface.ip().unwrap_or(Ipv4Address::UNSPECIFIED);
        let dst_ip = if packet.siaddr.is_unspecified() {
            Ipv4Address::BROADCAST
        } else {
            packet.siaddr
        };
        let dst_mac = if dst_ip.is_broadcast() {
            MacAddress::BROADCAST
        } else {
            self.arp.resolve(dst_ip).unwrap_or(MacAddress::BROADCAST)
        };

        let udp = UdpDatagram::new(DHCP_CLIENT_PORT, DHCP_SERVER_PORT, packet.to_bytes());
        let ip = Ipv4Packet::new(src_ip, dst_ip, IpProtocol::Udp, udp.to_bytes());
        Transmit {
            port: iface_index as u8,
            frame: EthernetFrame::new(dst_mac, iface.mac(), EtherType::Ipv4, ip.to_bytes()),
        }
    }

    // --- L3 send ---

    /// Choose the interface a packet to `dst` leaves through: first an
    /// up, configured interface whose subnet contains `dst`, then the
    /// first one with a default gateway.
    pub fn egress_for(&self, dst: Ipv4Address) -> Result<usize, SendError> {
        let candidates = || {
            self.interfaces
                .iter()
                .enumerate()
                .filter(|(_, i)| i.is_up() && i.ip().is_some())
        };
        if let Some((idx, _)) = candidates().find(|(_, i)| i.on_subnet(dst)) {
            return Ok(idx);
        }
        if let Some((idx, _)) = candidates().find(|(_, i)| i.gateway().is_some()) {
            return Ok(idx);
        }
        if candidates().next().is_none() {
            return Err(SendError::Unconfigured);
        }
        Err(SendError::NoRoute(dst))
    }

    /// Next hop for `dst` through interface `iface_index`.
    fn next_hop(&self, iface_index: usize, dst: Ipv4Address) -> Result<Ipv4Address, SendError> {
        let iface = &self.interfaces[iface_index];
        if iface.on_subnet(dst) {
            Ok(dst)
        } else {
            iface.gateway().ok_or(SendError::NoRoute(dst))
        }
    }

    /// Encapsulate and hand back an IPv4 packet for transmission on
    /// `iface_index`. On an ARP miss the returned transmit is the ARP
    /// request instead and the packet is dropped (hosts do not queue).
    fn send_ipv4_on(&mut self, iface_index: usize, packet: Ipv4Packet) -> Result<Transmit, EchoStart> {
        let dst = packet.dst;
        let iface = &self.interfaces[iface_index];
        if !iface.is_up() {
            return Err(EchoStart::Failed(SendError::InterfaceDown));
        }
        let next_hop = match self.next_hop(iface_index, dst) {
            Ok(hop) => hop,
            Err(e) => return Err(EchoStart::Failed(e)),
        };
        match self.arp.resolve(next_hop) {
            Some(mac) => Ok(Transmit {
                port: iface_index as u8,
                frame: EthernetFrame::new(mac, iface.mac(), EtherType::Ipv4, packet.to_bytes()),
            }),
            None => {
                log::debug!(
                    "NET: {} has no ARP entry for {}, requesting",
                    self.name,
                    next_hop
                );
                Err(EchoStart::NeedArp {
                    transmit: self.arp_request_on(iface_index, next_hop),
                })
            }
        }
    }

    fn arp_request_on(&self, iface_index: usize, target: Ipv4Address) -> Transmit {
        let iface = &self.interfaces[iface_index];
        let request = ArpService::create_request(
            iface.ip().unwrap_or(Ipv4Address::UNSPECIFIED),
            iface.mac(),
            target,
        );
        Transmit {
            port: iface_index as u8,
            frame: EthernetFrame::new(
                MacAddress::BROADCAST,
                iface.mac(),
                EtherType::Arp,
                request.to_bytes(),
            ),
        }
    }

    /// Begin one echo attempt toward `target`. The pending slot is only
    /// registered once the frame is actually sendable.
    pub fn start_echo(
        &mut self,
        target: Ipv4Address,
        payload: Vec<u8>,
        ttl: u8,
        timeout: u64,
        now: u64,
    ) -> EchoStart {
        let iface_index = match self.egress_for(target) {
            Ok(idx) => idx,
            Err(e) => return EchoStart::Failed(e),
        };
        let Some(src_ip) = self.interfaces[iface_index].ip() else {
            return EchoStart::Failed(SendError::Unconfigured);
        };

        let next_hop = match self.next_hop(iface_index, target) {
            Ok(hop) => hop,
            Err(e) => return EchoStart::Failed(e),
        };
        if self.arp.resolve(next_hop).is_none() {
            return EchoStart::NeedArp {
                transmit: self.arp_request_on(iface_index, next_hop),
            };
        }

        let (echo, key) = self.icmp.create_echo_request(target, payload, timeout, now);
        let packet =
            Ipv4Packet::new(src_ip, target, IpProtocol::Icmp, echo.to_bytes()).with_ttl(ttl);
        match self.send_ipv4_on(iface_index, packet) {
            Ok(transmit) => EchoStart::Started { transmit, key },
            Err(start) => {
                // The slot must not outlive a failed send.
                self.icmp.abort(key);
                start
            }
        }
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
        let needs_reply = self.arp.process_packet(&packet, iface.ip(), now);
        if !needs_reply {
            return DeviceOutput::none();
        }

        let Some(our_ip) = iface.ip() else {
            return DeviceOutput::none();
        };
        let reply =
            ArpService::create_reply(our_ip, iface.mac(), packet.sender_ip, packet.sender_mac);
        DeviceOutput::transmit(
            index as u8,
            EthernetFrame::new(
                packet.sender_mac,
                iface.mac(),
                EtherType::Arp,
                reply.to_bytes(),
            ),
        )
    }

    fn receive_ipv4(&mut self, index: usize, frame: &EthernetFrame, now: u64) -> DeviceOutput {
        let packet = match Ipv4Packet::from_bytes(&frame.payload) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("NET: {} dropped malformed IPv4 packet: {}", self.name, e);
                return DeviceOutput::none();
            }
        };

        let iface = &self.interfaces[index];
        let for_us = iface.ip() == Some(packet.dst) || packet.dst.is_broadcast();

        match packet.protocol {
            IpProtocol::Udp => self.receive_udp(index, &packet, now),
            IpProtocol::Icmp if for_us => self.receive_icmp(index, &packet),
            _ => {
                // Not ours; hosts do not forward.
                DeviceOutput::none()
            }
        }
    }

    fn receive_icmp(&mut self, index: usize, packet: &Ipv4Packet) -> DeviceOutput {
        let icmp = match IcmpPacket::from_bytes(&packet.payload) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("ICMP: {} dropped malformed packet: {}", self.name, e);
                return DeviceOutput::none();
            }
        };

        match icmp.icmp_type {
            ICMP_ECHO_REQUEST if !packet.dst.is_broadcast() => {
                log::debug!(
                    "ICMP: {} echo request from {} seq={}",
                    self.name,
                    packet.src,
                    icmp.sequence
                );
                let reply = IcmpPacket::echo_reply_to(&icmp);
                let Some(our_ip) = self.interfaces[index].ip() else {
                    return DeviceOutput::none();
                };
                let reply_packet =
                    Ipv4Packet::new(our_ip, packet.src, IpProtocol::Icmp, reply.to_bytes());
                match self.send_ipv4_on(index, reply_packet) {
                    Ok(transmit) => DeviceOutput {
                        transmits: vec![transmit],
                        drops: Vec::new(),
                    },
                    Err(EchoStart::NeedArp { transmit }) => DeviceOutput {
                        transmits: vec![transmit],
                        drops: Vec::new(),
                    },
                    Err(_) => DeviceOutput::none(),
                }
            }
            ICMP_ECHO_REPLY => {
                self.icmp.handle_echo_reply(packet.src, &icmp);
                DeviceOutput::none()
            }
            ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
                self.icmp.handle_error(packet.src, &icmp);
                DeviceOutput::none()
            }
            _ => DeviceOutput::none(),
        }
    }

    fn receive_udp(&mut self, index: usize, packet: &Ipv4Packet, now: u64) -> DeviceOutput {
        let dgram = match UdpDatagram::from_bytes(&packet.payload) {
            Ok(d) => d,
            Err(_) => return DeviceOutput::none(),
        };

        // DHCP replies are deliverable even while the interface has no
        // address yet. There is no socket layer, so no other UDP
        // traffic has a consumer on a host.
        if dgram.dst_port == DHCP_CLIENT_PORT {
            return self.receive_dhcp(index, &dgram, now);
        }
        DeviceOutput::none()
    }

    fn receive_dhcp(&mut self, index: usize, dgram: &UdpDatagram, now: u64) -> DeviceOutput {
        let Ok(packet) = DhcpPacket::from_bytes(&dgram.payload) else {
            return DeviceOutput::none();
        };
        let Some(client) = self.dhcp.get_mut(&index) else {
            return DeviceOutput::none();
        };

        match client.handle_packet(&packet, now) {
            DhcpClientEvent::Transmit(reply) => {
                let transmit = self.wrap_dhcp(index, &reply);
                DeviceOutput {
                    transmits: vec![transmit],
                    drops: Vec::new(),
                }
            }
            DhcpClientEvent::Configured(binding) => {
                log::info!(
                    "DHCP: {} bound {}/{} via {}",
                    self.name,
                    binding.ip,
                    binding.subnet_mask.prefix_len(),
                    binding.server
                );
                let iface = &mut self.interfaces[index];
                iface.set_ip(binding.ip, binding.subnet_mask);
                iface.set_gateway(binding.router);
                self.dns_servers = binding.dns_servers.clone();
                DeviceOutput::none()
            }
            DhcpClientEvent::Deconfigured => {
                let iface = &mut self.interfaces[index];
                iface.clear_ip();
                iface.set_gateway(None);
                DeviceOutput::none()
            }
            DhcpClientEvent::None => DeviceOutput::none(),
        }
    }

    /// Convenience used by the terminal facade: configure and raise an
    /// interface in one step.
    pub fn configure_interface(
        &mut self,
        name: &str,
        ip: Option<(Ipv4Address, SubnetMask)>,
        gateway: Option<Ipv4Address>,
        admin_up: Option<bool>,
    ) -> Result<(), ConfigError> {
        let index = self.interface_index(name)?;
        let iface = &mut self.interfaces[index];
        if let Some((ip, mask)) = ip {
            iface.set_ip(ip, mask);
        }
        if let Some(gw) = gateway {
            iface.set_gateway(Some(gw));
        }
        match admin_up {
            Some(true) => iface.up(),
            Some(false) => iface.down(),
            None => {}
        }
        Ok(())
    }
}
