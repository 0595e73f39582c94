//! DHCP client state machine
//!
//! Drives one interface through `Init -> Selecting -> Requesting ->
//! Bound -> Renewing -> Init`. The machine is packet-driven: the owner
//! feeds it server replies and transmits whatever packets it hands
//! back. Replies that do not fit the current state, carry a foreign
//! transaction ID, or name another client's MAC are silently dropped.

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::net::dhcp::{DhcpMessageType, DhcpPacket};

/// Client states. Renewing re-enters Bound on ACK; everything else
/// funnels back to Init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpClientState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
}

/// The configuration a committed lease gives the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpBinding {
    pub ip: Ipv4Address,
    pub subnet_mask: SubnetMask,
    pub router: Option<Ipv4Address>,
    pub dns_servers: Vec<Ipv4Address>,
    pub lease_time: u32,
    pub server: Ipv4Address,
    pub acquired_at: u64,
}

impl DhcpBinding {
    /// Symbolic renewal point, half the lease.
    pub fn renewal_at(&self) -> u64 {
        self.acquired_at + self.lease_time as u64 / 2
    }
}

/// What the owner must do after feeding the machine a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpClientEvent {
    /// Nothing; the packet was consumed or dropped.
    None,
    /// Send this packet (broadcast REQUEST after an OFFER).
    Transmit(DhcpPacket),
    /// Lease committed: configure the interface.
    Configured(DhcpBinding),
    /// Lease lost (NAK while renewing): clear the interface.
    Deconfigured,
}

/// DHCP client for a single interface.
#[derive(Debug)]
pub struct DhcpClient {
    mac: MacAddress,
    hostname: Option<String>,
    state: DhcpClientState,
    xid: u32,
    /// Offer under consideration: (offered IP, server id)
    offer: Option<(Ipv4Address, Ipv4Address)>,
    binding: Option<DhcpBinding>,
}

impl DhcpClient {
    pub fn new(mac: MacAddress, hostname: Option<String>) -> Self {
        DhcpClient {
            mac,
            hostname,
            state: DhcpClientState::Init,
            // Seeded from the MAC so distinct clients use distinct
            // transaction streams without an RNG.
            xid: u32::from_be_bytes([mac.0[2], mac.0[3], mac.0[4], mac.0[5]]),
            offer: None,
            binding: None,
        }
    }

    pub fn state(&self) -> DhcpClientState {
        self.state
    }

    pub fn binding(&self) -> Option<&DhcpBinding> {
        self.binding.as_ref()
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    fn next_xid(&mut self) -> u32 {
        self.xid = self.xid.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.xid
    }

    /// Begin (or restart) lease acquisition. Returns the DISCOVER to
    /// broadcast.
    pub fn start_discover(&mut self) -> DhcpPacket {
        self.offer = None;
        self.state = DhcpClientState::Selecting;
        let xid = self.next_xid();
        log::info!("DHCP: {} discovering (xid {:#010x})", self.mac, xid);

        let mut discover = DhcpPacket::client_request(self.mac, xid, DhcpMessageType::Discover);
        discover.options.hostname = self.hostname.clone();
        discover
    }

    /// Begin renewal of a bound lease. Returns the REQUEST addressed to
    /// the leasing server, or `None` when no lease is bound.
    pub fn start_renewal(&mut self) -> Option<DhcpPacket> {
        if self.state != DhcpClientState::Bound {
            return None;
        }
        self.state = DhcpClientState::Renewing;
        let xid = self.next_xid();
        let binding = self.binding.as_ref()?;

        let mut request = DhcpPacket::client_request(self.mac, xid, DhcpMessageType::Request);
        request.flags = 0; // unicast to the known server
        request.ciaddr = binding.ip;
        request.siaddr = binding.server;
        request.options.server_id = Some(binding.server);
        Some(request)
    }

    /// Give the lease back. Returns the RELEASE to send, or `None`
    /// when nothing is bound.
    pub fn release(&mut self) -> Option<DhcpPacket> {
        if !matches!(
            self.state,
            DhcpClientState::Bound | DhcpClientState::Renewing
        ) {
            return None;
        }
        let binding = self.binding.take()?;
        self.state = DhcpClientState::Init;
        self.offer = None;
        log::info!("DHCP: {} releasing {}", self.mac, binding.ip);

        let mut release =
            DhcpPacket::client_request(self.mac, self.next_xid(), DhcpMessageType::Release);
        release.flags = 0;
        release.ciaddr = binding.ip;
        release.siaddr = binding.server;
        release.options.server_id = Some(binding.server);
        Some(release)
    }

    /// Drop all state without notifying the server (device power-off).
    pub fn reset(&mut self) {
        self.state = DhcpClientState::Init;
        self.offer = None;
        self.binding = None;
    }

    /// Feed one received server packet through the machine.
    pub fn handle_packet(&mut self, packet: &DhcpPacket, now: u64) -> DhcpClientEvent {
        if packet.client_mac != self.mac || packet.xid != self.xid {
            return DhcpClientEvent::None;
        }

        match (self.state, packet.message_type) {
            (DhcpClientState::Selecting, DhcpMessageType::Offer) => {
                let Some(server) = packet.options.server_id.or_else(|| {
                    (!packet.siaddr.is_unspecified()).then_some(packet.siaddr)
                }) else {
                    return DhcpClientEvent::None;
                };
                self.offer = Some((packet.yiaddr, server));
                self.state = DhcpClientState::Requesting;
                log::info!("DHCP: {} taking offer {} from {}", self.mac, packet.yiaddr, server);

                let mut request =
                    DhcpPacket::client_request(self.mac, self.xid, DhcpMessageType::Request);
                request.options.requested_ip = Some(packet.yiaddr);
                request.options.server_id = Some(server);
                request.options.hostname = self.hostname.clone();
                DhcpClientEvent::Transmit(request)
            }
            (DhcpClientState::Requesting, DhcpMessageType::Ack) => {
                let Some((_, server)) = self.offer.take() else {
                    return DhcpClientEvent::None;
                };
                let binding = self.binding_from_ack(packet, server, now);
                self.state = DhcpClientState::Bound;
                self.binding = Some(binding.clone());
                DhcpClientEvent::Configured(binding)
            }
            (DhcpClientState::Requesting, DhcpMessageType::Nak) => {
                log::warn!("DHCP: {} got NAK while requesting", self.mac);
                self.offer = None;
                self.state = DhcpClientState::Init;
                DhcpClientEvent::None
            }
            (DhcpClientState::Renewing, DhcpMessageType::Ack) => {
                let server = packet
                    .options
                    .server_id
                    .or_else(|| self.binding.as_ref().map(|b| b.server));
                let Some(server) = server else {
                    return DhcpClientEvent::None;
                };
                let binding = self.binding_from_ack(packet, server, now);
                self.state = DhcpClientState::Bound;
                self.binding = Some(binding.clone());
                DhcpClientEvent::Configured(binding)
            }
            (DhcpClientState::Renewing, DhcpMessageType::Nak) => {
                log::warn!("DHCP: {} lease refused on renewal", self.mac);
                self.binding = None;
                self.state = DhcpClientState::Init;
                DhcpClientEvent::Deconfigured
            }
            _ => DhcpClientEvent::None,
        }
    }

    fn binding_from_ack(&self, ack: &DhcpPacket, server: Ipv4Address, now: u64) -> DhcpBinding {
        DhcpBinding {
            ip: ack.yiaddr,
            subnet_mask: ack.options.subnet_mask.unwrap_or(SubnetMask::PREFIX_24),
            router: ack.options.router,
            dns_servers: ack.options.dns_servers.clone(),
            lease_time: ack
                .options
                .lease_time
                .unwrap_or(crate::net::dhcp::DEFAULT_LEASE_TIME),
            server,
            acquired_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::dhcp::server::{DhcpServer, DhcpServerConfig};

    fn ip(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    fn server() -> DhcpServer {
        let mut config = DhcpServerConfig::new(
            ip("192.168.1.100"),
            ip("192.168.1.200"),
            "255.255.255.0".parse().unwrap(),
        );
        config.router = Some(ip("192.168.1.1"));
        config.lease_time = 3600;
        DhcpServer::new(ip("192.168.1.1"), config).unwrap()
    }

    #[test]
    fn full_dora_against_a_server() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]), None);

        let discover = client.start_discover();
        assert_eq!(client.state(), DhcpClientState::Selecting);

        let offer = srv.handle_packet(&discover, 0).unwrap();
        let DhcpClientEvent::Transmit(request) = client.handle_packet(&offer, 0) else {
            panic!("expected REQUEST after OFFER");
        };
        assert_eq!(client.state(), DhcpClientState::Requesting);
        assert_eq!(request.options.requested_ip, Some(ip("192.168.1.100")));

        let ack = srv.handle_packet(&request, 0).unwrap();
        let DhcpClientEvent::Configured(binding) = client.handle_packet(&ack, 0) else {
            panic!("expected lease after ACK");
        };
        assert_eq!(client.state(), DhcpClientState::Bound);
        assert_eq!(binding.ip, ip("192.168.1.100"));
        assert_eq!(binding.router, Some(ip("192.168.1.1")));
        assert_eq!(binding.lease_time, 3600);
        assert_eq!(binding.renewal_at(), 1800);
    }

    #[test]
    fn renewal_refreshes_the_binding() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([2, 0, 0, 0, 0, 7]), None);
        run_dora(&mut srv, &mut client, 0);

        let renew = client.start_renewal().unwrap();
        assert_eq!(client.state(), DhcpClientState::Renewing);
        assert_eq!(renew.ciaddr, ip("192.168.1.100"));
        assert_eq!(renew.flags, 0);

        let ack = srv.handle_packet(&renew, 1800).unwrap();
        let DhcpClientEvent::Configured(binding) = client.handle_packet(&ack, 1800) else {
            panic!("expected refreshed lease");
        };
        assert_eq!(client.state(), DhcpClientState::Bound);
        assert_eq!(binding.acquired_at, 1800);
    }

    #[test]
    fn release_clears_binding_and_server_lease() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([2, 0, 0, 0, 0, 8]), None);
        run_dora(&mut srv, &mut client, 0);

        let release = client.release().unwrap();
        assert_eq!(client.state(), DhcpClientState::Init);
        assert!(client.binding().is_none());
        assert_eq!(srv.handle_packet(&release, 10), None);
        assert_eq!(srv.active_leases(), 0);
    }

    #[test]
    fn unexpected_packets_are_dropped() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([2, 0, 0, 0, 0, 9]), None);

        // An OFFER in Init is ignored outright.
        let discover = client.start_discover();
        let offer = srv.handle_packet(&discover, 0).unwrap();
        client.reset();
        assert_eq!(client.handle_packet(&offer, 0), DhcpClientEvent::None);
        assert_eq!(client.state(), DhcpClientState::Init);
    }

    #[test]
    fn foreign_xid_is_ignored() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([2, 0, 0, 0, 0, 10]), None);
        let discover = client.start_discover();
        let mut offer = srv.handle_packet(&discover, 0).unwrap();
        offer.xid ^= 0xDEAD_BEEF;
        assert_eq!(client.handle_packet(&offer, 0), DhcpClientEvent::None);
        assert_eq!(client.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn nak_while_requesting_returns_to_init() {
        let mut srv = server();
        let mut client = DhcpClient::new(MacAddress([2, 0, 0, 0, 0, 11]), None);
        let discover = client.start_discover();
        let offer = srv.handle_packet(&discover, 0).unwrap();
        let DhcpClientEvent::Transmit(mut request) = client.handle_packet(&offer, 0) else {
            panic!("expected REQUEST");
        };
        request.options.requested_ip = Some(ip("192.168.1.177"));
        let nak = srv.handle_packet(&request, 0).unwrap();
        assert_eq!(client.handle_packet(&nak, 0), DhcpClientEvent::None);
        assert_eq!(client.state(), DhcpClientState::Init);
        assert!(client.binding().is_none());
    }

    fn run_dora(srv: &mut DhcpServer, client: &mut DhcpClient, now: u64) {
        let discover = client.start_discover();
        let offer = srv.handle_packet(&discover, now).unwrap();
        let DhcpClientEvent::Transmit(request) = client.handle_packet(&offer, now) else {
            panic!("expected REQUEST");
        };
        let ack = srv.handle_packet(&request, now).unwrap();
        let DhcpClientEvent::Configured(_) = client.handle_packet(&ack, now) else {
            panic!("expected lease");
        };
    }
}
