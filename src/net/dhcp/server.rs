//! DHCP server: lease pool management and DORA handling
//!
//! One server instance binds to one router/host interface. Allocation
//! order on DISCOVER: static reservation, then the client's existing
//! lease, then the lowest free pool address. An exhausted pool produces
//! no reply at all. The `client_mac -> assigned_ip` mapping stays
//! injective at every step because allocation consults committed
//! leases and outstanding offers alike.

use std::collections::{BTreeMap, BTreeSet};

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::error::ConfigError;
use crate::net::dhcp::{DhcpMessageType, DhcpPacket, DEFAULT_LEASE_TIME};

/// Server-side configuration for one interface.
#[derive(Debug, Clone)]
pub struct DhcpServerConfig {
    /// Inclusive pool bounds
    pub pool_start: Ipv4Address,
    pub pool_end: Ipv4Address,
    /// Mask handed to clients
    pub subnet_mask: SubnetMask,
    /// Default gateway handed to clients
    pub router: Option<Ipv4Address>,
    /// DNS servers handed to clients
    pub dns_servers: Vec<Ipv4Address>,
    /// Lease duration in seconds
    pub lease_time: u32,
    pub domain_name: Option<String>,
    /// Fixed `mac -> ip` assignments; may sit outside the pool
    pub static_reservations: BTreeMap<MacAddress, Ipv4Address>,
    /// Pool addresses never handed out
    pub excluded: BTreeSet<Ipv4Address>,
}

impl DhcpServerConfig {
    pub fn new(pool_start: Ipv4Address, pool_end: Ipv4Address, subnet_mask: SubnetMask) -> Self {
        DhcpServerConfig {
            pool_start,
            pool_end,
            subnet_mask,
            router: None,
            dns_servers: Vec::new(),
            lease_time: DEFAULT_LEASE_TIME,
            domain_name: None,
            static_reservations: BTreeMap::new(),
            excluded: BTreeSet::new(),
        }
    }
}

/// One committed lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub client_mac: MacAddress,
    pub assigned_ip: Ipv4Address,
    /// Simulator time at which the lease lapses
    pub expires_at: u64,
    pub static_reservation: bool,
}

/// Monotonic counters exposed for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpServerStats {
    pub discovers_received: u64,
    pub offers_sent: u64,
    pub requests_received: u64,
    pub acks_sent: u64,
    pub naks_sent: u64,
}

/// A DHCP server bound to one interface address.
#[derive(Debug)]
pub struct DhcpServer {
    server_ip: Ipv4Address,
    config: DhcpServerConfig,
    leases: BTreeMap<MacAddress, DhcpLease>,
    /// Tentative reservations between OFFER and REQUEST
    offers: BTreeMap<MacAddress, Ipv4Address>,
    stats: DhcpServerStats,
}

impl DhcpServer {
    pub fn new(server_ip: Ipv4Address, config: DhcpServerConfig) -> Result<Self, ConfigError> {
        if config.pool_start.to_u32() > config.pool_end.to_u32() {
            return Err(ConfigError::BadPool);
        }
        Ok(DhcpServer {
            server_ip,
            config,
            leases: BTreeMap::new(),
            offers: BTreeMap::new(),
            stats: DhcpServerStats::default(),
        })
    }

    pub fn server_ip(&self) -> Ipv4Address {
        self.server_ip
    }

    pub fn config(&self) -> &DhcpServerConfig {
        &self.config
    }

    pub fn stats(&self) -> DhcpServerStats {
        self.stats
    }

    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    /// Snapshot of the lease table for display.
    pub fn leases(&self) -> Vec<DhcpLease> {
        self.leases.values().cloned().collect()
    }

    /// Process one client packet; `None` means no reply is sent (pool
    /// exhausted, stray message, or a RELEASE).
    pub fn handle_packet(&mut self, packet: &DhcpPacket, now: u64) -> Option<DhcpPacket> {
        self.expire_leases(now);
        match packet.message_type {
            DhcpMessageType::Discover => self.handle_discover(packet),
            DhcpMessageType::Request => self.handle_request(packet, now),
            DhcpMessageType::Release => self.handle_release(packet),
            _ => None,
        }
    }

    fn handle_discover(&mut self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        self.stats.discovers_received += 1;
        let mac = packet.client_mac;

        let Some(ip) = self.choose_address(mac) else {
            log::warn!("DHCP: pool exhausted, ignoring DISCOVER from {}", mac);
            return None;
        };

        self.offers.insert(mac, ip);
        self.stats.offers_sent += 1;
        log::info!("DHCP: offering {} to {}", ip, mac);

        let mut offer = self.reply_with_config(packet, DhcpMessageType::Offer);
        offer.yiaddr = ip;
        Some(offer)
    }

    fn handle_request(&mut self, packet: &DhcpPacket, now: u64) -> Option<DhcpPacket> {
        self.stats.requests_received += 1;
        let mac = packet.client_mac;
        // DORA carries the address in option 50; renewals put the bound
        // address in ciaddr instead.
        let requested = packet.options.requested_ip.or_else(|| {
            (!packet.ciaddr.is_unspecified()).then_some(packet.ciaddr)
        });

        let offered = self.offers.get(&mac).copied();
        let leased = self.leases.get(&mac).map(|l| l.assigned_ip);
        let granted = match (requested, offered, leased) {
            (Some(ip), Some(offer), _) if ip == offer => Some(ip),
            (Some(ip), _, Some(lease)) if ip == lease => Some(ip),
            _ => None,
        };

        match granted {
            Some(ip) => {
                self.offers.remove(&mac);
                let static_reservation =
                    self.config.static_reservations.get(&mac) == Some(&ip);
                self.leases.insert(
                    mac,
                    DhcpLease {
                        client_mac: mac,
                        assigned_ip: ip,
                        expires_at: now + self.config.lease_time as u64,
                        static_reservation,
                    },
                );
                self.stats.acks_sent += 1;
                log::info!("DHCP: ack {} for {}", ip, mac);

                let mut ack = self.reply_with_config(packet, DhcpMessageType::Ack);
                ack.yiaddr = ip;
                Some(ack)
            }
            None => {
                self.stats.naks_sent += 1;
                log::warn!(
                    "DHCP: nak for {} (requested {:?})",
                    mac,
                    requested.map(|ip| ip.to_string())
                );
                Some(DhcpPacket::server_reply(packet, DhcpMessageType::Nak))
            }
        }
    }

    fn handle_release(&mut self, packet: &DhcpPacket) -> Option<DhcpPacket> {
        let mac = packet.client_mac;
        self.offers.remove(&mac);
        if let Some(lease) = self.leases.remove(&mac) {
            log::info!("DHCP: released {} from {}", lease.assigned_ip, mac);
        }
        None
    }

    /// Pick an address for `mac`: reservation, existing lease, lowest
    /// free pool address, in that order.
    fn choose_address(&self, mac: MacAddress) -> Option<Ipv4Address> {
        if let Some(&reserved) = self.config.static_reservations.get(&mac) {
            return Some(reserved);
        }
        if let Some(lease) = self.leases.get(&mac) {
            return Some(lease.assigned_ip);
        }
        if let Some(&offered) = self.offers.get(&mac) {
            return Some(offered);
        }

        let mut candidate = self.config.pool_start.to_u32();
        let end = self.config.pool_end.to_u32();
        while candidate <= end {
            let ip = Ipv4Address::from_u32(candidate);
            if self.address_free(ip) {
                return Some(ip);
            }
            candidate += 1;
        }
        None
    }

    fn address_free(&self, ip: Ipv4Address) -> bool {
        ip != self.server_ip
            && !self.config.excluded.contains(&ip)
            && !self.config.static_reservations.values().any(|&r| r == ip)
            && !self.leases.values().any(|l| l.assigned_ip == ip)
            && !self.offers.values().any(|&o| o == ip)
    }

    fn expire_leases(&mut self, now: u64) {
        self.leases.retain(|mac, lease| {
            let live = lease.expires_at > now;
            if !live {
                log::debug!("DHCP: lease {} for {} expired", lease.assigned_ip, mac);
            }
            live
        });
    }

    fn reply_with_config(&self, request: &DhcpPacket, kind: DhcpMessageType) -> DhcpPacket {
        let mut reply = DhcpPacket::server_reply(request, kind);
        reply.siaddr = self.server_ip;
        reply.options.subnet_mask = Some(self.config.subnet_mask);
        reply.options.router = self.config.router;
        reply.options.dns_servers = self.config.dns_servers.clone();
        reply.options.lease_time = Some(self.config.lease_time);
        reply.options.server_id = Some(self.server_ip);
        reply.options.domain_name = self.config.domain_name.clone();
        reply
    }
}
