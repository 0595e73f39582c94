//! ARP (Address Resolution Protocol) implementation
//!
//! Implements RFC 826 for IPv4-to-Ethernet address resolution: the
//! 28-byte packet codec and the per-device cache service. The cache
//! learns from every observed ARP packet (gratuitous learning), and
//! learning is applied before any reply is synthesized.

use std::collections::BTreeMap;

use crate::addr::{Ipv4Address, MacAddress};
use crate::error::ParseError;

/// ARP hardware type for Ethernet
pub const ARP_HTYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4
pub const ARP_PTYPE_IPV4: u16 = 0x0800;

/// ARP packet size for Ethernet/IPv4
pub const ARP_PACKET_SIZE: usize = 28;

/// ARP operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

impl ArpOperation {
    pub fn from_u16(value: u16) -> Result<Self, ParseError> {
        match value {
            1 => Ok(ArpOperation::Request),
            2 => Ok(ArpOperation::Reply),
            other => Err(ParseError::UnknownArpOperation(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// An Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    /// Operation (request or reply)
    pub operation: ArpOperation,
    /// Sender hardware address
    pub sender_mac: MacAddress,
    /// Sender protocol address
    pub sender_ip: Ipv4Address,
    /// Target hardware address (zero in requests)
    pub target_mac: MacAddress,
    /// Target protocol address
    pub target_ip: Ipv4Address,
}

impl ArpPacket {
    /// Parse an ARP packet from raw bytes. Trailing padding bytes are
    /// tolerated.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < ARP_PACKET_SIZE {
            return Err(ParseError::Truncated {
                need: ARP_PACKET_SIZE,
                have: data.len(),
            });
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return Err(ParseError::BadArpFormat);
        }

        let operation = ArpOperation::from_u16(u16::from_be_bytes([data[6], data[7]]))?;
        let sender_mac = MacAddress([data[8], data[9], data[10], data[11], data[12], data[13]]);
        let sender_ip = Ipv4Address([data[14], data[15], data[16], data[17]]);
        let target_mac = MacAddress([data[18], data[19], data[20], data[21], data[22], data[23]]);
        let target_ip = Ipv4Address([data[24], data[25], data[26], data[27]]);

        Ok(ArpPacket {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    /// Serialize the packet to its 28-byte wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ARP_PACKET_SIZE);

        packet.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        packet.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        packet.push(6);
        packet.push(4);
        packet.extend_from_slice(&self.operation.as_u16().to_be_bytes());
        packet.extend_from_slice(&self.sender_mac.0);
        packet.extend_from_slice(&self.sender_ip.0);
        packet.extend_from_slice(&self.target_mac.0);
        packet.extend_from_slice(&self.target_ip.0);

        packet
    }
}

/// One learned mapping in the ARP cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpCacheEntry {
    pub mac: MacAddress,
    /// Simulator time the entry was installed or refreshed
    pub installed_at: u64,
}

/// Per-device ARP state: the cache plus request/reply construction.
///
/// `resolve` is a pure cache lookup; it never blocks and never sends.
/// The owning device decides when to emit requests.
#[derive(Debug, Default)]
pub struct ArpService {
    cache: BTreeMap<Ipv4Address, ArpCacheEntry>,
}

impl ArpService {
    pub fn new() -> Self {
        ArpService {
            cache: BTreeMap::new(),
        }
    }

    /// Build a broadcast request asking who owns `target_ip`.
    pub fn create_request(
        our_ip: Ipv4Address,
        our_mac: MacAddress,
        target_ip: Ipv4Address,
    ) -> ArpPacket {
        ArpPacket {
            operation: ArpOperation::Request,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    /// Build a reply addressed to the original requester.
    pub fn create_reply(
        our_ip: Ipv4Address,
        our_mac: MacAddress,
        requester_ip: Ipv4Address,
        requester_mac: MacAddress,
    ) -> ArpPacket {
        ArpPacket {
            operation: ArpOperation::Reply,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: requester_mac,
            target_ip: requester_ip,
        }
    }

    /// Learn from a received packet and report whether a reply is
    /// needed (the packet is a request for `our_ip`). Learning happens
    /// unconditionally, before the reply decision.
    pub fn process_packet(
        &mut self,
        packet: &ArpPacket,
        our_ip: Option<Ipv4Address>,
        now: u64,
    ) -> bool {
        self.insert(packet.sender_ip, packet.sender_mac, now);

        match (packet.operation, our_ip) {
            (ArpOperation::Request, Some(ip)) if packet.target_ip == ip => {
                log::debug!("ARP: request from {} for our IP {}", packet.sender_ip, ip);
                true
            }
            _ => false,
        }
    }

    /// Cache lookup only.
    pub fn resolve(&self, ip: Ipv4Address) -> Option<MacAddress> {
        self.cache.get(&ip).map(|e| e.mac)
    }

    /// Install or refresh a mapping.
    pub fn insert(&mut self, ip: Ipv4Address, mac: MacAddress, now: u64) {
        self.cache.insert(
            ip,
            ArpCacheEntry {
                mac,
                installed_at: now,
            },
        );
    }

    /// Snapshot of the cache for table display.
    pub fn table(&self) -> Vec<(Ipv4Address, ArpCacheEntry)> {
        self.cache.iter().map(|(ip, e)| (*ip, *e)).collect()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
