//! Protocol codecs and per-device protocol services
//!
//! Every PDU offers `to_bytes`/`from_bytes` with a round-trip
//! guarantee for legal values:
//! - Ethernet II frames ([`ethernet`])
//! - ARP packets and the cache service ([`arp`])
//! - IPv4 packets and the internet checksum ([`ipv4`])
//! - ICMP echo/error packets and the pending-echo service ([`icmp`])
//! - UDP datagrams ([`udp`])
//! - DHCP packets, server and client ([`dhcp`])

pub mod arp;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod udp;
