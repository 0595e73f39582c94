//! ICMP (Internet Control Message Protocol) implementation
//!
//! Implements ICMP echo (ping) request and reply (RFC 792) plus the
//! time-exceeded and destination-unreachable feedback routers emit.
//! `IcmpService` keeps the per-device registry of outstanding echo
//! requests keyed by `(identifier, sequence)`; replies complete the
//! matching slot synchronously, late or unsolicited replies are
//! discarded.

use core::sync::atomic::{AtomicU16, Ordering};
use std::collections::BTreeMap;

use crate::addr::Ipv4Address;
use crate::error::ParseError;
use crate::net::ipv4::{internet_checksum, Ipv4Packet, IPV4_HEADER_SIZE};

/// ICMP type: Echo Reply
pub const ICMP_ECHO_REPLY: u8 = 0;

/// ICMP type: Destination Unreachable
pub const ICMP_DEST_UNREACHABLE: u8 = 3;

/// ICMP type: Echo Request
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// ICMP type: Time Exceeded
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// ICMP header size
pub const ICMP_HEADER_SIZE: usize = 8;

/// Default payload carried by generated echo requests
pub const ECHO_PAYLOAD: &[u8] = b"netsim ping";

/// Identifier counter; each `IcmpService` instance gets its own.
static NEXT_IDENTIFIER: AtomicU16 = AtomicU16::new(1);

/// An ICMP packet.
///
/// For echo request/reply the identifier and sequence fields carry the
/// correlation key; for error messages (types 3 and 11) both are zero
/// and the payload holds the offending IP header plus the first eight
/// payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    /// ICMP type
    pub icmp_type: u8,
    /// ICMP code
    pub code: u8,
    /// Identifier (echo only)
    pub identifier: u16,
    /// Sequence number (echo only)
    pub sequence: u16,
    /// Payload data
    pub payload: Vec<u8>,
}

impl IcmpPacket {
    /// Parse an ICMP packet, verifying the checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < ICMP_HEADER_SIZE {
            return Err(ParseError::Truncated {
                need: ICMP_HEADER_SIZE,
                have: data.len(),
            });
        }

        if internet_checksum(data) != 0 {
            return Err(ParseError::BadChecksum);
        }

        Ok(IcmpPacket {
            icmp_type: data[0],
            code: data[1],
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
            payload: data[ICMP_HEADER_SIZE..].to_vec(),
        })
    }

    /// Serialize the packet, computing the checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());

        packet.push(self.icmp_type);
        packet.push(self.code);
        // Checksum placeholder
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&self.identifier.to_be_bytes());
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&self.payload);

        let checksum = internet_checksum(&packet);
        packet[2] = (checksum >> 8) as u8;
        packet[3] = (checksum & 0xFF) as u8;

        packet
    }

    /// Build an echo request.
    pub fn echo_request(identifier: u16, sequence: u16, payload: Vec<u8>) -> Self {
        IcmpPacket {
            icmp_type: ICMP_ECHO_REQUEST,
            code: 0,
            identifier,
            sequence,
            payload,
        }
    }

    /// Build the reply to an echo request, preserving identifier,
    /// sequence and payload.
    pub fn echo_reply_to(request: &IcmpPacket) -> Self {
        IcmpPacket {
            icmp_type: ICMP_ECHO_REPLY,
            code: 0,
            identifier: request.identifier,
            sequence: request.sequence,
            payload: request.payload.clone(),
        }
    }

    /// Build a TTL-expired notice quoting the dropped packet.
    pub fn time_exceeded(original: &Ipv4Packet) -> Self {
        IcmpPacket {
            icmp_type: ICMP_TIME_EXCEEDED,
            code: 0, // TTL exceeded in transit
            identifier: 0,
            sequence: 0,
            payload: Self::quote(original),
        }
    }

    /// Build a no-route notice quoting the dropped packet.
    pub fn destination_unreachable(original: &Ipv4Packet) -> Self {
        IcmpPacket {
            icmp_type: ICMP_DEST_UNREACHABLE,
            code: 0, // network unreachable
            identifier: 0,
            sequence: 0,
            payload: Self::quote(original),
        }
    }

    /// The quoted context of an error message: offending IP header plus
    /// the first eight payload bytes.
    fn quote(original: &Ipv4Packet) -> Vec<u8> {
        let bytes = original.to_bytes();
        let keep = bytes.len().min(IPV4_HEADER_SIZE + 8);
        bytes[..keep].to_vec()
    }

    /// For an error message quoting an echo request, recover the
    /// `(identifier, sequence)` key of that request.
    pub fn quoted_echo_key(&self) -> Option<(u16, u16)> {
        if self.icmp_type != ICMP_TIME_EXCEEDED && self.icmp_type != ICMP_DEST_UNREACHABLE {
            return None;
        }
        let inner = self.payload.get(IPV4_HEADER_SIZE..)?;
        if inner.len() < ICMP_HEADER_SIZE || inner[0] != ICMP_ECHO_REQUEST {
            return None;
        }
        Some((
            u16::from_be_bytes([inner[4], inner[5]]),
            u16::from_be_bytes([inner[6], inner[7]]),
        ))
    }
}

/// Terminal state of one echo attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    /// The target answered.
    Reply { from: Ipv4Address },
    /// A router on the path reported TTL expiry.
    TimeExceeded { from: Ipv4Address },
    /// A router on the path reported no route.
    Unreachable { from: Ipv4Address },
    /// No answer before the symbolic timeout.
    TimedOut,
    /// The device was powered off while the request was outstanding.
    Cancelled,
}

#[derive(Debug, Clone)]
struct PendingEcho {
    target: Ipv4Address,
    issued_at: u64,
    timeout: u64,
}

/// Per-device echo bookkeeping.
#[derive(Debug)]
pub struct IcmpService {
    identifier: u16,
    next_sequence: u16,
    pending: BTreeMap<(u16, u16), PendingEcho>,
    completed: BTreeMap<(u16, u16), EchoOutcome>,
}

impl IcmpService {
    pub fn new() -> Self {
        IcmpService {
            identifier: NEXT_IDENTIFIER.fetch_add(1, Ordering::Relaxed),
            next_sequence: 0,
            pending: BTreeMap::new(),
            completed: BTreeMap::new(),
        }
    }

    /// Build an echo request and register its pending slot. Returns the
    /// packet and the correlation key.
    pub fn create_echo_request(
        &mut self,
        target: Ipv4Address,
        payload: Vec<u8>,
        timeout: u64,
        now: u64,
    ) -> (IcmpPacket, (u16, u16)) {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let key = (self.identifier, self.next_sequence);
        self.pending.insert(
            key,
            PendingEcho {
                target,
                issued_at: now,
                timeout,
            },
        );
        let packet = IcmpPacket::echo_request(key.0, key.1, payload);
        (packet, key)
    }

    /// Complete the matching slot for a received echo reply. Returns
    /// false for late or unsolicited replies, which are discarded.
    pub fn handle_echo_reply(&mut self, src: Ipv4Address, packet: &IcmpPacket) -> bool {
        let key = (packet.identifier, packet.sequence);
        match self.pending.remove(&key) {
            Some(_) => {
                log::debug!("ICMP: echo reply from {} seq={}", src, packet.sequence);
                self.completed.insert(key, EchoOutcome::Reply { from: src });
                true
            }
            None => {
                log::debug!("ICMP: unsolicited echo reply from {} discarded", src);
                false
            }
        }
    }

    /// Complete the matching slot for a received error message (time
    /// exceeded or destination unreachable) quoting one of our echoes.
    pub fn handle_error(&mut self, src: Ipv4Address, packet: &IcmpPacket) -> bool {
        let Some(key) = packet.quoted_echo_key() else {
            return false;
        };
        if self.pending.remove(&key).is_none() {
            return false;
        }
        let outcome = match packet.icmp_type {
            ICMP_TIME_EXCEEDED => EchoOutcome::TimeExceeded { from: src },
            _ => EchoOutcome::Unreachable { from: src },
        };
        self.completed.insert(key, outcome);
        true
    }

    /// Drop a slot without recording an outcome (the request never
    /// left the device).
    pub fn abort(&mut self, key: (u16, u16)) {
        self.pending.remove(&key);
    }

    /// Mark a still-pending slot as timed out.
    pub fn fail_timeout(&mut self, key: (u16, u16)) {
        if self.pending.remove(&key).is_some() {
            self.completed.insert(key, EchoOutcome::TimedOut);
        }
    }

    /// Take the terminal outcome of an attempt, if it has one yet.
    pub fn take_outcome(&mut self, key: (u16, u16)) -> Option<EchoOutcome> {
        self.completed.remove(&key)
    }

    /// Cancel every outstanding request (device powered off).
    pub fn cancel_all(&mut self) {
        let keys: Vec<_> = self.pending.keys().copied().collect();
        for key in keys {
            self.pending.remove(&key);
            self.completed.insert(key, EchoOutcome::Cancelled);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Target of a pending attempt (used for timeout reporting).
    pub fn pending_target(&self, key: (u16, u16)) -> Option<Ipv4Address> {
        self.pending.get(&key).map(|p| p.target)
    }

    /// Fail every pending slot whose symbolic timeout has lapsed.
    pub fn expire(&mut self, now: u64) {
        let lapsed: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.issued_at) >= p.timeout)
            .map(|(key, _)| *key)
            .collect();
        for key in lapsed {
            self.pending.remove(&key);
            self.completed.insert(key, EchoOutcome::TimedOut);
        }
    }
}

impl Default for IcmpService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ipv4::IpProtocol;

    fn ip(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    #[test]
    fn echo_roundtrip() {
        let pkt = IcmpPacket::echo_request(0x1234, 7, b"payload".to_vec());
        let parsed = IcmpPacket::from_bytes(&pkt.to_bytes()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn corrupt_checksum_rejected() {
        let mut bytes = IcmpPacket::echo_request(1, 1, vec![]).to_bytes();
        bytes[7] ^= 0xFF;
        assert_eq!(IcmpPacket::from_bytes(&bytes), Err(ParseError::BadChecksum));
    }

    #[test]
    fn reply_preserves_identifier_sequence_payload() {
        let req = IcmpPacket::echo_request(42, 3, b"abc".to_vec());
        let reply = IcmpPacket::echo_reply_to(&req);
        assert_eq!(reply.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(reply.identifier, 42);
        assert_eq!(reply.sequence, 3);
        assert_eq!(reply.payload, b"abc");
    }

    #[test]
    fn time_exceeded_quotes_the_echo_key() {
        let echo = IcmpPacket::echo_request(0xBEEF, 9, ECHO_PAYLOAD.to_vec());
        let original = Ipv4Packet::new(
            ip("10.0.0.10"),
            ip("192.168.1.10"),
            IpProtocol::Icmp,
            echo.to_bytes(),
        )
        .with_ttl(1);
        let te = IcmpPacket::time_exceeded(&original);
        assert_eq!(te.payload.len(), IPV4_HEADER_SIZE + 8);
        assert_eq!(te.quoted_echo_key(), Some((0xBEEF, 9)));
        // Survives its own wire trip.
        let parsed = IcmpPacket::from_bytes(&te.to_bytes()).unwrap();
        assert_eq!(parsed.quoted_echo_key(), Some((0xBEEF, 9)));
    }

    #[test]
    fn pending_slot_completes_once() {
        let mut icmp = IcmpService::new();
        let (pkt, key) = icmp.create_echo_request(ip("10.0.0.2"), ECHO_PAYLOAD.to_vec(), 4, 0);
        assert_eq!(icmp.pending_count(), 1);

        let reply = IcmpPacket::echo_reply_to(&pkt);
        assert!(icmp.handle_echo_reply(ip("10.0.0.2"), &reply));
        assert_eq!(icmp.pending_count(), 0);
        assert_eq!(
            icmp.take_outcome(key),
            Some(EchoOutcome::Reply {
                from: ip("10.0.0.2")
            })
        );
        // A duplicate reply is discarded.
        assert!(!icmp.handle_echo_reply(ip("10.0.0.2"), &reply));
    }

    #[test]
    fn unsolicited_reply_discarded() {
        let mut icmp = IcmpService::new();
        let stray = IcmpPacket::echo_reply_to(&IcmpPacket::echo_request(999, 1, vec![]));
        assert!(!icmp.handle_echo_reply(ip("10.0.0.9"), &stray));
    }

    #[test]
    fn timeout_and_cancel() {
        let mut icmp = IcmpService::new();
        let (_, key1) = icmp.create_echo_request(ip("10.0.0.2"), vec![], 4, 0);
        icmp.fail_timeout(key1);
        assert_eq!(icmp.take_outcome(key1), Some(EchoOutcome::TimedOut));

        let (_, key2) = icmp.create_echo_request(ip("10.0.0.3"), vec![], 4, 0);
        icmp.cancel_all();
        assert_eq!(icmp.take_outcome(key2), Some(EchoOutcome::Cancelled));
    }

    #[test]
    fn expire_fails_only_lapsed_slots() {
        let mut icmp = IcmpService::new();
        let (_, old) = icmp.create_echo_request(ip("10.0.0.2"), vec![], 4, 0);
        let (_, fresh) = icmp.create_echo_request(ip("10.0.0.3"), vec![], 4, 3);
        icmp.expire(5);
        assert_eq!(icmp.take_outcome(old), Some(EchoOutcome::TimedOut));
        assert_eq!(icmp.take_outcome(fresh), None);
        assert_eq!(icmp.pending_count(), 1);
    }

    #[test]
    fn distinct_services_use_distinct_identifiers() {
        let mut a = IcmpService::new();
        let mut b = IcmpService::new();
        let (pa, _) = a.create_echo_request(ip("10.0.0.1"), vec![], 4, 0);
        let (pb, _) = b.create_echo_request(ip("10.0.0.1"), vec![], 4, 0);
        assert_ne!(pa.identifier, pb.identifier);
    }
}
