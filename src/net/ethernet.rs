//! Ethernet frame parsing and construction
//!
//! Implements the IEEE 802.3 Ethernet II frame format. Frames carry
//! either ARP or IPv4; anything else is rejected at parse time.

use core::fmt;

use crate::addr::MacAddress;
use crate::error::ParseError;

/// Ethernet frame header size (without VLAN tag)
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Minimum Ethernet frame size (excluding FCS)
pub const ETHERNET_MIN_SIZE: usize = 60;

/// Maximum Ethernet payload size (MTU)
pub const ETHERNET_MTU: usize = 1500;

/// The protocols a frame can carry. The set is closed: parsing any
/// other ethertype fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EtherType {
    /// IPv4, `0x0800`
    Ipv4 = 0x0800,
    /// ARP, `0x0806`
    Arp = 0x0806,
}

impl EtherType {
    pub fn from_u16(value: u16) -> Result<Self, ParseError> {
        match value {
            0x0800 => Ok(EtherType::Ipv4),
            0x0806 => Ok(EtherType::Arp),
            other => Err(ParseError::UnknownEtherType(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
        }
    }
}

/// An Ethernet II frame with an owned payload.
///
/// Serializing pads the payload with zeros up to the 60-byte minimum;
/// parsing keeps whatever bytes follow the header, so encapsulated
/// protocols trim padding using their own length fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    /// Destination MAC address
    pub dst: MacAddress,
    /// Source MAC address
    pub src: MacAddress,
    /// EtherType of the payload
    pub ethertype: EtherType,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(dst: MacAddress, src: MacAddress, ethertype: EtherType, payload: Vec<u8>) -> Self {
        EthernetFrame {
            dst,
            src,
            ethertype,
            payload,
        }
    }

    /// Size of the frame as observed on the wire, padding included.
    pub fn wire_size(&self) -> usize {
        (ETHERNET_HEADER_SIZE + self.payload.len()).max(ETHERNET_MIN_SIZE)
    }

    /// Parse a frame from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < ETHERNET_HEADER_SIZE {
            return Err(ParseError::Truncated {
                need: ETHERNET_HEADER_SIZE,
                have: data.len(),
            });
        }

        let dst = MacAddress([data[0], data[1], data[2], data[3], data[4], data[5]]);
        let src = MacAddress([data[6], data[7], data[8], data[9], data[10], data[11]]);
        let ethertype = EtherType::from_u16(u16::from_be_bytes([data[12], data[13]]))?;

        Ok(EthernetFrame {
            dst,
            src,
            ethertype,
            payload: data[ETHERNET_HEADER_SIZE..].to_vec(),
        })
    }

    /// Serialize the frame, zero-padding to the minimum size.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.wire_size());

        frame.extend_from_slice(&self.dst.0);
        frame.extend_from_slice(&self.src.0);
        frame.extend_from_slice(&self.ethertype.as_u16().to_be_bytes());
        frame.extend_from_slice(&self.payload);

        while frame.len() < ETHERNET_MIN_SIZE {
            frame.push(0);
        }

        frame
    }
}
