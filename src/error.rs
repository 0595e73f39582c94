//! Error types for the simulator
//!
//! Four families, mirroring how failures surface: address/PDU parse
//! errors are programmer-visible and loud, configuration errors are
//! synchronous and side-effect free, send errors are transient result
//! values, and command errors are the stable categories the terminal
//! personas translate into their own wording.

use thiserror::Error;

use crate::addr::Ipv4Address;

/// Failure to parse an address value from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrParseError {
    #[error("invalid IPv4 address `{0}`")]
    Ipv4(String),
    #[error("invalid subnet mask `{0}`")]
    Mask(String),
    #[error("invalid MAC address `{0}`")]
    Mac(String),
}

/// Failure to decode a PDU from raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown ethertype {0:#06x}")]
    UnknownEtherType(u16),
    #[error("unknown IP protocol {0}")]
    UnknownProtocol(u8),
    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),
    #[error("bad IPv4 header length {0}")]
    BadHeaderLength(u8),
    #[error("header checksum mismatch")]
    BadChecksum,
    #[error("not an Ethernet/IPv4 ARP packet")]
    BadArpFormat,
    #[error("unknown ARP operation {0}")]
    UnknownArpOperation(u16),
    #[error("missing DHCP magic cookie")]
    BadCookie,
    #[error("unknown DHCP message type {0}")]
    UnknownDhcpMessageType(u8),
    #[error("DHCP packet carries no message type option")]
    MissingDhcpMessageType,
    #[error("malformed DHCP option {0}")]
    BadOption(u8),
}

/// Synchronous configuration failure; no state was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("device `{0}` is already registered")]
    DuplicateDevice(String),
    #[error("unknown device")]
    UnknownDevice,
    #[error("device is a {actual}, expected a {expected}")]
    WrongDeviceKind {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("no interface named `{0}`")]
    UnknownInterface(String),
    #[error("device has no port {0}")]
    UnknownPort(u8),
    #[error("port {port} on device `{device}` is already linked")]
    PortInUse { device: String, port: u8 },
    #[error("no link attached to port {0}")]
    NotLinked(u8),
    #[error("DHCP pool is empty or inverted")]
    BadPool,
    #[error(transparent)]
    Addr(#[from] AddrParseError),
}

/// Transient delivery failure for a single outgoing packet. Returned as
/// a value, never raised; the caller decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("unable to resolve {0}")]
    ArpUnresolved(Ipv4Address),
    #[error("no route to {0}")]
    NoRoute(Ipv4Address),
    #[error("interface has no address configured")]
    Unconfigured,
    #[error("interface is administratively down")]
    InterfaceDown,
}

/// Stable error categories surfaced through the terminal facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("unknown interface `{0}`")]
    UnknownInterface(String),
    #[error("malformed address `{0}`")]
    MalformedAddress(String),
    #[error("destination {0} unreachable")]
    UnreachableDestination(Ipv4Address),
    #[error("DHCP is not enabled on this interface")]
    DhcpNotEnabled,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<AddrParseError> for CommandError {
    fn from(e: AddrParseError) -> Self {
        CommandError::MalformedAddress(match &e {
            AddrParseError::Ipv4(s) | AddrParseError::Mask(s) | AddrParseError::Mac(s) => {
                s.clone()
            }
        })
    }
}
