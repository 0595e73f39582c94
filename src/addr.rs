//! Network address value types
//!
//! IPv4 addresses, subnet masks and MAC addresses used throughout the
//! simulator. All three are small `Copy` values with canonical byte
//! representations; parsing rejects anything malformed.

use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::AddrParseError;

/// A 32-bit IPv4 address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Address(pub [u8; 4]);

impl Ipv4Address {
    /// The unspecified address `0.0.0.0`.
    pub const UNSPECIFIED: Ipv4Address = Ipv4Address([0, 0, 0, 0]);

    /// The limited broadcast address `255.255.255.255`.
    pub const BROADCAST: Ipv4Address = Ipv4Address([255, 255, 255, 255]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4Address([a, b, c, d])
    }

    pub fn octets(&self) -> [u8; 4] {
        self.0
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(value: u32) -> Self {
        Ipv4Address(value.to_be_bytes())
    }

    /// True for the limited broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }
}

impl FromStr for Ipv4Address {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddrParseError::Ipv4(s.into()))?;
            // Reject empty parts and anything non-numeric; `u8::from_str`
            // already rejects values above 255.
            *octet = part
                .parse::<u8>()
                .map_err(|_| AddrParseError::Ipv4(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError::Ipv4(s.into()));
        }
        Ok(Ipv4Address(octets))
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Debug for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An IPv4 subnet mask, stored as a prefix length 0..=32.
///
/// Only contiguous-ones masks are representable; parsing a dotted form
/// with holes fails.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubnetMask {
    prefix: u8,
}

impl SubnetMask {
    /// The common /24 mask, used as a fallback when a DHCP answer
    /// carries no mask option.
    pub const PREFIX_24: SubnetMask = SubnetMask { prefix: 24 };

    pub fn from_prefix(prefix: u8) -> Result<Self, AddrParseError> {
        if prefix > 32 {
            return Err(AddrParseError::Mask(format!("/{prefix}")));
        }
        Ok(SubnetMask { prefix })
    }

    /// Interpret an address as a mask, rejecting non-contiguous bit
    /// patterns such as `255.0.255.0`.
    pub fn from_address(addr: Ipv4Address) -> Result<Self, AddrParseError> {
        let bits = addr.to_u32();
        let prefix = bits.leading_ones() as u8;
        if bits != Self::prefix_bits(prefix) {
            return Err(AddrParseError::Mask(addr.to_string()));
        }
        Ok(SubnetMask { prefix })
    }

    fn prefix_bits(prefix: u8) -> u32 {
        if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix as u32)
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// The mask in dotted form, e.g. `/24` -> `255.255.255.0`.
    pub fn to_address(&self) -> Ipv4Address {
        Ipv4Address::from_u32(Self::prefix_bits(self.prefix))
    }

    /// The network address of `ip` under this mask.
    pub fn network(&self, ip: Ipv4Address) -> Ipv4Address {
        Ipv4Address::from_u32(ip.to_u32() & Self::prefix_bits(self.prefix))
    }

    /// True when `a` and `b` fall in the same subnet under this mask.
    pub fn same_subnet(&self, a: Ipv4Address, b: Ipv4Address) -> bool {
        self.network(a) == self.network(b)
    }
}

impl FromStr for SubnetMask {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(prefix) = s.strip_prefix('/') {
            let prefix = prefix
                .parse::<u8>()
                .map_err(|_| AddrParseError::Mask(s.into()))?;
            return SubnetMask::from_prefix(prefix);
        }
        let addr = s
            .parse::<Ipv4Address>()
            .map_err(|_| AddrParseError::Mask(s.into()))?;
        SubnetMask::from_address(addr)
    }
}

impl fmt::Display for SubnetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_address(), f)
    }
}

impl fmt::Debug for SubnetMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.prefix)
    }
}

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

/// Counter backing [`MacAddress::generate`]; every interface created in
/// this process gets a distinct address.
static NEXT_MAC: AtomicU64 = AtomicU64::new(1);

impl MacAddress {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// The all-zero address used as the unknown target in ARP requests.
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit of the first octet; broadcast is also multicast.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Allocate a fresh locally-administered unicast address
    /// (`02:4e:53:xx:xx:xx`), unique within this process.
    pub fn generate() -> MacAddress {
        let n = NEXT_MAC.fetch_add(1, Ordering::Relaxed);
        let [_, _, _, _, _, b3, b4, b5] = n.to_be_bytes();
        MacAddress([0x02, 0x4E, 0x53, b3, b4, b5])
    }
}

impl FromStr for MacAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| AddrParseError::Mac(s.into()))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| AddrParseError::Mac(s.into()))?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError::Mac(s.into()));
        }
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
