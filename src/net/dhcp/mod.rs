//! DHCP (Dynamic Host Configuration Protocol) implementation
//!
//! Implements the BOOTP wire format (RFC 951) with the DHCP option
//! extension (RFC 2132): a 236-byte fixed header, the magic cookie
//! `63 82 53 63`, and TLV-encoded options terminated by `0xFF`.
//! Unknown options are skipped on parse. The server and client state
//! machines live in the `server` and `client` submodules.

pub mod client;
pub mod server;

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::error::ParseError;

/// BOOTP fixed header size (before the magic cookie)
pub const BOOTP_HEADER_SIZE: usize = 236;

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Default lease time offered when the server config leaves it unset
pub const DEFAULT_LEASE_TIME: u32 = 86_400;

/// BOOTP operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpOp {
    /// Client-to-server
    BootRequest = 1,
    /// Server-to-client
    BootReply = 2,
}

/// DHCP message type (option 53).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Ack = 5,
    Nak = 6,
    Release = 7,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Result<Self, ParseError> {
        match value {
            1 => Ok(DhcpMessageType::Discover),
            2 => Ok(DhcpMessageType::Offer),
            3 => Ok(DhcpMessageType::Request),
            5 => Ok(DhcpMessageType::Ack),
            6 => Ok(DhcpMessageType::Nak),
            7 => Ok(DhcpMessageType::Release),
            other => Err(ParseError::UnknownDhcpMessageType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Option codes recognized by the parser.
mod opt {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const END: u8 = 255;
}

/// The decoded options a packet may carry. Absent options are `None`
/// or empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DhcpOptions {
    /// Option 1
    pub subnet_mask: Option<SubnetMask>,
    /// Option 3 (first router only)
    pub router: Option<Ipv4Address>,
    /// Option 6
    pub dns_servers: Vec<Ipv4Address>,
    /// Option 12
    pub hostname: Option<String>,
    /// Option 15
    pub domain_name: Option<String>,
    /// Option 50
    pub requested_ip: Option<Ipv4Address>,
    /// Option 51, seconds
    pub lease_time: Option<u32>,
    /// Option 54
    pub server_id: Option<Ipv4Address>,
}

/// A DHCP packet: the BOOTP fields the simulator uses plus decoded
/// options. `sname`/`file` are emitted as zeros and ignored on parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: DhcpOp,
    /// Transaction ID correlating one exchange
    pub xid: u32,
    /// Broadcast flag in the top bit
    pub flags: u16,
    /// Client's current IP (renewals), else zero
    pub ciaddr: Ipv4Address,
    /// "Your" address: the IP being offered/assigned
    pub yiaddr: Ipv4Address,
    /// Server address
    pub siaddr: Ipv4Address,
    /// Relay agent address (unused, kept for the wire format)
    pub giaddr: Ipv4Address,
    /// Client hardware address (first 6 of chaddr)
    pub client_mac: MacAddress,
    /// Option 53
    pub message_type: DhcpMessageType,
    pub options: DhcpOptions,
}

impl DhcpPacket {
    /// A client-originated packet with all addresses zeroed.
    pub fn client_request(mac: MacAddress, xid: u32, message_type: DhcpMessageType) -> Self {
        DhcpPacket {
            op: DhcpOp::BootRequest,
            xid,
            flags: 0x8000, // broadcast
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: Ipv4Address::UNSPECIFIED,
            giaddr: Ipv4Address::UNSPECIFIED,
            client_mac: mac,
            message_type,
            options: DhcpOptions::default(),
        }
    }

    /// A server-originated reply to `request`.
    pub fn server_reply(request: &DhcpPacket, message_type: DhcpMessageType) -> Self {
        DhcpPacket {
            op: DhcpOp::BootReply,
            xid: request.xid,
            flags: request.flags,
            ciaddr: Ipv4Address::UNSPECIFIED,
            yiaddr: Ipv4Address::UNSPECIFIED,
            siaddr: Ipv4Address::UNSPECIFIED,
            giaddr: Ipv4Address::UNSPECIFIED,
            client_mac: request.client_mac,
            message_type,
            options: DhcpOptions::default(),
        }
    }

    /// Serialize: fixed header, cookie, options, end marker.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BOOTP_HEADER_SIZE + 64);

        buf.push(self.op as u8);
        buf.push(1); // htype: Ethernet
        buf.push(6); // hlen
        buf.push(0); // hops
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // secs
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.0);
        buf.extend_from_slice(&self.yiaddr.0);
        buf.extend_from_slice(&self.siaddr.0);
        buf.extend_from_slice(&self.giaddr.0);
        buf.extend_from_slice(&self.client_mac.0);
        buf.extend_from_slice(&[0u8; 10]); // chaddr padding
        buf.extend_from_slice(&[0u8; 64]); // sname
        buf.extend_from_slice(&[0u8; 128]); // file
        buf.extend_from_slice(&MAGIC_COOKIE);

        buf.push(opt::MESSAGE_TYPE);
        buf.push(1);
        buf.push(self.message_type.as_u8());

        let o = &self.options;
        if let Some(server_id) = o.server_id {
            push_option(&mut buf, opt::SERVER_ID, &server_id.0);
        }
        if let Some(requested) = o.requested_ip {
            push_option(&mut buf, opt::REQUESTED_IP, &requested.0);
        }
        if let Some(mask) = o.subnet_mask {
            push_option(&mut buf, opt::SUBNET_MASK, &mask.to_address().0);
        }
        if let Some(router) = o.router {
            push_option(&mut buf, opt::ROUTER, &router.0);
        }
        if !o.dns_servers.is_empty() {
            let mut servers = Vec::with_capacity(o.dns_servers.len() * 4);
            for dns in &o.dns_servers {
                servers.extend_from_slice(&dns.0);
            }
            push_option(&mut buf, opt::DNS_SERVER, &servers);
        }
        if let Some(lease) = o.lease_time {
            push_option(&mut buf, opt::LEASE_TIME, &lease.to_be_bytes());
        }
        if let Some(hostname) = &o.hostname {
            push_option(&mut buf, opt::HOSTNAME, hostname.as_bytes());
        }
        if let Some(domain) = &o.domain_name {
            push_option(&mut buf, opt::DOMAIN_NAME, domain.as_bytes());
        }

        buf.push(opt::END);
        buf
    }

    /// Parse a packet: fixed header, cookie check, option walk.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < BOOTP_HEADER_SIZE + 4 {
            return Err(ParseError::Truncated {
                need: BOOTP_HEADER_SIZE + 4,
                have: data.len(),
            });
        }

        let op = match data[0] {
            1 => DhcpOp::BootRequest,
            2 => DhcpOp::BootReply,
            other => return Err(ParseError::BadOption(other)),
        };
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);
        let ciaddr = Ipv4Address([data[12], data[13], data[14], data[15]]);
        let yiaddr = Ipv4Address([data[16], data[17], data[18], data[19]]);
        let siaddr = Ipv4Address([data[20], data[21], data[22], data[23]]);
        let giaddr = Ipv4Address([data[24], data[25], data[26], data[27]]);
        let client_mac = MacAddress([data[28], data[29], data[30], data[31], data[32], data[33]]);

        if data[BOOTP_HEADER_SIZE..BOOTP_HEADER_SIZE + 4] != MAGIC_COOKIE {
            return Err(ParseError::BadCookie);
        }

        let mut options = DhcpOptions::default();
        let mut message_type = None;
        let mut i = BOOTP_HEADER_SIZE + 4;
        while i < data.len() {
            let code = data[i];
            i += 1;
            if code == opt::PAD {
                continue;
            }
            if code == opt::END {
                break;
            }
            let len = *data.get(i).ok_or(ParseError::BadOption(code))? as usize;
            i += 1;
            let value = data
                .get(i..i + len)
                .ok_or(ParseError::BadOption(code))?;
            i += len;

            match code {
                opt::MESSAGE_TYPE => {
                    let &[t] = value else {
                        return Err(ParseError::BadOption(code));
                    };
                    message_type = Some(DhcpMessageType::from_u8(t)?);
                }
                opt::SUBNET_MASK => {
                    let addr = take_ip(value, code)?;
                    options.subnet_mask = Some(
                        SubnetMask::from_address(addr)
                            .map_err(|_| ParseError::BadOption(code))?,
                    );
                }
                opt::ROUTER => {
                    options.router = Some(take_ip(value, code)?);
                }
                opt::DNS_SERVER => {
                    if value.len() % 4 != 0 {
                        return Err(ParseError::BadOption(code));
                    }
                    options.dns_servers = value
                        .chunks_exact(4)
                        .map(|c| Ipv4Address([c[0], c[1], c[2], c[3]]))
                        .collect();
                }
                opt::HOSTNAME => {
                    options.hostname = Some(take_string(value, code)?);
                }
                opt::DOMAIN_NAME => {
                    options.domain_name = Some(take_string(value, code)?);
                }
                opt::REQUESTED_IP => {
                    options.requested_ip = Some(take_ip(value, code)?);
                }
                opt::LEASE_TIME => {
                    let bytes: [u8; 4] =
                        value.try_into().map_err(|_| ParseError::BadOption(code))?;
                    options.lease_time = Some(u32::from_be_bytes(bytes));
                }
                opt::SERVER_ID => {
                    options.server_id = Some(take_ip(value, code)?);
                }
                _ => {
                    // Unknown option, skipped.
                }
            }
        }

        Ok(DhcpPacket {
            op,
            xid,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            client_mac,
            message_type: message_type.ok_or(ParseError::MissingDhcpMessageType)?,
            options,
        })
    }
}

fn push_option(buf: &mut Vec<u8>, code: u8, value: &[u8]) {
    buf.push(code);
    buf.push(value.len() as u8);
    buf.extend_from_slice(value);
}

fn take_ip(value: &[u8], code: u8) -> Result<Ipv4Address, ParseError> {
    let bytes: [u8; 4] = value.try_into().map_err(|_| ParseError::BadOption(code))?;
    Ok(Ipv4Address(bytes))
}

fn take_string(value: &[u8], code: u8) -> Result<String, ParseError> {
    String::from_utf8(value.to_vec()).map_err(|_| ParseError::BadOption(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    #[test]
    fn discover_roundtrip() {
        let mut pkt = DhcpPacket::client_request(
            MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01]),
            0x3903F326,
            DhcpMessageType::Discover,
        );
        pkt.options.hostname = Some("pc1".into());
        let parsed = DhcpPacket::from_bytes(&pkt.to_bytes()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn offer_roundtrip_with_full_options() {
        let discover = DhcpPacket::client_request(
            MacAddress([2, 0, 0, 0, 0, 9]),
            77,
            DhcpMessageType::Discover,
        );
        let mut offer = DhcpPacket::server_reply(&discover, DhcpMessageType::Offer);
        offer.yiaddr = ip("192.168.1.100");
        offer.siaddr = ip("192.168.1.1");
        offer.options.subnet_mask = Some("255.255.255.0".parse().unwrap());
        offer.options.router = Some(ip("192.168.1.1"));
        offer.options.dns_servers = vec![ip("8.8.8.8"), ip("1.1.1.1")];
        offer.options.lease_time = Some(3600);
        offer.options.server_id = Some(ip("192.168.1.1"));
        offer.options.domain_name = Some("lan.example".into());

        let parsed = DhcpPacket::from_bytes(&offer.to_bytes()).unwrap();
        assert_eq!(parsed, offer);
        assert_eq!(parsed.xid, 77);
    }

    #[test]
    fn cookie_checked() {
        let pkt = DhcpPacket::client_request(MacAddress([1; 6]), 5, DhcpMessageType::Discover);
        let mut bytes = pkt.to_bytes();
        bytes[BOOTP_HEADER_SIZE] = 0;
        assert_eq!(DhcpPacket::from_bytes(&bytes), Err(ParseError::BadCookie));
    }

    #[test]
    fn unknown_options_skipped() {
        let pkt = DhcpPacket::client_request(MacAddress([1; 6]), 5, DhcpMessageType::Request);
        let mut bytes = pkt.to_bytes();
        // Splice an unknown option (57, max message size) before END.
        let end = bytes.len() - 1;
        bytes.truncate(end);
        bytes.extend_from_slice(&[57, 2, 0x05, 0xDC, opt::END]);
        let parsed = DhcpPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.message_type, DhcpMessageType::Request);
    }

    #[test]
    fn missing_message_type_rejected() {
        let pkt = DhcpPacket::client_request(MacAddress([1; 6]), 5, DhcpMessageType::Discover);
        let mut bytes = pkt.to_bytes();
        // Blank out the message-type option (leave it as padding).
        bytes[BOOTP_HEADER_SIZE + 4] = opt::PAD;
        bytes[BOOTP_HEADER_SIZE + 5] = opt::PAD;
        bytes[BOOTP_HEADER_SIZE + 6] = opt::PAD;
        assert_eq!(
            DhcpPacket::from_bytes(&bytes),
            Err(ParseError::MissingDhcpMessageType)
        );
    }

    #[test]
    fn unknown_message_type_rejected() {
        let pkt = DhcpPacket::client_request(MacAddress([1; 6]), 5, DhcpMessageType::Discover);
        let mut bytes = pkt.to_bytes();
        bytes[BOOTP_HEADER_SIZE + 6] = 13; // DHCPLEASEQUERY, unsupported
        assert_eq!(
            DhcpPacket::from_bytes(&bytes),
            Err(ParseError::UnknownDhcpMessageType(13))
        );
    }
}
