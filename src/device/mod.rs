//! Simulated devices
//!
//! Hosts, switches and routers. Devices are pure state machines at the
//! frame level: `receive` consumes one frame and returns the frames to
//! transmit plus any protocol-level drops; the simulator owns actual
//! delivery, so devices never call back into it.

pub mod host;
pub mod router;
pub mod switch;

pub use host::{EchoStart, Host};
pub use router::{RouteTable, RouteTableEntry, Router, RouterStats};
pub use switch::{MacTableEntry, Switch};

use crate::addr::MacAddress;
use crate::net::ethernet::EthernetFrame;
use crate::sim::event::DropReason;

/// Identifies a registered device within one simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub(crate) u32);

/// Power state. Powering off forces every interface admin-down and
/// cancels the device's outstanding echo and DHCP exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// One frame a device wants to emit on one of its ports.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub port: u8,
    pub frame: EthernetFrame,
}

/// Everything a device did with one received frame.
#[derive(Debug, Default)]
pub struct DeviceOutput {
    pub transmits: Vec<Transmit>,
    /// Protocol-level drops (TTL expiry, no route, ARP queue overflow)
    pub drops: Vec<(EthernetFrame, DropReason)>,
}

impl DeviceOutput {
    pub fn none() -> Self {
        DeviceOutput::default()
    }

    pub fn transmit(port: u8, frame: EthernetFrame) -> Self {
        DeviceOutput {
            transmits: vec![Transmit { port, frame }],
            drops: Vec::new(),
        }
    }
}

/// A registered device of any kind.
#[derive(Debug)]
pub enum Node {
    Host(Host),
    Switch(Switch),
    Router(Router),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Host(h) => h.name(),
            Node::Switch(s) => s.name(),
            Node::Router(r) => r.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Host(_) => "host",
            Node::Switch(_) => "switch",
            Node::Router(_) => "router",
        }
    }

    pub fn status(&self) -> DeviceStatus {
        match self {
            Node::Host(h) => h.status(),
            Node::Switch(s) => s.status(),
            Node::Router(r) => r.status(),
        }
    }

    pub fn set_power(&mut self, on: bool) {
        match self {
            Node::Host(h) => h.set_power(on),
            Node::Switch(s) => s.set_power(on),
            Node::Router(r) => r.set_power(on),
        }
    }

    pub fn port_count(&self) -> u8 {
        match self {
            Node::Host(h) => h.port_count(),
            Node::Switch(s) => s.port_count(),
            Node::Router(r) => r.port_count(),
        }
    }

    /// Whether a frame arriving on `port` would be accepted right now.
    pub fn port_ready(&self, port: u8) -> bool {
        match self {
            Node::Host(h) => h.port_ready(port),
            Node::Switch(s) => s.port_ready(port),
            Node::Router(r) => r.port_ready(port),
        }
    }

    pub fn receive(&mut self, port: u8, frame: EthernetFrame, now: u64) -> DeviceOutput {
        match self {
            Node::Host(h) => h.receive(port, frame, now),
            Node::Switch(s) => s.receive(port, frame, now),
            Node::Router(r) => r.receive(port, frame, now),
        }
    }

    /// All interface MACs this device answers to (switches have none).
    pub fn macs(&self) -> Vec<MacAddress> {
        match self {
            Node::Host(h) => h.interfaces().iter().map(|i| i.mac()).collect(),
            Node::Switch(_) => Vec::new(),
            Node::Router(r) => r.interfaces().iter().map(|i| i.mac()).collect(),
        }
    }
}

impl From<Host> for Node {
    fn from(h: Host) -> Self {
        Node::Host(h)
    }
}

impl From<Switch> for Node {
    fn from(s: Switch) -> Self {
        Node::Switch(s)
    }
}

impl From<Router> for Node {
    fn from(r: Router) -> Self {
        Node::Router(r)
    }
}
