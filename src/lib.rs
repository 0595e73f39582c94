//! netsim: a deterministic packet-switched network simulator
//!
//! Models end hosts, learning switches and routers wired by
//! point-to-point links, and propagates Ethernet frames through them
//! with bit-level protocol semantics (ARP, IPv4, ICMP, UDP, DHCP).
//! Everything runs on one logical task: devices are pure frame-in /
//! frames-out state machines, and the [`sim::Simulator`] mediator owns
//! topology, event fan-out and the deferred frame queue, so every run
//! is reproducible.
//!
//! A two-host ping, end to end:
//!
//! ```
//! use netsim::device::{Host, Switch};
//! use netsim::sim::{PingOptions, Simulator};
//!
//! let mut sim = Simulator::new();
//! let h1 = sim.register(Host::new("h1")).unwrap();
//! let h2 = sim.register(Host::new("h2")).unwrap();
//! let sw = sim.register(Switch::new("sw1", 4)).unwrap();
//! sim.connect(h1, 0, sw, 0).unwrap();
//! sim.connect(h2, 0, sw, 1).unwrap();
//!
//! for (id, addr) in [(h1, "192.168.1.10"), (h2, "192.168.1.20")] {
//!     sim.host_mut(id)
//!         .unwrap()
//!         .configure_interface(
//!             "eth0",
//!             Some((addr.parse().unwrap(), "/24".parse().unwrap())),
//!             None,
//!             Some(true),
//!         )
//!         .unwrap();
//! }
//!
//! let report = sim
//!     .ping(h1, "192.168.1.20".parse().unwrap(), PingOptions::default())
//!     .unwrap();
//! assert!(report.success);
//! ```

pub mod addr;
pub mod device;
pub mod error;
pub mod iface;
pub mod net;
pub mod sim;
pub mod terminal;

pub use addr::{Ipv4Address, MacAddress, SubnetMask};
pub use device::{DeviceId, Host, Node, Router, Switch};
pub use error::{AddrParseError, CommandError, ConfigError, ParseError, SendError};
pub use iface::NetworkInterface;
pub use sim::{PingOptions, PingReport, SimStats, Simulator};
