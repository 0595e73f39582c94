//! Layer-2 switching
//!
//! A learning bridge: every received frame teaches the switch that its
//! source MAC lives behind the ingress port; unicast frames to a
//! learned MAC go out that single port, everything else floods to all
//! enabled ports except the ingress, in port order. The hub variant
//! skips learning and always floods.

use std::collections::BTreeMap;

use crate::addr::MacAddress;
use crate::device::{DeviceOutput, DeviceStatus, Transmit};
use crate::net::ethernet::EthernetFrame;

/// Default VLAN for all ports; VLAN tagging is not simulated.
pub const DEFAULT_VLAN: u16 = 1;

/// One learned MAC table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacTableEntry {
    pub port: u8,
    pub vlan: u16,
    /// Simulator time of the last frame from this MAC
    pub learned_at: u64,
}

#[derive(Debug, Clone, Copy)]
struct SwitchPort {
    enabled: bool,
}

/// A layer-2 switch (or hub).
#[derive(Debug)]
pub struct Switch {
    name: String,
    status: DeviceStatus,
    ports: Vec<SwitchPort>,
    mac_table: BTreeMap<MacAddress, MacTableEntry>,
    /// Hubs do not learn and always flood.
    learning: bool,
}

impl Switch {
    /// A learning bridge with `ports` ports, all enabled.
    pub fn new(name: impl Into<String>, ports: u8) -> Self {
        Switch {
            name: name.into(),
            status: DeviceStatus::Online,
            ports: vec![SwitchPort { enabled: true }; ports as usize],
            mac_table: BTreeMap::new(),
            learning: true,
        }
    }

    /// A hub: same ports, no MAC learning.
    pub fn hub(name: impl Into<String>, ports: u8) -> Self {
        Switch {
            learning: false,
            ..Switch::new(name, ports)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn is_hub(&self) -> bool {
        !self.learning
    }

    pub fn port_count(&self) -> u8 {
        self.ports.len() as u8
    }

    pub fn port_ready(&self, port: u8) -> bool {
        self.status == DeviceStatus::Online
            && self.ports.get(port as usize).is_some_and(|p| p.enabled)
    }

    pub fn set_port_enabled(&mut self, port: u8, enabled: bool) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            p.enabled = enabled;
        }
    }

    /// Snapshot of the MAC table.
    pub fn mac_table(&self) -> Vec<(MacAddress, MacTableEntry)> {
        self.mac_table.iter().map(|(m, e)| (*m, *e)).collect()
    }

    pub fn lookup(&self, mac: MacAddress) -> Option<MacTableEntry> {
        self.mac_table.get(&mac).copied()
    }

    pub fn set_power(&mut self, on: bool) {
        self.status = if on {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        };
        if !on {
            self.mac_table.clear();
        }
    }

    pub fn receive(&mut self, port: u8, frame: EthernetFrame, now: u64) -> DeviceOutput {
        if self.status == DeviceStatus::Offline || !self.port_ready(port) {
            return DeviceOutput::none();
        }

        if !self.learning {
            return self.flood(port, &frame);
        }

        // Learn (or refresh) the source before any forwarding decision.
        if !frame.src.is_multicast() {
            self.mac_table.insert(
                frame.src,
                MacTableEntry {
                    port,
                    vlan: DEFAULT_VLAN,
                    learned_at: now,
                },
            );
        }

        if frame.dst.is_multicast() {
            return self.flood(port, &frame);
        }

        match self.mac_table.get(&frame.dst) {
            Some(entry) if entry.port == port => {
                // Destination sits behind the ingress port; filter.
                DeviceOutput::none()
            }
            Some(entry) if self.port_ready(entry.port) => {
                DeviceOutput::transmit(entry.port, frame)
            }
            // Unknown, or learned behind a dead port: flood.
            _ => self.flood(port, &frame),
        }
    }

    fn flood(&self, ingress: u8, frame: &EthernetFrame) -> DeviceOutput {
        let mut out = DeviceOutput::none();
        for (idx, port) in self.ports.iter().enumerate() {
            let idx = idx as u8;
            if idx != ingress && port.enabled {
                out.transmits.push(Transmit {
                    port: idx,
                    frame: frame.clone(),
                });
            }
        }
        log::debug!(
            "NET: {} flooding {} -> {} out {} ports",
            self.name,
            frame.src,
            frame.dst,
            out.transmits.len()
        );
        out
    }
}
