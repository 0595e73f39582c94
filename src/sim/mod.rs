//! The simulator mediator
//!
//! Owns the device registry, the link topology, the event bus and the
//! deferred frame queue. All frame movement goes through `send_frame`
//! semantics: devices hand frames back from `receive`, the simulator
//! queues them, and the pump drains the queue to quiescence; there is
//! no reentrancy into device dispatch. Within one source device frames
//! stay in transmission order, and a switch flood is delivered in its
//! port order, so runs are fully deterministic.
//!
//! The high-level drivers (`ping`, `traceroute`, `dhcp_discover`,
//! `dhcp_renew`, `dhcp_release`) are the simulator's only blocking
//! surface; each registers a continuation keyed by `(identifier,
//! sequence)` or `xid`, pumps the fabric, and reads the completed
//! outcome. Timeouts are symbolic: a pump that goes quiescent without
//! an answer is the timeout.

pub mod event;
pub mod link;

use std::collections::BTreeMap;

use crossbeam_queue::SegQueue;

use crate::addr::{Ipv4Address, MacAddress};
use crate::device::{DeviceId, DeviceStatus, EchoStart, Host, Node, Router, Switch, Transmit};
use crate::error::{ConfigError, SendError};
use crate::net::dhcp::client::{DhcpBinding, DhcpClientState};
use crate::net::ethernet::EthernetFrame;
use crate::net::icmp::{EchoOutcome, ECHO_PAYLOAD};
use crate::net::ipv4::DEFAULT_TTL;
use event::{DropReason, EventBus, SimEvent, SubscriptionId};
use link::{Endpoint, Link};

/// Safety valve for the pump loop; a healthy topology quiesces long
/// before this.
const MAX_PUMP_STEPS: usize = 100_000;

/// Monotonic frame counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
}

/// Knobs for [`Simulator::ping`].
#[derive(Debug, Clone)]
pub struct PingOptions {
    pub count: u32,
    /// Symbolic per-attempt timeout in seconds
    pub timeout: u64,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

impl Default for PingOptions {
    fn default() -> Self {
        PingOptions {
            count: 4,
            timeout: 1,
            ttl: DEFAULT_TTL,
            payload: ECHO_PAYLOAD.to_vec(),
        }
    }
}

/// Aggregated result of one `ping` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReport {
    pub target: Ipv4Address,
    pub transmitted: u32,
    pub received: u32,
    pub success: bool,
    /// First error encountered, if any
    pub error: Option<String>,
    /// Symbolic round-trip measure: pump steps of the first successful
    /// attempt
    pub rtt: Option<u64>,
}

/// One traceroute hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub ttl: u8,
    /// Router (or target) that answered; `None` for a silent hop
    pub from: Option<Ipv4Address>,
    /// True once the target itself replied
    pub reached: bool,
}

#[derive(Debug)]
struct QueuedFrame {
    src: DeviceId,
    src_port: u8,
    frame: EthernetFrame,
}

/// The mediator. Tests construct a fresh simulator per case.
#[derive(Debug)]
pub struct Simulator {
    devices: BTreeMap<DeviceId, Node>,
    links: Vec<Link>,
    mac_index: BTreeMap<MacAddress, DeviceId>,
    bus: EventBus,
    queue: SegQueue<QueuedFrame>,
    clock: u64,
    stats: SimStats,
    next_device: u32,
}

impl Simulator {
    pub fn new() -> Self {
        Simulator {
            devices: BTreeMap::new(),
            links: Vec::new(),
            mac_index: BTreeMap::new(),
            bus: EventBus::new(),
            queue: SegQueue::new(),
            clock: 0,
            stats: SimStats::default(),
            next_device: 0,
        }
    }

    // --- registry ---

    /// Register one device. Device names are unique per simulator.
    pub fn register(&mut self, node: impl Into<Node>) -> Result<DeviceId, ConfigError> {
        let node = node.into();
        if self.devices.values().any(|n| n.name() == node.name()) {
            return Err(ConfigError::DuplicateDevice(node.name().into()));
        }
        self.next_device += 1;
        let id = DeviceId(self.next_device);
        for mac in node.macs() {
            self.mac_index.insert(mac, id);
        }
        log::info!("SIM: registered {} `{}` as {:?}", node.kind(), node.name(), id);
        self.devices.insert(id, node);
        Ok(id)
    }

    /// Remove a device, its links, and any frames bound for it.
    pub fn unregister(&mut self, id: DeviceId) -> Result<(), ConfigError> {
        if self.devices.remove(&id).is_none() {
            return Err(ConfigError::UnknownDevice);
        }
        self.mac_index.retain(|_, d| *d != id);
        // Purge while the links still identify the frames heading there.
        self.purge_queue(
            |sim, q| sim.frame_targets(q).map(|e| e.device) == Some(id),
            DropReason::PortDisconnected,
        );
        self.links.retain(|l| !l.touches_device(id));
        Ok(())
    }

    /// Replace the whole topology atomically: either every device and
    /// link is accepted, or nothing changes.
    pub fn initialize(
        &mut self,
        nodes: Vec<Node>,
        links: Vec<((usize, u8), (usize, u8))>,
    ) -> Result<Vec<DeviceId>, ConfigError> {
        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|n| n.name() == node.name()) {
                return Err(ConfigError::DuplicateDevice(node.name().into()));
            }
        }
        let mut seen: Vec<(usize, u8)> = Vec::new();
        for &((ai, ap), (bi, bp)) in &links {
            for &(idx, port) in &[(ai, ap), (bi, bp)] {
                let node = nodes.get(idx).ok_or(ConfigError::UnknownDevice)?;
                if port >= node.port_count() {
                    return Err(ConfigError::UnknownPort(port));
                }
                if seen.contains(&(idx, port)) {
                    return Err(ConfigError::PortInUse {
                        device: node.name().into(),
                        port,
                    });
                }
                seen.push((idx, port));
            }
        }

        self.reset();
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            // Uniqueness was validated above.
            ids.push(self.register(node)?);
        }
        for ((ai, ap), (bi, bp)) in links {
            self.connect(ids[ai], ap, ids[bi], bp)?;
        }
        Ok(ids)
    }

    /// Tear everything down and zero the counters. Subscribers stay.
    pub fn reset(&mut self) {
        self.devices.clear();
        self.links.clear();
        self.mac_index.clear();
        while self.queue.pop().is_some() {}
        self.stats = SimStats::default();
        self.clock = 0;
    }

    // --- topology ---

    pub fn connect(
        &mut self,
        a: DeviceId,
        port_a: u8,
        b: DeviceId,
        port_b: u8,
    ) -> Result<(), ConfigError> {
        let ea = Endpoint::new(a, port_a);
        let eb = Endpoint::new(b, port_b);
        for &ep in &[ea, eb] {
            let node = self.devices.get(&ep.device).ok_or(ConfigError::UnknownDevice)?;
            if ep.port >= node.port_count() {
                return Err(ConfigError::UnknownPort(ep.port));
            }
            if self.links.iter().any(|l| l.touches(ep)) {
                return Err(ConfigError::PortInUse {
                    device: node.name().into(),
                    port: ep.port,
                });
            }
        }
        self.links.push(Link::new(ea, eb));
        Ok(())
    }

    /// Remove the link attached to `(device, port)`. Frames in flight
    /// across it are dropped with `link_removed`.
    pub fn disconnect(&mut self, device: DeviceId, port: u8) -> Result<(), ConfigError> {
        let ep = Endpoint::new(device, port);
        let Some(pos) = self.links.iter().position(|l| l.touches(ep)) else {
            return Err(ConfigError::NotLinked(port));
        };
        let removed = self.links.remove(pos);
        self.purge_queue(
            |_, q| removed.touches(Endpoint::new(q.src, q.src_port)),
            DropReason::LinkRemoved,
        );
        Ok(())
    }

    /// Power a device down: interfaces drop, its pending exchanges
    /// cancel, and queued frames targeting it are discarded.
    pub fn power_off(&mut self, id: DeviceId) -> Result<(), ConfigError> {
        let node = self.devices.get_mut(&id).ok_or(ConfigError::UnknownDevice)?;
        node.set_power(false);
        self.purge_queue(
            |sim, q| sim.frame_targets(q).map(|e| e.device) == Some(id),
            DropReason::DevicePoweredOff,
        );
        Ok(())
    }

    pub fn power_on(&mut self, id: DeviceId) -> Result<(), ConfigError> {
        let node = self.devices.get_mut(&id).ok_or(ConfigError::UnknownDevice)?;
        node.set_power(true);
        Ok(())
    }

    // --- observation ---

    pub fn subscribe(&mut self, observer: Box<dyn FnMut(&SimEvent)>) -> SubscriptionId {
        self.bus.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Advance the symbolic clock; lease expiry, table timestamps and
    /// echo timeouts observe it. Frame propagation itself is
    /// zero-delay.
    pub fn advance_time(&mut self, secs: u64) {
        self.clock += secs;
        let now = self.clock;
        for node in self.devices.values_mut() {
            if let Node::Host(host) = node {
                host.icmp_mut().expire(now);
            }
        }
    }

    // --- device access ---

    pub fn node(&self, id: DeviceId) -> Result<&Node, ConfigError> {
        self.devices.get(&id).ok_or(ConfigError::UnknownDevice)
    }

    pub fn find_by_name(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .iter()
            .find(|(_, n)| n.name() == name)
            .map(|(id, _)| *id)
    }

    /// Device owning an interface with this MAC, if any.
    pub fn device_by_mac(&self, mac: MacAddress) -> Option<DeviceId> {
        self.mac_index.get(&mac).copied().or_else(|| {
            self.devices
                .iter()
                .find(|(_, n)| n.macs().contains(&mac))
                .map(|(id, _)| *id)
        })
    }

    pub fn host(&self, id: DeviceId) -> Result<&Host, ConfigError> {
        match self.node(id)? {
            Node::Host(h) => Ok(h),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "host",
                actual: other.kind(),
            }),
        }
    }

    pub fn host_mut(&mut self, id: DeviceId) -> Result<&mut Host, ConfigError> {
        match self.devices.get_mut(&id).ok_or(ConfigError::UnknownDevice)? {
            Node::Host(h) => Ok(h),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "host",
                actual: other.kind(),
            }),
        }
    }

    pub fn switch(&self, id: DeviceId) -> Result<&Switch, ConfigError> {
        match self.node(id)? {
            Node::Switch(s) => Ok(s),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "switch",
                actual: other.kind(),
            }),
        }
    }

    pub fn switch_mut(&mut self, id: DeviceId) -> Result<&mut Switch, ConfigError> {
        match self.devices.get_mut(&id).ok_or(ConfigError::UnknownDevice)? {
            Node::Switch(s) => Ok(s),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "switch",
                actual: other.kind(),
            }),
        }
    }

    pub fn router(&self, id: DeviceId) -> Result<&Router, ConfigError> {
        match self.node(id)? {
            Node::Router(r) => Ok(r),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "router",
                actual: other.kind(),
            }),
        }
    }

    pub fn router_mut(&mut self, id: DeviceId) -> Result<&mut Router, ConfigError> {
        match self.devices.get_mut(&id).ok_or(ConfigError::UnknownDevice)? {
            Node::Router(r) => Ok(r),
            other => Err(ConfigError::WrongDeviceKind {
                expected: "router",
                actual: other.kind(),
            }),
        }
    }

    // --- frame dispatch ---

    /// Queue a frame as transmitted by `(src, port)`; it is delivered
    /// on the next pump.
    pub fn inject(&mut self, src: DeviceId, transmit: Transmit) {
        self.queue.push(QueuedFrame {
            src,
            src_port: transmit.port,
            frame: transmit.frame,
        });
    }

    /// Drain the frame queue. Returns the number of frames processed.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while self.pump_one() {
            steps += 1;
            if steps >= MAX_PUMP_STEPS {
                log::warn!("SIM: pump did not quiesce after {} frames", steps);
                break;
            }
        }
        steps
    }

    fn pump_one(&mut self) -> bool {
        let Some(queued) = self.queue.pop() else {
            return false;
        };

        self.stats.frames_sent += 1;
        self.bus.emit(&SimEvent::FrameSent {
            device: queued.src,
            frame: queued.frame.clone(),
        });

        let Some(peer) = self.frame_targets(&queued) else {
            self.drop_frame(queued.src, queued.frame, DropReason::PortDisconnected);
            return true;
        };

        let Some(node) = self.devices.get(&peer.device) else {
            self.drop_frame(queued.src, queued.frame, DropReason::PortDisconnected);
            return true;
        };
        if node.status() == DeviceStatus::Offline {
            self.drop_frame(peer.device, queued.frame, DropReason::DevicePoweredOff);
            return true;
        }
        if !node.port_ready(peer.port) {
            self.drop_frame(peer.device, queued.frame, DropReason::InterfaceDown);
            return true;
        }

        self.stats.frames_received += 1;
        self.bus.emit(&SimEvent::FrameReceived {
            device: peer.device,
            port: peer.port,
            frame: queued.frame.clone(),
        });

        let clock = self.clock;
        let output = match self.devices.get_mut(&peer.device) {
            Some(node) => node.receive(peer.port, queued.frame, clock),
            None => return true,
        };
        for (frame, reason) in output.drops {
            self.drop_frame(peer.device, frame, reason);
        }
        for transmit in output.transmits {
            self.queue.push(QueuedFrame {
                src: peer.device,
                src_port: transmit.port,
                frame: transmit.frame,
            });
        }
        true
    }

    /// The peer endpoint a queued frame is heading to.
    fn frame_targets(&self, queued: &QueuedFrame) -> Option<Endpoint> {
        let src = Endpoint::new(queued.src, queued.src_port);
        self.links.iter().find_map(|l| l.peer_of(src))
    }

    fn drop_frame(&mut self, device: DeviceId, frame: EthernetFrame, reason: DropReason) {
        log::debug!("SIM: frame dropped at {:?}: {}", device, reason);
        self.stats.frames_dropped += 1;
        self.bus.emit(&SimEvent::FrameDropped {
            device,
            frame,
            reason,
        });
    }

    /// Drain the queue, dropping entries matching `victim` with
    /// `reason` and keeping the rest in order.
    fn purge_queue<F>(&mut self, victim: F, reason: DropReason)
    where
        F: Fn(&Simulator, &QueuedFrame) -> bool,
    {
        let mut keep = Vec::new();
        while let Some(q) = self.queue.pop() {
            keep.push(q);
        }
        for q in keep {
            if victim(self, &q) {
                self.drop_frame(q.src, q.frame, reason);
            } else {
                self.queue.push(q);
            }
        }
    }

    // --- high-level drivers ---

    /// Ping `target` from a host. Each attempt resolves ARP first
    /// (pumping the fabric once if the cache is cold), then sends one
    /// echo request and pumps until the fabric goes quiet; a quiet
    /// fabric with no reply is the timeout.
    pub fn ping(
        &mut self,
        id: DeviceId,
        target: Ipv4Address,
        opts: PingOptions,
    ) -> Result<PingReport, ConfigError> {
        self.host(id)?;
        let mut report = PingReport {
            target,
            transmitted: 0,
            received: 0,
            success: false,
            error: None,
            rtt: None,
        };

        for _ in 0..opts.count {
            match self.start_echo_resolving(id, target, &opts)? {
                EchoStart::Started { transmit, key } => {
                    report.transmitted += 1;
                    self.inject(id, transmit);
                    let steps = self.run_until_idle();

                    let outcome = self.echo_outcome(id, key)?;
                    match outcome {
                        EchoOutcome::Reply { .. } => {
                            report.received += 1;
                            if report.rtt.is_none() {
                                report.rtt = Some(steps as u64);
                            }
                        }
                        EchoOutcome::TimeExceeded { from } => {
                            note_error(&mut report, format!("time to live exceeded from {from}"));
                        }
                        EchoOutcome::Unreachable { from } => {
                            note_error(&mut report, format!("destination unreachable from {from}"));
                        }
                        EchoOutcome::TimedOut => {
                            note_error(&mut report, "request timed out".into());
                        }
                        EchoOutcome::Cancelled => {
                            note_error(&mut report, "interface unreachable".into());
                        }
                    }
                }
                EchoStart::NeedArp { .. } => {
                    // Two resolution rounds came up empty: nobody owns
                    // that address.
                    let cause = SendError::ArpUnresolved(target);
                    note_error(&mut report, format!("{cause}; destination unreachable"));
                }
                EchoStart::Failed(e) => {
                    note_error(&mut report, e.to_string());
                }
            }
        }

        report.success = report.received > 0;
        Ok(report)
    }

    /// Echo requests with growing TTL until the target answers or
    /// `max_hops` is reached.
    pub fn traceroute(
        &mut self,
        id: DeviceId,
        target: Ipv4Address,
        max_hops: u8,
    ) -> Result<Vec<Hop>, ConfigError> {
        self.host(id)?;
        let mut hops = Vec::new();
        let opts = PingOptions::default();

        for ttl in 1..=max_hops {
            let opts = PingOptions {
                ttl,
                ..opts.clone()
            };
            match self.start_echo_resolving(id, target, &opts)? {
                EchoStart::Started { transmit, key } => {
                    self.inject(id, transmit);
                    self.run_until_idle();
                    match self.echo_outcome(id, key)? {
                        EchoOutcome::Reply { from } => {
                            hops.push(Hop {
                                ttl,
                                from: Some(from),
                                reached: true,
                            });
                            return Ok(hops);
                        }
                        EchoOutcome::TimeExceeded { from } => {
                            hops.push(Hop {
                                ttl,
                                from: Some(from),
                                reached: false,
                            });
                        }
                        EchoOutcome::Unreachable { from } => {
                            hops.push(Hop {
                                ttl,
                                from: Some(from),
                                reached: false,
                            });
                            return Ok(hops);
                        }
                        _ => {
                            hops.push(Hop {
                                ttl,
                                from: None,
                                reached: false,
                            });
                        }
                    }
                }
                _ => {
                    hops.push(Hop {
                        ttl,
                        from: None,
                        reached: false,
                    });
                    return Ok(hops);
                }
            }
        }
        Ok(hops)
    }

    /// Run the DORA exchange for one host interface. `Ok(None)` means
    /// no lease was acquired (e.g. the pool is exhausted and the
    /// DISCOVER went unanswered).
    pub fn dhcp_discover(
        &mut self,
        id: DeviceId,
        iface_index: usize,
    ) -> Result<Option<DhcpBinding>, ConfigError> {
        let transmit = {
            let host = self.host_mut(id)?;
            if host.interface(iface_index).is_none() {
                return Err(ConfigError::UnknownPort(iface_index as u8));
            }
            let hostname = Some(host.name().to_string());
            host.dhcp_enable(iface_index, hostname);
            host.dhcp_start_discover(iface_index)
        };
        let Some(transmit) = transmit else {
            return Ok(None);
        };
        self.inject(id, transmit);
        self.run_until_idle();
        Ok(self.bound_lease(id, iface_index))
    }

    /// Renew an existing lease; `Ok(None)` when the renewal went
    /// unanswered or was refused.
    pub fn dhcp_renew(
        &mut self,
        id: DeviceId,
        iface_index: usize,
    ) -> Result<Option<DhcpBinding>, ConfigError> {
        let transmit = self.host_mut(id)?.dhcp_start_renewal(iface_index);
        let Some(transmit) = transmit else {
            return Ok(None);
        };
        self.inject(id, transmit);
        self.run_until_idle();
        Ok(self.bound_lease(id, iface_index))
    }

    /// Release the lease on an interface and clear its addressing.
    pub fn dhcp_release(&mut self, id: DeviceId, iface_index: usize) -> Result<(), ConfigError> {
        let transmit = self.host_mut(id)?.dhcp_release(iface_index);
        if let Some(transmit) = transmit {
            self.inject(id, transmit);
            self.run_until_idle();
        }
        Ok(())
    }

    fn bound_lease(&self, id: DeviceId, iface_index: usize) -> Option<DhcpBinding> {
        let client = self.host(id).ok()?.dhcp_client(iface_index)?;
        (client.state() == DhcpClientState::Bound)
            .then(|| client.binding().cloned())
            .flatten()
    }

    /// Start one echo attempt, resolving the next hop with one extra
    /// pump round if the ARP cache is cold.
    fn start_echo_resolving(
        &mut self,
        id: DeviceId,
        target: Ipv4Address,
        opts: &PingOptions,
    ) -> Result<EchoStart, ConfigError> {
        let clock = self.clock;
        let start = self.host_mut(id)?.start_echo(
            target,
            opts.payload.clone(),
            opts.ttl,
            opts.timeout,
            clock,
        );
        match start {
            EchoStart::NeedArp { transmit } => {
                self.inject(id, transmit);
                self.run_until_idle();
                Ok(self.host_mut(id)?.start_echo(
                    target,
                    opts.payload.clone(),
                    opts.ttl,
                    opts.timeout,
                    clock,
                ))
            }
            other => Ok(other),
        }
    }

    /// The terminal outcome of an echo attempt, treating a quiet
    /// fabric as a timeout.
    fn echo_outcome(&mut self, id: DeviceId, key: (u16, u16)) -> Result<EchoOutcome, ConfigError> {
        let icmp = self.host_mut(id)?.icmp_mut();
        if let Some(outcome) = icmp.take_outcome(key) {
            return Ok(outcome);
        }
        icmp.fail_timeout(key);
        Ok(icmp.take_outcome(key).unwrap_or(EchoOutcome::TimedOut))
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

fn note_error(report: &mut PingReport, message: String) {
    if report.error.is_none() {
        report.error = Some(message);
    }
}
