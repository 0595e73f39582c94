//! Typed simulator events
//!
//! The mediator publishes every frame movement to subscribed
//! observers. Tests and UI animation both consume the same stream; the
//! [`EventLog`] helper collects it into a vector.

use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use crate::device::DeviceId;
use crate::net::ethernet::EthernetFrame;

/// Why a frame went nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No link attached to the transmitting port
    PortDisconnected,
    /// The receiving interface is administratively down
    InterfaceDown,
    /// The receiving device is powered off
    DevicePoweredOff,
    /// The link was removed while the frame was in flight
    LinkRemoved,
    /// A router saw the TTL reach zero
    TtlExpired,
    /// A router had no route for the destination
    NoRoute,
    /// Next-hop resolution gave up
    ArpFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            DropReason::PortDisconnected => "port_disconnected",
            DropReason::InterfaceDown => "interface_down",
            DropReason::DevicePoweredOff => "device_powered_off",
            DropReason::LinkRemoved => "link_removed",
            DropReason::TtlExpired => "ttl_expired",
            DropReason::NoRoute => "no_route",
            DropReason::ArpFailed => "arp_failed",
        };
        f.write_str(tag)
    }
}

/// One observable frame movement.
#[derive(Debug, Clone)]
pub enum SimEvent {
    FrameSent {
        device: DeviceId,
        frame: EthernetFrame,
    },
    FrameReceived {
        device: DeviceId,
        port: u8,
        frame: EthernetFrame,
    },
    FrameDropped {
        device: DeviceId,
        frame: EthernetFrame,
        reason: DropReason,
    },
}

/// Handle returned by `subscribe`; pass to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(pub(crate) u64);

/// Mediator-owned fan-out of [`SimEvent`]s.
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(&SimEvent)>)>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn FnMut(&SimEvent)>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn emit(&mut self, event: &SimEvent) {
        for (_, observer) in &mut self.subscribers {
            observer(event);
        }
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Shared event collector for tests and inspection.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<SimEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog::default()
    }

    /// The observer closure to hand to `subscribe`.
    pub fn observer(&self) -> Box<dyn FnMut(&SimEvent)> {
        let events = Rc::clone(&self.events);
        Box::new(move |event| events.borrow_mut().push(event.clone()))
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn drop_count(&self, reason: DropReason) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, SimEvent::FrameDropped { reason: r, .. } if *r == reason))
            .count()
    }

    /// Frames transmitted by `device`, in send order.
    pub fn sent_by(&self, device: DeviceId) -> Vec<EthernetFrame> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SimEvent::FrameSent { device: d, frame } if *d == device => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Frames delivered to `device`, in arrival order.
    pub fn received_by(&self, device: DeviceId) -> Vec<EthernetFrame> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SimEvent::FrameReceived {
                    device: d, frame, ..
                } if *d == device => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }
}
