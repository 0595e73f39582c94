//! Two hosts through a learning switch: ARP resolution, echo
//! round-trips, MAC learning, and the failure modes around them.

mod common;

use common::*;
use netsim::device::Switch;
use netsim::net::arp::ArpOperation;
use netsim::net::icmp::{ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
use netsim::sim::event::{DropReason, EventLog};
use netsim::sim::{PingOptions, Simulator};

fn two_hosts_one_switch() -> (Simulator, netsim::DeviceId, netsim::DeviceId, netsim::DeviceId) {
    let mut sim = Simulator::new();
    let h1 = register_host(&mut sim, "h1", "192.168.1.10");
    let h2 = register_host(&mut sim, "h2", "192.168.1.20");
    let sw = sim.register(Switch::new("sw1", 2)).unwrap();
    sim.connect(h1, 0, sw, 0).unwrap();
    sim.connect(h2, 0, sw, 1).unwrap();
    (sim, h1, h2, sw)
}

#[test]
fn ping_through_switch_resolves_arp_and_gets_one_reply() {
    let (mut sim, h1, h2, sw) = two_hosts_one_switch();
    let log = EventLog::new();
    sim.subscribe(log.observer());

    let report = sim
        .ping(
            h1,
            ip("192.168.1.20"),
            PingOptions {
                count: 1,
                ..PingOptions::default()
            },
        )
        .unwrap();

    assert!(report.success);
    assert_eq!(report.transmitted, 1);
    assert_eq!(report.received, 1);
    assert_eq!(report.error, None);
    assert!(report.rtt.is_some());

    // H1 resolved H2 by ARP.
    assert_eq!(
        sim.host(h1).unwrap().arp().resolve(ip("192.168.1.20")),
        Some(host_mac(&sim, h2))
    );

    // The switch learned both hosts on their respective ports.
    let switch = sim.switch(sw).unwrap();
    assert_eq!(switch.lookup(host_mac(&sim, h1)).map(|e| e.port), Some(0));
    assert_eq!(switch.lookup(host_mac(&sim, h2)).map(|e| e.port), Some(1));

    // Exactly one ARP reply and one echo reply arrived at H1, and the
    // echo reply came from H2's address.
    let to_h1 = log.received_by(h1);
    assert_eq!(
        to_h1
            .iter()
            .filter(|f| as_arp(f, ArpOperation::Reply).is_some())
            .count(),
        1
    );
    let echo_replies: Vec<_> = to_h1
        .iter()
        .filter_map(|f| as_icmp(f, ICMP_ECHO_REPLY))
        .collect();
    assert_eq!(echo_replies.len(), 1);
    assert_eq!(echo_replies[0].0.src, ip("192.168.1.20"));

    // Clean fabric: everything sent was delivered.
    let stats = sim.stats();
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.frames_sent, stats.frames_received);
}

#[test]
fn arp_reply_carries_the_right_addresses() {
    let (mut sim, h1, h2, _) = two_hosts_one_switch();
    let log = EventLog::new();
    sim.subscribe(log.observer());

    sim.ping(
        h1,
        ip("192.168.1.20"),
        PingOptions {
            count: 1,
            ..PingOptions::default()
        },
    )
    .unwrap();

    let reply = log
        .received_by(h1)
        .iter()
        .find_map(|f| as_arp(f, ArpOperation::Reply))
        .expect("one ARP reply at h1");
    assert_eq!(reply.sender_mac, host_mac(&sim, h2));
    assert_eq!(reply.sender_ip, ip("192.168.1.20"));
    assert_eq!(reply.target_mac, host_mac(&sim, h1));
    assert_eq!(reply.target_ip, ip("192.168.1.10"));
}

#[test]
fn learned_unicast_no_longer_floods() {
    // Three hosts on one switch; after h1<->h2 have exchanged frames,
    // further unicast between them must not reach h3.
    let mut sim = Simulator::new();
    let h1 = register_host(&mut sim, "h1", "192.168.1.10");
    let h2 = register_host(&mut sim, "h2", "192.168.1.20");
    let h3 = register_host(&mut sim, "h3", "192.168.1.30");
    let sw = sim.register(Switch::new("sw1", 4)).unwrap();
    sim.connect(h1, 0, sw, 0).unwrap();
    sim.connect(h2, 0, sw, 1).unwrap();
    sim.connect(h3, 0, sw, 2).unwrap();

    let warmup = sim
        .ping(h1, ip("192.168.1.20"), PingOptions { count: 1, ..PingOptions::default() })
        .unwrap();
    assert!(warmup.success);

    // The ARP broadcast reached h3 during warmup.
    let log = EventLog::new();
    sim.subscribe(log.observer());

    let second = sim
        .ping(h1, ip("192.168.1.20"), PingOptions { count: 1, ..PingOptions::default() })
        .unwrap();
    assert!(second.success);

    // Warm caches: no ARP, no flooding, nothing at h3.
    assert!(log.received_by(h3).is_empty());
    assert_eq!(log.drop_count(DropReason::PortDisconnected), 0);
}

#[test]
fn ping_to_unowned_address_reports_unreachable() {
    let (mut sim, h1, h2, _) = two_hosts_one_switch();
    let log = EventLog::new();
    sim.subscribe(log.observer());

    let report = sim
        .ping(
            h1,
            ip("192.168.1.99"),
            PingOptions {
                count: 2,
                ..PingOptions::default()
            },
        )
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.transmitted, 0);
    assert_eq!(report.received, 0);
    assert!(report.error.as_deref().unwrap_or("").contains("unreachable"));

    // The broadcast ARP request flooded to H2, which stayed silent.
    assert!(log
        .received_by(h2)
        .iter()
        .any(|f| as_arp(f, ArpOperation::Request)
            .is_some_and(|p| p.target_ip == ip("192.168.1.99"))));
    assert!(log.sent_by(h2).is_empty());
}

#[test]
fn ping_to_admin_down_interface_fails_with_drop_event() {
    let (mut sim, h1, h2, _) = two_hosts_one_switch();
    sim.host_mut(h2).unwrap().interface_mut(0).unwrap().down();

    let log = EventLog::new();
    sim.subscribe(log.observer());

    let report = sim
        .ping(
            h1,
            ip("192.168.1.20"),
            PingOptions {
                count: 1,
                ..PingOptions::default()
            },
        )
        .unwrap();

    assert!(!report.success);
    assert!(log.drop_count(DropReason::InterfaceDown) >= 1);
    assert!(log.received_by(h2).is_empty());
}

#[test]
fn ping_to_powered_off_host_fails_with_drop_event() {
    let (mut sim, h1, h2, _) = two_hosts_one_switch();
    sim.power_off(h2).unwrap();

    let log = EventLog::new();
    sim.subscribe(log.observer());

    let report = sim
        .ping(
            h1,
            ip("192.168.1.20"),
            PingOptions {
                count: 1,
                ..PingOptions::default()
            },
        )
        .unwrap();

    assert!(!report.success);
    assert!(log.drop_count(DropReason::DevicePoweredOff) >= 1);
}

#[test]
fn second_ping_attempt_succeeds_without_rearping() {
    let (mut sim, h1, _, _) = two_hosts_one_switch();
    let report = sim
        .ping(
            h1,
            ip("192.168.1.20"),
            PingOptions {
                count: 3,
                ..PingOptions::default()
            },
        )
        .unwrap();
    assert_eq!(report.transmitted, 3);
    assert_eq!(report.received, 3);

    // One ARP request total: attempts 2 and 3 reused the cache.
    let table = sim.host(h1).unwrap().arp().table();
    assert_eq!(table.len(), 1);
}

#[test]
fn hub_floods_even_known_unicast() {
    let mut sim = Simulator::new();
    let h1 = register_host(&mut sim, "h1", "192.168.1.10");
    let h2 = register_host(&mut sim, "h2", "192.168.1.20");
    let h3 = register_host(&mut sim, "h3", "192.168.1.30");
    let hub = sim.register(Switch::hub("hub1", 3)).unwrap();
    sim.connect(h1, 0, hub, 0).unwrap();
    sim.connect(h2, 0, hub, 1).unwrap();
    sim.connect(h3, 0, hub, 2).unwrap();

    let warmup = sim
        .ping(h1, ip("192.168.1.20"), PingOptions { count: 1, ..PingOptions::default() })
        .unwrap();
    assert!(warmup.success);

    let log = EventLog::new();
    sim.subscribe(log.observer());
    sim.ping(h1, ip("192.168.1.20"), PingOptions { count: 1, ..PingOptions::default() })
        .unwrap();

    // A hub keeps blasting unicast echo traffic at the third host.
    assert!(log
        .received_by(h3)
        .iter()
        .any(|f| as_icmp(f, ICMP_ECHO_REQUEST).is_some()));
    assert!(sim.switch(hub).unwrap().mac_table().is_empty());
}
