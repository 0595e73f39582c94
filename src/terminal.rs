//! Device-facing command surface for the terminal personas
//!
//! The textual shells (bash, cmd, IOS) parse their own syntax and
//! format their own output; what they share is this typed surface and
//! the stable error categories in [`CommandError`]. Network behavior
//! is identical across personas; the tag only drives parsing and
//! formatting in the persona layer.

use crate::addr::{Ipv4Address, MacAddress, SubnetMask};
use crate::device::{DeviceId, RouteTableEntry};
use crate::error::CommandError;
use crate::net::arp::ArpCacheEntry;
use crate::net::dhcp::client::DhcpBinding;
use crate::net::dhcp::server::DhcpServerConfig;
use crate::sim::{Hop, PingOptions, PingReport, Simulator};

/// Which shell flavor a host presents. Replaces the original
/// inheritance chain of OS-specific device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsPersona {
    Linux,
    Windows,
    CiscoIos,
}

/// Every state-changing or state-reading operation a persona shell can
/// issue against a device.
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    ConfigureInterface {
        interface: String,
        ip: Option<Ipv4Address>,
        mask: Option<SubnetMask>,
        gateway: Option<Ipv4Address>,
        admin_up: Option<bool>,
    },
    Ping {
        target: Ipv4Address,
        count: u32,
    },
    Traceroute {
        target: Ipv4Address,
        max_hops: u8,
    },
    AddArpEntry {
        ip: Ipv4Address,
        mac: MacAddress,
    },
    ShowArpTable,
    AddRoute {
        network: Ipv4Address,
        mask: SubnetMask,
        next_hop: Option<Ipv4Address>,
        interface: String,
    },
    RemoveRoute {
        network: Ipv4Address,
        mask: SubnetMask,
    },
    SetDefaultRoute {
        next_hop: Ipv4Address,
        interface: String,
    },
    ShowRoutes,
    DhcpDiscover {
        interface: String,
    },
    DhcpRenew {
        interface: String,
    },
    DhcpRelease {
        interface: String,
    },
    DhcpServerEnable {
        interface: String,
        config: DhcpServerConfig,
    },
    DhcpServerDisable {
        interface: String,
    },
}

/// Typed result a persona renders into its own wording.
#[derive(Debug)]
pub enum CommandOutput {
    Done,
    Ping(PingReport),
    Traceroute(Vec<Hop>),
    ArpTable(Vec<(Ipv4Address, ArpCacheEntry)>),
    Routes(Vec<RouteTableEntry>),
    DhcpLease(Option<DhcpBinding>),
}

/// Execute one typed command against a device.
pub fn execute(
    sim: &mut Simulator,
    device: DeviceId,
    command: DeviceCommand,
) -> Result<CommandOutput, CommandError> {
    match command {
        DeviceCommand::ConfigureInterface {
            interface,
            ip,
            mask,
            gateway,
            admin_up,
        } => {
            configure(sim, device, &interface, ip, mask, gateway, admin_up)?;
            Ok(CommandOutput::Done)
        }
        DeviceCommand::Ping { target, count } => {
            let report = sim.ping(
                device,
                target,
                PingOptions {
                    count,
                    ..PingOptions::default()
                },
            )?;
            Ok(CommandOutput::Ping(report))
        }
        DeviceCommand::Traceroute { target, max_hops } => {
            Ok(CommandOutput::Traceroute(sim.traceroute(device, target, max_hops)?))
        }
        DeviceCommand::AddArpEntry { ip, mac } => {
            let clock = sim.clock();
            sim.host_mut(device)?.arp_mut().insert(ip, mac, clock);
            Ok(CommandOutput::Done)
        }
        DeviceCommand::ShowArpTable => {
            Ok(CommandOutput::ArpTable(sim.host(device)?.arp().table()))
        }
        DeviceCommand::AddRoute {
            network,
            mask,
            next_hop,
            interface,
        } => {
            let router = sim.router_mut(device)?;
            let egress = router.interface_index(&interface)?;
            router.add_route(network, mask, next_hop, egress as u8)?;
            Ok(CommandOutput::Done)
        }
        DeviceCommand::RemoveRoute { network, mask } => {
            sim.router_mut(device)?.remove_route(network, mask);
            Ok(CommandOutput::Done)
        }
        DeviceCommand::SetDefaultRoute {
            next_hop,
            interface,
        } => {
            let router = sim.router_mut(device)?;
            let egress = router.interface_index(&interface)?;
            router.set_default_route(next_hop, egress as u8)?;
            Ok(CommandOutput::Done)
        }
        DeviceCommand::ShowRoutes => Ok(CommandOutput::Routes(
            sim.router(device)?.routes().entries().to_vec(),
        )),
        DeviceCommand::DhcpDiscover { interface } => {
            let index = sim.host(device)?.interface_index(&interface)?;
            Ok(CommandOutput::DhcpLease(sim.dhcp_discover(device, index)?))
        }
        DeviceCommand::DhcpRenew { interface } => {
            let index = sim.host(device)?.interface_index(&interface)?;
            if sim.host(device)?.dhcp_client(index).is_none() {
                return Err(CommandError::DhcpNotEnabled);
            }
            Ok(CommandOutput::DhcpLease(sim.dhcp_renew(device, index)?))
        }
        DeviceCommand::DhcpRelease { interface } => {
            let index = sim.host(device)?.interface_index(&interface)?;
            if sim.host(device)?.dhcp_client(index).is_none() {
                return Err(CommandError::DhcpNotEnabled);
            }
            sim.dhcp_release(device, index)?;
            Ok(CommandOutput::Done)
        }
        DeviceCommand::DhcpServerEnable { interface, config } => {
            let router = sim.router_mut(device)?;
            let index = router.interface_index(&interface)?;
            router.dhcp_server_enable(index, config)?;
            Ok(CommandOutput::Done)
        }
        DeviceCommand::DhcpServerDisable { interface } => {
            let router = sim.router_mut(device)?;
            let index = router.interface_index(&interface)?;
            router.dhcp_server_disable(index);
            Ok(CommandOutput::Done)
        }
    }
}

fn configure(
    sim: &mut Simulator,
    device: DeviceId,
    interface: &str,
    ip: Option<Ipv4Address>,
    mask: Option<SubnetMask>,
    gateway: Option<Ipv4Address>,
    admin_up: Option<bool>,
) -> Result<(), CommandError> {
    use crate::error::ConfigError;

    // Routers configure addresses through their route-installing path;
    // hosts through theirs. Switches have no interfaces.
    match sim.node(device).map_err(CommandError::Config)?.kind() {
        "host" => {
            let host = sim.host_mut(device)?;
            host.configure_interface(interface, ip.zip(mask), gateway, admin_up)?;
            Ok(())
        }
        "router" => {
            let router = sim.router_mut(device)?;
            let index = router.interface_index(interface)?;
            if let Some((ip, mask)) = ip.zip(mask) {
                router.configure_interface(index, ip, mask)?;
            }
            match admin_up {
                Some(true) => {
                    if let Some(iface) = router.interface_mut(index) {
                        iface.up();
                    }
                }
                Some(false) => {
                    if let Some(iface) = router.interface_mut(index) {
                        iface.down();
                    }
                }
                None => {}
            }
            Ok(())
        }
        other => Err(CommandError::Config(ConfigError::WrongDeviceKind {
            expected: "host or router",
            actual: other,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Host, Switch};

    fn ip(s: &str) -> Ipv4Address {
        s.parse().unwrap()
    }

    #[test]
    fn configure_and_read_arp_table() {
        let mut sim = Simulator::new();
        let h1 = sim.register(Host::new("h1")).unwrap();

        execute(
            &mut sim,
            h1,
            DeviceCommand::ConfigureInterface {
                interface: "eth0".into(),
                ip: Some(ip("10.0.0.1")),
                mask: Some("/24".parse().unwrap()),
                gateway: None,
                admin_up: Some(true),
            },
        )
        .unwrap();
        assert_eq!(sim.host(h1).unwrap().interfaces()[0].ip(), Some(ip("10.0.0.1")));

        execute(
            &mut sim,
            h1,
            DeviceCommand::AddArpEntry {
                ip: ip("10.0.0.2"),
                mac: MacAddress([5; 6]),
            },
        )
        .unwrap();
        let CommandOutput::ArpTable(table) = execute(&mut sim, h1, DeviceCommand::ShowArpTable).unwrap()
        else {
            panic!("expected table");
        };
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].0, ip("10.0.0.2"));
    }

    #[test]
    fn unknown_interface_category() {
        let mut sim = Simulator::new();
        let h1 = sim.register(Host::new("h1")).unwrap();
        let err = execute(
            &mut sim,
            h1,
            DeviceCommand::ConfigureInterface {
                interface: "eth7".into(),
                ip: None,
                mask: None,
                gateway: None,
                admin_up: Some(true),
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Config(crate::error::ConfigError::UnknownInterface(_))
        ));
    }

    #[test]
    fn dhcp_commands_require_an_enabled_client() {
        let mut sim = Simulator::new();
        let h1 = sim.register(Host::new("h1")).unwrap();
        sim.host_mut(h1)
            .unwrap()
            .configure_interface("eth0", None, None, Some(true))
            .unwrap();

        let err = execute(
            &mut sim,
            h1,
            DeviceCommand::DhcpRenew {
                interface: "eth0".into(),
            },
        )
        .unwrap_err();
        assert_eq!(err, CommandError::DhcpNotEnabled);
    }

    #[test]
    fn route_commands_reject_non_routers() {
        let mut sim = Simulator::new();
        let sw = sim.register(Switch::new("sw1", 4)).unwrap();
        let err = execute(&mut sim, sw, DeviceCommand::ShowRoutes).unwrap_err();
        assert!(matches!(err, CommandError::Config(_)));
    }
}
