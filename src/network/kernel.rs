//! Linux network interface operations
//!
//! Host-side checks use native calls (`if_nametoindex(3)`, `getifaddrs(3)`)
//! through nix. Configuration goes through iproute2; inside a container's
//! namespace the same commands run under `nsenter --net`.

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_checked};
use crate::network::mac::MacAddr;
use ipnet::Ipv4Net;
use nix::errno::Errno;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

/// Network namespace an operation runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Netns {
    /// The orchestrator's own namespace
    Host,
    /// The namespace of a process (a container's init)
    Pid(i32),
}

impl fmt::Display for Netns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Netns::Host => write!(f, "host"),
            Netns::Pid(pid) => write!(f, "pid:{}", pid),
        }
    }
}

/// Kernel interface operations
///
/// Each call is a single operation that fails independently of the others.
pub trait KernelInterface: Send + Sync {
    /// Whether the interface is visible in the host namespace
    fn link_exists(&self, name: &str) -> Result<bool>;

    /// First IPv4 address configured on a host interface, with its prefix
    fn link_ipv4(&self, name: &str) -> Result<Option<Ipv4Net>>;

    fn set_address(&self, ns: Netns, name: &str, addr: Ipv4Net) -> Result<()>;

    fn set_link_up(&self, ns: Netns, name: &str, up: bool) -> Result<()>;

    fn set_mtu(&self, ns: Netns, name: &str, mtu: u32) -> Result<()>;

    /// Move a host interface into the namespace of `pid`
    fn move_to_netns(&self, name: &str, pid: i32) -> Result<()>;

    fn rename(&self, ns: Netns, name: &str, new_name: &str) -> Result<()>;

    fn set_mac(&self, ns: Netns, name: &str, mac: MacAddr) -> Result<()>;

    /// Install (or replace) the default route via `gateway` on `name`
    fn set_default_gateway(&self, ns: Netns, gateway: Ipv4Addr, name: &str) -> Result<()>;
}

/// Kernel operations backed by iproute2 and nix
pub struct IpRoute2 {
    runner: Box<dyn CommandRunner>,
}

impl IpRoute2 {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run `ip` with `ip_args` inside `ns`
    fn ip(&self, ns: Netns, ip_args: &[&str]) -> Result<()> {
        let ip_args = ip_args.iter().map(|s| s.to_string());
        match ns {
            Netns::Host => {
                run_checked(self.runner.as_ref(), "ip", &ip_args.collect::<Vec<_>>())?;
            }
            Netns::Pid(pid) => {
                let mut full = vec![
                    "--target".to_string(),
                    pid.to_string(),
                    "--net".to_string(),
                    "--".to_string(),
                    "ip".to_string(),
                ];
                full.extend(ip_args);
                run_checked(self.runner.as_ref(), "nsenter", &full)?;
            }
        }
        Ok(())
    }
}

impl KernelInterface for IpRoute2 {
    fn link_exists(&self, name: &str) -> Result<bool> {
        match if_nametoindex(name) {
            Ok(_) => Ok(true),
            Err(Errno::ENODEV) | Err(Errno::ENXIO) => Ok(false),
            Err(e) => Err(Error::CommandFailed {
                command: format!("if_nametoindex({})", name),
                message: e.to_string(),
            }),
        }
    }

    fn link_ipv4(&self, name: &str) -> Result<Option<Ipv4Net>> {
        let addrs = getifaddrs().map_err(|e| Error::CommandFailed {
            command: "getifaddrs".to_string(),
            message: e.to_string(),
        })?;

        for ifaddr in addrs.filter(|a| a.interface_name == name) {
            let Some(addr) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
                continue;
            };

            let prefix = ifaddr
                .netmask
                .as_ref()
                .and_then(|m| m.as_sockaddr_in())
                .map(|m| u32::from(m.ip()).count_ones() as u8)
                .unwrap_or(32);

            let net = Ipv4Net::new(addr.ip(), prefix)
                .map_err(|e| Error::MalformedInput(format!("bad netmask on {}: {}", name, e)))?;
            debug!(interface = name, address = %net, "found existing interface address");
            return Ok(Some(net));
        }

        Ok(None)
    }

    fn set_address(&self, ns: Netns, name: &str, addr: Ipv4Net) -> Result<()> {
        // replace is idempotent, add fails with EEXIST on a retry
        let addr = addr.to_string();
        self.ip(ns, &["addr", "replace", &addr, "dev", name])
    }

    fn set_link_up(&self, ns: Netns, name: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.ip(ns, &["link", "set", "dev", name, state])
    }

    fn set_mtu(&self, ns: Netns, name: &str, mtu: u32) -> Result<()> {
        let mtu = mtu.to_string();
        self.ip(ns, &["link", "set", "dev", name, "mtu", &mtu])
    }

    fn move_to_netns(&self, name: &str, pid: i32) -> Result<()> {
        let pid = pid.to_string();
        self.ip(Netns::Host, &["link", "set", "dev", name, "netns", &pid])
    }

    fn rename(&self, ns: Netns, name: &str, new_name: &str) -> Result<()> {
        if name == new_name {
            return Ok(());
        }
        self.ip(ns, &["link", "set", "dev", name, "name", new_name])
    }

    fn set_mac(&self, ns: Netns, name: &str, mac: MacAddr) -> Result<()> {
        let mac = mac.to_string();
        self.ip(ns, &["link", "set", "dev", name, "address", &mac])
    }

    fn set_default_gateway(&self, ns: Netns, gateway: Ipv4Addr, name: &str) -> Result<()> {
        let gateway = gateway.to_string();
        self.ip(ns, &["route", "replace", "default", "via", &gateway, "dev", name])
    }
}
