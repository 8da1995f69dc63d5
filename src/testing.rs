//! In-memory collaborators for unit tests

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, Output};
use crate::network::firewall::Firewall;
use crate::network::gateway::{RouteTable, networks_overlap};
use crate::network::kernel::{KernelInterface, Netns};
use crate::network::mac::MacAddr;
use crate::network::ovs::ControlPlane;
use ipnet::Ipv4Net;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Command runner that records command lines and answers from a script
#[derive(Clone)]
pub struct ScriptedRunner {
    calls: Arc<Mutex<Vec<String>>>,
    responses: Arc<Vec<(String, Output)>>,
    default: Output,
}

impl ScriptedRunner {
    pub fn succeeding() -> Self {
        Self {
            calls: Arc::default(),
            responses: Arc::default(),
            default: Output {
                success: true,
                ..Default::default()
            },
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            calls: Arc::default(),
            responses: Arc::default(),
            default: Output {
                success: false,
                stderr: stderr.to_string(),
            },
        }
    }

    /// Answer with `output` for command lines containing `pattern`
    pub fn respond(self, pattern: &str, output: Output) -> Self {
        let mut responses = (*self.responses).clone();
        responses.push((pattern.to_string(), output));
        Self {
            calls: self.calls,
            responses: Arc::new(responses),
            default: self.default,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| self.default.clone()))
    }
}

#[derive(Default)]
struct KernelState {
    links: HashSet<String>,
    addrs: HashMap<String, Ipv4Net>,
    pending: HashMap<String, usize>,
    checks: HashMap<String, usize>,
    ops: Vec<String>,
    fail_on: Option<String>,
}

/// Kernel fake tracking host links, addresses and every configuration call
#[derive(Clone, Default)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&self, name: &str) {
        self.state.lock().unwrap().links.insert(name.to_string());
    }

    pub fn add_link_with_addr(&self, name: &str, addr: &str) {
        let mut state = self.state.lock().unwrap();
        state.links.insert(name.to_string());
        state.addrs.insert(name.to_string(), addr.parse().unwrap());
    }

    /// Link becomes visible on the `checks`-th existence check
    pub fn appear_after(&self, name: &str, checks: usize) {
        self.state
            .lock()
            .unwrap()
            .pending
            .insert(name.to_string(), checks);
    }

    pub fn checks(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .checks
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Fail every call to the named operation, either everywhere
    /// ("link_up") or in one namespace only ("link_up@pid:4242")
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().fail_on = Some(op.to_string());
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    fn record(&self, op: &str, ns: Netns, detail: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("{} {} @{}", op, detail, ns));
        let scoped = format!("{}@{}", op, ns);
        let target = state.fail_on.as_deref();
        if target == Some(op) || target == Some(scoped.as_str()) {
            return Err(Error::CommandFailed {
                command: op.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl KernelInterface for FakeKernel {
    fn link_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let checks = {
            let count = state.checks.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(&after) = state.pending.get(name) {
            if checks >= after {
                state.pending.remove(name);
                state.links.insert(name.to_string());
            }
        }

        Ok(state.links.contains(name))
    }

    fn link_ipv4(&self, name: &str) -> Result<Option<Ipv4Net>> {
        Ok(self.state.lock().unwrap().addrs.get(name).copied())
    }

    fn set_address(&self, ns: Netns, name: &str, addr: Ipv4Net) -> Result<()> {
        self.record("set_address", ns, format!("{} {}", name, addr))?;
        if ns == Netns::Host {
            self.state
                .lock()
                .unwrap()
                .addrs
                .insert(name.to_string(), addr);
        }
        Ok(())
    }

    fn set_link_up(&self, ns: Netns, name: &str, up: bool) -> Result<()> {
        let op = if up { "link_up" } else { "link_down" };
        self.record(op, ns, name.to_string())
    }

    fn set_mtu(&self, ns: Netns, name: &str, mtu: u32) -> Result<()> {
        self.record("set_mtu", ns, format!("{} {}", name, mtu))
    }

    fn move_to_netns(&self, name: &str, pid: i32) -> Result<()> {
        self.record("move_to_netns", Netns::Host, format!("{} {}", name, pid))?;
        self.state.lock().unwrap().links.remove(name);
        Ok(())
    }

    fn rename(&self, ns: Netns, name: &str, new_name: &str) -> Result<()> {
        self.record("rename", ns, format!("{} {}", name, new_name))
    }

    fn set_mac(&self, ns: Netns, name: &str, mac: MacAddr) -> Result<()> {
        self.record("set_mac", ns, format!("{} {}", name, mac))
    }

    fn set_default_gateway(&self, ns: Netns, gateway: Ipv4Addr, name: &str) -> Result<()> {
        self.record("default_route", ns, format!("{} {}", gateway, name))
    }
}

#[derive(Default)]
struct ControlPlaneState {
    calls: Vec<String>,
    ports: HashSet<String>,
    taken: usize,
}

/// Switch fake; created bridges and ports show up in the linked kernel
#[derive(Clone)]
pub struct FakeControlPlane {
    connected: bool,
    kernel: Option<FakeKernel>,
    state: Arc<Mutex<ControlPlaneState>>,
}

impl FakeControlPlane {
    pub fn connected(kernel: &FakeKernel) -> Self {
        Self {
            connected: true,
            kernel: Some(kernel.clone()),
            state: Arc::default(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            kernel: None,
            state: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn ports(&self) -> HashSet<String> {
        self.state.lock().unwrap().ports.clone()
    }

    /// Report the next `count` internal port names as already in use
    pub fn names_taken(&self, count: usize) {
        self.state.lock().unwrap().taken = count;
    }

    fn record(&self, call: String) -> Result<()> {
        if !self.connected {
            return Err(Error::ControlPlaneUnavailable);
        }
        self.state.lock().unwrap().calls.push(call);
        Ok(())
    }
}

impl ControlPlane for FakeControlPlane {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        self.record(format!("create_bridge {}", name))?;
        if let Some(kernel) = &self.kernel {
            kernel.add_link(name);
        }
        Ok(())
    }

    fn create_internal_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.record(format!("create_internal_port {} {}", bridge, port))?;
        {
            let mut state = self.state.lock().unwrap();
            if state.taken > 0 {
                state.taken -= 1;
                return Err(Error::PortExists(port.to_string()));
            }
            state.ports.insert(port.to_string());
        }
        if let Some(kernel) = &self.kernel {
            kernel.add_link(port);
        }
        Ok(())
    }

    fn create_tunnel_port(&self, bridge: &str, port: &str, remote: Ipv4Addr) -> Result<()> {
        self.record(format!("create_tunnel_port {} {} {}", bridge, port, remote))?;
        self.state.lock().unwrap().ports.insert(port.to_string());
        Ok(())
    }

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.record(format!("delete_port {} {}", bridge, port))?;
        self.state.lock().unwrap().ports.remove(port);
        Ok(())
    }
}

/// Route table fake counting overlap queries
#[derive(Default)]
pub struct FakeRoutes {
    routes: Vec<Ipv4Net>,
    everything: bool,
    queries: AtomicUsize,
}

impl FakeRoutes {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_routes(routes: &[&str]) -> Self {
        Self {
            routes: routes.iter().map(|r| r.parse().unwrap()).collect(),
            ..Self::default()
        }
    }

    pub fn overlapping_all() -> Self {
        Self {
            everything: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl RouteTable for FakeRoutes {
    fn overlaps(&self, network: &Ipv4Net) -> Result<bool> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.everything || self.routes.iter().any(|r| networks_overlap(network, r)))
    }
}

/// Firewall fake counting installs
#[derive(Clone, Default)]
pub struct FakeFirewall {
    installs: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl FakeFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }
}

impl Firewall for FakeFirewall {
    fn install(&self, bridge: &str, subnet: Ipv4Net) -> Result<()> {
        if self.fail {
            return Err(Error::FirewallInstallFailed {
                bridge: bridge.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.installs
            .lock()
            .unwrap()
            .push(format!("{} {}", bridge, subnet.trunc()));
        Ok(())
    }
}
