//! Top-level coordination of bridge, tunnels and connections
//!
//! Wires the components to one set of collaborators and enforces that the
//! bridge is resolved before anything is attached to it.

use crate::error::{Error, Result};
use crate::exec::SystemRunner;
use crate::manifest::OverlinkConfig;
use crate::network::{
    AddressAllocator, BridgeManager, BridgeState, Connection, ConnectionProvisioner, ControlPlane,
    Firewall, IpAllocator, IpRoute2, Iptables, KernelInterface, OvsVsctl, ProcRoutes, RouteTable,
    Settle, Tunnel, TunnelManager,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// External systems the orchestrator drives
pub struct Collaborators {
    pub control: Arc<dyn ControlPlane>,
    pub kernel: Arc<dyn KernelInterface>,
    pub routes: Arc<dyn RouteTable>,
    pub firewall: Arc<dyn Firewall>,
    pub allocator: Box<dyn AddressAllocator>,
}

impl Collaborators {
    /// The real host: ovs-vsctl, iproute2, /proc/net/route and iptables
    pub fn host(config: &OverlinkConfig) -> Self {
        Self {
            control: Arc::new(OvsVsctl::connect(&config.ovs, Box::new(SystemRunner))),
            kernel: Arc::new(IpRoute2::new(Box::new(SystemRunner))),
            routes: Arc::new(ProcRoutes::default()),
            firewall: Arc::new(Iptables::new(Box::new(SystemRunner))),
            allocator: Box::new(IpAllocator::new()),
        }
    }
}

/// Owns the bridge and everything attached to it
pub struct Orchestrator {
    config: OverlinkConfig,
    bridge: BridgeManager,
    tunnels: TunnelManager,
    connections: ConnectionProvisioner,
}

impl Orchestrator {
    pub fn new(config: OverlinkConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            control,
            kernel,
            routes,
            firewall,
            allocator,
        } = collaborators;

        let settle = Settle::new(config.settle.clone());

        let bridge = BridgeManager::new(
            &config.bridge.name,
            Arc::clone(&control),
            Arc::clone(&kernel),
            routes,
            firewall,
            settle.clone(),
        );
        let tunnels = TunnelManager::new(Arc::clone(&control), &config.tunnel.port_prefix);
        let connections = ConnectionProvisioner::new(
            control,
            kernel,
            allocator,
            settle,
            config.bridge.mtu,
            &config.connection,
        );

        Self {
            config,
            bridge,
            tunnels,
            connections,
        }
    }

    /// Orchestrator driving the local host
    pub fn host(config: OverlinkConfig) -> Self {
        let collaborators = Collaborators::host(&config);
        Self::new(config, collaborators)
    }

    /// Make sure the bridge exists, is addressed and is up
    ///
    /// `explicit` overrides the configured CIDR. `cancel` only aborts this
    /// call.
    pub fn ensure_bridge(
        &self,
        explicit: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<Arc<BridgeState>> {
        let explicit = explicit.or(self.config.bridge.cidr.as_deref());
        self.bridge.ensure_bridge(explicit, cancel)
    }

    #[cfg(test)]
    pub fn bridge(&self) -> Option<Arc<BridgeState>> {
        self.bridge.state()
    }

    fn ready(&self) -> Result<Arc<BridgeState>> {
        self.bridge.state().ok_or(Error::BridgeNotReady)
    }

    pub fn add_peer(&self, peer: &str) -> Result<Tunnel> {
        let bridge = self.ready()?;
        self.tunnels.add_peer(&bridge, peer)
    }

    pub fn remove_peer(&self, peer: &str) -> Result<()> {
        let bridge = self.ready()?;
        self.tunnels.remove_peer(&bridge, peer)
    }

    #[cfg(test)]
    pub fn peers(&self) -> Vec<Tunnel> {
        self.tunnels.peers()
    }

    /// Attach the network namespace of `pid`
    pub fn attach(&self, pid: i32, cancel: &AtomicBool) -> Result<Connection> {
        if pid <= 0 {
            return Err(Error::MalformedInput(format!("invalid pid {}", pid)));
        }
        let bridge = self.ready()?;
        self.connections.provision(&bridge, pid, cancel)
    }

    /// Remove a port and free its address
    pub fn detach(&self, port: &str) -> Result<Option<Ipv4Addr>> {
        let bridge = self.ready()?;
        self.connections.release(&bridge, port)
    }

    /// Keep `address` out of the allocation pool
    pub fn reserve(&self, address: Ipv4Addr) -> Result<()> {
        let bridge = self.ready()?;
        if !bridge.subnet.contains(&address) {
            return Err(Error::MalformedInput(format!(
                "{} is outside bridge subnet {}",
                address, bridge.subnet
            )));
        }
        self.connections.reserve(&bridge, address)
    }

    #[cfg(test)]
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.connections()
    }
}
