//! Container attachment
//!
//! Provisions an internal switch port for a container, moves it into the
//! container's network namespace and configures it there: address, MAC and
//! default route via the bridge gateway.

use crate::error::{Error, Result, Step};
use crate::manifest::ConnectionConfig;
use crate::network::bridge::BridgeState;
use crate::network::ip::AddressAllocator;
use crate::network::kernel::{KernelInterface, Netns};
use crate::network::mac::MacAddr;
use crate::network::ovs::ControlPlane;
use crate::network::settle::Settle;
use ipnet::Ipv4Net;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Random bytes behind a port name suffix
const PORT_ENTROPY_BYTES: usize = 32;

/// Hex characters of the suffix kept in the port name
const PORT_SUFFIX_LEN: usize = 7;

/// Fresh names tried before giving up on a crowded switch
const PORT_NAME_ATTEMPTS: usize = 8;

/// A container attached to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Switch port name, the handle for release
    pub port_name: String,
    /// Interface name inside the container
    pub interface: String,
    pub address: Ipv4Addr,
    /// Prefix length in `/N` form
    pub subnet_suffix: String,
    pub mac: MacAddr,
    /// Bridge address, installed as the default route
    pub gateway: Ipv4Addr,
    /// Process owning the namespace
    pub pid: i32,
}

/// Everything this process created for a port so far
#[derive(Debug, Clone)]
struct PortRecord {
    subnet: Ipv4Net,
    address: Option<Ipv4Addr>,
    connection: Option<Connection>,
}

/// Attaches and detaches containers
pub struct ConnectionProvisioner {
    control: Arc<dyn ControlPlane>,
    kernel: Arc<dyn KernelInterface>,
    settle: Settle,
    mtu: u32,
    port_prefix: String,
    interface: Option<String>,
    allocator: Mutex<Box<dyn AddressAllocator>>,
    ports: Mutex<HashMap<String, PortRecord>>,
}

impl ConnectionProvisioner {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        kernel: Arc<dyn KernelInterface>,
        allocator: Box<dyn AddressAllocator>,
        settle: Settle,
        mtu: u32,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            control,
            kernel,
            settle,
            mtu,
            port_prefix: config.port_prefix.clone(),
            interface: config.interface.clone(),
            allocator: Mutex::new(allocator),
            ports: Mutex::new(HashMap::new()),
        }
    }

    fn ports(&self) -> MutexGuard<'_, HashMap<String, PortRecord>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocator(&self) -> MutexGuard<'_, Box<dyn AddressAllocator>> {
        self.allocator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn random_port_name(&self) -> String {
        let mut bytes = [0u8; PORT_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let suffix = hex::encode(bytes);
        format!("{}{}", self.port_prefix, &suffix[..PORT_SUFFIX_LEN])
    }

    /// Pick an unused port name and claim it
    fn claim_port_name(&self, subnet: Ipv4Net) -> String {
        let mut ports = self.ports();
        loop {
            let name = self.random_port_name();
            if ports.contains_key(&name) {
                debug!(port = %name, "port name collision, regenerating");
                continue;
            }
            ports.insert(
                name.clone(),
                PortRecord {
                    subnet,
                    address: None,
                    connection: None,
                },
            );
            return name;
        }
    }

    /// Create a new internal port under a fresh name
    ///
    /// Other processes attach containers too, so a name unknown here can
    /// still be taken on the switch. Such names are dropped and regenerated.
    fn create_port(&self, bridge: &BridgeState) -> Result<String> {
        let mut last = String::new();
        for _ in 0..PORT_NAME_ATTEMPTS {
            let port = self.claim_port_name(bridge.subnet);
            match self.control.create_internal_port(&bridge.name, &port) {
                Ok(()) => {
                    debug!(bridge = %bridge.name, port = %port, "created internal port");
                    return Ok(port);
                }
                Err(Error::PortExists(_)) => {
                    self.ports().remove(&port);
                    warn!(port = %port, "port name already in use on the switch, regenerating");
                    last = port;
                }
                Err(e) => {
                    self.ports().remove(&port);
                    return Err(e);
                }
            }
        }

        Err(Error::PortExists(last))
    }

    /// Attach the namespace of `pid` to the bridge
    ///
    /// Stops at the first failed step without undoing earlier ones. The port
    /// stays registered, so `release` with the port name from the error
    /// removes whatever was created. Setting `cancel` aborts the wait for
    /// the new port to appear.
    pub fn provision(
        &self,
        bridge: &BridgeState,
        pid: i32,
        cancel: &AtomicBool,
    ) -> Result<Connection> {
        if !self.control.is_connected() {
            return Err(Error::ControlPlaneUnavailable);
        }

        let port = self.create_port(bridge)?;
        self.settle.wait_for_link(self.kernel.as_ref(), &port, cancel)?;

        let address = self.allocate(bridge, &port)?;
        let mac = MacAddr::from_ipv4(address);
        let prefix = bridge.subnet.prefix_len();
        let interface = self.interface.clone().unwrap_or_else(|| port.clone());

        let kernel = self.kernel.as_ref();
        let name = port.as_str();
        let step = |step: Step| move |e: Error| Error::at_step(name, step, e);

        kernel
            .set_mtu(Netns::Host, &port, self.mtu)
            .map_err(step(Step::SetMtu))?;
        kernel
            .set_link_up(Netns::Host, &port, true)
            .map_err(step(Step::HostLinkUp))?;
        kernel
            .move_to_netns(&port, pid)
            .map_err(step(Step::MoveToNamespace))?;

        let ns = Netns::Pid(pid);
        kernel
            .set_link_up(ns, &port, false)
            .map_err(step(Step::LinkDown))?;
        kernel
            .rename(ns, &port, &interface)
            .map_err(step(Step::Rename))?;

        let cidr = Ipv4Net::new(address, prefix).map_err(|e| {
            Error::at_step(name, Step::SetAddress, Error::MalformedInput(e.to_string()))
        })?;
        kernel
            .set_address(ns, &interface, cidr)
            .map_err(step(Step::SetAddress))?;
        kernel
            .set_mac(ns, &interface, mac)
            .map_err(step(Step::SetMac))?;
        kernel
            .set_link_up(ns, &interface, true)
            .map_err(step(Step::LinkUp))?;
        kernel
            .set_default_gateway(ns, bridge.address, &interface)
            .map_err(step(Step::DefaultRoute))?;

        let connection = Connection {
            port_name: port.clone(),
            interface,
            address,
            subnet_suffix: format!("/{}", prefix),
            mac,
            gateway: bridge.address,
            pid,
        };

        if let Some(record) = self.ports().get_mut(&port) {
            record.connection = Some(connection.clone());
        }
        info!(
            port = %connection.port_name,
            pid,
            address = %connection.address,
            mac = %connection.mac,
            "attached container"
        );

        Ok(connection)
    }

    fn allocate(&self, bridge: &BridgeState, port: &str) -> Result<Ipv4Addr> {
        let address = self
            .allocator()
            .allocate(bridge.subnet, bridge.address)
            .map_err(|e| match e {
                Error::AddressAllocationFailed(msg) => {
                    Error::AddressAllocationFailed(format!("{} (port {})", msg, port))
                }
                other => Error::AddressAllocationFailed(format!("{} (port {})", other, port)),
            })?;

        if let Some(record) = self.ports().get_mut(port) {
            record.address = Some(address);
        }
        Ok(address)
    }

    /// Delete `port` from the bridge and free its address
    ///
    /// Returns the freed address, or `None` for a port this process did not
    /// provision; the port is deleted either way.
    pub fn release(&self, bridge: &BridgeState, port: &str) -> Result<Option<Ipv4Addr>> {
        if !self.control.is_connected() {
            return Err(Error::ControlPlaneUnavailable);
        }

        self.control.delete_port(&bridge.name, port)?;

        let Some(record) = self.ports().remove(port) else {
            warn!(port, "released a port this process did not provision");
            return Ok(None);
        };

        if let Some(address) = record.address {
            self.allocator().release(record.subnet, address);
        }
        info!(port, address = ?record.address, "detached container");

        Ok(record.address)
    }

    /// Mark `address` as taken so provisioning never hands it out
    pub fn reserve(&self, bridge: &BridgeState, address: Ipv4Addr) -> Result<()> {
        self.allocator()
            .reserve(bridge.subnet, bridge.address, address)
    }

    /// Fully configured connections, ordered by port name
    #[cfg(test)]
    pub fn connections(&self) -> Vec<Connection> {
        let mut live: Vec<Connection> = self
            .ports()
            .values()
            .filter_map(|record| record.connection.clone())
            .collect();
        live.sort_by(|a, b| a.port_name.cmp(&b.port_name));
        live
    }
}
