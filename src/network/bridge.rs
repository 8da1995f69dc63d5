//! Shared bridge lifecycle
//!
//! Provides:
//! - Creation of the OVS bridge when it is missing
//! - Gateway address resolution (existing configuration wins)
//! - Address assignment, link up and firewall setup
//! - The resolved bridge state shared with tunnels and connections

use crate::error::{Error, Result, Step};
use crate::network::firewall::Firewall;
use crate::network::gateway::{RouteTable, select_gateway};
use crate::network::kernel::{KernelInterface, Netns};
use crate::network::ovs::ControlPlane;
use crate::network::settle::Settle;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// The resolved bridge: immutable once assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeState {
    /// Bridge interface name
    pub name: String,
    /// Gateway address assigned to the bridge
    pub address: Ipv4Addr,
    /// Network containing the gateway
    pub subnet: Ipv4Net,
}

impl BridgeState {
    fn from_gateway(name: &str, gateway: Ipv4Net) -> Self {
        Self {
            name: name.to_string(),
            address: gateway.addr(),
            subnet: gateway.trunc(),
        }
    }
}

/// Ensures the shared bridge exists and is ready for attachments
pub struct BridgeManager {
    name: String,
    control: Arc<dyn ControlPlane>,
    kernel: Arc<dyn KernelInterface>,
    routes: Arc<dyn RouteTable>,
    firewall: Arc<dyn Firewall>,
    settle: Settle,
    /// Serializes setup; holds the state once resolved
    resolved: Mutex<Option<Arc<BridgeState>>>,
}

impl BridgeManager {
    pub fn new(
        name: &str,
        control: Arc<dyn ControlPlane>,
        kernel: Arc<dyn KernelInterface>,
        routes: Arc<dyn RouteTable>,
        firewall: Arc<dyn Firewall>,
        settle: Settle,
    ) -> Self {
        Self {
            name: name.to_string(),
            control,
            kernel,
            routes,
            firewall,
            settle,
            resolved: Mutex::new(None),
        }
    }

    /// The resolved bridge, if setup has succeeded
    pub fn state(&self) -> Option<Arc<BridgeState>> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create, address and bring up the bridge, then install firewall rules
    ///
    /// Idempotent. A partial failure leaves whatever was already done in
    /// place; calling again picks up the existing interface and continues.
    /// Setting `cancel` aborts the wait for a new bridge to appear.
    pub fn ensure_bridge(
        &self,
        explicit: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<Arc<BridgeState>> {
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = resolved.as_ref() {
            return Ok(Arc::clone(state));
        }

        let exists = self.kernel.link_exists(&self.name)?;
        let existing = if exists {
            self.kernel.link_ipv4(&self.name)?
        } else {
            None
        };

        let gateway = match existing {
            Some(current) => {
                if let Some(requested) = explicit.filter(|r| r.trim() != current.to_string()) {
                    warn!(
                        bridge = %self.name,
                        current = %current,
                        requested,
                        "bridge already configured, keeping its address"
                    );
                }
                current
            }
            None => select_gateway(self.routes.as_ref(), explicit)?,
        };

        if !exists {
            if !self.control.is_connected() {
                return Err(Error::ControlPlaneUnavailable);
            }
            self.control.create_bridge(&self.name)?;
            self.settle.wait_for_link(self.kernel.as_ref(), &self.name, cancel)?;
        }

        self.kernel
            .set_address(Netns::Host, &self.name, gateway)
            .map_err(|e| Error::AddressAssignmentFailed {
                interface: self.name.clone(),
                message: e.to_string(),
            })?;

        self.kernel
            .set_link_up(Netns::Host, &self.name, true)
            .map_err(|e| Error::at_step(&self.name, Step::HostLinkUp, e))?;

        self.firewall
            .install(&self.name, gateway)
            .map_err(|e| match e {
                Error::FirewallInstallFailed { .. } => e,
                other => Error::FirewallInstallFailed {
                    bridge: self.name.clone(),
                    message: other.to_string(),
                },
            })?;

        let state = Arc::new(BridgeState::from_gateway(&self.name, gateway));
        info!(
            bridge = %state.name,
            address = %state.address,
            subnet = %state.subnet,
            "bridge is ready"
        );

        *resolved = Some(Arc::clone(&state));
        Ok(state)
    }
}
