//! Open vSwitch control plane
//!
//! Bridges, internal ports and VXLAN tunnel ports are created through
//! `ovs-vsctl` against a single OVSDB endpoint.

use crate::error::{Error, Result};
use crate::exec::{CommandRunner, run_checked};
use crate::manifest::OvsConfig;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Switch control plane operations
///
/// Every operation needs a live session; without one it fails with
/// [`Error::ControlPlaneUnavailable`]. Bridges and tunnels tolerate existing
/// objects and deletion tolerates missing ones. Internal ports are always
/// new: a name already in use fails with [`Error::PortExists`].
pub trait ControlPlane: Send + Sync {
    fn is_connected(&self) -> bool;

    fn create_bridge(&self, name: &str) -> Result<()>;

    fn create_internal_port(&self, bridge: &str, port: &str) -> Result<()>;

    fn create_tunnel_port(&self, bridge: &str, port: &str, remote: Ipv4Addr) -> Result<()>;

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()>;
}

/// Control plane driven by `ovs-vsctl`
pub struct OvsVsctl {
    db: String,
    timeout_secs: u64,
    runner: Box<dyn CommandRunner>,
    connected: bool,
}

impl OvsVsctl {
    /// Open a session against the configured OVSDB endpoint
    ///
    /// An unreachable database is not an error here: the session is marked
    /// disconnected and every later operation reports it.
    pub fn connect(config: &OvsConfig, runner: Box<dyn CommandRunner>) -> Self {
        let mut ovs = Self {
            db: config.db.clone(),
            timeout_secs: config.timeout_secs,
            runner,
            connected: false,
        };

        match ovs.vsctl(&["show"]) {
            Ok(_) => {
                debug!(db = %ovs.db, "connected to ovsdb");
                ovs.connected = true;
            }
            Err(e) => warn!(db = %ovs.db, error = %e, "ovsdb is not reachable"),
        }

        ovs
    }

    fn vsctl(&self, command: &[&str]) -> Result<()> {
        let mut args = vec![
            format!("--db={}", self.db),
            format!("--timeout={}", self.timeout_secs),
        ];
        args.extend(command.iter().map(|s| s.to_string()));

        run_checked(self.runner.as_ref(), "ovs-vsctl", &args)?;
        Ok(())
    }

    fn session(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::ControlPlaneUnavailable)
        }
    }
}

impl ControlPlane for OvsVsctl {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        self.session()?;
        self.vsctl(&["--may-exist", "add-br", name])?;
        info!(bridge = name, "created ovs bridge");
        Ok(())
    }

    fn create_internal_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.session()?;
        // The port may belong to another container, so never adopt it
        self.vsctl(&[
            "add-port",
            bridge,
            port,
            "--",
            "set",
            "Interface",
            port,
            "type=internal",
        ])
        .map_err(|e| match e {
            Error::CommandFailed { ref message, .. } if message.contains("already exists") => {
                Error::PortExists(port.to_string())
            }
            other => other,
        })
    }

    fn create_tunnel_port(&self, bridge: &str, port: &str, remote: Ipv4Addr) -> Result<()> {
        self.session()?;
        let remote_ip = format!("options:remote_ip={}", remote);
        self.vsctl(&[
            "--may-exist",
            "add-port",
            bridge,
            port,
            "--",
            "set",
            "Interface",
            port,
            "type=vxlan",
            &remote_ip,
        ])
    }

    fn delete_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.session()?;
        self.vsctl(&["--if-exists", "del-port", bridge, port])
    }
}
