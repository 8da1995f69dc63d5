//! Configuration file parsing for overlink
//!
//! Parses `overlink.toml` configuration files using serde

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
pub const MAX_IFNAME_LEN: usize = 15;

/// Load configuration from a file
///
/// A missing file is not an error: every setting has a default, so the
/// orchestrator can run on a bare host.
pub fn load(path: &Path) -> Result<OverlinkConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let config: OverlinkConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlinkConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub ovs: OvsConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Interface settle polling
    #[serde(default)]
    pub settle: SettleConfig,
}

impl OverlinkConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        check_ifname("bridge.name", &self.bridge.name)?;

        if !(68..=65535).contains(&self.bridge.mtu) {
            return Err(Error::ConfigValidation(format!(
                "bridge.mtu must be between 68 and 65535, got {}",
                self.bridge.mtu
            )));
        }

        if let Some(cidr) = &self.bridge.cidr {
            cidr.parse::<Ipv4Net>().map_err(|e| {
                Error::ConfigValidation(format!("bridge.cidr '{}' is invalid: {}", cidr, e))
            })?;
        }

        if self.connection.port_prefix.is_empty() {
            return Err(Error::ConfigValidation(
                "connection.port_prefix must not be empty".into(),
            ));
        }

        // Random suffix is 7 characters
        if self.connection.port_prefix.len() + 7 > MAX_IFNAME_LEN {
            return Err(Error::ConfigValidation(format!(
                "connection.port_prefix '{}' leaves no room for the random suffix",
                self.connection.port_prefix
            )));
        }

        if let Some(name) = &self.connection.interface {
            check_ifname("connection.interface", name)?;
        }

        if self.settle.multiplier < 1.0 {
            return Err(Error::ConfigValidation(format!(
                "settle.multiplier must be at least 1.0, got {}",
                self.settle.multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.settle.jitter_factor) {
            return Err(Error::ConfigValidation(format!(
                "settle.jitter_factor must be within 0.0-1.0, got {}",
                self.settle.jitter_factor
            )));
        }

        Ok(())
    }
}

fn check_ifname(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ConfigValidation(format!("{} must not be empty", field)));
    }

    if name.len() > MAX_IFNAME_LEN {
        return Err(Error::ConfigValidation(format!(
            "{} '{}' is longer than {} characters",
            field, name, MAX_IFNAME_LEN
        )));
    }

    if name.contains(['/', ' ']) {
        return Err(Error::ConfigValidation(format!(
            "{} '{}' contains invalid characters",
            field, name
        )));
    }

    Ok(())
}

fn default_bridge_name() -> String {
    "docker0-ovs".into()
}

fn default_mtu() -> u32 {
    1514
}

/// Shared bridge settings
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Bridge interface name
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Explicit gateway CIDR (e.g., "10.1.42.1/16")
    /// If not set, a free range is picked from the built-in candidates
    pub cidr: Option<String>,

    /// MTU applied to every container port
    #[serde(default = "default_mtu")]
    pub mtu: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            cidr: None,
            mtu: default_mtu(),
        }
    }
}

fn default_ovs_db() -> String {
    "unix:/var/run/openvswitch/db.sock".into()
}

fn default_ovs_timeout() -> u64 {
    5
}

/// Open vSwitch connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct OvsConfig {
    /// OVSDB endpoint passed to `ovs-vsctl --db`
    #[serde(default = "default_ovs_db")]
    pub db: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_ovs_timeout")]
    pub timeout_secs: u64,
}

impl Default for OvsConfig {
    fn default() -> Self {
        Self {
            db: default_ovs_db(),
            timeout_secs: default_ovs_timeout(),
        }
    }
}

fn default_port_prefix() -> String {
    "ovs".into()
}

/// Per-container connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Prefix for randomly generated port names
    #[serde(default = "default_port_prefix")]
    pub port_prefix: String,

    /// Name given to the interface inside the container namespace.
    /// Keeps the port name when unset.
    pub interface: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_prefix: default_port_prefix(),
            interface: None,
        }
    }
}

fn default_tunnel_prefix() -> String {
    "vxlan-".into()
}

/// Overlay tunnel settings
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Prefix joined with the peer address to name tunnel ports
    #[serde(default = "default_tunnel_prefix")]
    pub port_prefix: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_prefix: default_tunnel_prefix(),
        }
    }
}

// Settle defaults
fn default_settle_timeout_ms() -> u64 {
    5000
}

fn default_base_delay_ms() -> u64 {
    20
}

fn default_max_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    20
}

fn default_jitter_factor() -> f64 {
    0.1
}

/// Backoff used while waiting for a new interface to show up
#[derive(Debug, Clone, Deserialize)]
pub struct SettleConfig {
    /// Give up after this many milliseconds
    #[serde(default = "default_settle_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay before the second check
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay between checks
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of checks
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_settle_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
