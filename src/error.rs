//! Unified error types for overlink

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Kernel-level step of an attachment sequence
///
/// Carried by [`Error::InterfaceConfigurationFailed`] so callers can tell
/// exactly how far a provisioning sequence got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetMtu,
    /// Bringing the port up on the host, before the move
    HostLinkUp,
    MoveToNamespace,
    LinkDown,
    Rename,
    SetAddress,
    SetMac,
    /// Bringing the interface up inside the namespace
    LinkUp,
    DefaultRoute,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::SetMtu => write!(f, "set mtu"),
            Step::HostLinkUp => write!(f, "host link up"),
            Step::MoveToNamespace => write!(f, "move to namespace"),
            Step::LinkDown => write!(f, "link down"),
            Step::Rename => write!(f, "rename"),
            Step::SetAddress => write!(f, "set address"),
            Step::SetMac => write!(f, "set mac address"),
            Step::LinkUp => write!(f, "link up in namespace"),
            Step::DefaultRoute => write!(f, "default route"),
        }
    }
}

/// Main error type for overlink operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    // Control plane errors
    #[error("Switch control plane is not connected")]
    ControlPlaneUnavailable,

    #[error("Port '{0}' already exists on the switch")]
    PortExists(String),

    // Addressing errors
    #[error("No available address range: {0}")]
    NoAvailableAddressRange(String),

    #[error("Address allocation failed: {0}")]
    AddressAllocationFailed(String),

    #[error("Failed to assign address to '{interface}': {message}")]
    AddressAssignmentFailed { interface: String, message: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    // Interface errors
    #[error("Interface configuration failed for '{port}' at step '{step}': {message}")]
    InterfaceConfigurationFailed {
        port: String,
        step: Step,
        message: String,
    },

    #[error("Interface '{interface}' did not appear after {waited_ms}ms")]
    SettleTimeout { interface: String, waited_ms: u64 },

    #[error("Operation cancelled while waiting for '{0}'")]
    Cancelled(String),

    #[error("Bridge has not been set up yet")]
    BridgeNotReady,

    // Firewall errors
    #[error("Failed to install firewall rules for '{bridge}': {message}")]
    FirewallInstallFailed { bridge: String, message: String },

    // System errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
}

impl Error {
    /// Wrap a collaborator failure as a failed kernel step on `port`
    pub fn at_step(port: &str, step: Step, source: Error) -> Self {
        match source {
            // Already classified; keep the more specific error
            Error::ControlPlaneUnavailable
            | Error::PortExists(_)
            | Error::Cancelled(_)
            | Error::SettleTimeout { .. }
            | Error::InterfaceConfigurationFailed { .. } => source,
            other => Error::InterfaceConfigurationFailed {
                port: port.to_string(),
                step,
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for overlink operations
pub type Result<T> = std::result::Result<T, Error>;
