//! Command-line interface for overlink
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// overlink - Open vSwitch overlay networking for containers
#[derive(Parser)]
#[command(name = "overlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "overlink.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create and configure the shared bridge
    Bridge {
        /// Gateway CIDR for the bridge (e.g., 10.1.42.1/16)
        #[arg(long)]
        cidr: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the gateway CIDR bridge setup would use
    Gateway {
        /// Validate this CIDR instead of searching the candidates
        #[arg(long)]
        cidr: Option<String>,
    },

    /// Manage VXLAN tunnels to peer hosts
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },

    /// Attach a container's network namespace to the bridge
    Attach {
        /// PID of a process inside the container
        pid: i32,

        /// Address already in use on the bridge subnet (repeatable)
        ///
        /// Each run starts with an empty address pool, so pass the address
        /// of every container already attached or it may be handed out again.
        #[arg(long = "reserve", value_name = "IP")]
        reserved: Vec<Ipv4Addr>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a container port from the bridge
    Detach {
        /// Port name reported by attach
        port: String,
    },

    /// Print the hardware address derived from an IP address
    Mac {
        /// IPv4 address
        ip: IpAddr,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Tunnel actions
#[derive(Subcommand)]
pub enum PeerAction {
    /// Add a tunnel to a peer host
    Add {
        /// Peer IPv4 address
        ip: String,
    },

    /// Remove the tunnel to a peer host
    Remove {
        /// Peer IPv4 address
        ip: String,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "overlink", &mut std::io::stdout());
    }
}
