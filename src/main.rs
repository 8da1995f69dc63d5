//! overlink - Open vSwitch overlay networking for containers
//!
//! Creates a shared OVS bridge, links hosts with VXLAN tunnels and attaches
//! container network namespaces to the bridge.

mod cli;
mod error;
mod exec;
mod manifest;
mod network;
mod orchestrator;
#[cfg(test)]
mod testing;

use cli::{Cli, Commands, PeerAction};
use error::Result;
use network::{ProcRoutes, generate_mac, select_gateway};
use orchestrator::Orchestrator;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let load = || manifest::load(&cli.config);

    // Ctrl-C aborts a pending interface wait
    let cancel = Arc::new(AtomicBool::new(false));
    let registered = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel));
    if let Err(e) = registered {
        warn!(error = %e, "failed to register SIGINT handler");
    }

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
        }
        Commands::Mac { ip } => {
            println!("{}", generate_mac(ip)?);
        }
        Commands::Gateway { cidr } => {
            let config = load()?;
            let explicit = cidr.as_deref().or(config.bridge.cidr.as_deref());
            let gateway = select_gateway(&ProcRoutes::default(), explicit)?;
            println!("{}", gateway);
        }
        Commands::Bridge { cidr, json } => {
            let orch = Orchestrator::host(load()?);
            let bridge = orch.ensure_bridge(cidr.as_deref(), &cancel)?;
            if json {
                println!("{}", serde_json::to_string_pretty(bridge.as_ref())?);
            } else {
                println!("Bridge:  {}", bridge.name);
                println!("Address: {}", bridge.address);
                println!("Subnet:  {}", bridge.subnet);
            }
        }
        Commands::Peer { action } => {
            let orch = Orchestrator::host(load()?);
            orch.ensure_bridge(None, &cancel)?;
            match action {
                PeerAction::Add { ip } => {
                    let tunnel = orch.add_peer(&ip)?;
                    println!("Tunnel {} to {} is up", tunnel.port_name, tunnel.peer);
                }
                PeerAction::Remove { ip } => {
                    orch.remove_peer(&ip)?;
                    println!("Tunnel to {} removed", ip);
                }
            }
        }
        Commands::Attach {
            pid,
            reserved,
            json,
        } => {
            let orch = Orchestrator::host(load()?);
            orch.ensure_bridge(None, &cancel)?;
            for address in reserved {
                orch.reserve(address)?;
            }

            let conn = orch.attach(pid, &cancel)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conn)?);
            } else {
                println!("Port:      {}", conn.port_name);
                println!("Interface: {}", conn.interface);
                println!("Address:   {}{}", conn.address, conn.subnet_suffix);
                println!("MAC:       {}", conn.mac);
                println!("Gateway:   {}", conn.gateway);
            }
        }
        Commands::Detach { port } => {
            let orch = Orchestrator::host(load()?);
            orch.ensure_bridge(None, &cancel)?;
            match orch.detach(&port)? {
                Some(address) => println!("Detached {} (freed {})", port, address),
                None => println!("Deleted port {}", port),
            }
        }
    }

    Ok(())
}
