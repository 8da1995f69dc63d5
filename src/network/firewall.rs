//! Firewall rules for the shared bridge
//!
//! Installs NAT and forwarding rules with iptables so containers can reach
//! the outside world through the bridge gateway.

use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use ipnet::Ipv4Net;
use tracing::{debug, info};

/// Installs the bridge's NAT/forwarding rules
pub trait Firewall: Send + Sync {
    fn install(&self, bridge: &str, subnet: Ipv4Net) -> Result<()>;
}

/// A single iptables rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    /// Table (None = filter)
    pub table: Option<&'static str>,
    /// Chain the rule lives in
    pub chain: &'static str,
    /// Match and target arguments
    pub spec: Vec<String>,
}

impl FirewallRule {
    fn new(table: Option<&'static str>, chain: &'static str, spec: &[&str]) -> Self {
        Self {
            table,
            chain,
            spec: spec.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// iptables arguments for `action` (`-C` to check, `-A` to append)
    pub fn to_args(&self, action: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(self.spec.len() + 4);
        if let Some(table) = self.table {
            args.push("-t".to_string());
            args.push(table.to_string());
        }
        args.push(action.to_string());
        args.push(self.chain.to_string());
        args.extend(self.spec.iter().cloned());
        args
    }
}

/// Rules for a bridge: masquerade traffic leaving the subnet, accept
/// bridge-originated forwarding, accept established/related return traffic
pub fn bridge_rules(bridge: &str, subnet: Ipv4Net) -> Vec<FirewallRule> {
    let source = subnet.trunc().to_string();
    vec![
        FirewallRule::new(
            Some("nat"),
            "POSTROUTING",
            &["-s", &source, "!", "-o", bridge, "-j", "MASQUERADE"],
        ),
        FirewallRule::new(
            None,
            "FORWARD",
            &["-i", bridge, "!", "-o", bridge, "-j", "ACCEPT"],
        ),
        FirewallRule::new(
            None,
            "FORWARD",
            &[
                "-o",
                bridge,
                "-m",
                "conntrack",
                "--ctstate",
                "RELATED,ESTABLISHED",
                "-j",
                "ACCEPT",
            ],
        ),
    ]
}

/// Firewall backed by the `iptables` binary
pub struct Iptables {
    runner: Box<dyn CommandRunner>,
}

impl Iptables {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Append `rule` unless an identical rule is already present
    fn ensure_rule(&self, bridge: &str, rule: &FirewallRule) -> Result<()> {
        let check = self.runner.run("iptables", &rule.to_args("-C"))?;
        if check.success {
            debug!(bridge, chain = rule.chain, "firewall rule already present");
            return Ok(());
        }

        let output = self.runner.run("iptables", &rule.to_args("-A"))?;
        if !output.success {
            return Err(Error::FirewallInstallFailed {
                bridge: bridge.to_string(),
                message: format!(
                    "iptables {}: {}",
                    rule.to_args("-A").join(" "),
                    output.stderr.trim()
                ),
            });
        }

        Ok(())
    }
}

impl Firewall for Iptables {
    fn install(&self, bridge: &str, subnet: Ipv4Net) -> Result<()> {
        info!(bridge, subnet = %subnet.trunc(), "setting up iptables");

        for rule in bridge_rules(bridge, subnet) {
            self.ensure_rule(bridge, &rule).map_err(|e| match e {
                Error::FirewallInstallFailed { .. } => e,
                other => Error::FirewallInstallFailed {
                    bridge: bridge.to_string(),
                    message: other.to_string(),
                },
            })?;
        }

        Ok(())
    }
}
