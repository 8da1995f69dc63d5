//! VXLAN tunnels to peer hosts
//!
//! One tunnel port per peer, named after the peer address so the port can
//! be found again without any stored state.

use crate::error::{Error, Result};
use crate::network::bridge::BridgeState;
use crate::network::ovs::ControlPlane;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// A tunnel port on the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tunnel {
    pub peer: Ipv4Addr,
    pub port_name: String,
}

/// Adds and removes peer tunnels on the shared bridge
pub struct TunnelManager {
    control: Arc<dyn ControlPlane>,
    port_prefix: String,
    tunnels: Mutex<BTreeMap<Ipv4Addr, Tunnel>>,
}

impl TunnelManager {
    pub fn new(control: Arc<dyn ControlPlane>, port_prefix: &str) -> Self {
        Self {
            control,
            port_prefix: port_prefix.to_string(),
            tunnels: Mutex::new(BTreeMap::new()),
        }
    }

    fn parse_peer(peer: &str) -> Result<Ipv4Addr> {
        peer.trim()
            .parse()
            .map_err(|_| Error::MalformedInput(format!("invalid peer address '{}'", peer)))
    }

    /// Tunnel port name for a peer
    pub fn port_name(&self, peer: Ipv4Addr) -> String {
        format!("{}{}", self.port_prefix, peer)
    }

    /// Connect the bridge to `peer`; a known peer is left untouched
    pub fn add_peer(&self, bridge: &BridgeState, peer: &str) -> Result<Tunnel> {
        let peer = Self::parse_peer(peer)?;
        let mut tunnels = self.tunnels.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = tunnels.get(&peer) {
            debug!(peer = %peer, port = %existing.port_name, "tunnel already present");
            return Ok(existing.clone());
        }

        if !self.control.is_connected() {
            return Err(Error::ControlPlaneUnavailable);
        }

        let tunnel = Tunnel {
            peer,
            port_name: self.port_name(peer),
        };
        self.control
            .create_tunnel_port(&bridge.name, &tunnel.port_name, peer)?;
        info!(bridge = %bridge.name, peer = %peer, port = %tunnel.port_name, "added tunnel");

        tunnels.insert(peer, tunnel.clone());
        Ok(tunnel)
    }

    /// Tear down the tunnel to `peer`, known or not
    pub fn remove_peer(&self, bridge: &BridgeState, peer: &str) -> Result<()> {
        let peer = Self::parse_peer(peer)?;
        let mut tunnels = self.tunnels.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.control.is_connected() {
            return Err(Error::ControlPlaneUnavailable);
        }

        let port = self.port_name(peer);
        self.control.delete_port(&bridge.name, &port)?;
        if tunnels.remove(&peer).is_some() {
            info!(bridge = %bridge.name, peer = %peer, port = %port, "removed tunnel");
        } else {
            debug!(
                bridge = %bridge.name,
                peer = %peer,
                port = %port,
                "removed untracked tunnel port"
            );
        }

        Ok(())
    }

    /// Known tunnels, ordered by peer address
    #[cfg(test)]
    pub fn peers(&self) -> Vec<Tunnel> {
        self.tunnels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeControlPlane, FakeKernel};

    fn bridge() -> BridgeState {
        BridgeState {
            name: "docker0-ovs".into(),
            address: Ipv4Addr::new(10, 1, 42, 1),
            subnet: "10.1.0.0/16".parse().unwrap(),
        }
    }

    fn manager() -> (TunnelManager, FakeControlPlane) {
        let control = FakeControlPlane::connected(&FakeKernel::new());
        (
            TunnelManager::new(Arc::new(control.clone()), "vxlan-"),
            control,
        )
    }

    #[test]
    fn test_add_peer_creates_port() {
        let (tunnels, control) = manager();
        let tunnel = tunnels.add_peer(&bridge(), "192.168.1.20").unwrap();

        assert_eq!(tunnel.port_name, "vxlan-192.168.1.20");
        assert_eq!(
            control.calls(),
            vec!["create_tunnel_port docker0-ovs vxlan-192.168.1.20 192.168.1.20"]
        );
        assert_eq!(tunnels.peers(), vec![tunnel]);
    }

    #[test]
    fn test_add_peer_twice_is_noop() {
        let (tunnels, control) = manager();
        tunnels.add_peer(&bridge(), "192.168.1.20").unwrap();
        tunnels.add_peer(&bridge(), " 192.168.1.20 ").unwrap();

        assert_eq!(control.calls().len(), 1);
        assert_eq!(tunnels.peers().len(), 1);
    }

    #[test]
    fn test_remove_peer() {
        let (tunnels, control) = manager();
        tunnels.add_peer(&bridge(), "192.168.1.20").unwrap();
        tunnels.remove_peer(&bridge(), "192.168.1.20").unwrap();

        assert!(tunnels.peers().is_empty());
        assert!(control.ports().is_empty());
        assert_eq!(
            control.calls()[1],
            "delete_port docker0-ovs vxlan-192.168.1.20"
        );
    }

    #[test]
    fn test_remove_unknown_peer() {
        let (tunnels, control) = manager();
        tunnels.remove_peer(&bridge(), "10.0.0.9").unwrap();
        assert_eq!(control.calls(), vec!["delete_port docker0-ovs vxlan-10.0.0.9"]);
    }

    #[test]
    fn test_malformed_peer() {
        let (tunnels, control) = manager();
        for bad in ["", "10.0.0", "fd00::1", "host.example"] {
            let err = tunnels.add_peer(&bridge(), bad).unwrap_err();
            assert!(matches!(err, Error::MalformedInput(_)), "{} gave {}", bad, err);
        }
        assert!(control.calls().is_empty());
    }

    #[test]
    fn test_control_plane_unavailable() {
        let tunnels = TunnelManager::new(Arc::new(FakeControlPlane::disconnected()), "vxlan-");
        let err = tunnels.add_peer(&bridge(), "192.168.1.20").unwrap_err();
        assert!(matches!(err, Error::ControlPlaneUnavailable));
        let err = tunnels.remove_peer(&bridge(), "192.168.1.20").unwrap_err();
        assert!(matches!(err, Error::ControlPlaneUnavailable));
        assert!(tunnels.peers().is_empty());
    }

    #[test]
    fn test_peers_sorted_by_address() {
        let (tunnels, _) = manager();
        tunnels.add_peer(&bridge(), "192.168.1.30").unwrap();
        tunnels.add_peer(&bridge(), "10.0.0.9").unwrap();

        let peers: Vec<String> = tunnels.peers().iter().map(|t| t.peer.to_string()).collect();
        assert_eq!(peers, vec!["10.0.0.9", "192.168.1.30"]);
    }
}
