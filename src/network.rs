//! Overlay network management
//!
//! Provides:
//! - OVS bridge lifecycle and gateway selection
//! - VXLAN tunnels to peer hosts
//! - Container port provisioning inside network namespaces
//! - IP address allocation and MAC derivation
//! - Firewall rules for the bridge subnet

pub mod bridge;
pub mod connection;
pub mod firewall;
pub mod gateway;
pub mod ip;
pub mod kernel;
pub mod mac;
pub mod ovs;
pub mod settle;
pub mod tunnel;

pub use bridge::{BridgeManager, BridgeState};
pub use connection::{Connection, ConnectionProvisioner};
pub use firewall::{Firewall, Iptables};
pub use gateway::{ProcRoutes, RouteTable, select_gateway};
pub use ip::{AddressAllocator, IpAllocator};
pub use kernel::{IpRoute2, KernelInterface};
pub use mac::generate_mac;
pub use ovs::{ControlPlane, OvsVsctl};
pub use settle::Settle;
pub use tunnel::{Tunnel, TunnelManager};
