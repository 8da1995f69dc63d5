//! IP address management for container connections
//!
//! Provides:
//! - IP pool allocation from the bridge subnet
//! - Tracking of allocated addresses
//! - Reservation of the gateway address

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

/// Hands out free addresses within a subnet
///
/// Implementations must never return an address outside `subnet`, never
/// return the gateway, and never hand out a live address twice.
pub trait AddressAllocator: Send {
    fn allocate(&mut self, subnet: Ipv4Net, gateway: Ipv4Addr) -> Result<Ipv4Addr>;

    fn release(&mut self, subnet: Ipv4Net, addr: Ipv4Addr);

    /// Mark an address as taken, e.g. one already configured in a container
    /// this process did not create
    fn reserve(&mut self, subnet: Ipv4Net, gateway: Ipv4Addr, addr: Ipv4Addr) -> Result<()>;
}

/// IP address pool for one subnet
#[derive(Debug, Clone)]
pub struct IpPool {
    /// Network subnet
    subnet: Ipv4Net,
    /// Gateway address (never handed out)
    gateway: Ipv4Addr,
    /// Set of allocated addresses
    allocated: BTreeSet<Ipv4Addr>,
}

impl IpPool {
    /// Create a new IP pool with a specific gateway
    pub fn with_gateway(subnet: Ipv4Net, gateway: Ipv4Addr) -> Result<Self> {
        let subnet = subnet.trunc();
        if !subnet.contains(&gateway) {
            return Err(Error::AddressAllocationFailed(format!(
                "gateway {} is not in subnet {}",
                gateway, subnet
            )));
        }

        let mut allocated = BTreeSet::new();
        allocated.insert(gateway);

        Ok(Self {
            subnet,
            gateway,
            allocated,
        })
    }

    /// Allocate the next available IP address
    ///
    /// Network and broadcast addresses are never returned.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        for addr in self.subnet.hosts() {
            if self.allocated.insert(addr) {
                return Ok(addr);
            }
        }

        Err(Error::AddressAllocationFailed(format!(
            "no available addresses in {}",
            self.subnet
        )))
    }

    /// Allocate a specific IP address
    pub fn allocate_specific(&mut self, addr: Ipv4Addr) -> Result<()> {
        if !self.subnet.contains(&addr) {
            return Err(Error::AddressAllocationFailed(format!(
                "address {} is not in subnet {}",
                addr, self.subnet
            )));
        }

        if !self.allocated.insert(addr) {
            return Err(Error::AddressAllocationFailed(format!(
                "address {} is already allocated",
                addr
            )));
        }

        Ok(())
    }

    /// Release an allocated IP address
    pub fn release(&mut self, addr: &Ipv4Addr) {
        // Don't release the gateway
        if *addr != self.gateway {
            self.allocated.remove(addr);
        }
    }

    // Test-only accessors for verifying internal state
    #[cfg(test)]
    pub fn is_available(&self, addr: &Ipv4Addr) -> bool {
        self.subnet.contains(addr) && !self.allocated.contains(addr)
    }

    #[cfg(test)]
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }
}

/// In-memory allocator keeping one pool per subnet
#[derive(Debug, Default)]
pub struct IpAllocator {
    pools: HashMap<Ipv4Net, IpPool>,
}

impl IpAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&mut self, subnet: Ipv4Net, gateway: Ipv4Addr) -> Result<&mut IpPool> {
        let key = subnet.trunc();
        if !self.pools.contains_key(&key) {
            self.pools.insert(key, IpPool::with_gateway(key, gateway)?);
        }

        self.pools
            .get_mut(&key)
            .ok_or_else(|| Error::AddressAllocationFailed(format!("no pool for {}", key)))
    }
}

impl AddressAllocator for IpAllocator {
    fn allocate(&mut self, subnet: Ipv4Net, gateway: Ipv4Addr) -> Result<Ipv4Addr> {
        self.pool(subnet, gateway)?.allocate()
    }

    fn release(&mut self, subnet: Ipv4Net, addr: Ipv4Addr) {
        if let Some(pool) = self.pools.get_mut(&subnet.trunc()) {
            pool.release(&addr);
        }
    }

    fn reserve(&mut self, subnet: Ipv4Net, gateway: Ipv4Addr, addr: Ipv4Addr) -> Result<()> {
        self.pool(subnet, gateway)?.allocate_specific(addr)
    }
}
