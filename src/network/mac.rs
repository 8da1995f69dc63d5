//! Deterministic hardware addresses for container ports
//!
//! Each port's MAC is derived from its allocated IPv4 address, so the two
//! are in one-to-one correspondence and never collide with each other.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// Unicast, locally administered
const FIRST_OCTET: u8 = 0x02;

/// Organizational tag shared by every derived address
const TAG_OCTET: u8 = 0x42;

/// A 48-bit Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Derive the port MAC for an IPv4 address: `02:42:` followed by the
    /// four address octets
    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        let [a, b, c, d] = addr.octets();
        Self([FIRST_OCTET, TAG_OCTET, a, b, c, d])
    }

    #[cfg(test)]
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Derive the port MAC for any address, rejecting IPv6
pub fn generate_mac(addr: IpAddr) -> Result<MacAddr> {
    match addr {
        IpAddr::V4(v4) => Ok(MacAddr::from_ipv4(v4)),
        IpAddr::V6(v6) => Err(Error::MalformedInput(format!(
            "cannot derive a hardware address from IPv6 address {}",
            v6
        ))),
    }
}
