//! Gateway range selection for the shared bridge
//!
//! Provides:
//! - The curated list of candidate gateway ranges
//! - Route overlap checking against the host routing table
//! - Selection of the first range that does not collide with a route

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Candidate gateway ranges, in order of preference.
///
/// The gateway is deliberately not the first address of the range: the /16
/// ranges reuse the gateway addresses of the older /24 ranges so existing
/// setups keep their addressing. 172.16.0.0/16 is skipped (EC2 DNS lives at
/// 172.16.0.23) and no candidate spans a whole /8.
pub const CANDIDATES: &[&str] = &[
    "10.1.42.1/16",
    "10.42.42.1/16",
    "172.16.42.1/24",
    "172.16.43.1/24",
    "172.16.44.1/24",
    "10.0.42.1/24",
    "10.0.43.1/24",
    "172.17.42.1/16",
    "10.0.42.1/16",
    "192.168.42.1/24",
    "192.168.43.1/24",
    "192.168.44.1/24",
];

/// Answers whether a network collides with a route on the host
pub trait RouteTable: Send + Sync {
    fn overlaps(&self, network: &Ipv4Net) -> Result<bool>;
}

/// Whether either network contains the other
pub fn networks_overlap(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Pick the gateway CIDR for the bridge
///
/// An explicit CIDR is returned unchanged once it parses; the operator owns
/// the choice, so no overlap check is made. Otherwise the first candidate
/// that overlaps no host route wins.
pub fn select_gateway(routes: &dyn RouteTable, explicit: Option<&str>) -> Result<Ipv4Net> {
    if let Some(cidr) = explicit {
        return cidr.trim().parse::<Ipv4Net>().map_err(|e| {
            Error::NoAvailableAddressRange(format!("invalid gateway CIDR '{}': {}", cidr, e))
        });
    }

    for candidate in CANDIDATES {
        let gateway: Ipv4Net = candidate.parse().map_err(|e| {
            Error::NoAvailableAddressRange(format!("invalid candidate '{}': {}", candidate, e))
        })?;

        if routes.overlaps(&gateway.trunc())? {
            debug!(candidate, "gateway candidate overlaps an existing route");
            continue;
        }

        return Ok(gateway);
    }

    Err(Error::NoAvailableAddressRange(format!(
        "all {} candidate ranges overlap existing routes",
        CANDIDATES.len()
    )))
}

/// Route table read from `/proc/net/route`
#[derive(Debug, Clone)]
pub struct ProcRoutes {
    path: PathBuf,
}

impl Default for ProcRoutes {
    fn default() -> Self {
        Self::new("/proc/net/route")
    }
}

impl ProcRoutes {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Destination networks of all non-default routes
    pub fn routes(&self) -> Result<Vec<Ipv4Net>> {
        let content = fs::read_to_string(&self.path).map_err(|e| Error::CommandFailed {
            command: format!("read {}", self.path.display()),
            message: e.to_string(),
        })?;

        parse_proc_routes(&content)
    }
}

impl RouteTable for ProcRoutes {
    fn overlaps(&self, network: &Ipv4Net) -> Result<bool> {
        Ok(self
            .routes()?
            .iter()
            .any(|route| networks_overlap(network, route)))
    }
}

/// Parse the kernel's textual route table
///
/// Addresses are printed as hex of the in-memory (network order) bytes read
/// as a little-endian word. The default route is skipped: it overlaps
/// everything and never blocks a private range.
fn parse_proc_routes(content: &str) -> Result<Vec<Ipv4Net>> {
    let mut routes = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let destination = parse_hex_addr(fields[1])?;
        let mask = parse_hex_addr(fields[7])?;
        let prefix = u32::from(mask).count_ones() as u8;

        if prefix == 0 {
            continue;
        }

        let net = Ipv4Net::new(destination, prefix)
            .map_err(|e| Error::MalformedInput(format!("bad route mask '{}': {}", fields[7], e)))?;
        routes.push(net);
    }

    Ok(routes)
}

fn parse_hex_addr(field: &str) -> Result<Ipv4Addr> {
    let raw = u32::from_str_radix(field, 16)
        .map_err(|e| Error::MalformedInput(format!("bad route field '{}': {}", field, e)))?;
    Ok(Ipv4Addr::from(raw.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRoutes;

    #[test]
    fn test_explicit_cidr_returned_unchanged() {
        let routes = FakeRoutes::overlapping_all();
        let gw = select_gateway(&routes, Some("10.1.42.1/16")).unwrap();
        assert_eq!(gw.to_string(), "10.1.42.1/16");
        assert_eq!(gw.addr(), Ipv4Addr::new(10, 1, 42, 1));
        assert_eq!(gw.trunc().to_string(), "10.1.0.0/16");
        // Explicit choice never consults the route table
        assert_eq!(routes.queries(), 0);
    }

    #[test]
    fn test_malformed_explicit_cidr() {
        let routes = FakeRoutes::empty();
        for bad in ["10.1.42.1", "10.1.42.1/33", "not-a-cidr", "fd00::1/64"] {
            let err = select_gateway(&routes, Some(bad)).unwrap_err();
            assert!(
                matches!(err, Error::NoAvailableAddressRange(_)),
                "{} gave {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_first_candidate_when_no_routes() {
        let routes = FakeRoutes::empty();
        let gw = select_gateway(&routes, None).unwrap();
        assert_eq!(gw.to_string(), "10.1.42.1/16");
    }

    #[test]
    fn test_seventh_candidate_after_six_overlaps() {
        let routes = FakeRoutes::with_routes(&[
            "10.1.0.0/16",
            "10.42.0.0/16",
            "172.16.42.0/24",
            "172.16.43.0/24",
            "172.16.44.0/24",
            "10.0.42.0/24",
        ]);
        let gw = select_gateway(&routes, None).unwrap();
        assert_eq!(gw.to_string(), "10.0.43.1/24");
    }

    #[test]
    fn test_exhaustion() {
        let routes = FakeRoutes::overlapping_all();
        let err = select_gateway(&routes, None).unwrap_err();
        assert!(matches!(err, Error::NoAvailableAddressRange(_)));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let wide: Ipv4Net = "10.0.0.0/8".parse().unwrap();
        let narrow: Ipv4Net = "10.1.0.0/16".parse().unwrap();
        let other: Ipv4Net = "192.168.42.0/24".parse().unwrap();
        assert!(networks_overlap(&wide, &narrow));
        assert!(networks_overlap(&narrow, &wide));
        assert!(!networks_overlap(&narrow, &other));
    }

    #[test]
    fn test_parse_proc_routes() {
        let content = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
docker0\t000011AC\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0
";
        let routes = parse_proc_routes(content).unwrap();
        assert_eq!(
            routes,
            vec![
                "192.168.1.0/24".parse::<Ipv4Net>().unwrap(),
                "172.17.0.0/16".parse::<Ipv4Net>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_proc_routes_skip_blocked_candidate() {
        let dir = std::env::temp_dir().join(format!("overlink-routes-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("route");
        // 10.1.0.0/16 is routed, so the first candidate is taken
        std::fs::write(
            &path,
            "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\tMTU\tWindow\tIRTT\n\
             eth1\t0000010A\t00000000\t0001\t0\t0\t0\t0000FFFF\t0\t0\t0\n",
        )
        .unwrap();

        let routes = ProcRoutes::new(&path);
        let gw = select_gateway(&routes, None).unwrap();
        assert_eq!(gw.to_string(), "10.42.42.1/16");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
