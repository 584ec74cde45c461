//! IPv4 subnet model and address predicates

use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

/// An IPv4 subnet a scan can sweep, anchored at one of our own addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subnet {
    /// Our address on this subnet
    pub local_address: Ipv4Addr,
    /// Network address (local address masked by the prefix)
    pub network_address: Ipv4Addr,
    /// Prefix length, 1..=30
    pub prefix_length: u8,
    /// Default IPv4 gateways reachable via this interface, in routing order
    pub gateways: Vec<Ipv4Addr>,
}

impl Subnet {
    /// Build a subnet from a local address and prefix length.
    ///
    /// Returns `None` for prefixes outside 1..=30.
    pub fn new(local_address: Ipv4Addr, prefix_length: u8, gateways: Vec<Ipv4Addr>) -> Option<Self> {
        if !(1..=30).contains(&prefix_length) {
            return None;
        }
        let mask = prefix_mask(prefix_length);
        let network_address = Ipv4Addr::from(u32::from(local_address) & mask);
        Some(Self {
            local_address,
            network_address,
            prefix_length,
            gateways,
        })
    }

    pub fn prefix_mask(&self) -> u32 {
        prefix_mask(self.prefix_length)
    }

    /// Directed broadcast address (all host bits set)
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network_address) | !self.prefix_mask())
    }

    /// First usable host address
    pub fn first_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network_address) + 1)
    }

    /// Last usable host address
    pub fn last_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.broadcast()) - 1)
    }

    /// Number of usable host addresses (2^host_bits - 2)
    pub fn host_count(&self) -> u32 {
        (1u32 << (32 - self.prefix_length)) - 2
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.prefix_mask() == u32::from(self.network_address)
    }

    /// Key for `(network, prefix)` deduplication and ordering
    pub fn dedup_key(&self) -> (u32, u8) {
        (u32::from(self.network_address), self.prefix_length)
    }
}

/// Diagnostic form: `"<network>/<prefix> (local <ip>[, gateway <g1>, <g2>])"`
impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (local {}",
            self.network_address, self.prefix_length, self.local_address
        )?;
        if let Some((first, rest)) = self.gateways.split_first() {
            write!(f, ", gateway {}", first)?;
            for gw in rest {
                write!(f, ", {}", gw)?;
            }
        }
        write!(f, ")")
    }
}

/// Network mask for a prefix length in 1..=32
pub fn prefix_mask(prefix_length: u8) -> u32 {
    debug_assert!((1..=32).contains(&prefix_length));
    !((1u64 << (32 - prefix_length)) - 1) as u32
}

/// APIPA range 169.254.0.0/16
pub fn is_apipa(ip: Ipv4Addr) -> bool {
    ip.is_link_local()
}

/// A host address worth probing: not loopback, APIPA, unspecified,
/// multicast, or the limited broadcast.
pub fn is_routable_host(ip: Ipv4Addr) -> bool {
    !ip.is_loopback()
        && !is_apipa(ip)
        && !ip.is_unspecified()
        && !ip.is_multicast()
        && !ip.is_broadcast()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_math() {
        let s = Subnet::new("192.168.1.57".parse().unwrap(), 24, vec![]).unwrap();
        assert_eq!(s.network_address, "192.168.1.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.broadcast(), "192.168.1.255".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.first_host(), "192.168.1.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.last_host(), "192.168.1.254".parse::<Ipv4Addr>().unwrap());
        assert_eq!(s.host_count(), 254);
        assert!(s.contains("192.168.1.200".parse().unwrap()));
        assert!(!s.contains("192.168.2.1".parse().unwrap()));
    }

    #[test]
    fn prefix_range_is_enforced() {
        let ip: Ipv4Addr = "10.0.0.1".parse().unwrap();
        assert!(Subnet::new(ip, 0, vec![]).is_none());
        assert!(Subnet::new(ip, 31, vec![]).is_none());
        assert!(Subnet::new(ip, 32, vec![]).is_none());
        assert!(Subnet::new(ip, 1, vec![]).is_some());
        assert!(Subnet::new(ip, 30, vec![]).is_some());
    }

    #[test]
    fn display_formats() {
        let gw: Ipv4Addr = "192.168.0.1".parse().unwrap();
        let gw2: Ipv4Addr = "192.168.0.2".parse().unwrap();
        let local: Ipv4Addr = "192.168.0.50".parse().unwrap();

        let bare = Subnet::new(local, 16, vec![]).unwrap();
        assert_eq!(bare.to_string(), "192.168.0.0/16 (local 192.168.0.50)");

        let with_gw = Subnet::new(local, 16, vec![gw, gw2]).unwrap();
        assert_eq!(
            with_gw.to_string(),
            "192.168.0.0/16 (local 192.168.0.50, gateway 192.168.0.1, 192.168.0.2)"
        );
    }

    #[test]
    fn ipv4_u32_round_trip() {
        for ip in ["0.0.0.0", "127.0.0.1", "169.254.3.9", "192.168.1.1", "255.255.255.255"] {
            let addr: Ipv4Addr = ip.parse().unwrap();
            assert_eq!(Ipv4Addr::from(u32::from(addr)), addr);
        }
        assert!(u32::from("10.0.0.2".parse::<Ipv4Addr>().unwrap())
            < u32::from("10.0.1.1".parse::<Ipv4Addr>().unwrap()));
    }

    #[test]
    fn routability_predicates() {
        assert!(is_apipa("169.254.1.1".parse().unwrap()));
        assert!(!is_apipa("169.253.1.1".parse().unwrap()));
        assert!(is_routable_host("192.168.1.5".parse().unwrap()));
        assert!(!is_routable_host("127.0.0.1".parse().unwrap()));
        assert!(!is_routable_host("169.254.0.7".parse().unwrap()));
        assert!(!is_routable_host("0.0.0.0".parse().unwrap()));
        assert!(!is_routable_host("224.0.0.1".parse().unwrap()));
        assert!(!is_routable_host("255.255.255.255".parse().unwrap()));
    }
}
