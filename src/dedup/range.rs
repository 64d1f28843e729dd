//! Numeric address-range abstraction
//!
//! Containment and overlap are decided by interval comparison on address
//! bounds, never by string prefix comparison. IPv4 and IPv6 ranges are never
//! comparable to each other.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::models::{Ioc, IocType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    V4,
    V6,
}

/// Closed interval of addresses within one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    family: Family,
    start: u128,
    end: u128,
}

impl AddrRange {
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => {
                let addr = u32::from(v4) as u128;
                Self {
                    family: Family::V4,
                    start: addr,
                    end: addr,
                }
            }
            IpAddr::V6(v6) => {
                let addr = u128::from(v6);
                Self {
                    family: Family::V6,
                    start: addr,
                    end: addr,
                }
            }
        }
    }

    pub fn from_network(net: IpNetwork) -> Self {
        match net {
            IpNetwork::V4(v4) => {
                let start = u32::from(v4.network()) as u128;
                let host_bits = 32 - v4.prefix();
                let span = if host_bits == 0 {
                    0
                } else {
                    (1u128 << host_bits) - 1
                };
                Self {
                    family: Family::V4,
                    start,
                    end: start + span,
                }
            }
            IpNetwork::V6(v6) => {
                let start = u128::from(v6.network());
                let span = if v6.prefix() == 0 {
                    u128::MAX
                } else {
                    (1u128 << (128 - v6.prefix())) - 1
                };
                Self {
                    family: Family::V6,
                    start,
                    end: start.saturating_add(span),
                }
            }
        }
    }

    /// Range for a canonical `ip` or `cidr` indicator value; `None` for
    /// `url` indicators and for values that do not parse (the caller treats
    /// the latter as a contract violation).
    pub fn of_ioc(ioc: &Ioc) -> Option<Self> {
        match ioc.ioc_type {
            IocType::Ip => ioc.value.parse::<IpAddr>().ok().map(Self::from_ip),
            IocType::Cidr => {
                let (addr, prefix) = ioc.value.split_once('/')?;
                let ip: IpAddr = addr.parse().ok()?;
                let prefix: u8 = prefix.parse().ok()?;
                IpNetwork::new(ip, prefix).ok().map(Self::from_network)
            }
            IocType::Url => None,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn start(&self) -> u128 {
        self.start
    }

    pub fn end(&self) -> u128 {
        self.end
    }

    /// Every address of `other` lies within this range.
    pub fn contains(&self, other: &AddrRange) -> bool {
        self.family == other.family && self.start <= other.start && self.end >= other.end
    }

    /// At least one address is shared.
    pub fn overlaps(&self, other: &AddrRange) -> bool {
        self.family == other.family && self.start <= other.end && other.start <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> AddrRange {
        let (addr, prefix) = s.split_once('/').unwrap();
        AddrRange::from_network(
            IpNetwork::new(addr.parse().unwrap(), prefix.parse().unwrap()).unwrap(),
        )
    }

    fn ip(s: &str) -> AddrRange {
        AddrRange::from_ip(s.parse().unwrap())
    }

    #[test]
    fn cidr_contains_member_ip() {
        assert!(net("10.0.0.0/24").contains(&ip("10.0.0.5")));
        assert!(!net("10.0.0.0/24").contains(&ip("10.0.1.5")));
    }

    #[test]
    fn wider_prefix_contains_narrower() {
        assert!(net("10.0.0.0/23").contains(&net("10.0.1.0/24")));
        assert!(!net("10.0.1.0/24").contains(&net("10.0.0.0/23")));
        assert!(net("10.0.0.0/24").contains(&net("10.0.0.0/24")));
    }

    #[test]
    fn sibling_networks_do_not_overlap() {
        assert!(!net("10.0.0.0/24").overlaps(&net("10.0.1.0/24")));
        assert!(net("10.0.0.0/23").overlaps(&net("10.0.1.0/24")));
    }

    #[test]
    fn families_are_never_comparable() {
        assert!(!net("0.0.0.0/0").contains(&ip("::1")));
        assert!(!net("::/0").overlaps(&ip("10.0.0.1")));
    }

    #[test]
    fn zero_prefix_spans_whole_family() {
        let all = net("0.0.0.0/0");
        assert_eq!(all.start(), 0);
        assert_eq!(all.end(), u32::MAX as u128);
        assert!(all.contains(&ip("255.255.255.255")));
    }
}
