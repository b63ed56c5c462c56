//! Bridge addressing and the per-service address pool

use crate::error::{BrockerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Host offset handed to a service's proxy container
pub const PROXY_OFFSET: u8 = 2;
/// First host offset in a service's pool
pub const POOL_FIRST_OFFSET: u8 = 3;
/// Last host offset in a service's pool
pub const POOL_LAST_OFFSET: u8 = 50;
/// Number of addresses in a service's pool
pub const POOL_CAPACITY: usize = (POOL_LAST_OFFSET - POOL_FIRST_OFFSET + 1) as usize;

/// Bridge address with its prefix length, e.g. `10.0.0.1/24`
///
/// Container addresses are derived by replacing the last octet, so the
/// prefix must keep the whole last octet inside the subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BridgeAddress {
    /// Address assigned to the bridge device
    pub address: Ipv4Addr,
    /// Prefix length of the bridge subnet
    pub prefix: u8,
}

impl BridgeAddress {
    /// Address at the given host offset within the bridge's /24
    pub fn host(&self, offset: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.address.octets();
        Ipv4Addr::new(a, b, c, offset)
    }

    /// Address reserved for the service's proxy container
    pub fn proxy_address(&self) -> Ipv4Addr {
        self.host(PROXY_OFFSET)
    }
}

impl FromStr for BridgeAddress {
    type Err = BrockerError;

    fn from_str(s: &str) -> Result<Self> {
        let (ip, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| BrockerError::Validation(format!("bridge address needs a prefix: {}", s)))?;

        let address: Ipv4Addr = ip
            .parse()
            .map_err(|_| BrockerError::Validation(format!("invalid IPv4 address: {}", ip)))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| BrockerError::Validation(format!("invalid prefix length: {}", prefix)))?;

        if !(8..=24).contains(&prefix) {
            return Err(BrockerError::Validation(format!(
                "prefix length must be between 8 and 24, got {}",
                prefix
            )));
        }

        let last = address.octets()[3];
        if last == 0 || last == 255 || (PROXY_OFFSET..=POOL_LAST_OFFSET).contains(&last) {
            return Err(BrockerError::Validation(format!(
                "bridge address {} collides with container addresses .{}-.{}",
                address, PROXY_OFFSET, POOL_LAST_OFFSET
            )));
        }

        Ok(Self { address, prefix })
    }
}

impl TryFrom<String> for BridgeAddress {
    type Error = BrockerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BridgeAddress> for String {
    fn from(value: BridgeAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BridgeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// FIFO pool of container addresses for one service
///
/// Allocation pops the head, release appends to the tail.
#[derive(Debug, Clone)]
pub struct IpPool {
    free: VecDeque<Ipv4Addr>,
}

impl IpPool {
    /// Create a full pool covering offsets 3 through 50 of the bridge subnet
    pub fn new(bridge: &BridgeAddress) -> Self {
        let free = (POOL_FIRST_OFFSET..=POOL_LAST_OFFSET)
            .map(|offset| bridge.host(offset))
            .collect();
        Self { free }
    }

    /// Take the next free address
    pub fn allocate(&mut self) -> Option<Ipv4Addr> {
        self.free.pop_front()
    }

    /// Return an address to the tail of the pool
    ///
    /// Returns false, leaving the pool untouched, if the address is already free.
    pub fn release(&mut self, ip: Ipv4Addr) -> bool {
        if self.free.contains(&ip) {
            tracing::warn!("Address {} released twice, ignoring", ip);
            return false;
        }
        self.free.push_back(ip);
        true
    }

    /// Number of free addresses
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Free addresses in allocation order
    pub fn free_addresses(&self) -> Vec<Ipv4Addr> {
        self.free.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> BridgeAddress {
        "10.0.0.1/24".parse().unwrap()
    }

    #[test]
    fn test_parse_bridge_address() {
        let addr = bridge();
        assert_eq!(addr.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(addr.prefix, 24);
        assert_eq!(addr.to_string(), "10.0.0.1/24");
        assert_eq!(addr.proxy_address(), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("10.0.0.1".parse::<BridgeAddress>().is_err());
        assert!("10.0.0/24".parse::<BridgeAddress>().is_err());
        assert!("10.0.0.1/28".parse::<BridgeAddress>().is_err());
        assert!("10.0.0.7/24".parse::<BridgeAddress>().is_err());
        assert!("10.0.0.1/abc".parse::<BridgeAddress>().is_err());
    }

    #[test]
    fn test_bridge_address_serde() {
        let json = serde_json::to_string(&bridge()).unwrap();
        assert_eq!(json, "\"10.0.0.1/24\"");
        let back: BridgeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bridge());
        assert!(serde_json::from_str::<BridgeAddress>("\"nope\"").is_err());
    }

    #[test]
    fn test_pool_capacity_and_range() {
        let mut pool = IpPool::new(&bridge());
        assert_eq!(pool.available(), POOL_CAPACITY);
        assert_eq!(POOL_CAPACITY, 48);

        let mut handed_out = Vec::new();
        while let Some(ip) = pool.allocate() {
            handed_out.push(ip);
        }
        assert_eq!(handed_out.len(), 48);
        assert_eq!(handed_out[0], Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(handed_out[47], Ipv4Addr::new(10, 0, 0, 50));
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn test_pool_fifo_law() {
        let mut pool = IpPool::new(&bridge());
        let allocated: Vec<_> = (0..5).map(|_| pool.allocate().unwrap()).collect();

        pool.release(allocated[3]);
        pool.release(allocated[1]);
        assert_eq!(pool.available(), POOL_CAPACITY - 5 + 2);

        // Drain the untouched head, then the returned addresses come back in return order.
        for _ in 0..(POOL_CAPACITY - 5) {
            pool.allocate().unwrap();
        }
        assert_eq!(pool.allocate(), Some(allocated[3]));
        assert_eq!(pool.allocate(), Some(allocated[1]));
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_pool_release_goes_to_tail() {
        let mut pool = IpPool::new(&bridge());
        let first = pool.allocate().unwrap();
        assert!(pool.release(first));
        assert_eq!(pool.free_addresses().last(), Some(&first));
        assert_eq!(pool.allocate(), Some(Ipv4Addr::new(10, 0, 0, 4)));
    }

    #[test]
    fn test_pool_ignores_double_release() {
        let mut pool = IpPool::new(&bridge());
        let ip = pool.allocate().unwrap();
        assert!(pool.release(ip));
        assert!(!pool.release(ip));
        assert_eq!(pool.available(), POOL_CAPACITY);
    }
}
