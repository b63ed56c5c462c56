//! Services
//!
//! A service is a named group of containers sharing one bridge, one address
//! pool and one reverse proxy.

pub mod loadbalancer;

pub use loadbalancer::{BalancePolicy, LoadBalancer, ProxyConfig, ReloadJob};

use crate::network::{BridgeNetwork, IpPool};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// The registered proxy container of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRef {
    pub name: String,
    pub pid: u32,
    pub directory: PathBuf,
}

/// A registered service
#[derive(Debug)]
pub struct Service {
    /// Unique service name
    pub name: String,
    /// Distinguishes this service from earlier ones of the same name
    pub instance: u64,
    /// The service's bridge device
    pub bridge: BridgeNetwork,
    /// Free workload addresses
    pub pool: IpPool,
    /// Registered containers in join order
    pub members: Vec<String>,
    /// The proxy, once registered
    pub proxy: Option<ProxyRef>,
    /// Upstream pool served by the proxy
    pub load_balancer: LoadBalancer,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn new(
        name: &str,
        instance: u64,
        bridge: BridgeNetwork,
        proxy_port: u16,
        app_mount: &Path,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance,
            pool: IpPool::new(&bridge.address),
            bridge,
            members: Vec::new(),
            proxy: None,
            load_balancer: LoadBalancer::new(name, proxy_port, app_mount),
            created_at: Utc::now(),
        }
    }

    /// Add a container to the member list; joining twice is a no-op
    pub fn join(&mut self, container: &str) {
        if !self.is_member(container) {
            self.members.push(container.to_string());
        }
    }

    /// Remove a container from the member list
    pub fn leave(&mut self, container: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != container);
        before != self.members.len()
    }

    pub fn is_member(&self, container: &str) -> bool {
        self.members.iter().any(|m| m == container)
    }
}
