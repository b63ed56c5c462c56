//! Bridge network implementation

use super::config::BridgeAddress;
use crate::error::{BrockerError, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

/// Host networking primitives the fabric is built from
pub trait NetworkOps: Send + Sync {
    /// Create a bridge, bring it up and assign its address
    fn create_bridge(&self, name: &str, address: &BridgeAddress) -> Result<()>;

    /// Delete a bridge device
    fn delete_bridge(&self, name: &str) -> Result<()>;

    /// Create a veth pair whose peer end lives in the network namespace of `pid`
    fn create_veth(&self, host_end: &str, peer_end: &str, pid: u32) -> Result<()>;

    /// Enslave the host end of a veth pair to a bridge and bring it up
    fn attach_to_bridge(&self, host_end: &str, bridge: &str) -> Result<()>;
}

/// `NetworkOps` backed by the iproute2 `ip` tool
pub struct IpCommand {
    binary: PathBuf,
}

impl IpCommand {
    /// Use `ip` from `PATH`
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ip"),
        }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        tracing::debug!("ip {}", args.join(" "));

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            BrockerError::Provisioning(format!("failed to run {}: {}", self.binary.display(), e))
        })?;

        if !output.status.success() {
            return Err(BrockerError::Provisioning(format!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkOps for IpCommand {
    fn create_bridge(&self, name: &str, address: &BridgeAddress) -> Result<()> {
        self.run(&["link", "add", "name", name, "type", "bridge"])?;

        let cidr = address.to_string();
        let configured = self
            .run(&["link", "set", name, "up"])
            .and_then(|_| self.run(&["addr", "add", &cidr, "dev", name]));

        if let Err(e) = configured {
            if let Err(cleanup) = self.delete_bridge(name) {
                tracing::warn!("Failed to remove half-configured bridge {}: {}", name, cleanup);
            }
            return Err(e);
        }

        Ok(())
    }

    fn delete_bridge(&self, name: &str) -> Result<()> {
        self.run(&["link", "delete", name, "type", "bridge"])
    }

    fn create_veth(&self, host_end: &str, peer_end: &str, pid: u32) -> Result<()> {
        let pid = pid.to_string();
        self.run(&[
            "link", "add", "name", host_end, "type", "veth", "peer", "name", peer_end, "netns", &pid,
        ])
    }

    fn attach_to_bridge(&self, host_end: &str, bridge: &str) -> Result<()> {
        self.run(&["link", "set", host_end, "master", bridge])?;
        self.run(&["link", "set", host_end, "up"])
    }
}

/// A service's bridge device
#[derive(Debug, Clone)]
pub struct BridgeNetwork {
    /// Device name, `<base><sequence>`
    pub name: String,
    /// Address and prefix assigned to the device
    pub address: BridgeAddress,
}

impl BridgeNetwork {
    /// Describe the bridge registered with the given sequence number
    pub fn new(base: &str, sequence: u64, address: BridgeAddress) -> Self {
        Self {
            name: format!("{}{}", base, sequence),
            address,
        }
    }

    /// Create the device on the host
    pub fn create(&self, ops: &dyn NetworkOps) -> Result<()> {
        tracing::info!("Creating bridge {} with address {}", self.name, self.address);
        ops.create_bridge(&self.name, &self.address)
    }

    /// Remove the device from the host
    pub fn remove(&self, ops: &dyn NetworkOps) -> Result<()> {
        tracing::info!("Deleting bridge {}", self.name);
        ops.delete_bridge(&self.name)
    }

    /// Wire a container's namespace into this bridge
    pub fn connect(&self, ops: &dyn NetworkOps, host_end: &str, peer_end: &str, pid: u32) -> Result<()> {
        ops.create_veth(host_end, peer_end, pid)?;
        ops.attach_to_bridge(host_end, &self.name)
    }
}

/// Daemon-wide sequential veth naming
pub struct VethNames {
    base: String,
    next: AtomicU64,
}

impl VethNames {
    /// Start numbering at zero
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            next: AtomicU64::new(0),
        }
    }

    /// Name for the next host-side veth end
    pub fn next(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.base, n)
    }
}
