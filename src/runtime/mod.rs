//! Brocker's native container runtime
//!
//! Namespace-isolated process launch, in-namespace command execution, and the
//! host capabilities the orchestrator is built on.

pub mod mount;
pub mod namespace;
pub mod process;
pub mod syscall;

#[cfg(test)]
pub(crate) mod testing;

pub use namespace::{NamespaceExecutor, NamespaceType, Nsenter};
pub use process::{LaunchSpec, Launcher, NamespaceLauncher};

use crate::network::{IpCommand, NetworkOps};
use std::sync::Arc;

/// The host capabilities a daemon runs against
#[derive(Clone)]
pub struct Platform {
    /// Starts and supervises container processes
    pub launcher: Arc<dyn Launcher>,
    /// Runs commands inside running containers
    pub executor: Arc<dyn NamespaceExecutor>,
    /// Creates bridges and veth pairs
    pub network: Arc<dyn NetworkOps>,
}

impl Platform {
    /// The real Linux host: `clone(2)`, `nsenter` and `ip`
    pub fn host() -> Self {
        Self {
            launcher: Arc::new(NamespaceLauncher),
            executor: Arc::new(Nsenter),
            network: Arc::new(IpCommand::new()),
        }
    }
}
