//! Network management module
//!
//! Per-service bridges, per-container veth pairs and the FIFO address pool.

pub mod bridge;
pub mod config;

pub use bridge::{BridgeNetwork, IpCommand, NetworkOps, VethNames};
pub use config::{BridgeAddress, IpPool, POOL_CAPACITY};
