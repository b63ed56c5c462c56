//! Brocker - a lightweight container orchestration daemon
//!
//! Brocker runs commands as namespace-isolated containers grouped into
//! services. It provides:
//!
//! - Process launch in fresh PID, mount and network namespaces
//! - One bridge and one FIFO address pool per service
//! - An nginx reverse proxy per service, reconfigured as backends come and go
//! - An HTTP control API

pub mod config;
pub mod container;
pub mod daemon;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod runtime;
pub mod service;

pub use config::BrockerConfig;
pub use error::{BrockerError, Result};
pub use orchestrator::Orchestrator;
