//! Brocker Daemon - HTTP control server
//!
//! This module implements the daemon's control boundary: a small HTTP/1.1
//! API on a TCP listener, port 3000 by default, routed onto the orchestrator.

mod api;
mod server;

pub use api::{ApiHandler, ApiResponse, ContainerRunRequest, NameRequest, ServiceAddRequest};
pub use server::BrockerDaemon;
