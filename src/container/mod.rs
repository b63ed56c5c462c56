//! Container management module
//!
//! Container records, their on-disk state, and the lifecycle that runs each
//! container from launch to exit.

pub mod config;
pub mod lifecycle;

pub use config::{
    identity, ContainerRecord, ContainerRole, ContainerStatus, ContainerSummary, LOG_FILE,
    RECORD_FILE,
};
pub use lifecycle::{ContainerLifecycle, ExitReport};
