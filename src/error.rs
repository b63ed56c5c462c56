//! Error types for Brocker

use thiserror::Error;

/// Result type for Brocker operations
pub type Result<T> = std::result::Result<T, BrockerError>;

/// Brocker error types
#[derive(Error, Debug)]
pub enum BrockerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service already exists: {0}")]
    ServiceExists(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Process exited with status {code}: {name}")]
    ProcessExit { name: String, code: i32 },

    #[error("Process not found: {0}")]
    ProcessNotFound(u32),

    #[error("IP pool exhausted for service {0}")]
    PoolExhausted(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrockerError {
    /// Whether the error names an unknown service or container
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrockerError::ServiceNotFound(_) | BrockerError::ContainerNotFound(_)
        )
    }
}
