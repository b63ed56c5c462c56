//! Container records
//!
//! The full record of one container, its content-addressed identity, and the
//! files it keeps in its private directory.

use crate::error::{BrockerError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Persisted record file inside a container's directory
pub const RECORD_FILE: &str = "config.json";
/// Captured stdout/stderr inside a container's directory
pub const LOG_FILE: &str = "output.log";
/// Hex characters kept from the identity digest
pub const IDENTITY_LEN: usize = 8;

/// Lifecycle milestones of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerStatus {
    /// Identity assigned, nothing created yet
    Created,
    /// Directory created, process being launched
    Provisioning,
    /// veth wired and address assigned
    NetworkAttached,
    /// Visible in the registry
    Registered,
    /// Waiting for the process to exit
    Running,
    /// Process exited on its own
    Exited,
    /// Stopped administratively
    Closed,
    /// Provisioning aborted
    Failed,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Provisioning => write!(f, "provisioning"),
            ContainerStatus::NetworkAttached => write!(f, "network-attached"),
            ContainerStatus::Registered => write!(f, "registered"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Closed => write!(f, "closed"),
            ContainerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a container does for its service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRole {
    /// The service's reverse proxy
    Proxy,
    /// A load-balanced backend
    Workload,
}

/// Full record of one container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerRecord {
    /// Content-addressed identity
    pub name: String,
    /// Owning service
    pub service_name: String,
    /// Command line as submitted
    pub command: String,
    /// Proxy or workload
    pub role: ContainerRole,
    /// Host pid once launched
    pub pid: Option<u32>,
    /// Address on the service bridge
    pub ip: Option<Ipv4Addr>,
    /// Host end of the veth pair
    pub veth: Option<String>,
    /// Start timestamp the identity was derived from
    pub start_time: DateTime<Utc>,
    /// Process running and attached to the network
    pub active: bool,
    /// Current milestone
    pub status: ContainerStatus,
    /// Private directory, bind-mounted as the app path
    pub directory: PathBuf,
    /// File copied into the private directory before launch
    pub file_to_copy: Option<PathBuf>,
    /// Exit code once the process is gone
    pub exit_code: Option<i32>,
    /// When the process was reaped
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContainerRecord {
    /// Create a record in the `Created` state
    pub fn new(
        service_name: &str,
        command: &str,
        role: ContainerRole,
        file_to_copy: Option<PathBuf>,
        container_root: &Path,
        start_time: DateTime<Utc>,
    ) -> Self {
        let name = identity(&start_time, command);
        Self {
            directory: container_root.join(&name),
            name,
            service_name: service_name.to_string(),
            command: command.to_string(),
            role,
            pid: None,
            ip: None,
            veth: None,
            start_time,
            active: false,
            status: ContainerStatus::Created,
            file_to_copy,
            exit_code: None,
            finished_at: None,
        }
    }

    /// Command line split into argv
    pub fn args(&self) -> Vec<String> {
        self.command.split_whitespace().map(String::from).collect()
    }

    /// Whether this is the service's proxy
    pub fn is_proxy(&self) -> bool {
        self.role == ContainerRole::Proxy
    }

    /// Path of the persisted record
    pub fn record_path(&self) -> PathBuf {
        self.directory.join(RECORD_FILE)
    }

    /// Path of the captured output
    pub fn log_path(&self) -> PathBuf {
        self.directory.join(LOG_FILE)
    }

    /// Write the full record, replacing any previous version
    ///
    /// The record is staged next to the target and renamed over it, so a
    /// reader sees either the old or the new version.
    pub fn persist(&self) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        let path = self.record_path();
        let staged = path.with_extension("json.tmp");
        std::fs::write(&staged, raw)?;
        std::fs::rename(&staged, &path)?;
        Ok(())
    }

    /// Load a persisted record
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Append a daemon-side line to the container's log
    pub fn append_log(&self, line: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(file, "brocker: {}", line)?;
        Ok(())
    }

    /// Copy the requested file into the private directory under its own name
    pub fn copy_file_in(&self) -> Result<Option<PathBuf>> {
        let Some(source) = &self.file_to_copy else {
            return Ok(None);
        };
        let file_name = source.file_name().ok_or_else(|| {
            BrockerError::Provisioning(format!("cannot copy {}: no file name", source.display()))
        })?;
        let target = self.directory.join(file_name);
        std::fs::copy(source, &target).map_err(|e| {
            BrockerError::Provisioning(format!("cannot copy {}: {}", source.display(), e))
        })?;
        Ok(Some(target))
    }
}

/// Container identity: first eight hex characters of SHA-256 over the start
/// time and the command
pub fn identity(start_time: &DateTime<Utc>, command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(start_time.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(command.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..IDENTITY_LEN].to_string()
}

/// Row returned by container listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerSummary {
    pub name: String,
    pub service: String,
    pub command: String,
    pub role: ContainerRole,
    pub pid: Option<u32>,
    pub ip: Option<Ipv4Addr>,
    pub start_time: DateTime<Utc>,
    pub active: bool,
    pub status: ContainerStatus,
}

impl From<&ContainerRecord> for ContainerSummary {
    fn from(record: &ContainerRecord) -> Self {
        Self {
            name: record.name.clone(),
            service: record.service_name.clone(),
            command: record.command.clone(),
            role: record.role,
            pid: record.pid,
            ip: record.ip,
            start_time: record.start_time,
            active: record.active,
            status: record.status,
        }
    }
}
