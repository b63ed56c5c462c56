//! Linux namespace management
//!
//! Namespace flags for launching containers and the executor that runs
//! commands inside an existing container's namespaces.

use super::syscall::clone_flags;
use crate::error::{BrockerError, Result};
use std::path::Path;
use std::process::Command;

/// Types of Linux namespaces a container gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceType {
    /// Mount namespace - isolates filesystem mount points
    Mount,
    /// Network namespace - isolates network devices, ports, etc.
    Net,
    /// PID namespace - isolates process IDs
    Pid,
}

/// Namespaces created for, and entered in, every container
pub const CONTAINER_NAMESPACES: [NamespaceType; 3] =
    [NamespaceType::Pid, NamespaceType::Net, NamespaceType::Mount];

impl NamespaceType {
    /// Get the clone flag for this namespace type
    pub fn clone_flag(&self) -> i32 {
        match self {
            NamespaceType::Mount => clone_flags::CLONE_NEWNS,
            NamespaceType::Net => clone_flags::CLONE_NEWNET,
            NamespaceType::Pid => clone_flags::CLONE_NEWPID,
        }
    }

    /// Get the namespace file name in /proc/[pid]/ns/
    pub fn proc_name(&self) -> &'static str {
        match self {
            NamespaceType::Mount => "mnt",
            NamespaceType::Net => "net",
            NamespaceType::Pid => "pid",
        }
    }

    /// The matching `nsenter` flag
    pub fn nsenter_flag(&self) -> &'static str {
        match self {
            NamespaceType::Mount => "--mount",
            NamespaceType::Net => "--net",
            NamespaceType::Pid => "--pid",
        }
    }
}

/// Combined clone flags for a list of namespace types
pub fn clone_flags_for(namespaces: &[NamespaceType]) -> i32 {
    namespaces.iter().fold(0, |acc, ns| acc | ns.clone_flag())
}

/// Represents a Linux namespace of a specific process
#[derive(Debug)]
pub struct Namespace {
    ns_type: NamespaceType,
    pid: u32,
}

impl Namespace {
    /// Create a namespace reference for a specific process
    pub fn for_process(ns_type: NamespaceType, pid: u32) -> Self {
        Self { ns_type, pid }
    }

    /// Get the path to the namespace file
    pub fn path(&self) -> String {
        format!("/proc/{}/ns/{}", self.pid, self.ns_type.proc_name())
    }

    /// Check if the namespace exists
    pub fn exists(&self) -> bool {
        Path::new(&self.path()).exists()
    }
}

/// Runs a command inside a running container's namespaces
pub trait NamespaceExecutor: Send + Sync {
    /// Run `command` (whitespace-separated argv) inside the namespaces of `pid`
    fn exec(&self, pid: u32, command: &str) -> Result<()>;
}

/// `NamespaceExecutor` backed by util-linux `nsenter`
pub struct Nsenter;

impl NamespaceExecutor for Nsenter {
    fn exec(&self, pid: u32, command: &str) -> Result<()> {
        if !Namespace::for_process(NamespaceType::Pid, pid).exists() {
            return Err(BrockerError::ProcessNotFound(pid));
        }

        let args: Vec<&str> = command.split_whitespace().collect();
        if args.is_empty() {
            return Err(BrockerError::Runtime("exec command is empty".to_string()));
        }

        tracing::debug!("nsenter --target {} {}", pid, command);

        let output = Command::new("nsenter")
            .arg("--target")
            .arg(pid.to_string())
            .args(CONTAINER_NAMESPACES.iter().map(|ns| ns.nsenter_flag()))
            .arg("--")
            .args(&args)
            .output()
            .map_err(|e| BrockerError::Runtime(format!("failed to run nsenter: {}", e)))?;

        if !output.status.success() {
            return Err(BrockerError::Runtime(format!(
                "`{}` in container {} failed: {}",
                command,
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}
