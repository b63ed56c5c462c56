//! Container lifecycle
//!
//! One lifecycle drives one container from creation to exit on a blocking
//! worker thread: provision, attach to the service network, register, wait,
//! deregister. A failure before registration rolls back whatever was set up.

use super::config::{ContainerRecord, ContainerStatus};
use crate::error::{BrockerError, Result};
use crate::orchestrator::Context;
use crate::runtime::mount::unmount_command;
use crate::runtime::LaunchSpec;
use chrono::Utc;
use std::sync::Arc;

/// How a container's lifecycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub name: String,
    pub exit_code: Option<i32>,
    pub status: ContainerStatus,
}

/// Drives a single container
///
/// `instance` pins the lifecycle to the service it was started for; a later
/// service reusing the name is never touched.
pub struct ContainerLifecycle {
    ctx: Arc<Context>,
    record: ContainerRecord,
    instance: u64,
}

impl ContainerLifecycle {
    pub fn new(ctx: Arc<Context>, record: ContainerRecord, instance: u64) -> Self {
        Self {
            ctx,
            record,
            instance,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Run the container to completion. Blocks until the process exits.
    pub fn run(mut self) -> Result<ExitReport> {
        tracing::info!(
            "Starting container {} for service {}: {}",
            self.record.name,
            self.record.service_name,
            self.record.command
        );

        let pid = match self.provision() {
            Ok(pid) => pid,
            Err(e) => return Err(self.abort(e)),
        };

        if let Err(e) = self.attach_network(pid).and_then(|_| self.register()) {
            self.roll_back(pid);
            return Err(self.abort(e));
        }

        self.mark_running();

        let code = match self.ctx.platform.launcher.wait(pid) {
            Ok(code) => Some(code),
            Err(e) => {
                tracing::warn!("Lost track of container {}: {}", self.record.name, e);
                None
            }
        };

        Ok(self.finish(code))
    }

    /// Create the private directory, stage its files and launch the process
    fn provision(&mut self) -> Result<u32> {
        std::fs::create_dir_all(&self.record.directory).map_err(|e| {
            BrockerError::Provisioning(format!(
                "cannot create {}: {}",
                self.record.directory.display(),
                e
            ))
        })?;
        self.advance(ContainerStatus::Provisioning);

        self.record.copy_file_in()?;

        if self.record.is_proxy() {
            let config = self.ctx
                .proxy_config(&self.record.service_name, self.instance)?;
            config.write_to(&self.record.directory)?;
        }

        let spec = LaunchSpec {
            name: self.record.name.clone(),
            directory: self.record.directory.clone(),
            app_mount: self.ctx.config.app_mount.clone(),
            args: self.record.args(),
            log_path: self.record.log_path(),
        };
        let pid = self.ctx.platform.launcher.launch(&spec)?;
        tracing::debug!("Container {} launched as pid {}", self.record.name, pid);

        self.record.pid = Some(pid);
        self.persist();
        Ok(pid)
    }

    /// Allocate an address and wire the container into its service bridge
    fn attach_network(&mut self, pid: u32) -> Result<()> {
        let (bridge, ip) = {
            let mut registry = self.ctx.registry()?;
            let bridge = registry
                .instance(&self.record.service_name, self.instance)?
                .bridge
                .clone();
            let ip = registry.allocate_address(
                &self.record.service_name,
                self.instance,
                self.record.role,
            )?;
            (bridge, ip)
        };
        self.record.ip = Some(ip);

        let host_end = self.ctx.veths.next();
        self.record.veth = Some(host_end.clone());

        let iface = &self.ctx.config.container_iface;
        bridge.connect(self.ctx.platform.network.as_ref(), &host_end, iface, pid)?;

        let executor = self.ctx.platform.executor.as_ref();
        executor.exec(
            pid,
            &format!("ip addr add {}/{} dev {}", ip, bridge.address.prefix, iface),
        )?;
        executor.exec(pid, &format!("ip link set {} up", iface))?;
        executor.exec(pid, "ip link set lo up")?;

        tracing::debug!(
            "Container {} attached to {} as {} via {}",
            self.record.name,
            bridge.name,
            ip,
            host_end
        );
        self.advance(ContainerStatus::NetworkAttached);
        Ok(())
    }

    /// Publish the container and update the service's proxy
    fn register(&mut self) -> Result<()> {
        self.record.active = true;
        self.record.status = ContainerStatus::Registered;

        let refresh = {
            let mut registry = self.ctx.registry()?;
            if let Err(e) = registry.register(self.record.clone(), self.instance) {
                self.record.active = false;
                return Err(e);
            }
            // A proxy starts with the current backends already rendered.
            !self.record.is_proxy()
                || !registry
                    .backends(&self.record.service_name, self.ctx.config.backend_port)
                    .is_empty()
        };
        self.persist();

        if refresh {
            self.ctx.refresh_load_balancer(&self.record.service_name);
        }
        Ok(())
    }

    fn mark_running(&mut self) {
        self.record.status = ContainerStatus::Running;
        match self.ctx.registry() {
            Ok(mut registry) => {
                // Closed already wins over Running.
                if let Ok(entry) = registry.container_mut(&self.record.name) {
                    if entry.status == ContainerStatus::Registered {
                        entry.status = ContainerStatus::Running;
                    }
                    self.record.status = entry.status;
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
        self.persist();
        tracing::info!("Container {} is running", self.record.name);
    }

    /// Deregister after the process has exited
    ///
    /// This is the only writer of the final record.
    fn finish(mut self, code: Option<i32>) -> ExitReport {
        let registered = match self.ctx.registry() {
            Ok(mut registry) => registry.deregister(&self.record.name),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        };
        let still_member = registered.is_some();
        match registered {
            Some(record) => self.record = record,
            // Already removed together with its stopped service.
            None => self.record.status = ContainerStatus::Closed,
        }

        let closed = self.record.status == ContainerStatus::Closed;
        self.record.active = false;
        if !closed {
            self.record.status = ContainerStatus::Exited;
        }
        self.record.exit_code = code;
        self.record.finished_at = Some(Utc::now());
        self.persist();

        match code {
            Some(0) => tracing::info!("Container {} exited", self.record.name),
            Some(code) if closed => {
                tracing::info!("Container {} stopped with status {}", self.record.name, code)
            }
            Some(code) => {
                let err = BrockerError::ProcessExit {
                    name: self.record.name.clone(),
                    code,
                };
                tracing::warn!("{}", err);
                if let Err(e) = self.record.append_log(&err.to_string()) {
                    tracing::warn!("Cannot write log of {}: {}", self.record.name, e);
                }
            }
            None => {}
        }

        if still_member && !self.record.is_proxy() {
            self.ctx.refresh_load_balancer(&self.record.service_name);
        }

        ExitReport {
            name: self.record.name.clone(),
            exit_code: code,
            status: self.record.status,
        }
    }

    /// Undo a partial setup: kill and reap the process, return the address
    fn roll_back(&mut self, pid: u32) {
        let launcher = self.ctx.platform.launcher.as_ref();
        if let Err(e) = launcher.kill(pid) {
            tracing::warn!("Cannot kill {} during rollback: {}", pid, e);
        } else if let Err(e) = launcher.wait(pid) {
            tracing::debug!("Cannot reap {} during rollback: {}", pid, e);
        }

        if let Some(ip) = self.record.ip.take() {
            match self.ctx.registry() {
                Ok(mut registry) => registry.release_address(
                    &self.record.service_name,
                    self.instance,
                    self.record.role,
                    ip,
                ),
                Err(e) => tracing::warn!("{}", e),
            }
        }
        self.record.active = false;
    }

    fn abort(&mut self, err: BrockerError) -> BrockerError {
        tracing::error!("Container {} failed: {}", self.record.name, err);
        self.record.status = ContainerStatus::Failed;
        self.record.active = false;
        if self.record.directory.is_dir() {
            self.persist();
            if let Err(e) = self.record.append_log(&err.to_string()) {
                tracing::warn!("Cannot write log of {}: {}", self.record.name, e);
            }
        }
        err
    }

    fn advance(&mut self, status: ContainerStatus) {
        self.record.status = status;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.record.persist() {
            tracing::warn!("Cannot persist record of {}: {}", self.record.name, e);
        }
    }
}

/// Administratively stop a container that was marked closed in the registry
///
/// Detaches the app mount and kills the process. The lifecycle still running
/// the container observes the exit, deregisters and persists the final record.
pub fn close(ctx: &Context, record: &ContainerRecord) {
    let Some(pid) = record.pid else {
        return;
    };
    tracing::info!("Closing container {}", record.name);

    let unmount = unmount_command(&ctx.config.app_mount);
    if let Err(e) = ctx.platform.executor.exec(pid, &unmount) {
        tracing::warn!("Cannot unmount {} in {}: {}", ctx.config.app_mount.display(), record.name, e);
    }
    if let Err(e) = ctx.platform.launcher.kill(pid) {
        tracing::warn!("Cannot kill container {}: {}", record.name, e);
    }
}
