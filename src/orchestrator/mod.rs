//! Service orchestration
//!
//! The orchestrator owns the registry and exposes the control operations:
//! services are added and stopped, containers are run, listed, resolved and
//! stopped. Container lifecycles run on tokio's blocking pool.

pub mod registry;

pub use registry::Registry;

use crate::config::BrockerConfig;
use crate::container::lifecycle::{self, ContainerLifecycle, ExitReport};
use crate::container::{ContainerRecord, ContainerRole, ContainerSummary};
use crate::error::{BrockerError, Result};
use crate::network::{BridgeAddress, BridgeNetwork, VethNames};
use crate::runtime::Platform;
use crate::service::{ProxyConfig, Service};
use chrono::Utc;
use regex::Regex;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::task::JoinHandle;

/// State shared by the orchestrator and every running lifecycle
pub struct Context {
    pub(crate) config: BrockerConfig,
    pub(crate) platform: Platform,
    pub(crate) veths: VethNames,
    registry: Mutex<Registry>,
}

impl Context {
    fn new(config: BrockerConfig, platform: Platform) -> Self {
        Self {
            veths: VethNames::new(&config.veth_base),
            config,
            platform,
            registry: Mutex::new(Registry::new()),
        }
    }

    pub(crate) fn registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| BrockerError::Lock("Failed to acquire registry lock".to_string()))
    }

    /// Proxy config for the service's current backends
    pub(crate) fn proxy_config(&self, service: &str, instance: u64) -> Result<ProxyConfig> {
        let mut registry = self.registry()?;
        registry.instance(service, instance)?;
        let backends = registry.backends(service, self.config.backend_port);
        let service = registry.service_mut(service)?;
        service.load_balancer.set_servers(backends);
        Ok(service.load_balancer.render())
    }

    /// Regenerate the service's proxy config from its active backends and
    /// reload the proxy
    ///
    /// Failures are logged; the previous config stays in effect.
    pub(crate) fn refresh_load_balancer(&self, service: &str) {
        let job = {
            let mut registry = match self.registry() {
                Ok(registry) => registry,
                Err(e) => {
                    tracing::warn!("{}", e);
                    return;
                }
            };
            let backends = registry.backends(service, self.config.backend_port);
            let Ok(entry) = registry.service_mut(service) else {
                tracing::debug!("Service {} is gone, skipping proxy refresh", service);
                return;
            };
            entry.load_balancer.set_servers(backends);
            let Some(proxy) = entry.proxy.clone() else {
                tracing::debug!("Proxy of {} not registered yet, skipping refresh", service);
                return;
            };
            entry.load_balancer.reload_job(proxy.pid, &proxy.directory)
        };

        let reload = self.config.proxy_signal_command("reload");
        match job.apply(self.platform.executor.as_ref(), &reload) {
            Ok(true) => tracing::info!(
                "Reloaded proxy of {} (generation {})",
                service,
                job.generation()
            ),
            Ok(false) => {}
            Err(e) => tracing::warn!("Cannot refresh proxy of {}: {}", service, e),
        }
    }
}

/// A container lifecycle running in the background
pub struct ContainerTask {
    /// Container identity
    pub name: String,
    /// Resolves when the container has exited and been deregistered
    pub handle: JoinHandle<Result<ExitReport>>,
}

/// Brocker orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<Context>,
}

fn service_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").unwrap())
}

impl Orchestrator {
    /// Create an orchestrator on the given host
    pub fn new(config: BrockerConfig, platform: Platform) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.container_root)?;
        Ok(Self {
            ctx: Arc::new(Context::new(config, platform)),
        })
    }

    pub fn config(&self) -> &BrockerConfig {
        &self.ctx.config
    }

    /// Register a service: create its bridge and start its proxy
    ///
    /// Returns the proxy's lifecycle task. Must be called within a tokio runtime.
    pub fn add_service(&self, name: &str, bridge_ip: &str) -> Result<ContainerTask> {
        if !service_name_pattern().is_match(name) {
            return Err(BrockerError::Validation(format!("invalid service name: {:?}", name)));
        }
        let address: BridgeAddress = bridge_ip.parse()?;

        let instance = self.ctx.registry()?.reserve_service(name)?;
        let bridge = BridgeNetwork::new(&self.ctx.config.bridge_base, instance, address);
        if let Err(e) = bridge.create(self.ctx.platform.network.as_ref()) {
            self.ctx.registry()?.cancel_reservation(name);
            return Err(e);
        }
        self.ctx.registry()?.insert_service(Service::new(
            name,
            instance,
            bridge,
            self.ctx.config.proxy_listen_port,
            &self.ctx.config.app_mount,
        ));
        tracing::info!("Added service {} on {}", name, address);

        let record = ContainerRecord::new(
            name,
            &self.ctx.config.proxy_command(),
            ContainerRole::Proxy,
            None,
            &self.ctx.config.container_root,
            Utc::now(),
        );
        Ok(self.spawn(record, instance))
    }

    /// Start a workload container in a service
    ///
    /// Returns as soon as the lifecycle is scheduled; provisioning happens in
    /// the background.
    pub fn run_container(
        &self,
        service: &str,
        command: &str,
        file: Option<PathBuf>,
    ) -> Result<ContainerTask> {
        if command.split_whitespace().next().is_none() {
            return Err(BrockerError::Validation("command is empty".to_string()));
        }
        if let Some(file) = &file {
            if !file.is_file() {
                return Err(BrockerError::Validation(format!(
                    "file to copy does not exist: {}",
                    file.display()
                )));
            }
        }
        let instance = self.ctx.registry()?.service(service)?.instance;

        let record = ContainerRecord::new(
            service,
            command,
            ContainerRole::Workload,
            file,
            &self.ctx.config.container_root,
            Utc::now(),
        );
        Ok(self.spawn(record, instance))
    }

    fn spawn(&self, record: ContainerRecord, instance: u64) -> ContainerTask {
        let name = record.name.clone();
        let lifecycle = ContainerLifecycle::new(self.ctx.clone(), record, instance);
        let handle = tokio::task::spawn_blocking(move || lifecycle.run());
        ContainerTask { name, handle }
    }

    /// Registered containers, oldest first
    pub fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let registry = self.ctx.registry()?;
        Ok(registry
            .containers()
            .into_iter()
            .map(ContainerSummary::from)
            .collect())
    }

    /// Host pid of a registered container
    pub fn resolve(&self, name: &str) -> Result<u32> {
        let registry = self.ctx.registry()?;
        let record = registry.container(name)?;
        record
            .pid
            .ok_or_else(|| BrockerError::ContainerNotFound(name.to_string()))
    }

    /// Stop a container; stopping an already stopped container is a no-op
    pub fn stop_container(&self, name: &str) -> Result<()> {
        let record = {
            let mut registry = self.ctx.registry()?;
            registry.begin_close(name)?
        };
        let Some(record) = record else {
            tracing::debug!("Container {} is already stopped", name);
            return Ok(());
        };

        lifecycle::close(&self.ctx, &record);
        if record.role == ContainerRole::Workload {
            self.ctx.refresh_load_balancer(&record.service_name);
        }
        Ok(())
    }

    /// Stop every container of a service, then delete its bridge
    pub fn stop_service(&self, name: &str) -> Result<()> {
        // Service and members leave the registry together.
        let (service, members) = self.ctx.registry()?.take_service(name)?;
        tracing::info!("Stopping service {} ({} containers)", name, members.len());

        if let Some(proxy) = &service.proxy {
            let stop = self.ctx.config.proxy_signal_command("stop");
            if let Err(e) = self.ctx.platform.executor.exec(proxy.pid, &stop) {
                tracing::debug!("Graceful proxy stop of {} failed: {}", name, e);
            }
        }
        for record in &members {
            lifecycle::close(&self.ctx, record);
        }

        service.bridge.remove(self.ctx.platform.network.as_ref())?;
        Ok(())
    }

    /// Stop every service
    pub fn shutdown(&self) -> Result<()> {
        let names = self.ctx.registry()?.service_names();
        for name in names {
            match self.stop_service(&name) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!("Failed to stop service {}: {}", name, e),
            }
        }
        Ok(())
    }

    /// Free addresses of a service's pool in allocation order
    pub fn free_addresses(&self, service: &str) -> Result<Vec<Ipv4Addr>> {
        let registry = self.ctx.registry()?;
        Ok(registry.service(service)?.pool.free_addresses())
    }

    /// Bridge device name of a service
    pub fn bridge_name(&self, service: &str) -> Result<String> {
        let registry = self.ctx.registry()?;
        Ok(registry.service(service)?.bridge.name.clone())
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }
}
