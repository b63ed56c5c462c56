//! Reverse proxy configuration
//!
//! Each service's proxy container runs nginx against two files in its private
//! directory. Both are regenerated wholesale from the service's backend list
//! and the proxy is told to reload.

use crate::error::{BrockerError, Result};
use crate::runtime::NamespaceExecutor;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Main proxy config, passed to nginx with `-c`
pub const MAIN_CONFIG: &str = "nginx.conf";
/// Server block config, included from the main config
pub const SERVER_CONFIG: &str = "myapp.conf";

/// Load-balancing policy of an upstream pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancePolicy {
    /// Send each request to the backend with the fewest active connections
    #[default]
    LeastConnections,
}

impl BalancePolicy {
    fn directive(&self) -> &'static str {
        match self {
            BalancePolicy::LeastConnections => "least_conn",
        }
    }
}

/// Rendered contents of both proxy config files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub main: String,
    pub server: String,
}

impl ProxyConfig {
    /// Replace both files in `dir`
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::write(dir.join(MAIN_CONFIG), &self.main)?;
        std::fs::write(dir.join(SERVER_CONFIG), &self.server)?;
        Ok(())
    }
}

/// A service's upstream pool and the proxy state derived from it
#[derive(Debug)]
pub struct LoadBalancer {
    upstream: String,
    policy: BalancePolicy,
    servers: Vec<String>,
    listen_port: u16,
    app_mount: PathBuf,
    generation: u64,
    // Last generation written to disk.
    written: Arc<Mutex<u64>>,
}

impl LoadBalancer {
    pub fn new(service: &str, listen_port: u16, app_mount: &Path) -> Self {
        Self {
            upstream: format!("{}_pool", service),
            policy: BalancePolicy::default(),
            servers: Vec::new(),
            listen_port,
            app_mount: app_mount.to_path_buf(),
            generation: 0,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Name of the upstream pool
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Backends in `ip:port` form, in join order
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn set_servers(&mut self, servers: Vec<String>) {
        self.servers = servers;
    }

    /// Render both config files from the current backend list
    pub fn render(&self) -> ProxyConfig {
        let app = self.app_mount.display();
        let mut main = String::new();
        let _ = writeln!(main, "daemon off;");
        let _ = writeln!(main, "pid {}/nginx.pid;", app);
        let _ = writeln!(main, "error_log {}/error.log;", app);
        let _ = writeln!(main);
        let _ = writeln!(main, "events {{");
        let _ = writeln!(main, "    worker_connections 1024;");
        let _ = writeln!(main, "}}");
        let _ = writeln!(main);
        let _ = writeln!(main, "http {{");
        let _ = writeln!(main, "    access_log {}/access.log;", app);
        let _ = writeln!(main);
        let _ = writeln!(main, "    upstream {} {{", self.upstream);
        let _ = writeln!(main, "        {};", self.policy.directive());
        if self.servers.is_empty() {
            // nginx refuses an upstream without servers.
            let _ = writeln!(main, "        server 127.0.0.1:{} down;", self.listen_port);
        }
        for server in &self.servers {
            let _ = writeln!(main, "        server {};", server);
        }
        let _ = writeln!(main, "    }}");
        let _ = writeln!(main);
        let _ = writeln!(main, "    include {}/{};", app, SERVER_CONFIG);
        let _ = writeln!(main, "}}");

        let mut server = String::new();
        let _ = writeln!(server, "server {{");
        let _ = writeln!(server, "    listen {};", self.listen_port);
        let _ = writeln!(server);
        let _ = writeln!(server, "    location / {{");
        let _ = writeln!(server, "        proxy_pass http://{};", self.upstream);
        let _ = writeln!(server, "    }}");
        let _ = writeln!(server, "}}");

        ProxyConfig { main, server }
    }

    /// Render the current state as a numbered job for the proxy at `directory`
    pub fn reload_job(&mut self, pid: u32, directory: &Path) -> ReloadJob {
        self.generation += 1;
        ReloadJob {
            generation: self.generation,
            config: self.render(),
            pid,
            directory: directory.to_path_buf(),
            written: self.written.clone(),
        }
    }
}

/// One rendered proxy config waiting to be written and applied
///
/// Jobs are numbered under the registry lock and applied outside it; a job
/// older than the last one written is dropped, so the newest render always
/// ends up on disk.
#[derive(Debug)]
pub struct ReloadJob {
    generation: u64,
    config: ProxyConfig,
    pid: u32,
    directory: PathBuf,
    written: Arc<Mutex<u64>>,
}

impl ReloadJob {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Write the files and reload the proxy. Returns false for a stale job.
    pub fn apply(&self, executor: &dyn NamespaceExecutor, reload_command: &str) -> Result<bool> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| BrockerError::Lock("Failed to acquire proxy config lock".to_string()))?;
        if self.generation <= *written {
            tracing::debug!(
                "Skipping stale proxy config generation {} (written {})",
                self.generation,
                *written
            );
            return Ok(false);
        }

        self.config.write_to(&self.directory)?;
        *written = self.generation;

        executor.exec(self.pid, reload_command)?;
        Ok(true)
    }
}
