//! brockerd - the Brocker daemon
//!
//! Serves the control API and runs every service's containers until
//! interrupted.

use brocker::config::BrockerConfig;
use brocker::daemon::BrockerDaemon;
use brocker::error::Result;
use brocker::orchestrator::Orchestrator;
use brocker::runtime::Platform;
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Brocker - container orchestration daemon
#[derive(Parser)]
#[command(name = "brockerd")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Runs namespaced containers behind per-service nginx load balancers", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control listener address
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory holding container state
    #[arg(long)]
    container_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> Result<BrockerConfig> {
        let mut config = BrockerConfig::load(self.config.as_deref())?;
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(root) = self.container_root {
            config.container_root = root;
        }
        config.debug |= self.debug;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;

    // Initialize logging; RUST_LOG wins over the defaults
    let default = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run_detached(serve(config))
}

/// Drive `future` on a fresh runtime and return without waiting for
/// blocking tasks still in flight
///
/// Container lifecycles can stay blocked in `wait` or in a hung child
/// command; dropping the runtime normally would wait for them forever.
fn run_detached<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(future);
    runtime.shutdown_background();
    result
}

async fn serve(config: BrockerConfig) -> Result<()> {
    let listen = config.listen.clone();
    let orchestrator = Orchestrator::new(config, Platform::host())?;
    let daemon = BrockerDaemon::bind(&listen, orchestrator.clone()).await?;

    tokio::select! {
        result = daemon.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Cannot listen for interrupt: {}", e);
            }
            tracing::info!("Interrupted, stopping all services");
        }
    }

    // Best effort: containers still exiting are not waited for.
    let stopped = tokio::task::spawn_blocking(move || orchestrator.shutdown()).await;
    match stopped {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Shutdown failed: {}", e),
        Err(e) => tracing::error!("Shutdown task failed: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_run_detached_leaves_blocked_tasks_behind() {
        let (release, blocked) = mpsc::channel::<()>();
        let started = Instant::now();

        let result = run_detached(async move {
            tokio::task::spawn_blocking(move || {
                let _ = blocked.recv();
            });
            Ok(())
        });

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(release);
    }

    #[test]
    fn test_run_detached_returns_error() {
        let result = run_detached(async {
            Err(brocker::error::BrockerError::Daemon("boom".to_string()))
        });
        assert!(matches!(result, Err(brocker::error::BrockerError::Daemon(_))));
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["brockerd", "--listen", "127.0.0.1:4000", "--debug"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.listen, "127.0.0.1:4000");
        assert!(config.debug);
    }
}
