//! Daemon configuration

use crate::error::{BrockerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default control listener address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

/// Brocker daemon configuration
///
/// Every field has a default, so a JSON file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BrockerConfig {
    /// Control listener address
    pub listen: String,
    /// Directory holding one private directory per container
    pub container_root: PathBuf,
    /// In-container path the private directory is bind-mounted onto
    pub app_mount: PathBuf,
    /// Bridge device name prefix
    pub bridge_base: String,
    /// Host-side veth name prefix
    pub veth_base: String,
    /// Interface name of the veth end inside a container
    pub container_iface: String,
    /// Port every workload container serves on
    pub backend_port: u16,
    /// Reverse proxy binary, run inside the proxy container
    pub proxy_binary: PathBuf,
    /// Port the reverse proxy listens on
    pub proxy_listen_port: u16,
    /// Enable debug logging
    pub debug: bool,
}

impl Default for BrockerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            container_root: PathBuf::from("/container"),
            app_mount: PathBuf::from("/app"),
            bridge_base: "brocker".to_string(),
            veth_base: "veth".to_string(),
            container_iface: "veth1".to_string(),
            backend_port: 8080,
            proxy_binary: PathBuf::from("/usr/sbin/nginx"),
            proxy_listen_port: 80,
            debug: false,
        }
    }
}

impl BrockerConfig {
    /// Load configuration from a JSON file, or use defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    BrockerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would produce invalid device names or mounts
    pub fn validate(&self) -> Result<()> {
        if self.bridge_base.is_empty() || self.veth_base.is_empty() {
            return Err(BrockerError::InvalidConfig(
                "bridge and veth prefixes must not be empty".to_string(),
            ));
        }
        // Linux caps interface names at 15 bytes; leave room for the sequence number.
        if self.bridge_base.len() > 10 || self.veth_base.len() > 10 {
            return Err(BrockerError::InvalidConfig(
                "device name prefixes must be at most 10 characters".to_string(),
            ));
        }
        if self.container_iface.is_empty() || self.container_iface.len() > 15 {
            return Err(BrockerError::InvalidConfig(format!(
                "invalid container interface name: {:?}",
                self.container_iface
            )));
        }
        if !self.app_mount.is_absolute() {
            return Err(BrockerError::InvalidConfig(format!(
                "app mount must be absolute: {}",
                self.app_mount.display()
            )));
        }
        Ok(())
    }

    /// Path of the reverse proxy's main config as seen from inside the proxy container
    pub fn proxy_config_path(&self) -> PathBuf {
        self.app_mount.join(crate::service::loadbalancer::MAIN_CONFIG)
    }

    /// Command line that starts the reverse proxy
    pub fn proxy_command(&self) -> String {
        format!(
            "{} -c {}",
            self.proxy_binary.display(),
            self.proxy_config_path().display()
        )
    }

    /// Command line that sends a signal to the running reverse proxy
    pub fn proxy_signal_command(&self, signal: &str) -> String {
        format!(
            "{} -s {} -c {}",
            self.proxy_binary.display(),
            signal,
            self.proxy_config_path().display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = BrockerConfig::default();
        assert_eq!(config.listen, "0.0.0.0:3000");
        assert_eq!(config.container_root, PathBuf::from("/container"));
        assert_eq!(config.app_mount, PathBuf::from("/app"));
        assert_eq!(config.backend_port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_proxy_commands() {
        let config = BrockerConfig::default();
        assert_eq!(config.proxy_command(), "/usr/sbin/nginx -c /app/nginx.conf");
        assert_eq!(
            config.proxy_signal_command("reload"),
            "/usr/sbin/nginx -s reload -c /app/nginx.conf"
        );
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"backend-port": 9000, "bridge-base": "br"}}"#).unwrap();

        let config = BrockerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend_port, 9000);
        assert_eq!(config.bridge_base, "br");
        assert_eq!(config.veth_base, "veth");
    }

    #[test]
    fn test_rejects_long_prefix() {
        let config = BrockerConfig {
            bridge_base: "averyverylongbridge".to_string(),
            ..BrockerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
