//! Module-side configuration: the YAML file plus the environment
//! overrides for the on-disk paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default location of the agent's own state directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/eitec-vpn";
/// Default location of the managed WireGuard config.
pub const DEFAULT_WIREGUARD_CONFIG: &str = "/etc/wireguard/wg0.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("app.secret must be set")]
    MissingSecret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub app: AppSection,
    pub module: ModuleSection,
    pub server: ServerSection,
    pub wireguard: WireGuardSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub port: u16,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSection {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub private_key: String,
    pub server_endpoint: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub url: String,
    pub heartbeat_interval: u64,
    pub report_interval: u64,
    pub sync_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardSection {
    pub interface: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "EiTec VPN Module".into(),
            port: 8080,
            secret: String::new(),
        }
    }
}

impl Default for ModuleSection {
    fn default() -> Self {
        Self {
            id: 0,
            name: "unnamed-module".into(),
            location: "unset".into(),
            private_key: String::new(),
            server_endpoint: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval: 30,
            report_interval: 60,
            sync_interval: 300,
        }
    }
}

impl Default for WireGuardSection {
    fn default() -> Self {
        Self {
            interface: "wg0".into(),
        }
    }
}

impl ModuleConfig {
    /// The configuration keys the agent cannot work with the server
    /// without. Missing keys put the agent into setup-only mode rather
    /// than failing boot.
    pub fn has_server_binding(&self) -> bool {
        self.module.id != 0
            && !self.module.private_key.is_empty()
            && !self.server.url.is_empty()
            && !self.module.api_key.is_empty()
    }
}

/// Load the YAML file over the defaults. `app.secret` is required.
pub fn load(path: &Path) -> Result<ModuleConfig, ConfigError> {
    let config: ModuleConfig = match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ModuleConfig::default(),
        Err(e) => return Err(ConfigError::Read(e)),
    };

    if config.app.secret.is_empty() {
        return Err(ConfigError::MissingSecret);
    }

    info!(
        path = %path.display(),
        module_id = config.module.id,
        server = %config.server.url,
        "loaded module config"
    );
    Ok(config)
}

/// On-disk paths, overridable through the environment.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub wireguard_config: PathBuf,
}

impl Paths {
    pub fn from_env() -> Self {
        let config_dir = std::env::var("EITEC_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));
        let wireguard_config = std::env::var("WIREGUARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WIREGUARD_CONFIG));
        Self {
            config_dir,
            wireguard_config,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.config_dir.join("module.db")
    }
}
