//! Server configuration: YAML file over code-set defaults.
//!
//! The loaded config is threaded into components at construction time; a
//! process-wide copy exists only for HTTP handlers that cannot reach it
//! otherwise.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("app.secret must be set")]
    MissingSecret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub app: AppConfig,
    pub wireguard: WireGuardConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub port: u16,
    pub mode: String,
    pub secret: String,
    pub listen: String,
    pub server_ip: String,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub max_header_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireGuardConfig {
    pub interface: String,
    pub port: u16,
    pub network: String,
    pub dns: String,
    pub sync_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            wireguard: WireGuardConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "EiTec VPN Server".into(),
            port: 8080,
            mode: "release".into(),
            secret: String::new(),
            listen: ":8080".into(),
            server_ip: String::new(),
            read_timeout: 15,
            write_timeout: 15,
            idle_timeout: 60,
            max_header_bytes: 1 << 20,
        }
    }
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            interface: "wg0".into(),
            port: 51820,
            network: "10.10.0.0/24".into(),
            dns: "8.8.8.8,8.8.4.4".into(),
            sync_interval: 300,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".into(),
            path: "data/eitec-vpn.db".into(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        if self.app.listen.starts_with(':') {
            format!("0.0.0.0{}", self.app.listen)
        } else {
            self.app.listen.clone()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.app.read_timeout)
    }
}

/// Load the YAML file over the defaults. `app.secret` is required.
pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str(&contents)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ServerConfig::default(),
        Err(e) => return Err(ConfigError::Read(e)),
    };

    if config.app.secret.is_empty() {
        return Err(ConfigError::MissingSecret);
    }

    info!(
        path = %path.display(),
        listen = %config.app.listen,
        database = %config.database.path,
        "loaded server config"
    );
    Ok(config)
}

static GLOBAL: OnceLock<ServerConfig> = OnceLock::new();

/// Publish the loaded config process-wide. Called once during boot.
pub fn set_global(config: ServerConfig) {
    let _ = GLOBAL.set(config);
}

pub fn global() -> Option<&'static ServerConfig> {
    GLOBAL.get()
}
