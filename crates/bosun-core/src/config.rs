use crate::CoreError;
use bosun_store::{DatastoreEndpoint, StateLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bosun/bosun.toml";
pub const CONFIG_ENV: &str = "BOSUN_CONFIG";

/// Host-wide bosun settings, read from TOML. Every field has a default, so an
/// absent file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BosunConfig {
    pub state_dir: PathBuf,
    /// Parent of the per-app data directories.
    pub app_data_dir: PathBuf,
    pub shared_data_dir: PathBuf,
    pub catalog_dir: PathBuf,
    /// Where the generated declarative configuration is written.
    pub generated_config: PathBuf,
    pub engine_socket: PathBuf,
    /// Argv of the external configuration-apply step. Empty disables it.
    pub apply_command: Vec<String>,
    pub sso: SsoConfig,
    pub datastore: DatastoreConfig,
    pub server: ServerConfig,
}

impl Default for BosunConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/bosun"),
            app_data_dir: PathBuf::from("/var/lib/bosun/apps"),
            shared_data_dir: PathBuf::from("/srv/bosun/shared"),
            catalog_dir: PathBuf::from("/etc/bosun/catalog"),
            generated_config: PathBuf::from("/etc/nixos/bosun/apps.nix"),
            engine_socket: PathBuf::from(bosun_runtime::DEFAULT_ENGINE_SOCKET),
            apply_command: Vec::new(),
            sso: SsoConfig::default(),
            datastore: DatastoreConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsoConfig {
    /// OpenID discovery URL; `{app}` is replaced with the app name.
    pub discovery_url: String,
    pub timeout_secs: u64,
    pub interval_ms: u64,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            discovery_url:
                "http://127.0.0.1:9000/application/o/{app}/.well-known/openid-configuration"
                    .to_owned(),
            timeout_secs: 180,
            interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatastoreConfig {
    pub bridge_host: String,
    pub host_network_host: String,
    pub port: u16,
    pub user: String,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        let d = DatastoreEndpoint::default();
        Self {
            bridge_host: d.bridge_host,
            host_network_host: d.host_network_host,
            port: d.port,
            user: d.user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    pub metrics_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8420".to_owned(),
            metrics_interval_secs: 5,
        }
    }
}

impl BosunConfig {
    /// `explicit`, then `$BOSUN_CONFIG`, then the system default.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|reason| CoreError::Config {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn layout(&self) -> StateLayout {
        StateLayout::new(&self.state_dir)
    }

    pub fn datastore_endpoint(&self) -> DatastoreEndpoint {
        DatastoreEndpoint {
            bridge_host: self.datastore.bridge_host.clone(),
            host_network_host: self.datastore.host_network_host.clone(),
            port: self.datastore.port,
            user: self.datastore.user.clone(),
        }
    }

    pub fn sso_discovery_url(&self, app: &str) -> String {
        self.sso.discovery_url.replace("{app}", app)
    }

    pub fn sso_timeout(&self) -> Duration {
        Duration::from_secs(self.sso.timeout_secs)
    }

    pub fn sso_interval(&self) -> Duration {
        Duration::from_millis(self.sso.interval_ms)
    }

    pub fn app_data_path(&self, app: &str) -> PathBuf {
        self.app_data_dir.join(app)
    }

    /// Override the state directory (`--state-dir`).
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}
