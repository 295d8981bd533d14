use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog definition: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("app not found in catalog: {0}")]
    UnknownApp(String),
    #[error("{app}: unknown integration '{key}'")]
    UnknownIntegration { app: String, key: String },
    #[error("{app}: required integration '{key}' has no provider")]
    MissingIntegration { app: String, key: String },
    #[error("{app}: '{provider}' is not a compatible provider for '{key}' (expected one of: {compatible})")]
    IncompatibleProvider {
        app: String,
        key: String,
        provider: String,
        compatible: String,
    },
    #[error("{app}: invalid definition: {reason}")]
    Invalid { app: String, reason: String },
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthMode {
    /// Only a 2xx response counts as ready.
    #[default]
    Strict,
    /// Any 2xx–4xx response counts; a 401/403 still proves the listener is up.
    Tolerant,
    /// A successful TCP connect counts.
    Tcp,
}

/// A named dependency slot an app declares, filled by a compatible provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IntegrationSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub compatible: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default)]
    pub mode: HealthMode,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            mode: HealthMode::default(),
            timeout_secs: default_health_timeout(),
            interval_ms: default_health_interval(),
        }
    }
}

fn default_health_path() -> String {
    "/".to_owned()
}

fn default_health_timeout() -> u64 {
    120
}

fn default_health_interval() -> u64 {
    2000
}

/// Catalog metadata for one installable app.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub needs_database: bool,
    #[serde(default)]
    pub needs_oauth: bool,
    #[serde(default)]
    pub integrations: BTreeMap<String, IntegrationSpec>,
    #[serde(default)]
    pub health: Option<HealthSection>,
}

impl AppDefinition {
    /// Display name, falling back to the app name.
    pub fn title(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    fn check(&self) -> Result<(), CatalogError> {
        crate::validate_app_name(&self.name).map_err(|e| CatalogError::Invalid {
            app: self.name.clone(),
            reason: e.to_string(),
        })?;
        for (key, spec) in &self.integrations {
            if spec.compatible.is_empty() {
                return Err(CatalogError::Invalid {
                    app: self.name.clone(),
                    reason: format!("integration '{key}' lists no compatible providers"),
                });
            }
        }
        Ok(())
    }
}

pub fn parse_definition_str(input: &str) -> Result<AppDefinition, CatalogError> {
    let def: AppDefinition = toml::from_str(input)?;
    def.check()?;
    Ok(def)
}

pub fn parse_definition_file(path: impl AsRef<Path>) -> Result<AppDefinition, CatalogError> {
    let content = fs::read_to_string(path)?;
    parse_definition_str(&content)
}
