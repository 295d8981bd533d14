//! The per-app configuration hook contract and its registry.

use crate::readiness::ReadinessError;
use bosun_store::{AppRecord, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// An idempotency check found a resource with the same natural key but
    /// different parameters.
    #[error("{app}: {kind} '{key}' already exists with different settings: {detail}")]
    Conflict {
        app: String,
        kind: String,
        key: String,
        detail: String,
    },
    #[error("{app}: {step} failed: {reason}")]
    Failed {
        app: String,
        step: &'static str,
        reason: String,
    },
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Hook input, assembled fresh for every invocation. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub app: String,
    pub data_dir: PathBuf,
    pub shared_dir: PathBuf,
    pub port: u16,
    /// Integration name to provider app names.
    pub integrations: BTreeMap<String, Vec<String>>,
    pub options: BTreeMap<String, String>,
}

impl AppState {
    /// Project an app record onto hook input. A missing record (first
    /// install) yields port 0 and no integrations.
    pub fn from_record(
        app: &str,
        record: Option<&AppRecord>,
        data_dir: PathBuf,
        shared_dir: PathBuf,
    ) -> Self {
        let (port, integrations) = match record {
            Some(r) => (
                r.port,
                r.integration_config
                    .iter()
                    .map(|(key, providers)| (key.clone(), split_providers(providers)))
                    .collect(),
            ),
            None => (0, BTreeMap::new()),
        };
        Self {
            app: app.to_owned(),
            data_dir,
            shared_dir,
            port,
            integrations,
            options: BTreeMap::new(),
        }
    }

    pub fn providers(&self, integration: &str) -> &[String] {
        self.integrations
            .get(integration)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_integration(&self, integration: &str) -> bool {
        !self.providers(integration).is_empty()
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Multi-provider integrations are stored comma-separated.
fn split_providers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Configuration hooks for one managed app.
///
/// `pre_start` and `post_start` must be idempotent: running them again after a
/// success has no further effect.
pub trait Configurator: Send + Sync {
    /// The app this configurator belongs to.
    fn name(&self) -> &str;

    /// Before the container starts: directories, config files, certificates.
    fn pre_start(&self, state: &AppState) -> Result<(), HookError>;

    /// Block until the app accepts configuration calls, or time out.
    fn health_check(&self, state: &AppState) -> Result<(), HookError>;

    /// After a successful health check: API- or CLI-driven configuration.
    fn post_start(&self, state: &AppState) -> Result<(), HookError>;
}

/// Name to configurator lookup. Registration is last-write-wins.
#[derive(Default)]
pub struct ConfiguratorRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Configurator>>>,
}

impl ConfiguratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `configurator.name()`. Returns the entry it replaced.
    pub fn register(&self, configurator: Arc<dyn Configurator>) -> Option<Arc<dyn Configurator>> {
        let name = configurator.name().to_owned();
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), configurator);
        if previous.is_some() {
            tracing::debug!("configurator for {name} replaced");
        }
        previous
    }

    pub fn get(&self, app: &str) -> Option<Arc<dyn Configurator>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .cloned()
    }

    pub fn contains(&self, app: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(app)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
