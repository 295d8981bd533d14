//! Read-only access to per-app catalog metadata.

use bosun_schema::{parse_definition_file, AppDefinition, CatalogError};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub trait Catalog: Send + Sync {
    fn get(&self, app: &str) -> Option<&AppDefinition>;

    /// All definitions, ordered by name.
    fn list(&self) -> Vec<&AppDefinition>;

    fn contains(&self, app: &str) -> bool {
        self.get(app).is_some()
    }
}

/// A directory of `<app>.toml` definitions, loaded once.
#[derive(Debug, Default)]
pub struct FileCatalog {
    apps: BTreeMap<String, AppDefinition>,
}

impl FileCatalog {
    /// Load every `*.toml` in `dir`. A missing directory is an empty catalog.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let mut apps = BTreeMap::new();
        if !dir.exists() {
            debug!("catalog directory {} does not exist", dir.display());
            return Ok(Self { apps });
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let def = parse_definition_file(&path)?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem != def.name {
                return Err(CatalogError::Invalid {
                    app: def.name.clone(),
                    reason: format!("defined in {}, expected {}.toml", path.display(), def.name),
                });
            }
            apps.insert(def.name.clone(), def);
        }
        debug!("loaded {} catalog definitions from {}", apps.len(), dir.display());
        Ok(Self { apps })
    }
}

impl Catalog for FileCatalog {
    fn get(&self, app: &str) -> Option<&AppDefinition> {
        self.apps.get(app)
    }

    fn list(&self) -> Vec<&AppDefinition> {
        self.apps.values().collect()
    }
}

/// In-memory catalog, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    apps: BTreeMap<String, AppDefinition>,
}

impl StaticCatalog {
    pub fn new(defs: impl IntoIterator<Item = AppDefinition>) -> Self {
        Self {
            apps: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }
}

impl Catalog for StaticCatalog {
    fn get(&self, app: &str) -> Option<&AppDefinition> {
        self.apps.get(app)
    }

    fn list(&self) -> Vec<&AppDefinition> {
        self.apps.values().collect()
    }
}

/// Check integration choices against the app's declared slots.
///
/// Every chosen key must be declared, every provider must be listed as
/// compatible and exist in the catalog, single slots take one provider, and
/// every required slot must be filled. Multi slots take comma-separated
/// providers.
pub fn validate_integrations(
    def: &AppDefinition,
    choices: &BTreeMap<String, String>,
    catalog: &dyn Catalog,
) -> Result<(), CatalogError> {
    for (key, value) in choices {
        let spec = def
            .integrations
            .get(key)
            .ok_or_else(|| CatalogError::UnknownIntegration {
                app: def.name.clone(),
                key: key.clone(),
            })?;
        let providers: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if providers.len() > 1 && !spec.multi {
            return Err(CatalogError::Invalid {
                app: def.name.clone(),
                reason: format!("integration '{key}' takes a single provider"),
            });
        }
        for provider in providers {
            if !spec.compatible.iter().any(|c| c == provider) {
                return Err(CatalogError::IncompatibleProvider {
                    app: def.name.clone(),
                    key: key.clone(),
                    provider: provider.to_owned(),
                    compatible: spec.compatible.join(", "),
                });
            }
            if !catalog.contains(provider) {
                return Err(CatalogError::UnknownApp(provider.to_owned()));
            }
        }
    }

    for (key, spec) in &def.integrations {
        let filled = choices.get(key).is_some_and(|v| !v.trim().is_empty());
        if spec.required && !filled {
            return Err(CatalogError::MissingIntegration {
                app: def.name.clone(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}
