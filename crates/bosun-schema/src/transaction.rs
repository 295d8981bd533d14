use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of a single app inside a [`Transaction`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppIntent {
    pub enabled: bool,
    /// Integration slot → chosen provider app, e.g. `downloadClient → qbittorrent`.
    #[serde(default)]
    pub integrations: BTreeMap<String, String>,
}

impl AppIntent {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            integrations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_integration(mut self, key: &str, provider: &str) -> Self {
        self.integrations.insert(key.to_owned(), provider.to_owned());
        self
    }
}

/// The complete desired configuration: app name → [`AppIntent`].
///
/// A transaction is a plain value. Backed by a `BTreeMap`, so every
/// iteration, serialization and generated artifact is ordered by app name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Transaction {
    apps: BTreeMap<String, AppIntent>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, intent: AppIntent) {
        self.apps.insert(name.into(), intent);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, intent: AppIntent) -> Self {
        self.insert(name, intent);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<AppIntent> {
        self.apps.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AppIntent> {
        self.apps.get(name)
    }

    /// An app absent from the transaction counts as disabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.apps.get(name).is_some_and(|a| a.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AppIntent)> {
        self.apps.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Enabled apps in ascending name order.
    pub fn enabled_apps(&self) -> impl Iterator<Item = (&str, &AppIntent)> {
        self.iter().filter(|(_, intent)| intent.enabled)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn from_json(input: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Pretty JSON with a trailing newline; identical transactions always
    /// serialize to identical bytes.
    pub fn to_json(&self) -> Result<String, SchemaError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}
