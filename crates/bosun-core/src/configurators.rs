use crate::catalog::Catalog;
use crate::concurrency::CancelToken;
use crate::hooks::{AppState, Configurator, ConfiguratorRegistry, HookError};
use crate::readiness::{wait_for_http, wait_for_http_tolerant, wait_for_tcp, WaitOptions};
use bosun_schema::{AppDefinition, HealthMode, HealthSection};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default hooks for a catalog app with a `[health]` section: create the data
/// directory before start, then wait for the declared health endpoint.
pub struct CatalogConfigurator {
    name: String,
    default_port: u16,
    health: HealthSection,
    cancel: CancelToken,
}

impl CatalogConfigurator {
    /// `None` when the definition declares no health check.
    pub fn from_definition(def: &AppDefinition) -> Option<Self> {
        def.health.as_ref().map(|health| Self {
            name: def.name.clone(),
            default_port: def.port,
            health: health.clone(),
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn port(&self, state: &AppState) -> u16 {
        if state.port == 0 {
            self.default_port
        } else {
            state.port
        }
    }

    fn wait_options(&self) -> WaitOptions {
        WaitOptions::new(
            Duration::from_secs(self.health.timeout_secs),
            Duration::from_millis(self.health.interval_ms),
        )
        .with_cancel(self.cancel.clone())
    }
}

impl Configurator for CatalogConfigurator {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_start(&self, state: &AppState) -> Result<(), HookError> {
        std::fs::create_dir_all(&state.data_dir).map_err(|source| HookError::Io {
            op: "create data directory",
            path: state.data_dir.clone(),
            source,
        })?;
        debug!("{}: data directory {} ready", self.name, state.data_dir.display());
        Ok(())
    }

    fn health_check(&self, state: &AppState) -> Result<(), HookError> {
        let port = self.port(state);
        if port == 0 {
            return Err(HookError::Failed {
                app: self.name.clone(),
                step: "health check",
                reason: "no port known".to_owned(),
            });
        }
        let opts = self.wait_options();
        match self.health.mode {
            HealthMode::Strict => {
                wait_for_http(&format!("http://127.0.0.1:{port}{}", self.health.path), &opts)?;
            }
            HealthMode::Tolerant => {
                wait_for_http_tolerant(
                    &format!("http://127.0.0.1:{port}{}", self.health.path),
                    &opts,
                )?;
            }
            HealthMode::Tcp => wait_for_tcp(&format!("127.0.0.1:{port}"), &opts)?,
        }
        Ok(())
    }

    fn post_start(&self, _state: &AppState) -> Result<(), HookError> {
        Ok(())
    }
}

/// Register a [`CatalogConfigurator`] for every catalog app that declares a
/// health check. Returns how many were registered.
pub fn register_catalog_configurators(
    registry: &ConfiguratorRegistry,
    catalog: &dyn Catalog,
    cancel: &CancelToken,
) -> usize {
    let mut count = 0;
    for def in catalog.list() {
        if let Some(c) = CatalogConfigurator::from_definition(def) {
            registry.register(Arc::new(c.with_cancel(cancel.clone())));
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use bosun_schema::parse_definition_str;

    fn def(toml: &str) -> AppDefinition {
        parse_definition_str(toml).unwrap()
    }

    #[test]
    fn only_apps_with_health_get_a_configurator() {
        let catalog = StaticCatalog::new([
            def("name = \"radarr\"\nport = 7878\n[health]\npath = \"/ping\"\n"),
            def("name = \"plain\"\n"),
        ]);
        let registry = ConfiguratorRegistry::new();
        let n = register_catalog_configurators(&registry, &catalog, &CancelToken::new());
        assert_eq!(n, 1);
        assert_eq!(registry.names(), vec!["radarr"]);
    }

    #[test]
    fn pre_start_creates_data_dir_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let c = CatalogConfigurator::from_definition(&def(
            "name = \"radarr\"\n[health]\nmode = \"tcp\"\n",
        ))
        .unwrap();
        let state = AppState {
            app: "radarr".to_owned(),
            data_dir: dir.path().join("apps/radarr"),
            ..AppState::default()
        };
        c.pre_start(&state).unwrap();
        c.pre_start(&state).unwrap();
        assert!(state.data_dir.is_dir());
    }

    #[test]
    fn tcp_health_uses_record_port_over_catalog_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let c = CatalogConfigurator::from_definition(&def(
            "name = \"radarr\"\nport = 1\n[health]\nmode = \"tcp\"\ntimeout_secs = 2\ninterval_ms = 50\n",
        ))
        .unwrap();
        let state = AppState {
            app: "radarr".to_owned(),
            port,
            ..AppState::default()
        };
        c.health_check(&state).unwrap();
    }

    #[test]
    fn health_without_port_fails() {
        let c = CatalogConfigurator::from_definition(&def("name = \"radarr\"\n[health]\n")).unwrap();
        assert!(c.health_check(&AppState::default()).is_err());
    }
}
