//! Orchestration engine for bosun.
//!
//! This crate drives the managed-app lifecycle. It holds the hook framework
//! (`Configurator`, `ConfiguratorRegistry`, `AppState`) and the bounded
//! readiness waits hooks share. It also holds the `Generator` that turns a
//! `Transaction` into generated configuration, the `ConfigApplier` seam to the
//! external apply step, and the `Orchestrator`. The orchestrator ties these
//! to the durable state in `bosun-store` for hook dispatch, reconcile, and
//! locked install/uninstall with rollback.

pub mod applier;
pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod configurators;
pub mod generator;
pub mod hooks;
pub mod idempotent;
pub mod lifecycle;
pub mod orchestrator;
pub mod readiness;

pub use applier::{applier_for, CommandApplier, ConfigApplier, NoopApplier};
pub use catalog::{validate_integrations, Catalog, FileCatalog, StaticCatalog};
pub use concurrency::{install_signal_handler, shutdown_requested, CancelToken, StoreLock};
pub use config::BosunConfig;
pub use configurators::{register_catalog_configurators, CatalogConfigurator};
pub use generator::{Generator, GeneratorSnapshot};
pub use hooks::{AppState, Configurator, ConfiguratorRegistry, HookError};
pub use idempotent::{plan_resource, ConflictPolicy, ResourceAction};
pub use lifecycle::validate_transition;
pub use orchestrator::{HookKind, InstallRequest, Orchestrator, ReconcileReport};
pub use readiness::{ReadinessError, WaitOptions};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Schema(#[from] bosun_schema::SchemaError),
    #[error(transparent)]
    Catalog(#[from] bosun_schema::CatalogError),
    #[error("store error: {0}")]
    Store(#[from] bosun_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] bosun_runtime::RuntimeError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("app not installed: {0}")]
    AppNotInstalled(String),
    #[error("app already installed: {0}")]
    AlreadyInstalled(String),
    #[error("invalid configuration file {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("configuration apply failed: {0}")]
    Apply(String),
    #[error("reconcile finished with {} failed app(s): {}", .0.len(), .0.join("; "))]
    Reconcile(Vec<String>),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
