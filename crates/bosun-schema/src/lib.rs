//! Data model and declarative configuration generation for bosun.
//!
//! This crate defines the pure layer of the control plane: the `AppName`
//! identifier, the desired-state `Transaction` (app → enabled flag and
//! integration choices), TOML catalog definitions (`AppDefinition`), the
//! deterministic configuration generator (`generate_config`), and the
//! human-readable transaction diff (`diff_transactions`).

pub mod catalog;
pub mod diff;
pub mod generate;
pub mod transaction;
pub mod types;

pub use catalog::{
    parse_definition_file, parse_definition_str, AppDefinition, CatalogError, HealthMode,
    HealthSection, IntegrationSpec, NetworkMode,
};
pub use diff::{diff_transactions, ConfigDiff, NO_CHANGES};
pub use generate::{generate_config, GENERATED_MARKER};
pub use transaction::{AppIntent, Transaction};
pub use types::{validate_app_name, AppName};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid app name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
