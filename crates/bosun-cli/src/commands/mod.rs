pub mod completions;
pub mod configure;
pub mod generate;
pub mod history;
pub mod inspect;
pub mod install;
pub mod list;
pub mod man_pages;
pub mod plan;
pub mod secrets;
pub mod uninstall;

use bosun_core::{
    register_catalog_configurators, BosunConfig, CancelToken, ConfiguratorRegistry, CoreError,
    FileCatalog, Orchestrator,
};
use bosun_runtime::EngineClient;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// Messages with these prefixes exit with [`EXIT_VALIDATION_ERROR`].
pub const CATALOG_PREFIX: &str = "catalog error:";
pub const INVALID_PREFIX: &str = "invalid request:";

/// Resolved configuration plus output mode, shared by every command.
pub struct Context {
    pub config: BosunConfig,
    pub json: bool,
}

impl Context {
    pub fn load(
        config_path: Option<&Path>,
        state_dir: Option<PathBuf>,
        json: bool,
    ) -> Result<Self, String> {
        let path = BosunConfig::resolve_path(config_path);
        let mut config = BosunConfig::load(&path).map_err(|e| e.to_string())?;
        if let Some(dir) = state_dir {
            config = config.with_state_dir(dir);
        }
        Ok(Self { config, json })
    }

    /// Catalog, default configurators, and (when its socket exists) the
    /// container engine, wired into one orchestrator.
    pub fn orchestrator(&self) -> Result<Orchestrator, String> {
        let catalog = FileCatalog::load(&self.config.catalog_dir)
            .map_err(|e| format!("{CATALOG_PREFIX} {e}"))?;
        let cancel = CancelToken::new();
        let registry = ConfiguratorRegistry::new();
        let registered = register_catalog_configurators(&registry, &catalog, &cancel);
        tracing::debug!("{registered} catalog configurator(s) registered");

        let mut orch = Orchestrator::new(self.config.clone(), Arc::new(catalog), Arc::new(registry))
            .with_cancel(cancel);
        if self.config.engine_socket.exists() {
            let engine =
                EngineClient::new(&self.config.engine_socket).map_err(|e| e.to_string())?;
            orch = orch.with_runtime(Arc::new(engine));
        }
        Ok(orch)
    }
}

/// Render a core error for `main`'s exit-code mapping.
pub fn describe(e: &CoreError) -> String {
    match e {
        CoreError::Catalog(_) | CoreError::Schema(_) => format!("{CATALOG_PREFIX} {e}"),
        CoreError::AlreadyInstalled(_)
        | CoreError::AppNotInstalled(_)
        | CoreError::InvalidTransition { .. } => format!("{INVALID_PREFIX} {e}"),
        _ => e.to_string(),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" => Style::new().green().apply_to(status).to_string(),
        "starting" | "installing" => Style::new().cyan().apply_to(status).to_string(),
        "stopped" => Style::new().dim().apply_to(status).to_string(),
        "error" | "failed" => Style::new().red().bold().apply_to(status).to_string(),
        "uninstalling" => Style::new().yellow().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

/// Run `f` under a spinner unless JSON output was requested.
pub fn with_spinner<T>(
    json: bool,
    running: &str,
    done: &str,
    failed: &str,
    f: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    let pb = if json { None } else { Some(spinner(running)) };
    match f() {
        Ok(v) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
            Ok(v)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, failed);
            }
            Err(describe(&e))
        }
    }
}
