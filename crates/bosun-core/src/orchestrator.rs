use crate::applier::{applier_for, ConfigApplier};
use crate::catalog::{validate_integrations, Catalog};
use crate::concurrency::{CancelToken, StoreLock};
use crate::config::BosunConfig;
use crate::generator::Generator;
use crate::hooks::{AppState, ConfiguratorRegistry, HookError};
use crate::lifecycle::validate_transition;
use crate::readiness::{wait_for_sso, WaitOptions};
use crate::CoreError;
use bosun_runtime::{ContainerRuntime, ContainerSummary};
use bosun_schema::{validate_app_name, AppIntent, CatalogError, ConfigDiff, Transaction};
use bosun_store::{
    render_env_files, AppRecord, AppStatus, AttemptLog, AttemptStatus, EnvConsumer,
    FileRecordStore, RecordStore, SecretStore, StateLayout,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Integration key whose presence makes `prestart` wait for SSO readiness.
pub const SSO_INTEGRATION: &str = "sso";

const CONTAINER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreStart,
    PostStart,
    PostStop,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::PreStart => "prestart",
            HookKind::PostStart => "poststart",
            HookKind::PostStop => "poststop",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    pub app: String,
    /// Integration slot to provider; multi slots are comma-separated.
    pub integrations: BTreeMap<String, String>,
}

impl InstallRequest {
    pub fn new(app: &str) -> Self {
        Self {
            app: app.to_owned(),
            integrations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_integration(mut self, key: &str, provider: &str) -> Self {
        self.integrations
            .insert(key.to_owned(), provider.to_owned());
        self
    }
}

/// Outcome of a reconcile sweep. Failures are collected, not fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::Reconcile(
                self.failed
                    .into_iter()
                    .map(|(app, e)| format!("{app}: {e}"))
                    .collect(),
            ))
        }
    }
}

/// Drives hook dispatch, reconcile, and install/uninstall.
///
/// Hook invocations run in short-lived processes, so every operation reloads
/// records and secrets from disk. Install and uninstall hold the state lock
/// for their whole duration and roll the generated configuration back if the
/// external apply step fails.
pub struct Orchestrator {
    config: BosunConfig,
    layout: StateLayout,
    records: Arc<dyn RecordStore>,
    registry: Arc<ConfiguratorRegistry>,
    catalog: Arc<dyn Catalog>,
    generator: Generator,
    applier: Box<dyn ConfigApplier>,
    attempts: AttemptLog,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        config: BosunConfig,
        catalog: Arc<dyn Catalog>,
        registry: Arc<ConfiguratorRegistry>,
    ) -> Self {
        let layout = config.layout();
        Self {
            records: Arc::new(FileRecordStore::new(layout.clone())),
            generator: Generator::new(&config.generated_config, layout.transaction_file()),
            applier: applier_for(&config.apply_command),
            attempts: AttemptLog::new(layout.attempts_file()),
            runtime: None,
            cancel: CancelToken::new(),
            layout,
            registry,
            catalog,
            config,
        }
    }

    #[must_use]
    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = records;
        self
    }

    #[must_use]
    pub fn with_applier(mut self, applier: Box<dyn ConfigApplier>) -> Self {
        self.applier = applier;
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BosunConfig {
        &self.config
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn registry(&self) -> &ConfiguratorRegistry {
        &self.registry
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn attempts(&self) -> &AttemptLog {
        &self.attempts
    }

    /// The app's container as the engine sees it. `None` without a runtime.
    pub fn container(&self, app: &str) -> Result<Option<ContainerSummary>, CoreError> {
        match &self.runtime {
            Some(rt) => Ok(rt.get(app)?),
            None => Ok(None),
        }
    }

    /// Remove a container the apply step left behind.
    fn remove_leftover_container(&self, app: &str) {
        let Some(rt) = &self.runtime else {
            return;
        };
        match rt.get(app) {
            Ok(Some(c)) => {
                info!("{app}: removing leftover container {}", c.id);
                if let Err(e) = rt
                    .stop(app, CONTAINER_STOP_TIMEOUT)
                    .and_then(|()| rt.remove(app, true))
                {
                    warn!("{app}: could not remove container: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{app}: could not inspect container: {e}"),
        }
    }

    pub fn open_secrets(&self) -> Result<SecretStore, CoreError> {
        Ok(SecretStore::open(self.layout.secrets_file())?)
    }

    // -- hook dispatch ----------------------------------------------------

    pub fn dispatch(&self, kind: HookKind, app: &str) -> Result<(), CoreError> {
        match kind {
            HookKind::PreStart => self.prestart(app),
            HookKind::PostStart => self.poststart(app),
            HookKind::PostStop => self.poststop(app),
        }
    }

    fn app_state(&self, app: &str, record: Option<&AppRecord>) -> AppState {
        AppState::from_record(
            app,
            record,
            self.config.app_data_path(app),
            self.config.shared_data_dir.clone(),
        )
    }

    /// Before the container starts. Waits for SSO readiness first when the
    /// record selects an `sso` provider.
    pub fn prestart(&self, app: &str) -> Result<(), CoreError> {
        validate_app_name(app)?;
        let record = self.records.get(app)?;
        self.transition(app, AppStatus::Starting)?;

        let Some(configurator) = self.registry.get(app) else {
            debug!("{app}: no configurator registered, prestart is a no-op");
            return Ok(());
        };
        let state = self.app_state(app, record.as_ref());

        let wants_sso = record
            .as_ref()
            .is_some_and(|r| r.integration_config.contains_key(SSO_INTEGRATION));
        if wants_sso {
            let url = self.config.sso_discovery_url(app);
            info!("{app}: waiting for SSO provider at {url}");
            let opts = WaitOptions::new(self.config.sso_timeout(), self.config.sso_interval())
                .with_cancel(self.cancel.clone());
            if let Err(e) = wait_for_sso(&url, &opts) {
                self.fail(app, AppStatus::Error);
                return Err(HookError::from(e).into());
            }
        }

        if let Err(e) = configurator.pre_start(&state) {
            error!("{app}: prestart failed: {e}");
            self.fail(app, AppStatus::Error);
            return Err(e.into());
        }
        info!("{app}: prestart complete");
        Ok(())
    }

    /// After the container starts: health check, then post-start configuration.
    pub fn poststart(&self, app: &str) -> Result<(), CoreError> {
        validate_app_name(app)?;
        let record = self.records.get(app)?;

        if let Some(configurator) = self.registry.get(app) {
            let state = self.app_state(app, record.as_ref());
            if let Err(e) = configurator.health_check(&state) {
                error!("{app}: health check failed: {e}");
                self.fail(app, AppStatus::Failed);
                return Err(e.into());
            }
            if let Err(e) = configurator.post_start(&state) {
                error!("{app}: poststart failed: {e}");
                self.fail(app, AppStatus::Error);
                return Err(e.into());
            }
            info!("{app}: poststart complete");
        } else {
            debug!("{app}: no configurator registered, poststart is a no-op");
        }
        self.transition(app, AppStatus::Running)
    }

    /// The container was stopped outside bosun.
    pub fn poststop(&self, app: &str) -> Result<(), CoreError> {
        validate_app_name(app)?;
        self.transition(app, AppStatus::Stopped)
    }

    /// Move the record to `to`. No record, or a transition the table rejects,
    /// is logged and skipped.
    fn transition(&self, app: &str, to: AppStatus) -> Result<(), CoreError> {
        let Some(record) = self.records.get(app)? else {
            debug!("{app}: no record, status {to} not recorded");
            return Ok(());
        };
        if let Err(e) = validate_transition(record.status, to) {
            warn!("{app}: {e}, leaving status unchanged");
            return Ok(());
        }
        if record.status != to {
            self.records.set_status(app, to)?;
            debug!("{app}: {} -> {to}", record.status);
        }
        Ok(())
    }

    /// Best-effort failure marking on an error path that is already returning.
    fn fail(&self, app: &str, to: AppStatus) {
        if let Err(e) = self.transition(app, to) {
            warn!("{app}: could not record status {to}: {e}");
        }
    }

    // -- reconcile ---------------------------------------------------------

    /// Re-run prestart and poststart for every installed, not stopped app.
    /// One app failing does not stop the sweep.
    pub fn reconcile(&self) -> Result<ReconcileReport, CoreError> {
        let attempt = self.attempts.begin("reconcile", None, None)?;
        let mut report = ReconcileReport::default();

        for record in self.records.list()? {
            let app = record.name.to_string();
            if self.cancel.is_cancelled() {
                warn!("reconcile cancelled before {app}");
                report.cancelled = true;
                break;
            }
            if !record.is_declared() || record.status == AppStatus::Stopped {
                debug!("reconcile: skipping {app} ({})", record.status);
                report.skipped.push(app);
                continue;
            }
            match self.prestart(&app).and_then(|()| self.poststart(&app)) {
                Ok(()) => report.succeeded.push(app),
                Err(e) => {
                    warn!("reconcile: {app} failed: {e}");
                    report.failed.push((app, e.to_string()));
                }
            }
        }

        let (status, error) = if report.is_success() {
            (AttemptStatus::Success, None)
        } else if report.cancelled {
            (AttemptStatus::Failed, Some("cancelled".to_owned()))
        } else {
            (
                AttemptStatus::Failed,
                Some(format!("{} app(s) failed", report.failed.len())),
            )
        };
        self.attempts.finish(&attempt, status, error.as_deref())?;
        info!(
            "reconcile: {} ok, {} failed, {} skipped",
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    // -- desired state -----------------------------------------------------

    /// The transaction implied by the current records. Records being
    /// uninstalled and failed installs that never applied are left out.
    pub fn propose_transaction(&self) -> Result<Transaction, CoreError> {
        let mut tx = Transaction::new();
        for record in self.records.list()? {
            if !record.is_declared() {
                continue;
            }
            tx.insert(
                record.name.to_string(),
                AppIntent {
                    enabled: true,
                    integrations: record.integration_config.clone(),
                },
            );
        }
        Ok(tx)
    }

    /// What the next apply would change.
    pub fn plan(&self) -> Result<ConfigDiff, CoreError> {
        self.generator.diff(&self.propose_transaction()?)
    }

    /// Regenerate and apply without changing any record.
    pub fn generate(&self) -> Result<ConfigDiff, CoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let snapshot = self.generator.snapshot()?;
        let diff = self.generator.apply(&self.propose_transaction()?)?;
        if let Err(e) = self.applier.apply(self.generator.output_path()) {
            self.rollback(&snapshot);
            return Err(e);
        }
        Ok(diff)
    }

    fn env_consumers(&self) -> Result<Vec<EnvConsumer>, CoreError> {
        let mut consumers = Vec::new();
        for record in self.records.list()? {
            if !record.is_declared() {
                continue;
            }
            match self.catalog.get(&record.name) {
                Some(def) => consumers.push(EnvConsumer {
                    app: def.name.clone(),
                    network: def.network,
                    needs_database: def.needs_database,
                    needs_oauth: def.needs_oauth,
                }),
                None => warn!("{}: not in catalog, no env file rendered", record.name),
            }
        }
        Ok(consumers)
    }

    /// Render every env file from the secret bundle and current records.
    pub fn render_secrets(&self) -> Result<Vec<std::path::PathBuf>, CoreError> {
        let secrets = self.open_secrets()?;
        Ok(render_env_files(
            &secrets,
            &self.layout.env_dir(),
            &self.config.datastore_endpoint(),
            &self.env_consumers()?,
        )?)
    }

    fn rollback(&self, snapshot: &crate::generator::GeneratorSnapshot) {
        if let Err(e) = self.generator.restore(snapshot) {
            error!("rollback of generated configuration failed: {e}");
        }
    }

    // -- install / uninstall -------------------------------------------------

    pub fn install(&self, req: &InstallRequest) -> Result<AppRecord, CoreError> {
        validate_app_name(&req.app)?;
        let def = self
            .catalog
            .get(&req.app)
            .ok_or_else(|| CatalogError::UnknownApp(req.app.clone()))?;
        validate_integrations(def, &req.integrations, self.catalog.as_ref())?;

        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        self.layout.initialize()?;
        self.attempts.recover_interrupted()?;

        let existing = self.records.get(&req.app)?;
        if let Some(r) = &existing {
            if !matches!(r.status, AppStatus::Error | AppStatus::Failed) {
                return Err(CoreError::AlreadyInstalled(req.app.clone()));
            }
        }

        let attempt = self.attempts.begin("install", Some(&req.app), None)?;
        info!("installing {}", req.app);

        let mut record = existing.unwrap_or_else(|| {
            AppRecord::new(&def.name, def.title(), &def.version, def.port)
        });
        record.status = AppStatus::Installing;
        record.display_name = def.title().to_owned();
        record.version.clone_from(&def.version);
        record.port = def.port;
        record.is_system = def.is_system;
        record.integration_config.clone_from(&req.integrations);
        record.touch();

        let result = self.records.put(&record).map_err(CoreError::from).and_then(|()| {
            let snapshot = self.generator.snapshot()?;
            let diff = self.apply_with_rollback(&snapshot)?;
            record.applied = true;
            self.records.put(&record)?;
            Ok(diff)
        });

        match result {
            Ok(diff) => {
                self.attempts.finish(&attempt, AttemptStatus::Success, None)?;
                info!("installed {} ({})", req.app, diff);
                Ok(record)
            }
            Err(e) => {
                error!("install of {} failed: {e}", req.app);
                self.fail(&req.app, AppStatus::Error);
                self.attempts
                    .finish(&attempt, AttemptStatus::Failed, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Render env files, write the configuration, hand it to the applier.
    /// On any failure the generated configuration is restored.
    fn apply_with_rollback(
        &self,
        snapshot: &crate::generator::GeneratorSnapshot,
    ) -> Result<ConfigDiff, CoreError> {
        let outcome = self.render_secrets().and_then(|_| {
            let diff = self.generator.apply(&self.propose_transaction()?)?;
            self.applier.apply(self.generator.output_path())?;
            Ok(diff)
        });
        if outcome.is_err() {
            self.rollback(snapshot);
        }
        outcome
    }

    /// Remove an app. On success the record is purged and its secrets and
    /// env file deleted; the attempt log keeps the history.
    pub fn uninstall(&self, app: &str) -> Result<(), CoreError> {
        validate_app_name(app)?;
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        self.attempts.recover_interrupted()?;

        let record = self
            .records
            .get(app)?
            .ok_or_else(|| CoreError::AppNotInstalled(app.to_owned()))?;
        validate_transition(record.status, AppStatus::Uninstalling)?;

        let attempt = self.attempts.begin("uninstall", Some(app), None)?;
        info!("uninstalling {app}");

        let result = self.uninstall_locked(app);
        match &result {
            Ok(()) => {
                self.attempts.finish(&attempt, AttemptStatus::Success, None)?;
                info!("uninstalled {app}");
            }
            Err(e) => {
                error!("uninstall of {app} failed: {e}");
                self.attempts
                    .finish(&attempt, AttemptStatus::Failed, Some(&e.to_string()))?;
            }
        }
        result
    }

    fn uninstall_locked(&self, app: &str) -> Result<(), CoreError> {
        let snapshot = self.generator.snapshot()?;
        self.records.set_status(app, AppStatus::Uninstalling)?;

        let applied = self.generator.apply(&self.propose_transaction()?).and_then(|_| {
            self.applier.apply(self.generator.output_path())
        });
        if let Err(e) = applied {
            self.rollback(&snapshot);
            self.fail(app, AppStatus::Error);
            return Err(e);
        }

        self.records.remove(app)?;
        self.remove_leftover_container(app);
        let secrets = self.open_secrets()?;
        secrets.delete_app(app)?;
        render_env_files(
            &secrets,
            &self.layout.env_dir(),
            &self.config.datastore_endpoint(),
            &self.env_consumers()?,
        )?;
        Ok(())
    }
}
