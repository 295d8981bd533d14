//! End-to-end orchestration against a temp state directory.

use bosun_core::{
    AppState, BosunConfig, ConfigApplier, Configurator, ConfiguratorRegistry, CoreError,
    HookError, HookKind, InstallRequest, Orchestrator, StaticCatalog,
};
use bosun_runtime::{ContainerRuntime, ContainerSpec, ContainerState, MockRuntime};
use bosun_schema::{parse_definition_str, CatalogError, ConfigDiff};
use bosun_store::{AppStatus, AttemptStatus, SecretStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tiny_http::{Response, Server};

const CATALOG: &[&str] = &[
    r#"
name = "miniflux"
display_name = "Miniflux"
version = "2.1.0"
port = 8080
needs_database = true
"#,
    r#"
name = "jellyfin"
port = 8096
needs_oauth = true
[integrations.sso]
compatible = ["authentik"]
"#,
    r#"
name = "authentik"
port = 9000
is_system = true
"#,
    r#"
name = "radarr"
port = 7878
[integrations.downloadClient]
required = true
compatible = ["qbittorrent"]
"#,
    r#"
name = "qbittorrent"
port = 8081
"#,
];

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::new(
        CATALOG.iter().map(|t| parse_definition_str(t).unwrap()),
    ))
}

fn config(root: &Path) -> BosunConfig {
    let mut cfg = BosunConfig::default().with_state_dir(root.join("state"));
    cfg.app_data_dir = root.join("apps");
    cfg.shared_data_dir = root.join("shared");
    cfg.generated_config = root.join("generated/apps.nix");
    cfg.sso.timeout_secs = 1;
    cfg.sso.interval_ms = 20;
    cfg
}

fn orchestrator(root: &Path, registry: Arc<ConfiguratorRegistry>) -> Orchestrator {
    Orchestrator::new(config(root), catalog(), registry)
}

fn plain(root: &Path) -> Orchestrator {
    orchestrator(root, Arc::new(ConfiguratorRegistry::new()))
}

fn status(orch: &Orchestrator, app: &str) -> Option<AppStatus> {
    orch.records().get(app).unwrap().map(|r| r.status)
}

struct FailingApplier;

impl ConfigApplier for FailingApplier {
    fn name(&self) -> &str {
        "failing"
    }

    fn apply(&self, _: &Path) -> Result<(), CoreError> {
        Err(CoreError::Apply("switch failed: exit status 1".to_owned()))
    }
}

/// Records every hook call; individual steps can be made to fail.
struct Recorder {
    app: &'static str,
    calls: Mutex<Vec<String>>,
    fail_pre: AtomicBool,
    fail_health: AtomicBool,
    fail_post: AtomicBool,
}

impl Recorder {
    fn new(app: &'static str) -> Arc<Self> {
        Arc::new(Self {
            app,
            calls: Mutex::new(Vec::new()),
            fail_pre: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
            fail_post: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn step(&self, step: &'static str, fail: &AtomicBool) -> Result<(), HookError> {
        self.calls.lock().unwrap().push(step.to_owned());
        if fail.load(Ordering::SeqCst) {
            Err(HookError::Failed {
                app: self.app.to_owned(),
                step,
                reason: "scripted failure".to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

impl Configurator for Recorder {
    fn name(&self) -> &str {
        self.app
    }

    fn pre_start(&self, state: &AppState) -> Result<(), HookError> {
        assert_eq!(state.app, self.app);
        self.step("pre_start", &self.fail_pre)
    }

    fn health_check(&self, _: &AppState) -> Result<(), HookError> {
        self.step("health_check", &self.fail_health)
    }

    fn post_start(&self, _: &AppState) -> Result<(), HookError> {
        self.step("post_start", &self.fail_post)
    }
}

fn registry_with(recorders: &[Arc<Recorder>]) -> Arc<ConfiguratorRegistry> {
    let registry = ConfiguratorRegistry::new();
    for r in recorders {
        registry.register(Arc::clone(r) as Arc<dyn Configurator>);
    }
    Arc::new(registry)
}

/// Discovery endpoint that answers 404 until `ready` is set.
struct FakeIdp {
    server: Arc<Server>,
    ready: Arc<AtomicBool>,
    url: String,
}

impl FakeIdp {
    fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        let ready = Arc::new(AtomicBool::new(false));
        let (srv, flag) = (Arc::clone(&server), Arc::clone(&ready));
        std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                let app = request
                    .url()
                    .trim_start_matches("/application/o/")
                    .trim_end_matches("/.well-known/openid-configuration")
                    .to_owned();
                let response = if flag.load(Ordering::SeqCst) {
                    Response::from_string(format!(
                        r#"{{"issuer": "http://auth.test/application/o/{app}/"}}"#
                    ))
                } else {
                    Response::from_string("").with_status_code(404)
                };
                let _ = request.respond(response);
            }
        });
        Self {
            server,
            ready,
            url: format!("http://127.0.0.1:{port}/application/o/{{app}}/.well-known/openid-configuration"),
        }
    }
}

impl Drop for FakeIdp {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn generated(root: &Path) -> PathBuf {
    root.join("generated/apps.nix")
}

// -- install / plan ----------------------------------------------------------

#[test]
fn install_writes_config_and_leaves_clean_plan() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());

    let record = orch.install(&InstallRequest::new("miniflux")).unwrap();
    assert_eq!(record.display_name, "Miniflux");
    assert_eq!(record.port, 8080);
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Installing));

    let text = fs::read_to_string(generated(dir.path())).unwrap();
    assert!(text.contains("bosun.apps.miniflux.enable = true;"));
    assert_eq!(orch.plan().unwrap(), ConfigDiff::NoChanges);

    let env = fs::read_to_string(orch.layout().env_file("miniflux")).unwrap();
    assert!(env.contains("DB_NAME=miniflux"));
    assert!(env.contains("ADMIN_PASSWORD="));

    let attempts = orch.attempts().list().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].trigger, "install");
    assert_eq!(attempts[0].status, AttemptStatus::Success);
}

#[test]
fn install_records_integrations_in_generated_config() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());
    orch.install(&InstallRequest::new("qbittorrent")).unwrap();
    orch.install(&InstallRequest::new("radarr").with_integration("downloadClient", "qbittorrent"))
        .unwrap();

    let text = fs::read_to_string(generated(dir.path())).unwrap();
    assert!(text.contains(r#"bosun.apps.radarr.integrations.downloadClient = "qbittorrent";"#));
    let record = orch.records().get("radarr").unwrap().unwrap();
    assert_eq!(record.integration_config["downloadClient"], "qbittorrent");
}

#[test]
fn install_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());

    let err = orch.install(&InstallRequest::new("nextcloud")).unwrap_err();
    assert!(matches!(err, CoreError::Catalog(CatalogError::UnknownApp(_))));

    let err = orch.install(&InstallRequest::new("radarr")).unwrap_err();
    assert!(matches!(err, CoreError::Catalog(CatalogError::MissingIntegration { .. })));

    let err = orch
        .install(&InstallRequest::new("radarr").with_integration("downloadClient", "miniflux"))
        .unwrap_err();
    assert!(matches!(err, CoreError::Catalog(CatalogError::IncompatibleProvider { .. })));

    assert!(orch.install(&InstallRequest::new("../etc")).is_err());
    assert!(orch.records().list().unwrap().is_empty());
    assert!(!generated(dir.path()).exists());
}

#[test]
fn second_install_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());
    orch.install(&InstallRequest::new("miniflux")).unwrap();
    let err = orch.install(&InstallRequest::new("miniflux")).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyInstalled(_)));
}

#[test]
fn failed_apply_restores_config_and_marks_error() {
    let dir = tempfile::tempdir().unwrap();
    plain(dir.path()).install(&InstallRequest::new("miniflux")).unwrap();
    let before = fs::read_to_string(generated(dir.path())).unwrap();

    let failing = plain(dir.path()).with_applier(Box::new(FailingApplier));
    let err = failing.install(&InstallRequest::new("qbittorrent")).unwrap_err();
    assert!(matches!(err, CoreError::Apply(_)));

    assert_eq!(fs::read_to_string(generated(dir.path())).unwrap(), before);
    assert_eq!(status(&failing, "qbittorrent"), Some(AppStatus::Error));
    let last = failing.attempts().list().unwrap().pop().unwrap();
    assert_eq!(last.status, AttemptStatus::Failed);
    assert!(last.error.unwrap().contains("switch failed"));

    // A record left in Error can be installed again.
    let orch = plain(dir.path());
    orch.install(&InstallRequest::new("qbittorrent")).unwrap();
    assert_eq!(status(&orch, "qbittorrent"), Some(AppStatus::Installing));
}

#[test]
fn failed_install_stays_out_of_later_applies_and_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let failing = plain(dir.path()).with_applier(Box::new(FailingApplier));
    failing.install(&InstallRequest::new("qbittorrent")).unwrap_err();

    let orch = plain(dir.path());
    assert_eq!(orch.plan().unwrap(), ConfigDiff::NoChanges);

    let record = orch.install(&InstallRequest::new("miniflux")).unwrap();
    assert!(record.applied);
    let config = fs::read_to_string(generated(dir.path())).unwrap();
    assert!(config.contains("miniflux"));
    assert!(!config.contains("qbittorrent"));

    orch.generate().unwrap();
    assert!(!fs::read_to_string(generated(dir.path())).unwrap().contains("qbittorrent"));

    let report = orch.reconcile().unwrap();
    assert_eq!(report.succeeded, ["miniflux"]);
    assert_eq!(report.skipped, ["qbittorrent"]);
    assert_eq!(status(&orch, "qbittorrent"), Some(AppStatus::Error));
    assert!(!orch.records().get("qbittorrent").unwrap().unwrap().applied);
}

#[test]
fn applied_app_that_fails_later_stays_declared() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());
    orch.install(&InstallRequest::new("miniflux")).unwrap();
    orch.records().set_status("miniflux", AppStatus::Failed).unwrap();

    assert_eq!(orch.plan().unwrap(), ConfigDiff::NoChanges);
    assert!(orch.propose_transaction().unwrap().is_enabled("miniflux"));
}

#[test]
fn generate_rewrites_config_without_touching_records() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());
    orch.install(&InstallRequest::new("miniflux")).unwrap();
    fs::remove_file(generated(dir.path())).unwrap();

    assert_eq!(orch.generate().unwrap(), ConfigDiff::NoChanges);
    assert!(generated(dir.path()).exists());
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Installing));
}

// -- uninstall ----------------------------------------------------------------

#[test]
fn uninstall_purges_record_secrets_env_and_container() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let orch = plain(dir.path()).with_runtime(Arc::clone(&runtime) as Arc<dyn ContainerRuntime>);

    orch.install(&InstallRequest::new("jellyfin")).unwrap();
    let env_file = orch.layout().env_file("jellyfin");
    assert!(fs::read_to_string(&env_file).unwrap().contains("OAUTH_CLIENT_SECRET="));
    let first_password = orch.open_secrets().unwrap().app_admin_password("jellyfin").unwrap();

    runtime.pull_image("docker.io/jellyfin/jellyfin:10.9").unwrap();
    runtime
        .create(&ContainerSpec {
            name: "jellyfin".to_owned(),
            image: "docker.io/jellyfin/jellyfin:10.9".to_owned(),
            ..ContainerSpec::default()
        })
        .unwrap();
    runtime.start("jellyfin").unwrap();
    assert_eq!(
        orch.container("jellyfin").unwrap().unwrap().state,
        ContainerState::Running
    );

    orch.uninstall("jellyfin").unwrap();

    assert!(orch.records().get("jellyfin").unwrap().is_none());
    assert!(!env_file.exists());
    assert!(orch.container("jellyfin").unwrap().is_none());
    let secrets = SecretStore::open(orch.layout().secrets_file()).unwrap();
    assert!(!secrets.snapshot().unwrap().apps.contains_key("jellyfin"));
    let text = fs::read_to_string(generated(dir.path())).unwrap();
    assert!(!text.contains("jellyfin"));

    let triggers: Vec<String> = orch
        .attempts()
        .list()
        .unwrap()
        .into_iter()
        .map(|a| a.trigger)
        .collect();
    assert_eq!(triggers, ["install", "uninstall"]);

    orch.install(&InstallRequest::new("jellyfin")).unwrap();
    let second_password = orch.open_secrets().unwrap().app_admin_password("jellyfin").unwrap();
    assert_ne!(first_password, second_password);
}

#[test]
fn uninstall_of_unknown_app_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = plain(dir.path()).uninstall("miniflux").unwrap_err();
    assert!(matches!(err, CoreError::AppNotInstalled(_)));
}

#[test]
fn failed_uninstall_keeps_record_and_config() {
    let dir = tempfile::tempdir().unwrap();
    plain(dir.path()).install(&InstallRequest::new("miniflux")).unwrap();
    let before = fs::read_to_string(generated(dir.path())).unwrap();

    let failing = plain(dir.path()).with_applier(Box::new(FailingApplier));
    assert!(failing.uninstall("miniflux").is_err());
    assert_eq!(fs::read_to_string(generated(dir.path())).unwrap(), before);
    assert_eq!(status(&failing, "miniflux"), Some(AppStatus::Error));
    assert!(failing.layout().env_file("miniflux").exists());
}

// -- hooks ----------------------------------------------------------------------

#[test]
fn hooks_without_configurator_only_track_status() {
    let dir = tempfile::tempdir().unwrap();
    let orch = plain(dir.path());

    // No record and no configurator: nothing to do.
    orch.dispatch(HookKind::PreStart, "miniflux").unwrap();
    assert!(orch.records().get("miniflux").unwrap().is_none());

    orch.install(&InstallRequest::new("miniflux")).unwrap();
    orch.dispatch(HookKind::PreStart, "miniflux").unwrap();
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Starting));
    orch.dispatch(HookKind::PostStart, "miniflux").unwrap();
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Running));
    orch.dispatch(HookKind::PostStop, "miniflux").unwrap();
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Stopped));
}

#[test]
fn hooks_run_configurator_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Recorder::new("miniflux");
    let orch = orchestrator(dir.path(), registry_with(&[Arc::clone(&rec)]));
    orch.install(&InstallRequest::new("miniflux")).unwrap();

    orch.prestart("miniflux").unwrap();
    orch.poststart("miniflux").unwrap();
    assert_eq!(rec.calls(), ["pre_start", "health_check", "post_start"]);
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Running));
}

#[test]
fn health_failure_marks_failed_and_skips_post_start() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Recorder::new("miniflux");
    rec.fail_health.store(true, Ordering::SeqCst);
    let orch = orchestrator(dir.path(), registry_with(&[Arc::clone(&rec)]));
    orch.install(&InstallRequest::new("miniflux")).unwrap();

    orch.prestart("miniflux").unwrap();
    let err = orch.poststart("miniflux").unwrap_err();
    assert!(matches!(err, CoreError::Hook(HookError::Failed { step: "health_check", .. })));
    assert_eq!(rec.calls(), ["pre_start", "health_check"]);
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Failed));
}

#[test]
fn configuration_failures_mark_error() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Recorder::new("miniflux");
    let orch = orchestrator(dir.path(), registry_with(&[Arc::clone(&rec)]));
    orch.install(&InstallRequest::new("miniflux")).unwrap();

    rec.fail_pre.store(true, Ordering::SeqCst);
    assert!(orch.prestart("miniflux").is_err());
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Error));

    rec.fail_pre.store(false, Ordering::SeqCst);
    rec.fail_post.store(true, Ordering::SeqCst);
    orch.prestart("miniflux").unwrap();
    assert!(orch.poststart("miniflux").is_err());
    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Error));
}

#[test]
fn prestart_blocks_until_sso_provider_is_ready() {
    let dir = tempfile::tempdir().unwrap();
    let idp = FakeIdp::start();
    let rec = Recorder::new("jellyfin");
    let mut cfg = config(dir.path());
    cfg.sso.discovery_url = idp.url.clone();
    let orch = Orchestrator::new(cfg, catalog(), registry_with(&[Arc::clone(&rec)]));

    orch.install(&InstallRequest::new("authentik")).unwrap();
    orch.install(&InstallRequest::new("jellyfin").with_integration("sso", "authentik"))
        .unwrap();

    let err = orch.prestart("jellyfin").unwrap_err();
    assert!(err.to_string().contains("HTTP 404"), "{err}");
    assert!(rec.calls().is_empty());
    assert_eq!(status(&orch, "jellyfin"), Some(AppStatus::Error));

    idp.ready.store(true, Ordering::SeqCst);
    orch.prestart("jellyfin").unwrap();
    assert_eq!(rec.calls(), ["pre_start"]);
    assert_eq!(status(&orch, "jellyfin"), Some(AppStatus::Starting));
}

#[test]
fn prestart_without_sso_integration_does_not_wait() {
    let dir = tempfile::tempdir().unwrap();
    let rec = Recorder::new("jellyfin");
    let mut cfg = config(dir.path());
    // Nothing listens here; waiting would time out.
    cfg.sso.discovery_url = "http://127.0.0.1:9/{app}".to_owned();
    let orch = Orchestrator::new(cfg, catalog(), registry_with(&[Arc::clone(&rec)]));
    orch.install(&InstallRequest::new("jellyfin")).unwrap();
    orch.prestart("jellyfin").unwrap();
    assert_eq!(rec.calls(), ["pre_start"]);
}

// -- reconcile -------------------------------------------------------------------

#[test]
fn reconcile_collects_failures_and_skips_stopped_apps() {
    let dir = tempfile::tempdir().unwrap();
    let good = Recorder::new("miniflux");
    let bad = Recorder::new("qbittorrent");
    bad.fail_health.store(true, Ordering::SeqCst);
    let idle = Recorder::new("authentik");
    let orch = orchestrator(
        dir.path(),
        registry_with(&[Arc::clone(&good), Arc::clone(&bad), Arc::clone(&idle)]),
    );
    for app in ["miniflux", "qbittorrent", "authentik"] {
        orch.install(&InstallRequest::new(app)).unwrap();
    }
    // Installing cannot move straight to Stopped; start it once first.
    orch.poststop("authentik").unwrap();
    assert_eq!(status(&orch, "authentik"), Some(AppStatus::Installing));
    orch.prestart("authentik").unwrap();
    orch.poststart("authentik").unwrap();
    orch.poststop("authentik").unwrap();
    assert_eq!(status(&orch, "authentik"), Some(AppStatus::Stopped));
    let idle_calls = idle.calls().len();

    let report = orch.reconcile().unwrap();
    assert_eq!(report.succeeded, ["miniflux"]);
    assert_eq!(report.skipped, ["authentik"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "qbittorrent");
    assert!(!report.is_success());
    assert_eq!(idle.calls().len(), idle_calls);

    assert_eq!(status(&orch, "miniflux"), Some(AppStatus::Running));
    assert_eq!(status(&orch, "qbittorrent"), Some(AppStatus::Failed));

    let last = orch.attempts().list().unwrap().pop().unwrap();
    assert_eq!(last.trigger, "reconcile");
    assert_eq!(last.status, AttemptStatus::Failed);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, CoreError::Reconcile(ref lines) if lines[0].starts_with("qbittorrent:")));
}

#[test]
fn reconcile_of_empty_store_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let report = plain(dir.path()).reconcile().unwrap();
    assert!(report.is_success());
    assert!(report.succeeded.is_empty());
}
