//! Long-lived bosun server.
//!
//! Serves the app list, install/uninstall, the pending configuration plan,
//! and cached host metrics over plain HTTP, plus a server-sent event stream
//! that pushes the full app list whenever it changes. All state is owned by
//! [`AppServer`] and torn down when [`AppServer::run`] returns.
//!
//! Hook invocations run in separate processes and change app records behind
//! the server's back, so the metrics ticker also re-reads the records on
//! every tick and publishes the list when it differs from the last one sent.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

pub mod events;
pub mod metrics;

pub use events::EventHub;
pub use metrics::{MetricsTicker, SystemStats};

use bosun_core::{shutdown_requested, CoreError, InstallRequest, Orchestrator};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// State shared by the request loop, event streams, and the ticker.
pub struct ServerState {
    orchestrator: Orchestrator,
    hub: EventHub,
    stats: Arc<RwLock<SystemStats>>,
    last_published: Mutex<Option<String>>,
}

impl ServerState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            hub: EventHub::default(),
            stats: Arc::new(RwLock::new(SystemStats::default())),
            last_published: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn stats(&self) -> SystemStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn apps_json(&self) -> Result<String, CoreError> {
        let records = self.orchestrator.records().list()?;
        Ok(serde_json::to_string(&records)?)
    }

    /// Broadcast the app list if it differs from the last one published.
    pub fn publish_if_changed(&self) -> bool {
        let json = match self.apps_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("cannot read app records: {e}");
                return false;
            }
        };
        let mut last = self
            .last_published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(json.as_str()) {
            return false;
        }
        let delivered = self.hub.broadcast(&json);
        debug!("app list changed, sent to {delivered} stream(s)");
        *last = Some(json);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Health,
    Apps,
    AppEvents,
    Stats,
    Plan,
    Install(String),
    Uninstall(String),
    MethodNotAllowed,
    NotFound,
}

fn route(method: &Method, url: &str) -> Route {
    let path = url.split('?').next().unwrap_or_default();
    let get = *method == Method::Get;
    let post = *method == Method::Post;
    let fixed = match path {
        "/health" => Some(Route::Health),
        "/api/apps" => Some(Route::Apps),
        "/api/apps/events" => Some(Route::AppEvents),
        "/api/system/stats" => Some(Route::Stats),
        "/api/plan" => Some(Route::Plan),
        _ => None,
    };
    if let Some(r) = fixed {
        return if get { r } else { Route::MethodNotAllowed };
    }

    let Some(rest) = path.strip_prefix("/api/apps/") else {
        return Route::NotFound;
    };
    let (name, action) = match rest.split_once('/') {
        Some((name, action)) if !name.is_empty() => (name.to_owned(), action),
        _ => return Route::NotFound,
    };
    match (action, post) {
        ("install", true) => Route::Install(name),
        ("uninstall", true) => Route::Uninstall(name),
        ("install" | "uninstall", false) => Route::MethodNotAllowed,
        _ => Route::NotFound,
    }
}

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").expect("valid header")
}

fn respond_json(req: Request, code: u16, json: impl Into<Vec<u8>>) {
    let _ = req.respond(
        Response::from_data(json.into())
            .with_status_code(StatusCode(code))
            .with_header(json_header()),
    );
}

fn respond_err(req: Request, code: u16, msg: &str) {
    let body = serde_json::json!({ "error": msg }).to_string();
    respond_json(req, code, body);
}

fn status_for(e: &CoreError) -> u16 {
    match e {
        CoreError::Catalog(_) | CoreError::Schema(_) => 400,
        CoreError::AppNotInstalled(_) => 404,
        CoreError::AlreadyInstalled(_) | CoreError::InvalidTransition { .. } => 409,
        _ => 500,
    }
}

fn respond_core_err(req: Request, e: &CoreError) {
    respond_err(req, status_for(e), &e.to_string());
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallBody {
    #[serde(default)]
    integrations: BTreeMap<String, String>,
}

fn read_install_body(req: &mut Request) -> Result<InstallBody, String> {
    let mut body = String::new();
    req.as_reader()
        .read_to_string(&mut body)
        .map_err(|e| format!("read error: {e}"))?;
    if body.trim().is_empty() {
        return Ok(InstallBody::default());
    }
    serde_json::from_str(&body).map_err(|e| format!("invalid request body: {e}"))
}

fn handle_install(state: &ServerState, mut req: Request, app: &str) {
    let body = match read_install_body(&mut req) {
        Ok(b) => b,
        Err(msg) => return respond_err(req, 400, &msg),
    };
    let install = InstallRequest {
        app: app.to_owned(),
        integrations: body.integrations,
    };
    let result = state.orchestrator.install(&install);
    state.publish_if_changed();
    match result {
        Ok(record) => match serde_json::to_string(&record) {
            Ok(json) => respond_json(req, 200, json),
            Err(e) => respond_err(req, 500, &e.to_string()),
        },
        Err(e) => {
            error!("POST install {app}: {e}");
            respond_core_err(req, &e);
        }
    }
}

fn handle_uninstall(state: &ServerState, req: Request, app: &str) {
    let result = state.orchestrator.uninstall(app);
    state.publish_if_changed();
    match result {
        Ok(()) => {
            let body = serde_json::json!({ "app": app, "status": "uninstalled" }).to_string();
            respond_json(req, 200, body);
        }
        Err(e) => {
            error!("POST uninstall {app}: {e}");
            respond_core_err(req, &e);
        }
    }
}

fn sse_frame(data: &str) -> String {
    let mut frame = String::from("event: apps\n");
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Take over the connection and stream app-list events until the client
/// goes away or the server stops.
fn stream_events(state: &Arc<ServerState>, req: Request, stop: &Arc<AtomicBool>) {
    let rx = state.hub.subscribe();
    let initial = match state.apps_json() {
        Ok(j) => j,
        Err(e) => return respond_core_err(req, &e),
    };
    let stop = Arc::clone(stop);
    std::thread::spawn(move || {
        let mut out = req.into_writer();
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n";
        let mut send = |chunk: &str| -> bool {
            out.write_all(chunk.as_bytes())
                .and_then(|()| out.flush())
                .is_ok()
        };
        if !send(head) || !send(&sse_frame(&initial)) {
            return;
        }
        debug!("event stream opened");
        let mut last_write = Instant::now();
        loop {
            if stop.load(Ordering::SeqCst) || shutdown_requested() {
                break;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(apps) => {
                    if !send(&sse_frame(&apps)) {
                        break;
                    }
                    last_write = Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if last_write.elapsed() >= SSE_KEEPALIVE {
                        if !send(": keepalive\n\n") {
                            break;
                        }
                        last_write = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("event stream closed");
    });
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(state: &Arc<ServerState>, req: Request, stop: &Arc<AtomicBool>) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    match route(&method, &url) {
        Route::Health => respond_json(req, 200, r#"{"status":"ok"}"#),
        Route::Apps => match state.apps_json() {
            Ok(json) => respond_json(req, 200, json),
            Err(e) => respond_core_err(req, &e),
        },
        Route::AppEvents => stream_events(state, req, stop),
        Route::Stats => match serde_json::to_string(&state.stats()) {
            Ok(json) => respond_json(req, 200, json),
            Err(e) => respond_err(req, 500, &e.to_string()),
        },
        Route::Plan => match state
            .orchestrator
            .plan()
            .and_then(|diff| Ok(serde_json::to_string(&diff)?))
        {
            Ok(json) => respond_json(req, 200, json),
            Err(e) => respond_core_err(req, &e),
        },
        Route::Install(app) => handle_install(state, req, &app),
        Route::Uninstall(app) => handle_uninstall(state, req, &app),
        Route::MethodNotAllowed => respond_err(req, 405, "method not allowed"),
        Route::NotFound => respond_err(req, 404, "not found"),
    }
}

/// Stops a running [`AppServer`] from another thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    server: Arc<Server>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.server.unblock();
    }
}

pub struct AppServer {
    server: Arc<Server>,
    state: Arc<ServerState>,
    stop: Arc<AtomicBool>,
    metrics_interval: Duration,
}

impl AppServer {
    pub fn bind(
        addr: &str,
        orchestrator: Orchestrator,
        metrics_interval: Duration,
    ) -> Result<Self, ServerError> {
        let server = Server::http(addr).map_err(|e| ServerError::Bind {
            addr: addr.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            server: Arc::new(server),
            state: Arc::new(ServerState::new(orchestrator)),
            stop: Arc::new(AtomicBool::new(false)),
            metrics_interval,
        })
    }

    pub fn port(&self) -> Option<u16> {
        self.server.server_addr().to_ip().map(|a| a.port())
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
            server: Arc::clone(&self.server),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || shutdown_requested()
    }

    /// Serve until stopped through a [`StopHandle`] or a shutdown signal.
    pub fn run(self) {
        let ticker_state = Arc::clone(&self.state);
        let ticker = MetricsTicker::system(
            self.metrics_interval,
            Arc::clone(&self.state.stats),
            move || {
                ticker_state.publish_if_changed();
            },
        );
        info!("serving on port {}", self.port().unwrap_or_default());

        while !self.stopping() {
            match self.server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(req)) => handle_request(&self.state, req, &self.stop),
                Ok(None) => {}
                Err(e) => {
                    if !self.stopping() {
                        error!("accept failed: {e}");
                    }
                }
            }
        }

        self.stop.store(true, Ordering::SeqCst);
        drop(ticker);
        info!("server stopped");
    }
}

/// A test helper that runs an [`AppServer`] on a random port in a background thread.
///
/// Drop the `TestServer` to stop the server and join its thread.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    state: Arc<ServerState>,
    stop: StopHandle,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(orchestrator: Orchestrator) -> Self {
        let server = AppServer::bind("127.0.0.1:0", orchestrator, Duration::from_millis(100))
            .expect("failed to bind test HTTP server");
        let port = server.port().expect("not an IP addr");
        let state = Arc::clone(server.state());
        let stop = server.stop_handle();
        let handle = std::thread::spawn(move || server.run());
        Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_routes() {
        assert_eq!(route(&Method::Get, "/health"), Route::Health);
        assert_eq!(route(&Method::Get, "/api/apps"), Route::Apps);
        assert_eq!(route(&Method::Get, "/api/apps?all=1"), Route::Apps);
        assert_eq!(route(&Method::Get, "/api/apps/events"), Route::AppEvents);
        assert_eq!(route(&Method::Get, "/api/system/stats"), Route::Stats);
        assert_eq!(route(&Method::Get, "/api/plan"), Route::Plan);
        assert_eq!(route(&Method::Post, "/api/plan"), Route::MethodNotAllowed);
    }

    #[test]
    fn app_action_routes() {
        assert_eq!(
            route(&Method::Post, "/api/apps/radarr/install"),
            Route::Install("radarr".to_owned())
        );
        assert_eq!(
            route(&Method::Post, "/api/apps/radarr/uninstall"),
            Route::Uninstall("radarr".to_owned())
        );
        assert_eq!(route(&Method::Get, "/api/apps/radarr/install"), Route::MethodNotAllowed);
        assert_eq!(route(&Method::Post, "/api/apps/radarr/restart"), Route::NotFound);
        assert_eq!(route(&Method::Post, "/api/apps//install"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/nope"), Route::NotFound);
    }

    #[test]
    fn sse_frame_prefixes_every_line() {
        assert_eq!(sse_frame("[]"), "event: apps\ndata: []\n\n");
        assert_eq!(sse_frame("a\nb"), "event: apps\ndata: a\ndata: b\n\n");
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(status_for(&CoreError::AppNotInstalled("x".to_owned())), 404);
        assert_eq!(status_for(&CoreError::AlreadyInstalled("x".to_owned())), 409);
        assert_eq!(
            status_for(&CoreError::Catalog(bosun_schema::CatalogError::UnknownApp(
                "x".to_owned()
            ))),
            400
        );
        assert_eq!(status_for(&CoreError::Apply("boom".to_owned())), 500);
    }
}
