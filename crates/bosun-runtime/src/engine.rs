use crate::backend::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};
use crate::RuntimeError;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::{ClientVersion, Docker};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info};

pub const DEFAULT_ENGINE_SOCKET: &str = "/run/podman/podman.sock";

/// Docker-compatible API version spoken to the engine. Podman serves it too.
const API_VERSION: ClientVersion = ClientVersion {
    major_version: 1,
    minor_version: 41,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Client for the engine's control socket.
///
/// The engine API is async; the client owns a single-threaded tokio runtime
/// and blocks on each call, so callers stay synchronous.
pub struct EngineClient {
    socket: PathBuf,
    docker: Docker,
    runtime: Runtime,
    timeout: Duration,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("socket", &self.socket)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    pub fn new(socket: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let socket = socket.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connect_error(&socket, &e))?;
        let docker = Self::connect(&socket, DEFAULT_TIMEOUT)?;
        Ok(Self {
            socket,
            docker,
            runtime,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    fn connect(socket: &Path, timeout: Duration) -> Result<Docker, RuntimeError> {
        Docker::connect_with_unix(&socket.to_string_lossy(), timeout.as_secs(), &API_VERSION)
            .map_err(|e| connect_error(socket, &e))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.docker = self.docker.with_timeout(timeout);
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn engine_error(&self, op: &str, e: EngineError) -> RuntimeError {
        match e {
            EngineError::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Api {
                op: op.to_owned(),
                status: status_code,
                message,
            },
            other if !self.socket.exists() => connect_error(&self.socket, &other),
            other => RuntimeError::Engine {
                op: op.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

fn connect_error(socket: &Path, e: &dyn std::fmt::Display) -> RuntimeError {
    RuntimeError::Connect {
        socket: socket.to_path_buf(),
        reason: e.to_string(),
    }
}

fn status_of(e: &EngineError) -> Option<u16> {
    match e {
        EngineError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// Split `repo[:tag]` the way the engine expects for a pull. A bare repo
/// would pull every tag, so it gets `latest`. Digests stay in `from_image`.
fn split_image_ref(image: &str) -> (String, String) {
    if image.contains('@') {
        return (image.to_owned(), String::new());
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let at = name_start + i;
            (image[..at].to_owned(), image[at + 1..].to_owned())
        }
        None => (image.to_owned(), "latest".to_owned()),
    }
}

pub(crate) fn create_config(spec: &ContainerSpec) -> Config<String> {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let mut exposed: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for port in &spec.ports {
        let key = format!("{}/{}", port.container, port.protocol);
        exposed.insert(key.clone(), HashMap::new());
        bindings
            .entry(key)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: None,
                host_port: Some(port.host.to_string()),
            });
    }
    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|v| {
            if v.read_only {
                format!("{}:{}:ro", v.source, v.target)
            } else {
                format!("{}:{}", v.source, v.target)
            }
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed),
        host_config: Some(HostConfig {
            port_bindings: Some(bindings),
            binds: Some(binds),
            network_mode: spec.network_mode.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn strip_slash(name: &str) -> String {
    name.trim_start_matches('/').to_owned()
}

impl ContainerRuntime for EngineClient {
    fn name(&self) -> &'static str {
        "engine"
    }

    fn ping(&self) -> Result<(), RuntimeError> {
        debug!("engine ping {}", self.socket.display());
        self.block_on(self.docker.ping())
            .map(|_| ())
            .map_err(|e| self.engine_error("ping", e))
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let docker = self.docker.clone().with_timeout(PULL_TIMEOUT.max(self.timeout));
        let pull_failed = |message: String| RuntimeError::PullFailed {
            image: image.to_owned(),
            message,
        };
        self.block_on(async {
            let mut progress = Box::pin(docker.create_image(Some(options), None, None));
            // Progress is streamed; a failure shows up as an `error` field.
            while let Some(item) = progress.next().await {
                match item {
                    Ok(info) => {
                        if let Some(err) = info.error {
                            return Err(pull_failed(err));
                        }
                    }
                    Err(EngineError::DockerResponseServerError { message, .. }) => {
                        return Err(pull_failed(message));
                    }
                    Err(e) => return Err(pull_failed(e.to_string())),
                }
            }
            Ok(())
        })?;
        info!("pulled {image}");
        Ok(())
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        match self.block_on(self.docker.create_container(Some(options), create_config(spec))) {
            Ok(created) => {
                let id = created.id;
                info!("created container {} ({})", spec.name, &id[..id.len().min(12)]);
                Ok(id)
            }
            Err(e) if status_of(&e) == Some(409) => {
                Err(RuntimeError::AlreadyExists(spec.name.clone()))
            }
            Err(e) => Err(self.engine_error("create", e)),
        }
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let result = self.block_on(
            self.docker
                .start_container(name, None::<StartContainerOptions<String>>),
        );
        match result {
            Ok(()) => Ok(()),
            Err(e) => match status_of(&e) {
                Some(304) => Ok(()),
                Some(404) => Err(RuntimeError::NotFound(name.to_owned())),
                _ => Err(self.engine_error("start", e)),
            },
        }
    }

    fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        // The engine waits up to `timeout` before killing; the request gets that long too.
        let docker = self.docker.clone().with_timeout(self.timeout + timeout);
        match self.block_on(docker.stop_container(name, Some(options))) {
            Ok(()) => Ok(()),
            Err(e) => match status_of(&e) {
                Some(304) => Ok(()),
                Some(404) => Err(RuntimeError::NotFound(name.to_owned())),
                _ => Err(self.engine_error("stop", e)),
            },
        }
    }

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.block_on(self.docker.remove_container(name, Some(options))) {
            Ok(()) => Ok(()),
            Err(e) if status_of(&e) == Some(404) => Err(RuntimeError::NotFound(name.to_owned())),
            Err(e) => Err(self.engine_error("remove", e)),
        }
    }

    fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let entries = self
            .block_on(self.docker.list_containers(Some(options)))
            .map_err(|e| self.engine_error("list", e))?;
        Ok(entries
            .into_iter()
            .map(|e| ContainerSummary {
                id: e.id.unwrap_or_default(),
                name: e
                    .names
                    .as_deref()
                    .and_then(<[String]>::first)
                    .map(|n| strip_slash(n))
                    .unwrap_or_default(),
                image: e.image.unwrap_or_default(),
                state: ContainerState::parse(e.state.as_deref().unwrap_or_default()),
                labels: e.labels.unwrap_or_default().into_iter().collect(),
            })
            .collect())
    }

    fn get(&self, name: &str) -> Result<Option<ContainerSummary>, RuntimeError> {
        let inspected = match self.block_on(
            self.docker
                .inspect_container(name, None::<InspectContainerOptions>),
        ) {
            Ok(i) => i,
            Err(e) if status_of(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(self.engine_error("inspect", e)),
        };
        let config = inspected.config.unwrap_or_default();
        let status = inspected
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        Ok(Some(ContainerSummary {
            id: inspected.id.unwrap_or_default(),
            name: strip_slash(inspected.name.as_deref().unwrap_or(name)),
            image: config.image.unwrap_or_default(),
            state: ContainerState::parse(&status),
            labels: config.labels.unwrap_or_default().into_iter().collect(),
        }))
    }
}
