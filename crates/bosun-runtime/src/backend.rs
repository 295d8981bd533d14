use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_owned()
}

impl PortMapping {
    pub fn tcp(host: u16, container: u16) -> Self {
        Self {
            host,
            container,
            protocol: default_protocol(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Engine-independent description of a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Engine network mode (`bridge`, `host`); `None` uses the engine default.
    #[serde(default)]
    pub network_mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" | "stopped" => ContainerState::Exited,
            "dead" | "removing" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn ping(&self) -> Result<(), RuntimeError>;

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its id.
    fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Starting a running container is not an error.
    fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stop, killing after `timeout`. Stopping a stopped container is not an error.
    fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError>;

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// `Ok(None)` when no such container exists.
    fn get(&self, name: &str) -> Result<Option<ContainerSummary>, RuntimeError>;
}

pub fn select_runtime(
    name: &str,
    socket: &str,
) -> Result<Box<dyn ContainerRuntime>, RuntimeError> {
    match name {
        "engine" => Ok(Box::new(crate::engine::EngineClient::new(socket)?)),
        "mock" => Ok(Box::new(crate::mock::MockRuntime::new())),
        other => Err(RuntimeError::Unavailable(other.to_owned())),
    }
}
