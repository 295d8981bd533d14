//! Container Runtime Client for bosun.
//!
//! A small surface over the local container engine: the `ContainerRuntime`
//! trait, an `EngineClient` driving the engine's Docker-compatible API on its
//! Unix socket through bollard, and a `MockRuntime` for tests. Every call is
//! a single synchronous request; retries belong to callers.

pub mod backend;
pub mod engine;
pub mod mock;

pub use backend::{
    select_runtime, ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary,
    PortMapping, VolumeMount,
};
pub use engine::{EngineClient, DEFAULT_ENGINE_SOCKET};
pub use mock::MockRuntime;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect to container engine at {}: {reason}", socket.display())]
    Connect { socket: PathBuf, reason: String },
    #[error("container engine error during {op}: {reason}")]
    Engine { op: String, reason: String },
    #[error("{op} failed with HTTP {status}: {message}")]
    Api {
        op: String,
        status: u16,
        message: String,
    },
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container already exists: {0}")]
    AlreadyExists(String),
    #[error("image pull failed for {image}: {message}")]
    PullFailed { image: String, message: String },
    #[error("runtime '{0}' is not available")]
    Unavailable(String),
    #[error("mock runtime lock poisoned")]
    Poisoned,
}
