use crate::backend::{ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary};
use crate::RuntimeError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    images: BTreeSet<String>,
    containers: BTreeMap<String, ContainerSummary>,
    next_id: u64,
}

/// In-memory runtime for tests. Containers can only be created from pulled images.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state.lock().map_err(|_| RuntimeError::Poisoned)
    }

    fn set_state(&self, name: &str, to: ContainerState) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        let c = state
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;
        c.state = to;
        Ok(())
    }
}

impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.lock()?.images.insert(image.to_owned());
        Ok(())
    }

    fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.lock()?;
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::AlreadyExists(spec.name.clone()));
        }
        if !state.images.contains(&spec.image) {
            return Err(RuntimeError::Api {
                op: "create".to_owned(),
                status: 404,
                message: format!("no such image: {}", spec.image),
            });
        }
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            ContainerSummary {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.set_state(name, ContainerState::Running)
    }

    fn stop(&self, name: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.set_state(name, ContainerState::Exited)
    }

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        match state.containers.get(name) {
            None => Err(RuntimeError::NotFound(name.to_owned())),
            Some(c) if c.state == ContainerState::Running && !force => Err(RuntimeError::Api {
                op: "remove".to_owned(),
                status: 409,
                message: format!("container {name} is running"),
            }),
            Some(_) => {
                state.containers.remove(name);
                Ok(())
            }
        }
    }

    fn list(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        Ok(self.lock()?.containers.values().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<ContainerSummary>, RuntimeError> {
        Ok(self.lock()?.containers.get(name).cloned())
    }
}
