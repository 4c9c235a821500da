//! An in-memory `Engine` for unit tests, grounded in PREvant's
//! `DummyInfrastructure`: no real daemon, just a shared table of fake
//! containers that the convergence/service/project logic can be exercised
//! against deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CreateContainerParams, Engine};
use crate::error::{EngineCoreError, Result};
use crate::model::Container;

struct FakeContainer {
    container: Container,
    stopped_with_grace: bool,
}

/// An in-memory Docker-alike. Construct one, seed it with `seed_container`
/// for pre-existing state, then exercise `Service`/`Project`/convergence
/// logic against it via the `Engine` trait.
pub struct DummyEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: Mutex<u64>,
    images: Mutex<Vec<String>>,
    fail_next_create_with_no_such_image: Mutex<bool>,
}

impl Default for DummyEngine {
    fn default() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            images: Mutex::new(Vec::new()),
            fail_next_create_with_no_such_image: Mutex::new(false),
        }
    }
}

impl DummyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> String {
        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("{:064x}", *next_id);
        *next_id += 1;
        id
    }

    /// Inserts a container directly, bypassing `create`, to set up
    /// pre-existing state a test wants `Service::containers()` to observe.
    pub fn seed_container(&self, container: Container) {
        let id = container.id.clone();
        self.containers.lock().unwrap().insert(
            id,
            FakeContainer {
                container,
                stopped_with_grace: false,
            },
        );
    }

    pub fn register_image(&self, reference: &str) {
        self.images.lock().unwrap().push(reference.to_string());
    }

    /// Makes the next `create()` call fail with the specific 404 shape
    /// `Service::create_container` recovers from by pulling once.
    pub fn fail_next_create_with_no_such_image(&self) {
        *self.fail_next_create_with_no_such_image.lock().unwrap() = true;
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for DummyEngine {
    async fn list_containers(
        &self,
        all: bool,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<Container>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .values()
            .filter(|c| all || c.container.is_running)
            .filter(|c| {
                label_filter
                    .iter()
                    .all(|(k, v)| c.container.labels.get(k) == Some(v))
            })
            .map(|c| c.container.clone())
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<Container> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(id)
            .map(|c| c.container.clone())
            .ok_or_else(|| EngineCoreError::Engine {
                status: 404,
                explanation: format!("No such container: {id}"),
            })
    }

    async fn create(&self, params: CreateContainerParams) -> Result<String> {
        if std::mem::take(&mut *self.fail_next_create_with_no_such_image.lock().unwrap()) {
            return Err(EngineCoreError::Engine {
                status: 404,
                explanation: "No such image".to_string(),
            });
        }

        let id = self.fresh_id();
        let container = Container {
            id: id.clone(),
            name: format!("/{}", params.name),
            labels: params.labels.clone(),
            is_running: false,
        };
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer {
                container,
                stopped_with_grace: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(id)
            .ok_or_else(|| no_such_container(id))?;
        entry.container.is_running = true;
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout_secs: u32) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(id)
            .ok_or_else(|| no_such_container(id))?;
        entry.container.is_running = false;
        entry.stopped_with_grace = true;
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(id)
            .ok_or_else(|| no_such_container(id))?;
        entry.container.is_running = false;
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(id)
            .ok_or_else(|| no_such_container(id))?;
        entry.container.is_running = true;
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let entry = containers
            .get_mut(id)
            .ok_or_else(|| no_such_container(id))?;
        entry.container.name = format!("/{new_name}");
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let running = containers.get(id).map(|c| c.container.is_running);
        match running {
            None => Err(no_such_container(id)),
            Some(true) if !force => Err(EngineCoreError::Engine {
                status: 409,
                explanation: format!("You cannot remove a running container {id}"),
            }),
            Some(_) => {
                containers.remove(id);
                Ok(())
            }
        }
    }

    async fn pull(&self, repo: &str, tag: &str, _insecure: bool) -> Result<()> {
        let reference = if tag.is_empty() {
            repo.to_string()
        } else {
            format!("{repo}:{tag}")
        };
        self.images.lock().unwrap().push(reference);
        Ok(())
    }

    async fn build(
        &self,
        _context_path: &str,
        tag: &str,
        _nocache: bool,
        _dockerfile: Option<&str>,
    ) -> Result<String> {
        self.images.lock().unwrap().push(tag.to_string());
        Ok("deadbeefdeadbeef".to_string())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .iter()
            .any(|i| i == reference))
    }

    async fn version(&self) -> Result<String> {
        Ok("dummy-engine-test-double".to_string())
    }
}

fn no_such_container(id: &str) -> EngineCoreError {
    EngineCoreError::Engine {
        status: 404,
        explanation: format!("No such container: {id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::HostConfigParams;

    fn params(name: &str) -> CreateContainerParams {
        CreateContainerParams {
            name: name.to_string(),
            image: "busybox".to_string(),
            host_config: HostConfigParams::default(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_start_is_observed_as_running() {
        let engine = DummyEngine::new();
        let id = engine.create(params("test_web_1")).await.unwrap();
        engine.start(&id).await.unwrap();
        let container = engine.inspect(&id).await.unwrap();
        assert!(container.is_running);
    }

    #[tokio::test]
    async fn remove_running_without_force_fails() {
        let engine = DummyEngine::new();
        let id = engine.create(params("test_web_1")).await.unwrap();
        engine.start(&id).await.unwrap();
        assert!(engine.remove(&id, false).await.is_err());
        assert!(engine.remove(&id, true).await.is_ok());
    }

    #[tokio::test]
    async fn fail_next_create_with_no_such_image_then_recovers() {
        let engine = DummyEngine::new();
        engine.fail_next_create_with_no_such_image();
        let err = engine.create(params("test_web_1")).await.unwrap_err();
        assert!(err.is_no_such_image());
        let id = engine.create(params("test_web_1")).await.unwrap();
        assert_eq!(engine.container_count(), 1);
        let _ = id;
    }

    #[tokio::test]
    async fn list_containers_filters_by_label() {
        let engine = DummyEngine::new();
        let mut params = params("test_web_1");
        params
            .labels
            .insert("com.docker.compose.project".to_string(), "test".to_string());
        engine.create(params).await.unwrap();

        let mut filter = HashMap::new();
        filter.insert("com.docker.compose.project".to_string(), "test".to_string());
        let found = engine.list_containers(true, &filter).await.unwrap();
        assert_eq!(found.len(), 1);

        let mut wrong_filter = HashMap::new();
        wrong_filter.insert(
            "com.docker.compose.project".to_string(),
            "other".to_string(),
        );
        let found = engine.list_containers(true, &wrong_filter).await.unwrap();
        assert_eq!(found.len(), 0);
    }
}
