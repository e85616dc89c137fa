//! In-memory container engine
//!
//! Keeps container state in process. Useful for dry runs and tests: every
//! call is journaled, and failures can be injected per call.

use super::{ContainerState, CreateOutcome, Engine, RemoveOutcome, StartOutcome, StopOutcome};
use crate::error::{MapError, Result};
use crate::resolver::{ContainerParams, VolumeParams};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container has exited
    Exited,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Container held by the in-memory engine
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Parameters given at creation
    pub params: Option<ContainerParams>,
    /// Parameters given at the last start
    pub start_params: Option<ContainerParams>,
    /// Set for attachment containers
    pub volume: Option<VolumeParams>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MemoryContainer {
    fn new(name: &str, image: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string().replace('-', "")[..12].to_string(),
            name: name.to_string(),
            image: image.to_string(),
            status: ContainerStatus::Created,
            params: None,
            start_params: None,
            volume: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Check if container is running
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// Journaled engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Inspect(String),
    Create(String),
    CreateVolume(String),
    Start(String),
    Stop(String),
    Remove(String),
}

impl EngineCall {
    /// Container the call addressed
    pub fn container(&self) -> &str {
        match self {
            EngineCall::Inspect(name)
            | EngineCall::Create(name)
            | EngineCall::CreateVolume(name)
            | EngineCall::Start(name)
            | EngineCall::Stop(name)
            | EngineCall::Remove(name) => name,
        }
    }

    /// Whether the call changes engine state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, EngineCall::Inspect(_))
    }
}

/// In-memory engine
#[derive(Debug, Default, Clone)]
pub struct MemoryEngine {
    /// Containers indexed by name
    containers: Arc<RwLock<HashMap<String, MemoryContainer>>>,
    /// Calls in the order they were made
    calls: Arc<RwLock<Vec<EngineCall>>>,
    /// Calls that fail when made
    failures: Arc<RwLock<Vec<EngineCall>>>,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a call fail with an engine error
    pub fn fail_on(&self, call: EngineCall) -> Result<()> {
        self.failures
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?
            .push(call);
        Ok(())
    }

    /// Journal of calls made so far
    pub fn calls(&self) -> Result<Vec<EngineCall>> {
        let calls = self
            .calls
            .read()
            .map_err(|_| MapError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(calls.clone())
    }

    /// Journal of state-changing calls made so far
    pub fn mutations(&self) -> Result<Vec<EngineCall>> {
        Ok(self
            .calls()?
            .into_iter()
            .filter(EngineCall::is_mutation)
            .collect())
    }

    /// Get container by name
    pub fn get(&self, name: &str) -> Result<MemoryContainer> {
        let containers = self
            .containers
            .read()
            .map_err(|_| MapError::Lock("Failed to acquire read lock".to_string()))?;

        containers
            .get(name)
            .cloned()
            .ok_or_else(|| MapError::ContainerNotFound(name.to_string()))
    }

    /// Names of all containers, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        let containers = self
            .containers
            .read()
            .map_err(|_| MapError::Lock("Failed to acquire read lock".to_string()))?;

        let mut names: Vec<String> = containers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn record(&self, call: EngineCall) -> Result<()> {
        let failing = self
            .failures
            .read()
            .map_err(|_| MapError::Lock("Failed to acquire read lock".to_string()))?
            .contains(&call);

        self.calls
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?
            .push(call.clone());

        if failing {
            return Err(MapError::Engine(format!(
                "Injected failure for {:?}",
                call
            )));
        }

        Ok(())
    }

    fn insert(&self, container: MemoryContainer) -> Result<CreateOutcome> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?;

        if containers.contains_key(&container.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let id = container.id.clone();
        containers.insert(container.name.clone(), container);
        Ok(CreateOutcome::Created(id))
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        self.record(EngineCall::Inspect(name.to_string()))?;

        let containers = self
            .containers
            .read()
            .map_err(|_| MapError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(containers
            .get(name)
            .map(|c| ContainerState {
                exists: true,
                running: c.is_running(),
            })
            .unwrap_or_else(ContainerState::absent))
    }

    async fn create_container(
        &self,
        name: &str,
        params: &ContainerParams,
    ) -> Result<CreateOutcome> {
        self.record(EngineCall::Create(name.to_string()))?;

        let mut container = MemoryContainer::new(name, &params.image);
        container.params = Some(params.clone());
        self.insert(container)
    }

    async fn create_volume_container(
        &self,
        name: &str,
        params: &VolumeParams,
    ) -> Result<CreateOutcome> {
        self.record(EngineCall::CreateVolume(name.to_string()))?;

        // The data-only container runs once and exits
        let now = Utc::now();
        let mut container = MemoryContainer::new(name, &params.base_image);
        container.status = ContainerStatus::Exited;
        container.started_at = Some(now);
        container.finished_at = Some(now);
        container.volume = Some(params.clone());
        self.insert(container)
    }

    async fn start_container(
        &self,
        name: &str,
        params: Option<&ContainerParams>,
    ) -> Result<StartOutcome> {
        self.record(EngineCall::Start(name.to_string()))?;

        let mut containers = self
            .containers
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?;

        let container = containers
            .get_mut(name)
            .ok_or_else(|| MapError::ContainerNotFound(name.to_string()))?;

        if container.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let now = Utc::now();
        container.started_at = Some(now);
        container.start_params = params.cloned();
        if container.volume.is_some() {
            container.finished_at = Some(now);
        } else {
            container.status = ContainerStatus::Running;
        }

        Ok(StartOutcome::Started)
    }

    async fn stop_container(&self, name: &str, _timeout: Option<Duration>) -> Result<StopOutcome> {
        self.record(EngineCall::Stop(name.to_string()))?;

        let mut containers = self
            .containers
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?;

        match containers.get_mut(name) {
            Some(container) if container.is_running() => {
                container.status = ContainerStatus::Exited;
                container.finished_at = Some(Utc::now());
                Ok(StopOutcome::Stopped)
            }
            _ => Ok(StopOutcome::NotRunning),
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<RemoveOutcome> {
        self.record(EngineCall::Remove(name.to_string()))?;

        let mut containers = self
            .containers
            .write()
            .map_err(|_| MapError::Lock("Failed to acquire write lock".to_string()))?;

        match containers.get(name) {
            None => Ok(RemoveOutcome::NotFound),
            Some(container) if container.is_running() && !force => Err(MapError::Engine(
                format!("Cannot remove running container {}", name),
            )),
            Some(_) => {
                containers.remove(name);
                Ok(RemoveOutcome::Removed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(image: &str) -> ContainerParams {
        ContainerParams {
            image: image.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let engine = MemoryEngine::new();

        let created = engine.create_container("app.web", &params("nginx")).await.unwrap();
        assert!(matches!(created, CreateOutcome::Created(ref id) if id.len() == 12));
        assert_eq!(
            engine.create_container("app.web", &params("nginx")).await.unwrap(),
            CreateOutcome::AlreadyExists
        );

        assert_eq!(
            engine.start_container("app.web", None).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(
            engine.start_container("app.web", None).await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert!(engine.inspect("app.web").await.unwrap().running);

        assert!(engine.remove_container("app.web", false).await.is_err());
        assert_eq!(
            engine.stop_container("app.web", None).await.unwrap(),
            StopOutcome::Stopped
        );
        assert_eq!(
            engine.stop_container("app.web", None).await.unwrap(),
            StopOutcome::NotRunning
        );
        assert_eq!(
            engine.remove_container("app.web", false).await.unwrap(),
            RemoveOutcome::Removed
        );
        assert_eq!(
            engine.remove_container("app.web", false).await.unwrap(),
            RemoveOutcome::NotFound
        );
        assert_eq!(engine.inspect("app.web").await.unwrap(), ContainerState::absent());
    }

    #[tokio::test]
    async fn test_volume_container_exits() {
        let engine = MemoryEngine::new();
        let volume = VolumeParams {
            alias: "log".to_string(),
            path: "/var/log/app".to_string(),
            base_image: "tianon/true:latest".to_string(),
            core_image: "busybox:latest".to_string(),
            user: None,
            permissions: None,
        };

        engine.create_volume_container("app.log", &volume).await.unwrap();
        let state = engine.inspect("app.log").await.unwrap();
        assert!(state.exists);
        assert!(!state.running);

        engine.start_container("app.log", None).await.unwrap();
        assert_eq!(engine.get("app.log").unwrap().status, ContainerStatus::Exited);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let engine = MemoryEngine::new();
        engine.fail_on(EngineCall::Start("app.web".to_string())).unwrap();

        engine.create_container("app.web", &params("nginx")).await.unwrap();
        let result = engine.start_container("app.web", None).await;
        assert!(matches!(result, Err(MapError::Engine(_))));

        assert_eq!(
            engine.mutations().unwrap(),
            vec![
                EngineCall::Create("app.web".to_string()),
                EngineCall::Start("app.web".to_string()),
            ]
        );
    }
}
