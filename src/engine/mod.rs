//! Container engine adapters
//!
//! The engine executes resolved operations. All calls are addressed by
//! container name; conditions that already satisfy the request are reported
//! as explicit outcomes instead of errors.

pub mod docker;
pub mod memory;

pub use docker::{DockerConfig, DockerEngine};
pub use memory::{EngineCall, MemoryEngine};

use crate::error::Result;
use crate::resolver::{ContainerParams, VolumeParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Engine-reported state of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub exists: bool,
    pub running: bool,
}

impl ContainerState {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Container created with the given ID
    Created(String),
    AlreadyExists,
}

/// Result of a start call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of a stop call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Result of a remove call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Container engine contract
#[async_trait]
pub trait Engine: Send + Sync {
    /// Report whether a container exists and is running
    async fn inspect(&self, name: &str) -> Result<ContainerState>;

    /// Create a container
    async fn create_container(&self, name: &str, params: &ContainerParams)
        -> Result<CreateOutcome>;

    /// Create, run and initialize an attachment container
    async fn create_volume_container(
        &self,
        name: &str,
        params: &VolumeParams,
    ) -> Result<CreateOutcome>;

    /// Start a container
    async fn start_container(
        &self,
        name: &str,
        params: Option<&ContainerParams>,
    ) -> Result<StartOutcome>;

    /// Stop a container
    async fn stop_container(&self, name: &str, timeout: Option<Duration>) -> Result<StopOutcome>;

    /// Remove a container
    async fn remove_container(&self, name: &str, force: bool) -> Result<RemoveOutcome>;
}

/// Force-remove a container and hand back `result`. A failed removal is
/// logged and never replaces `result`.
pub async fn dispose<E, T>(engine: &E, name: &str, result: Result<T>) -> Result<T>
where
    E: Engine + ?Sized,
    T: Send,
{
    if let Err(e) = engine.remove_container(name, true).await {
        warn!("Failed to remove container {}: {}", name, e);
    }
    result
}

#[async_trait]
impl<E: Engine + ?Sized> Engine for std::sync::Arc<E> {
    async fn inspect(&self, name: &str) -> Result<ContainerState> {
        (**self).inspect(name).await
    }

    async fn create_container(
        &self,
        name: &str,
        params: &ContainerParams,
    ) -> Result<CreateOutcome> {
        (**self).create_container(name, params).await
    }

    async fn create_volume_container(
        &self,
        name: &str,
        params: &VolumeParams,
    ) -> Result<CreateOutcome> {
        (**self).create_volume_container(name, params).await
    }

    async fn start_container(
        &self,
        name: &str,
        params: Option<&ContainerParams>,
    ) -> Result<StartOutcome> {
        (**self).start_container(name, params).await
    }

    async fn stop_container(&self, name: &str, timeout: Option<Duration>) -> Result<StopOutcome> {
        (**self).stop_container(name, timeout).await
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<RemoveOutcome> {
        (**self).remove_container(name, force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;

    #[tokio::test]
    async fn test_dispose_keeps_original_error() {
        let engine = MemoryEngine::new();
        let params = ContainerParams {
            image: "busybox".to_string(),
            ..Default::default()
        };
        engine.create_container("app.log", &params).await.unwrap();
        engine.start_container("app.log", None).await.unwrap();

        let failed: Result<()> = Err(MapError::Engine("chown exited with status 1".to_string()));
        match dispose(&engine, "app.log", failed).await {
            Err(MapError::Engine(message)) => assert!(message.starts_with("chown")),
            other => panic!("expected engine error, got {:?}", other),
        }
        assert_eq!(engine.inspect("app.log").await.unwrap(), ContainerState::absent());
    }

    #[tokio::test]
    async fn test_dispose_failed_removal() {
        let engine = MemoryEngine::new();
        engine.fail_on(EngineCall::Remove("app.tmp".to_string())).unwrap();

        let result = dispose(&engine, "app.tmp", Ok(7)).await;
        assert_eq!(result.unwrap(), 7);

        let failed: Result<()> = Err(MapError::Engine("chmod exited with status 2".to_string()));
        match dispose(&engine, "app.tmp", failed).await {
            Err(MapError::Engine(message)) => assert!(message.starts_with("chmod")),
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
