//! Orchestration client
//!
//! `MapClient` resolves requests against a container map and applies the
//! resulting operations to an engine, one at a time and in order. Structural
//! errors surface before the first engine call; an engine failure stops the
//! run and returns the partial report.

pub mod config;
pub mod report;

pub use config::ClientConfig;
pub use report::{Outcome, ReportEntry, RunReport};

use crate::engine::{CreateOutcome, Engine, RemoveOutcome, StartOutcome, StopOutcome};
use crate::error::{MapError, Result};
use crate::map::ContainerMap;
use crate::resolver::{Action, Operation, OperationKind, Payload, Request, Resolver};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Client applying a container map to an engine
pub struct MapClient<E: Engine> {
    map: Arc<ContainerMap>,
    engine: E,
    config: ClientConfig,
}

impl<E: Engine> MapClient<E> {
    /// Create a client with default configuration
    pub fn new(map: ContainerMap, engine: E) -> Self {
        Self::with_config(map, engine, ClientConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config(map: ContainerMap, engine: E, config: ClientConfig) -> Self {
        Self {
            map: Arc::new(map),
            engine,
            config,
        }
    }

    pub fn map(&self) -> &ContainerMap {
        &self.map
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve requests without executing anything
    pub fn plan(&self, action: Action, requests: &[Request]) -> Result<Vec<Operation>> {
        Resolver::with_options(&self.map, self.config.resolve_options()).plan(action, requests)
    }

    /// Create a container, its dependencies and attachment containers
    pub async fn create(&self, request: impl Into<Request>) -> Result<RunReport> {
        self.run(Action::Create, &[request.into()]).await
    }

    /// Start a container and its dependencies
    pub async fn start(&self, request: impl Into<Request>) -> Result<RunReport> {
        self.run(Action::Start, &[request.into()]).await
    }

    /// Stop a container and its dependencies, dependents first
    pub async fn stop(&self, request: impl Into<Request>) -> Result<RunReport> {
        self.run(Action::Stop, &[request.into()]).await
    }

    /// Remove a container and its dependencies, dependents first
    pub async fn remove(&self, request: impl Into<Request>) -> Result<RunReport> {
        self.run(Action::Remove, &[request.into()]).await
    }

    /// Resolve and execute requests
    pub async fn run(&self, action: Action, requests: &[Request]) -> Result<RunReport> {
        let operations = self.plan(action, requests)?;
        info!(
            "Running {} on map {}: {} operations",
            action,
            self.map.name,
            operations.len()
        );

        let mut report = RunReport::new(action);
        for operation in &operations {
            match self.apply(operation).await {
                Ok(outcome) => {
                    report.push(ReportEntry {
                        node: operation.node.clone(),
                        container: operation.container.clone(),
                        kind: operation.kind,
                        outcome,
                    });
                }
                Err(e) => {
                    warn!("{} failed: {}", operation, e);
                    report.push(ReportEntry {
                        node: operation.node.clone(),
                        container: operation.container.clone(),
                        kind: operation.kind,
                        outcome: Outcome::Failed {
                            error: e.to_string(),
                        },
                    });
                    return Err(MapError::EngineOperation {
                        operation: operation.kind.to_string(),
                        container: operation.container.clone(),
                        report: Box::new(report),
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Apply one operation
    async fn apply(&self, operation: &Operation) -> Result<Outcome> {
        let name = operation.container.as_str();

        if self.config.check_state {
            let state = self.engine.inspect(name).await?;
            let satisfied = match operation.kind {
                OperationKind::CreateVolumeContainer | OperationKind::CreateContainer => {
                    state.exists
                }
                OperationKind::StartContainer => state.running,
                OperationKind::StopContainer => !state.running,
                OperationKind::RemoveContainer => !state.exists,
            };
            if satisfied {
                debug!("Skipping {}: already satisfied", operation);
                return Ok(Outcome::AlreadySatisfied);
            }
        }

        info!("{}", operation);
        let outcome = match (&operation.kind, &operation.payload) {
            (OperationKind::CreateVolumeContainer, Payload::Volume(params)) => {
                created(self.engine.create_volume_container(name, params).await?)
            }
            (OperationKind::CreateContainer, Payload::Container(params)) => {
                created(self.engine.create_container(name, params).await?)
            }
            (OperationKind::StartContainer, payload) => {
                let params = match payload {
                    Payload::Container(params) => Some(params),
                    _ => None,
                };
                match self.engine.start_container(name, params).await? {
                    StartOutcome::Started => Outcome::Started,
                    StartOutcome::AlreadyRunning => Outcome::AlreadySatisfied,
                }
            }
            (OperationKind::StopContainer, _) => {
                match self
                    .engine
                    .stop_container(name, self.config.stop_timeout)
                    .await?
                {
                    StopOutcome::Stopped => Outcome::Stopped,
                    StopOutcome::NotRunning => Outcome::AlreadySatisfied,
                }
            }
            (OperationKind::RemoveContainer, _) => {
                match self
                    .engine
                    .remove_container(name, self.config.force_remove)
                    .await?
                {
                    RemoveOutcome::Removed => Outcome::Removed,
                    RemoveOutcome::NotFound => Outcome::AlreadySatisfied,
                }
            }
            (kind, _) => {
                return Err(MapError::InvalidConfig(format!(
                    "Operation {} on {} carries no parameters",
                    kind, name
                )))
            }
        };

        Ok(outcome)
    }
}

fn created(outcome: CreateOutcome) -> Outcome {
    match outcome {
        CreateOutcome::Created(id) => Outcome::Created { id },
        CreateOutcome::AlreadyExists => Outcome::AlreadySatisfied,
    }
}
