//! Error types for dockmap

use crate::client::RunReport;
use thiserror::Error;

/// Result type for dockmap operations
pub type Result<T> = std::result::Result<T, MapError>;

/// Which alias table a lookup went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    /// Container-internal volume path table
    Volume,
    /// Host filesystem path table
    Host,
}

impl std::fmt::Display for AliasKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AliasKind::Volume => write!(f, "volume"),
            AliasKind::Host => write!(f, "host"),
        }
    }
}

/// dockmap error types
#[derive(Error, Debug)]
pub enum MapError {
    #[error("Unknown {kind} alias: {alias}")]
    UnknownAlias { kind: AliasKind, alias: String },

    #[error("Container '{role}' references undeclared dependency '{reference}'")]
    MissingDependency { role: String, reference: String },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Container '{role}' attaches '{alias}' at {path}, which it also shares")]
    AttachmentConflict {
        role: String,
        alias: String,
        path: String,
    },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Map file parse error: {0}")]
    MapParse(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("{operation} of {container} failed: {source}")]
    EngineOperation {
        operation: String,
        container: String,
        report: Box<RunReport>,
        #[source]
        source: Box<MapError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),
}

impl MapError {
    /// Structural errors are detected before any engine call is made
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            MapError::UnknownAlias { .. }
                | MapError::MissingDependency { .. }
                | MapError::CyclicDependency { .. }
                | MapError::AttachmentConflict { .. }
                | MapError::InvalidName(_)
                | MapError::InvalidConfig(_)
        )
    }

    /// Partial run report carried by a failed engine operation
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            MapError::EngineOperation { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}
