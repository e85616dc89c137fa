//! Per-run results

use crate::resolver::{Action, Node, OperationKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum Outcome {
    Created { id: String },
    Started,
    Stopped,
    Removed,
    /// The engine state already matched the request; nothing was changed
    AlreadySatisfied,
    Failed { error: String },
}

impl Outcome {
    /// Whether the engine state was changed
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Outcome::Created { .. } | Outcome::Started | Outcome::Stopped | Outcome::Removed
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Created { id } => write!(f, "created ({})", id),
            Outcome::Started => write!(f, "started"),
            Outcome::Stopped => write!(f, "stopped"),
            Outcome::Removed => write!(f, "removed"),
            Outcome::AlreadySatisfied => write!(f, "already satisfied"),
            Outcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Result of one executed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub node: Node,
    pub container: String,
    pub kind: OperationKind,
    pub outcome: Outcome,
}

/// Results of a run, in execution order.
///
/// Operations after a failure are never executed and have no entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub action: Action,
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    /// Outcome for a container by engine name
    pub fn outcome(&self, container: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.container == container)
            .map(|e| &e.outcome)
    }

    /// Outcomes keyed by engine container name
    pub fn results(&self) -> BTreeMap<String, Outcome> {
        self.entries
            .iter()
            .map(|e| (e.container.clone(), e.outcome.clone()))
            .collect()
    }

    /// Containers whose state was changed
    pub fn applied(&self) -> Vec<&str> {
        self.containers(Outcome::is_applied)
    }

    /// Containers that already were in the requested state
    pub fn satisfied(&self) -> Vec<&str> {
        self.containers(|o| *o == Outcome::AlreadySatisfied)
    }

    /// Containers whose operation failed
    pub fn failed(&self) -> Vec<&str> {
        self.containers(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn containers(&self, filter: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| filter(&e.outcome))
            .map(|e| e.container.as_str())
            .collect()
    }
}
