//! Targets and graph nodes

use serde::{Deserialize, Serialize};

/// Requested orchestration action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Start,
    Stop,
    Remove,
}

impl Action {
    /// Stop and remove run dependents before their dependencies
    pub fn is_teardown(self) -> bool {
        matches!(self, Action::Stop | Action::Remove)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
            Action::Remove => write!(f, "remove"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = crate::error::MapError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "create" => Ok(Action::Create),
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "remove" | "rm" => Ok(Action::Remove),
            other => Err(crate::error::MapError::InvalidConfig(format!(
                "Unknown action '{}'",
                other
            ))),
        }
    }
}

/// Fully qualified target: container name plus instance label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub role: String,
    pub instance: Option<String>,
}

impl Target {
    pub fn new(role: &str, instance: Option<&str>) -> Self {
        Self {
            role: role.to_string(),
            instance: instance.map(str::to_string),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}.{}", self.role, instance),
            None => write!(f, "{}", self.role),
        }
    }
}

/// Dependency graph node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    /// A container instance
    Instance(Target),
    /// The attachment container of a volume alias
    Attached(String),
}

impl Node {
    pub fn instance(role: &str, instance: Option<&str>) -> Self {
        Node::Instance(Target::new(role, instance))
    }

    pub fn attached(alias: &str) -> Self {
        Node::Attached(alias.to_string())
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Node::Instance(target) => Some(target),
            Node::Attached(_) => None,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Instance(target) => write!(f, "{}", target),
            Node::Attached(alias) => write!(f, "{} (attached)", alias),
        }
    }
}
