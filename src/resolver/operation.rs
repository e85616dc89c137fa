//! Resolved operations

use super::target::Node;
use crate::map::PortBinding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of engine action an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    CreateVolumeContainer,
    CreateContainer,
    StartContainer,
    StopContainer,
    RemoveContainer,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::CreateVolumeContainer => write!(f, "create-volume-container"),
            OperationKind::CreateContainer => write!(f, "create-container"),
            OperationKind::StartContainer => write!(f, "start-container"),
            OperationKind::StopContainer => write!(f, "stop-container"),
            OperationKind::RemoveContainer => write!(f, "remove-container"),
        }
    }
}

/// Where a mounted path gets its data from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type", content = "from")]
pub enum MountSource {
    /// Anonymous volume owned by the container
    Anonymous,
    /// Host directory
    Host(String),
    /// Inherited from another container via `volumes_from`
    Container(String),
}

/// Effective mount point of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub container_path: String,
    pub source: MountSource,
    pub read_only: bool,
}

/// Host bind, formatted `host:container[:ro]` for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bind {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl std::fmt::Display for Bind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Network link, formatted `container:alias` for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub container: String,
    pub alias: String,
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.container, self.alias)
    }
}

/// Concrete engine parameters of a container instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerParams {
    pub image: String,
    pub user: Option<String>,
    pub environment: BTreeMap<String, String>,
    /// Container paths declared as volumes
    pub volumes: Vec<String>,
    pub binds: Vec<Bind>,
    /// Engine names of containers to inherit volumes from, in override order
    pub volumes_from: Vec<String>,
    pub links: Vec<Link>,
    pub ports: Vec<PortBinding>,
    /// Effective mount table after inheritance, ordered by container path
    pub mounts: Vec<Mount>,
}

impl ContainerParams {
    /// Effective mount at a container path
    pub fn mount(&self, container_path: &str) -> Option<&Mount> {
        self.mounts
            .iter()
            .find(|m| m.container_path == container_path)
    }
}

/// Concrete parameters of an attachment container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeParams {
    pub alias: String,
    /// Container path of the shared volume
    pub path: String,
    /// Image of the data-only container
    pub base_image: String,
    /// Image providing `chown` and `chmod` for initialization
    pub core_image: String,
    pub user: Option<String>,
    pub permissions: Option<String>,
}

impl VolumeParams {
    /// Owner argument for `chown`; a bare user name is used as its own group
    pub fn owner(&self) -> Option<String> {
        self.user.as_deref().map(|user| {
            if user.contains(':') {
                user.to_string()
            } else {
                format!("{}:{}", user, user)
            }
        })
    }
}

/// Parameters carried by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    None,
    Container(ContainerParams),
    Volume(VolumeParams),
}

/// One engine action, produced by the resolver and consumed once by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub node: Node,
    /// Engine container name
    pub container: String,
    pub payload: Payload,
}

impl Operation {
    /// Container parameters, if the operation carries any
    pub fn params(&self) -> Option<&ContainerParams> {
        match &self.payload {
            Payload::Container(params) => Some(params),
            _ => None,
        }
    }

    /// Attachment parameters, if the operation carries any
    pub fn volume(&self) -> Option<&VolumeParams> {
        match &self.payload {
            Payload::Volume(params) => Some(params),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.container)
    }
}
