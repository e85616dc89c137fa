//! Container map and alias tables

use super::assignment::Assignment;
use crate::error::{AliasKind, MapError, Result};
use crate::resolver::{Action, Request, Resolver};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Host path of a bind alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostPath {
    /// One path shared by all instances
    Single(String),
    /// A separate path per instance label
    PerInstance(BTreeMap<String, String>),
}

/// Host alias table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTable {
    /// Prefix for relative host paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Host paths by alias
    #[serde(flatten)]
    pub paths: BTreeMap<String, HostPath>,
}

/// Container map: assignments plus volume and host alias tables.
///
/// Built during configuration and only read afterwards; every resolution is a
/// function of the map and the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMap {
    /// Map name, used as the container name prefix
    #[serde(default)]
    pub name: String,
    /// Container paths by volume alias
    #[serde(default)]
    volumes: BTreeMap<String, String>,
    /// Host paths by host alias
    #[serde(default)]
    host: HostTable,
    /// Assignments by container name
    #[serde(default)]
    containers: BTreeMap<String, Assignment>,
}

impl ContainerMap {
    /// Create an empty container map
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Add volume alias
    pub fn volume(mut self, alias: &str, path: &str) -> Self {
        self.volumes.insert(alias.to_string(), path.to_string());
        self
    }

    /// Add host alias
    pub fn host(mut self, alias: &str, path: &str) -> Self {
        self.host
            .paths
            .insert(alias.to_string(), HostPath::Single(path.to_string()));
        self
    }

    /// Add host alias with one path per instance
    pub fn host_per_instance(mut self, alias: &str, paths: &[(&str, &str)]) -> Self {
        let paths = paths
            .iter()
            .map(|(instance, path)| (instance.to_string(), path.to_string()))
            .collect();
        self.host
            .paths
            .insert(alias.to_string(), HostPath::PerInstance(paths));
        self
    }

    /// Set prefix for relative host paths
    pub fn host_root(mut self, root: &str) -> Self {
        self.host.root = Some(PathBuf::from(root));
        self
    }

    /// Add container assignment
    pub fn container(mut self, name: &str, assignment: Assignment) -> Self {
        self.containers.insert(name.to_string(), assignment);
        self
    }

    /// Get assignment by container name
    pub fn get(&self, name: &str) -> Result<&Assignment> {
        self.containers
            .get(name)
            .ok_or_else(|| MapError::ContainerNotFound(name.to_string()))
    }

    /// Check whether a container is declared
    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    /// All assignments in name order
    pub fn containers(&self) -> impl Iterator<Item = (&str, &Assignment)> {
        self.containers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Volume alias table
    pub fn volumes(&self) -> &BTreeMap<String, String> {
        &self.volumes
    }

    /// Host alias table
    pub fn host_table(&self) -> &HostTable {
        &self.host
    }

    /// Resolve a volume alias to its container path
    pub fn resolve_volume(&self, alias: &str) -> Result<&str> {
        self.volumes
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| MapError::UnknownAlias {
                kind: AliasKind::Volume,
                alias: alias.to_string(),
            })
    }

    /// Resolve a host alias to its host path for an instance
    pub fn resolve_host(&self, alias: &str, instance: Option<&str>) -> Result<String> {
        let unknown = |alias: String| MapError::UnknownAlias {
            kind: AliasKind::Host,
            alias,
        };

        let path = match self.host.paths.get(alias) {
            Some(HostPath::Single(path)) => path,
            Some(HostPath::PerInstance(paths)) => {
                let label = instance.unwrap_or_default();
                paths
                    .get(label)
                    .ok_or_else(|| unknown(format!("{}[{}]", alias, label)))?
            }
            None => return Err(unknown(alias.to_string())),
        };

        Ok(match self.host.root {
            Some(ref root) => root.join(path).to_string_lossy().into_owned(),
            None => path.clone(),
        })
    }

    /// Engine container name of a container instance
    pub fn cname(&self, role: &str, instance: Option<&str>) -> String {
        match instance {
            Some(instance) => format!("{}.{}.{}", self.name, role, instance),
            None => format!("{}.{}", self.name, role),
        }
    }

    /// Engine container name of an attachment container
    pub fn attached_name(&self, alias: &str) -> String {
        format!("{}.{}", self.name, alias)
    }

    /// Validate map, container, instance and alias names.
    ///
    /// Engine names are joined with `.`, so no name may contain one, and a
    /// container may not share its name with a volume alias: both would map to
    /// the same engine container.
    pub fn check_names(&self) -> Result<()> {
        let pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$")
            .map_err(|e| MapError::InvalidConfig(e.to_string()))?;
        let check_name = |kind: &str, name: &str| {
            if pattern.is_match(name) {
                Ok(())
            } else {
                Err(MapError::InvalidName(format!("{} '{}'", kind, name)))
            }
        };

        check_name("map", &self.name)?;
        for alias in self.volumes.keys() {
            check_name("volume alias", alias)?;
        }
        for alias in self.host.paths.keys() {
            check_name("host alias", alias)?;
        }

        for (name, assignment) in &self.containers {
            check_name("container", name)?;
            if self.volumes.contains_key(name) {
                return Err(MapError::InvalidConfig(format!(
                    "Container '{}' clashes with a volume alias of the same name",
                    name
                )));
            }

            let mut seen = HashSet::new();
            for instance in &assignment.instances {
                check_name("instance", instance)?;
                if !seen.insert(instance) {
                    return Err(MapError::InvalidConfig(format!(
                        "Container '{}' declares instance '{}' twice",
                        name, instance
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate names, alias references, dependencies and cycles of the whole map
    pub fn check_integrity(&self) -> Result<()> {
        let requests: Vec<Request> = self.containers.keys().map(|n| Request::new(n)).collect();
        Resolver::new(self).plan(Action::Create, &requests)?;

        Ok(())
    }
}
