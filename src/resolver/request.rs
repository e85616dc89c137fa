//! Resolution requests and per-request overrides

use super::operation::Bind;
use crate::map::PortBinding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ad hoc engine parameters for the directly requested container.
///
/// Never applied to dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overrides {
    /// Additional container paths to declare as volumes
    pub volumes: Vec<String>,
    /// Additional environment variables
    pub environment: BTreeMap<String, String>,
    /// Replaces the assignment user
    pub user: Option<String>,
    /// Additional host binds
    pub binds: Vec<Bind>,
    /// Additional containers to inherit volumes from
    pub volumes_from: Vec<String>,
    /// Additional port bindings
    pub ports: Vec<PortBinding>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a port
    pub fn expose(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortBinding::new(host_port, container_port));
        self
    }

    /// Add port binding
    pub fn port(mut self, port: PortBinding) -> Self {
        self.ports.push(port);
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    /// Add volume path
    pub fn volume(mut self, path: &str) -> Self {
        self.volumes.push(path.to_string());
        self
    }

    /// Add host bind
    pub fn bind(mut self, host_path: &str, container_path: &str, read_only: bool) -> Self {
        self.binds.push(Bind {
            host_path: host_path.to_string(),
            container_path: container_path.to_string(),
            read_only,
        });
        self
    }

    /// Inherit volumes from a container by engine name
    pub fn volumes_from(mut self, container: &str) -> Self {
        self.volumes_from.push(container.to_string());
        self
    }

    /// Set user
    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Add the entries of another bag; a user set there replaces this one
    pub fn merge(&mut self, other: &Overrides) {
        extend_unique(&mut self.volumes, &other.volumes);
        self.environment.extend(other.environment.clone());
        if other.user.is_some() {
            self.user = other.user.clone();
        }
        extend_unique(&mut self.binds, &other.binds);
        extend_unique(&mut self.volumes_from, &other.volumes_from);
        extend_unique(&mut self.ports, &other.ports);
    }
}

fn extend_unique<T: Clone + PartialEq>(items: &mut Vec<T>, other: &[T]) {
    for item in other {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
}

/// Request to resolve one container, all or some of its instances
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub role: String,
    /// Selected instances; empty selects all
    pub instances: Vec<String>,
    pub overrides: Overrides,
}

impl Request {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            ..Default::default()
        }
    }

    /// Select one instance
    pub fn instance(mut self, label: &str) -> Self {
        self.instances.push(label.to_string());
        self
    }

    /// Set overrides
    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl From<&str> for Request {
    fn from(role: &str) -> Self {
        Request::new(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overrides() {
        let mut merged = Overrides::new().env("MODE", "dev").expose(8080, 80).user("app");
        merged.merge(
            &Overrides::new()
                .env("DEBUG", "1")
                .expose(8080, 80)
                .expose(8443, 443)
                .volume("/cache"),
        );

        assert_eq!(merged.environment.len(), 2);
        assert_eq!(
            merged.ports,
            vec![PortBinding::new(8080, 80), PortBinding::new(8443, 443)]
        );
        assert_eq!(merged.volumes, vec!["/cache"]);
        assert_eq!(merged.user.as_deref(), Some("app"));

        merged.merge(&Overrides::new().user("root"));
        assert_eq!(merged.user.as_deref(), Some("root"));
    }
}
