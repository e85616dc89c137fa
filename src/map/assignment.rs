//! Container assignment configuration

use crate::error::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Reference to another container assignment, optionally pinned to one instance.
///
/// Written as `role` or `role.instance` in map files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DependencyRef {
    /// Referenced container name
    pub role: String,
    /// Referenced instance, or all instances when unset
    pub instance: Option<String>,
}

impl DependencyRef {
    /// Reference all instances of a container
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            instance: None,
        }
    }

    /// Reference a single instance of a container
    pub fn instance(role: &str, instance: &str) -> Self {
        Self {
            role: role.to_string(),
            instance: Some(instance.to_string()),
        }
    }
}

impl FromStr for DependencyRef {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        let (role, instance) = match s.split_once('.') {
            Some((role, instance)) => (role, Some(instance)),
            None => (s, None),
        };

        if role.is_empty() || instance.is_some_and(str::is_empty) {
            return Err(MapError::InvalidName(format!(
                "Invalid container reference '{}'",
                s
            )));
        }

        Ok(Self {
            role: role.to_string(),
            instance: instance.map(str::to_string),
        })
    }
}

impl TryFrom<String> for DependencyRef {
    type Error = MapError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DependencyRef> for String {
    fn from(value: DependencyRef) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}.{}", self.role, instance),
            None => write!(f, "{}", self.role),
        }
    }
}

/// Network link to another container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LinkRepr")]
pub struct LinkSpec {
    /// Linked container
    pub container: DependencyRef,
    /// Name the link is visible under; defaults to the container name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl LinkSpec {
    /// Link to a container under its own name
    pub fn new(container: DependencyRef) -> Self {
        Self {
            container,
            alias: None,
        }
    }

    /// Link to a container under a different name
    pub fn aliased(container: DependencyRef, alias: &str) -> Self {
        Self {
            container,
            alias: Some(alias.to_string()),
        }
    }

    /// Name the linked container is visible under
    pub fn alias_or_role(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.container.role)
    }
}

/// Map file forms of a link: `db`, `db:database` or `{container, alias}`
#[derive(Deserialize)]
#[serde(untagged)]
enum LinkRepr {
    Short(String),
    Full {
        container: DependencyRef,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl TryFrom<LinkRepr> for LinkSpec {
    type Error = MapError;

    fn try_from(value: LinkRepr) -> Result<Self> {
        match value {
            LinkRepr::Short(s) => match s.split_once(':') {
                Some((container, alias)) if !alias.is_empty() => {
                    Ok(LinkSpec::aliased(container.parse()?, alias))
                }
                Some(_) => Err(MapError::InvalidName(format!("Invalid link '{}'", s))),
                None => Ok(LinkSpec::new(s.parse()?)),
            },
            LinkRepr::Full { container, alias } => Ok(LinkSpec { container, alias }),
        }
    }
}

/// Host bind of a volume alias
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BindRepr")]
pub struct BindSpec {
    /// Container path; falls back to the volume alias table when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Mount read-only
    pub read_only: bool,
}

impl BindSpec {
    /// Read-write bind at the aliased volume path
    pub fn read_write() -> Self {
        Self::default()
    }

    /// Read-only bind at the aliased volume path
    pub fn read_only() -> Self {
        Self {
            path: None,
            read_only: true,
        }
    }

    /// Bind at an explicit container path
    pub fn at(path: &str, read_only: bool) -> Self {
        Self {
            path: Some(path.to_string()),
            read_only,
        }
    }
}

/// Map file forms of a bind: a path, a read-only flag, or both
#[derive(Deserialize)]
#[serde(untagged)]
enum BindRepr {
    ReadOnly(bool),
    Path(String),
    Full {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        read_only: bool,
    },
}

impl From<BindRepr> for BindSpec {
    fn from(value: BindRepr) -> Self {
        match value {
            BindRepr::ReadOnly(read_only) => BindSpec {
                path: None,
                read_only,
            },
            BindRepr::Path(path) => BindSpec {
                path: Some(path),
                read_only: false,
            },
            BindRepr::Full { path, read_only } => BindSpec { path, read_only },
        }
    }
}

/// Network protocol of a published port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Exposed container port, optionally published on the host.
///
/// Parses `80`, `8080:80`, `127.0.0.1:8080:80` and an optional `/udp` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub interface: Option<String>,
    pub protocol: Protocol,
}

impl PortBinding {
    /// Publish a container port on a host port
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            container_port,
            host_port: Some(host_port),
            interface: None,
            protocol: Protocol::Tcp,
        }
    }

    /// Expose a container port without publishing it
    pub fn exposed(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            interface: None,
            protocol: Protocol::Tcp,
        }
    }
}

impl FromStr for PortBinding {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MapError::InvalidConfig(format!("Invalid port binding '{}'", s));
        let port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

        let (spec, protocol) = match s.rsplit_once('/') {
            Some((spec, "tcp")) => (spec, Protocol::Tcp),
            Some((spec, "udp")) => (spec, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let (interface, host_port, container_port) = match parts.as_slice() {
            [container] => (None, None, port(container)?),
            [host, container] => (None, Some(port(host)?), port(container)?),
            [interface, host, container] => (
                Some(interface.to_string()),
                Some(port(host)?),
                port(container)?,
            ),
            _ => return Err(invalid()),
        };

        Ok(Self {
            container_port,
            host_port,
            interface,
            protocol,
        })
    }
}

impl TryFrom<String> for PortBinding {
    type Error = MapError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PortBinding> for String {
    fn from(value: PortBinding) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref interface) = self.interface {
            write!(f, "{}:", interface)?;
        }
        if let Some(host_port) = self.host_port {
            write!(f, "{}:", host_port)?;
        }
        write!(f, "{}", self.container_port)?;
        if self.protocol == Protocol::Udp {
            write!(f, "/udp")?;
        }
        Ok(())
    }
}

/// Declarative description of one container role
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assignment {
    /// Image name; defaults to the container name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Instance labels; empty means one default instance
    pub instances: Vec<String>,
    /// Container paths shared as anonymous volumes
    pub shares: Vec<String>,
    /// Host binds, keyed by alias
    pub binds: BTreeMap<String, BindSpec>,
    /// Containers whose volumes are inherited, in override order
    pub uses: Vec<DependencyRef>,
    /// Network links
    pub links_to: Vec<LinkSpec>,
    /// Volume aliases served by dedicated attachment containers
    pub attaches: Vec<String>,
    /// User to run as; also owns attached volumes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Mode applied to attached volumes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// Environment variables
    pub environment: BTreeMap<String, String>,
    /// Exposed and published ports
    pub exposes: Vec<PortBinding>,
}

impl Assignment {
    /// Create an empty assignment
    pub fn new() -> Self {
        Self::default()
    }

    /// Set image
    pub fn image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    /// Add instance label
    pub fn instance(mut self, label: &str) -> Self {
        self.instances.push(label.to_string());
        self
    }

    /// Add shared volume path
    pub fn share(mut self, path: &str) -> Self {
        self.shares.push(path.to_string());
        self
    }

    /// Add host bind
    pub fn bind(mut self, alias: &str, spec: BindSpec) -> Self {
        self.binds.insert(alias.to_string(), spec);
        self
    }

    /// Inherit volumes from another container
    pub fn uses(mut self, reference: DependencyRef) -> Self {
        self.uses.push(reference);
        self
    }

    /// Add network link
    pub fn link(mut self, link: LinkSpec) -> Self {
        self.links_to.push(link);
        self
    }

    /// Attach volume alias
    pub fn attach(mut self, alias: &str) -> Self {
        self.attaches.push(alias.to_string());
        self
    }

    /// Set user
    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Set permissions for attached volumes
    pub fn permissions(mut self, permissions: &str) -> Self {
        self.permissions = Some(permissions.to_string());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    /// Add port
    pub fn expose(mut self, port: PortBinding) -> Self {
        self.exposes.push(port);
        self
    }

    /// Image for a container of this assignment
    pub fn image_or<'a>(&'a self, role: &'a str) -> &'a str {
        self.image.as_deref().unwrap_or(role)
    }

    /// Instance labels, with `None` standing for the single default instance
    pub fn instance_labels(&self) -> Vec<Option<&str>> {
        if self.instances.is_empty() {
            vec![None]
        } else {
            self.instances.iter().map(|i| Some(i.as_str())).collect()
        }
    }

    /// Check whether an instance label is declared
    pub fn has_instance(&self, label: &str) -> bool {
        self.instances.iter().any(|i| i == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_ref_parse() {
        let plain: DependencyRef = "db".parse().unwrap();
        assert_eq!(plain, DependencyRef::new("db"));

        let pinned: DependencyRef = "db.primary".parse().unwrap();
        assert_eq!(pinned, DependencyRef::instance("db", "primary"));
        assert_eq!(pinned.to_string(), "db.primary");

        assert!("".parse::<DependencyRef>().is_err());
        assert!("db.".parse::<DependencyRef>().is_err());
    }

    #[test]
    fn test_port_binding_parse() {
        let port: PortBinding = "8080:80".parse().unwrap();
        assert_eq!(port, PortBinding::new(8080, 80));

        let port: PortBinding = "127.0.0.1:53:53/udp".parse().unwrap();
        assert_eq!(port.interface.as_deref(), Some("127.0.0.1"));
        assert_eq!(port.protocol, Protocol::Udp);
        assert_eq!(port.to_string(), "127.0.0.1:53:53/udp");

        let exposed: PortBinding = "9000".parse().unwrap();
        assert_eq!(exposed.host_port, None);

        assert!("80:http".parse::<PortBinding>().is_err());
        assert!("80/sctp".parse::<PortBinding>().is_err());
    }

    #[test]
    fn test_default_instance() {
        let assignment = Assignment::new();
        assert_eq!(assignment.instance_labels(), vec![None]);
        assert_eq!(assignment.image_or("web"), "web");

        let assignment = Assignment::new().image("nginx").instance("a").instance("b");
        assert_eq!(assignment.instance_labels(), vec![Some("a"), Some("b")]);
        assert_eq!(assignment.image_or("web"), "nginx");
    }

    #[test]
    fn test_deserialize_assignment() {
        let yaml = r#"
image: app:1.0
instances: [one, two]
binds:
  config: true
  logs: /var/log/app
  data:
    path: /data
    read_only: true
uses: [base, db.primary]
links_to:
  - cache
  - db:database
  - container: queue.main
    alias: mq
attaches: [uploads]
"#;

        let assignment: Assignment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(assignment.instances, vec!["one", "two"]);
        assert_eq!(assignment.binds["config"], BindSpec::read_only());
        assert_eq!(assignment.binds["logs"], BindSpec::at("/var/log/app", false));
        assert_eq!(assignment.binds["data"], BindSpec::at("/data", true));
        assert_eq!(assignment.uses[1], DependencyRef::instance("db", "primary"));
        assert_eq!(assignment.links_to[0].alias_or_role(), "cache");
        assert_eq!(assignment.links_to[1].alias_or_role(), "database");
        assert_eq!(
            assignment.links_to[2].container,
            DependencyRef::instance("queue", "main")
        );
        assert_eq!(assignment.attaches, vec!["uploads"]);
    }
}
