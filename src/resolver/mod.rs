//! Dependency resolution
//!
//! The resolver turns requests against a container map into a totally ordered
//! list of operations. Instances are expanded, dependencies and attachment
//! containers are pulled into the closure, and every symbolic reference is
//! replaced by concrete paths and container names. Resolution is synchronous
//! and never touches the engine, so a malformed map fails before any side
//! effect.

pub mod graph;
pub mod operation;
pub mod request;
pub mod target;

pub use graph::DependencyGraph;
pub use operation::{
    Bind, ContainerParams, Link, Mount, MountSource, Operation, OperationKind, Payload,
    VolumeParams,
};
pub use request::{Overrides, Request};
pub use target::{Action, Node, Target};

use crate::error::{MapError, Result};
use crate::map::ContainerMap;
use std::collections::{BTreeMap, HashMap};

/// Default image of attachment containers
pub const DEFAULT_BASE_IMAGE: &str = "tianon/true:latest";

/// Default image used to initialize attached volume ownership and mode
pub const DEFAULT_CORE_IMAGE: &str = "busybox:latest";

/// Resolution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Include dependencies of the requested containers
    pub dependencies: bool,
    /// Include attachment containers
    pub attached: bool,
    /// Image of attachment containers
    pub base_image: String,
    /// Image for attached volume initialization
    pub core_image: String,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            dependencies: true,
            attached: true,
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            core_image: DEFAULT_CORE_IMAGE.to_string(),
        }
    }
}

/// Resolver over a container map
pub struct Resolver<'a> {
    map: &'a ContainerMap,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    /// Create a resolver with default options
    pub fn new(map: &'a ContainerMap) -> Self {
        Self::with_options(map, ResolveOptions::default())
    }

    /// Create a resolver with custom options
    pub fn with_options(map: &'a ContainerMap, options: ResolveOptions) -> Self {
        Self { map, options }
    }

    /// Expand a request to its fully qualified targets
    pub fn expand(&self, request: &Request) -> Result<Vec<Target>> {
        let assignment = self.map.get(&request.role)?;

        if request.instances.is_empty() {
            return Ok(assignment
                .instance_labels()
                .into_iter()
                .map(|instance| Target::new(&request.role, instance))
                .collect());
        }

        request
            .instances
            .iter()
            .map(|instance| {
                if assignment.has_instance(instance) {
                    Ok(Target::new(&request.role, Some(instance)))
                } else {
                    Err(MapError::ContainerNotFound(format!(
                        "{}.{}",
                        request.role, instance
                    )))
                }
            })
            .collect()
    }

    /// Build the dependency graph of a set of requests
    pub fn graph(&self, requests: &[Request]) -> Result<DependencyGraph> {
        self.map.check_names()?;

        let mut roots: Vec<Node> = Vec::new();
        for request in requests {
            for target in self.expand(request)? {
                let node = Node::Instance(target);
                if !roots.contains(&node) {
                    roots.push(node);
                }
            }
        }

        DependencyGraph::build(self.map, roots)
    }

    /// Resolve requests into the ordered operations for an action.
    ///
    /// Create and start run dependencies first; stop and remove run the exact
    /// reverse sequence.
    pub fn plan(&self, action: Action, requests: &[Request]) -> Result<Vec<Operation>> {
        let graph = self.graph(requests)?;
        let order = graph.order()?;

        let mut requested: Vec<(Target, &Overrides)> = Vec::new();
        for request in requests {
            for target in self.expand(request)? {
                requested.push((target, &request.overrides));
            }
        }

        // A target requested more than once gets the union of its overrides
        let mut overrides: HashMap<&Target, Overrides> = HashMap::new();
        for (target, o) in &requested {
            overrides.entry(target).or_default().merge(o);
        }

        let mut params: HashMap<&Target, ContainerParams> = HashMap::new();
        for target in order.iter().filter_map(Node::target) {
            let resolved = self.container_params(target, &params, overrides.get(target))?;
            params.insert(target, resolved);
        }

        let mut operations = order
            .iter()
            .filter(|node| self.is_selected(node, graph.roots()))
            .map(|node| self.operation(action, node, &order, &params))
            .collect::<Result<Vec<_>>>()?;

        if action.is_teardown() {
            operations.reverse();
        }

        Ok(operations)
    }

    fn is_selected(&self, node: &Node, roots: &[Node]) -> bool {
        match node {
            Node::Instance(_) => self.options.dependencies || roots.contains(node),
            Node::Attached(alias) => {
                self.options.attached
                    && (self.options.dependencies
                        || roots.iter().filter_map(Node::target).any(|root| {
                            self.map
                                .get(&root.role)
                                .map(|a| a.attaches.contains(alias))
                                .unwrap_or(false)
                        }))
            }
        }
    }

    fn operation(
        &self,
        action: Action,
        node: &Node,
        order: &[Node],
        params: &HashMap<&Target, ContainerParams>,
    ) -> Result<Operation> {
        let (kind, container, payload) = match node {
            Node::Instance(target) => {
                let container = self.map.cname(&target.role, target.instance.as_deref());
                let resolved = || {
                    params
                        .get(target)
                        .cloned()
                        .map(Payload::Container)
                        .ok_or_else(|| MapError::ContainerNotFound(target.to_string()))
                };
                match action {
                    Action::Create => (OperationKind::CreateContainer, container, resolved()?),
                    Action::Start => (OperationKind::StartContainer, container, resolved()?),
                    Action::Stop => (OperationKind::StopContainer, container, Payload::None),
                    Action::Remove => (OperationKind::RemoveContainer, container, Payload::None),
                }
            }
            Node::Attached(alias) => {
                let container = self.map.attached_name(alias);
                match action {
                    Action::Create => (
                        OperationKind::CreateVolumeContainer,
                        container,
                        Payload::Volume(self.volume_params(alias, order)?),
                    ),
                    Action::Start => (OperationKind::StartContainer, container, Payload::None),
                    Action::Stop => (OperationKind::StopContainer, container, Payload::None),
                    Action::Remove => (OperationKind::RemoveContainer, container, Payload::None),
                }
            }
        };

        Ok(Operation {
            kind,
            node: node.clone(),
            container,
            payload,
        })
    }

    /// Attachment container parameters; ownership and mode come from the
    /// first container in order that attaches the alias
    fn volume_params(&self, alias: &str, order: &[Node]) -> Result<VolumeParams> {
        let owner = order
            .iter()
            .filter_map(Node::target)
            .filter_map(|target| self.map.get(&target.role).ok())
            .find(|assignment| assignment.attaches.iter().any(|a| a == alias));

        Ok(VolumeParams {
            alias: alias.to_string(),
            path: self.map.resolve_volume(alias)?.to_string(),
            base_image: self.options.base_image.clone(),
            core_image: self.options.core_image.clone(),
            user: owner.and_then(|a| a.user.clone()),
            permissions: owner.and_then(|a| a.permissions.clone()),
        })
    }

    /// Concrete parameters of one instance.
    ///
    /// `resolved` must already hold every instance this one uses. Mounts are
    /// layered inherited first, in `uses` order, then shares, binds and
    /// attachments; a later layer replaces an earlier one at the same path.
    fn container_params(
        &self,
        target: &Target,
        resolved: &HashMap<&Target, ContainerParams>,
        overrides: Option<&Overrides>,
    ) -> Result<ContainerParams> {
        let assignment = self.map.get(&target.role)?;
        let instance = target.instance.as_deref();

        let mut mounts: BTreeMap<String, Mount> = BTreeMap::new();
        let mut mount = |path: &str, source: MountSource, read_only: bool| {
            mounts.insert(
                path.to_string(),
                Mount {
                    container_path: path.to_string(),
                    source,
                    read_only,
                },
            );
        };

        let mut volumes_from = Vec::new();
        for reference in &assignment.uses {
            for node in graph::resolve_reference(self.map, &target.role, reference, true)? {
                let provider = match &node {
                    Node::Instance(dependency) => {
                        let provider = self
                            .map
                            .cname(&dependency.role, dependency.instance.as_deref());
                        let inherited = resolved
                            .get(dependency)
                            .ok_or_else(|| MapError::ContainerNotFound(dependency.to_string()))?;
                        for m in &inherited.mounts {
                            mount(
                                &m.container_path,
                                MountSource::Container(provider.clone()),
                                m.read_only,
                            );
                        }
                        provider
                    }
                    Node::Attached(alias) => {
                        let provider = self.map.attached_name(alias);
                        mount(
                            self.map.resolve_volume(alias)?,
                            MountSource::Container(provider.clone()),
                            false,
                        );
                        provider
                    }
                };
                push_unique(&mut volumes_from, provider);
            }
        }

        let mut volumes = Vec::new();
        for share in &assignment.shares {
            mount(share, MountSource::Anonymous, false);
            push_unique(&mut volumes, share.clone());
        }

        let mut binds = Vec::new();
        for (alias, spec) in &assignment.binds {
            let container_path = match spec.path {
                Some(ref path) => path.clone(),
                None => self.map.resolve_volume(alias)?.to_string(),
            };
            let host_path = self.map.resolve_host(alias, instance)?;

            mount(
                &container_path,
                MountSource::Host(host_path.clone()),
                spec.read_only,
            );
            push_unique(&mut volumes, container_path.clone());
            binds.push(Bind {
                host_path,
                container_path,
                read_only: spec.read_only,
            });
        }

        for alias in &assignment.attaches {
            let provider = self.map.attached_name(alias);
            mount(
                self.map.resolve_volume(alias)?,
                MountSource::Container(provider.clone()),
                false,
            );
            push_unique(&mut volumes_from, provider);
        }

        let mut links = Vec::new();
        for link in &assignment.links_to {
            let nodes = graph::resolve_reference(self.map, &target.role, &link.container, false)?;
            let several = nodes.len() > 1;
            for linked in nodes.iter().filter_map(Node::target) {
                let alias = match (&linked.instance, several) {
                    (Some(instance), true) => format!("{}.{}", link.alias_or_role(), instance),
                    _ => link.alias_or_role().to_string(),
                };
                links.push(Link {
                    container: self.map.cname(&linked.role, linked.instance.as_deref()),
                    alias,
                });
            }
        }

        let mut environment = assignment.environment.clone();
        let mut user = assignment.user.clone();
        let mut ports = assignment.exposes.clone();

        if let Some(overrides) = overrides {
            for path in &overrides.volumes {
                mount(path, MountSource::Anonymous, false);
                push_unique(&mut volumes, path.clone());
            }
            for bind in &overrides.binds {
                mount(
                    &bind.container_path,
                    MountSource::Host(bind.host_path.clone()),
                    bind.read_only,
                );
                push_unique(&mut volumes, bind.container_path.clone());
                binds.push(bind.clone());
            }
            for provider in &overrides.volumes_from {
                push_unique(&mut volumes_from, provider.clone());
            }
            environment.extend(overrides.environment.clone());
            if overrides.user.is_some() {
                user = overrides.user.clone();
            }
            ports.extend(overrides.ports.iter().cloned());
        }

        Ok(ContainerParams {
            image: assignment.image_or(&target.role).to_string(),
            user,
            environment,
            volumes,
            binds,
            volumes_from,
            links,
            ports,
            mounts: mounts.into_values().collect(),
        })
    }
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AliasKind;
    use crate::map::{Assignment, BindSpec, DependencyRef, LinkSpec, PortBinding};

    fn sequence(operations: &[Operation]) -> Vec<String> {
        operations.iter().map(Operation::to_string).collect()
    }

    fn log_map() -> ContainerMap {
        ContainerMap::new("app")
            .volume("log", "/var/log/app")
            .container("web", Assignment::new().image("nginx").attach("log"))
            .container("worker", Assignment::new().uses(DependencyRef::new("web")))
    }

    #[test]
    fn test_create_with_attached_volume() {
        let map = log_map();
        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("worker")])
            .unwrap();

        assert_eq!(
            sequence(&operations),
            vec![
                "create-volume-container app.log",
                "create-container app.web",
                "create-container app.worker",
            ]
        );

        let volume = operations[0].volume().unwrap();
        assert_eq!(volume.path, "/var/log/app");
        assert_eq!(volume.base_image, DEFAULT_BASE_IMAGE);

        let web = operations[1].params().unwrap();
        assert_eq!(web.image, "nginx");
        assert_eq!(web.volumes_from, vec!["app.log"]);

        let worker = operations[2].params().unwrap();
        assert_eq!(worker.image, "worker");
        assert_eq!(worker.volumes_from, vec!["app.web"]);
        let inherited = worker.mount("/var/log/app").unwrap();
        assert_eq!(inherited.source, MountSource::Container("app.web".to_string()));
    }

    #[test]
    fn test_teardown_is_reverse() {
        let map = log_map()
            .container("db", Assignment::new().instance("a").instance("b"))
            .container(
                "api",
                Assignment::new()
                    .uses(DependencyRef::new("worker"))
                    .link(LinkSpec::new(DependencyRef::new("db"))),
            );
        let resolver = Resolver::new(&map);
        let requests = [Request::new("api")];

        let create: Vec<Node> = resolver
            .plan(Action::Create, &requests)
            .unwrap()
            .into_iter()
            .map(|op| op.node)
            .collect();
        let start: Vec<Node> = resolver
            .plan(Action::Start, &requests)
            .unwrap()
            .into_iter()
            .map(|op| op.node)
            .collect();
        let mut stop: Vec<Node> = resolver
            .plan(Action::Stop, &requests)
            .unwrap()
            .into_iter()
            .map(|op| op.node)
            .collect();
        let mut remove: Vec<Node> = resolver
            .plan(Action::Remove, &requests)
            .unwrap()
            .into_iter()
            .map(|op| op.node)
            .collect();

        assert_eq!(create, start);
        stop.reverse();
        remove.reverse();
        assert_eq!(create, stop);
        assert_eq!(create, remove);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let map = log_map()
            .host("conf", "/srv/conf")
            .container(
                "api",
                Assignment::new()
                    .uses(DependencyRef::new("worker"))
                    .bind("conf", BindSpec::at("/etc/api", true))
                    .env("MODE", "prod"),
            );

        let first = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("api"), Request::new("web")])
            .unwrap();
        let second = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("api"), Request::new("web")])
            .unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_shared_attachment_created_once() {
        let map = ContainerMap::new("app")
            .volume("data", "/data")
            .container("reader", Assignment::new().attach("data"))
            .container("writer", Assignment::new().attach("data").user("app"))
            .container(
                "front",
                Assignment::new()
                    .link(LinkSpec::new(DependencyRef::new("reader")))
                    .link(LinkSpec::new(DependencyRef::new("writer"))),
            );

        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("front")])
            .unwrap();

        let volume_ops: Vec<usize> = operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.kind == OperationKind::CreateVolumeContainer)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(volume_ops.len(), 1);

        let position = |name: &str| operations.iter().position(|op| op.container == name).unwrap();
        assert!(volume_ops[0] < position("app.reader"));
        assert!(volume_ops[0] < position("app.writer"));

        // Ownership comes from the first attaching container, which has no user
        assert_eq!(operations[volume_ops[0]].volume().unwrap().user, None);
    }

    #[test]
    fn test_cycle_emits_nothing() {
        let map = ContainerMap::new("app")
            .container("a", Assignment::new().uses(DependencyRef::new("b")))
            .container("b", Assignment::new().uses(DependencyRef::new("a")));

        let result = Resolver::new(&map).plan(Action::Create, &[Request::new("a")]);
        assert!(matches!(result, Err(MapError::CyclicDependency { .. })));
    }

    #[test]
    fn test_unknown_host_alias() {
        let map = ContainerMap::new("app")
            .volume("conf", "/etc/app")
            .container("web", Assignment::new().bind("conf", BindSpec::read_only()));

        let result = Resolver::new(&map).plan(Action::Create, &[Request::new("web")]);
        match result {
            Err(MapError::UnknownAlias { kind, alias }) => {
                assert_eq!(kind, AliasKind::Host);
                assert_eq!(alias, "conf");
            }
            other => panic!("expected unknown alias, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_attached_alias() {
        let map = ContainerMap::new("app").container("web", Assignment::new().attach("nope"));

        let result = Resolver::new(&map).plan(Action::Start, &[Request::new("web")]);
        assert!(matches!(
            result,
            Err(MapError::UnknownAlias {
                kind: AliasKind::Volume,
                ..
            })
        ));
    }

    #[test]
    fn test_overrides_only_for_requested() {
        let map = ContainerMap::new("app")
            .container("db", Assignment::new())
            .container(
                "web",
                Assignment::new()
                    .link(LinkSpec::aliased(DependencyRef::new("db"), "database"))
                    .expose(PortBinding::exposed(8080)),
            );

        let request = Request::new("web").overrides(Overrides::new().expose(80, 80).env("DEBUG", "1"));
        let operations = Resolver::new(&map).plan(Action::Start, &[request]).unwrap();

        let db = operations[0].params().unwrap();
        assert!(db.ports.is_empty());
        assert!(db.environment.is_empty());

        let web = operations[1].params().unwrap();
        assert_eq!(web.ports, vec![PortBinding::exposed(8080), PortBinding::new(80, 80)]);
        assert_eq!(web.environment.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(web.links[0].to_string(), "app.db:database");
    }

    #[test]
    fn test_uses_override_precedence() {
        let map = ContainerMap::new("app")
            .host("first", "/srv/first")
            .host("second", "/srv/second")
            .container("a", Assignment::new().bind("first", BindSpec::at("/shared", true)))
            .container("b", Assignment::new().bind("second", BindSpec::at("/shared", false)))
            .container(
                "c",
                Assignment::new()
                    .uses(DependencyRef::new("a"))
                    .uses(DependencyRef::new("b")),
            );

        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("c")])
            .unwrap();
        let c = operations.last().unwrap().params().unwrap();

        let shared = c.mount("/shared").unwrap();
        assert_eq!(shared.source, MountSource::Container("app.b".to_string()));
        assert!(!shared.read_only);
        assert_eq!(c.volumes_from, vec!["app.a", "app.b"]);
    }

    #[test]
    fn test_binds_per_instance() {
        let map = ContainerMap::new("app")
            .volume("data", "/data")
            .host_per_instance("data", &[("one", "/srv/one"), ("two", "/srv/two")])
            .container(
                "db",
                Assignment::new()
                    .instance("one")
                    .instance("two")
                    .bind("data", BindSpec::read_write()),
            );

        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("db")])
            .unwrap();
        assert_eq!(
            sequence(&operations),
            vec!["create-container app.db.one", "create-container app.db.two"]
        );
        assert_eq!(
            operations[1].params().unwrap().binds[0].to_string(),
            "/srv/two:/data:rw"
        );
    }

    #[test]
    fn test_instance_selection() {
        let map = ContainerMap::new("app")
            .container("db", Assignment::new().instance("one").instance("two"));
        let resolver = Resolver::new(&map);

        let operations = resolver
            .plan(Action::Stop, &[Request::new("db").instance("two")])
            .unwrap();
        assert_eq!(sequence(&operations), vec!["stop-container app.db.two"]);

        let result = resolver.plan(Action::Stop, &[Request::new("db").instance("three")]);
        assert!(matches!(result, Err(MapError::ContainerNotFound(_))));
    }

    #[test]
    fn test_without_dependencies() {
        let map = log_map();
        let options = ResolveOptions {
            dependencies: false,
            ..Default::default()
        };

        let operations = Resolver::with_options(&map, options)
            .plan(Action::Create, &[Request::new("web")])
            .unwrap();
        assert_eq!(
            sequence(&operations),
            vec!["create-volume-container app.log", "create-container app.web"]
        );

        let options = ResolveOptions {
            dependencies: false,
            attached: false,
            ..Default::default()
        };
        let operations = Resolver::with_options(&map, options)
            .plan(Action::Create, &[Request::new("worker")])
            .unwrap();
        assert_eq!(sequence(&operations), vec!["create-container app.worker"]);
    }

    #[test]
    fn test_attached_permissions() {
        let map = ContainerMap::new("app")
            .volume("data", "/data")
            .container(
                "web",
                Assignment::new().attach("data").user("www").permissions("u=rwX,g=rX,o="),
            );

        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("web")])
            .unwrap();
        let volume = operations[0].volume().unwrap();
        assert_eq!(volume.owner().as_deref(), Some("www:www"));
        assert_eq!(volume.permissions.as_deref(), Some("u=rwX,g=rX,o="));
    }

    #[test]
    fn test_container_named_like_volume_alias() {
        let map = ContainerMap::new("app")
            .volume("data", "/data")
            .container("data", Assignment::new())
            .container(
                "web",
                Assignment::new()
                    .attach("data")
                    .link(LinkSpec::new(DependencyRef::new("data"))),
            );

        let result = Resolver::new(&map).plan(Action::Create, &[Request::new("web")]);
        assert!(matches!(result, Err(MapError::InvalidConfig(_))));
        assert!(result.unwrap_err().is_structural());
    }

    #[test]
    fn test_dotted_names_rejected() {
        // `app.db` + instance `one` and `app.db.one` would be the same engine name
        let map = ContainerMap::new("app")
            .container("db", Assignment::new().instance("one"))
            .container("db.one", Assignment::new());
        let result = Resolver::new(&map).plan(Action::Create, &[Request::new("db")]);
        assert!(matches!(result, Err(MapError::InvalidName(_))));

        let map = ContainerMap::new("app")
            .volume("web.log", "/var/log")
            .container("web", Assignment::new());
        let result = Resolver::new(&map).plan(Action::Create, &[Request::new("web")]);
        assert!(matches!(result, Err(MapError::InvalidName(_))));
    }

    #[test]
    fn test_repeated_request_merges_overrides() {
        let map = ContainerMap::new("app").container("web", Assignment::new());

        let requests = [
            Request::new("web").overrides(Overrides::new().env("MODE", "prod")),
            Request::new("web").overrides(Overrides::new().expose(8080, 80)),
        ];
        let operations = Resolver::new(&map).plan(Action::Start, &requests).unwrap();

        assert_eq!(operations.len(), 1);
        let web = operations[0].params().unwrap();
        assert_eq!(web.environment.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(web.ports, vec![PortBinding::new(8080, 80)]);
    }

    #[test]
    fn test_link_to_every_instance() {
        let map = ContainerMap::new("app")
            .container("db", Assignment::new().instance("one").instance("two"))
            .container("cache", Assignment::new())
            .container(
                "web",
                Assignment::new()
                    .link(LinkSpec::aliased(DependencyRef::new("db"), "database"))
                    .link(LinkSpec::new(DependencyRef::instance("db", "two")))
                    .link(LinkSpec::new(DependencyRef::new("cache"))),
            );

        let operations = Resolver::new(&map)
            .plan(Action::Create, &[Request::new("web")])
            .unwrap();
        let web = operations.last().unwrap().params().unwrap();
        let links: Vec<String> = web.links.iter().map(Link::to_string).collect();

        assert_eq!(
            links,
            vec![
                "app.db.one:database.one",
                "app.db.two:database.two",
                "app.db.two:db",
                "app.cache:cache",
            ]
        );
    }
}
