//! Dependency graph construction and ordering

use super::target::Node;
use crate::error::{MapError, Result};
use crate::map::{ContainerMap, DependencyRef};
use std::collections::{HashMap, HashSet};

/// Transient dependency graph of a resolution request.
///
/// Edges point from a node to the nodes that must exist before it, in
/// declaration order: `uses`, then `links_to`, then `attaches`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    edges: HashMap<Node, Vec<Node>>,
    roots: Vec<Node>,
}

impl DependencyGraph {
    /// Build the dependency closure of the given roots
    pub fn build(map: &ContainerMap, roots: Vec<Node>) -> Result<Self> {
        let mut edges = HashMap::new();
        let mut pending: Vec<Node> = roots.iter().rev().cloned().collect();

        while let Some(node) = pending.pop() {
            if edges.contains_key(&node) {
                continue;
            }

            let dependencies = dependencies_of(map, &node)?;
            pending.extend(dependencies.iter().rev().cloned());
            edges.insert(node, dependencies);
        }

        Ok(Self { edges, roots })
    }

    /// Requested nodes the graph was built from
    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, node: &Node) -> &[Node] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of nodes in the closure
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Depth-first post-order over the closure: every node after all of its
    /// dependencies, siblings in declaration order.
    pub fn order(&self) -> Result<Vec<Node>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for root in &self.roots {
            self.visit(root, &mut visited, &mut path, &mut order)?;
        }

        Ok(order)
    }

    fn visit(
        &self,
        node: &Node,
        visited: &mut HashSet<Node>,
        path: &mut Vec<Node>,
        order: &mut Vec<Node>,
    ) -> Result<()> {
        if visited.contains(node) {
            return Ok(());
        }

        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(Node::to_string).collect();
            cycle.push(node.to_string());
            return Err(MapError::CyclicDependency { cycle });
        }

        path.push(node.clone());
        for dependency in self.dependencies(node) {
            self.visit(dependency, visited, path, order)?;
        }
        path.pop();

        visited.insert(node.clone());
        order.push(node.clone());

        Ok(())
    }
}

/// Direct dependencies of a node, validated against the map
fn dependencies_of(map: &ContainerMap, node: &Node) -> Result<Vec<Node>> {
    let target = match node {
        Node::Instance(target) => target,
        Node::Attached(_) => return Ok(Vec::new()),
    };

    let assignment = map.get(&target.role)?;
    let mut dependencies = Vec::new();

    for reference in &assignment.uses {
        dependencies.extend(resolve_reference(map, &target.role, reference, true)?);
    }

    for link in &assignment.links_to {
        dependencies.extend(resolve_reference(map, &target.role, &link.container, false)?);
    }

    for alias in &assignment.attaches {
        let path = map.resolve_volume(alias)?;
        if assignment.shares.iter().any(|share| share == path) {
            return Err(MapError::AttachmentConflict {
                role: target.role.clone(),
                alias: alias.clone(),
                path: path.to_string(),
            });
        }
        dependencies.push(Node::attached(alias));
    }

    let mut seen = HashSet::new();
    dependencies.retain(|n| seen.insert(n.clone()));

    Ok(dependencies)
}

/// Nodes a container reference points to.
///
/// An unqualified reference covers every instance of the referenced container.
/// With `allow_alias`, a reference to a volume alias points to its attachment
/// container.
pub(super) fn resolve_reference(
    map: &ContainerMap,
    role: &str,
    reference: &DependencyRef,
    allow_alias: bool,
) -> Result<Vec<Node>> {
    if reference.role == role {
        return Err(MapError::CyclicDependency {
            cycle: vec![role.to_string(), reference.to_string()],
        });
    }

    let missing = || MapError::MissingDependency {
        role: role.to_string(),
        reference: reference.to_string(),
    };

    match (map.get(&reference.role), reference.instance.as_deref()) {
        (Ok(dependency), Some(instance)) if dependency.has_instance(instance) => {
            Ok(vec![Node::instance(&reference.role, Some(instance))])
        }
        (Ok(_), Some(_)) => Err(missing()),
        (Ok(dependency), None) => Ok(dependency
            .instance_labels()
            .into_iter()
            .map(|instance| Node::instance(&reference.role, instance))
            .collect()),
        (Err(_), None) if allow_alias && map.volumes().contains_key(&reference.role) => {
            Ok(vec![Node::attached(&reference.role)])
        }
        (Err(_), _) => Err(missing()),
    }
}
