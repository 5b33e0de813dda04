//! Dependency DAG construction and ordering.
//!
//! Edges come from resource references (`Ref`, `GetAtt`, `Sub`) and explicit
//! `DependsOn`. Topological order uses Kahn's algorithm with alphabetical
//! tie-breaking; cycles are reported with only the resources that sit on a
//! cycle (Tarjan SCC).

use super::intrinsics;
use super::types::{StackLock, Template};
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Directed dependency graph over resource IDs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Nodes in declaration order
    nodes: Vec<String>,
    /// id → resources it depends on
    dependencies: FxHashMap<String, BTreeSet<String>>,
    /// id → resources that depend on it
    dependents: FxHashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    fn add_node(&mut self, id: &str) {
        if !self.dependencies.contains_key(id) {
            self.nodes.push(id.to_string());
            self.dependencies.insert(id.to_string(), BTreeSet::new());
            self.dependents.insert(id.to_string(), BTreeSet::new());
        }
    }

    /// Add an edge: `dependent` must be applied after `dependency`.
    /// Unknown endpoints and self-loops are ignored.
    fn add_edge(&mut self, dependency: &str, dependent: &str) {
        if dependency == dependent
            || !self.dependencies.contains_key(dependency)
            || !self.dependencies.contains_key(dependent)
        {
            return;
        }
        if let Some(deps) = self.dependencies.get_mut(dependent) {
            deps.insert(dependency.to_string());
        }
        if let Some(rdeps) = self.dependents.get_mut(dependency) {
            rdeps.insert(dependent.to_string());
        }
    }

    /// Resource IDs in declaration order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Direct dependencies of a resource, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.dependencies
            .get(id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a resource, sorted.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.dependents
            .get(id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All edges as `(dependency, dependent)`, sorted.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .dependencies
            .iter()
            .flat_map(|(dependent, deps)| {
                deps.iter()
                    .map(move |dep| (dep.clone(), dependent.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    /// Transitive dependencies of `roots`, including the roots themselves.
    pub fn dependency_closure(&self, roots: &[String]) -> BTreeSet<String> {
        self.closure(roots, &self.dependencies)
    }

    /// Transitive dependents of `roots`, including the roots themselves.
    pub fn dependent_closure(&self, roots: &[String]) -> BTreeSet<String> {
        self.closure(roots, &self.dependents)
    }

    fn closure(
        &self,
        roots: &[String],
        edges: &FxHashMap<String, BTreeSet<String>>,
    ) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !self.contains(id) || !seen.insert(id.to_string()) {
                continue;
            }
            if let Some(next) = edges.get(id) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Topological order with alphabetical tie-breaking.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        Ok(self.execution_waves()?.into_iter().flatten().collect())
    }

    /// Group resources into waves: every resource's dependencies sit in an
    /// earlier wave, so resources within one wave are independent.
    pub fn execution_waves(&self) -> Result<Vec<Vec<String>>> {
        let mut in_degree: FxHashMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();

        let mut current: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        current.sort_unstable();

        let mut waves = Vec::new();
        let mut placed = 0;
        while !current.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for id in &current {
                if let Some(dependents) = self.dependents.get(*id) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                            *degree -= 1;
                            if *degree == 0 {
                                next.push(dependent.as_str());
                            }
                        }
                    }
                }
            }
            next.sort_unstable();
            placed += current.len();
            waves.push(current.iter().map(|s| s.to_string()).collect());
            current = next;
        }

        if placed != self.nodes.len() {
            return Err(Error::Cycle(self.cycle_members()));
        }
        Ok(waves)
    }

    /// Resources that lie on a cycle, sorted.
    pub fn cycle_members(&self) -> Vec<String> {
        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashMap::default(),
            members: BTreeSet::new(),
        };
        let mut sorted: Vec<&String> = self.nodes.iter().collect();
        sorted.sort();
        for id in sorted {
            if !tarjan.indices.contains_key(id.as_str()) {
                tarjan.visit(id.as_str());
            }
        }
        tarjan.members.into_iter().collect()
    }
}

struct Tarjan<'a> {
    graph: &'a DependencyGraph,
    index: usize,
    indices: FxHashMap<&'a str, usize>,
    lowlink: FxHashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: FxHashMap<&'a str, bool>,
    members: BTreeSet<String>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, v: &'a str) {
        self.indices.insert(v, self.index);
        self.lowlink.insert(v, self.index);
        self.index += 1;
        self.stack.push(v);
        self.on_stack.insert(v, true);

        let graph = self.graph;
        if let Some(dependents) = graph.dependents.get(v) {
            for w in dependents {
                let w = w.as_str();
                if !self.indices.contains_key(w) {
                    self.visit(w);
                    let low = self.lowlink[v].min(self.lowlink[w]);
                    self.lowlink.insert(v, low);
                } else if self.on_stack.get(w).copied().unwrap_or(false) {
                    let low = self.lowlink[v].min(self.indices[w]);
                    self.lowlink.insert(v, low);
                }
            }
        }

        if self.lowlink[v] == self.indices[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.insert(w, false);
                component.push(w);
                if w == v {
                    break;
                }
            }
            if component.len() > 1 {
                self.members
                    .extend(component.into_iter().map(str::to_string));
            }
        }
    }
}

/// Build the dependency graph of a template.
///
/// References to parameters, pseudo parameters and undeclared names add no
/// edges; validation reports the undeclared ones.
pub fn build_graph(template: &Template) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    for id in template.resources.keys() {
        graph.add_node(id);
    }
    for (id, resource) in &template.resources {
        for dep in resource.depends_on.to_vec() {
            graph.add_edge(&dep, id);
        }
        let path = format!("Resources.{}.Properties", id);
        for reference in intrinsics::property_references(&resource.properties, &path) {
            if reference.kind == intrinsics::RefKind::Condition {
                continue;
            }
            graph.add_edge(&reference.target, id);
        }
    }
    tracing::debug!(
        nodes = graph.len(),
        edges = graph.edges().len(),
        "built dependency graph"
    );
    graph
}

/// Rebuild the graph recorded in a stack lock (used for delete ordering).
pub fn graph_from_lock(lock: &StackLock) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    for id in lock.resources.keys() {
        graph.add_node(id);
    }
    for (id, entry) in &lock.resources {
        for dep in &entry.depends_on {
            graph.add_edge(dep, id);
        }
    }
    graph
}

/// Build a topological execution order for a template.
pub fn build_execution_order(template: &Template) -> Result<Vec<String>> {
    build_graph(template).execution_order()
}
