// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dependency DAG and its traversal operations (spec §4.5).

use envctl_core::{NodeId, ServiceConfig, ServiceLabel, StopReason};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("dependency cycle detected, starting from {0}")]
    Cycle(NodeId),
    #[error("config for label {0} references unknown dependency {1}")]
    DanglingDependency(ServiceLabel, NodeId),
}

/// The dependency graph built from a set of service configurations.
///
/// Nodes come in two flavors: configured services (present in `services`)
/// and bare dependency targets referenced by `depends_on` but never
/// themselves supervised (e.g. a `kubernetes-connection` node that exists
/// only so port-forwards can declare a dependency on it).
pub struct DependencyGraph {
    services: HashMap<NodeId, ServiceLabel>,
    /// node -> the configs that name it in their `depends_on` (its dependents)
    dependents: HashMap<NodeId, Vec<NodeId>>,
    /// node -> its own `depends_on` list
    depends_on: HashMap<NodeId, Vec<NodeId>>,
}

impl DependencyGraph {
    pub fn build(configs: &[ServiceConfig]) -> Result<Self, GraphError> {
        let mut services = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut depends_on: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for config in configs {
            let node = config.node_id();
            services.insert(node.clone(), config.label.clone());
            depends_on.entry(node.clone()).or_default().extend(config.depends_on.iter().cloned());
            for parent in &config.depends_on {
                dependents.entry(parent.clone()).or_default().push(node.clone());
            }
        }

        let graph = Self { services, dependents, depends_on };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }
        let mut marks: HashMap<&NodeId, Mark> = HashMap::new();

        fn visit<'a>(
            node: &'a NodeId,
            depends_on: &'a HashMap<NodeId, Vec<NodeId>>,
            marks: &mut HashMap<&'a NodeId, Mark>,
        ) -> Result<(), GraphError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(GraphError::Cycle(node.clone())),
                None => {}
            }
            marks.insert(node, Mark::InProgress);
            if let Some(parents) = depends_on.get(node) {
                for parent in parents {
                    visit(parent, depends_on, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for node in self.depends_on.keys() {
            visit(node, &self.depends_on, &mut marks)?;
        }
        Ok(())
    }

    pub fn is_service(&self, node: &NodeId) -> bool {
        self.services.contains_key(node)
    }

    /// Labels that name `node` directly in their `depends_on`.
    pub fn dependents(&self, node: &NodeId) -> Vec<ServiceLabel> {
        self.dependents
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|child| self.services.get(child).cloned())
            .collect()
    }

    /// Closure of [`Self::dependents`] in post-order: deepest dependents
    /// first, `node` itself excluded. Non-service nodes are traversed
    /// through (to reach their own dependents) but never emitted.
    pub fn transitive_dependents(&self, node: &NodeId) -> Vec<ServiceLabel> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        if let Some(children) = self.dependents.get(node) {
            for child in children {
                self.post_order(child, &mut visited, &mut order);
            }
        }
        order
    }

    fn post_order(&self, node: &NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<ServiceLabel>) {
        if !visited.insert(node.clone()) {
            return;
        }
        if let Some(children) = self.dependents.get(node) {
            for child in children {
                self.post_order(child, visited, order);
            }
        }
        if let Some(label) = self.services.get(node) {
            order.push(label.clone());
        }
    }

    /// Full stop order for `StopWithDependents(label)`: every transitive
    /// dependent (deepest first), then `label` itself last.
    pub fn stop_cascade_order(&self, node: &NodeId) -> Vec<ServiceLabel> {
        let mut order = self.transitive_dependents(node);
        if let Some(label) = self.services.get(node) {
            order.push(label.clone());
        }
        order
    }

    /// Partition `requested` into ascending topological levels. Depth is
    /// computed only against other members of `requested` — a dependency
    /// on a node outside the requested set does not add a level, since that
    /// node is assumed already running (or will self-heal once ready).
    pub fn level_sort(&self, requested: &[NodeId]) -> Vec<Vec<NodeId>> {
        let requested_set: HashSet<&NodeId> = requested.iter().collect();
        let mut depths: HashMap<NodeId, usize> = HashMap::new();

        fn depth(
            node: &NodeId,
            requested_set: &HashSet<&NodeId>,
            depends_on: &HashMap<NodeId, Vec<NodeId>>,
            depths: &mut HashMap<NodeId, usize>,
        ) -> usize {
            if let Some(d) = depths.get(node) {
                return *d;
            }
            let parents_in_set: Vec<&NodeId> = depends_on
                .get(node)
                .into_iter()
                .flatten()
                .filter(|p| requested_set.contains(p))
                .collect();
            let computed = if parents_in_set.is_empty() {
                0
            } else {
                1 + parents_in_set
                    .iter()
                    .map(|p| depth(p, requested_set, depends_on, depths))
                    .max()
                    .unwrap_or(0)
            };
            depths.insert(node.clone(), computed);
            computed
        }

        let mut max_depth = 0;
        for node in requested {
            let d = depth(node, &requested_set, &self.depends_on, &mut depths);
            max_depth = max_depth.max(d);
        }

        let mut levels: Vec<Vec<NodeId>> = vec![Vec::new(); max_depth + 1];
        for node in requested {
            let d = depths.get(node).copied().unwrap_or(0);
            levels[d].push(node.clone());
        }
        levels
    }

    /// For each label in `Dependents(parent)`, whether it's eligible for
    /// selective restart: its stop reason must be `cascade` (spec §4.5).
    pub fn restart_candidates(
        &self,
        parent: &NodeId,
        stop_reason_of: impl Fn(&ServiceLabel) -> Option<StopReason>,
    ) -> Vec<ServiceLabel> {
        self.dependents(parent)
            .into_iter()
            .filter(|label| stop_reason_of(label).map(|r| r.eligible_for_cascade_restart()).unwrap_or(false))
            .collect()
    }
}
