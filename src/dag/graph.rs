// src/dag/graph.rs

//! Dependency graph over task and group ids.
//!
//! Two kinds of edges are tracked:
//! - `waits_for(task, target)`: the task may not run until `target` (a task
//!   or group) is success-compatible terminal.
//! - group membership: a group's state is derived from its children, so a
//!   group "finishes after" every child.
//!
//! Both edge kinds take part in cycle detection. Additions go through
//! [`DependencyGraph::insert_batch`], which is only called after
//! [`DependencyGraph::validate_batch`] accepted the whole batch, so a rejected
//! batch never leaves partial state behind. Removal takes whole closures from
//! [`DependencyGraph::removal_set`], so no edge can dangle.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{Result, SchedulerError};
use crate::task::TaskId;

/// Node as proposed by a submission batch.
#[derive(Debug, Clone)]
pub struct BatchNode {
    pub id: TaskId,
    pub label: String,
    pub deps: Vec<TaskId>,
    pub children: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DagNode {
    label: String,
    /// Direct dependencies: units that must finish before this one can run.
    deps: Vec<TaskId>,
    /// Direct dependents: units that wait for this one.
    dependents: Vec<TaskId>,
    /// Owning group, if any.
    parent: Option<TaskId>,
    /// Members, for groups. Insertion order.
    children: Vec<TaskId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: HashMap<TaskId, DagNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn label_of(&self, id: TaskId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.label.as_str())
    }

    /// Direct `waits_for` targets of a unit.
    pub fn dependencies_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Units that directly wait for `id`.
    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn children_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, id: TaskId) -> Option<TaskId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Enclosing groups, innermost first.
    pub fn ancestors_of(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(group) = current {
            if out.contains(&group) {
                break;
            }
            out.push(group);
            current = self.parent_of(group);
        }
        out
    }

    /// Check a whole batch against the current graph without mutating it.
    ///
    /// Rejects duplicate ids, unresolved dependencies or children, children
    /// that already belong to another group, and any cycle in the combined
    /// graph.
    pub fn validate_batch(&self, batch: &[BatchNode]) -> Result<()> {
        let mut batch_ids: HashSet<TaskId> = HashSet::new();
        for node in batch {
            if self.contains(node.id) || !batch_ids.insert(node.id) {
                return Err(SchedulerError::config(format!(
                    "unit '{}' ({}) was already submitted",
                    node.label, node.id
                )));
            }
        }

        let known = |id: &TaskId| self.contains(*id) || batch_ids.contains(id);

        let mut claimed: HashSet<TaskId> = HashSet::new();
        for node in batch {
            if let Some(dep) = node.deps.iter().find(|d| !known(d)) {
                return Err(SchedulerError::config(format!(
                    "unit '{}' waits for unknown unit {}",
                    node.label, dep
                )));
            }

            for child in &node.children {
                if !known(child) {
                    return Err(SchedulerError::config(format!(
                        "group '{}' has unknown child {}",
                        node.label, child
                    )));
                }
                if self.parent_of(*child).is_some() || !claimed.insert(*child) {
                    return Err(SchedulerError::config(format!(
                        "unit {} cannot be a member of more than one group (group '{}')",
                        child, node.label
                    )));
                }
            }
        }

        self.check_acyclic(batch)
    }

    fn check_acyclic(&self, batch: &[BatchNode]) -> Result<()> {
        // Edge direction is "finishes before":
        //   dep   -> task     for task.waits_for(dep)
        //   child -> group    for group membership
        let mut graph: DiGraphMap<TaskId, ()> = DiGraphMap::new();

        let existing = self
            .nodes
            .iter()
            .map(|(id, n)| (*id, n.deps.as_slice(), n.children.as_slice()));
        let proposed = batch
            .iter()
            .map(|n| (n.id, n.deps.as_slice(), n.children.as_slice()));

        for (id, deps, children) in existing.chain(proposed) {
            graph.add_node(id);
            for dep in deps {
                graph.add_edge(*dep, id, ());
            }
            for child in children {
                graph.add_edge(*child, id, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => {
                let node = cycle.node_id();
                let label = self
                    .label_of(node)
                    .map(str::to_string)
                    .or_else(|| {
                        batch
                            .iter()
                            .find(|n| n.id == node)
                            .map(|n| n.label.clone())
                    })
                    .unwrap_or_default();
                Err(SchedulerError::CyclicDependency(format!(
                    "cycle detected involving unit '{label}' ({node})"
                )))
            }
        }
    }

    /// Insert a batch previously accepted by [`validate_batch`](Self::validate_batch).
    pub fn insert_batch(&mut self, batch: Vec<BatchNode>) {
        for node in &batch {
            self.nodes.insert(
                node.id,
                DagNode {
                    label: node.label.clone(),
                    deps: node.deps.clone(),
                    ..DagNode::default()
                },
            );
        }

        for node in batch {
            for dep in &node.deps {
                if let Some(target) = self.nodes.get_mut(dep) {
                    target.dependents.push(node.id);
                }
            }
            for child in &node.children {
                if let Some(member) = self.nodes.get_mut(child) {
                    member.parent = Some(node.id);
                }
            }
            if let Some(group) = self.nodes.get_mut(&node.id) {
                group.children = node.children;
            }
        }
    }

    /// `id`, everything nested inside it and every unit that transitively
    /// waits for any of those. Removing less would leave dangling edges.
    ///
    /// Returned in discovery order, `id` first.
    pub fn removal_set(&self, id: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);

        while let Some(next) = queue.pop_front() {
            if !self.contains(next) || !seen.insert(next) {
                continue;
            }
            out.push(next);
            queue.extend(self.children_of(next).iter().copied());
            queue.extend(self.dependents_of(next).iter().copied());
        }
        out
    }

    /// Drop a set produced by [`removal_set`](Self::removal_set) and unlink
    /// it from the remaining nodes.
    pub fn remove_units(&mut self, ids: &[TaskId]) {
        let gone: HashSet<TaskId> = ids.iter().copied().collect();
        for id in ids {
            self.nodes.remove(id);
        }

        for node in self.nodes.values_mut() {
            node.deps.retain(|d| !gone.contains(d));
            node.dependents.retain(|d| !gone.contains(d));
            node.children.retain(|c| !gone.contains(c));
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
