// src/graph/relation.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::errors::{AnadagError, CycleError, InvalidTransitionError, Result};
use crate::graph::node::{NodeSpec, TaskNode};
use crate::graph::status::{NodeStatus, SkipReason};
use crate::task::{Task, TaskId};

/// Directed acyclic graph of analysis tasks.
///
/// Edges point from consumer to producer. Invariants:
/// - the graph is acyclic;
/// - every edge's producer exists;
/// - a node is Ready only when all of its producers are Done.
///
/// Statuses are only ever changed through [`mark`](Self::mark) and
/// [`skip`](Self::skip), by whoever owns the graph (the scheduler's
/// orchestrating loop during a run).
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `task` consuming the results of `depends_on`. Tasks named in
    /// the task's own inputs are always dependencies.
    ///
    /// Re-adding an identity that is already present merges the new
    /// dependencies into the existing node. Fails without modifying the
    /// graph if a dependency is unknown or an edge would close a cycle.
    pub fn add_task<'a, I>(&mut self, task: Task, depends_on: I) -> Result<TaskId>
    where
        I: IntoIterator<Item = &'a TaskId>,
    {
        self.add_task_with(task, depends_on, NodeSpec::default())
    }

    /// Like [`add_task`](Self::add_task), with label, timeout and memory
    /// estimate for the node. `spec` is ignored if the node exists.
    pub fn add_task_with<'a, I>(
        &mut self,
        task: Task,
        depends_on: I,
        spec: NodeSpec,
    ) -> Result<TaskId>
    where
        I: IntoIterator<Item = &'a TaskId>,
    {
        let id = task.id().clone();
        let mut deps: BTreeSet<TaskId> = depends_on.into_iter().cloned().collect();
        deps.extend(task.task_inputs().cloned());

        // Validate everything before touching the graph.
        let mut producers = Vec::with_capacity(deps.len());
        for dep in &deps {
            let Some(&producer) = self.index.get(dep) else {
                return Err(AnadagError::UnknownDependency {
                    task: id.clone(),
                    dependency: dep.clone(),
                });
            };
            // A brand-new node has no consumers yet, so only merges can
            // close a cycle.
            if let Some(&consumer) = self.index.get(&id) {
                self.check_acyclic(consumer, producer)?;
            }
            producers.push(producer);
        }

        let consumer = match self.index.get(&id) {
            Some(&existing) => {
                debug!(id = %id.short(), "task already in graph; merging dependencies");
                existing
            }
            None => {
                let node = TaskNode::new(task, spec);
                debug!(task = %node.label, id = %id.short(), deps = deps.len(), "adding task to graph");
                let idx = self.graph.add_node(node);
                self.index.insert(id.clone(), idx);
                idx
            }
        };

        for producer in producers {
            self.graph.update_edge(consumer, producer, ());
        }

        Ok(id)
    }

    /// Add a single `consumer -> producer` dependency between existing nodes.
    pub fn add_edge(&mut self, consumer: &TaskId, producer: &TaskId) -> Result<()> {
        let c = self.idx(consumer)?;
        let p = self.idx(producer)?;
        self.check_acyclic(c, p)?;
        self.graph.update_edge(c, p, ());
        Ok(())
    }

    /// Incremental reachability check: `consumer -> producer` closes a cycle
    /// iff `consumer` is already reachable from `producer`.
    fn check_acyclic(&self, consumer: NodeIndex, producer: NodeIndex) -> Result<()> {
        if consumer == producer || has_path_connecting(&self.graph, producer, consumer, None) {
            let err = CycleError {
                consumer: self.graph[consumer].id().clone(),
                producer: self.graph[producer].id().clone(),
            };
            warn!(consumer = %err.consumer.short(), producer = %err.producer.short(), "rejected cyclic dependency");
            return Err(err.into());
        }
        Ok(())
    }

    fn idx(&self, id: &TaskId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| AnadagError::UnknownTask(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &TaskId) -> Option<&TaskNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn status(&self, id: &TaskId) -> Option<NodeStatus> {
        self.node(id).map(TaskNode::status)
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.graph.node_weights().map(TaskNode::id)
    }

    /// Direct producers of `id`, sorted by identity.
    pub fn producers_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct consumers of `id`, sorted by identity.
    pub fn consumers_of(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &TaskId, dir: Direction) -> Vec<TaskId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id().clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Number of nodes currently in `status`.
    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes().filter(|n| n.status == status).count()
    }

    /// No node is Pending, Ready or Running.
    pub fn is_terminal(&self) -> bool {
        self.nodes().all(|n| n.status.is_terminal())
    }

    /// Pending nodes whose producers are all Done.
    pub fn ready_nodes(&self) -> BTreeSet<TaskId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph[idx].status == NodeStatus::Pending
                    && self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .all(|p| self.graph[p].status == NodeStatus::Done)
            })
            .map(|idx| self.graph[idx].id().clone())
            .collect()
    }

    /// Transition `id` to `to`.
    ///
    /// Marking a node Failed or Skipped marks every Pending/Ready transitive
    /// consumer Skipped with an upstream reference; the newly skipped
    /// identities are returned, sorted.
    pub fn mark(&mut self, id: &TaskId, to: NodeStatus) -> Result<Vec<TaskId>> {
        let idx = self.idx(id)?;
        let from = self.graph[idx].status;

        if !from.can_transition_to(to) {
            return Err(InvalidTransitionError {
                task: id.clone(),
                from,
                to,
            }
            .into());
        }

        self.graph[idx].status = to;
        debug!(task = %self.graph[idx].label, ?from, ?to, "node status changed");

        match to {
            NodeStatus::Failed => Ok(self.skip_consumers(idx, id)),
            NodeStatus::Skipped => {
                self.graph[idx].skip_reason = Some(SkipReason::Manual);
                Ok(self.skip_consumers(idx, id))
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Skip an unstarted node for an explicit reason, propagating to its
    /// consumers like [`mark`](Self::mark).
    pub fn skip(&mut self, id: &TaskId, reason: SkipReason) -> Result<Vec<TaskId>> {
        let idx = self.idx(id)?;
        let from = self.graph[idx].status;
        if !from.can_transition_to(NodeStatus::Skipped) {
            return Err(InvalidTransitionError {
                task: id.clone(),
                from,
                to: NodeStatus::Skipped,
            }
            .into());
        }

        self.graph[idx].status = NodeStatus::Skipped;
        self.graph[idx].skip_reason = Some(reason);
        Ok(self.skip_consumers(idx, id))
    }

    fn skip_consumers(&mut self, origin_idx: NodeIndex, origin: &TaskId) -> Vec<TaskId> {
        let mut stack: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(origin_idx, Direction::Incoming)
            .collect();
        let mut newly_skipped = Vec::new();

        while let Some(idx) = stack.pop() {
            let node = &mut self.graph[idx];
            if !node.status.is_unstarted() {
                // Already skipped through another path.
                continue;
            }

            node.status = NodeStatus::Skipped;
            node.skip_reason = Some(SkipReason::Upstream(origin.clone()));
            debug!(
                task = %node.label,
                upstream = %origin.short(),
                "skipping consumer of failed node"
            );
            newly_skipped.push(node.id().clone());
            stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
        }

        newly_skipped.sort();
        newly_skipped
    }

    /// Longest-path depth of every node from a node without producers.
    pub fn topological_ranks(&self) -> Result<HashMap<TaskId, usize>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let id = self.graph[cycle.node_id()].id().clone();
            AnadagError::from(CycleError {
                consumer: id.clone(),
                producer: id,
            })
        })?;

        // Edges run consumer -> producer, so producers come last.
        let mut ranks: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        for &idx in order.iter().rev() {
            let rank = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|p| ranks.get(&p).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            ranks.insert(idx, rank);
        }

        Ok(ranks
            .into_iter()
            .map(|(idx, rank)| (self.graph[idx].id().clone(), rank))
            .collect())
    }
}
