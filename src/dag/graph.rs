// src/dag/graph.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::plan::JobExecutionPlan;
use crate::dag::status::{ExecutionStatus, FlowEvent};
use crate::errors::{FlowdagError, Result};
use crate::types::DagId;

/// One job in a Dag. Links to other nodes are indices into the owning Dag's
/// node vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode<T> {
    index: usize,
    value: T,
    /// Direct dependencies: nodes that must complete before this one runs.
    parents: Vec<usize>,
    /// Direct dependents.
    children: Vec<usize>,
    status: ExecutionStatus,
}

impl<T> DagNode<T> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = status;
    }
}

/// Directed acyclic graph of jobs making up one flow execution, plus the
/// flow-level bookkeeping (event and message) attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dag<T> {
    nodes: Vec<DagNode<T>>,
    start_nodes: Vec<usize>,
    end_nodes: Vec<usize>,
    flow_event: Option<FlowEvent>,
    message: Option<String>,
}

impl<T> Dag<T> {
    /// Build a Dag from node values and `(parent, child)` edges.
    ///
    /// Every node starts out `Pending`. Fails with `ConfigError` on an
    /// out-of-range edge and `DagCycle` if the edges contain a cycle.
    pub fn new(values: Vec<T>, edges: &[(usize, usize)]) -> Result<Self> {
        let mut nodes: Vec<DagNode<T>> = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| DagNode {
                index,
                value,
                parents: Vec::new(),
                children: Vec::new(),
                status: ExecutionStatus::Pending,
            })
            .collect();

        for &(parent, child) in edges {
            if parent >= nodes.len() || child >= nodes.len() {
                return Err(FlowdagError::ConfigError(format!(
                    "edge {parent} -> {child} is out of range for a dag of {} nodes",
                    nodes.len()
                )));
            }
            if !nodes[child].parents.contains(&parent) {
                nodes[child].parents.push(parent);
                nodes[parent].children.push(child);
            }
        }

        Self::from_nodes(nodes)
    }

    /// Rebuild a Dag from a node snapshot (e.g. the nodes carried by a task).
    ///
    /// Node statuses are kept; start/end nodes are recomputed.
    pub fn from_nodes(nodes: Vec<DagNode<T>>) -> Result<Self> {
        let len = nodes.len();
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for (position, node) in nodes.iter().enumerate() {
            if node.index != position {
                return Err(FlowdagError::ConfigError(format!(
                    "node at position {position} carries index {}",
                    node.index
                )));
            }
            graph.add_node(position);
        }

        for node in nodes.iter() {
            for &parent in node.parents.iter() {
                let linked = parent < len && nodes[parent].children.contains(&node.index);
                if !linked {
                    return Err(FlowdagError::ConfigError(format!(
                        "node {} lists parent {parent} which does not link back",
                        node.index
                    )));
                }
                graph.add_edge(parent, node.index, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(FlowdagError::DagCycle(format!(
                "cycle detected in job dag involving node {}",
                cycle.node_id()
            )));
        }

        let start_nodes = nodes
            .iter()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.index)
            .collect();
        let end_nodes = nodes
            .iter()
            .filter(|n| n.children.is_empty())
            .map(|n| n.index)
            .collect();

        Ok(Self {
            nodes,
            start_nodes,
            end_nodes,
            flow_event: None,
            message: None,
        })
    }

    pub fn nodes(&self) -> &[DagNode<T>] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<DagNode<T>> {
        self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&DagNode<T>> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut DagNode<T>> {
        self.nodes.get_mut(index)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut DagNode<T>> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of nodes without parents.
    pub fn start_nodes(&self) -> &[usize] {
        &self.start_nodes
    }

    /// Indices of nodes without children.
    pub fn end_nodes(&self) -> &[usize] {
        &self.end_nodes
    }

    pub fn flow_event(&self) -> Option<FlowEvent> {
        self.flow_event
    }

    pub fn set_flow_event(&mut self, event: FlowEvent) {
        self.flow_event = Some(event);
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// A deadline event has been recorded; the enforcer leaves the Dag alone.
    pub fn deadline_exceeded(&self) -> bool {
        self.flow_event
            .map(|e| e.is_deadline_exceeded())
            .unwrap_or(false)
    }

    pub fn all_nodes_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// Pending nodes whose parents have all completed.
    pub fn ready_nodes(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.status.is_pending())
            .filter(|n| {
                n.parents
                    .iter()
                    .all(|&p| self.nodes[p].status == ExecutionStatus::Complete)
            })
            .map(|n| n.index)
            .collect()
    }
}

impl Dag<JobExecutionPlan> {
    /// Identity of the flow execution, taken from the first node.
    pub fn dag_id(&self) -> Option<DagId> {
        self.nodes.first().map(|n| n.value.dag_id())
    }
}
