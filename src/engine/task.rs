// src/engine/task.rs

//! DAG tasks and the factory that builds them from flow actions.

use std::fmt;

use crate::dag::{DagNode, JobExecutionPlan};
use crate::errors::{FlowdagError, Result};
use crate::lease::LeaseToken;
use crate::types::{ActionType, DagId, FlowAction};

/// Which processor handles a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DagTaskKind {
    Launch,
    Resume,
    Kill,
    Advance,
}

impl DagTaskKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            DagTaskKind::Launch => ActionType::Launch,
            DagTaskKind::Resume => ActionType::Resume,
            DagTaskKind::Kill => ActionType::Kill,
            DagTaskKind::Advance => ActionType::Advance,
        }
    }
}

impl From<ActionType> for DagTaskKind {
    fn from(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Launch => DagTaskKind::Launch,
            ActionType::Resume => DagTaskKind::Resume,
            ActionType::Kill => DagTaskKind::Kill,
            ActionType::Advance => DagTaskKind::Advance,
        }
    }
}

impl fmt::Display for DagTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_type().as_str())
    }
}

/// Unit of work handed from the task stream to the DAG manager.
///
/// The node list is a snapshot taken when the task was built; processors
/// apply changes to the live Dag in the state store, never to the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagTask {
    kind: DagTaskKind,
    dag_id: DagId,
    nodes: Vec<DagNode<JobExecutionPlan>>,
    trigger_timestamp: i64,
    lease_token: Option<LeaseToken>,
}

impl DagTask {
    pub fn kind(&self) -> DagTaskKind {
        self.kind
    }

    pub fn dag_id(&self) -> &DagId {
        &self.dag_id
    }

    pub fn nodes(&self) -> &[DagNode<JobExecutionPlan>] {
        &self.nodes
    }

    pub fn trigger_timestamp(&self) -> i64 {
        self.trigger_timestamp
    }

    /// Set once the task has been pulled from the stream under a lease.
    pub fn lease_token(&self) -> Option<&LeaseToken> {
        self.lease_token.as_ref()
    }

    /// The flow action this task carries out.
    pub fn action(&self) -> FlowAction {
        FlowAction::new(self.dag_id.clone(), self.kind.action_type())
    }

    pub(crate) fn with_lease(mut self, token: LeaseToken) -> Self {
        self.lease_token = Some(token);
        self
    }

    pub(crate) fn without_lease(mut self) -> Self {
        self.lease_token = None;
        self
    }
}

/// Builds tasks from flow actions.
///
/// The mapping is total over [`ActionType`]; anything that cannot become a
/// task is reported as `TaskConstructionFailed`, never as a missing task.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagTaskFactory;

impl DagTaskFactory {
    pub fn create(
        action: &FlowAction,
        nodes: Vec<DagNode<JobExecutionPlan>>,
        trigger_timestamp: i64,
    ) -> Result<DagTask> {
        if nodes.is_empty() {
            return Err(FlowdagError::TaskConstructionFailed(format!(
                "{action}: no nodes to act on"
            )));
        }

        if let Some(stray) = nodes.iter().find(|n| n.value().dag_id() != action.dag_id) {
            return Err(FlowdagError::TaskConstructionFailed(format!(
                "{action}: node {} belongs to dag {}",
                stray.index(),
                stray.value().dag_id()
            )));
        }

        Ok(DagTask {
            kind: action.action_type.into(),
            dag_id: action.dag_id.clone(),
            nodes,
            trigger_timestamp,
            lease_token: None,
        })
    }

    /// Like [`DagTaskFactory::create`], for an action type given as text.
    pub fn create_from_raw(
        dag_id: DagId,
        action_type: &str,
        nodes: Vec<DagNode<JobExecutionPlan>>,
        trigger_timestamp: i64,
    ) -> Result<DagTask> {
        let action_type: ActionType = action_type.parse()?;
        Self::create(
            &FlowAction::new(dag_id, action_type),
            nodes,
            trigger_timestamp,
        )
    }
}
