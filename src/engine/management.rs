// src/engine/management.rs

//! Management API: turns launch, resume, kill and advance requests into
//! DAG tasks on the task stream.
//!
//! Every accepted request is first recorded in the action store and then
//! enqueued; the action is deleted once its task has been processed. After a
//! restart, [`DagManagementService::recover_pending_actions`] re-enqueues
//! what was left behind.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::catalog::{FlowCatalog, FlowCompiler};
use crate::clock::Clock;
use crate::dag::{Dag, DagNode, DagStateStore, JobExecutionPlan};
use crate::engine::stream::DagTaskStream;
use crate::engine::task::DagTaskFactory;
use crate::errors::{FlowdagError, Result};
use crate::store::{DagActionStore, FailedDagStore};
use crate::types::{ActionType, DagId, FlowAction, FlowId};

pub struct DagManagementService {
    stream: Arc<DagTaskStream>,
    state_store: Arc<DagStateStore>,
    catalog: Arc<dyn FlowCatalog>,
    compiler: Arc<dyn FlowCompiler>,
    failed_dags: Arc<dyn FailedDagStore>,
    action_store: Arc<dyn DagActionStore>,
    clock: Arc<dyn Clock>,
}

impl DagManagementService {
    pub fn new(
        stream: Arc<DagTaskStream>,
        state_store: Arc<DagStateStore>,
        catalog: Arc<dyn FlowCatalog>,
        compiler: Arc<dyn FlowCompiler>,
        failed_dags: Arc<dyn FailedDagStore>,
        action_store: Arc<dyn DagActionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stream,
            state_store,
            catalog,
            compiler,
            failed_dags,
            action_store,
            clock,
        }
    }

    /// Compile the flow `flow_group/flow_name` and enqueue a LAUNCH task.
    ///
    /// Returns the id of the enqueued Dag, or `None` when the flow compiled
    /// to nothing runnable. Catalog and compiler failures are logged and
    /// returned; nothing is enqueued for them.
    pub async fn launch_flow(&self, flow_group: &str, flow_name: &str) -> Result<Option<DagId>> {
        let flow_id = FlowId::new(flow_group, flow_name)?;

        let dag = match self.compile(&flow_id).await {
            Ok(Some(dag)) => dag,
            Ok(None) => {
                warn!(flow = %flow_id, "flow compiled to no runnable dag; not launching");
                return Ok(None);
            }
            Err(err) => {
                warn!(flow = %flow_id, error = %err, "cannot launch flow");
                return Err(err);
            }
        };

        let Some(dag_id) = dag.dag_id() else {
            warn!(flow = %flow_id, "compiled dag has no nodes; not launching");
            return Ok(None);
        };

        let action = FlowAction::new(dag_id.clone(), ActionType::Launch);
        let enqueued = self.enqueue(&action, dag.into_nodes()).await?;
        if enqueued {
            info!(flow = %flow_id, %dag_id, "launch enqueued");
        }
        Ok(enqueued.then_some(dag_id))
    }

    async fn compile(&self, flow_id: &FlowId) -> Result<Option<Dag<JobExecutionPlan>>> {
        let spec = self.catalog.get_spec(flow_id).await?;
        self.compiler.compile(&spec).await
    }

    /// Enqueue a RESUME task for a failed Dag.
    ///
    /// A Dag missing from the failed-Dag store is logged and ignored.
    pub async fn resume_flow(&self, dag_id: &DagId) -> Result<bool> {
        let Some(dag) = self.failed_dags.get_dag(dag_id).await? else {
            error!(%dag_id, "no failed dag to resume");
            return Ok(false);
        };

        let action = FlowAction::new(dag_id.clone(), ActionType::Resume);
        self.enqueue(&action, dag.into_nodes()).await
    }

    /// Enqueue a KILL task for a live Dag.
    ///
    /// An unknown Dag is logged and ignored.
    pub async fn kill_flow(&self, dag_id: &DagId) -> Result<bool> {
        let Some(nodes) = self.live_nodes(dag_id).await else {
            info!(%dag_id, "dag not running; nothing to kill");
            return Ok(false);
        };

        let action = FlowAction::new(dag_id.clone(), ActionType::Kill);
        self.enqueue(&action, nodes).await
    }

    /// Enqueue an ADVANCE task for a live Dag, unless one is already pending.
    pub async fn advance_flow(&self, dag_id: &DagId) -> Result<bool> {
        let action = FlowAction::new(dag_id.clone(), ActionType::Advance);
        if self.action_store.exists(&action).await? {
            debug!(%dag_id, "advance already pending");
            return Ok(false);
        }

        let Some(nodes) = self.live_nodes(dag_id).await else {
            debug!(%dag_id, "dag not running; nothing to advance");
            return Ok(false);
        };
        self.enqueue(&action, nodes).await
    }

    /// Enqueue an ADVANCE task for every live Dag.
    pub async fn advance_all(&self) -> Result<usize> {
        let mut enqueued = 0;
        for dag_id in self.state_store.dag_ids() {
            if self.advance_flow(&dag_id).await? {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Entry point for an externally posted flow action.
    ///
    /// A LAUNCH action recompiles the flow, so the launched Dag gets a fresh
    /// execution id.
    pub async fn handle_action(&self, action: &FlowAction) -> Result<bool> {
        match action.action_type {
            ActionType::Launch => {
                let launched = self
                    .launch_flow(&action.dag_id.flow_group, &action.dag_id.flow_name)
                    .await?;
                Ok(launched.is_some())
            }
            ActionType::Resume => self.resume_flow(&action.dag_id).await,
            ActionType::Kill => self.kill_flow(&action.dag_id).await,
            ActionType::Advance => self.advance_flow(&action.dag_id).await,
        }
    }

    /// Like [`handle_action`](Self::handle_action), for an action type given
    /// as text. An unknown type is logged and dropped.
    pub async fn handle_raw_action(&self, dag_id: &DagId, action_type: &str) -> Result<bool> {
        match action_type.parse::<ActionType>() {
            Ok(action_type) => {
                self.handle_action(&FlowAction::new(dag_id.clone(), action_type))
                    .await
            }
            Err(err) => {
                error!(%dag_id, action_type, error = %err, "dropping flow action");
                Ok(false)
            }
        }
    }

    /// Re-enqueue every action left in the action store, oldest first.
    ///
    /// Each action is taken out and handled again, so it is recorded anew
    /// only if it still applies. Stale LAUNCH actions become a fresh launch
    /// of their flow. Returns how many tasks were enqueued.
    pub async fn recover_pending_actions(&self) -> Result<usize> {
        let actions = self.action_store.get_actions().await?;
        if actions.is_empty() {
            return Ok(0);
        }
        info!(count = actions.len(), "recovering pending flow actions");

        let mut enqueued = 0;
        for action in actions {
            self.action_store.delete_action(&action).await?;

            match self.handle_action(&action).await {
                Ok(true) => enqueued += 1,
                Ok(false) => debug!(%action, "pending action no longer applies"),
                Err(err) => {
                    warn!(%action, error = %err, "could not recover flow action");
                }
            }
        }
        Ok(enqueued)
    }

    async fn live_nodes(&self, dag_id: &DagId) -> Option<Vec<DagNode<JobExecutionPlan>>> {
        let dag = self.state_store.get_dag(dag_id).await?;
        Some(dag.into_nodes())
    }

    /// Record `action` and put its task on the stream.
    ///
    /// A task that cannot be built is logged and dropped. A rejected
    /// submission takes the recorded action back out.
    async fn enqueue(
        &self,
        action: &FlowAction,
        nodes: Vec<DagNode<JobExecutionPlan>>,
    ) -> Result<bool> {
        let task = match DagTaskFactory::create(action, nodes, self.clock.now_millis()) {
            Ok(task) => task,
            Err(err) => {
                error!(%action, error = %err, "dropping flow action");
                return Ok(false);
            }
        };

        self.action_store.add_action(action).await?;

        match self.stream.submit(task) {
            Ok(()) => Ok(true),
            Err(err @ FlowdagError::QueueRejected { .. }) => {
                self.action_store.delete_action(action).await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
