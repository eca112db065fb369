// src/engine/processor.rs

//! Processors carrying out DAG tasks.
//!
//! Every processor goes through the same three steps, driven by [`process`]:
//! `initialize` reads what it needs from the state stores, `act` applies the
//! change, and `send_notification` reports the outcome. Once all three
//! succeed, [`process_task`] commits the task: the flow action is deleted
//! from the action store and its lease released.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::BoxFuture;
use crate::dag::{Dag, DagHandle, DagStateStore, ExecutionStatus, FlowEvent, JobExecutionPlan};
use crate::engine::task::{DagTask, DagTaskKind};
use crate::errors::{FlowdagError, Result};
use crate::exec::ExecutorBackend;
use crate::lease::LeaseArbiter;
use crate::monitor::JobStatusPoller;
use crate::store::{DagActionStore, FailedDagStore};
use crate::types::DagId;

/// Everything a processor may touch.
#[derive(Clone)]
pub struct ProcContext {
    pub state_store: Arc<DagStateStore>,
    pub executor: Arc<dyn ExecutorBackend>,
    pub action_store: Arc<dyn DagActionStore>,
    pub failed_dags: Arc<dyn FailedDagStore>,
    pub lease_arbiter: Arc<dyn LeaseArbiter>,
    pub poller: JobStatusPoller,
}

pub trait DagProc: Send {
    type State: Send;
    type Outcome: Send;

    fn initialize(&mut self) -> BoxFuture<'_, Result<Self::State>>;

    fn act(&mut self, state: Self::State) -> BoxFuture<'_, Result<Self::Outcome>>;

    fn send_notification(&mut self, outcome: Self::Outcome) -> BoxFuture<'_, Result<()>>;
}

/// Run one processor through initialize, act and notify.
pub async fn process<P: DagProc>(mut dag_proc: P) -> Result<()> {
    let state = dag_proc.initialize().await?;
    let outcome = dag_proc.act(state).await?;
    dag_proc.send_notification(outcome).await
}

/// Dispatch a pulled task to its processor and commit it on success.
///
/// A failed task is left uncommitted: its action stays in the action store
/// and its lease is kept. Retrying it is up to the caller; the consumer loop
/// puts it back on the stream.
pub async fn process_task(ctx: &ProcContext, task: &DagTask) -> Result<()> {
    let result = match task.kind() {
        DagTaskKind::Launch => process(LaunchDagProc::new(ctx, task)).await,
        DagTaskKind::Resume => process(ResumeDagProc::new(ctx, task)).await,
        DagTaskKind::Kill => process(KillDagProc::new(ctx, task)).await,
        DagTaskKind::Advance => process(AdvanceDagProc::new(ctx, task)).await,
    };

    if let Err(err) = result {
        error!(action = %task.action(), error = %err, "dag task failed");
        return Err(err);
    }

    commit(ctx, task).await
}

async fn commit(ctx: &ProcContext, task: &DagTask) -> Result<()> {
    let action = task.action();
    ctx.action_store.delete_action(&action).await?;

    if let Some(token) = task.lease_token() {
        let released = ctx.lease_arbiter.release(&action, token).await?;
        if !released {
            debug!(%action, "lease had already moved on at commit");
        }
    }

    debug!(%action, "dag task committed");
    Ok(())
}

/// Submit every ready node of `dag` and mark it orchestrated.
async fn submit_ready_nodes(
    executor: &dyn ExecutorBackend,
    dag: &mut Dag<JobExecutionPlan>,
) -> Result<usize> {
    let ready = dag.ready_nodes();
    for &index in &ready {
        let Some(node) = dag.node_mut(index) else {
            continue;
        };
        executor.submit_job(node.value()).await?;
        node.set_status(ExecutionStatus::Orchestrated);
        info!(
            dag = %node.value().fully_qualified_dag_name(),
            job = %node.value().job_name(),
            "job orchestrated"
        );
    }
    Ok(ready.len())
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

pub struct LaunchDagProc<'a> {
    ctx: &'a ProcContext,
    task: &'a DagTask,
}

impl<'a> LaunchDagProc<'a> {
    pub fn new(ctx: &'a ProcContext, task: &'a DagTask) -> Self {
        Self { ctx, task }
    }
}

impl DagProc for LaunchDagProc<'_> {
    /// `None` when the Dag is already live.
    type State = Option<Dag<JobExecutionPlan>>;
    type Outcome = usize;

    fn initialize(&mut self) -> BoxFuture<'_, Result<Self::State>> {
        Box::pin(async move {
            if self.ctx.state_store.contains_dag(self.task.dag_id()) {
                info!(dag_id = %self.task.dag_id(), "dag already running; ignoring launch");
                return Ok(None);
            }
            Dag::from_nodes(self.task.nodes().to_vec()).map(Some)
        })
    }

    fn act(&mut self, state: Self::State) -> BoxFuture<'_, Result<Self::Outcome>> {
        Box::pin(async move {
            let Some(dag) = state else {
                return Ok(0);
            };

            let dag_id = self.task.dag_id().clone();
            self.ctx.state_store.put_dag(dag_id.clone(), dag);
            let handle = live_handle(&self.ctx.state_store, &dag_id)?;
            let mut dag = handle.lock().await;
            submit_ready_nodes(self.ctx.executor.as_ref(), &mut dag).await
        })
    }

    fn send_notification(&mut self, outcome: Self::Outcome) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(dag_id = %self.task.dag_id(), submitted = outcome, "flow launched");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

pub struct ResumeDagProc<'a> {
    ctx: &'a ProcContext,
    task: &'a DagTask,
}

impl<'a> ResumeDagProc<'a> {
    pub fn new(ctx: &'a ProcContext, task: &'a DagTask) -> Self {
        Self { ctx, task }
    }
}

impl DagProc for ResumeDagProc<'_> {
    type State = Option<Dag<JobExecutionPlan>>;
    type Outcome = usize;

    fn initialize(&mut self) -> BoxFuture<'_, Result<Self::State>> {
        Box::pin(async move {
            if self.ctx.state_store.contains_dag(self.task.dag_id()) {
                info!(dag_id = %self.task.dag_id(), "dag already running; ignoring resume");
                return Ok(None);
            }

            let mut nodes = self.task.nodes().to_vec();
            for node in &mut nodes {
                if matches!(
                    node.status(),
                    ExecutionStatus::Failed | ExecutionStatus::Cancelled
                ) {
                    node.set_status(ExecutionStatus::PendingResume);
                }
            }
            Dag::from_nodes(nodes).map(Some)
        })
    }

    fn act(&mut self, state: Self::State) -> BoxFuture<'_, Result<Self::Outcome>> {
        Box::pin(async move {
            let Some(dag) = state else {
                return Ok(0);
            };

            let dag_id = self.task.dag_id().clone();
            self.ctx.state_store.put_dag(dag_id.clone(), dag);
            self.ctx.failed_dags.remove_dag(&dag_id).await?;

            let handle = live_handle(&self.ctx.state_store, &dag_id)?;
            let mut dag = handle.lock().await;
            submit_ready_nodes(self.ctx.executor.as_ref(), &mut dag).await
        })
    }

    fn send_notification(&mut self, outcome: Self::Outcome) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(dag_id = %self.task.dag_id(), submitted = outcome, "flow resumed");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Kill
// ---------------------------------------------------------------------------

pub struct KillDagProc<'a> {
    ctx: &'a ProcContext,
    task: &'a DagTask,
}

impl<'a> KillDagProc<'a> {
    pub fn new(ctx: &'a ProcContext, task: &'a DagTask) -> Self {
        Self { ctx, task }
    }

    /// Cancel the job behind one node and mark the node cancelled.
    ///
    /// The caller holds the Dag's lock.
    pub async fn kill_dag_node(
        executor: &dyn ExecutorBackend,
        dag: &mut Dag<JobExecutionPlan>,
        index: usize,
    ) -> Result<()> {
        let node = dag.node_mut(index).ok_or_else(|| {
            FlowdagError::StateMissing(format!("dag has no node {index}"))
        })?;

        executor.cancel_job(node.value()).await?;
        node.set_status(ExecutionStatus::Cancelled);
        info!(
            dag = %node.value().fully_qualified_dag_name(),
            job = %node.value().job_name(),
            "job killed"
        );
        Ok(())
    }
}

impl DagProc for KillDagProc<'_> {
    type State = Option<DagHandle>;
    type Outcome = usize;

    fn initialize(&mut self) -> BoxFuture<'_, Result<Self::State>> {
        Box::pin(async move {
            let handle = self.ctx.state_store.handle(self.task.dag_id());
            if handle.is_none() {
                info!(dag_id = %self.task.dag_id(), "dag no longer running; nothing to kill");
            }
            Ok(handle)
        })
    }

    fn act(&mut self, state: Self::State) -> BoxFuture<'_, Result<Self::Outcome>> {
        Box::pin(async move {
            let Some(handle) = state else {
                return Ok(0);
            };

            let killed = {
                let mut dag = handle.lock().await;
                let live: Vec<usize> = dag
                    .nodes()
                    .iter()
                    .filter(|n| !n.status().is_terminal())
                    .map(|n| n.index())
                    .collect();

                for &index in &live {
                    Self::kill_dag_node(self.ctx.executor.as_ref(), &mut dag, index).await?;
                }

                if !dag.deadline_exceeded() {
                    dag.set_flow_event(FlowEvent::FlowCancelled);
                    dag.set_message("Flow killed by request");
                }
                live.len()
            };

            self.ctx.state_store.remove_dag(self.task.dag_id());
            Ok(killed)
        })
    }

    fn send_notification(&mut self, outcome: Self::Outcome) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(dag_id = %self.task.dag_id(), killed = outcome, "flow killed");
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Advance
// ---------------------------------------------------------------------------

/// What an advance step did to a Dag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The Dag is no longer live.
    Gone,
    /// New jobs were submitted or jobs are still running.
    Progressed { submitted: usize },
    /// Nothing is running and nothing else can run.
    Finished(FlowEvent),
}

pub struct AdvanceDagProc<'a> {
    ctx: &'a ProcContext,
    task: &'a DagTask,
}

impl<'a> AdvanceDagProc<'a> {
    pub fn new(ctx: &'a ProcContext, task: &'a DagTask) -> Self {
        Self { ctx, task }
    }

    /// Whether the flow-level status of `dag` reads CANCELLED.
    async fn cancelled_by_executor(&self, dag: &Dag<JobExecutionPlan>) -> Result<bool> {
        let Some(flow_status) = self.ctx.poller.poll_flow_status(dag).await? else {
            return Ok(false);
        };
        Ok(matches!(
            flow_status.execution_status(),
            Ok(ExecutionStatus::Cancelled)
        ))
    }

    async fn refresh_statuses(&self, dag: &mut Dag<JobExecutionPlan>) -> Result<()> {
        let active: Vec<usize> = dag
            .nodes()
            .iter()
            .filter(|n| n.status().is_active())
            .map(|n| n.index())
            .collect();

        for index in active {
            let Some(node) = dag.node_mut(index) else {
                continue;
            };
            let Some(job_status) = self.ctx.poller.poll_job_status(node).await? else {
                continue;
            };

            match job_status.execution_status() {
                Ok(status) if status != node.status() => {
                    debug!(job = %node.value().job_name(), %status, "job status changed");
                    node.set_status(status);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(job = %node.value().job_name(), error = %err, "ignoring unreadable job status");
                }
            }
        }
        Ok(())
    }
}

impl DagProc for AdvanceDagProc<'_> {
    type State = Option<DagHandle>;
    type Outcome = AdvanceOutcome;

    fn initialize(&mut self) -> BoxFuture<'_, Result<Self::State>> {
        Box::pin(async move { Ok(self.ctx.state_store.handle(self.task.dag_id())) })
    }

    fn act(&mut self, state: Self::State) -> BoxFuture<'_, Result<Self::Outcome>> {
        Box::pin(async move {
            let Some(handle) = state else {
                return Ok(AdvanceOutcome::Gone);
            };

            let mut dag = handle.lock().await;
            if !dag.deadline_exceeded() && self.cancelled_by_executor(&dag).await? {
                info!(dag_id = %self.task.dag_id(), "executor reports the flow cancelled");
                for node in dag.nodes_mut() {
                    if !node.status().is_terminal() {
                        node.set_status(ExecutionStatus::Cancelled);
                    }
                }
                dag.set_flow_event(FlowEvent::FlowCancelled);
                dag.set_message("Flow cancelled by executor");
            }
            self.refresh_statuses(&mut dag).await?;

            // A Dag killed for a deadline only winds down.
            let submitted = if dag.deadline_exceeded() {
                0
            } else {
                submit_ready_nodes(self.ctx.executor.as_ref(), &mut dag).await?
            };

            let running = dag.nodes().iter().any(|n| n.status().is_active());
            if submitted > 0 || running {
                return Ok(AdvanceOutcome::Progressed { submitted });
            }

            let succeeded = dag
                .nodes()
                .iter()
                .all(|n| n.status() == ExecutionStatus::Complete);
            let event = match dag.flow_event() {
                Some(deadline) if deadline.is_deadline_exceeded() => deadline,
                Some(FlowEvent::FlowCancelled) => FlowEvent::FlowCancelled,
                _ if succeeded => FlowEvent::FlowSucceeded,
                _ => FlowEvent::FlowFailed,
            };
            dag.set_flow_event(event);

            let finished = dag.clone();
            drop(dag);

            let dag_id = self.task.dag_id();
            self.ctx.state_store.remove_dag(dag_id);
            if !succeeded {
                self.ctx.failed_dags.add_dag(dag_id, finished).await?;
            }
            Ok(AdvanceOutcome::Finished(event))
        })
    }

    fn send_notification(&mut self, outcome: Self::Outcome) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match outcome {
                AdvanceOutcome::Gone => {
                    debug!(dag_id = %self.task.dag_id(), "dag gone; nothing to advance");
                }
                AdvanceOutcome::Progressed { submitted } => {
                    debug!(dag_id = %self.task.dag_id(), submitted, "dag advanced");
                }
                AdvanceOutcome::Finished(event) => {
                    info!(dag_id = %self.task.dag_id(), event = event.as_str(), "flow finished");
                }
            }
            Ok(())
        })
    }
}

fn live_handle(state_store: &DagStateStore, dag_id: &DagId) -> Result<DagHandle> {
    state_store
        .handle(dag_id)
        .ok_or_else(|| FlowdagError::StateMissing(dag_id.to_string()))
}
