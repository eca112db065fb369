// src/engine/enforcer.rs

//! Flow-completion and job-start deadline enforcement.
//!
//! Two deadlines apply to a live Dag:
//!
//! - flow completion: `now - flowStartTime > flowSla` on any active node
//!   trips it and records `FLOW_RUN_DEADLINE_EXCEEDED`;
//! - job start: a job still ORCHESTRATED more than `jobStartSla` after it was
//!   orchestrated trips it and records `FLOW_START_DEADLINE_EXCEEDED`.
//!
//! Tripping either deadline cancels every active node of the Dag.
//!
//! Once either event is on a Dag, enforcement leaves that Dag alone. Checks
//! and kills happen under the Dag's own lock, so an enforcement pass never
//! races a processor working on the same Dag.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::dag::plan::{DEFAULT_FLOW_SLA_MILLIS, DEFAULT_JOB_START_SLA_MILLIS};
use crate::dag::{Dag, DagNode, DagStateStore, ExecutionStatus, FlowEvent, JobExecutionPlan, JobStatus};
use crate::engine::processor::KillDagProc;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::metrics::DagManagerMetrics;
use crate::monitor::JobStatusPoller;
use crate::types::DagId;

/// Defaults applied when a job config carries no SLA of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaDefaults {
    pub flow_sla_millis: i64,
    pub job_start_sla_millis: i64,
}

impl Default for SlaDefaults {
    fn default() -> Self {
        Self {
            flow_sla_millis: DEFAULT_FLOW_SLA_MILLIS,
            job_start_sla_millis: DEFAULT_JOB_START_SLA_MILLIS,
        }
    }
}

pub struct DeadlineEnforcer {
    state_store: Arc<DagStateStore>,
    executor: Arc<dyn ExecutorBackend>,
    poller: JobStatusPoller,
    metrics: Arc<DagManagerMetrics>,
    clock: Arc<dyn Clock>,
    defaults: SlaDefaults,
    interval: Duration,
}

impl DeadlineEnforcer {
    pub fn new(
        state_store: Arc<DagStateStore>,
        executor: Arc<dyn ExecutorBackend>,
        poller: JobStatusPoller,
        metrics: Arc<DagManagerMetrics>,
        clock: Arc<dyn Clock>,
        defaults: SlaDefaults,
        interval: Duration,
    ) -> Self {
        Self {
            state_store,
            executor,
            poller,
            metrics,
            clock,
            defaults,
            interval,
        }
    }

    /// Kill the flow of `node` if it has run longer than its SLA.
    ///
    /// `node` may come from a snapshot; the decision is made against the live
    /// node under the Dag's lock. Tripping cancels every active node of the
    /// Dag. Returns `true` iff this call tripped the deadline.
    pub async fn enforce_flow_completion_deadline(
        &self,
        node: &DagNode<JobExecutionPlan>,
    ) -> Result<bool> {
        let plan = node.value();
        let dag_id = plan.dag_id();

        let Some(handle) = self.state_store.handle(&dag_id) else {
            debug!(%dag_id, "dag gone; skipping flow deadline check");
            return Ok(false);
        };
        let mut dag = handle.lock().await;
        if dag.deadline_exceeded() || !is_live_and_active(&dag, node) {
            return Ok(false);
        }

        let flow_sla = self.flow_sla_for(&dag_id, plan);
        let elapsed = self.clock.now_millis().saturating_sub(plan.flow_start_time());
        if elapsed <= flow_sla {
            return Ok(false);
        }

        info!(
            dag = %plan.fully_qualified_dag_name(),
            job = %plan.job_name(),
            flow_sla_ms = flow_sla,
            elapsed_ms = elapsed,
            "flow exceeded its SLA; killing flow"
        );
        self.kill_active_nodes(&mut dag).await?;

        dag.set_flow_event(FlowEvent::FlowRunDeadlineExceeded);
        dag.set_message(format!("Flow killed due to exceeding SLA of {flow_sla} ms"));
        self.metrics.increment_executor_sla_exceeded(plan);
        Ok(true)
    }

    /// Kill the flow of `node` if its job has sat in ORCHESTRATED for longer
    /// than its start SLA.
    ///
    /// `job_status` is the job's current status; `None` means no status has
    /// been reported yet, which never trips the deadline.
    pub async fn enforce_job_start_deadline(
        &self,
        node: &DagNode<JobExecutionPlan>,
        job_status: Option<&JobStatus>,
    ) -> Result<bool> {
        let Some(job_status) = job_status else {
            return Ok(false);
        };

        let plan = node.value();
        let status = match job_status.execution_status() {
            Ok(status) => status,
            Err(err) => {
                warn!(job = %plan.job_name(), error = %err, "unreadable job status; skipping start deadline");
                return Ok(false);
            }
        };
        if status != ExecutionStatus::Orchestrated {
            return Ok(false);
        }

        let dag_id = plan.dag_id();
        let timeout = self.job_start_sla_for(&dag_id, plan);
        let waited = self
            .clock
            .now_millis()
            .saturating_sub(job_status.orchestrated_time);
        if waited <= timeout {
            return Ok(false);
        }

        let Some(handle) = self.state_store.handle(&dag_id) else {
            debug!(%dag_id, "dag gone; skipping job start deadline");
            return Ok(false);
        };
        let mut dag = handle.lock().await;
        if dag.deadline_exceeded() || !is_live_and_active(&dag, node) {
            return Ok(false);
        }

        info!(
            dag = %plan.fully_qualified_dag_name(),
            job = %plan.job_name(),
            job_start_sla_ms = timeout,
            waited_ms = waited,
            "job not started within its SLA; killing flow"
        );
        self.kill_active_nodes(&mut dag).await?;

        dag.set_flow_event(FlowEvent::FlowStartDeadlineExceeded);
        dag.set_message(format!(
            "Flow killed because no update received for {timeout} ms after orchestration"
        ));
        self.metrics.increment_start_sla_exceeded(plan);
        Ok(true)
    }

    /// Cancel every node of `dag` that is still active.
    ///
    /// The caller holds the Dag's lock.
    async fn kill_active_nodes(&self, dag: &mut Dag<JobExecutionPlan>) -> Result<usize> {
        let active: Vec<usize> = dag
            .nodes()
            .iter()
            .filter(|n| n.status().is_active())
            .map(|n| n.index())
            .collect();

        for &index in &active {
            KillDagProc::kill_dag_node(self.executor.as_ref(), dag, index).await?;
        }
        Ok(active.len())
    }

    fn job_start_sla_for(&self, dag_id: &DagId, plan: &JobExecutionPlan) -> i64 {
        match plan.job_start_sla_millis(self.defaults.job_start_sla_millis) {
            Ok(millis) => millis,
            Err(err) => {
                if self.state_store.mark_malformed_start_sla_reported(dag_id) {
                    warn!(
                        %dag_id,
                        job = %plan.job_name(),
                        error = %err,
                        default_ms = self.defaults.job_start_sla_millis,
                        "malformed job start SLA; using default"
                    );
                }
                self.defaults.job_start_sla_millis
            }
        }
    }

    /// Flow SLA of a live Dag, derived from its job config on first use and
    /// cached afterwards.
    ///
    /// A malformed SLA falls back to the default and is reported once per Dag.
    pub fn flow_sla_for(&self, dag_id: &DagId, plan: &JobExecutionPlan) -> i64 {
        if let Some(cached) = self.state_store.get_cached_flow_sla(dag_id) {
            return cached;
        }

        let sla = match plan.flow_sla_millis(self.defaults.flow_sla_millis) {
            Ok(millis) => millis,
            Err(err) => {
                if self.state_store.mark_malformed_sla_reported(dag_id) {
                    warn!(
                        %dag_id,
                        error = %err,
                        default_ms = self.defaults.flow_sla_millis,
                        "malformed flow SLA; using default"
                    );
                }
                self.defaults.flow_sla_millis
            }
        };

        self.state_store.cache_flow_sla(dag_id, sla);
        sla
    }

    /// Check every active node of every live Dag once.
    ///
    /// Dags are checked in parallel. Returns how many Dags tripped a deadline.
    pub async fn run_pass(self: &Arc<Self>) -> usize {
        let mut checks = JoinSet::new();
        for dag_id in self.state_store.dag_ids() {
            let enforcer = Arc::clone(self);
            checks.spawn(async move {
                let outcome = enforcer.enforce_dag(&dag_id).await;
                (dag_id, outcome)
            });
        }

        let mut killed = 0;
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((_, Ok(n))) => killed += n,
                Ok((dag_id, Err(err))) => {
                    warn!(%dag_id, error = %err, "deadline check failed");
                }
                Err(err) => {
                    warn!(error = %err, "deadline check task panicked or was cancelled");
                }
            }
        }
        killed
    }

    async fn enforce_dag(&self, dag_id: &DagId) -> Result<usize> {
        let Some(dag) = self.state_store.get_dag(dag_id).await else {
            return Ok(0);
        };
        if dag.deadline_exceeded() {
            return Ok(0);
        }

        for node in dag.nodes().iter().filter(|n| n.status().is_active()) {
            if self.enforce_flow_completion_deadline(node).await? {
                return Ok(1);
            }

            let job_status = self.poller.poll_job_status(node).await?;
            if self
                .enforce_job_start_deadline(node, job_status.as_ref())
                .await?
            {
                return Ok(1);
            }
        }
        Ok(0)
    }

    /// Run enforcement passes on a fixed interval until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "deadline enforcer started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let killed = self.run_pass().await;
                    if killed > 0 {
                        info!(killed, "deadline pass killed flows");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("deadline enforcer stopped");
    }
}

/// Whether the live counterpart of `node` is still active in `dag`.
fn is_live_and_active(dag: &Dag<JobExecutionPlan>, node: &DagNode<JobExecutionPlan>) -> bool {
    dag.node(node.index())
        .is_some_and(|live| live.status().is_active())
}
