// src/monitor.rs

//! Job status retrieval.
//!
//! The observability plane is external; [`JobStatusRetriever`] is its seam.
//! [`JobStatusPoller`] is what the enforcer and the advance processor use: it
//! takes the first ("current") status of a job or flow and times each poll.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::trace;

use crate::BoxFuture;
use crate::dag::status::NA_KEY;
use crate::dag::{Dag, DagNode, JobExecutionPlan, JobStatus};
use crate::errors::Result;
use crate::metrics::DagManagerMetrics;

/// Finite, non-restartable sequence of statuses; the first one is current.
pub type JobStatusIter = Box<dyn Iterator<Item = JobStatus> + Send>;

pub trait JobStatusRetriever: Send + Sync {
    fn statuses_for<'a>(
        &'a self,
        flow_name: &'a str,
        flow_group: &'a str,
        flow_execution_id: i64,
        job_name: &'a str,
        job_group: &'a str,
    ) -> BoxFuture<'a, Result<JobStatusIter>>;
}

type StatusKey = (String, String, i64, String, String);

/// Keeps every recorded status per job, newest first.
#[derive(Debug, Default)]
pub struct InMemoryJobStatusRetriever {
    statuses: RwLock<HashMap<StatusKey, VecDeque<JobStatus>>>,
}

impl InMemoryJobStatusRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status; it becomes the current one for its job.
    pub fn record(&self, status: JobStatus) {
        let key = (
            status.flow_group.clone(),
            status.flow_name.clone(),
            status.flow_execution_id,
            status.job_group.clone(),
            status.job_name.clone(),
        );
        self.statuses
            .write()
            .entry(key)
            .or_default()
            .push_front(status);
    }
}

impl JobStatusRetriever for InMemoryJobStatusRetriever {
    fn statuses_for<'a>(
        &'a self,
        flow_name: &'a str,
        flow_group: &'a str,
        flow_execution_id: i64,
        job_name: &'a str,
        job_group: &'a str,
    ) -> BoxFuture<'a, Result<JobStatusIter>> {
        Box::pin(async move {
            let key = (
                flow_group.to_string(),
                flow_name.to_string(),
                flow_execution_id,
                job_group.to_string(),
                job_name.to_string(),
            );
            let statuses: Vec<JobStatus> = self
                .statuses
                .read()
                .get(&key)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default();
            Ok(Box::new(statuses.into_iter()) as JobStatusIter)
        })
    }
}

#[derive(Clone)]
pub struct JobStatusPoller {
    retriever: Arc<dyn JobStatusRetriever>,
    metrics: Arc<DagManagerMetrics>,
}

impl JobStatusPoller {
    pub fn new(retriever: Arc<dyn JobStatusRetriever>, metrics: Arc<DagManagerMetrics>) -> Self {
        Self { retriever, metrics }
    }

    /// Current status of the job behind `node`.
    pub async fn poll_job_status(
        &self,
        node: &DagNode<JobExecutionPlan>,
    ) -> Result<Option<JobStatus>> {
        let plan = node.value();
        self.poll_status(
            plan.flow_group(),
            plan.flow_name(),
            plan.flow_execution_id(),
            plan.job_group(),
            plan.job_name(),
        )
        .await
    }

    /// Flow-level status of a Dag (job name and group are [`NA_KEY`]).
    pub async fn poll_flow_status(
        &self,
        dag: &Dag<JobExecutionPlan>,
    ) -> Result<Option<JobStatus>> {
        let Some(first) = dag.nodes().first() else {
            return Ok(None);
        };
        let plan = first.value();
        self.poll_status(
            plan.flow_group(),
            plan.flow_name(),
            plan.flow_execution_id(),
            NA_KEY,
            NA_KEY,
        )
        .await
    }

    pub async fn poll_status(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
        job_group: &str,
        job_name: &str,
    ) -> Result<Option<JobStatus>> {
        let started = Instant::now();
        let mut statuses = self
            .retriever
            .statuses_for(flow_name, flow_group, flow_execution_id, job_name, job_group)
            .await?;
        self.metrics.record_job_status_polled(started.elapsed());

        let current = statuses.next();
        trace!(
            flow_group,
            flow_name,
            flow_execution_id,
            job_group,
            job_name,
            found = current.is_some(),
            "polled job status"
        );
        Ok(current)
    }
}
