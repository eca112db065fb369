// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! Processors talk to an `ExecutorBackend` instead of an executor directly.
//! Running jobs is outside this crate, so the production backend
//! ([`ChannelExecutorBackend`]) only forwards [`JobCommand`]s over an mpsc
//! channel to whatever executes them. Tests can provide their own backend
//! that records what was submitted and cancelled.

use tokio::sync::mpsc;

use crate::BoxFuture;
use crate::dag::JobExecutionPlan;
use crate::errors::{Error, Result};

/// Instruction for the job executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    Submit(JobExecutionPlan),
    Cancel(JobExecutionPlan),
}

/// Trait abstracting how jobs are started and stopped.
pub trait ExecutorBackend: Send + Sync {
    /// Hand a job to the executor.
    fn submit_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>>;

    /// Ask the executor to stop a job. Cancelling an unknown or finished job
    /// is not an error.
    fn cancel_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>>;
}

/// Backend forwarding every command over a channel.
#[derive(Debug, Clone)]
pub struct ChannelExecutorBackend {
    tx: mpsc::Sender<JobCommand>,
}

impl ChannelExecutorBackend {
    pub fn new(tx: mpsc::Sender<JobCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, command: JobCommand) -> BoxFuture<'_, Result<()>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(command).await.map_err(Error::from)?;
            Ok(())
        })
    }
}

impl ExecutorBackend for ChannelExecutorBackend {
    fn submit_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>> {
        self.send(JobCommand::Submit(plan.clone()))
    }

    fn cancel_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>> {
        self.send(JobCommand::Cancel(plan.clone()))
    }
}
