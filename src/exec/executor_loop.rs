// src/exec/executor_loop.rs

//! Background loop draining job commands.
//!
//! Jobs are run elsewhere; this loop is the hand-off point. It logs each
//! command and reports the resulting status (ORCHESTRATED on submit,
//! CANCELLED on cancel) to the in-memory status retriever, which is what the
//! deadline enforcer and the advance processor read.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::Clock;
use crate::dag::{ExecutionStatus, JobExecutionPlan, JobStatus};
use crate::exec::backend::{ChannelExecutorBackend, JobCommand};
use crate::monitor::InMemoryJobStatusRetriever;

/// Spawn the background executor loop.
///
/// The returned backend is what processors use; the loop finishes once every
/// clone of the backend has been dropped.
pub fn spawn_executor(
    statuses: Arc<InMemoryJobStatusRetriever>,
    clock: Arc<dyn Clock>,
) -> (ChannelExecutorBackend, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<JobCommand>(32);

    let handle = tokio::spawn(async move {
        info!("executor loop started");

        while let Some(command) = rx.recv().await {
            handle_command(command, &statuses, clock.as_ref());
        }

        info!("executor loop finished (channel closed)");
    });

    (ChannelExecutorBackend::new(tx), handle)
}

fn handle_command(command: JobCommand, statuses: &InMemoryJobStatusRetriever, clock: &dyn Clock) {
    let now = clock.now_millis();

    match command {
        JobCommand::Submit(plan) => {
            info!(
                dag = %plan.fully_qualified_dag_name(),
                job_group = %plan.job_group(),
                job = %plan.job_name(),
                "job handed to executor"
            );
            statuses.record(status_of(&plan, ExecutionStatus::Orchestrated, now));
        }
        JobCommand::Cancel(plan) => {
            info!(
                dag = %plan.fully_qualified_dag_name(),
                job_group = %plan.job_group(),
                job = %plan.job_name(),
                "job cancellation requested"
            );
            statuses.record(status_of(&plan, ExecutionStatus::Cancelled, now));
        }
    }
}

fn status_of(plan: &JobExecutionPlan, status: ExecutionStatus, now: i64) -> JobStatus {
    JobStatus {
        flow_group: plan.flow_group().to_string(),
        flow_name: plan.flow_name().to_string(),
        flow_execution_id: plan.flow_execution_id(),
        job_group: plan.job_group().to_string(),
        job_name: plan.job_name().to_string(),
        event_name: status.as_str().to_string(),
        orchestrated_time: now,
    }
}
