// src/dag/status.rs

//! Execution statuses, flow events and polled job statuses.

use std::fmt;
use std::str::FromStr;

use crate::errors::{FlowdagError, Result};

/// Job and flow name/group used when asking for the flow-level status.
pub const NA_KEY: &str = "NA";

/// Lifecycle status of a job (node) as reported by the observability plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Compiled,
    Pending,
    PendingRetry,
    PendingResume,
    /// Handed to an executor, no progress reported yet.
    Orchestrated,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Compiled => "COMPILED",
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::PendingRetry => "PENDING_RETRY",
            ExecutionStatus::PendingResume => "PENDING_RESUME",
            ExecutionStatus::Orchestrated => "ORCHESTRATED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Complete => "COMPLETE",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Complete | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Waiting to be submitted to an executor.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Compiled
                | ExecutionStatus::Pending
                | ExecutionStatus::PendingRetry
                | ExecutionStatus::PendingResume
        )
    }

    /// Submitted and not yet terminal; deadlines apply to these.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Orchestrated | ExecutionStatus::Running
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = FlowdagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "COMPILED" => Ok(ExecutionStatus::Compiled),
            "PENDING" => Ok(ExecutionStatus::Pending),
            "PENDING_RETRY" => Ok(ExecutionStatus::PendingRetry),
            "PENDING_RESUME" => Ok(ExecutionStatus::PendingResume),
            "ORCHESTRATED" => Ok(ExecutionStatus::Orchestrated),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETE" => Ok(ExecutionStatus::Complete),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            other => Err(FlowdagError::ConfigMalformed(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// Flow-level timing event recorded on a Dag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    FlowRunDeadlineExceeded,
    FlowStartDeadlineExceeded,
    FlowCancelled,
    FlowSucceeded,
    FlowFailed,
}

impl FlowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowEvent::FlowRunDeadlineExceeded => "FLOW_RUN_DEADLINE_EXCEEDED",
            FlowEvent::FlowStartDeadlineExceeded => "FLOW_START_DEADLINE_EXCEEDED",
            FlowEvent::FlowCancelled => "FLOW_CANCELLED",
            FlowEvent::FlowSucceeded => "FLOW_SUCCEEDED",
            FlowEvent::FlowFailed => "FLOW_FAILED",
        }
    }

    /// Once one of these is recorded, deadline enforcement stops for the Dag.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            FlowEvent::FlowRunDeadlineExceeded | FlowEvent::FlowStartDeadlineExceeded
        )
    }
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status record returned by the job status retriever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub flow_group: String,
    pub flow_name: String,
    pub flow_execution_id: i64,
    pub job_group: String,
    pub job_name: String,
    /// Name of the last event, parseable as an [`ExecutionStatus`].
    pub event_name: String,
    /// Epoch millis at which the job was handed to an executor.
    pub orchestrated_time: i64,
}

impl JobStatus {
    pub fn execution_status(&self) -> Result<ExecutionStatus> {
        self.event_name.parse()
    }
}
