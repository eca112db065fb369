// src/dag/mod.rs

//! DAG representation and live DAG state.
//!
//! - [`graph`] holds the index-linked `Dag` / `DagNode` structure.
//! - [`plan`] provides the per-job execution plan and its derived SLA values.
//! - [`status`] defines execution statuses, flow events and job statuses.
//! - [`state_store`] owns every live Dag plus its SLA bookkeeping.

pub mod graph;
pub mod plan;
pub mod state_store;
pub mod status;

pub use graph::{Dag, DagNode};
pub use plan::{JobConfig, JobExecutionPlan};
pub use state_store::{DagHandle, DagStateStore};
pub use status::{ExecutionStatus, FlowEvent, JobStatus};
