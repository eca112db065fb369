// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - [`task`]: DAG tasks and the factory building them from flow actions
//! - [`stream`]: the lease-gated FIFO of tasks
//! - [`management`]: launch, resume, kill and advance requests
//! - [`processor`]: the per-kind processors carrying tasks out
//! - [`enforcer`]: flow-completion and job-start deadlines
//! - [`runtime`]: the consumer loop pulling tasks off the stream

pub mod enforcer;
pub mod management;
pub mod processor;
pub mod runtime;
pub mod stream;
pub mod task;

pub use enforcer::{DeadlineEnforcer, SlaDefaults};
pub use management::DagManagementService;
pub use processor::{
    AdvanceDagProc, AdvanceOutcome, DagProc, KillDagProc, LaunchDagProc, ProcContext,
    ResumeDagProc, process, process_task,
};
pub use runtime::{DagManager, DagManagerOptions};
pub use stream::{DagTaskStream, StreamOptions};
pub use task::{DagTask, DagTaskFactory, DagTaskKind};
