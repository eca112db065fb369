// src/metrics.rs

//! DAG manager metrics.
//!
//! Counters and timers are emitted through the `metrics` facade; the SLA
//! counters are additionally kept in-process so they can be read without an
//! installed recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::dag::JobExecutionPlan;

/// Flows killed because they ran past their completion SLA.
pub const EXECUTOR_SLA_EXCEEDED: &str = "flowdag_executor_sla_exceeded_total";

/// Jobs killed because they stayed ORCHESTRATED past their start SLA.
pub const START_SLA_EXCEEDED: &str = "flowdag_start_sla_exceeded_total";

/// Time spent asking the job status retriever for a status.
pub const JOB_STATUS_POLLED: &str = "flowdag_job_status_polled_seconds";

/// Registers all metric descriptions.
///
/// Call this once at application startup after installing a recorder.
pub fn register_metrics() {
    describe_counter!(EXECUTOR_SLA_EXCEEDED, "Flows killed for exceeding the flow SLA");
    describe_counter!(START_SLA_EXCEEDED, "Jobs killed for exceeding the job start SLA");
    describe_histogram!(JOB_STATUS_POLLED, "Duration of job status polls in seconds");
}

#[derive(Debug, Default)]
pub struct DagManagerMetrics {
    executor_sla_exceeded: AtomicU64,
    start_sla_exceeded: AtomicU64,
}

impl DagManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_executor_sla_exceeded(&self, plan: &JobExecutionPlan) {
        self.executor_sla_exceeded.fetch_add(1, Ordering::Relaxed);
        counter!(
            EXECUTOR_SLA_EXCEEDED,
            "flow_group" => plan.flow_group().to_string(),
            "flow_name" => plan.flow_name().to_string()
        )
        .increment(1);
    }

    pub fn increment_start_sla_exceeded(&self, plan: &JobExecutionPlan) {
        self.start_sla_exceeded.fetch_add(1, Ordering::Relaxed);
        counter!(
            START_SLA_EXCEEDED,
            "flow_group" => plan.flow_group().to_string(),
            "flow_name" => plan.flow_name().to_string()
        )
        .increment(1);
    }

    pub fn record_job_status_polled(&self, elapsed: Duration) {
        histogram!(JOB_STATUS_POLLED).record(elapsed.as_secs_f64());
    }

    pub fn executor_sla_exceeded(&self) -> u64 {
        self.executor_sla_exceeded.load(Ordering::Relaxed)
    }

    pub fn start_sla_exceeded(&self) -> u64 {
        self.start_sla_exceeded.load(Ordering::Relaxed)
    }
}
