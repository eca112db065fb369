// src/catalog/compiler.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::BoxFuture;
use crate::catalog::FlowSpec;
use crate::clock::Clock;
use crate::dag::plan::{JobConfig, SlaTimeUnit, keys};
use crate::dag::{Dag, JobExecutionPlan};
use crate::errors::{FlowdagError, Result};

/// Turns a flow spec into an executable plan.
pub trait FlowCompiler: Send + Sync {
    /// `Ok(None)` means the spec does not yield a runnable Dag.
    ///
    /// Fails with `CompileUnavailable` when the compiler cannot serve
    /// requests and `CompileInterrupted` when a compilation is cut short.
    fn compile<'a>(
        &'a self,
        spec: &'a FlowSpec,
    ) -> BoxFuture<'a, Result<Option<Dag<JobExecutionPlan>>>>;
}

/// Compiles each job of a spec into one plan node and wires `after` edges.
///
/// The flow execution id is the clock reading at compile time.
#[derive(Debug)]
pub struct PlanCompiler {
    clock: Arc<dyn Clock>,
    healthy: AtomicBool,
}

impl PlanCompiler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            healthy: AtomicBool::new(true),
        }
    }

    /// An unhealthy compiler rejects every request with `CompileUnavailable`.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Synchronous core of [`FlowCompiler::compile`].
    pub fn compile_spec(
        &self,
        spec: &FlowSpec,
        flow_execution_id: i64,
    ) -> Result<Option<Dag<JobExecutionPlan>>> {
        if spec.jobs.is_empty() {
            warn!(flow = %spec.flow_id, "flow declares no jobs; nothing to compile");
            return Ok(None);
        }

        let positions: HashMap<&str, usize> = spec
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.name.as_str(), i))
            .collect();

        let mut edges = Vec::new();
        for (child, job) in spec.jobs.iter().enumerate() {
            for dep in job.after.iter() {
                match positions.get(dep.as_str()) {
                    Some(&parent) => edges.push((parent, child)),
                    None => {
                        warn!(
                            flow = %spec.flow_id,
                            job = %job.name,
                            dep = %dep,
                            "job depends on unknown job; flow is not compilable"
                        );
                        return Ok(None);
                    }
                }
            }
        }

        let mut plans = Vec::with_capacity(spec.jobs.len());
        for job in spec.jobs.iter() {
            let mut config: JobConfig = job.properties.clone();
            let flow_group = spec.flow_id.flow_group().to_string();

            config.insert(keys::FLOW_GROUP_KEY.to_string(), flow_group.clone());
            config.insert(
                keys::FLOW_NAME_KEY.to_string(),
                spec.flow_id.flow_name().to_string(),
            );
            config.insert(
                keys::FLOW_EXECUTION_ID_KEY.to_string(),
                flow_execution_id.to_string(),
            );
            config.insert(
                keys::JOB_GROUP_KEY.to_string(),
                job.group.clone().unwrap_or(flow_group),
            );
            config.insert(keys::JOB_NAME_KEY.to_string(), job.name.clone());

            if let Some(sla) = spec.flow_sla {
                write_sla(
                    &mut config,
                    keys::FLOW_SLA_TIME_KEY,
                    keys::FLOW_SLA_TIMEUNIT_KEY,
                    sla,
                );
            }
            if let Some(sla) = spec.job_start_sla {
                write_sla(
                    &mut config,
                    keys::JOB_START_SLA_TIME_KEY,
                    keys::JOB_START_SLA_TIMEUNIT_KEY,
                    sla,
                );
            }

            plans.push(JobExecutionPlan::new(config)?);
        }

        match Dag::new(plans, &edges) {
            Ok(dag) => {
                debug!(
                    flow = %spec.flow_id,
                    flow_execution_id,
                    nodes = dag.len(),
                    "compiled flow into execution plan dag"
                );
                Ok(Some(dag))
            }
            Err(FlowdagError::DagCycle(msg)) => {
                warn!(flow = %spec.flow_id, %msg, "flow has cyclic job dependencies");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl FlowCompiler for PlanCompiler {
    fn compile<'a>(
        &'a self,
        spec: &'a FlowSpec,
    ) -> BoxFuture<'a, Result<Option<Dag<JobExecutionPlan>>>> {
        Box::pin(async move {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(FlowdagError::CompileUnavailable(format!(
                    "compiler is not healthy; cannot compile {}",
                    spec.flow_id
                )));
            }
            self.compile_spec(spec, self.clock.now_millis())
        })
    }
}

fn write_sla(config: &mut JobConfig, time_key: &str, unit_key: &str, sla: Duration) {
    config.insert(time_key.to_string(), sla.as_millis().to_string());
    config.insert(
        unit_key.to_string(),
        SlaTimeUnit::Milliseconds.as_str().to_string(),
    );
}
