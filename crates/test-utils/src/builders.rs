#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use flowdag::catalog::{FlowSpec, JobSpec};
use flowdag::config::{FlowConfig, FlowdagConfig, JobEntry, RawConfigFile};
use flowdag::dag::plan::keys;
use flowdag::dag::{Dag, ExecutionStatus, JobConfig, JobExecutionPlan};
use flowdag::types::{DagId, FlowId};

/// Builder for `JobExecutionPlan`.
///
/// Starts out with every identity key set; SLA keys and extra properties
/// can be added or identity keys removed to produce malformed configs.
pub struct PlanBuilder {
    config: JobConfig,
}

impl PlanBuilder {
    pub fn new(dag_id: &DagId, job_name: &str) -> Self {
        let mut config = JobConfig::new();
        config.insert(keys::FLOW_GROUP_KEY.to_string(), dag_id.flow_group.clone());
        config.insert(keys::FLOW_NAME_KEY.to_string(), dag_id.flow_name.clone());
        config.insert(
            keys::FLOW_EXECUTION_ID_KEY.to_string(),
            dag_id.flow_execution_id.to_string(),
        );
        config.insert(keys::JOB_GROUP_KEY.to_string(), dag_id.flow_group.clone());
        config.insert(keys::JOB_NAME_KEY.to_string(), job_name.to_string());
        Self { config }
    }

    pub fn with_flow_sla(mut self, time: &str, unit: &str) -> Self {
        self.config
            .insert(keys::FLOW_SLA_TIME_KEY.to_string(), time.to_string());
        self.config
            .insert(keys::FLOW_SLA_TIMEUNIT_KEY.to_string(), unit.to_string());
        self
    }

    pub fn with_job_start_sla(mut self, time: &str, unit: &str) -> Self {
        self.config
            .insert(keys::JOB_START_SLA_TIME_KEY.to_string(), time.to_string());
        self.config
            .insert(keys::JOB_START_SLA_TIMEUNIT_KEY.to_string(), unit.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.config.remove(key);
        self
    }

    pub fn config(self) -> JobConfig {
        self.config
    }

    pub fn build(self) -> JobExecutionPlan {
        JobExecutionPlan::new(self.config).expect("Failed to build plan from builder")
    }
}

/// Builder for `Dag<JobExecutionPlan>`.
pub struct DagBuilder {
    dag_id: DagId,
    jobs: Vec<PlanBuilder>,
    edges: Vec<(usize, usize)>,
    statuses: Vec<(usize, ExecutionStatus)>,
}

impl DagBuilder {
    pub fn new(dag_id: &DagId) -> Self {
        Self {
            dag_id: dag_id.clone(),
            jobs: Vec::new(),
            edges: Vec::new(),
            statuses: Vec::new(),
        }
    }

    /// Add a job named `name`; its index is the number of jobs added before.
    pub fn job(mut self, name: &str) -> Self {
        self.jobs.push(PlanBuilder::new(&self.dag_id, name));
        self
    }

    /// Add a job from a customized plan builder.
    pub fn job_with(mut self, plan: PlanBuilder) -> Self {
        self.jobs.push(plan);
        self
    }

    pub fn edge(mut self, parent: usize, child: usize) -> Self {
        self.edges.push((parent, child));
        self
    }

    pub fn status(mut self, index: usize, status: ExecutionStatus) -> Self {
        self.statuses.push((index, status));
        self
    }

    pub fn build(self) -> Dag<JobExecutionPlan> {
        let plans = self.jobs.into_iter().map(PlanBuilder::build).collect();
        let mut dag = Dag::new(plans, &self.edges).expect("Failed to build dag from builder");
        for (index, status) in self.statuses {
            dag.node_mut(index)
                .expect("status set on a node that does not exist")
                .set_status(status);
        }
        dag
    }
}

/// Dag id with the given execution id.
pub fn dag_id(flow_group: &str, flow_name: &str, flow_execution_id: i64) -> DagId {
    DagId::new(flow_group, flow_name, flow_execution_id)
}

/// Single-job Dag whose job is in `status`.
pub fn single_job_dag(dag_id: &DagId, job: &str, status: ExecutionStatus) -> Dag<JobExecutionPlan> {
    DagBuilder::new(dag_id).job(job).status(0, status).build()
}

/// Builder for `FlowSpec`.
pub struct FlowSpecBuilder {
    spec: FlowSpec,
}

impl FlowSpecBuilder {
    pub fn new(flow_group: &str, flow_name: &str) -> Self {
        let flow_id = FlowId::new(flow_group, flow_name).expect("valid flow id");
        Self {
            spec: FlowSpec::new(flow_id),
        }
    }

    pub fn job(mut self, name: &str, after: &[&str]) -> Self {
        let mut job = JobSpec::new(name);
        job.after = after.iter().map(|s| s.to_string()).collect();
        self.spec.jobs.push(job);
        self
    }

    pub fn flow_sla(mut self, sla: Duration) -> Self {
        self.spec.flow_sla = Some(sla);
        self
    }

    pub fn job_start_sla(mut self, sla: Duration) -> Self {
        self.spec.job_start_sla = Some(sla);
        self
    }

    pub fn build(self) -> FlowSpec {
        self.spec
    }
}

/// Builder for `FlowdagConfig` to simplify test setup.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.stream.queue_capacity = Some(capacity);
        self
    }

    pub fn allow_reorder_on_defer(mut self, allow: bool) -> Self {
        self.config.stream.allow_reorder_on_defer = allow;
        self
    }

    /// Add a flow whose jobs are `(name, after)` pairs.
    pub fn flow(mut self, flow_group: &str, flow_name: &str, jobs: &[(&str, &[&str])]) -> Self {
        let job = jobs
            .iter()
            .map(|(name, after)| {
                let entry = JobEntry {
                    after: after.iter().map(|s| s.to_string()).collect(),
                    ..JobEntry::default()
                };
                (name.to_string(), entry)
            })
            .collect::<BTreeMap<_, _>>();

        self.config.flow.push(FlowConfig {
            group: flow_group.to_string(),
            name: flow_name.to_string(),
            launch_on_start: false,
            flow_sla: None,
            job_start_sla: None,
            job,
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> FlowdagConfig {
        FlowdagConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
