use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use flowdag::BoxFuture;
use flowdag::catalog::{FlowCompiler, FlowSpec, PlanCompiler};
use flowdag::clock::Clock;
use flowdag::dag::{Dag, ExecutionStatus, JobExecutionPlan, JobStatus};
use flowdag::errors::{FlowdagError, Result};
use flowdag::lease::{LeaseArbiter, LeaseStatus, LeaseToken};
use flowdag::monitor::{JobStatusIter, JobStatusRetriever};
use flowdag::types::FlowAction;

/// One scripted answer of [`ScriptedLeaseArbiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStep {
    Obtain,
    NotLeader,
    Defer(Duration),
    Fail(String),
    /// Never answer; the caller's timeout has to kick in.
    Hang,
}

/// Lease arbiter answering from a script.
///
/// Answers for a specific action take precedence over the shared script;
/// once both are exhausted every call gets the default step.
#[derive(Debug)]
pub struct ScriptedLeaseArbiter {
    script: Mutex<VecDeque<LeaseStep>>,
    per_action: Mutex<HashMap<String, VecDeque<LeaseStep>>>,
    default_step: Mutex<LeaseStep>,
    calls: Mutex<Vec<FlowAction>>,
    released: Mutex<Vec<(FlowAction, LeaseToken)>>,
    next_token: AtomicU64,
}

impl Default for ScriptedLeaseArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLeaseArbiter {
    /// Grants every lease until scripted otherwise.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            per_action: Mutex::new(HashMap::new()),
            default_step: Mutex::new(LeaseStep::Obtain),
            calls: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn push(&self, step: LeaseStep) {
        self.script.lock().push_back(step);
    }

    pub fn push_for(&self, action: &FlowAction, step: LeaseStep) {
        self.per_action
            .lock()
            .entry(action.key())
            .or_default()
            .push_back(step);
    }

    pub fn set_default(&self, step: LeaseStep) {
        *self.default_step.lock() = step;
    }

    /// Every action a lease was asked for, in call order.
    pub fn calls(&self) -> Vec<FlowAction> {
        self.calls.lock().clone()
    }

    pub fn released(&self) -> Vec<(FlowAction, LeaseToken)> {
        self.released.lock().clone()
    }

    fn next_step(&self, action: &FlowAction) -> LeaseStep {
        if let Some(step) = self
            .per_action
            .lock()
            .get_mut(&action.key())
            .and_then(VecDeque::pop_front)
        {
            return step;
        }
        if let Some(step) = self.script.lock().pop_front() {
            return step;
        }
        self.default_step.lock().clone()
    }
}

impl LeaseArbiter for ScriptedLeaseArbiter {
    fn try_lease<'a>(
        &'a self,
        action: &'a FlowAction,
        _now_millis: i64,
    ) -> BoxFuture<'a, Result<LeaseStatus>> {
        Box::pin(async move {
            self.calls.lock().push(action.clone());

            match self.next_step(action) {
                LeaseStep::Obtain => {
                    let n = self.next_token.fetch_add(1, Ordering::SeqCst);
                    Ok(LeaseStatus::Obtained {
                        token: LeaseToken::new(format!("lease-{n}")),
                        ttl: Duration::from_secs(30),
                    })
                }
                LeaseStep::NotLeader => Ok(LeaseStatus::NotLeader),
                LeaseStep::Defer(retry_after) => Ok(LeaseStatus::Deferred { retry_after }),
                LeaseStep::Fail(msg) => Err(FlowdagError::LeaseError(msg)),
                LeaseStep::Hang => std::future::pending().await,
            }
        })
    }

    fn release<'a>(
        &'a self,
        action: &'a FlowAction,
        token: &'a LeaseToken,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.released.lock().push((action.clone(), token.clone()));
            Ok(true)
        })
    }
}

/// One scripted answer of [`ScriptedCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStep {
    /// Compile for real.
    Compile,
    /// Yield no Dag.
    Nothing,
    Unavailable,
    Interrupted,
}

/// Compiler that compiles for real unless scripted otherwise.
#[derive(Debug)]
pub struct ScriptedCompiler {
    inner: PlanCompiler,
    script: Mutex<VecDeque<CompileStep>>,
}

impl ScriptedCompiler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: PlanCompiler::new(clock),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, step: CompileStep) {
        self.script.lock().push_back(step);
    }
}

impl FlowCompiler for ScriptedCompiler {
    fn compile<'a>(
        &'a self,
        spec: &'a FlowSpec,
    ) -> BoxFuture<'a, Result<Option<Dag<JobExecutionPlan>>>> {
        let step = self.script.lock().pop_front().unwrap_or(CompileStep::Compile);

        match step {
            CompileStep::Compile => self.inner.compile(spec),
            CompileStep::Nothing => Box::pin(async { Ok(None) }),
            CompileStep::Unavailable => Box::pin(async move {
                Err(FlowdagError::CompileUnavailable(spec.flow_id.to_string()))
            }),
            CompileStep::Interrupted => Box::pin(async move {
                Err(FlowdagError::CompileInterrupted(spec.flow_id.to_string()))
            }),
        }
    }
}

type StatusKey = (String, String, i64, String, String);

/// Job status retriever serving whatever the test put in.
#[derive(Debug, Default)]
pub struct FakeJobStatusRetriever {
    statuses: Mutex<HashMap<StatusKey, Vec<JobStatus>>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl FakeJobStatusRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `status` the only (hence current) status of its job.
    pub fn set(&self, status: JobStatus) {
        let key = (
            status.flow_group.clone(),
            status.flow_name.clone(),
            status.flow_execution_id,
            status.job_group.clone(),
            status.job_name.clone(),
        );
        self.statuses.lock().insert(key, vec![status]);
    }

    /// Replace the full status sequence of a job; the first one is current.
    pub fn set_sequence(&self, statuses: Vec<JobStatus>) {
        let Some(first) = statuses.first() else {
            return;
        };
        let key = (
            first.flow_group.clone(),
            first.flow_name.clone(),
            first.flow_execution_id,
            first.job_group.clone(),
            first.job_name.clone(),
        );
        self.statuses.lock().insert(key, statuses);
    }

    pub fn fail_polls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl JobStatusRetriever for FakeJobStatusRetriever {
    fn statuses_for<'a>(
        &'a self,
        flow_name: &'a str,
        flow_group: &'a str,
        flow_execution_id: i64,
        job_name: &'a str,
        job_group: &'a str,
    ) -> BoxFuture<'a, Result<JobStatusIter>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FlowdagError::Other(anyhow::anyhow!(
                    "status store unreachable"
                )));
            }

            let key = (
                flow_group.to_string(),
                flow_name.to_string(),
                flow_execution_id,
                job_group.to_string(),
                job_name.to_string(),
            );
            let statuses = self.statuses.lock().get(&key).cloned().unwrap_or_default();
            Ok(Box::new(statuses.into_iter()) as JobStatusIter)
        })
    }
}

/// Status record for the job behind `plan`.
pub fn job_status(
    plan: &JobExecutionPlan,
    status: ExecutionStatus,
    orchestrated_time: i64,
) -> JobStatus {
    JobStatus {
        flow_group: plan.flow_group().to_string(),
        flow_name: plan.flow_name().to_string(),
        flow_execution_id: plan.flow_execution_id(),
        job_group: plan.job_group().to_string(),
        job_name: plan.job_name().to_string(),
        event_name: status.as_str().to_string(),
        orchestrated_time,
    }
}
