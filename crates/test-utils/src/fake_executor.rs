use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use flowdag::BoxFuture;
use flowdag::dag::JobExecutionPlan;
use flowdag::errors::{Error, Result};
use flowdag::exec::ExecutorBackend;

/// A fake executor that:
/// - records every submitted and cancelled job
/// - can be told to fail cancellations.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    submitted: Mutex<Vec<JobExecutionPlan>>,
    cancelled: Mutex<Vec<JobExecutionPlan>>,
    fail_cancel: AtomicBool,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_cancellations(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Names of submitted jobs, in submission order.
    pub fn submitted_jobs(&self) -> Vec<String> {
        self.submitted
            .lock()
            .iter()
            .map(|p| p.job_name().to_string())
            .collect()
    }

    /// Names of cancelled jobs, in cancellation order.
    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .iter()
            .map(|p| p.job_name().to_string())
            .collect()
    }

    pub fn cancelled_plans(&self) -> Vec<JobExecutionPlan> {
        self.cancelled.lock().clone()
    }
}

impl ExecutorBackend for RecordingExecutor {
    fn submit_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.submitted.lock().push(plan.clone());
            Ok(())
        })
    }

    fn cancel_job<'a>(&'a self, plan: &'a JobExecutionPlan) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail_cancel.load(Ordering::SeqCst) {
                return Err(Error::msg(format!("cannot cancel {}", plan.job_name())).into());
            }
            self.cancelled.lock().push(plan.clone());
            Ok(())
        })
    }
}
