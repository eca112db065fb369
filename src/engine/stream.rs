// src/engine/stream.rs

//! Lease-gated FIFO of DAG tasks.
//!
//! Producers (the management API) push at the tail. The single consumer
//! (the DAG manager) pulls with [`DagTaskStream::next`], which only hands a
//! task out once the lease for its flow action has been obtained:
//!
//! 1. peek at the head without removing it;
//! 2. ask the lease arbiter for the head's action;
//! 3. on `Obtained`, remove exactly that task and return it with its token;
//!    on `NotLeader` or `Deferred`, leave the queue untouched.
//!
//! A task is therefore never lost between peek and lease, and never handed
//! out without a lease.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::engine::task::DagTask;
use crate::errors::{FlowdagError, Result};
use crate::lease::{LeaseArbiter, LeaseStatus};
use crate::types::FlowAction;

/// Tunables of the task stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// `None` means unbounded.
    pub capacity: Option<usize>,
    /// Let a later task overtake a head whose lease is deferred.
    pub allow_reorder_on_defer: bool,
    /// A lease call taking longer than this counts as deferred.
    pub lease_call_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            capacity: None,
            allow_reorder_on_defer: false,
            lease_call_timeout: Duration::from_secs(5),
        }
    }
}

pub struct DagTaskStream {
    queue: Mutex<VecDeque<DagTask>>,
    /// Serializes pulls, so positions observed by a pull stay valid until it
    /// removes the task it leased.
    pull_lock: AsyncMutex<()>,
    /// Signalled when a task is added.
    available: Notify,
    /// Signalled when a task is removed.
    space: Notify,
    lease_arbiter: Arc<dyn LeaseArbiter>,
    clock: Arc<dyn Clock>,
    options: StreamOptions,
}

impl fmt::Debug for DagTaskStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagTaskStream")
            .field("len", &self.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DagTaskStream {
    pub fn new(
        lease_arbiter: Arc<dyn LeaseArbiter>,
        clock: Arc<dyn Clock>,
        options: StreamOptions,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pull_lock: AsyncMutex::new(()),
            available: Notify::new(),
            space: Notify::new(),
            lease_arbiter,
            clock,
            options,
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Append a task at the tail.
    ///
    /// Fails with `QueueRejected` if the stream is bounded and full.
    pub fn submit(&self, task: DagTask) -> Result<()> {
        self.try_push(task).map_err(|(_, capacity)| {
            warn!(capacity, "task stream full; rejecting submission");
            FlowdagError::QueueRejected { capacity }
        })
    }

    /// Append a task at the tail, waiting for room if the stream is full.
    pub async fn submit_wait(&self, task: DagTask) {
        let mut task = task;
        loop {
            let notified = self.space.notified();
            match self.try_push(task) {
                Ok(()) => return,
                Err((rejected, capacity)) => {
                    debug!(capacity, "task stream full; waiting for room");
                    task = rejected;
                    notified.await;
                }
            }
        }
    }

    fn try_push(&self, task: DagTask) -> std::result::Result<(), (DagTask, usize)> {
        {
            let mut queue = self.queue.lock();
            if let Some(capacity) = self.options.capacity
                && queue.len() >= capacity
            {
                return Err((task, capacity));
            }
            debug!(action = %task.action(), position = queue.len(), "task enqueued");
            queue.push_back(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// `true` iff the queue is non-empty. Does not consult the lease arbiter.
    pub fn has_next(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Wait until a task has been added since the last wake-up.
    pub async fn wait_for_task(&self) {
        if self.has_next() {
            return;
        }
        self.available.notified().await;
    }

    /// Pull the next task whose lease could be obtained.
    ///
    /// `Ok(None)` means nothing is available right now: the stream is empty,
    /// this participant is not the leader, or the lease is held elsewhere.
    /// Lease failures surface as `LeaseError` and leave the queue unchanged.
    pub async fn next(&self) -> Result<Option<DagTask>> {
        let _pull = self.pull_lock.lock().await;

        let mut position = 0;
        while let Some(candidate) = self.peek_at(position) {
            let action = candidate.action();

            match self.lease(&action).await? {
                LeaseStatus::Obtained { token, ttl } => {
                    let task = self.take_at(position, &candidate)?;
                    debug!(%action, ttl_ms = ttl.as_millis() as u64, "lease obtained; task pulled");
                    return Ok(Some(task.with_lease(token)));
                }
                LeaseStatus::NotLeader => {
                    debug!(%action, "not the leader; leaving task queued");
                    return Ok(None);
                }
                LeaseStatus::Deferred { retry_after } => {
                    debug!(
                        %action,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "lease deferred"
                    );
                    if !self.options.allow_reorder_on_defer {
                        return Ok(None);
                    }
                    position += 1;
                }
            }
        }

        Ok(None)
    }

    fn peek_at(&self, position: usize) -> Option<DagTask> {
        self.queue.lock().get(position).cloned()
    }

    fn take_at(&self, position: usize, expected: &DagTask) -> Result<DagTask> {
        let removed = {
            let mut queue = self.queue.lock();
            match queue.get(position) {
                Some(task) if task == expected => queue.remove(position),
                _ => None,
            }
        };

        match removed {
            Some(task) => {
                self.space.notify_one();
                Ok(task)
            }
            None => Err(FlowdagError::Other(anyhow::anyhow!(
                "task {} moved while its lease was being obtained",
                expected.action()
            ))),
        }
    }

    async fn lease(&self, action: &FlowAction) -> Result<LeaseStatus> {
        let now = self.clock.now_millis();
        let call = self.lease_arbiter.try_lease(action, now);

        match timeout(self.options.lease_call_timeout, call).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(FlowdagError::LeaseError(msg))) => Err(FlowdagError::LeaseError(msg)),
            Ok(Err(other)) => Err(FlowdagError::LeaseError(other.to_string())),
            Err(_) => {
                warn!(
                    %action,
                    timeout_ms = self.options.lease_call_timeout.as_millis() as u64,
                    "lease call timed out; treating as deferred"
                );
                Ok(LeaseStatus::Deferred {
                    retry_after: self.options.lease_call_timeout,
                })
            }
        }
    }
}
