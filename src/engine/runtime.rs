// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::management::DagManagementService;
use crate::engine::processor::{ProcContext, process_task};
use crate::engine::stream::DagTaskStream;
use crate::engine::task::DagTask;
use crate::errors::Result;

/// Options of the consumer loop.
#[derive(Debug, Clone, Copy)]
pub struct DagManagerOptions {
    /// How long to back off when no task could be pulled.
    pub poll_interval: Duration,
    /// Stop once the task stream is drained (used for `--once`).
    pub exit_when_idle: bool,
}

impl Default for DagManagerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            exit_when_idle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pulled {
    Nothing,
    Committed,
    Requeued,
}

/// Single consumer of the task stream.
///
/// Pulls leased tasks and hands each one to its processor. While the stream
/// is empty it asks the management service to advance every live Dag, so
/// running flows keep making progress.
pub struct DagManager {
    stream: Arc<DagTaskStream>,
    management: Arc<DagManagementService>,
    ctx: ProcContext,
    options: DagManagerOptions,
}

impl fmt::Debug for DagManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagManager")
            .field("stream", &self.stream)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DagManager {
    pub fn new(
        stream: Arc<DagTaskStream>,
        management: Arc<DagManagementService>,
        ctx: ProcContext,
        options: DagManagerOptions,
    ) -> Self {
        Self {
            stream,
            management,
            ctx,
            options,
        }
    }

    /// Pull and process at most one task.
    ///
    /// Returns `false` when no task could be pulled. A task whose processing
    /// fails still counts as pulled; it goes back on the stream for a retry.
    pub async fn process_next(&self) -> Result<bool> {
        Ok(self.pull_and_process().await? != Pulled::Nothing)
    }

    async fn pull_and_process(&self) -> Result<Pulled> {
        let Some(task) = self.stream.next().await? else {
            return Ok(Pulled::Nothing);
        };

        debug!(action = %task.action(), "processing dag task");
        if process_task(&self.ctx, &task).await.is_ok() {
            return Ok(Pulled::Committed);
        }

        self.retry_later(task).await?;
        Ok(Pulled::Requeued)
    }

    /// Give up the lease of a failed task and queue it again.
    ///
    /// If the stream has no room the action is dropped from the action store,
    /// so a later request for the same Dag is not mistaken for a duplicate.
    async fn retry_later(&self, task: DagTask) -> Result<()> {
        let action = task.action();
        if let Some(token) = task.lease_token()
            && let Err(err) = self.ctx.lease_arbiter.release(&action, token).await
        {
            warn!(%action, error = %err, "could not release lease of failed task");
        }

        match self.stream.submit(task.without_lease()) {
            Ok(()) => {
                info!(%action, "dag task failed; queued for retry");
                Ok(())
            }
            Err(err) => {
                error!(%action, error = %err, "dag task failed and cannot be requeued; dropping it");
                self.ctx.action_store.delete_action(&action).await?;
                Ok(())
            }
        }
    }

    /// Main consumer loop; runs until `shutdown` flips or, with
    /// `exit_when_idle`, until the stream is drained.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("dag manager started");

        while !*shutdown.borrow() {
            if !self.stream.has_next() {
                if self.options.exit_when_idle {
                    info!("task stream drained; exiting");
                    break;
                }

                if let Err(err) = self.management.advance_all().await {
                    warn!(error = %err, "could not enqueue advance tasks");
                }
                if !self.stream.has_next() && self.back_off(&mut shutdown, true).await {
                    break;
                }
                continue;
            }

            let pulled = match self.pull_and_process().await {
                Ok(pulled) => pulled,
                Err(err) => {
                    warn!(error = %err, "could not pull from task stream");
                    Pulled::Nothing
                }
            };
            if pulled != Pulled::Committed && self.back_off(&mut shutdown, false).await {
                break;
            }
        }

        info!("dag manager stopped");
        Ok(())
    }

    /// Wait one poll interval, or less if a task arrives and `wake_on_task`
    /// is set. Returns `true` if shutdown was requested meanwhile.
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>, wake_on_task: bool) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.options.poll_interval) => false,
            _ = self.stream.wait_for_task(), if wake_on_task => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}
