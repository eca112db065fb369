// src/store/action.rs

use parking_lot::Mutex;
use tracing::debug;

use crate::BoxFuture;
use crate::errors::Result;
use crate::types::FlowAction;

/// Durable log of flow actions that have been posted but not yet committed.
pub trait DagActionStore: Send + Sync {
    /// Record an action. Recording an action twice keeps a single entry.
    fn add_action<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<()>>;

    /// Remove a committed action. Returns `false` if it was not stored.
    fn delete_action<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<bool>>;

    fn exists<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<bool>>;

    /// Every pending action, oldest first.
    fn get_actions(&self) -> BoxFuture<'_, Result<Vec<FlowAction>>>;
}

/// Insertion-ordered in-memory action store.
#[derive(Debug, Default)]
pub struct InMemoryDagActionStore {
    actions: Mutex<Vec<FlowAction>>,
}

impl InMemoryDagActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }
}

impl DagActionStore for InMemoryDagActionStore {
    fn add_action<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut actions = self.actions.lock();
            if !actions.contains(action) {
                actions.push(action.clone());
                debug!(action = %action, "recorded flow action");
            }
            Ok(())
        })
    }

    fn delete_action<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut actions = self.actions.lock();
            let before = actions.len();
            actions.retain(|a| a != action);
            let deleted = actions.len() != before;
            if deleted {
                debug!(action = %action, "deleted committed flow action");
            }
            Ok(deleted)
        })
    }

    fn exists<'a>(&'a self, action: &'a FlowAction) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.actions.lock().contains(action)) })
    }

    fn get_actions(&self) -> BoxFuture<'_, Result<Vec<FlowAction>>> {
        Box::pin(async move { Ok(self.actions.lock().clone()) })
    }
}
