// src/lease/memory.rs

//! In-process lease arbiter.
//!
//! Participants created with [`InMemoryLeaseArbiter::peer`] share one lease
//! table, which is enough to model several DAG managers inside one process
//! (and to exercise deferral in tests). There is no cross-process
//! coordination and no persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{LeaseArbiter, LeaseStatus, LeaseToken};
use crate::BoxFuture;
use crate::errors::Result;
use crate::types::FlowAction;

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    token: LeaseToken,
    expires_at_millis: i64,
}

type LeaseTable = Arc<Mutex<HashMap<String, Lease>>>;

#[derive(Debug)]
pub struct InMemoryLeaseArbiter {
    instance_id: String,
    ttl: Duration,
    leader: AtomicBool,
    leases: LeaseTable,
}

impl InMemoryLeaseArbiter {
    pub fn new(instance_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            instance_id: instance_id.into(),
            ttl,
            leader: AtomicBool::new(true),
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Another participant sharing this arbiter's lease table.
    pub fn peer(&self, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ttl: self.ttl,
            leader: AtomicBool::new(true),
            leases: Arc::clone(&self.leases),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// A participant that is not leader gets `NotLeader` for every action.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Current holder of the action's lease, ignoring expiry.
    pub fn holder_of(&self, action: &FlowAction) -> Option<String> {
        self.leases
            .lock()
            .get(&action.key())
            .map(|l| l.holder.clone())
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn acquire(&self, action: &FlowAction, now_millis: i64) -> LeaseStatus {
        if !self.leader.load(Ordering::SeqCst) {
            return LeaseStatus::NotLeader;
        }

        let key = action.key();
        let mut leases = self.leases.lock();

        if let Some(lease) = leases.get(&key) {
            if lease.expires_at_millis > now_millis && lease.holder != self.instance_id {
                let remaining = (lease.expires_at_millis - now_millis) as u64;
                debug!(
                    action = %action,
                    holder = %lease.holder,
                    remaining_ms = remaining,
                    "lease held by another participant; deferring"
                );
                return LeaseStatus::Deferred {
                    retry_after: Duration::from_millis(remaining),
                };
            }
            // Expired, or already ours: fall through and (re)issue.
        }

        let token = LeaseToken::new(Uuid::new_v4().to_string());
        leases.insert(
            key,
            Lease {
                holder: self.instance_id.clone(),
                token: token.clone(),
                expires_at_millis: now_millis.saturating_add(self.ttl_millis()),
            },
        );

        LeaseStatus::Obtained {
            token,
            ttl: self.ttl,
        }
    }
}

impl LeaseArbiter for InMemoryLeaseArbiter {
    fn try_lease<'a>(
        &'a self,
        action: &'a FlowAction,
        now_millis: i64,
    ) -> BoxFuture<'a, Result<LeaseStatus>> {
        Box::pin(async move { Ok(self.acquire(action, now_millis)) })
    }

    fn release<'a>(
        &'a self,
        action: &'a FlowAction,
        token: &'a LeaseToken,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let key = action.key();
            let mut leases = self.leases.lock();

            match leases.get(&key) {
                Some(lease) if lease.token == *token => {
                    leases.remove(&key);
                    debug!(action = %action, "lease released");
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}
