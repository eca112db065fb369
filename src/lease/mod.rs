// src/lease/mod.rs

//! Cluster-wide lease arbitration for flow actions.
//!
//! Before a task leaves the task stream, the participant must hold the lease
//! for the task's underlying [`FlowAction`]. The [`LeaseArbiter`] trait is the
//! seam to whatever coordinator grants those leases; [`memory`] provides an
//! in-process implementation.
//!
//! Leases expire on their own after a TTL. Releasing one early is optional.

pub mod memory;

use std::fmt;
use std::time::Duration;

use crate::BoxFuture;
use crate::errors::Result;
use crate::types::FlowAction;

pub use memory::InMemoryLeaseArbiter;

/// Opaque proof of holding the lease for one action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a lease attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// Exclusive right to process the action until `ttl` elapses.
    Obtained { token: LeaseToken, ttl: Duration },
    /// This participant may not process actions at all right now.
    NotLeader,
    /// Someone else holds the lease; try again after `retry_after`.
    Deferred { retry_after: Duration },
}

impl LeaseStatus {
    pub fn is_obtained(&self) -> bool {
        matches!(self, LeaseStatus::Obtained { .. })
    }

    pub fn token(&self) -> Option<&LeaseToken> {
        match self {
            LeaseStatus::Obtained { token, .. } => Some(token),
            LeaseStatus::NotLeader | LeaseStatus::Deferred { .. } => None,
        }
    }
}

/// Coordinator deciding which participant may process a flow action.
///
/// Any failure other than the three [`LeaseStatus`] outcomes must be reported
/// as `FlowdagError::LeaseError`.
pub trait LeaseArbiter: Send + Sync {
    /// Ask for the lease on `action` at wall-clock time `now_millis`.
    fn try_lease<'a>(
        &'a self,
        action: &'a FlowAction,
        now_millis: i64,
    ) -> BoxFuture<'a, Result<LeaseStatus>>;

    /// Give the lease back before its TTL runs out.
    ///
    /// Returns `false` if the token no longer matches the current lease.
    fn release<'a>(
        &'a self,
        action: &'a FlowAction,
        token: &'a LeaseToken,
    ) -> BoxFuture<'a, Result<bool>>;
}
