// src/dag/state_store.rs

//! Authoritative in-memory state of live Dags.
//!
//! Locking:
//! - the id -> Dag map and the SLA cache sit behind `parking_lot` locks that
//!   are never held across an `.await`;
//! - each Dag sits behind its own async mutex, so work on one Dag (a kill, a
//!   deadline check) is serialized while other Dags proceed in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

use crate::dag::graph::Dag;
use crate::dag::plan::JobExecutionPlan;
use crate::types::DagId;

/// Shared handle to one live Dag.
pub type DagHandle = Arc<Mutex<Dag<JobExecutionPlan>>>;

#[derive(Debug, Default)]
pub struct DagStateStore {
    dags: RwLock<HashMap<DagId, DagHandle>>,
    flow_slas: RwLock<HashMap<DagId, i64>>,
    /// Dags for which a malformed flow SLA has already been reported.
    malformed_sla_reported: SyncMutex<HashSet<DagId>>,
    malformed_start_sla_reported: SyncMutex<HashSet<DagId>>,
}

impl DagStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the Dag stored under `dag_id`.
    ///
    /// Replacing drops any cached SLA for the previous Dag.
    pub fn put_dag(&self, dag_id: DagId, dag: Dag<JobExecutionPlan>) {
        let previous = self
            .dags
            .write()
            .insert(dag_id.clone(), Arc::new(Mutex::new(dag)));

        if previous.is_some() {
            self.forget_bookkeeping(&dag_id);
        }
        debug!(dag_id = %dag_id, "stored dag");
    }

    /// Copy of the Dag stored under `dag_id`.
    pub async fn get_dag(&self, dag_id: &DagId) -> Option<Dag<JobExecutionPlan>> {
        let handle = self.handle(dag_id)?;
        let dag = handle.lock().await;
        Some(dag.clone())
    }

    /// Lockable handle for in-place mutation of a live Dag.
    pub fn handle(&self, dag_id: &DagId) -> Option<DagHandle> {
        self.dags.read().get(dag_id).cloned()
    }

    /// Remove a Dag together with its cached SLA.
    pub fn remove_dag(&self, dag_id: &DagId) -> Option<DagHandle> {
        let removed = self.dags.write().remove(dag_id);
        if removed.is_some() {
            self.forget_bookkeeping(dag_id);
            debug!(dag_id = %dag_id, "removed dag");
        }
        removed
    }

    pub fn contains_dag(&self, dag_id: &DagId) -> bool {
        self.dags.read().contains_key(dag_id)
    }

    pub fn dag_ids(&self) -> Vec<DagId> {
        self.dags.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.dags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dags.read().is_empty()
    }

    /// Read-only copy of every live Dag.
    ///
    /// The handle set is taken under the map's read lock; each Dag is then
    /// copied under its own mutex, so no copy observes a half-applied update.
    pub async fn get_dags(&self) -> HashMap<DagId, Dag<JobExecutionPlan>> {
        let handles: Vec<(DagId, DagHandle)> = self
            .dags
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), Arc::clone(h)))
            .collect();

        let mut snapshot = HashMap::with_capacity(handles.len());
        for (id, handle) in handles {
            let dag = handle.lock().await;
            snapshot.insert(id, dag.clone());
        }
        snapshot
    }

    /// Cache the flow SLA of a live Dag.
    ///
    /// Returns `false` (and caches nothing) if the Dag is not stored, so the
    /// cache never holds entries for Dags that are gone.
    pub fn cache_flow_sla(&self, dag_id: &DagId, millis: i64) -> bool {
        let dags = self.dags.read();
        if !dags.contains_key(dag_id) {
            return false;
        }
        self.flow_slas.write().insert(dag_id.clone(), millis);
        true
    }

    pub fn get_cached_flow_sla(&self, dag_id: &DagId) -> Option<i64> {
        self.flow_slas.read().get(dag_id).copied()
    }

    /// Returns `true` the first time it is called for `dag_id`.
    pub fn mark_malformed_sla_reported(&self, dag_id: &DagId) -> bool {
        self.malformed_sla_reported.lock().insert(dag_id.clone())
    }

    /// Same as [`mark_malformed_sla_reported`](Self::mark_malformed_sla_reported),
    /// for the job start SLA.
    pub fn mark_malformed_start_sla_reported(&self, dag_id: &DagId) -> bool {
        self.malformed_start_sla_reported.lock().insert(dag_id.clone())
    }

    fn forget_bookkeeping(&self, dag_id: &DagId) {
        self.flow_slas.write().remove(dag_id);
        self.malformed_sla_reported.lock().remove(dag_id);
        self.malformed_start_sla_reported.lock().remove(dag_id);
    }
}
