// src/catalog/mod.rs

//! Flow catalog and flow compiler seams.
//!
//! The catalog resolves a [`FlowId`] to the declared [`FlowSpec`]; the
//! compiler (see [`compiler`]) turns a spec into a `Dag<JobExecutionPlan>`.
//! Both are injected into the management API at construction.

pub mod compiler;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::BoxFuture;
use crate::errors::{FlowdagError, Result};
use crate::types::FlowId;

pub use compiler::{FlowCompiler, PlanCompiler};

/// User-declared pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSpec {
    pub flow_id: FlowId,
    /// Flow completion SLA written into every job's config.
    pub flow_sla: Option<Duration>,
    /// Job start SLA written into every job's config.
    pub job_start_sla: Option<Duration>,
    /// Jobs in declaration order.
    pub jobs: Vec<JobSpec>,
}

impl FlowSpec {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            flow_sla: None,
            job_start_sla: None,
            jobs: Vec::new(),
        }
    }
}

/// One job declared by a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    /// Defaults to the flow group when `None`.
    pub group: Option<String>,
    /// Names of jobs that must complete first.
    pub after: Vec<String>,
    /// Opaque properties copied into the job config.
    pub properties: BTreeMap<String, String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            after: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// Resolves flow identities to specs.
pub trait FlowCatalog: Send + Sync {
    /// Fails with `SpecNotFound` for unknown flows.
    fn get_spec<'a>(&'a self, flow_id: &'a FlowId) -> BoxFuture<'a, Result<FlowSpec>>;
}

#[derive(Debug, Default)]
pub struct InMemoryFlowCatalog {
    specs: RwLock<HashMap<FlowId, FlowSpec>>,
}

impl InMemoryFlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = FlowSpec>) -> Self {
        let catalog = Self::new();
        for spec in specs {
            catalog.put_spec(spec);
        }
        catalog
    }

    /// Add or replace a spec.
    pub fn put_spec(&self, spec: FlowSpec) {
        debug!(flow = %spec.flow_id, jobs = spec.jobs.len(), "registered flow spec");
        self.specs.write().insert(spec.flow_id.clone(), spec);
    }

    pub fn remove_spec(&self, flow_id: &FlowId) -> Option<FlowSpec> {
        self.specs.write().remove(flow_id)
    }

    pub fn flow_ids(&self) -> Vec<FlowId> {
        let mut ids: Vec<FlowId> = self.specs.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl FlowCatalog for InMemoryFlowCatalog {
    fn get_spec<'a>(&'a self, flow_id: &'a FlowId) -> BoxFuture<'a, Result<FlowSpec>> {
        Box::pin(async move {
            self.specs
                .read()
                .get(flow_id)
                .cloned()
                .ok_or_else(|| FlowdagError::SpecNotFound(flow_id.spec_uri()))
        })
    }
}
