// src/store/failed.rs

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::BoxFuture;
use crate::dag::{Dag, JobExecutionPlan};
use crate::errors::Result;
use crate::types::DagId;

/// Store of failed Dags that are eligible for resume.
pub trait FailedDagStore: Send + Sync {
    fn get_dag<'a>(
        &'a self,
        dag_id: &'a DagId,
    ) -> BoxFuture<'a, Result<Option<Dag<JobExecutionPlan>>>>;

    fn add_dag<'a>(
        &'a self,
        dag_id: &'a DagId,
        dag: Dag<JobExecutionPlan>,
    ) -> BoxFuture<'a, Result<()>>;

    fn remove_dag<'a>(&'a self, dag_id: &'a DagId) -> BoxFuture<'a, Result<bool>>;
}

#[derive(Debug, Default)]
pub struct InMemoryFailedDagStore {
    dags: RwLock<HashMap<DagId, Dag<JobExecutionPlan>>>,
}

impl InMemoryFailedDagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dag_id: &DagId) -> bool {
        self.dags.read().contains_key(dag_id)
    }
}

impl FailedDagStore for InMemoryFailedDagStore {
    fn get_dag<'a>(
        &'a self,
        dag_id: &'a DagId,
    ) -> BoxFuture<'a, Result<Option<Dag<JobExecutionPlan>>>> {
        Box::pin(async move { Ok(self.dags.read().get(dag_id).cloned()) })
    }

    fn add_dag<'a>(
        &'a self,
        dag_id: &'a DagId,
        dag: Dag<JobExecutionPlan>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.dags.write().insert(dag_id.clone(), dag);
            Ok(())
        })
    }

    fn remove_dag<'a>(&'a self, dag_id: &'a DagId) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.dags.write().remove(dag_id).is_some()) })
    }
}
