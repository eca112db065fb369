// src/store/mod.rs

//! Durable-store seams used by the orchestration core.
//!
//! - [`action`]: the Dag Action Store, the only durable record of pending
//!   flow actions (appended on trigger, deleted on commit).
//! - [`failed`]: the Failed DAG Store, holding Dags that may be resumed.
//!
//! Both come with in-memory implementations used by the binary and tests.

pub mod action;
pub mod failed;

pub use action::{DagActionStore, InMemoryDagActionStore};
pub use failed::{FailedDagStore, InMemoryFailedDagStore};
