// src/exec/mod.rs

//! Job execution hand-off.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the channel-backed
//!   `ChannelExecutorBackend` the processors use in production, and which
//!   tests can replace with a fake implementation.
//! - [`executor_loop`] owns the background loop draining job commands.

pub mod backend;
pub mod executor_loop;

pub use backend::{ChannelExecutorBackend, ExecutorBackend, JobCommand};
pub use executor_loop::spawn_executor;
