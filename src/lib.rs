// src/lib.rs

pub mod catalog;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod store;
pub mod types;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::catalog::{FlowSpec, InMemoryFlowCatalog, PlanCompiler};
use crate::cli::CliArgs;
use crate::clock::{Clock, SystemClock};
use crate::config::loader::load_and_validate;
use crate::config::model::FlowdagConfig;
use crate::dag::DagStateStore;
use crate::engine::{
    DagManagementService, DagManager, DagTaskStream, DeadlineEnforcer, ProcContext,
};
use crate::exec::{ExecutorBackend, spawn_executor};
use crate::lease::InMemoryLeaseArbiter;
use crate::metrics::DagManagerMetrics;
use crate::monitor::{InMemoryJobStatusRetriever, JobStatusPoller};
use crate::store::{InMemoryDagActionStore, InMemoryFailedDagStore};
use crate::types::FlowId;

/// Boxed future returned by the async seams (executor, stores, lease
/// arbiter, catalog, compiler, status retriever).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - catalog, compiler and in-memory stores
/// - lease-gated task stream and management service
/// - executor hand-off, consumer loop and deadline enforcer
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let specs = cfg.flow_specs()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if args.dry_run {
        print_dry_run(&cfg, &specs, Arc::clone(&clock))?;
        return Ok(());
    }

    metrics::register_metrics();

    let catalog = Arc::new(InMemoryFlowCatalog::from_specs(specs));
    let compiler = Arc::new(PlanCompiler::new(Arc::clone(&clock)));
    let lease_arbiter = Arc::new(InMemoryLeaseArbiter::new(
        cfg.lease.instance_id.clone(),
        cfg.lease.ttl(),
    ));
    let state_store = Arc::new(DagStateStore::new());
    let action_store = Arc::new(InMemoryDagActionStore::new());
    let failed_dags = Arc::new(InMemoryFailedDagStore::new());
    let statuses = Arc::new(InMemoryJobStatusRetriever::new());
    let dag_metrics = Arc::new(DagManagerMetrics::new());
    let poller = JobStatusPoller::new(statuses.clone(), Arc::clone(&dag_metrics));

    // Executor hand-off; the loop ends once every backend handle is dropped.
    let (backend, executor_handle) = spawn_executor(statuses, Arc::clone(&clock));
    let executor: Arc<dyn ExecutorBackend> = Arc::new(backend);

    let stream = Arc::new(DagTaskStream::new(
        lease_arbiter.clone(),
        Arc::clone(&clock),
        cfg.stream_options(),
    ));
    let management = Arc::new(DagManagementService::new(
        Arc::clone(&stream),
        Arc::clone(&state_store),
        catalog,
        compiler,
        failed_dags.clone(),
        action_store.clone(),
        Arc::clone(&clock),
    ));
    let ctx = ProcContext {
        state_store: Arc::clone(&state_store),
        executor: Arc::clone(&executor),
        action_store,
        failed_dags,
        lease_arbiter,
        poller: poller.clone(),
    };
    let enforcer = Arc::new(DeadlineEnforcer::new(
        state_store,
        Arc::clone(&executor),
        poller,
        dag_metrics,
        Arc::clone(&clock),
        cfg.sla_defaults(),
        cfg.enforcer.interval(),
    ));
    let manager = DagManager::new(
        stream,
        Arc::clone(&management),
        ctx,
        cfg.manager_options(args.once),
    );
    drop(executor);

    // Ctrl-C → graceful shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("shutdown requested");
            let _ = tx.send(true);
        });
    }

    let recovered = management.recover_pending_actions().await?;
    if recovered > 0 {
        info!(recovered, "re-enqueued pending flow actions");
    }

    let startup = startup_flows(&cfg, &args.launch)?;
    info!(flows = startup.len(), "launching flows at startup");
    for flow_id in startup {
        if let Err(err) = management
            .launch_flow(flow_id.flow_group(), flow_id.flow_name())
            .await
        {
            warn!(flow = %flow_id, error = %err, "startup launch failed");
        }
    }

    let enforcer_handle = tokio::spawn(Arc::clone(&enforcer).run(shutdown_rx.clone()));
    drop(enforcer);

    manager.run(shutdown_rx).await?;

    let _ = shutdown_tx.send(true);
    enforcer_handle.await?;
    executor_handle.await?;

    info!("flowdag exiting");
    Ok(())
}

/// Flows marked `launch_on_start` followed by every `--launch` flow,
/// without duplicates.
fn startup_flows(cfg: &FlowdagConfig, launch: &[String]) -> Result<Vec<FlowId>> {
    let mut flows = cfg.launch_on_start()?;
    for raw in launch {
        let flow_id: FlowId = raw.parse()?;
        if !flows.contains(&flow_id) {
            flows.push(flow_id);
        }
    }
    Ok(flows)
}

/// Dry-run output: options, then every flow compiled into its job plan.
fn print_dry_run(cfg: &FlowdagConfig, specs: &[FlowSpec], clock: Arc<dyn Clock>) -> Result<()> {
    println!("flowdag dry-run");
    match cfg.stream.queue_capacity {
        Some(capacity) => println!("  stream.queue_capacity = {capacity}"),
        None => println!("  stream.queue_capacity = unbounded"),
    }
    println!(
        "  stream.allow_reorder_on_defer = {}",
        cfg.stream.allow_reorder_on_defer
    );
    println!(
        "  sla.default_flow_sla_millis = {}",
        cfg.sla.default_flow_sla_millis
    );
    println!(
        "  sla.default_job_start_sla_millis = {}",
        cfg.sla.default_job_start_sla_millis
    );
    println!("  enforcer.interval_millis = {}", cfg.enforcer.interval_millis);
    println!("  lease.instance_id = {}", cfg.lease.instance_id);
    println!();

    let compiler = PlanCompiler::new(Arc::clone(&clock));
    println!("flows ({}):", specs.len());
    for spec in specs {
        println!("  - {}", spec.flow_id);
        let Some(dag) = compiler.compile_spec(spec, clock.now_millis())? else {
            println!("      (nothing to run)");
            continue;
        };

        for node in dag.nodes() {
            let plan = node.value();
            println!("      {}.{}", plan.job_group(), plan.job_name());
            if !node.parents().is_empty() {
                let after: Vec<&str> = node
                    .parents()
                    .iter()
                    .filter_map(|&p| dag.node(p))
                    .map(|p| p.value().job_name())
                    .collect();
                println!("        after: {after:?}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
