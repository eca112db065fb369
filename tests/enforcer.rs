// tests/enforcer.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use flowdag::dag::{Dag, ExecutionStatus, FlowEvent, JobExecutionPlan};
use flowdag::engine::{SlaDefaults, StreamOptions};
use flowdag::types::DagId;
use flowdag_test_utils::builders::{DagBuilder, PlanBuilder, dag_id, single_job_dag};
use flowdag_test_utils::{START_MILLIS, TestHarness, init_tracing, job_status, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Live single-job Dag started at the harness start time.
fn live_dag(h: &TestHarness, name: &str, status: ExecutionStatus) -> (DagId, Dag<JobExecutionPlan>) {
    let id = dag_id("etl", name, START_MILLIS);
    let dag = single_job_dag(&id, "job", status);
    h.state_store.put_dag(id.clone(), dag.clone());
    (id, dag)
}

async fn live_copy(h: &TestHarness, id: &DagId) -> Dag<JobExecutionPlan> {
    h.state_store.get_dag(id).await.expect("dag is live")
}

#[tokio::test]
async fn flow_past_its_sla_is_killed_once() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (id, dag) = live_dag(&h, "daily", ExecutionStatus::Running);
    assert!(h.state_store.cache_flow_sla(&id, 5_000));
    let node = &dag.nodes()[0];

    h.clock.advance(5_000);
    assert!(!h.enforcer.enforce_flow_completion_deadline(node).await?);

    h.clock.advance(1);
    assert!(h.enforcer.enforce_flow_completion_deadline(node).await?);

    let killed = live_copy(&h, &id).await;
    assert_eq!(killed.flow_event(), Some(FlowEvent::FlowRunDeadlineExceeded));
    assert_eq!(
        killed.message(),
        Some("Flow killed due to exceeding SLA of 5000 ms")
    );
    assert_eq!(killed.nodes()[0].status(), ExecutionStatus::Cancelled);
    assert_eq!(h.executor.cancelled_jobs(), vec!["job"]);
    assert_eq!(h.metrics.executor_sla_exceeded(), 1);

    // The recorded event stops any further enforcement.
    h.clock.advance(60 * 60 * 1000);
    assert!(!h.enforcer.enforce_flow_completion_deadline(node).await?);
    let job_status = job_status(node.value(), ExecutionStatus::Orchestrated, START_MILLIS);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&job_status))
            .await?
    );
    assert_eq!(h.executor.cancelled_jobs().len(), 1);
    assert_eq!(h.metrics.executor_sla_exceeded(), 1);
    assert_eq!(h.metrics.start_sla_exceeded(), 0);
    Ok(())
}

#[tokio::test]
async fn job_start_deadline_needs_an_orchestrated_status() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (id, dag) = live_dag(&h, "daily", ExecutionStatus::Orchestrated);
    let node = &dag.nodes()[0];
    h.clock.advance(24 * 60 * 60 * 1000);

    assert!(!h.enforcer.enforce_job_start_deadline(node, None).await?);

    let running = job_status(node.value(), ExecutionStatus::Running, START_MILLIS);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&running))
            .await?
    );

    let mut unreadable = running.clone();
    unreadable.event_name = "SOMETHING_ELSE".to_string();
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&unreadable))
            .await?
    );

    let dag = live_copy(&h, &id).await;
    assert_eq!(dag.flow_event(), None);
    assert!(h.executor.cancelled_jobs().is_empty());
    assert_eq!(h.metrics.start_sla_exceeded(), 0);
    Ok(())
}

#[tokio::test]
async fn job_stuck_in_orchestrated_is_killed() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = DagBuilder::new(&id)
        .job_with(PlanBuilder::new(&id, "job").with_job_start_sla("1000", "MILLISECONDS"))
        .status(0, ExecutionStatus::Orchestrated)
        .build();
    h.state_store.put_dag(id.clone(), dag.clone());
    let node = &dag.nodes()[0];
    let orchestrated = job_status(node.value(), ExecutionStatus::Orchestrated, START_MILLIS);

    h.clock.advance(1_000);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );

    h.clock.advance(1);
    assert!(
        h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );

    let killed = live_copy(&h, &id).await;
    assert_eq!(killed.flow_event(), Some(FlowEvent::FlowStartDeadlineExceeded));
    assert_eq!(
        killed.message(),
        Some("Flow killed because no update received for 1000 ms after orchestration")
    );
    assert_eq!(h.metrics.start_sla_exceeded(), 1);
    assert_eq!(h.metrics.executor_sla_exceeded(), 0);
    Ok(())
}

#[tokio::test]
async fn job_start_deadline_falls_back_to_the_default() -> TestResult {
    init_tracing();
    let h = TestHarness::with_options(
        StreamOptions::default(),
        SlaDefaults {
            job_start_sla_millis: 500,
            ..SlaDefaults::default()
        },
    );
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = DagBuilder::new(&id)
        .job_with(PlanBuilder::new(&id, "job").with_job_start_sla("later", "SECONDS"))
        .status(0, ExecutionStatus::Orchestrated)
        .build();
    h.state_store.put_dag(id.clone(), dag.clone());
    let node = &dag.nodes()[0];
    let orchestrated = job_status(node.value(), ExecutionStatus::Orchestrated, START_MILLIS);

    h.clock.advance(500);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );
    // The first lookup already reported the malformed value.
    assert!(!h.state_store.mark_malformed_start_sla_reported(&id));

    h.clock.advance(1);
    assert!(
        h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn tripped_flow_deadline_cancels_every_active_job() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = DagBuilder::new(&id)
        .job("a")
        .job("b")
        .job("c")
        .status(0, ExecutionStatus::Running)
        .status(1, ExecutionStatus::Orchestrated)
        .status(2, ExecutionStatus::Complete)
        .build();
    h.state_store.put_dag(id.clone(), dag);
    h.state_store.cache_flow_sla(&id, 5_000);

    h.clock.advance(10_000);
    assert_eq!(h.enforcer.run_pass().await, 1);
    assert_eq!(h.enforcer.run_pass().await, 0);

    let killed = live_copy(&h, &id).await;
    let statuses: Vec<_> = killed.nodes().iter().map(|n| n.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ExecutionStatus::Cancelled,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Complete
        ]
    );
    assert_eq!(killed.flow_event(), Some(FlowEvent::FlowRunDeadlineExceeded));
    assert_eq!(h.executor.cancelled_jobs(), vec!["a", "b"]);
    assert_eq!(h.metrics.executor_sla_exceeded(), 1);
    Ok(())
}

#[tokio::test]
async fn job_finished_since_the_snapshot_is_left_alone() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (id, snapshot) = live_dag(&h, "daily", ExecutionStatus::Running);
    h.state_store.cache_flow_sla(&id, 1_000);
    {
        let handle = h.state_store.handle(&id).expect("dag is live");
        let mut live = handle.lock().await;
        live.node_mut(0)
            .expect("node 0")
            .set_status(ExecutionStatus::Complete);
    }
    let node = &snapshot.nodes()[0];
    h.clock.advance(60 * 60 * 1000);

    assert!(!h.enforcer.enforce_flow_completion_deadline(node).await?);
    let orchestrated = job_status(node.value(), ExecutionStatus::Orchestrated, START_MILLIS);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );

    let live = live_copy(&h, &id).await;
    assert_eq!(live.nodes()[0].status(), ExecutionStatus::Complete);
    assert_eq!(live.flow_event(), None);
    assert!(h.executor.cancelled_jobs().is_empty());
    assert_eq!(h.metrics.executor_sla_exceeded(), 0);
    assert_eq!(h.metrics.start_sla_exceeded(), 0);
    Ok(())
}

#[tokio::test]
async fn far_past_orchestration_time_trips_without_overflow() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (id, dag) = live_dag(&h, "daily", ExecutionStatus::Orchestrated);
    let node = &dag.nodes()[0];
    let orchestrated = job_status(node.value(), ExecutionStatus::Orchestrated, i64::MIN);

    assert!(
        h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );
    assert_eq!(
        live_copy(&h, &id).await.flow_event(),
        Some(FlowEvent::FlowStartDeadlineExceeded)
    );
    Ok(())
}

#[tokio::test]
async fn malformed_flow_sla_uses_the_default_and_is_cached() -> TestResult {
    init_tracing();
    let h = TestHarness::with_options(
        StreamOptions::default(),
        SlaDefaults {
            flow_sla_millis: 2_000,
            ..SlaDefaults::default()
        },
    );
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = DagBuilder::new(&id)
        .job_with(PlanBuilder::new(&id, "job").with_flow_sla("soon", "MINUTES"))
        .status(0, ExecutionStatus::Running)
        .build();
    h.state_store.put_dag(id.clone(), dag.clone());
    let plan = dag.nodes()[0].value();

    assert_eq!(h.enforcer.flow_sla_for(&id, plan), 2_000);
    assert_eq!(h.state_store.get_cached_flow_sla(&id), Some(2_000));
    // Reported once; the second lookup is served from the cache.
    assert!(!h.state_store.mark_malformed_sla_reported(&id));
    assert_eq!(h.enforcer.flow_sla_for(&id, plan), 2_000);
    Ok(())
}

#[tokio::test]
async fn flow_sla_comes_from_the_job_config() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = DagBuilder::new(&id)
        .job_with(PlanBuilder::new(&id, "job").with_flow_sla("3", "SECONDS"))
        .status(0, ExecutionStatus::Running)
        .build();
    h.state_store.put_dag(id.clone(), dag.clone());

    assert_eq!(h.enforcer.flow_sla_for(&id, dag.nodes()[0].value()), 3_000);

    h.clock.advance(3_001);
    assert!(
        h.enforcer
            .enforce_flow_completion_deadline(&dag.nodes()[0])
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn deadlines_do_nothing_for_a_dag_that_is_gone() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let id = dag_id("etl", "daily", START_MILLIS);
    let dag = single_job_dag(&id, "job", ExecutionStatus::Orchestrated);
    let node = &dag.nodes()[0];
    let orchestrated = job_status(node.value(), ExecutionStatus::Orchestrated, START_MILLIS);
    h.clock.advance(30 * 24 * 60 * 60 * 1000);

    assert!(!h.enforcer.enforce_flow_completion_deadline(node).await?);
    assert!(
        !h.enforcer
            .enforce_job_start_deadline(node, Some(&orchestrated))
            .await?
    );
    assert!(h.executor.cancelled_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn pass_checks_every_live_dag() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (late, _) = live_dag(&h, "late", ExecutionStatus::Running);
    let (on_time, _) = live_dag(&h, "on_time", ExecutionStatus::Running);
    let (stuck, stuck_dag) = live_dag(&h, "stuck", ExecutionStatus::Orchestrated);
    let (idle, _) = live_dag(&h, "idle", ExecutionStatus::Pending);
    h.state_store.cache_flow_sla(&late, 1_000);
    h.state_store.cache_flow_sla(&idle, 1_000);
    h.statuses.set(job_status(
        stuck_dag.nodes()[0].value(),
        ExecutionStatus::Orchestrated,
        START_MILLIS,
    ));

    h.clock.advance(10 * 60 * 1000 + 1);
    assert_eq!(h.enforcer.run_pass().await, 2);

    assert_eq!(
        live_copy(&h, &late).await.flow_event(),
        Some(FlowEvent::FlowRunDeadlineExceeded)
    );
    assert_eq!(
        live_copy(&h, &stuck).await.flow_event(),
        Some(FlowEvent::FlowStartDeadlineExceeded)
    );
    assert_eq!(live_copy(&h, &on_time).await.flow_event(), None);
    // Pending jobs are not subject to deadlines.
    assert_eq!(live_copy(&h, &idle).await.flow_event(), None);

    assert_eq!(h.enforcer.run_pass().await, 0);
    Ok(())
}

#[tokio::test]
async fn failed_status_poll_does_not_stop_the_pass() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (late, _) = live_dag(&h, "late", ExecutionStatus::Running);
    let (other, _) = live_dag(&h, "other", ExecutionStatus::Running);
    h.state_store.cache_flow_sla(&late, 1_000);
    h.statuses.fail_polls(true);

    h.clock.advance(1_001);
    assert_eq!(h.enforcer.run_pass().await, 1);
    assert_eq!(live_copy(&h, &other).await.flow_event(), None);
    Ok(())
}

#[tokio::test]
async fn enforcer_loop_runs_until_shutdown() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let (id, _) = live_dag(&h, "daily", ExecutionStatus::Running);
    h.state_store.cache_flow_sla(&id, 1_000);
    h.clock.advance(1_001);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let enforcer = Arc::clone(&h.enforcer);
    let running = tokio::spawn(enforcer.run(shutdown_rx));

    with_timeout(async {
        while h.metrics.executor_sla_exceeded() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    shutdown_tx.send(true)?;
    with_timeout(running).await?;
    assert_eq!(h.executor.cancelled_jobs(), vec!["job"]);
    Ok(())
}
