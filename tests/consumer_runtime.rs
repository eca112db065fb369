// tests/consumer_runtime.rs

use std::error::Error;
use std::time::Duration;

use tokio::sync::watch;

use flowdag::dag::ExecutionStatus;
use flowdag::store::DagActionStore;
use flowdag::types::{ActionType, DagId, FlowAction};
use flowdag_test_utils::builders::{FlowSpecBuilder, PlanBuilder, dag_id, single_job_dag};
use flowdag_test_utils::{LeaseStep, TestHarness, init_tracing, job_status, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn harness_with_chain() -> TestHarness {
    let h = TestHarness::new();
    h.register(
        FlowSpecBuilder::new("etl", "daily")
            .job("a", &[])
            .job("b", &["a"])
            .build(),
    );
    h
}

fn report(h: &TestHarness, id: &DagId, job: &str, status: ExecutionStatus) {
    let plan = PlanBuilder::new(id, job).build();
    h.statuses.set(job_status(&plan, status, id.flow_execution_id));
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn idle_exit_drains_the_stream_first() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    with_timeout(h.manager(true).run(shutdown_rx)).await?;

    assert!(!h.stream.has_next());
    assert!(h.action_store.is_empty());
    assert_eq!(h.executor.submitted_jobs(), vec!["a"]);
    assert!(h.state_store.contains_dag(&id));
    Ok(())
}

#[tokio::test]
async fn launched_flow_runs_to_completion() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(h.manager(false).run(shutdown_rx));

    wait_until(|| h.executor.submitted_jobs() == vec!["a"]).await;

    report(&h, &id, "a", ExecutionStatus::Complete);
    wait_until(|| h.executor.submitted_jobs() == vec!["a", "b"]).await;

    report(&h, &id, "b", ExecutionStatus::Complete);
    wait_until(|| h.state_store.is_empty()).await;

    shutdown_tx.send(true)?;
    with_timeout(manager).await??;

    assert!(!h.failed_dags.contains(&id));
    assert!(h.executor.cancelled_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_job_moves_the_flow_to_the_failed_store() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(h.manager(false).run(shutdown_rx));

    wait_until(|| h.executor.submitted_jobs() == vec!["a"]).await;
    report(&h, &id, "a", ExecutionStatus::Failed);
    wait_until(|| h.failed_dags.contains(&id)).await;

    // Resume resubmits the failed job, which then reports progress.
    report(&h, &id, "a", ExecutionStatus::Running);
    assert!(h.management.resume_flow(&id).await?);
    wait_until(|| h.executor.submitted_jobs() == vec!["a", "a"]).await;

    shutdown_tx.send(true)?;
    with_timeout(manager).await??;

    assert!(!h.failed_dags.contains(&id));
    assert!(h.state_store.contains_dag(&id));
    Ok(())
}

#[tokio::test]
async fn kill_request_stops_a_running_flow() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(h.manager(false).run(shutdown_rx));

    wait_until(|| h.executor.submitted_jobs() == vec!["a"]).await;
    assert!(h.management.kill_flow(&id).await?);
    wait_until(|| h.state_store.is_empty()).await;

    shutdown_tx.send(true)?;
    with_timeout(manager).await??;

    assert_eq!(h.executor.cancelled_jobs(), vec!["a", "b"]);
    assert_eq!(h.executor.submitted_jobs(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn nothing_is_processed_without_leadership() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    h.lease.set_default(LeaseStep::NotLeader);
    h.management.launch_flow("etl", "daily").await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(h.manager(true).run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.executor.submitted_jobs().is_empty());
    assert_eq!(h.stream.len(), 1);
    assert!(h.lease.calls().len() > 1);

    shutdown_tx.send(true)?;
    with_timeout(manager).await??;
    Ok(())
}

#[tokio::test]
async fn recovered_actions_are_processed() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let id = dag_id("etl", "daily", 1);
    h.state_store
        .put_dag(id.clone(), single_job_dag(&id, "a", ExecutionStatus::Running));
    h.action_store
        .add_action(&FlowAction::new(id.clone(), ActionType::Kill))
        .await?;

    assert_eq!(h.management.recover_pending_actions().await?, 1);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    with_timeout(h.manager(true).run(shutdown_rx)).await?;

    assert!(!h.state_store.contains_dag(&id));
    assert!(h.action_store.is_empty());
    assert_eq!(h.executor.cancelled_jobs(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn failed_advance_is_retried_and_does_not_block_later_advances() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");
    let manager = h.manager(false);
    assert!(manager.process_next().await?);
    assert_eq!(h.executor.submitted_jobs(), vec!["a"]);

    h.statuses.fail_polls(true);
    assert!(h.management.advance_flow(&id).await?);
    assert!(manager.process_next().await?);

    // Still queued, so a second request is a duplicate.
    let advance = FlowAction::new(id.clone(), ActionType::Advance);
    assert_eq!(h.stream.len(), 1);
    assert!(h.action_store.exists(&advance).await?);
    assert!(!h.management.advance_flow(&id).await?);

    h.statuses.fail_polls(false);
    report(&h, &id, "a", ExecutionStatus::Complete);
    assert!(manager.process_next().await?);

    assert_eq!(h.executor.submitted_jobs(), vec!["a", "b"]);
    assert!(h.action_store.is_empty());
    assert!(!h.stream.has_next());
    assert!(h.management.advance_flow(&id).await?);
    Ok(())
}

#[tokio::test]
async fn failed_kill_is_retried_without_a_restart() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");
    let manager = h.manager(false);
    assert!(manager.process_next().await?);

    h.executor.fail_cancellations(true);
    assert!(h.management.kill_flow(&id).await?);
    assert!(manager.process_next().await?);
    assert!(h.state_store.contains_dag(&id));
    assert_eq!(h.stream.len(), 1);

    h.executor.fail_cancellations(false);
    assert!(manager.process_next().await?);

    assert_eq!(h.executor.cancelled_jobs(), vec!["a", "b"]);
    assert!(!h.state_store.contains_dag(&id));
    assert!(h.action_store.is_empty());
    assert!(!h.stream.has_next());
    Ok(())
}

#[tokio::test]
async fn failing_task_is_retried_by_the_running_loop() -> TestResult {
    init_tracing();
    let h = harness_with_chain();
    let id = h
        .management
        .launch_flow("etl", "daily")
        .await?
        .expect("flow should launch");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(h.manager(false).run(shutdown_rx));
    wait_until(|| h.executor.submitted_jobs() == vec!["a"]).await;

    h.executor.fail_cancellations(true);
    assert!(h.management.kill_flow(&id).await?);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.state_store.contains_dag(&id));

    h.executor.fail_cancellations(false);
    wait_until(|| !h.state_store.contains_dag(&id)).await;

    shutdown_tx.send(true)?;
    with_timeout(manager).await??;
    assert_eq!(h.executor.cancelled_jobs(), vec!["a", "b"]);
    assert!(h.action_store.is_empty());
    Ok(())
}
