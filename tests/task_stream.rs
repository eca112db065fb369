// tests/task_stream.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use flowdag::clock::Clock;
use flowdag::dag::ExecutionStatus;
use flowdag::engine::{DagTask, DagTaskFactory, StreamOptions};
use flowdag::errors::FlowdagError;
use flowdag::types::{ActionType, FlowAction};
use flowdag_test_utils::builders::{dag_id, single_job_dag};
use flowdag_test_utils::{LeaseStep, TestHarness, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn launch_task(h: &TestHarness, flow_execution_id: i64) -> DagTask {
    let id = dag_id("g", "f", flow_execution_id);
    let dag = single_job_dag(&id, "job", ExecutionStatus::Pending);
    DagTaskFactory::create(
        &FlowAction::new(id, ActionType::Launch),
        dag.into_nodes(),
        h.clock.now_millis(),
    )
    .expect("valid launch task")
}

#[tokio::test]
async fn pulls_come_out_in_submission_order() -> TestResult {
    init_tracing();
    let h = TestHarness::new();

    for id in 1..=3 {
        h.stream.submit(launch_task(&h, id))?;
    }

    let mut pulled = Vec::new();
    while let Some(task) = h.stream.next().await? {
        pulled.push(task.dag_id().flow_execution_id);
    }

    assert_eq!(pulled, vec![1, 2, 3]);
    assert!(!h.stream.has_next());
    Ok(())
}

#[tokio::test]
async fn pulled_task_carries_its_lease_token() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    h.stream.submit(launch_task(&h, 1))?;

    let task = h.stream.next().await?.expect("task should be pulled");

    assert!(task.lease_token().is_some());
    assert_eq!(h.lease.calls(), vec![task.action()]);
    Ok(())
}

#[tokio::test]
async fn empty_stream_returns_none_without_asking_for_a_lease() -> TestResult {
    init_tracing();
    let h = TestHarness::new();

    assert!(!h.stream.has_next());
    assert!(h.stream.next().await?.is_none());
    assert!(h.lease.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn has_next_does_not_consult_the_lease_arbiter() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    h.lease.set_default(LeaseStep::NotLeader);
    h.stream.submit(launch_task(&h, 1))?;

    assert!(h.stream.has_next());
    assert!(h.stream.has_next());
    assert!(h.lease.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn not_leader_leaves_the_task_queued() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    h.stream.submit(launch_task(&h, 1))?;

    h.lease.push(LeaseStep::NotLeader);
    assert!(h.stream.next().await?.is_none());
    assert!(h.stream.has_next());
    assert_eq!(h.stream.len(), 1);

    // Leadership regained: the same task comes out.
    let task = h.stream.next().await?.expect("task should be pulled");
    assert_eq!(task.dag_id().flow_execution_id, 1);
    assert!(!h.stream.has_next());
    Ok(())
}

#[tokio::test]
async fn deferred_head_blocks_the_stream_by_default() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    let head = launch_task(&h, 1);
    h.stream.submit(head.clone())?;
    h.stream.submit(launch_task(&h, 2))?;

    h.lease
        .push_for(&head.action(), LeaseStep::Defer(Duration::from_secs(1)));
    assert!(h.stream.next().await?.is_none());

    assert_eq!(h.stream.len(), 2);
    // Only the head was asked for.
    assert_eq!(h.lease.calls(), vec![head.action()]);

    let task = h.stream.next().await?.expect("head should be pulled");
    assert_eq!(task.dag_id().flow_execution_id, 1);
    Ok(())
}

#[tokio::test]
async fn deferred_head_can_be_overtaken_when_reordering_is_allowed() -> TestResult {
    init_tracing();
    let h = TestHarness::with_stream_options(StreamOptions {
        allow_reorder_on_defer: true,
        ..StreamOptions::default()
    });
    let head = launch_task(&h, 1);
    h.stream.submit(head.clone())?;
    h.stream.submit(launch_task(&h, 2))?;

    h.lease
        .push_for(&head.action(), LeaseStep::Defer(Duration::from_secs(1)));
    let overtaking = h.stream.next().await?.expect("second task should be pulled");
    assert_eq!(overtaking.dag_id().flow_execution_id, 2);

    let head_again = h.stream.next().await?.expect("head should be pulled next");
    assert_eq!(head_again.dag_id().flow_execution_id, 1);
    assert!(!h.stream.has_next());
    Ok(())
}

#[tokio::test]
async fn not_leader_stops_a_reordering_scan() -> TestResult {
    init_tracing();
    let h = TestHarness::with_stream_options(StreamOptions {
        allow_reorder_on_defer: true,
        ..StreamOptions::default()
    });
    let head = launch_task(&h, 1);
    let second = launch_task(&h, 2);
    h.stream.submit(head.clone())?;
    h.stream.submit(second.clone())?;

    h.lease
        .push_for(&head.action(), LeaseStep::Defer(Duration::from_secs(1)));
    h.lease.push_for(&second.action(), LeaseStep::NotLeader);

    assert!(h.stream.next().await?.is_none());
    assert_eq!(h.stream.len(), 2);
    Ok(())
}

#[tokio::test]
async fn lease_failure_surfaces_and_keeps_the_task() -> TestResult {
    init_tracing();
    let h = TestHarness::new();
    h.stream.submit(launch_task(&h, 1))?;

    h.lease.push(LeaseStep::Fail("coordinator down".to_string()));
    match h.stream.next().await {
        Err(FlowdagError::LeaseError(msg)) => assert!(msg.contains("coordinator down")),
        other => panic!("expected LeaseError, got {other:?}"),
    }

    assert_eq!(h.stream.len(), 1);
    assert!(h.stream.next().await?.is_some());
    Ok(())
}

#[tokio::test]
async fn slow_lease_call_counts_as_deferred() -> TestResult {
    init_tracing();
    let h = TestHarness::with_stream_options(StreamOptions {
        lease_call_timeout: Duration::from_millis(20),
        ..StreamOptions::default()
    });
    h.stream.submit(launch_task(&h, 1))?;

    h.lease.push(LeaseStep::Hang);
    let pulled = with_timeout(h.stream.next()).await?;

    assert!(pulled.is_none());
    assert_eq!(h.stream.len(), 1);
    Ok(())
}

#[tokio::test]
async fn bounded_stream_rejects_when_full() -> TestResult {
    init_tracing();
    let h = TestHarness::with_stream_options(StreamOptions {
        capacity: Some(1),
        ..StreamOptions::default()
    });

    h.stream.submit(launch_task(&h, 1))?;
    match h.stream.submit(launch_task(&h, 2)) {
        Err(FlowdagError::QueueRejected { capacity }) => assert_eq!(capacity, 1),
        other => panic!("expected QueueRejected, got {other:?}"),
    }
    assert_eq!(h.stream.len(), 1);
    Ok(())
}

#[tokio::test]
async fn waiting_submission_completes_once_room_frees_up() -> TestResult {
    init_tracing();
    let h = TestHarness::with_stream_options(StreamOptions {
        capacity: Some(1),
        ..StreamOptions::default()
    });
    h.stream.submit(launch_task(&h, 1))?;

    let stream = Arc::clone(&h.stream);
    let waiting = launch_task(&h, 2);
    let submitter = tokio::spawn(async move { stream.submit_wait(waiting).await });

    tokio::task::yield_now().await;
    assert_eq!(h.stream.len(), 1);

    let first = h.stream.next().await?.expect("first task should be pulled");
    assert_eq!(first.dag_id().flow_execution_id, 1);

    with_timeout(submitter).await?;
    let second = h.stream.next().await?.expect("second task should be pulled");
    assert_eq!(second.dag_id().flow_execution_id, 2);
    Ok(())
}
