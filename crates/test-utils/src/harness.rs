use std::sync::Arc;
use std::time::Duration;

use flowdag::catalog::{FlowSpec, InMemoryFlowCatalog};
use flowdag::clock::Clock;
use flowdag::dag::DagStateStore;
use flowdag::engine::{
    DagManagementService, DagManager, DagManagerOptions, DagTaskStream, DeadlineEnforcer,
    ProcContext, SlaDefaults, StreamOptions,
};
use flowdag::metrics::DagManagerMetrics;
use flowdag::monitor::JobStatusPoller;
use flowdag::store::{InMemoryDagActionStore, InMemoryFailedDagStore};

use crate::clock::ManualClock;
use crate::fake_executor::RecordingExecutor;
use crate::fakes::{FakeJobStatusRetriever, ScriptedCompiler, ScriptedLeaseArbiter};

/// Clock reading every harness starts at.
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// The whole engine wired to fakes.
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub lease: Arc<ScriptedLeaseArbiter>,
    pub stream: Arc<DagTaskStream>,
    pub state_store: Arc<DagStateStore>,
    pub action_store: Arc<InMemoryDagActionStore>,
    pub failed_dags: Arc<InMemoryFailedDagStore>,
    pub catalog: Arc<InMemoryFlowCatalog>,
    pub compiler: Arc<ScriptedCompiler>,
    pub executor: Arc<RecordingExecutor>,
    pub statuses: Arc<FakeJobStatusRetriever>,
    pub metrics: Arc<DagManagerMetrics>,
    pub management: Arc<DagManagementService>,
    pub ctx: ProcContext,
    pub enforcer: Arc<DeadlineEnforcer>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(StreamOptions::default(), SlaDefaults::default())
    }

    pub fn with_stream_options(options: StreamOptions) -> Self {
        Self::with_options(options, SlaDefaults::default())
    }

    pub fn with_options(options: StreamOptions, sla: SlaDefaults) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let lease = Arc::new(ScriptedLeaseArbiter::new());
        let stream = Arc::new(DagTaskStream::new(lease.clone(), dyn_clock.clone(), options));
        let state_store = Arc::new(DagStateStore::new());
        let action_store = Arc::new(InMemoryDagActionStore::new());
        let failed_dags = Arc::new(InMemoryFailedDagStore::new());
        let catalog = Arc::new(InMemoryFlowCatalog::new());
        let compiler = Arc::new(ScriptedCompiler::new(dyn_clock.clone()));
        let executor = Arc::new(RecordingExecutor::new());
        let statuses = Arc::new(FakeJobStatusRetriever::new());
        let metrics = Arc::new(DagManagerMetrics::new());
        let poller = JobStatusPoller::new(statuses.clone(), metrics.clone());

        let management = Arc::new(DagManagementService::new(
            stream.clone(),
            state_store.clone(),
            catalog.clone(),
            compiler.clone(),
            failed_dags.clone(),
            action_store.clone(),
            dyn_clock.clone(),
        ));
        let ctx = ProcContext {
            state_store: state_store.clone(),
            executor: executor.clone(),
            action_store: action_store.clone(),
            failed_dags: failed_dags.clone(),
            lease_arbiter: lease.clone(),
            poller: poller.clone(),
        };
        let enforcer = Arc::new(DeadlineEnforcer::new(
            state_store.clone(),
            executor.clone(),
            poller,
            metrics.clone(),
            dyn_clock,
            sla,
            Duration::from_millis(10),
        ));

        Self {
            clock,
            lease,
            stream,
            state_store,
            action_store,
            failed_dags,
            catalog,
            compiler,
            executor,
            statuses,
            metrics,
            management,
            ctx,
            enforcer,
        }
    }

    pub fn register(&self, spec: FlowSpec) {
        self.catalog.put_spec(spec);
    }

    /// Consumer over this harness; polls fast so tests stay quick.
    pub fn manager(&self, exit_when_idle: bool) -> DagManager {
        DagManager::new(
            self.stream.clone(),
            self.management.clone(),
            self.ctx.clone(),
            DagManagerOptions {
                poll_interval: Duration::from_millis(5),
                exit_when_idle,
            },
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
