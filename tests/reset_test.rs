//! End-to-end reset scenarios over the in-memory collaborators.

use std::sync::Arc;

use belay::error::EngineError;
use belay::events::{
    DecisionTaskFailedCause, EMPTY_EVENT_ID, EventType, History, HistoryEvent,
    IDENTITY_HISTORY_SERVICE, TRANSIENT_EVENT_ID, WorkflowExecutionContinuedAsNewAttributes,
    WorkflowExecutionSignaledAttributes, history_event,
};
use belay::history_store::MemoryHistoryStore;
use belay::resetter::WorkflowResetter;
use belay::state::ActivityInfo;
use belay::test_support::{
    FakeDomainCache, FakeMutableState, FakeStateRebuilder, FakeTransactionManager, RunStore,
};
use belay::transaction::DomainEntry;

const DOMAIN_NAME: &str = "orders";
const DOMAIN_ID: &str = "domain-1";
const WORKFLOW_ID: &str = "transfer-workflow";
const BASE_RUN_ID: &str = "base-run";

fn plain_event(event_id: i64) -> HistoryEvent {
    HistoryEvent {
        event_id,
        version: 0,
        event_type: EventType::Unspecified as i32,
        attributes: None,
    }
}

fn signal_event(event_id: i64, signal_name: &str, input: &[u8], identity: &str) -> HistoryEvent {
    HistoryEvent {
        event_id,
        version: 0,
        event_type: EventType::WorkflowExecutionSignaled as i32,
        attributes: Some(history_event::Attributes::WorkflowExecutionSignaled(
            WorkflowExecutionSignaledAttributes {
                signal_name: signal_name.to_string(),
                input: Some(input.to_vec()),
                identity: identity.to_string(),
            },
        )),
    }
}

fn continued_as_new_event(event_id: i64, new_run_id: &str) -> HistoryEvent {
    HistoryEvent {
        event_id,
        version: 0,
        event_type: EventType::WorkflowExecutionContinuedAsNew as i32,
        attributes: Some(history_event::Attributes::WorkflowExecutionContinuedAsNew(
            WorkflowExecutionContinuedAsNewAttributes {
                new_execution_run_id: new_run_id.to_string(),
            },
        )),
    }
}

/// Chunk events into small batches so reapplication exercises paging.
fn batches(events: Vec<HistoryEvent>) -> Vec<History> {
    events
        .chunks(3)
        .map(|chunk| History {
            events: chunk.to_vec(),
        })
        .collect()
}

struct ResetHarness {
    store: RunStore,
    history_store: Arc<MemoryHistoryStore>,
    transaction_manager: Arc<FakeTransactionManager>,
    domain_cache: Arc<FakeDomainCache>,
}

impl ResetHarness {
    fn new() -> Self {
        let store = RunStore::new();
        let domain_cache = FakeDomainCache::new();
        domain_cache.register_domain(DomainEntry {
            id: DOMAIN_ID.to_string(),
            name: DOMAIN_NAME.to_string(),
            failover_version: 100,
        });
        Self {
            store: store.clone(),
            history_store: Arc::new(MemoryHistoryStore::new()),
            transaction_manager: Arc::new(FakeTransactionManager::new(store)),
            domain_cache: Arc::new(domain_cache),
        }
    }

    /// Seed a base run whose current branch holds `events` and make it the
    /// workflow's current run.
    fn seed_base_run(&self, events: Vec<HistoryEvent>) {
        let last_event_id = events.last().expect("base history not empty").event_id;
        self.history_store
            .register_branch(b"base-branch".to_vec(), batches(events));
        self.transaction_manager.register_workflow(FakeMutableState::new(
            DOMAIN_ID,
            WORKFLOW_ID,
            BASE_RUN_ID,
            b"base-branch".to_vec(),
            last_event_id,
            0,
        ));
        self.store
            .set_current_run(DOMAIN_ID, WORKFLOW_ID, BASE_RUN_ID, 0);
    }

    fn resetter(&self, rebuilder: FakeStateRebuilder) -> WorkflowResetter {
        WorkflowResetter::new(
            0,
            self.domain_cache.clone(),
            self.history_store.clone(),
            self.transaction_manager.clone(),
            Arc::new(rebuilder),
        )
        .with_page_size(1)
    }
}

fn event_types(events: &[HistoryEvent]) -> Vec<EventType> {
    events.iter().map(|event| event.event_type()).collect()
}

#[tokio::test]
async fn reset_at_decision_boundary_creates_new_current_run() {
    let harness = ResetHarness::new();
    harness.seed_base_run((1..=10).map(plain_event).collect());

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let reset_run_id = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .expect("reset succeeds");

    assert_eq!(
        harness.store.current_run(DOMAIN_ID, WORKFLOW_ID),
        Some(reset_run_id.clone())
    );
    assert!(harness.store.terminated_runs().is_empty());

    let events = harness.store.persisted_events(&reset_run_id);
    assert_eq!(
        event_types(&events),
        vec![
            EventType::DecisionTaskFailed,
            EventType::DecisionTaskScheduled,
        ]
    );

    // the synthetic decision failure records the reset lineage
    let Some(history_event::Attributes::DecisionTaskFailed(failed)) = &events[0].attributes else {
        panic!("first event is not a decision failure");
    };
    assert_eq!(failed.cause, DecisionTaskFailedCause::ResetWorkflow as i32);
    assert_eq!(failed.reason, "bad deploy");
    assert_eq!(failed.base_run_id, BASE_RUN_ID);
    assert_eq!(failed.new_run_id, reset_run_id);
    assert_eq!(failed.identity, IDENTITY_HISTORY_SERVICE);
    assert_eq!(failed.started_event_id, 10);

    // events start right after the fork point
    assert_eq!(events[0].event_id, 11);

    // the new run was created against the old current run pointer
    let created = harness.store.created_executions();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].prev_run_id, BASE_RUN_ID);
    assert!(created[0].history_size > 0);

    // the forked branch exists and its creation was confirmed
    let first_batches = harness.store.first_event_batches();
    assert_eq!(first_batches.len(), 1);
    assert!(harness.history_store.branch_completed(&first_batches[0].branch_token));

    // the base lease was released cleanly
    assert_eq!(
        harness.transaction_manager.releases(),
        vec![(BASE_RUN_ID.to_string(), false)]
    );
}

#[tokio::test]
async fn reset_reapplies_signals_from_abandoned_tail() {
    let harness = ResetHarness::new();
    let mut events: Vec<HistoryEvent> = (1..=14).map(plain_event).collect();
    events.push(signal_event(15, "release", &[7, 7], "client-a"));
    harness.seed_base_run(events);

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let reset_run_id = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .expect("reset succeeds");

    let events = harness.store.persisted_events(&reset_run_id);
    assert_eq!(
        event_types(&events),
        vec![
            EventType::DecisionTaskFailed,
            EventType::WorkflowExecutionSignaled,
            EventType::DecisionTaskScheduled,
        ]
    );

    let signal = events[1].signaled_attributes().expect("signal attributes");
    assert_eq!(signal.signal_name, "release");
    assert_eq!(signal.input.as_deref(), Some(&[7u8, 7u8][..]));
    assert_eq!(signal.identity, "client-a");
}

#[tokio::test]
async fn reset_follows_continue_as_new_chain() {
    let harness = ResetHarness::new();

    // base run: signal at 12, then continue-as-new into run-2 at 15
    let mut base_events: Vec<HistoryEvent> = (1..=11).map(plain_event).collect();
    base_events.push(signal_event(12, "first", b"1", "client-a"));
    base_events.extend([plain_event(13), plain_event(14)]);
    base_events.push(continued_as_new_event(15, "run-2"));
    harness.seed_base_run(base_events);

    // successor run: one signal of its own
    let mut successor_events: Vec<HistoryEvent> = (1..=4).map(plain_event).collect();
    successor_events.push(signal_event(5, "second", b"2", "client-b"));
    harness
        .history_store
        .register_branch(b"run2-branch".to_vec(), batches(successor_events));
    harness.transaction_manager.register_workflow(FakeMutableState::new(
        DOMAIN_ID,
        WORKFLOW_ID,
        "run-2",
        b"run2-branch".to_vec(),
        5,
        0,
    ));

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let reset_run_id = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .expect("reset succeeds");

    let events = harness.store.persisted_events(&reset_run_id);
    assert_eq!(
        event_types(&events),
        vec![
            EventType::DecisionTaskFailed,
            EventType::WorkflowExecutionSignaled,
            EventType::WorkflowExecutionSignaled,
            EventType::DecisionTaskScheduled,
        ]
    );
    assert_eq!(
        events[1].signaled_attributes().unwrap().signal_name,
        "first"
    );
    assert_eq!(
        events[2].signaled_attributes().unwrap().signal_name,
        "second"
    );

    // the successor lease was taken and released cleanly
    let releases = harness.transaction_manager.releases();
    assert!(releases.contains(&("run-2".to_string(), false)));
}

#[tokio::test]
async fn reset_fails_started_activities_and_skips_unstarted() {
    let harness = ResetHarness::new();
    harness.seed_base_run((1..=10).map(plain_event).collect());

    let rebuilder = FakeStateRebuilder::new()
        .with_pending_activity(ActivityInfo {
            schedule_id: 7,
            started_id: EMPTY_EVENT_ID,
            details: None,
            started_identity: String::new(),
        })
        .with_pending_activity(ActivityInfo {
            schedule_id: 8,
            started_id: 9,
            details: Some(b"progress".to_vec()),
            started_identity: "worker-1".to_string(),
        });

    let resetter = harness.resetter(rebuilder);
    let reset_run_id = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .expect("reset succeeds");

    let events = harness.store.persisted_events(&reset_run_id);
    assert_eq!(
        event_types(&events),
        vec![
            EventType::DecisionTaskFailed,
            EventType::ActivityTaskFailed,
            EventType::DecisionTaskScheduled,
        ]
    );

    let Some(history_event::Attributes::ActivityTaskFailed(failed)) = &events[1].attributes else {
        panic!("second event is not an activity failure");
    };
    assert_eq!(failed.scheduled_event_id, 8);
    assert_eq!(failed.started_event_id, 9);
    assert_eq!(failed.reason, "operator terminate");
    assert_eq!(failed.details.as_deref(), Some(&b"progress"[..]));
    assert_eq!(failed.identity, "worker-1");
}

#[tokio::test]
async fn reset_terminates_running_current_workflow_in_one_transaction() {
    let harness = ResetHarness::new();

    // base run already superseded by a running current run
    harness
        .history_store
        .register_branch(b"base-branch".to_vec(), batches((1..=10).map(plain_event).collect()));
    harness.transaction_manager.register_workflow(FakeMutableState::new(
        DOMAIN_ID,
        WORKFLOW_ID,
        BASE_RUN_ID,
        b"base-branch".to_vec(),
        10,
        0,
    ));
    harness.transaction_manager.register_workflow(
        FakeMutableState::new(
            DOMAIN_ID,
            WORKFLOW_ID,
            "current-run",
            b"current-branch".to_vec(),
            6,
            0,
        )
        .with_in_flight_decision(5, 6)
        .with_running(true),
    );
    harness
        .store
        .set_current_run(DOMAIN_ID, WORKFLOW_ID, "current-run", 0);

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let reset_run_id = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .expect("reset succeeds");

    assert_eq!(
        harness.store.current_run(DOMAIN_ID, WORKFLOW_ID),
        Some(reset_run_id.clone())
    );
    assert_eq!(harness.store.terminated_runs(), vec!["current-run".to_string()]);

    let created = harness.store.created_executions();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].prev_run_id, "current-run");

    // both leases released cleanly, current before base
    assert_eq!(
        harness.transaction_manager.releases(),
        vec![
            ("current-run".to_string(), false),
            (BASE_RUN_ID.to_string(), false),
        ]
    );
}

#[tokio::test]
async fn failed_persist_leaves_current_run_untouched() {
    let harness = ResetHarness::new();
    harness.seed_base_run((1..=10).map(plain_event).collect());
    harness.store.fail_next_create();

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Internal(_)));
    assert_eq!(
        harness.store.current_run(DOMAIN_ID, WORKFLOW_ID),
        Some(BASE_RUN_ID.to_string())
    );
    assert!(harness.store.created_executions().is_empty());

    // the lease release carried the failure
    assert_eq!(
        harness.transaction_manager.releases(),
        vec![(BASE_RUN_ID.to_string(), true)]
    );
}

#[tokio::test]
async fn reset_requires_decision_task_started_boundary() {
    let harness = ResetHarness::new();
    harness.seed_base_run((1..=10).map(plain_event).collect());

    let resetter = harness.resetter(FakeStateRebuilder::new().without_decision());
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    match err {
        EngineError::InvalidArgument(message) => {
            assert!(message.contains("DecisionTaskStarted"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn transient_activity_after_rebuild_is_internal_error() {
    let harness = ResetHarness::new();
    harness.seed_base_run((1..=10).map(plain_event).collect());

    let rebuilder = FakeStateRebuilder::new().with_pending_activity(ActivityInfo {
        schedule_id: 8,
        started_id: TRANSIENT_EVENT_ID,
        details: None,
        started_identity: String::new(),
    });

    let resetter = harness.resetter(rebuilder);
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Internal(_)));
    assert!(harness.store.created_executions().is_empty());
}

#[tokio::test]
async fn rebuilt_version_above_reset_version_is_rejected() {
    let harness = ResetHarness::new();

    // the base branch was written at version 200, above this domain's
    // failover version of 100
    harness
        .history_store
        .register_branch(b"base-branch".to_vec(), batches((1..=10).map(plain_event).collect()));
    harness.transaction_manager.register_workflow(FakeMutableState::new(
        DOMAIN_ID,
        WORKFLOW_ID,
        BASE_RUN_ID,
        b"base-branch".to_vec(),
        10,
        200,
    ));
    harness
        .store
        .set_current_run(DOMAIN_ID, WORKFLOW_ID, BASE_RUN_ID, 200);

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    match err {
        EngineError::Internal(message) => {
            assert!(message.contains("version mismatch"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_current_workflow_is_internal_error() {
    let harness = ResetHarness::new();

    // base run exists but no current-run pointer was ever written
    harness
        .history_store
        .register_branch(b"base-branch".to_vec(), batches((1..=10).map(plain_event).collect()));
    harness.transaction_manager.register_workflow(FakeMutableState::new(
        DOMAIN_ID,
        WORKFLOW_ID,
        BASE_RUN_ID,
        b"base-branch".to_vec(),
        10,
        0,
    ));

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            BASE_RUN_ID,
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Internal(_)));
    assert_eq!(
        harness.transaction_manager.releases(),
        vec![(BASE_RUN_ID.to_string(), true)]
    );
}

#[tokio::test]
async fn unknown_base_run_is_not_found() {
    let harness = ResetHarness::new();

    let resetter = harness.resetter(FakeStateRebuilder::new());
    let err = resetter
        .reset_workflow_execution(
            DOMAIN_NAME,
            WORKFLOW_ID,
            "no-such-run",
            10,
            "operator terminate",
            "bad deploy",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound(_)));
}
