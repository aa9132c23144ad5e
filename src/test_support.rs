//! In-memory collaborators for exercising the reset path without a real
//! engine: a scripted mutable state, a recording execution context backed by
//! a shared run store, and matching transaction-manager / domain-cache /
//! state-rebuilder doubles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::events::{
    ActivityTaskFailedAttributes, DecisionTaskFailedCause, DecisionTaskScheduledAttributes,
    EventType, History, HistoryEvent, WorkflowExecutionSignaledAttributes,
    WorkflowExecutionTerminatedAttributes, history_event,
};
use crate::messages::{decode_message, encode_message};
use crate::rebuild::StateRebuilder;
use crate::state::{
    ActivityInfo, CreateWorkflowMode, DecisionInfo, ExecutionContext, MutableState, ReleaseFn,
    TransactionPolicy, Workflow, WorkflowEvents, WorkflowIdentifier, WorkflowSnapshot,
};
use crate::transaction::{DomainCache, DomainEntry, TransactionManager};
use crate::version_history::{VersionHistories, VersionHistory, VersionHistoryItem};

/// Scripted [`MutableState`] that records appended events in memory.
#[derive(Clone)]
pub struct FakeMutableState {
    domain_id: String,
    workflow_id: String,
    run_id: String,
    version_histories: VersionHistories,
    next_event_id: i64,
    current_version: i64,
    last_write_version: i64,
    running: bool,
    in_flight_decision: Option<DecisionInfo>,
    decision_scheduled: bool,
    pending_activities: Vec<ActivityInfo>,
    new_events: Vec<HistoryEvent>,
}

impl FakeMutableState {
    /// A state whose current branch ends at `(last_event_id, version)`.
    pub fn new(
        domain_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        branch_token: Vec<u8>,
        last_event_id: i64,
        version: i64,
    ) -> Self {
        let history = VersionHistory::new(
            branch_token,
            vec![VersionHistoryItem::new(last_event_id, version)],
        );
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            version_histories: VersionHistories::new(history),
            next_event_id: last_event_id + 1,
            current_version: version,
            last_write_version: version,
            running: true,
            in_flight_decision: None,
            decision_scheduled: false,
            pending_activities: Vec::new(),
            new_events: Vec::new(),
        }
    }

    pub fn with_in_flight_decision(mut self, schedule_id: i64, started_id: i64) -> Self {
        self.in_flight_decision = Some(DecisionInfo {
            schedule_id,
            started_id,
        });
        self
    }

    pub fn with_pending_activity(mut self, activity: ActivityInfo) -> Self {
        self.pending_activities.push(activity);
        self
    }

    pub fn with_running(mut self, running: bool) -> Self {
        self.running = running;
        self
    }

    pub fn with_current_version(mut self, version: i64) -> Self {
        self.current_version = version;
        self
    }

    /// Events appended since the state was built.
    pub fn new_events(&self) -> &[HistoryEvent] {
        &self.new_events
    }

    fn append_event(
        &mut self,
        event_type: EventType,
        attributes: Option<history_event::Attributes>,
    ) -> HistoryEvent {
        let event = HistoryEvent {
            event_id: self.next_event_id,
            version: self.current_version,
            event_type: event_type as i32,
            attributes,
        };
        self.next_event_id += 1;
        self.new_events.push(event.clone());
        event
    }
}

impl MutableState for FakeMutableState {
    fn version_histories(&self) -> &VersionHistories {
        &self.version_histories
    }

    fn next_event_id(&self) -> i64 {
        self.next_event_id
    }

    fn current_version(&self) -> i64 {
        self.current_version
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn update_current_version(&mut self, version: i64, _force: bool) -> EngineResult<()> {
        self.current_version = version;
        Ok(())
    }

    fn last_write_version(&self) -> EngineResult<i64> {
        Ok(self.last_write_version)
    }

    fn is_workflow_execution_running(&self) -> bool {
        self.running
    }

    fn in_flight_decision(&self) -> Option<DecisionInfo> {
        self.in_flight_decision
    }

    fn has_pending_decision(&self) -> bool {
        self.in_flight_decision.is_some() || self.decision_scheduled
    }

    fn pending_activities(&self) -> Vec<ActivityInfo> {
        self.pending_activities.clone()
    }

    fn current_branch_token(&self) -> EngineResult<Vec<u8>> {
        Ok(self
            .version_histories
            .current_version_history()?
            .branch_token()
            .to_vec())
    }

    fn add_decision_task_failed_event(
        &mut self,
        schedule_id: i64,
        started_id: i64,
        cause: DecisionTaskFailedCause,
        details: Option<Vec<u8>>,
        identity: &str,
        reason: &str,
        base_run_id: &str,
        new_run_id: &str,
        fork_event_version: i64,
    ) -> EngineResult<HistoryEvent> {
        self.in_flight_decision = None;
        Ok(self.append_event(
            EventType::DecisionTaskFailed,
            Some(history_event::Attributes::DecisionTaskFailed(
                crate::events::DecisionTaskFailedAttributes {
                    scheduled_event_id: schedule_id,
                    started_event_id: started_id,
                    cause: cause as i32,
                    details,
                    identity: identity.to_string(),
                    reason: reason.to_string(),
                    base_run_id: base_run_id.to_string(),
                    new_run_id: new_run_id.to_string(),
                    fork_event_version,
                },
            )),
        ))
    }

    fn add_activity_task_failed_event(
        &mut self,
        schedule_id: i64,
        started_id: i64,
        reason: &str,
        details: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent> {
        self.pending_activities
            .retain(|activity| activity.schedule_id != schedule_id);
        Ok(self.append_event(
            EventType::ActivityTaskFailed,
            Some(history_event::Attributes::ActivityTaskFailed(
                ActivityTaskFailedAttributes {
                    scheduled_event_id: schedule_id,
                    started_event_id: started_id,
                    reason: reason.to_string(),
                    details,
                    identity: identity.to_string(),
                },
            )),
        ))
    }

    fn add_workflow_execution_signaled(
        &mut self,
        signal_name: &str,
        input: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent> {
        Ok(self.append_event(
            EventType::WorkflowExecutionSignaled,
            Some(history_event::Attributes::WorkflowExecutionSignaled(
                WorkflowExecutionSignaledAttributes {
                    signal_name: signal_name.to_string(),
                    input,
                    identity: identity.to_string(),
                },
            )),
        ))
    }

    fn add_workflow_execution_terminated_event(
        &mut self,
        reason: &str,
        details: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent> {
        self.running = false;
        Ok(self.append_event(
            EventType::WorkflowExecutionTerminated,
            Some(history_event::Attributes::WorkflowExecutionTerminated(
                WorkflowExecutionTerminatedAttributes {
                    reason: reason.to_string(),
                    details,
                    identity: identity.to_string(),
                },
            )),
        ))
    }

    fn add_decision_task_scheduled_event(&mut self) -> EngineResult<HistoryEvent> {
        self.decision_scheduled = true;
        Ok(self.append_event(
            EventType::DecisionTaskScheduled,
            Some(history_event::Attributes::DecisionTaskScheduled(
                DecisionTaskScheduledAttributes { attempt: 0 },
            )),
        ))
    }

    fn close_transaction_as_snapshot(
        &mut self,
        _now: DateTime<Utc>,
        _policy: TransactionPolicy,
    ) -> EngineResult<(WorkflowSnapshot, Vec<WorkflowEvents>)> {
        self.last_write_version = self.current_version;
        let snapshot = WorkflowSnapshot {
            domain_id: self.domain_id.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
            last_write_version: self.last_write_version,
            state: encode_message(&History {
                events: self.new_events.clone(),
            }),
        };
        let events = WorkflowEvents {
            branch_token: self.current_branch_token()?,
            events: std::mem::take(&mut self.new_events),
        };
        Ok((snapshot, vec![events]))
    }
}

/// One execution record created through a fake context.
#[derive(Debug, Clone)]
pub struct CreatedExecution {
    pub snapshot: WorkflowSnapshot,
    pub history_size: i64,
    pub prev_run_id: String,
    pub prev_last_write_version: i64,
}

#[derive(Default)]
struct RunStoreInner {
    /// (domain_id, workflow_id) -> (current run, last write version)
    current_runs: HashMap<(String, String), (String, i64)>,
    created: Vec<CreatedExecution>,
    terminated_runs: Vec<String>,
    first_event_batches: Vec<WorkflowEvents>,
    fail_create: bool,
}

/// Shared record of everything the fake contexts persisted.
#[derive(Clone, Default)]
pub struct RunStore {
    inner: Arc<Mutex<RunStoreInner>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the current-run pointer for a workflow.
    pub fn set_current_run(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
        last_write_version: i64,
    ) {
        let mut inner = self.inner.lock().expect("run store poisoned");
        inner.current_runs.insert(
            (domain_id.to_string(), workflow_id.to_string()),
            (run_id.to_string(), last_write_version),
        );
    }

    pub fn current_run(&self, domain_id: &str, workflow_id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("run store poisoned");
        inner
            .current_runs
            .get(&(domain_id.to_string(), workflow_id.to_string()))
            .map(|(run_id, _)| run_id.clone())
    }

    pub fn created_executions(&self) -> Vec<CreatedExecution> {
        self.inner.lock().expect("run store poisoned").created.clone()
    }

    pub fn terminated_runs(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("run store poisoned")
            .terminated_runs
            .clone()
    }

    pub fn first_event_batches(&self) -> Vec<WorkflowEvents> {
        self.inner
            .lock()
            .expect("run store poisoned")
            .first_event_batches
            .clone()
    }

    /// Make the next `create_workflow_execution` fail.
    pub fn fail_next_create(&self) {
        self.inner.lock().expect("run store poisoned").fail_create = true;
    }

    /// Decode the event batch persisted for the given run.
    pub fn persisted_events(&self, run_id: &str) -> Vec<HistoryEvent> {
        let inner = self.inner.lock().expect("run store poisoned");
        inner
            .created
            .iter()
            .find(|created| created.snapshot.run_id == run_id)
            .map(|created| {
                decode_message::<History>(&created.snapshot.state)
                    .expect("snapshot state decodes")
                    .events
            })
            .unwrap_or_default()
    }
}

/// Recording [`ExecutionContext`] bound to one run in a [`RunStore`].
pub struct FakeExecutionContext {
    domain_id: String,
    workflow_id: String,
    run_id: String,
    history_size: i64,
    store: RunStore,
}

impl FakeExecutionContext {
    pub fn new(
        domain_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        store: RunStore,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            history_size: 0,
            store,
        }
    }
}

#[async_trait]
impl ExecutionContext for FakeExecutionContext {
    fn set_history_size(&mut self, size: i64) {
        self.history_size = size;
    }

    async fn persist_first_workflow_events(
        &mut self,
        events: &WorkflowEvents,
    ) -> EngineResult<i64> {
        let size: i64 = events
            .events
            .iter()
            .map(|event| encode_message(event).len() as i64)
            .sum();
        let mut inner = self.store.inner.lock().expect("run store poisoned");
        inner.first_event_batches.push(events.clone());
        Ok(size)
    }

    async fn create_workflow_execution(
        &mut self,
        snapshot: &WorkflowSnapshot,
        history_size: i64,
        _now: DateTime<Utc>,
        mode: CreateWorkflowMode,
        prev_run_id: &str,
        prev_last_write_version: i64,
    ) -> EngineResult<()> {
        let mut inner = self.store.inner.lock().expect("run store poisoned");
        if inner.fail_create {
            inner.fail_create = false;
            return Err(EngineError::Internal("injected create failure".into()));
        }

        let key = (self.domain_id.clone(), self.workflow_id.clone());
        match mode {
            CreateWorkflowMode::BrandNew => {
                if inner.current_runs.contains_key(&key) {
                    return Err(EngineError::Internal(
                        "workflow already has a current run".into(),
                    ));
                }
            }
            CreateWorkflowMode::ContinueAsNew => {
                let current = inner.current_runs.get(&key);
                if current != Some(&(prev_run_id.to_string(), prev_last_write_version)) {
                    return Err(EngineError::Internal(
                        "conditional update of current run failed".into(),
                    ));
                }
            }
        }

        inner.current_runs.insert(
            key,
            (snapshot.run_id.clone(), snapshot.last_write_version),
        );
        inner.created.push(CreatedExecution {
            snapshot: snapshot.clone(),
            history_size,
            prev_run_id: prev_run_id.to_string(),
            prev_last_write_version,
        });
        Ok(())
    }

    async fn update_workflow_execution_with_new_as_active(
        &mut self,
        now: DateTime<Utc>,
        mut new_context: Box<dyn ExecutionContext>,
        mut new_state: Box<dyn MutableState>,
    ) -> EngineResult<()> {
        let (snapshot, events_seq) =
            new_state.close_transaction_as_snapshot(now, TransactionPolicy::Active)?;
        let first_batch = events_seq.first().ok_or_else(|| {
            EngineError::Internal("new mutable state closed without history events".into())
        })?;
        let history_size = new_context.persist_first_workflow_events(first_batch).await?;

        let mut inner = self.store.inner.lock().expect("run store poisoned");
        if inner.fail_create {
            inner.fail_create = false;
            return Err(EngineError::Internal("injected create failure".into()));
        }
        inner.terminated_runs.push(self.run_id.clone());
        inner.current_runs.insert(
            (self.domain_id.clone(), self.workflow_id.clone()),
            (snapshot.run_id.clone(), snapshot.last_write_version),
        );
        inner.created.push(CreatedExecution {
            snapshot: snapshot.clone(),
            history_size,
            prev_run_id: self.run_id.clone(),
            prev_last_write_version: 0,
        });
        Ok(())
    }
}

/// Transaction manager over a fixed set of seeded workflow states.
#[derive(Clone, Default)]
pub struct FakeTransactionManager {
    store: RunStore,
    workflows: Arc<Mutex<HashMap<String, FakeMutableState>>>,
    releases: Arc<Mutex<Vec<(String, bool)>>>,
}

impl FakeTransactionManager {
    pub fn new(store: RunStore) -> Self {
        Self {
            store,
            workflows: Arc::new(Mutex::new(HashMap::new())),
            releases: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seed a loadable workflow state, keyed by run ID.
    pub fn register_workflow(&self, state: FakeMutableState) {
        let mut workflows = self.workflows.lock().expect("workflows poisoned");
        workflows.insert(state.run_id().to_string(), state);
    }

    /// Release log: `(run_id, released_with_error)` in release order.
    pub fn releases(&self) -> Vec<(String, bool)> {
        self.releases.lock().expect("releases poisoned").clone()
    }
}

#[async_trait]
impl TransactionManager for FakeTransactionManager {
    async fn load_workflow(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> EngineResult<Workflow> {
        let state = {
            let workflows = self.workflows.lock().expect("workflows poisoned");
            workflows
                .get(run_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("workflow run {run_id} not found")))?
        };

        let releases = self.releases.clone();
        let released_run_id = run_id.to_string();
        let release_fn: ReleaseFn = Box::new(move |error| {
            releases
                .lock()
                .expect("releases poisoned")
                .push((released_run_id, error.is_some()));
        });

        Ok(Workflow::new(
            Box::new(state),
            Box::new(FakeExecutionContext::new(
                domain_id,
                workflow_id,
                run_id,
                self.store.clone(),
            )),
            release_fn,
        ))
    }

    async fn current_workflow_run_id(
        &self,
        domain_id: &str,
        workflow_id: &str,
    ) -> EngineResult<Option<String>> {
        Ok(self.store.current_run(domain_id, workflow_id))
    }

    fn new_execution_context(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Box<dyn ExecutionContext> {
        Box::new(FakeExecutionContext::new(
            domain_id,
            workflow_id,
            run_id,
            self.store.clone(),
        ))
    }
}

/// Domain cache over a fixed entry set.
#[derive(Clone, Default)]
pub struct FakeDomainCache {
    domains: Arc<Mutex<HashMap<String, DomainEntry>>>,
}

impl FakeDomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_domain(&self, entry: DomainEntry) {
        let mut domains = self.domains.lock().expect("domains poisoned");
        domains.insert(entry.name.clone(), entry);
    }
}

#[async_trait]
impl DomainCache for FakeDomainCache {
    async fn domain_by_name(&self, name: &str) -> EngineResult<DomainEntry> {
        let domains = self.domains.lock().expect("domains poisoned");
        domains
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("domain {name} not found")))
    }
}

/// Rebuilder returning a scripted state at the requested fork point.
///
/// The rebuilt state carries an in-flight decision ending exactly at the
/// fork boundary unless configured otherwise, plus any seeded activities.
#[derive(Clone, Default)]
pub struct FakeStateRebuilder {
    omit_decision: bool,
    activities: Arc<Mutex<Vec<ActivityInfo>>>,
    history_size: i64,
}

impl FakeStateRebuilder {
    pub fn new() -> Self {
        Self {
            omit_decision: false,
            activities: Arc::new(Mutex::new(Vec::new())),
            history_size: 1024,
        }
    }

    /// Rebuild states without an in-flight decision, violating the reset
    /// precondition.
    pub fn without_decision(mut self) -> Self {
        self.omit_decision = true;
        self
    }

    /// Seed a pending activity into every rebuilt state.
    pub fn with_pending_activity(self, activity: ActivityInfo) -> Self {
        self.activities
            .lock()
            .expect("activities poisoned")
            .push(activity);
        self
    }
}

#[async_trait]
impl StateRebuilder for FakeStateRebuilder {
    async fn rebuild(
        &self,
        _now: DateTime<Utc>,
        _base: WorkflowIdentifier,
        _base_branch_token: &[u8],
        base_rebuild_last_event_id: i64,
        base_rebuild_last_event_version: i64,
        target: WorkflowIdentifier,
        target_branch_token: &[u8],
        _request_id: &str,
    ) -> EngineResult<(Box<dyn MutableState>, i64)> {
        let mut state = FakeMutableState::new(
            target.domain_id,
            target.workflow_id,
            target.run_id,
            target_branch_token.to_vec(),
            base_rebuild_last_event_id,
            base_rebuild_last_event_version,
        );
        if !self.omit_decision {
            state = state.with_in_flight_decision(
                base_rebuild_last_event_id - 1,
                base_rebuild_last_event_id,
            );
        }
        for activity in self.activities.lock().expect("activities poisoned").iter() {
            state = state.with_pending_activity(activity.clone());
        }
        Ok((Box::new(state), self.history_size))
    }
}
