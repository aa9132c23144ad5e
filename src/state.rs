//! Collaborator contracts around a workflow's mutable state.
//!
//! The state reducer itself lives outside this crate; reset only needs to
//! interrogate a rebuilt state, append a handful of synthetic close events,
//! and close the result into a snapshot. Those operations are expressed here
//! as the [`MutableState`] and [`ExecutionContext`] traits, and a loaded
//! workflow travels as a [`Workflow`]: state + context + the release handle
//! that keeps the engine's per-workflow cache consistent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::events::{DecisionTaskFailedCause, HistoryEvent};
use crate::version_history::VersionHistories;

/// Fully qualified workflow run address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowIdentifier {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowIdentifier {
    pub fn new(
        domain_id: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Bookkeeping for a decision task handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionInfo {
    pub schedule_id: i64,
    pub started_id: i64,
}

/// Bookkeeping for a pending activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub schedule_id: i64,
    pub started_id: i64,
    pub details: Option<Vec<u8>>,
    pub started_identity: String,
}

/// Which cluster role the closing transaction acts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPolicy {
    Active,
    Passive,
}

/// How the store treats the workflow's current-run pointer on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateWorkflowMode {
    /// No current run may exist for the workflow ID.
    BrandNew,
    /// Compare-and-swap the current-run pointer from the given previous run.
    ContinueAsNew,
}

/// Complete serialised mutable-state image persisted in one atomic write.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub last_write_version: i64,
    pub state: Vec<u8>,
}

/// One batch of new history events bound to a branch, produced when a
/// transaction closes.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEvents {
    pub branch_token: Vec<u8>,
    pub events: Vec<HistoryEvent>,
}

/// Mutable execution state of one workflow run, as consumed by reset.
pub trait MutableState: Send {
    fn version_histories(&self) -> &VersionHistories;
    fn next_event_id(&self) -> i64;
    fn current_version(&self) -> i64;
    fn run_id(&self) -> &str;

    /// Raise the state's failover version without appending history.
    fn update_current_version(&mut self, version: i64, force: bool) -> EngineResult<()>;

    /// Version of the last durable write to this run.
    fn last_write_version(&self) -> EngineResult<i64>;

    fn is_workflow_execution_running(&self) -> bool;
    fn in_flight_decision(&self) -> Option<DecisionInfo>;
    fn has_pending_decision(&self) -> bool;
    fn pending_activities(&self) -> Vec<ActivityInfo>;
    fn current_branch_token(&self) -> EngineResult<Vec<u8>>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> EngineResult<HistoryEvent>;

    fn add_activity_task_failed_event(
        &mut self,
        schedule_id: i64,
        started_id: i64,
        reason: &str,
        details: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent>;

    fn add_workflow_execution_signaled(
        &mut self,
        signal_name: &str,
        input: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent>;

    fn add_workflow_execution_terminated_event(
        &mut self,
        reason: &str,
        details: Option<Vec<u8>>,
        identity: &str,
    ) -> EngineResult<HistoryEvent>;

    fn add_decision_task_scheduled_event(&mut self) -> EngineResult<HistoryEvent>;

    /// Close all buffered mutations into a snapshot plus the event batches
    /// that have to reach the event store with it.
    fn close_transaction_as_snapshot(
        &mut self,
        now: DateTime<Utc>,
        policy: TransactionPolicy,
    ) -> EngineResult<(WorkflowSnapshot, Vec<WorkflowEvents>)>;
}

/// Storage-facing side of one loaded workflow run.
#[async_trait]
pub trait ExecutionContext: Send {
    fn set_history_size(&mut self, size: i64);

    /// Persist the first event batch of a brand-new run, returning its size
    /// in bytes.
    async fn persist_first_workflow_events(
        &mut self,
        events: &WorkflowEvents,
    ) -> EngineResult<i64>;

    /// Create the execution record. Under [`CreateWorkflowMode::ContinueAsNew`]
    /// the store swaps the current-run pointer from `prev_run_id` at
    /// `prev_last_write_version`; a mismatch is a conditional-update failure.
    async fn create_workflow_execution(
        &mut self,
        snapshot: &WorkflowSnapshot,
        history_size: i64,
        now: DateTime<Utc>,
        mode: CreateWorkflowMode,
        prev_run_id: &str,
        prev_last_write_version: i64,
    ) -> EngineResult<()>;

    /// Update this (terminated) run and attach the new run in one
    /// transaction, making the new run current.
    async fn update_workflow_execution_with_new_as_active(
        &mut self,
        now: DateTime<Utc>,
        new_context: Box<dyn ExecutionContext>,
        new_state: Box<dyn MutableState>,
    ) -> EngineResult<()>;
}

/// Callback releasing a workflow's exclusive cache handle.
///
/// Receives the final error of the operation: an error evicts the cached
/// entry, success keeps it.
pub type ReleaseFn = Box<dyn FnOnce(Option<&EngineError>) + Send>;

/// One loaded workflow run: mutable state, storage context and the release
/// handle obtained from the per-workflow cache lock.
pub struct Workflow {
    pub mutable_state: Box<dyn MutableState>,
    pub context: Box<dyn ExecutionContext>,
    release_fn: Option<ReleaseFn>,
}

impl Workflow {
    pub fn new(
        mutable_state: Box<dyn MutableState>,
        context: Box<dyn ExecutionContext>,
        release_fn: ReleaseFn,
    ) -> Self {
        Self {
            mutable_state,
            context,
            release_fn: Some(release_fn),
        }
    }

    /// Fire the release handle with the operation's final error.
    ///
    /// Safe to call more than once; only the first call reaches the cache.
    pub fn release(&mut self, error: Option<&EngineError>) {
        if let Some(release_fn) = self.release_fn.take() {
            release_fn(error);
        }
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        if let Some(release_fn) = self.release_fn.take() {
            warn!("workflow lease dropped without explicit release");
            let err = EngineError::Internal("workflow lease dropped without release".to_string());
            release_fn(Some(&err));
        }
    }
}
