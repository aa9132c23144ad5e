//! Workflow reset orchestration.
//!
//! Resetting branches a new run off an existing one at a decision boundary:
//! fork the history branch at the chosen event, deterministically rebuild
//! mutable state up to that point, fail the in-flight decision and any
//! started activities with synthetic close events, re-apply signals that
//! arrived after the branch point (following continue-as-new successors), and
//! schedule a fresh decision. The new run only becomes durable in the final
//! persistence step, which atomically swaps the workflow's current-run
//! pointer; everything before it is in-memory and safe to abandon.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::{
    DecisionTaskFailedCause, EMPTY_EVENT_ID, EventType, FIRST_EVENT_ID, History, HistoryEvent,
    IDENTITY_HISTORY_SERVICE, TRANSIENT_EVENT_ID,
};
use crate::history_store::{
    CompleteForkBranchRequest, ForkHistoryBranchRequest, HistoryStore,
    build_history_garbage_cleanup_info, paginate_history,
};
use crate::rebuild::StateRebuilder;
use crate::state::{
    CreateWorkflowMode, ExecutionContext, MutableState, TransactionPolicy, Workflow,
    WorkflowIdentifier,
};
use crate::transaction::{DomainCache, DomainEntry, TransactionManager};

/// Page size for history reads while re-applying events.
pub const DEFAULT_RESET_PAGE_SIZE: i32 = 100;

/// Inputs of the internal reset entry point.
///
/// Used directly by conflict-resolution reapplication, which has already
/// resolved the base facts and the current workflow before deciding to reset.
#[derive(Debug, Clone)]
pub struct ResetParams {
    pub domain_id: String,
    pub workflow_id: String,
    pub base_run_id: String,
    pub base_branch_token: Vec<u8>,
    /// Last event replayed into the rebuilt state; the fork point is the
    /// event after it.
    pub base_rebuild_last_event_id: i64,
    pub base_rebuild_last_event_version: i64,
    pub base_next_event_id: i64,
    pub reset_run_id: String,
    pub reset_request_id: String,
    pub reset_workflow_version: i64,
    pub terminate_reason: String,
    pub reset_reason: String,
    /// Extra events to re-apply on top of the abandoned tail.
    pub additional_reapply_events: Vec<HistoryEvent>,
}

/// Orchestrates workflow resets against the engine's collaborators.
pub struct WorkflowResetter {
    shard_id: i32,
    page_size: i32,
    domain_cache: Arc<dyn DomainCache>,
    history_store: Arc<dyn HistoryStore>,
    transaction_manager: Arc<dyn TransactionManager>,
    state_rebuilder: Arc<dyn StateRebuilder>,
}

impl WorkflowResetter {
    pub fn new(
        shard_id: i32,
        domain_cache: Arc<dyn DomainCache>,
        history_store: Arc<dyn HistoryStore>,
        transaction_manager: Arc<dyn TransactionManager>,
        state_rebuilder: Arc<dyn StateRebuilder>,
    ) -> Self {
        Self {
            shard_id,
            page_size: DEFAULT_RESET_PAGE_SIZE,
            domain_cache,
            history_store,
            transaction_manager,
            state_rebuilder,
        }
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Reset a workflow to the decision boundary at
    /// `base_rebuild_last_event_id`, returning the run ID of the new
    /// execution.
    ///
    /// If the workflow's current run differs from the base and is still
    /// running, it is terminated in the same transaction that creates the
    /// new run.
    pub async fn reset_workflow_execution(
        &self,
        domain_name: &str,
        workflow_id: &str,
        base_run_id: &str,
        base_rebuild_last_event_id: i64,
        terminate_reason: &str,
        reset_reason: &str,
    ) -> EngineResult<String> {
        let domain = self.domain_cache.domain_by_name(domain_name).await?;
        let reset_run_id = Uuid::new_v4().to_string();
        let reset_request_id = Uuid::new_v4().to_string();

        debug!(
            domain = %domain_name,
            workflow_id,
            base_run_id,
            base_rebuild_last_event_id,
            reset_run_id = %reset_run_id,
            "resetting workflow execution"
        );

        let mut base_workflow = self
            .transaction_manager
            .load_workflow(&domain.id, workflow_id, base_run_id)
            .await?;

        let result = self
            .reset_locked_base(
                &domain,
                workflow_id,
                base_run_id,
                base_rebuild_last_event_id,
                &reset_run_id,
                &reset_request_id,
                terminate_reason,
                reset_reason,
                &mut base_workflow,
            )
            .await;

        base_workflow.release(result.as_ref().err());
        result.map(|()| reset_run_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn reset_locked_base(
        &self,
        domain: &DomainEntry,
        workflow_id: &str,
        base_run_id: &str,
        base_rebuild_last_event_id: i64,
        reset_run_id: &str,
        reset_request_id: &str,
        terminate_reason: &str,
        reset_reason: &str,
        base_workflow: &mut Workflow,
    ) -> EngineResult<()> {
        let (base_branch_token, base_rebuild_last_event_version, base_next_event_id) = {
            let histories = base_workflow.mutable_state.version_histories();
            let current = histories.current_version_history()?;
            (
                current.branch_token().to_vec(),
                current.version_at(base_rebuild_last_event_id)?,
                base_workflow.mutable_state.next_event_id(),
            )
        };

        let current_run_id = self
            .transaction_manager
            .current_workflow_run_id(&domain.id, workflow_id)
            .await?
            .filter(|run_id| !run_id.is_empty())
            .ok_or_else(|| {
                EngineError::Internal("workflow reset encountered missing current workflow".into())
            })?;

        let mut params = ResetParams {
            domain_id: domain.id.clone(),
            workflow_id: workflow_id.to_string(),
            base_run_id: base_run_id.to_string(),
            base_branch_token,
            base_rebuild_last_event_id,
            base_rebuild_last_event_version,
            base_next_event_id,
            reset_run_id: reset_run_id.to_string(),
            reset_request_id: reset_request_id.to_string(),
            reset_workflow_version: domain.failover_version,
            terminate_reason: terminate_reason.to_string(),
            reset_reason: reset_reason.to_string(),
            additional_reapply_events: Vec::new(),
        };

        if current_run_id == base_run_id {
            return self.reset_workflow(params, false, base_workflow).await;
        }

        let mut current_workflow = self
            .transaction_manager
            .load_workflow(&domain.id, workflow_id, &current_run_id)
            .await?;

        let result = async {
            let mut current_workflow_terminated = false;
            if current_workflow.mutable_state.is_workflow_execution_running() {
                current_workflow_terminated = true;
                terminate_workflow(current_workflow.mutable_state.as_mut(), terminate_reason)?;
                params.reset_workflow_version = current_workflow.mutable_state.current_version();
            }
            self.reset_workflow(params, current_workflow_terminated, &mut current_workflow)
                .await
        }
        .await;

        current_workflow.release(result.as_ref().err());
        result
    }

    /// Internal reset entry point: prepare the new run from pre-resolved
    /// base facts, then persist it against the given current workflow.
    pub async fn reset_workflow(
        &self,
        params: ResetParams,
        current_workflow_terminated: bool,
        current_workflow: &mut Workflow,
    ) -> EngineResult<()> {
        let (reset_state, reset_context) = self.prepare_reset_workflow(&params).await?;
        self.persist(
            current_workflow_terminated,
            current_workflow,
            reset_state,
            reset_context,
        )
        .await
    }

    async fn prepare_reset_workflow(
        &self,
        params: &ResetParams,
    ) -> EngineResult<(Box<dyn MutableState>, Box<dyn ExecutionContext>)> {
        let reset_branch_token = self
            .fork_branch(
                &params.domain_id,
                &params.workflow_id,
                &params.base_branch_token,
                params.base_rebuild_last_event_id + 1,
                &params.reset_run_id,
            )
            .await?;

        let (mut reset_state, reset_history_size) = self
            .state_rebuilder
            .rebuild(
                Utc::now(),
                WorkflowIdentifier::new(
                    &params.domain_id,
                    &params.workflow_id,
                    &params.base_run_id,
                ),
                &params.base_branch_token,
                params.base_rebuild_last_event_id,
                params.base_rebuild_last_event_version,
                WorkflowIdentifier::new(
                    &params.domain_id,
                    &params.workflow_id,
                    &params.reset_run_id,
                ),
                &reset_branch_token,
                &params.reset_request_id,
            )
            .await?;

        let mut reset_context = self.transaction_manager.new_execution_context(
            &params.domain_id,
            &params.workflow_id,
            &params.reset_run_id,
        );
        reset_context.set_history_size(reset_history_size);

        let base_last_event_version = reset_state.current_version();
        if base_last_event_version > params.reset_workflow_version {
            return Err(EngineError::Internal(
                "workflow reset encountered version mismatch".into(),
            ));
        }
        reset_state.update_current_version(params.reset_workflow_version, false)?;

        let decision = reset_state
            .in_flight_decision()
            .filter(|decision| decision.started_id + 1 == reset_state.next_event_id())
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "can only reset workflow to DecisionTaskStarted: {}",
                    params.base_rebuild_last_event_id
                ))
            })?;

        reset_state.add_decision_task_failed_event(
            decision.schedule_id,
            decision.started_id,
            DecisionTaskFailedCause::ResetWorkflow,
            None,
            IDENTITY_HISTORY_SERVICE,
            &params.reset_reason,
            &params.base_run_id,
            &params.reset_run_id,
            base_last_event_version,
        )?;

        fail_inflight_activities(reset_state.as_mut(), &params.terminate_reason)?;

        self.reapply_continue_as_new_workflow_events(
            reset_state.as_mut(),
            &params.domain_id,
            &params.workflow_id,
            &params.base_branch_token,
            params.base_rebuild_last_event_id + 1,
            params.base_next_event_id,
        )
        .await?;

        reapply_events(reset_state.as_mut(), &params.additional_reapply_events)?;

        schedule_decision(reset_state.as_mut())?;

        Ok((reset_state, reset_context))
    }

    async fn persist(
        &self,
        current_workflow_terminated: bool,
        current_workflow: &mut Workflow,
        mut reset_state: Box<dyn MutableState>,
        mut reset_context: Box<dyn ExecutionContext>,
    ) -> EngineResult<()> {
        let now = Utc::now();

        if current_workflow_terminated {
            return current_workflow
                .context
                .update_workflow_execution_with_new_as_active(now, reset_context, reset_state)
                .await;
        }

        let current_run_id = current_workflow.mutable_state.run_id().to_string();
        let current_last_write_version = current_workflow.mutable_state.last_write_version()?;

        let (snapshot, events_seq) =
            reset_state.close_transaction_as_snapshot(now, TransactionPolicy::Active)?;
        let first_batch = events_seq.first().ok_or_else(|| {
            EngineError::Internal("reset mutable state closed without history events".into())
        })?;

        let history_size = reset_context.persist_first_workflow_events(first_batch).await?;
        reset_context
            .create_workflow_execution(
                &snapshot,
                history_size,
                now,
                CreateWorkflowMode::ContinueAsNew,
                &current_run_id,
                current_last_write_version,
            )
            .await
    }

    /// Fork a new history branch at `fork_node_id` and confirm it.
    ///
    /// Confirmation is best effort: the underlying store cannot distinguish
    /// every timeout from success, and an unconfirmed branch is reclaimed by
    /// the history garbage collector via the info embedded at fork time.
    async fn fork_branch(
        &self,
        domain_id: &str,
        workflow_id: &str,
        fork_branch_token: &[u8],
        fork_node_id: i64,
        reset_run_id: &str,
    ) -> EngineResult<Vec<u8>> {
        let reset_branch_token = self
            .history_store
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: fork_branch_token.to_vec(),
                fork_node_id,
                info: build_history_garbage_cleanup_info(domain_id, workflow_id, reset_run_id),
                shard_id: self.shard_id,
            })
            .await?;

        if let Err(err) = self
            .history_store
            .complete_fork_branch(CompleteForkBranchRequest {
                branch_token: reset_branch_token.clone(),
                success: true,
                shard_id: self.shard_id,
            })
            .await
        {
            warn!(error = %err, "unable to complete creation of forked branch");
        }

        Ok(reset_branch_token)
    }

    /// Re-apply signal events from the abandoned tail of the base run, then
    /// from every continue-as-new successor run in order.
    async fn reapply_continue_as_new_workflow_events(
        &self,
        reset_state: &mut dyn MutableState,
        domain_id: &str,
        workflow_id: &str,
        base_branch_token: &[u8],
        base_rebuild_next_event_id: i64,
        base_next_event_id: i64,
    ) -> EngineResult<()> {
        let mut next_run_id = self
            .reapply_workflow_events(
                reset_state,
                base_rebuild_next_event_id,
                base_next_event_id,
                base_branch_token.to_vec(),
            )
            .await?;

        while let Some(run_id) = next_run_id.take() {
            debug!(run_id = %run_id, "re-applying events from continue-as-new successor");
            let (next_event_id, branch_token) = self
                .next_event_id_and_branch_token(domain_id, workflow_id, &run_id)
                .await?;
            next_run_id = self
                .reapply_workflow_events(reset_state, FIRST_EVENT_ID, next_event_id, branch_token)
                .await?;
        }
        Ok(())
    }

    /// Stream `[first_event_id, next_event_id)` from a branch, re-applying
    /// eligible events. Returns the continue-as-new successor run ID if the
    /// streamed range ends in one.
    async fn reapply_workflow_events(
        &self,
        reset_state: &mut dyn MutableState,
        first_event_id: i64,
        next_event_id: i64,
        branch_token: Vec<u8>,
    ) -> EngineResult<Option<String>> {
        let mut iter = paginate_history(
            self.history_store.clone(),
            branch_token,
            first_event_id,
            next_event_id,
            self.page_size,
            self.shard_id,
        );

        let mut last_batch: Option<History> = None;
        while iter.has_next().await? {
            let batch = iter.next().expect("paging iterator buffered a batch");
            reapply_events(reset_state, &batch.events)?;
            last_batch = Some(batch);
        }

        Ok(last_batch
            .as_ref()
            .and_then(|batch| batch.last_event())
            .filter(|event| event.event_type() == EventType::WorkflowExecutionContinuedAsNew)
            .and_then(|event| event.continued_as_new_attributes())
            .map(|attributes| attributes.new_execution_run_id.clone())
            .filter(|run_id| !run_id.is_empty()))
    }

    /// Read a run's next event ID and current branch token under its cache
    /// lock, releasing the lock immediately after.
    async fn next_event_id_and_branch_token(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> EngineResult<(i64, Vec<u8>)> {
        let mut workflow = self
            .transaction_manager
            .load_workflow(domain_id, workflow_id, run_id)
            .await?;

        let result: EngineResult<(i64, Vec<u8>)> = (|| {
            let next_event_id = workflow.mutable_state.next_event_id();
            let branch_token = workflow.mutable_state.current_branch_token()?;
            Ok((next_event_id, branch_token))
        })();

        workflow.release(result.as_ref().err());
        result
    }
}

/// Fail every started activity of a rebuilt state with a synthetic close
/// event. Unstarted activities stay pending; a transient started activity
/// cannot appear in a rebuilt state and is an invariant violation.
fn fail_inflight_activities(
    reset_state: &mut dyn MutableState,
    terminate_reason: &str,
) -> EngineResult<()> {
    for activity in reset_state.pending_activities() {
        match activity.started_id {
            EMPTY_EVENT_ID => {}
            TRANSIENT_EVENT_ID => {
                return Err(EngineError::Internal(
                    "workflow reset encountered transient activity".into(),
                ));
            }
            _ => {
                reset_state.add_activity_task_failed_event(
                    activity.schedule_id,
                    activity.started_id,
                    terminate_reason,
                    activity.details.clone(),
                    &activity.started_identity,
                )?;
            }
        }
    }
    Ok(())
}

/// Append the signal events of `events` to the state; other event types are
/// not eligible for re-application.
fn reapply_events(reset_state: &mut dyn MutableState, events: &[HistoryEvent]) -> EngineResult<()> {
    for event in events {
        if event.event_type() == EventType::WorkflowExecutionSignaled
            && let Some(attributes) = event.signaled_attributes()
        {
            reset_state.add_workflow_execution_signaled(
                &attributes.signal_name,
                attributes.input.clone(),
                &attributes.identity,
            )?;
        }
    }
    Ok(())
}

/// Make sure the state carries an outstanding decision for workers to pick
/// up.
fn schedule_decision(reset_state: &mut dyn MutableState) -> EngineResult<()> {
    if reset_state.has_pending_decision() {
        return Ok(());
    }
    reset_state.add_decision_task_scheduled_event()?;
    Ok(())
}

/// Terminate a running workflow in place: fail its in-flight decision, then
/// append the terminated event.
fn terminate_workflow(
    mutable_state: &mut dyn MutableState,
    terminate_reason: &str,
) -> EngineResult<()> {
    if let Some(decision) = mutable_state.in_flight_decision() {
        mutable_state.add_decision_task_failed_event(
            decision.schedule_id,
            decision.started_id,
            DecisionTaskFailedCause::ForceCloseDecision,
            None,
            IDENTITY_HISTORY_SERVICE,
            "",
            "",
            "",
            0,
        )?;
    }
    mutable_state.add_workflow_execution_terminated_event(
        terminate_reason,
        None,
        IDENTITY_HISTORY_SERVICE,
    )?;
    Ok(())
}
