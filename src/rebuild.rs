//! State-rebuilder contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::state::{MutableState, WorkflowIdentifier};

/// Deterministic replay of a history prefix into a fresh mutable state.
#[async_trait]
pub trait StateRebuilder: Send + Sync {
    /// Replay events `[1, base_rebuild_last_event_id]` from the base branch
    /// into a new mutable state bound to `target`.
    ///
    /// The returned state's current version equals the version of the last
    /// replayed event; the second value is the cumulative byte size of the
    /// replayed history.
    #[allow(clippy::too_many_arguments)]
    async fn rebuild(
        &self,
        now: DateTime<Utc>,
        base: WorkflowIdentifier,
        base_branch_token: &[u8],
        base_rebuild_last_event_id: i64,
        base_rebuild_last_event_version: i64,
        target: WorkflowIdentifier,
        target_branch_token: &[u8],
        request_id: &str,
    ) -> EngineResult<(Box<dyn MutableState>, i64)>;
}
