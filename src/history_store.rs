//! History event store contract: branch forks and paged event reads.
//!
//! The event store owns the tree of history branches behind opaque branch
//! tokens. Reset needs three operations from it: fork a branch at a chosen
//! node, confirm the fork, and stream a branch's events in batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::History;
use crate::pagination::{PageToken, PagingIterator};

/// Fork a history branch at `fork_node_id`; events `[1, fork_node_id)` are
/// shared with the source branch.
#[derive(Debug, Clone)]
pub struct ForkHistoryBranchRequest {
    pub fork_branch_token: Vec<u8>,
    pub fork_node_id: i64,
    /// Garbage-collection correlation info recorded with the new branch.
    pub info: String,
    pub shard_id: i32,
}

/// Confirm (or abandon) a previously forked branch.
#[derive(Debug, Clone)]
pub struct CompleteForkBranchRequest {
    pub branch_token: Vec<u8>,
    pub success: bool,
    pub shard_id: i32,
}

#[derive(Debug, Clone)]
pub struct ReadHistoryBranchRequest {
    pub branch_token: Vec<u8>,
    /// Inclusive lower bound.
    pub min_event_id: i64,
    /// Exclusive upper bound.
    pub max_event_id: i64,
    pub page_size: i32,
    pub next_page_token: Option<PageToken>,
    pub shard_id: i32,
}

#[derive(Debug, Clone)]
pub struct ReadHistoryBranchResponse {
    pub batches: Vec<History>,
    pub next_page_token: Option<PageToken>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Fork a new branch, returning its token. The branch is not considered
    /// live until completed.
    async fn fork_history_branch(
        &self,
        request: ForkHistoryBranchRequest,
    ) -> EngineResult<Vec<u8>>;

    async fn complete_fork_branch(&self, request: CompleteForkBranchRequest) -> EngineResult<()>;

    /// Read one page of event batches from a branch.
    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> EngineResult<ReadHistoryBranchResponse>;
}

/// Correlation string embedded into fork requests so the history garbage
/// collector can trace an orphaned branch back to its owner.
pub fn build_history_garbage_cleanup_info(
    domain_id: &str,
    workflow_id: &str,
    run_id: &str,
) -> String {
    format!("{domain_id}:{workflow_id}:{run_id}")
}

/// Adapt paged branch reads into a lazy iterator of event batches over
/// `[first_event_id, next_event_id)`.
pub fn paginate_history(
    store: Arc<dyn HistoryStore>,
    branch_token: Vec<u8>,
    first_event_id: i64,
    next_event_id: i64,
    page_size: i32,
    shard_id: i32,
) -> PagingIterator<History> {
    PagingIterator::new(Box::new(move |page_token| {
        let store = store.clone();
        let branch_token = branch_token.clone();
        Box::pin(async move {
            let response = store
                .read_history_branch(ReadHistoryBranchRequest {
                    branch_token,
                    min_event_id: first_event_id,
                    max_event_id: next_event_id,
                    page_size,
                    next_page_token: page_token,
                    shard_id,
                })
                .await?;
            Ok((response.batches, response.next_page_token))
        })
    }))
}

#[derive(Debug, Default)]
struct MemoryBranch {
    batches: Vec<History>,
    completed: bool,
}

/// In-memory history store for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    branches: Arc<Mutex<HashMap<Vec<u8>, MemoryBranch>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a branch with event batches under a caller-chosen token.
    pub fn register_branch(&self, branch_token: Vec<u8>, batches: Vec<History>) {
        let mut branches = self.branches.lock().expect("branches poisoned");
        branches.insert(
            branch_token,
            MemoryBranch {
                batches,
                completed: true,
            },
        );
    }

    pub fn branch_exists(&self, branch_token: &[u8]) -> bool {
        self.branches
            .lock()
            .expect("branches poisoned")
            .contains_key(branch_token)
    }

    pub fn branch_completed(&self, branch_token: &[u8]) -> bool {
        self.branches
            .lock()
            .expect("branches poisoned")
            .get(branch_token)
            .map(|branch| branch.completed)
            .unwrap_or(false)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn fork_history_branch(
        &self,
        request: ForkHistoryBranchRequest,
    ) -> EngineResult<Vec<u8>> {
        let mut branches = self.branches.lock().expect("branches poisoned");
        let source = branches.get(&request.fork_branch_token).ok_or_else(|| {
            EngineError::NotFound("fork source branch does not exist".to_string())
        })?;

        let mut forked = Vec::new();
        for batch in &source.batches {
            let events: Vec<_> = batch
                .events
                .iter()
                .filter(|event| event.event_id < request.fork_node_id)
                .cloned()
                .collect();
            if !events.is_empty() {
                forked.push(History { events });
            }
        }

        let new_token = Uuid::new_v4().as_bytes().to_vec();
        branches.insert(
            new_token.clone(),
            MemoryBranch {
                batches: forked,
                completed: false,
            },
        );
        Ok(new_token)
    }

    async fn complete_fork_branch(&self, request: CompleteForkBranchRequest) -> EngineResult<()> {
        let mut branches = self.branches.lock().expect("branches poisoned");
        if request.success {
            let branch = branches.get_mut(&request.branch_token).ok_or_else(|| {
                EngineError::NotFound("forked branch does not exist".to_string())
            })?;
            branch.completed = true;
        } else {
            branches.remove(&request.branch_token);
        }
        Ok(())
    }

    async fn read_history_branch(
        &self,
        request: ReadHistoryBranchRequest,
    ) -> EngineResult<ReadHistoryBranchResponse> {
        let branches = self.branches.lock().expect("branches poisoned");
        let branch = branches.get(&request.branch_token).ok_or_else(|| {
            EngineError::NotFound("history branch does not exist".to_string())
        })?;

        let in_range: Vec<History> = branch
            .batches
            .iter()
            .filter_map(|batch| {
                let events: Vec<_> = batch
                    .events
                    .iter()
                    .filter(|event| {
                        event.event_id >= request.min_event_id
                            && event.event_id < request.max_event_id
                    })
                    .cloned()
                    .collect();
                (!events.is_empty()).then_some(History { events })
            })
            .collect();

        let offset = request
            .next_page_token
            .map(|bytes| usize::from_le_bytes(bytes.try_into().unwrap_or_default()))
            .unwrap_or(0);
        let page_size = request.page_size.max(1) as usize;

        let batches: Vec<History> = in_range.iter().skip(offset).take(page_size).cloned().collect();
        let next_offset = offset + batches.len();
        let next_page_token =
            (next_offset < in_range.len()).then(|| next_offset.to_le_bytes().to_vec());

        Ok(ReadHistoryBranchResponse {
            batches,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, HistoryEvent};

    fn event(event_id: i64) -> HistoryEvent {
        HistoryEvent {
            event_id,
            version: 0,
            event_type: EventType::Unspecified as i32,
            attributes: None,
        }
    }

    fn batch(ids: &[i64]) -> History {
        History {
            events: ids.iter().map(|id| event(*id)).collect(),
        }
    }

    #[tokio::test]
    async fn fork_copies_shared_prefix_only() {
        let store = MemoryHistoryStore::new();
        store.register_branch(b"base".to_vec(), vec![batch(&[1, 2, 3]), batch(&[4, 5])]);

        let token = store
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: b"base".to_vec(),
                fork_node_id: 4,
                info: build_history_garbage_cleanup_info("domain", "wf", "run"),
                shard_id: 0,
            })
            .await
            .expect("fork");
        assert!(!store.branch_completed(&token));

        store
            .complete_fork_branch(CompleteForkBranchRequest {
                branch_token: token.clone(),
                success: true,
                shard_id: 0,
            })
            .await
            .expect("complete fork");
        assert!(store.branch_completed(&token));

        let response = store
            .read_history_branch(ReadHistoryBranchRequest {
                branch_token: token,
                min_event_id: 1,
                max_event_id: 100,
                page_size: 10,
                next_page_token: None,
                shard_id: 0,
            })
            .await
            .expect("read");
        assert_eq!(response.batches, vec![batch(&[1, 2, 3])]);
    }

    #[tokio::test]
    async fn abandoned_fork_is_removed() {
        let store = MemoryHistoryStore::new();
        store.register_branch(b"base".to_vec(), vec![batch(&[1, 2])]);

        let token = store
            .fork_history_branch(ForkHistoryBranchRequest {
                fork_branch_token: b"base".to_vec(),
                fork_node_id: 2,
                info: String::new(),
                shard_id: 0,
            })
            .await
            .expect("fork");

        store
            .complete_fork_branch(CompleteForkBranchRequest {
                branch_token: token.clone(),
                success: false,
                shard_id: 0,
            })
            .await
            .expect("abandon fork");
        assert!(!store.branch_exists(&token));
    }

    #[tokio::test]
    async fn paginate_history_streams_bounded_range() {
        let store = Arc::new(MemoryHistoryStore::new());
        store.register_branch(
            b"base".to_vec(),
            vec![batch(&[1, 2]), batch(&[3, 4]), batch(&[5, 6]), batch(&[7])],
        );

        let mut iter = paginate_history(store.clone(), b"base".to_vec(), 3, 7, 1, 0);
        let mut seen = Vec::new();
        while iter.has_next().await.expect("has_next") {
            let history = iter.next().expect("batch");
            seen.extend(history.events.iter().map(|event| event.event_id));
        }
        assert_eq!(seen, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn read_from_unknown_branch_is_not_found() {
        let store = MemoryHistoryStore::new();
        let err = store
            .read_history_branch(ReadHistoryBranchRequest {
                branch_token: b"nope".to_vec(),
                min_event_id: 1,
                max_event_id: 2,
                page_size: 1,
                next_page_token: None,
                shard_id: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
