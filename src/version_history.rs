//! Version-history algebra for multi-cluster conflict resolution.
//!
//! Replicated workflow history is tree shaped: branches fork and never merge.
//! Each branch tracks the monotonic mapping from event IDs to cluster failover
//! versions as a run-length encoded sequence of [`VersionHistoryItem`]s. An
//! item `(event_id, version)` asserts that every event in
//! `(prev.event_id, event_id]` was written at `version`.
//!
//! [`VersionHistories`] is the per-workflow collection of branches with a
//! distinguished current branch. It drives conflict detection between
//! clusters and branch selection for reset.

use crate::error::{EngineError, EngineResult};
use crate::events::FIRST_EVENT_ID;

/// Sentinel failover version meaning "no version recorded".
pub const EMPTY_VERSION: i64 = -24;

/// One run-length encoded segment of a version history.
///
/// Covers all event IDs in `(prev.event_id, event_id]` at `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionHistoryItem {
    event_id: i64,
    version: i64,
}

impl VersionHistoryItem {
    /// Construct a validated item.
    ///
    /// Panics on an out-of-range event ID or version; such inputs can only be
    /// produced by programmer error.
    pub fn new(event_id: i64, version: i64) -> Self {
        if event_id < 0 || (version < 0 && version != EMPTY_VERSION) {
            panic!("invalid version history item event ID: {event_id}, version: {version}");
        }
        Self { event_id, version }
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    pub fn version(&self) -> i64 {
        self.version
    }
}

/// One branch of a workflow's replicated history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionHistory {
    branch_token: Vec<u8>,
    items: Vec<VersionHistoryItem>,
}

impl VersionHistory {
    /// Build a history from a branch token and an item sequence.
    ///
    /// Panics if the item sequence is not strictly increasing in both
    /// coordinates; persisted histories are valid by construction, so a
    /// violation here is a programmer error.
    pub fn new(branch_token: Vec<u8>, items: Vec<VersionHistoryItem>) -> Self {
        let mut history = Self {
            branch_token,
            items: Vec::with_capacity(items.len()),
        };
        for item in items {
            if let Err(err) = history.add_or_update_item(item) {
                panic!("unable to initialize version history: {err}");
            }
        }
        history
    }

    /// Append a new version segment or extend the last one.
    ///
    /// Rejects items that would break the strict double-monotonicity of the
    /// sequence. An item carrying the last segment's version extends that
    /// segment in place; a higher version begins a new segment.
    pub fn add_or_update_item(&mut self, item: VersionHistoryItem) -> EngineResult<()> {
        let Some(last) = self.items.last_mut() else {
            self.items.push(item);
            return Ok(());
        };

        if item.version < last.version {
            return Err(EngineError::InvalidArgument(format!(
                "cannot add version history item with lower version {} (last version {})",
                item.version, last.version,
            )));
        }
        if item.event_id <= last.event_id {
            return Err(EngineError::InvalidArgument(format!(
                "cannot add version history item with lower event ID {} (last event ID {})",
                item.event_id, last.event_id,
            )));
        }

        if item.version > last.version {
            self.items.push(item);
        } else {
            last.event_id = item.event_id;
        }
        Ok(())
    }

    /// Whether the given item falls inside one of this history's segments.
    pub fn contains_item(&self, item: &VersionHistoryItem) -> bool {
        let mut prev_event_id = FIRST_EVENT_ID - 1;
        for current in &self.items {
            if item.version == current.version {
                // event ID 0 probes the state before the first event
                if item.event_id == FIRST_EVENT_ID - 1 && item.event_id <= current.event_id {
                    return true;
                }
                if prev_event_id < item.event_id && item.event_id <= current.event_id {
                    return true;
                }
            } else if item.version < current.version {
                return false;
            }
            prev_event_id = current.event_id;
        }
        false
    }

    /// Failover version of the segment covering `event_id`.
    pub fn version_at(&self, event_id: i64) -> EngineResult<i64> {
        let last = self.last_item()?;
        if event_id < FIRST_EVENT_ID || event_id > last.event_id {
            return Err(EngineError::InvalidArgument(format!(
                "event ID {event_id} is not covered by version history",
            )));
        }
        for current in &self.items {
            if event_id <= current.event_id {
                return Ok(current.version);
            }
        }
        Err(EngineError::InvalidArgument(format!(
            "event ID {event_id} is not covered by version history",
        )))
    }

    /// Lowest common ancestor item between this history and a remote one.
    ///
    /// Two-pointer descent from both tails: a shared version names a shared
    /// segment, whose common prefix ends at the smaller event ID; otherwise
    /// the pointer sitting on the larger version moves back.
    pub fn find_lca_item(&self, remote: &VersionHistory) -> EngineResult<VersionHistoryItem> {
        let mut local_index = self.items.len();
        let mut remote_index = remote.items.len();

        while local_index > 0 && remote_index > 0 {
            let local_item = &self.items[local_index - 1];
            let remote_item = &remote.items[remote_index - 1];

            if local_item.version == remote_item.version {
                if local_item.event_id > remote_item.event_id {
                    return Ok(*remote_item);
                }
                return Ok(*local_item);
            }
            if local_item.version > remote_item.version {
                local_index -= 1;
            } else {
                remote_index -= 1;
            }
        }

        Err(EngineError::InvalidArgument(
            "version history is malformed: no joint point found".to_string(),
        ))
    }

    /// Copy of this history truncated to end exactly at `lca_item`.
    pub fn duplicate_until_lca_item(
        &self,
        lca_item: &VersionHistoryItem,
    ) -> EngineResult<VersionHistory> {
        let mut history = VersionHistory::default();
        let not_covered = || {
            EngineError::InvalidArgument(
                "version history does not contain the LCA item".to_string(),
            )
        };

        for item in &self.items {
            if item.version < lca_item.version {
                history.add_or_update_item(*item)?;
            } else if item.version == lca_item.version {
                if lca_item.event_id > item.event_id {
                    return Err(not_covered());
                }
                history.add_or_update_item(*lca_item)?;
                return Ok(history);
            } else {
                return Err(not_covered());
            }
        }

        Err(not_covered())
    }

    /// Whether appending new history after `item` extends this branch
    /// without forking, i.e. `item` is exactly the tail item.
    pub fn is_lca_appendable(&self, item: &VersionHistoryItem) -> bool {
        let last = self
            .items
            .last()
            .expect("version history not initialized");
        last == item
    }

    /// Replace the branch token.
    pub fn set_branch_token(&mut self, branch_token: Vec<u8>) {
        self.branch_token = branch_token;
    }

    /// The opaque event-store token identifying this branch.
    pub fn branch_token(&self) -> &[u8] {
        &self.branch_token
    }

    pub fn first_item(&self) -> EngineResult<VersionHistoryItem> {
        self.items
            .first()
            .copied()
            .ok_or_else(|| EngineError::InvalidArgument("version history is empty".to_string()))
    }

    pub fn last_item(&self) -> EngineResult<VersionHistoryItem> {
        self.items
            .last()
            .copied()
            .ok_or_else(|| EngineError::InvalidArgument("version history is empty".to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[VersionHistoryItem] {
        &self.items
    }
}

/// All known history branches of one workflow plus the current branch index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHistories {
    current_index: usize,
    histories: Vec<VersionHistory>,
}

impl VersionHistories {
    /// Start a branch collection from its first (current) branch.
    pub fn new(version_history: VersionHistory) -> Self {
        Self {
            current_index: 0,
            histories: vec![version_history],
        }
    }

    /// Append a branch. All branches must share the genesis event version.
    ///
    /// Returns whether the current branch switched (the new branch carries a
    /// higher last-event version) and the index of the appended branch.
    pub fn add_version_history(
        &mut self,
        version_history: VersionHistory,
    ) -> EngineResult<(bool, usize)> {
        let incoming_first = version_history.first_item()?;
        let current = self.current_version_history()?;
        let current_first = current.first_item()?;

        if incoming_first.version != current_first.version {
            return Err(EngineError::InvalidArgument(
                "version history first item does not match".to_string(),
            ));
        }

        let new_last = version_history.last_item()?;
        let current_last = current.last_item()?;

        self.histories.push(version_history);
        let new_index = self.histories.len() - 1;

        let current_branch_changed = new_last.version > current_last.version;
        if current_branch_changed {
            self.current_index = new_index;
        }
        Ok((current_branch_changed, new_index))
    }

    /// Branch whose prefix sits closest to the incoming history, together
    /// with the LCA item against that branch.
    ///
    /// Ties on LCA event ID are broken towards the shorter local branch to
    /// keep later writes compact.
    pub fn find_lca_version_history_index_and_item(
        &self,
        incoming: &VersionHistory,
    ) -> EngineResult<(usize, VersionHistoryItem)> {
        let mut best: Option<(usize, usize, VersionHistoryItem)> = None;

        for (index, local) in self.histories.iter().enumerate() {
            let item = local.find_lca_item(incoming)?;
            let replace = match &best {
                None => true,
                Some((_, best_len, best_item)) => {
                    item.event_id > best_item.event_id
                        || (item.event_id == best_item.event_id && local.items.len() < *best_len)
                }
            };
            if replace {
                best = Some((index, local.items.len(), item));
            }
        }

        let (index, _, item) = best.ok_or_else(|| {
            EngineError::InvalidArgument("version histories is empty".to_string())
        })?;
        Ok((index, item))
    }

    /// First branch containing the given item.
    pub fn find_first_version_history_index_by_item(
        &self,
        item: &VersionHistoryItem,
    ) -> EngineResult<usize> {
        for (index, local) in self.histories.iter().enumerate() {
            if local.contains_item(item) {
                return Ok(index);
            }
        }
        Err(EngineError::InvalidArgument(
            "version histories does not contain the given item".to_string(),
        ))
    }

    /// Whether some branch carries a higher last-event version than the
    /// current branch, i.e. a conflict-resolution rebuild has happened.
    pub fn is_rebuilt(&self) -> EngineResult<bool> {
        let current_last = self.current_version_history()?.last_item()?;
        for history in &self.histories {
            if history.last_item()?.version > current_last.version {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn version_history(&self, branch_index: usize) -> EngineResult<&VersionHistory> {
        self.histories
            .get(branch_index)
            .ok_or_else(|| EngineError::InvalidArgument("invalid branch index".to_string()))
    }

    pub fn version_history_mut(&mut self, branch_index: usize) -> EngineResult<&mut VersionHistory> {
        self.histories
            .get_mut(branch_index)
            .ok_or_else(|| EngineError::InvalidArgument("invalid branch index".to_string()))
    }

    pub fn set_current_version_history_index(&mut self, index: usize) -> EngineResult<()> {
        if index >= self.histories.len() {
            return Err(EngineError::InvalidArgument(
                "invalid current branch index".to_string(),
            ));
        }
        self.current_index = index;
        Ok(())
    }

    pub fn current_version_history_index(&self) -> usize {
        self.current_index
    }

    pub fn current_version_history(&self) -> EngineResult<&VersionHistory> {
        self.version_history(self.current_index)
    }

    pub fn histories(&self) -> &[VersionHistory] {
        &self.histories
    }
}
