//! Belay - reset-and-rebuild core for a distributed workflow execution engine
//!
//! Workflow executions are durably stored as ordered histories of events,
//! replicated across clusters. This crate implements the machinery to branch
//! a new run off an existing one and make it the workflow's current run:
//!
//! ## Version-history algebra
//!
//! - [`VersionHistoryItem`] / [`VersionHistory`] / [`VersionHistories`]:
//!   per-branch mapping from event IDs to cluster failover versions, with
//!   LCA search, containment tests and multi-branch bookkeeping
//!
//! ## Workflow reset
//!
//! - [`WorkflowResetter`]: forks a history branch at a decision boundary,
//!   drives a deterministic state rebuild, synthesizes close events for
//!   in-flight work, re-applies signals from the abandoned tail (following
//!   continue-as-new successors) and persists the new run atomically
//!
//! ## Queues
//!
//! - [`queue`]: persistent FIFO message queues with dense per-queue ID
//!   sequences and per-cluster acknowledgement watermarks

pub mod config;
pub mod error;
pub mod events;
pub mod history_store;
pub mod messages;
pub mod observability;
pub mod pagination;
pub mod queue;
pub mod rebuild;
pub mod resetter;
pub mod state;
pub mod test_support;
pub mod transaction;
pub mod version_history;

// Configuration
pub use config::Config;

// Errors
pub use error::{EngineError, EngineResult};

// Version histories
pub use version_history::{EMPTY_VERSION, VersionHistories, VersionHistory, VersionHistoryItem};

// History events
pub use events::{
    EMPTY_EVENT_ID, EventType, FIRST_EVENT_ID, History, HistoryEvent, IDENTITY_HISTORY_SERVICE,
    TRANSIENT_EVENT_ID,
};

// Workflow reset
pub use resetter::{DEFAULT_RESET_PAGE_SIZE, ResetParams, WorkflowResetter};

// Collaborator contracts
pub use history_store::{HistoryStore, MemoryHistoryStore, paginate_history};
pub use pagination::PagingIterator;
pub use rebuild::StateRebuilder;
pub use state::{ExecutionContext, MutableState, Workflow};
pub use transaction::{DomainCache, DomainEntry, TransactionManager};

// Queues
pub use queue::{MemoryQueue, PostgresQueue, Queue, QueueMessage, QueueType};
