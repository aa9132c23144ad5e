//! Transaction-manager and domain-metadata contracts.
//!
//! The transaction manager owns the per-workflow cache: loading a run hands
//! out an exclusive [`Workflow`] lease whose release handle must fire on
//! every exit path. It also answers which run is currently pointed to by a
//! workflow ID and mints storage contexts for runs that do not exist yet.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::state::{ExecutionContext, Workflow};

/// Domain metadata needed to version new history writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntry {
    pub id: String,
    pub name: String,
    /// Failover version stamped onto events written by this cluster.
    pub failover_version: i64,
}

/// Cache over domain metadata, keyed by name.
#[async_trait]
pub trait DomainCache: Send + Sync {
    async fn domain_by_name(&self, name: &str) -> EngineResult<DomainEntry>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Load a workflow run under the per-workflow cache lock.
    ///
    /// The returned lease serialises all writers of `(domain_id, workflow_id)`
    /// and must be released exactly once with the operation's final error.
    async fn load_workflow(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> EngineResult<Workflow>;

    /// Run currently pointed to by the workflow ID, if any.
    async fn current_workflow_run_id(
        &self,
        domain_id: &str,
        workflow_id: &str,
    ) -> EngineResult<Option<String>>;

    /// Mint a storage context for a run that is being created.
    fn new_execution_context(
        &self,
        domain_id: &str,
        workflow_id: &str,
        run_id: &str,
    ) -> Box<dyn ExecutionContext>;
}
