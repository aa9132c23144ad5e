//! Persistent FIFO message queues with per-cluster acknowledgement levels.
//!
//! Each queue type owns one dense, monotonically increasing message ID
//! sequence starting at 0. That density must hold under concurrent
//! producers, which pins the enqueue path to a serializable transaction
//! locking the queue tail. Consumers in each cluster track the highest
//! contiguously processed message through an ack-level watermark that never
//! moves backwards.

mod memory;
mod migrations;
mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

pub use memory::MemoryQueue;
pub use migrations::run_migrations;
pub use postgres::PostgresQueue;

/// Which logical queue a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum QueueType {
    /// Cross-cluster replication tasks.
    Replication = 1,
    /// Replication tasks that exhausted their delivery attempts.
    ReplicationDlq = 2,
}

/// One stored queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub queue_type: QueueType,
    pub id: i64,
    pub payload: Vec<u8>,
}

/// A persistent FIFO message queue bound to one [`QueueType`].
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append a message at the tail of the queue.
    ///
    /// Message IDs are dense and strictly increasing even under concurrent
    /// producers.
    async fn enqueue_message(&self, payload: Vec<u8>) -> EngineResult<()>;

    /// Read up to `max_count` messages with ID greater than
    /// `last_message_id`, in ascending ID order.
    async fn read_messages(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> EngineResult<Vec<QueueMessage>>;

    /// Delete all messages with ID strictly below `message_id`. Idempotent.
    async fn delete_messages_before(&self, message_id: i64) -> EngineResult<()>;

    /// Record that `cluster_name` has processed everything up to
    /// `message_id`. Regressions are ignored so the watermark only moves
    /// forward.
    async fn update_ack_level(&self, message_id: i64, cluster_name: &str) -> EngineResult<()>;

    /// Current ack level per cluster.
    async fn get_ack_levels(&self) -> EngineResult<HashMap<String, i64>>;
}
