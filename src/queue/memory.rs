//! In-memory queue for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Queue, QueueMessage, QueueType};
use crate::error::EngineResult;

#[derive(Debug, Default)]
struct QueueState {
    messages: BTreeMap<i64, Vec<u8>>,
    next_id: i64,
    ack_levels: HashMap<String, i64>,
}

/// Queue that keeps everything behind one mutex, preserving the same
/// observable contract as the Postgres implementation.
#[derive(Clone)]
pub struct MemoryQueue {
    queue_type: QueueType,
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue_message(&self, payload: Vec<u8>) -> EngineResult<()> {
        let mut state = self.state.lock().expect("queue state poisoned");
        let id = state.next_id;
        state.messages.insert(id, payload);
        state.next_id = id + 1;
        Ok(())
    }

    async fn read_messages(
        &self,
        last_message_id: i64,
        max_count: usize,
    ) -> EngineResult<Vec<QueueMessage>> {
        let state = self.state.lock().expect("queue state poisoned");
        Ok(state
            .messages
            .range(last_message_id + 1..)
            .take(max_count)
            .map(|(id, payload)| QueueMessage {
                queue_type: self.queue_type,
                id: *id,
                payload: payload.clone(),
            })
            .collect())
    }

    async fn delete_messages_before(&self, message_id: i64) -> EngineResult<()> {
        let mut state = self.state.lock().expect("queue state poisoned");
        state.messages = state.messages.split_off(&message_id);
        Ok(())
    }

    async fn update_ack_level(&self, message_id: i64, cluster_name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().expect("queue state poisoned");
        match state.ack_levels.get(cluster_name) {
            Some(existing) if *existing > message_id => {}
            _ => {
                state.ack_levels.insert(cluster_name.to_string(), message_id);
            }
        }
        Ok(())
    }

    async fn get_ack_levels(&self) -> EngineResult<HashMap<String, i64>> {
        let state = self.state.lock().expect("queue state poisoned");
        Ok(state.ack_levels.clone())
    }
}
