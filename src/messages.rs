//! Wire message types and encoding/decoding utilities.
//!
//! Version histories cross two boundaries in durable form: the workflow
//! execution record and cross-cluster replication payloads. The `proto`
//! module holds the protobuf shapes; the conversion helpers below translate
//! between those and the validated in-memory types. Decoding structurally
//! impossible payloads (no branches, a current index pointing nowhere) is a
//! programmer error upstream and panics here.

use prost::Message;
use thiserror::Error;

use crate::version_history::{VersionHistories, VersionHistory, VersionHistoryItem};

/// Protobuf message shapes for durable storage and replication.
pub mod proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VersionHistoryItem {
        #[prost(int64, tag = "1")]
        pub event_id: i64,
        #[prost(int64, tag = "2")]
        pub version: i64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VersionHistory {
        #[prost(bytes = "vec", tag = "1")]
        pub branch_token: Vec<u8>,
        #[prost(message, repeated, tag = "2")]
        pub items: Vec<VersionHistoryItem>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VersionHistories {
        #[prost(int32, tag = "1")]
        pub current_version_history_index: i32,
        #[prost(message, repeated, tag = "2")]
        pub histories: Vec<VersionHistory>,
    }
}

/// Errors produced while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode a protobuf message to bytes.
pub fn encode_message<M: Message>(msg: &M) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Decode a protobuf message from bytes.
pub fn decode_message<M>(bytes: &[u8]) -> Result<M, MessageError>
where
    M: Message + Default,
{
    M::decode(bytes).map_err(MessageError::from)
}

pub fn version_history_item_to_wire(item: &VersionHistoryItem) -> proto::VersionHistoryItem {
    proto::VersionHistoryItem {
        event_id: item.event_id(),
        version: item.version(),
    }
}

pub fn version_history_item_from_wire(wire: &proto::VersionHistoryItem) -> VersionHistoryItem {
    VersionHistoryItem::new(wire.event_id, wire.version)
}

pub fn version_history_to_wire(history: &VersionHistory) -> proto::VersionHistory {
    proto::VersionHistory {
        branch_token: history.branch_token().to_vec(),
        items: history
            .items()
            .iter()
            .map(version_history_item_to_wire)
            .collect(),
    }
}

pub fn version_history_from_wire(wire: &proto::VersionHistory) -> VersionHistory {
    VersionHistory::new(
        wire.branch_token.clone(),
        wire.items
            .iter()
            .map(version_history_item_from_wire)
            .collect(),
    )
}

pub fn version_histories_to_wire(histories: &VersionHistories) -> proto::VersionHistories {
    proto::VersionHistories {
        current_version_history_index: histories.current_version_history_index() as i32,
        histories: histories
            .histories()
            .iter()
            .map(version_history_to_wire)
            .collect(),
    }
}

/// Rebuild a branch collection from its wire form.
///
/// Panics if the payload carries no branches or a current index that does not
/// agree with the replayed branch bookkeeping; both are impossible for data
/// this engine wrote.
pub fn version_histories_from_wire(wire: &proto::VersionHistories) -> VersionHistories {
    let Some((first, rest)) = wire.histories.split_first() else {
        panic!("version histories cannot be empty");
    };

    let mut histories = VersionHistories::new(version_history_from_wire(first));
    for history in rest {
        if let Err(err) = histories.add_version_history(version_history_from_wire(history)) {
            panic!("unable to initialize version histories: {err}");
        }
    }

    let current_index = wire.current_version_history_index as usize;
    if current_index != histories.current_version_history_index()
        && histories
            .set_current_version_history_index(current_index)
            .is_err()
    {
        panic!("unable to initialize version histories: current index out of range");
    }
    histories
}
