//! History event vocabulary inspected by the reset path.
//!
//! Workflow history is an append-only sequence of events, durably encoded as
//! protobuf. This module carries only the event types the reset-and-rebuild
//! subsystem has to understand: decision and activity close events it
//! synthesizes, signals it re-applies, and the continue-as-new terminal event
//! it follows across run boundaries. Every other event type is opaque here.

/// First event ID of any workflow run.
pub const FIRST_EVENT_ID: i64 = 1;

/// Sentinel meaning "no event recorded".
pub const EMPTY_EVENT_ID: i64 = 0;

/// Sentinel event ID for events buffered outside durable history.
pub const TRANSIENT_EVENT_ID: i64 = -23;

/// Identity stamped onto events synthesized by the engine itself.
pub const IDENTITY_HISTORY_SERVICE: &str = "history-service";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Unspecified = 0,
    WorkflowExecutionStarted = 1,
    WorkflowExecutionCompleted = 2,
    WorkflowExecutionFailed = 3,
    WorkflowExecutionTerminated = 4,
    WorkflowExecutionContinuedAsNew = 5,
    WorkflowExecutionSignaled = 6,
    DecisionTaskScheduled = 7,
    DecisionTaskStarted = 8,
    DecisionTaskCompleted = 9,
    DecisionTaskFailed = 10,
    ActivityTaskScheduled = 11,
    ActivityTaskStarted = 12,
    ActivityTaskCompleted = 13,
    ActivityTaskFailed = 14,
}

/// Why a decision task was failed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DecisionTaskFailedCause {
    Unspecified = 0,
    UnhandledDecision = 1,
    ResetWorkflow = 2,
    ForceCloseDecision = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowExecutionSignaledAttributes {
    #[prost(string, tag = "1")]
    pub signal_name: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub input: Option<Vec<u8>>,
    #[prost(string, tag = "3")]
    pub identity: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowExecutionContinuedAsNewAttributes {
    #[prost(string, tag = "1")]
    pub new_execution_run_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowExecutionTerminatedAttributes {
    #[prost(string, tag = "1")]
    pub reason: String,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub details: Option<Vec<u8>>,
    #[prost(string, tag = "3")]
    pub identity: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecisionTaskScheduledAttributes {
    #[prost(int64, tag = "1")]
    pub attempt: i64,
}

/// Close event for a decision that will never complete. For a reset this
/// records the lineage between the abandoned run and its replacement.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecisionTaskFailedAttributes {
    #[prost(int64, tag = "1")]
    pub scheduled_event_id: i64,
    #[prost(int64, tag = "2")]
    pub started_event_id: i64,
    #[prost(enumeration = "DecisionTaskFailedCause", tag = "3")]
    pub cause: i32,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub details: Option<Vec<u8>>,
    #[prost(string, tag = "5")]
    pub identity: String,
    #[prost(string, tag = "6")]
    pub reason: String,
    #[prost(string, tag = "7")]
    pub base_run_id: String,
    #[prost(string, tag = "8")]
    pub new_run_id: String,
    #[prost(int64, tag = "9")]
    pub fork_event_version: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityTaskFailedAttributes {
    #[prost(int64, tag = "1")]
    pub scheduled_event_id: i64,
    #[prost(int64, tag = "2")]
    pub started_event_id: i64,
    #[prost(string, tag = "3")]
    pub reason: String,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub details: Option<Vec<u8>>,
    #[prost(string, tag = "5")]
    pub identity: String,
}

/// One durable workflow history event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryEvent {
    #[prost(int64, tag = "1")]
    pub event_id: i64,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(enumeration = "EventType", tag = "3")]
    pub event_type: i32,
    #[prost(
        oneof = "history_event::Attributes",
        tags = "4, 5, 6, 7, 8, 9"
    )]
    pub attributes: Option<history_event::Attributes>,
}

pub mod history_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Attributes {
        #[prost(message, tag = "4")]
        WorkflowExecutionSignaled(super::WorkflowExecutionSignaledAttributes),
        #[prost(message, tag = "5")]
        WorkflowExecutionContinuedAsNew(super::WorkflowExecutionContinuedAsNewAttributes),
        #[prost(message, tag = "6")]
        WorkflowExecutionTerminated(super::WorkflowExecutionTerminatedAttributes),
        #[prost(message, tag = "7")]
        DecisionTaskScheduled(super::DecisionTaskScheduledAttributes),
        #[prost(message, tag = "8")]
        DecisionTaskFailed(super::DecisionTaskFailedAttributes),
        #[prost(message, tag = "9")]
        ActivityTaskFailed(super::ActivityTaskFailedAttributes),
    }
}

impl HistoryEvent {
    pub fn signaled_attributes(&self) -> Option<&WorkflowExecutionSignaledAttributes> {
        match &self.attributes {
            Some(history_event::Attributes::WorkflowExecutionSignaled(attributes)) => {
                Some(attributes)
            }
            _ => None,
        }
    }

    pub fn continued_as_new_attributes(
        &self,
    ) -> Option<&WorkflowExecutionContinuedAsNewAttributes> {
        match &self.attributes {
            Some(history_event::Attributes::WorkflowExecutionContinuedAsNew(attributes)) => {
                Some(attributes)
            }
            _ => None,
        }
    }
}

/// One contiguous batch of history events, as returned by paged reads.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct History {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<HistoryEvent>,
}

impl History {
    pub fn last_event(&self) -> Option<&HistoryEvent> {
        self.events.last()
    }
}
