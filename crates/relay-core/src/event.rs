//! Normalized event schema relayed for a run.
//!
//! An [`Event`] is a typed, timestamped status update. The event type is a
//! small closed set of kinds the relay understands ([`EventType::NodeUpdate`],
//! [`EventType::WorkflowComplete`]) plus [`EventType::Other`] for opaque
//! kinds, so producers can introduce new event types without a relay change.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of characters kept in a `node_update` output field.
pub const MAX_OUTPUT_CHARS: usize = 500;

/// JSON object payload carried by an event.
pub type Payload = Map<String, Value>;

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

/// Kind of an event, as seen on the wire in the `event:` line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Status change of a single workflow node.
    NodeUpdate,
    /// Terminal signal: the workflow has finished and the stream ends.
    WorkflowComplete,
    /// Any other event kind, relayed verbatim.
    Other(String),
}

impl EventType {
    pub const NODE_UPDATE: &str = "node_update";
    pub const WORKFLOW_COMPLETE: &str = "workflow_complete";

    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeUpdate => Self::NODE_UPDATE,
            Self::WorkflowComplete => Self::WORKFLOW_COMPLETE,
            Self::Other(name) => name,
        }
    }

    /// Whether delivering this event ends the subscriber's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowComplete)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            Self::NODE_UPDATE => Self::NodeUpdate,
            Self::WORKFLOW_COMPLETE => Self::WorkflowComplete,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            Self::NODE_UPDATE => Self::NodeUpdate,
            Self::WORKFLOW_COMPLETE => Self::WorkflowComplete,
            _ => Self::Other(s),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// node_update payload
// ---------------------------------------------------------------------------

/// Execution status reported in a `node_update` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Typed payload of a `node_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: String,
}

impl NodeUpdate {
    /// Build an update stamped with the current time. `output` is truncated
    /// to [`MAX_OUTPUT_CHARS`] characters.
    pub fn new(node: impl Into<String>, status: NodeStatus, output: Option<String>) -> Self {
        Self {
            node: node.into(),
            status,
            output: output.map(|o| truncate_output(&o, MAX_OUTPUT_CHARS)),
            timestamp: format_timestamp(Utc::now()),
        }
    }

    /// Convert into an object payload.
    pub fn into_payload(self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct with named fields always serializes to an object.
            _ => Payload::new(),
        }
    }
}

/// Truncate `s` to at most `max_chars` characters (not bytes).
pub fn truncate_output(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Render a UTC instant as RFC 3339 with microseconds and a trailing `Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A status update accepted for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(event_type: impl Into<EventType>, payload: Payload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    pub fn timestamp_string(&self) -> String {
        format_timestamp(self.timestamp)
    }

    /// Decode the typed payload of a `node_update` event.
    ///
    /// Returns `None` for other event types or when the payload does not
    /// match the `node_update` shape.
    pub fn as_node_update(&self) -> Option<NodeUpdate> {
        if self.event_type != EventType::NodeUpdate {
            return None;
        }
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }

    /// JSON encoding of the payload, as sent on the `data:` line.
    pub fn payload_json(&self) -> String {
        // Serializing a `Map<String, Value>` cannot fail.
        serde_json::to_string(&self.payload).unwrap_or_else(|_| "{}".to_string())
    }
}
