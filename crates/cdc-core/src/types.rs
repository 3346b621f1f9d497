use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::lsn::Lsn;

/// The kind of row-level change a WAL entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// The normalized, transport-ready record produced from a single WAL row.
///
/// Emitted by the change transformer, persisted once to `change_history`,
/// and fanned out to clients; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableChange {
    pub table: String,
    pub op: Operation,
    pub data: Map<String, JsonValue>,
    pub lsn: Lsn,
    pub updated_at: String,
}

impl TableChange {
    /// The client that authored this change, if `data.client_id` is a string.
    /// Absent means "no origin": the change is delivered to every active client.
    pub fn client_id(&self) -> Option<&str> {
        self.data.get("client_id").and_then(JsonValue::as_str)
    }

    /// `data.id`, used as part of the history table's idempotency key when present.
    pub fn row_id(&self) -> Option<&JsonValue> {
        self.data.get("id")
    }
}

/// A client known to the registry: created/refreshed by the external sync
/// endpoint, read by the notifier, purged on staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: String,
    pub active: bool,
    /// Milliseconds since the Unix epoch.
    pub last_seen_millis: i64,
}

impl ClientState {
    pub fn is_stale(&self, now_millis: i64, timeout_millis: i64) -> bool {
        now_millis.saturating_sub(self.last_seen_millis) > timeout_millis
    }
}
