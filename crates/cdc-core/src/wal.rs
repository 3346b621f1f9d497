use serde::Deserialize;

use crate::lsn::Lsn;
use crate::types::Operation;

/// A single transaction's worth of change data, as handed back by the slot
/// adapter from `pg_logical_slot_peek_changes`/`pg_logical_slot_get_changes`.
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Raw `wal2json`-style JSON payload for this commit.
    pub data: String,
    pub lsn: Lsn,
    /// Transaction id; informational only, never used for ordering.
    pub xid: String,
}

/// The per-row change payload inside a `wal2json` message's `"change"` array.
#[derive(Debug, Clone, Deserialize)]
pub struct WalChangeEntry {
    pub schema: String,
    pub table: String,
    pub kind: Operation,
    #[serde(default)]
    pub columnnames: Vec<String>,
    #[serde(default)]
    pub columnvalues: Vec<serde_json::Value>,
    #[serde(default)]
    pub oldkeys: Option<OldKeys>,
}

/// Primary-key columns and values for a delete (or a replica-identity-full update).
#[derive(Debug, Clone, Deserialize)]
pub struct OldKeys {
    pub keynames: Vec<String>,
    pub keyvalues: Vec<serde_json::Value>,
}

/// The decoded form of a `WalRecord.data` payload: an ordered sequence of
/// per-row changes. Every entry must be processed, not just the first.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedWal {
    #[serde(default)]
    pub change: Vec<WalChangeEntry>,
}

impl ParsedWal {
    /// Parse a raw `wal2json` payload. Returns `MalformedInput` on invalid JSON,
    /// never panics.
    pub fn parse(data: &str) -> Result<Self, crate::error::Error> {
        serde_json::from_str(data)
            .map_err(|e| crate::error::Error::MalformedInput(e.to_string()))
    }
}
