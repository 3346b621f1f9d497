use std::collections::HashMap;

use chrono::Utc;
use serde_json::Map;
use tracing::warn;

use crate::filter::DomainTableFilter;
use crate::types::{Operation, TableChange};
use crate::wal::{ParsedWal, WalRecord};

/// Structured filter-reason histograms so operators can explain missing changes.
#[derive(Debug, Clone, Default)]
pub struct FilterCounters {
    pub invalid_json: u64,
    pub not_tracked: HashMap<String, u64>,
    pub delete_missing_oldkeys: u64,
    pub column_misaligned: u64,
}

impl FilterCounters {
    fn bump_not_tracked(&mut self, table: &str) {
        *self.not_tracked.entry(table.to_string()).or_insert(0) += 1;
    }
}

/// WAL JSON → filtered, typed `TableChange` records.
#[derive(Debug, Clone)]
pub struct ChangeTransformer {
    filter: DomainTableFilter,
}

impl ChangeTransformer {
    pub fn new(filter: DomainTableFilter) -> Self {
        Self { filter }
    }

    /// Transform one WAL record into zero or more `TableChange`s, processing
    /// every entry of `change` (not just the first) and recording why any
    /// entry was discarded.
    pub fn transform(&self, record: &WalRecord, counters: &mut FilterCounters) -> Vec<TableChange> {
        let parsed = match ParsedWal::parse(&record.data) {
            Ok(p) => p,
            Err(e) => {
                counters.invalid_json += 1;
                warn!(event = "replication.transform.invalid_json", error = %e, "discarding WAL record");
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(parsed.change.len());
        for entry in &parsed.change {
            if !self.filter.should_track(&entry.table) {
                counters.bump_not_tracked(&entry.table);
                continue;
            }

            let data = match entry.kind {
                Operation::Delete => {
                    let Some(oldkeys) = &entry.oldkeys else {
                        counters.delete_missing_oldkeys += 1;
                        continue;
                    };
                    if oldkeys.keynames.len() != oldkeys.keyvalues.len() {
                        counters.delete_missing_oldkeys += 1;
                        continue;
                    }
                    zip_columns(&oldkeys.keynames, &oldkeys.keyvalues)
                }
                Operation::Insert | Operation::Update => {
                    if entry.columnnames.len() != entry.columnvalues.len() {
                        counters.column_misaligned += 1;
                        continue;
                    }
                    zip_columns(&entry.columnnames, &entry.columnvalues)
                }
            };

            let updated_at = data
                .get("updated_at")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| Utc::now().to_rfc3339());

            out.push(TableChange {
                table: entry.table.clone(),
                op: entry.kind,
                data,
                lsn: record.lsn,
                updated_at,
            });
        }
        out
    }
}

fn zip_columns(names: &[String], values: &[serde_json::Value]) -> Map<String, serde_json::Value> {
    names
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect::<Map<String, serde_json::Value>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::Lsn;

    fn transformer(tables: &[&str]) -> ChangeTransformer {
        ChangeTransformer::new(DomainTableFilter::new(
            tables.iter().map(|s| s.to_string()),
        ))
    }

    fn record(data: &str) -> WalRecord {
        WalRecord {
            data: data.to_string(),
            lsn: Lsn::parse("0/10A").unwrap(),
            xid: "100".into(),
        }
    }

    #[test]
    fn happy_path_insert() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[{"schema":"public","table":"tasks","kind":"insert","columnnames":["id","title","client_id","updated_at"],"columnvalues":["T1","hello","c-A","2025-01-01T00:00:00Z"]}]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert_eq!(changes.len(), 1);
        let ch = &changes[0];
        assert_eq!(ch.table, "tasks");
        assert!(matches!(ch.op, Operation::Insert));
        assert_eq!(ch.row_id().unwrap().as_str(), Some("T1"));
        assert_eq!(ch.client_id(), Some("c-A"));
        assert_eq!(ch.updated_at, "2025-01-01T00:00:00Z");
    }

    #[test]
    fn untracked_table_is_counted_and_dropped() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[
            {"schema":"public","table":"tasks","kind":"update","columnnames":["id"],"columnvalues":["T1"]},
            {"schema":"public","table":"audit","kind":"insert","columnnames":["id"],"columnvalues":["A1"]}
        ]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].table, "tasks");
        assert_eq!(*counters.not_tracked.get("audit").unwrap(), 1);
    }

    #[test]
    fn delete_requires_oldkeys() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[{"schema":"public","table":"tasks","kind":"delete"}]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert!(changes.is_empty());
        assert_eq!(counters.delete_missing_oldkeys, 1);
    }

    #[test]
    fn delete_with_oldkeys_builds_data_from_keys() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[{"schema":"public","table":"tasks","kind":"delete","oldkeys":{"keynames":["id"],"keyvalues":["T9"]}}]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].row_id().unwrap().as_str(), Some("T9"));
    }

    #[test]
    fn misaligned_columns_are_discarded() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[{"schema":"public","table":"tasks","kind":"insert","columnnames":["id","title"],"columnvalues":["T1"]}]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert!(changes.is_empty());
        assert_eq!(counters.column_misaligned, 1);
    }

    #[test]
    fn invalid_json_is_discarded() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let changes = t.transform(&record("not json"), &mut counters);
        assert!(changes.is_empty());
        assert_eq!(counters.invalid_json, 1);
    }

    #[test]
    fn missing_updated_at_falls_back_to_wall_clock() {
        let t = transformer(&["tasks"]);
        let mut counters = FilterCounters::default();
        let raw = r#"{"change":[{"schema":"public","table":"tasks","kind":"insert","columnnames":["id"],"columnvalues":["T1"]}]}"#;
        let changes = t.transform(&record(raw), &mut counters);
        assert!(!changes[0].updated_at.is_empty());
    }
}
