use std::collections::HashSet;

/// The table the history writer itself appends to. Never recursively propagated.
pub const CHANGE_HISTORY_TABLE: &str = "change_history";

/// Decides which tables are tracked. The single source of truth for "is this
/// change worth emitting at all" — transformers must not short-circuit elsewhere.
#[derive(Debug, Clone)]
pub struct DomainTableFilter {
    tracked_tables: HashSet<String>,
}

impl DomainTableFilter {
    pub fn new(tracked_tables: impl IntoIterator<Item = String>) -> Self {
        Self {
            tracked_tables: tracked_tables.into_iter().collect(),
        }
    }

    /// `ShouldTrack(table) = table ≠ "change_history" ∧ table ∈ TrackedTables`.
    pub fn should_track(&self, table: &str) -> bool {
        table != CHANGE_HISTORY_TABLE && self.tracked_tables.contains(table)
    }
}
