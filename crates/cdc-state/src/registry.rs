use cdc_core::ClientState;

use crate::error::StateResult;

/// `CLIENT_TIMEOUT`, the default used by `list_active`/`has_active` unless a
/// caller overrides it.
pub const DEFAULT_CLIENT_TIMEOUT_MILLIS: i64 = 10 * 60 * 1000;

/// A TTL-aware directory of active clients. Entries are created/refreshed by
/// the external sync endpoint (never by the core) and read by the notifier.
pub trait ClientRegistry: Send + Sync {
    /// Normally called by the external sync endpoint, not by the core's own
    /// polling/notification path; exposed here so the admin surface and
    /// tests can seed/refresh entries.
    fn upsert(&self, client: &ClientState) -> StateResult<()>;

    /// Lists all entries; deletes ones that are inactive or stale; returns
    /// `true` if any remain.
    fn has_active(&self, now_millis: i64, timeout_millis: i64) -> StateResult<bool>;

    /// Pure read plus lazy cleanup of the clearly-stale.
    fn list_active(&self, now_millis: i64, timeout_millis: i64) -> StateResult<Vec<ClientState>>;

    /// Full sweep of stale entries; returns the number removed.
    fn purge(&self, now_millis: i64, timeout_millis: i64) -> StateResult<usize>;
}
