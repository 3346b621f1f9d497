use thiserror::Error;

/// Errors surfaced by the Postgres-facing adapters (slot, history writer).
#[derive(Debug, Error)]
pub enum PgError {
    /// Connection setup or query failure against the slot. Recoverable: the
    /// poller logs and continues to the next tick.
    #[error("slot unavailable: {0}")]
    SlotUnavailable(String),

    /// The slot is in use by another consumer ("... is active for PID ...").
    /// Callers must treat this as a no-op for the current cycle, not an error.
    #[error("slot busy: {0}")]
    SlotBusy(String),

    #[error("replication slot '{0}' does not exist")]
    SlotNotFound(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("history write failed: {0}")]
    HistoryWriteFailed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),
}

impl PgError {
    /// `true` for the `SlotBusy` kind, which callers must treat as a no-op.
    pub fn is_slot_busy(&self) -> bool {
        matches!(self, PgError::SlotBusy(_))
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            if db_err.message().contains("is active for PID") {
                PgError::SlotBusy(msg)
            } else {
                PgError::SlotUnavailable(msg)
            }
        } else {
            PgError::SlotUnavailable(e.to_string())
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_slot_busy() {
        assert!(PgError::SlotBusy("x".into()).is_slot_busy());
        assert!(!PgError::SlotUnavailable("x".into()).is_slot_busy());
    }
}
