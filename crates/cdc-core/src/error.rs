use thiserror::Error;

/// Errors surfaced by the core pipeline (parsing, filtering, transform, notify).
///
/// All of these are recovered locally by callers (the poller bumps a filter
/// counter and moves on); nothing here is meant to abort the process.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed LSN '{0}': expected HEX/HEX")]
    MalformedLsn(String),

    #[error("malformed WAL payload: {0}")]
    MalformedInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
