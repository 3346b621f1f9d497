mod connect;
pub mod error;
pub mod history;
pub mod slot;

pub use error::{PgError, PgResult};
pub use history::{HistoryStore, HistoryWriter, StoreResult};
pub use slot::{PeekHistoryResult, SlotAdapter, SlotConfig, SlotSource, SlotStatus};
