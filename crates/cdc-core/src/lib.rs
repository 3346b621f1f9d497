pub mod error;
pub mod filter;
pub mod lsn;
pub mod notify;
pub mod transform;
pub mod types;
pub mod wal;

pub use error::{Error, Result};
pub use filter::{DomainTableFilter, CHANGE_HISTORY_TABLE};
pub use lsn::{compare_lsn, Lsn};
pub use notify::{dispatch, ClientNotifier, DispatchOutcome};
pub use transform::{ChangeTransformer, FilterCounters};
pub use types::{ClientState, Operation, TableChange};
pub use wal::{OldKeys, ParsedWal, WalChangeEntry, WalRecord};
