pub mod error;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use error::{StateError, StateResult};
pub use registry::{ClientRegistry, DEFAULT_CLIENT_TIMEOUT_MILLIS};
pub use sqlite::SqliteStateStore;
pub use store::StateStore;
