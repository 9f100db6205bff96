pub mod error;
pub mod registry;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use registry::CrewRegistry;
pub use sqlite::SqliteStore;
pub use store::{KvStore, MemoryStore};
