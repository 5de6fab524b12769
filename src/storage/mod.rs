//! Storage backends for wordtrace
//!
//! Keywords and the article graph live behind the `KeywordStore` and
//! `GraphStore` traits. `SqliteStore` persists to a single database file;
//! `MemoryStore` keeps everything in process.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ExpiryReport, GraphFilter, GraphStore, KeywordEdge, KeywordStore, OpenStore, StorageError,
    StorageResult,
};

/// A backend that serves both keyword and graph queries
pub trait Store: KeywordStore + GraphStore {}

impl<T: KeywordStore + GraphStore> Store for T {}
