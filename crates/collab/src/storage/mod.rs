//! Durable persistence for document snapshots.
//!
//! This module defines the [`SnapshotStore`] trait that the rest of the
//! server talks to: one row per `(room code, editor id)` holding the latest
//! persisted content and revision. Backends: [`MemoryStore`] for tests and
//! no-persistence deployments, [`SqliteStore`] for durability on disk.
//!
//! Writes are debounced through [`DebouncedWriter`]; ingest never waits on
//! the store. In-memory state is authoritative between writes, so a write
//! that is lost to a crash costs at most the debounce window of typing.

pub mod debounce;
pub mod memory;
pub mod sqlite;

use thiserror::Error;

pub use debounce::{DebouncedWriter, WriteKey};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persisted document row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedDocument {
    pub editor_id: u32,
    pub content: String,
    pub revision: u64,
}

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking task running the storage call was cancelled.
    #[error("storage task cancelled")]
    TaskCancelled,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for snapshot storage backends.
///
/// Methods are synchronous and take `&self`; implementations use interior
/// locking. Async callers run them on the blocking pool.
pub trait SnapshotStore: Send + Sync {
    /// Insert one empty row at revision 0 per editor id, transactionally.
    /// Called at room creation. Existing rows are left untouched.
    fn init_documents(&self, room_code: &str, editor_ids: &[u32]) -> StorageResult<()>;

    /// Load every persisted document of a room, ordered by editor id.
    /// Returns an empty vector for an unknown room.
    fn load_documents(&self, room_code: &str) -> StorageResult<Vec<PersistedDocument>>;

    /// Upsert a document snapshot. Idempotent; a stale write (lower
    /// revision than the persisted row) must not regress the row.
    fn save_document(
        &self,
        room_code: &str,
        editor_id: u32,
        content: &str,
        revision: u64,
    ) -> StorageResult<()>;

    /// Delete one document's row. Called when an editor is removed so a
    /// restart cannot resurrect it.
    fn remove_document(&self, room_code: &str, editor_id: u32) -> StorageResult<()>;

    /// Delete all rows of a room. Called on expiry and room close.
    fn cleanup_room(&self, room_code: &str) -> StorageResult<()>;
}
