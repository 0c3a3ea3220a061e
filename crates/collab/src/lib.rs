//! Server-authoritative realtime collaborative text editing.
//!
//! Clients connect to a named room over WebSocket and edit a shared set of
//! text documents. The server holds the canonical state of every document,
//! resolves concurrent edits with operational transformation (the `ot`
//! crate), broadcasts applied operations to each document's subscribers,
//! and persists snapshots durably with debounced writes.
//!
//! # Modules
//!
//! - `document`: canonical per-document state, revision log, ingest path
//! - `server`: WebSocket listener, wire messages, rooms and the registry
//! - `storage`: snapshot store trait, SQLite and in-memory backends,
//!   debounced writer
//! - `error`: error types shared across the crate
//!
//! # Example
//!
//! ```ignore
//! use collab::server::{CollaborationServer, ServerConfig};
//! use collab::storage::SqliteStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::with_port(3000);
//!     let store = Arc::new(SqliteStore::open(&config.db_path)?);
//!     CollaborationServer::new(config, store).run().await?;
//!     Ok(())
//! }
//! ```

pub mod document;
pub mod error;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use document::{Document, DEFAULT_HISTORY_LIMIT};
pub use error::{DocumentError, RoomError, RoomResult};
pub use server::connection::{ClientHandle, ConnectionId, SendError};
pub use server::message::{ClientMessage, EditorInfo, ServerMessage, UserInfo};
pub use server::registry::{RegistryConfig, RoomRegistry, DEFAULT_ROOM_TTL};
pub use server::{CollaborationServer, ServerConfig, ServerStats, ShutdownHandle};
pub use storage::{
    DebouncedWriter, MemoryStore, PersistedDocument, SnapshotStore, SqliteStore, StorageError,
    StorageResult, WriteKey,
};
