//! Error types for the collaboration crate.

use ot::OtError;
use thiserror::Error;

use crate::storage::StorageError;

/// Result type alias for room-level operations.
pub type RoomResult<T> = Result<T, RoomError>;

/// Errors surfaced by room and registry commands.
#[derive(Error, Debug)]
pub enum RoomError {
    /// No room exists for the given code.
    #[error("room {0} does not exist")]
    RoomNotFound(String),

    /// The connection issued a room-scoped command before joining a room.
    #[error("not in a room")]
    NotInRoom,

    /// The connection is already a member of a room.
    #[error("already in a room")]
    AlreadyInRoom,

    /// The room has no editor with this id.
    #[error("editor {0} does not exist")]
    EditorNotFound(u32),

    /// A host-only command came from a non-host member.
    #[error("only the host may do that")]
    NotHost,

    /// Refused removal of a room's only remaining editor. Never put on the
    /// wire; the dispatch layer drops it.
    #[error("a room keeps at least one editor")]
    LastEditor,

    /// Kick aimed at a connection that is not a member of the room.
    #[error("user {0} is not in the room")]
    UserNotFound(u64),

    /// The host cannot kick itself.
    #[error("the host cannot be kicked")]
    CannotKickHost,

    /// An operation was rejected by the document store.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// A durable-store operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors produced by a single document's ingest path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The operation's base revision predates the retained history window;
    /// the client must resync from a snapshot.
    #[error("base revision {base} predates retained history (oldest is {oldest})")]
    RevisionTooOld { base: u64, oldest: u64 },

    /// The operation claims a base revision the document has not reached.
    #[error("base revision {base} is ahead of the document (at revision {current})")]
    FutureRevision { base: u64, current: u64 },

    /// The operation itself is malformed or does not span the document.
    #[error(transparent)]
    Invalid(#[from] OtError),
}
