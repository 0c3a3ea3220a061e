//! Operation type and the pure functions over it.
//!
//! An [`Operation`] is an ordered sequence of [`Prim`] values that spans an
//! entire document: retains copy code points, inserts add new text, deletes
//! drop code points. The sum of retained and deleted counts must equal the
//! length of the document the operation was authored against.
//!
//! Operations are value types. The builder methods keep them in canonical
//! form (no zero-count primitives, no two adjacent primitives of the same
//! kind), so an operation is uniquely determined by its observable effect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for OT operations.
pub type OtResult<T> = Result<T, OtError>;

/// Errors produced by applying or transforming operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The operation does not span the document it is being applied to.
    #[error("operation spans {op_len} code points but the document has {doc_len}")]
    LengthMismatch { op_len: usize, doc_len: usize },

    /// The operation contains a zero-count primitive or an empty insert.
    #[error("malformed operation: {0}")]
    Malformed(&'static str),

    /// Two operations handed to `transform` were not authored against the
    /// same document state.
    #[error("operations are not based on the same document state")]
    BaseMismatch,
}

/// A single edit primitive.
///
/// Serializes to the wire format used by clients:
/// `{"type":"retain","count":N}`, `{"type":"insert","text":"…"}`,
/// `{"type":"delete","count":N}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Prim {
    /// Advance the cursor `count` code points without changing them.
    Retain { count: usize },
    /// Insert `text` at the cursor.
    Insert { text: String },
    /// Remove `count` code points starting at the cursor.
    Delete { count: usize },
}

/// An ordered sequence of primitives describing one edit.
///
/// On the wire an operation is a bare JSON array of primitives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operation {
    prims: Vec<Prim>,
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

impl Operation {
    /// Create an empty operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity operation for a document of `len` code points.
    pub fn identity(len: usize) -> Self {
        Self::new().retain(len)
    }

    /// The primitives in order.
    pub fn prims(&self) -> &[Prim] {
        &self.prims
    }

    /// Append a retain, merging with a trailing retain. Zero is a no-op.
    pub fn retain(mut self, count: usize) -> Self {
        self.add_retain(count);
        self
    }

    /// Append an insert, merging with a trailing insert. Empty is a no-op.
    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.add_insert(text.into());
        self
    }

    /// Append a delete, merging with a trailing delete. Zero is a no-op.
    pub fn delete(mut self, count: usize) -> Self {
        self.add_delete(count);
        self
    }

    pub(crate) fn add_retain(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(Prim::Retain { count: last }) = self.prims.last_mut() {
            *last += count;
        } else {
            self.prims.push(Prim::Retain { count });
        }
    }

    pub(crate) fn add_insert(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if let Some(Prim::Insert { text: last }) = self.prims.last_mut() {
            last.push_str(&text);
        } else {
            self.prims.push(Prim::Insert { text });
        }
    }

    pub(crate) fn add_delete(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(Prim::Delete { count: last }) = self.prims.last_mut() {
            *last += count;
        } else {
            self.prims.push(Prim::Delete { count });
        }
    }

    /// Length of the document this operation must be applied to,
    /// in code points.
    pub fn base_len(&self) -> usize {
        self.prims
            .iter()
            .map(|p| match p {
                Prim::Retain { count } | Prim::Delete { count } => *count,
                Prim::Insert { .. } => 0,
            })
            .sum()
    }

    /// Length of the document after this operation is applied,
    /// in code points.
    pub fn target_len(&self) -> usize {
        self.prims
            .iter()
            .map(|p| match p {
                Prim::Retain { count } => *count,
                Prim::Insert { text } => char_len(text),
                Prim::Delete { .. } => 0,
            })
            .sum()
    }

    /// True when applying the operation leaves any document unchanged.
    pub fn is_identity(&self) -> bool {
        self.prims
            .iter()
            .all(|p| matches!(p, Prim::Retain { .. }))
    }

    /// True when every count is at least one and every insert is non-empty.
    pub fn is_well_formed(&self) -> bool {
        self.prims.iter().all(|p| match p {
            Prim::Retain { count } | Prim::Delete { count } => *count >= 1,
            Prim::Insert { text } => !text.is_empty(),
        })
    }

    /// True iff the operation is well formed and spans exactly `base_len`
    /// code points.
    pub fn validate(&self, base_len: usize) -> bool {
        self.is_well_formed() && self.base_len() == base_len
    }

    /// Normalize to canonical form: merge adjacent same-kind primitives and
    /// drop zero-count retains/deletes and empty inserts. Idempotent.
    pub fn compact(self) -> Self {
        let mut out = Operation::new();
        for prim in self.prims {
            match prim {
                Prim::Retain { count } => out.add_retain(count),
                Prim::Insert { text } => out.add_insert(text),
                Prim::Delete { count } => out.add_delete(count),
            }
        }
        out
    }

    /// Apply the operation to `content`, producing the edited document.
    ///
    /// Offsets are in code points. Fails when the operation does not span
    /// `content` exactly.
    pub fn apply(&self, content: &str) -> OtResult<String> {
        let doc_len = char_len(content);
        let op_len = self.base_len();
        if op_len != doc_len {
            return Err(OtError::LengthMismatch { op_len, doc_len });
        }

        let mut chars = content.chars();
        let mut out = String::with_capacity(content.len());
        for prim in &self.prims {
            match prim {
                Prim::Retain { count } => out.extend(chars.by_ref().take(*count)),
                Prim::Insert { text } => out.push_str(text),
                Prim::Delete { count } => {
                    for _ in 0..*count {
                        chars.next();
                    }
                }
            }
        }
        Ok(out)
    }
}
