//! Per-document canonical state and the ingest path.
//!
//! A [`Document`] owns the authoritative content, the revision counter, and
//! a bounded log of the most recently applied operations. Clients author
//! edits against whatever revision they last saw; `ingest` transforms stale
//! edits over everything that was applied since, so the operation that is
//! stored and broadcast is always valid against the current content.
//!
//! A document is not internally synchronized. The owner wraps it in a mutex
//! and serializes all mutations; see the room module.

use std::collections::VecDeque;

use ot::{transform, Operation, OtError, Side};

use crate::error::DocumentError;

/// Number of applied operations retained for transforming stale edits.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Canonical state of one editor's text.
#[derive(Debug)]
pub struct Document {
    id: u32,
    content: String,
    revision: u64,
    history: VecDeque<Operation>,
    history_limit: usize,
}

impl Document {
    /// Create an empty document at revision 0.
    pub fn new(id: u32, history_limit: usize) -> Self {
        Self {
            id,
            content: String::new(),
            revision: 0,
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Recreate a document from persisted state. The history starts empty,
    /// so edits against older revisions will force a resync.
    pub fn from_persisted(id: u32, content: String, revision: u64, history_limit: usize) -> Self {
        Self {
            id,
            content,
            revision,
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// The room-scoped editor id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Oldest revision that can still be transformed against the retained
    /// history. Anything older requires a resync.
    pub fn oldest_supported_revision(&self) -> u64 {
        self.revision - self.history.len() as u64
    }

    /// Read-only view of the document: `(content, revision)`.
    pub fn snapshot(&self) -> (String, u64) {
        (self.content.clone(), self.revision)
    }

    /// Replace content and revision wholesale (load from storage). Clears
    /// the history.
    pub fn reset(&mut self, content: String, revision: u64) {
        self.content = content;
        self.revision = revision;
        self.history.clear();
    }

    /// Ingest a client operation authored against `base_revision`.
    ///
    /// If the base revision is current, the operation is validated and
    /// applied as-is. If it is older but still inside the history window,
    /// the operation is transformed over every operation applied since,
    /// then applied. Returns the operation actually applied (possibly
    /// transformed) together with the new revision; that pair is what gets
    /// broadcast to subscribers.
    pub fn ingest(
        &mut self,
        op: Operation,
        base_revision: u64,
    ) -> Result<(Operation, u64), DocumentError> {
        if base_revision > self.revision {
            return Err(DocumentError::FutureRevision {
                base: base_revision,
                current: self.revision,
            });
        }

        let oldest = self.oldest_supported_revision();
        if base_revision < oldest {
            return Err(DocumentError::RevisionTooOld {
                base: base_revision,
                oldest,
            });
        }

        if !op.is_well_formed() {
            return Err(OtError::Malformed("zero-count primitive or empty insert").into());
        }

        // Fold the stale operation over everything applied since its base.
        // The late arrival takes the left side, so on an insert tie it lands
        // after the text that is already in the document.
        let mut op = op.compact();
        let skip = (base_revision - oldest) as usize;
        for applied in self.history.iter().skip(skip) {
            op = transform(&op, applied, Side::Left).map_err(DocumentError::Invalid)?;
        }

        self.content = op.apply(&self.content).map_err(DocumentError::Invalid)?;
        self.revision += 1;
        self.history.push_back(op.clone());
        if self.history.len() > self.history_limit {
            self.history.pop_front();
        }

        Ok((op, self.revision))
    }
}
