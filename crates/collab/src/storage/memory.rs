//! In-memory snapshot store.
//!
//! Keeps every row in a map behind an `RwLock`. Used by tests and by
//! deployments that accept losing state on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{PersistedDocument, SnapshotStore, StorageResult};

/// In-memory implementation of [`SnapshotStore`].
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<(String, u32), PersistedDocument>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held.
    pub fn row_count(&self) -> usize {
        self.rows.read().unwrap().len()
    }
}

impl SnapshotStore for MemoryStore {
    fn init_documents(&self, room_code: &str, editor_ids: &[u32]) -> StorageResult<()> {
        let mut rows = self.rows.write().unwrap();
        for &id in editor_ids {
            rows.entry((room_code.to_string(), id))
                .or_insert_with(|| PersistedDocument {
                    editor_id: id,
                    content: String::new(),
                    revision: 0,
                });
        }
        Ok(())
    }

    fn load_documents(&self, room_code: &str) -> StorageResult<Vec<PersistedDocument>> {
        let rows = self.rows.read().unwrap();
        let mut docs: Vec<PersistedDocument> = rows
            .iter()
            .filter(|((code, _), _)| code == room_code)
            .map(|(_, doc)| doc.clone())
            .collect();
        docs.sort_by_key(|d| d.editor_id);
        Ok(docs)
    }

    fn save_document(
        &self,
        room_code: &str,
        editor_id: u32,
        content: &str,
        revision: u64,
    ) -> StorageResult<()> {
        let mut rows = self.rows.write().unwrap();
        let key = (room_code.to_string(), editor_id);
        match rows.get(&key) {
            // A slower write must not clobber a newer persisted revision.
            Some(existing) if existing.revision > revision => {}
            _ => {
                rows.insert(
                    key,
                    PersistedDocument {
                        editor_id,
                        content: content.to_string(),
                        revision,
                    },
                );
            }
        }
        Ok(())
    }

    fn remove_document(&self, room_code: &str, editor_id: u32) -> StorageResult<()> {
        self.rows
            .write()
            .unwrap()
            .remove(&(room_code.to_string(), editor_id));
        Ok(())
    }

    fn cleanup_room(&self, room_code: &str) -> StorageResult<()> {
        self.rows
            .write()
            .unwrap()
            .retain(|(code, _), _| code != room_code);
        Ok(())
    }
}
