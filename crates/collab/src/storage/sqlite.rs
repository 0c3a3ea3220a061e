//! SQLite-backed snapshot store.
//!
//! One table keyed by `(room_code, editor_id)`; the index on `room_code`
//! keeps room cleanup a single indexed delete. The connection runs in WAL
//! mode with a busy timeout so debounced writers and loaders can share it.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{PersistedDocument, SnapshotStore, StorageResult};

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    room_code  TEXT    NOT NULL,
    editor_id  INTEGER NOT NULL,
    content    TEXT    NOT NULL,
    revision   INTEGER NOT NULL,
    updated_at TEXT    NOT NULL,
    PRIMARY KEY (room_code, editor_id)
);
CREATE INDEX IF NOT EXISTS idx_documents_room ON documents (room_code);
";

/// SQLite implementation of [`SnapshotStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::setup(Connection::open(path)?)
    }

    /// Open a private in-memory store. Used by tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::setup(Connection::open_in_memory()?)
    }

    fn setup(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn init_documents(&self, room_code: &str, editor_ids: &[u32]) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO documents (room_code, editor_id, content, revision, updated_at)
                 VALUES (?1, ?2, '', 0, ?3)",
            )?;
            let now = Utc::now().to_rfc3339();
            for &id in editor_ids {
                stmt.execute(params![room_code, id, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_documents(&self, room_code: &str) -> StorageResult<Vec<PersistedDocument>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT editor_id, content, revision FROM documents
             WHERE room_code = ?1 ORDER BY editor_id",
        )?;
        let rows = stmt.query_map(params![room_code], |row| {
            Ok(PersistedDocument {
                editor_id: row.get(0)?,
                content: row.get(1)?,
                revision: row.get::<_, i64>(2)? as u64,
            })
        })?;
        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    fn save_document(
        &self,
        room_code: &str,
        editor_id: u32,
        content: &str,
        revision: u64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        // The WHERE clause keeps a slow stale write from regressing a row
        // that a newer write already reached.
        conn.execute(
            "INSERT INTO documents (room_code, editor_id, content, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (room_code, editor_id) DO UPDATE SET
                 content = excluded.content,
                 revision = excluded.revision,
                 updated_at = excluded.updated_at
             WHERE excluded.revision >= documents.revision",
            params![
                room_code,
                editor_id,
                content,
                revision as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn remove_document(&self, room_code: &str, editor_id: u32) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM documents WHERE room_code = ?1 AND editor_id = ?2",
            params![room_code, editor_id],
        )?;
        Ok(())
    }

    fn cleanup_room(&self, room_code: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM documents WHERE room_code = ?1", params![room_code])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_documents("ROOM01", &[1, 2]).unwrap();

        let docs = store.load_documents("ROOM01").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].editor_id, 1);
        assert_eq!(docs[0].revision, 0);
        assert_eq!(docs[1].editor_id, 2);
    }

    #[test]
    fn test_init_preserves_existing_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_document("ROOM01", 1, "kept", 9).unwrap();
        store.init_documents("ROOM01", &[1]).unwrap();

        let docs = store.load_documents("ROOM01").unwrap();
        assert_eq!(docs[0].content, "kept");
        assert_eq!(docs[0].revision, 9);
    }

    #[test]
    fn test_upsert_and_no_regress() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_document("ROOM01", 1, "v3", 3).unwrap();
        store.save_document("ROOM01", 1, "v5", 5).unwrap();
        store.save_document("ROOM01", 1, "v4", 4).unwrap();

        let docs = store.load_documents("ROOM01").unwrap();
        assert_eq!(docs[0].content, "v5");
        assert_eq!(docs[0].revision, 5);
    }

    #[test]
    fn test_remove_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_documents("ROOM01", &[1, 2]).unwrap();
        store.remove_document("ROOM01", 2).unwrap();

        let docs = store.load_documents("ROOM01").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].editor_id, 1);
    }

    #[test]
    fn test_cleanup_room() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_documents("ROOM01", &[1]).unwrap();
        store.init_documents("ROOM02", &[1]).unwrap();

        store.cleanup_room("ROOM01").unwrap();
        assert!(store.load_documents("ROOM01").unwrap().is_empty());
        assert_eq!(store.load_documents("ROOM02").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_on_disk_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_document("XYZ123", 1, "content", 4).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let docs = store.load_documents("XYZ123").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "content");
        assert_eq!(docs[0].revision, 4);
    }

    #[test]
    fn test_multibyte_content_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_document("ROOM01", 1, "héllo → wörld", 1).unwrap();

        let docs = store.load_documents("ROOM01").unwrap();
        assert_eq!(docs[0].content, "héllo → wörld");
    }
}
