//! Debounced snapshot writes.
//!
//! Every ingest reports the document's latest `(content, revision)` here.
//! Each `(room, editor)` key holds at most one pending write; scheduling a
//! newer snapshot replaces the pending value and restarts the timer, so a
//! burst of typing collapses into a single row write once the document has
//! been quiet for the debounce window.
//!
//! The actual store call runs on the blocking pool. A failed write is
//! logged and rescheduled; it never propagates to the ingest path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{SnapshotStore, StorageError, StorageResult};

/// Identifies one document's pending write.
///
/// Kept as structured fields; room codes and ids are never packed into a
/// delimited string key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WriteKey {
    pub room_code: String,
    pub editor_id: u32,
}

impl WriteKey {
    pub fn new(room_code: impl Into<String>, editor_id: u32) -> Self {
        Self {
            room_code: room_code.into(),
            editor_id,
        }
    }
}

struct PendingWrite {
    content: String,
    revision: u64,
    timer: JoinHandle<()>,
}

type Pending = Arc<Mutex<HashMap<WriteKey, PendingWrite>>>;

/// Debounces snapshot writes to a [`SnapshotStore`].
pub struct DebouncedWriter {
    store: Arc<dyn SnapshotStore>,
    delay: Duration,
    pending: Pending,
}

impl DebouncedWriter {
    /// Create a writer that persists after `delay` of per-document quiet.
    pub fn new(store: Arc<dyn SnapshotStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record the latest snapshot for a document and (re)arm its timer.
    pub async fn schedule(&self, key: WriteKey, content: String, revision: u64) {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&key) {
            previous.timer.abort();
        }
        let timer = spawn_timer(
            Arc::clone(&self.store),
            Arc::clone(&self.pending),
            self.delay,
            key.clone(),
        );
        pending.insert(
            key,
            PendingWrite {
                content,
                revision,
                timer,
            },
        );
    }

    /// Drop the pending write for one document, if any.
    pub async fn cancel(&self, key: &WriteKey) {
        if let Some(write) = self.pending.lock().await.remove(key) {
            write.timer.abort();
        }
    }

    /// Drop every pending write belonging to a room. Used when the room's
    /// rows are about to be deleted anyway.
    pub async fn cancel_room(&self, room_code: &str) {
        let mut pending = self.pending.lock().await;
        pending.retain(|key, write| {
            if key.room_code == room_code {
                write.timer.abort();
                false
            } else {
                true
            }
        });
    }

    /// Execute every pending write now. Called on graceful shutdown.
    pub async fn flush_all(&self) {
        let drained: Vec<(WriteKey, PendingWrite)> = {
            let mut pending = self.pending.lock().await;
            pending.drain().collect()
        };
        for (key, write) in drained {
            write.timer.abort();
            if let Err(e) = run_save(&self.store, &key, write.content, write.revision).await {
                tracing::error!(
                    room = %key.room_code,
                    editor = key.editor_id,
                    error = %e,
                    "failed to flush snapshot on shutdown"
                );
            }
        }
    }

    /// Number of documents with a write pending. Used by tests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

fn spawn_timer(
    store: Arc<dyn SnapshotStore>,
    pending: Pending,
    delay: Duration,
    key: WriteKey,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let write = { pending.lock().await.remove(&key) };
        let Some(write) = write else { return };

        match run_save(&store, &key, write.content.clone(), write.revision).await {
            Ok(()) => {
                tracing::trace!(
                    room = %key.room_code,
                    editor = key.editor_id,
                    revision = write.revision,
                    "snapshot persisted"
                );
            }
            Err(e) => {
                tracing::warn!(
                    room = %key.room_code,
                    editor = key.editor_id,
                    error = %e,
                    "snapshot write failed, retrying"
                );
                let mut guard = pending.lock().await;
                // A newer snapshot may have been scheduled while the save
                // ran; it supersedes this one.
                if !guard.contains_key(&key) {
                    let timer =
                        spawn_timer(Arc::clone(&store), Arc::clone(&pending), delay, key.clone());
                    guard.insert(
                        key,
                        PendingWrite {
                            content: write.content,
                            revision: write.revision,
                            timer,
                        },
                    );
                }
            }
        }
    })
}

async fn run_save(
    store: &Arc<dyn SnapshotStore>,
    key: &WriteKey,
    content: String,
    revision: u64,
) -> StorageResult<()> {
    let store = Arc::clone(store);
    let key = key.clone();
    tokio::task::spawn_blocking(move || {
        store.save_document(&key.room_code, key.editor_id, &content, revision)
    })
    .await
    .map_err(|_| StorageError::TaskCancelled)?
}
