//! Room registry and participant command handling.
//!
//! The registry owns the `code → room` map and the reverse `connection →
//! code` map, and implements every participant command: room lifecycle,
//! editor lifecycle, topic subscriptions, operation routing, host actions
//! and disconnect handling. Responses and broadcasts are sent through the
//! members' channels as part of handling a command; callers only map errors
//! onto the wire.
//!
//! Lock order is always registry maps, then a room's state, then a
//! document topic; no command holds two topic locks at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::document::{Document, DEFAULT_HISTORY_LIMIT};
use crate::error::{DocumentError, RoomError, RoomResult};
use crate::storage::{DebouncedWriter, SnapshotStore, WriteKey};
use ot::Operation;

use super::connection::{ClientHandle, ConnectionId};
use super::message::{EditorInfo, ServerMessage};
use super::room::{generate_room_code, Room};

/// How long an empty room lingers before it is expired.
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(30 * 60);

const DEFAULT_EDITOR_NAME: &str = "main";
const DEFAULT_EDITOR_LANGUAGE: &str = "javascript";

/// Tunables for the registry.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Empty-room time to live.
    pub room_ttl: Duration,
    /// Per-document retained operation count.
    pub history_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            room_ttl: DEFAULT_ROOM_TTL,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Process-wide room registry.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    memberships: RwLock<HashMap<ConnectionId, String>>,
    store: Arc<dyn SnapshotStore>,
    writer: Arc<DebouncedWriter>,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a registry backed by `store`, with writes debounced through
    /// `writer`.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        writer: Arc<DebouncedWriter>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            store,
            writer,
            config,
        }
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether a room is live in memory.
    pub async fn has_room(&self, code: &str) -> bool {
        self.rooms.read().await.contains_key(code)
    }

    /// Create a room with one default editor; the caller becomes its only
    /// member and host.
    pub async fn create_room(
        self: &Arc<Self>,
        handle: &ClientHandle,
        username: String,
        color: String,
    ) -> RoomResult<()> {
        let (code, editors, users) = {
            let mut memberships = self.memberships.write().await;
            if memberships.contains_key(&handle.id) {
                return Err(RoomError::AlreadyInRoom);
            }
            let mut rooms = self.rooms.write().await;
            let code = loop {
                let candidate = generate_room_code();
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            };

            let room = Arc::new(Room::new(code.clone()));
            let (editors, users) = {
                let mut state = room.state.write().await;
                state.add_member(handle.clone(), username, color);
                state.add_editor(
                    DEFAULT_EDITOR_NAME.to_string(),
                    DEFAULT_EDITOR_LANGUAGE.to_string(),
                    self.config.history_limit,
                );
                (state.editor_infos(), state.user_infos())
            };
            rooms.insert(code.clone(), room);
            memberships.insert(handle.id, code.clone());
            (code, editors, users)
        };

        let editor_ids: Vec<u32> = editors.iter().map(|e| e.id).collect();
        let store = Arc::clone(&self.store);
        let room_code = code.clone();
        let init = tokio::task::spawn_blocking(move || store.init_documents(&room_code, &editor_ids))
            .await;
        match init {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(room = %code, error = %e, "failed to init document rows"),
            Err(e) => tracing::warn!(room = %code, error = %e, "document init task failed"),
        }

        tracing::info!(room = %code, host = %handle.id, "room created");
        let _ = handle.send(ServerMessage::RoomCreated {
            room_code: code,
            editors,
            users,
            is_host: true,
        });
        Ok(())
    }

    /// Join an existing room. When the room is not in memory, persisted
    /// documents are loaded so a restarted server picks up where it left
    /// off; the first member back becomes host.
    pub async fn join_room(
        self: &Arc<Self>,
        handle: &ClientHandle,
        username: String,
        color: String,
        code: String,
    ) -> RoomResult<()> {
        if self.memberships.read().await.contains_key(&handle.id) {
            return Err(RoomError::AlreadyInRoom);
        }

        let (editors, users) = loop {
            // The map's read lock is held while the member is added so a
            // concurrent expiry cannot tear the room down underneath us.
            {
                let rooms = self.rooms.read().await;
                if let Some(room) = rooms.get(&code) {
                    let mut state = room.state.write().await;
                    state.cancel_expiry();
                    state.add_member(handle.clone(), username.clone(), color.clone());
                    if let Some(member) = state.members.get(&handle.id) {
                        state.broadcast_except(
                            handle.id,
                            &ServerMessage::UserJoined(member.user_info()),
                        );
                    }
                    break (state.editor_infos(), state.user_infos());
                }
            }
            self.restore_room(&code).await?;
        };

        self.memberships
            .write()
            .await
            .insert(handle.id, code.clone());

        tracing::info!(room = %code, member = %handle.id, "member joined");
        let _ = handle.send(ServerMessage::RoomJoined {
            room_code: code,
            editors,
            users,
        });
        Ok(())
    }

    /// Rebuild a room from persisted rows. Fails with `RoomNotFound` when
    /// nothing is persisted under the code.
    async fn restore_room(&self, code: &str) -> RoomResult<()> {
        let store = Arc::clone(&self.store);
        let room_code = code.to_string();
        let rows = match tokio::task::spawn_blocking(move || store.load_documents(&room_code)).await
        {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                tracing::error!(room = %code, error = %e, "failed to load persisted documents");
                return Err(RoomError::RoomNotFound(code.to_string()));
            }
            Err(e) => {
                tracing::error!(room = %code, error = %e, "document load task failed");
                return Err(RoomError::RoomNotFound(code.to_string()));
            }
        };
        if rows.is_empty() {
            return Err(RoomError::RoomNotFound(code.to_string()));
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Room::new(code.to_string())));
        let mut state = room.state.write().await;
        if state.editors.is_empty() {
            let count = rows.len();
            for row in rows {
                // Editor names and languages are not persisted; restored
                // editors get placeholder metadata.
                state.insert_editor(
                    row.editor_id,
                    format!("document-{}", row.editor_id),
                    "plaintext".to_string(),
                    Document::from_persisted(
                        row.editor_id,
                        row.content,
                        row.revision,
                        self.config.history_limit,
                    ),
                );
            }
            tracing::info!(room = %code, editors = count, "room restored from storage");
        }
        Ok(())
    }

    /// Look up the caller's room.
    async fn room_of(&self, conn: ConnectionId) -> RoomResult<(String, Arc<Room>)> {
        let code = self
            .memberships
            .read()
            .await
            .get(&conn)
            .cloned()
            .ok_or(RoomError::NotInRoom)?;
        let room = self
            .rooms
            .read()
            .await
            .get(&code)
            .cloned()
            .ok_or_else(|| RoomError::RoomNotFound(code.clone()))?;
        Ok((code, room))
    }

    /// Add a new editor to the caller's room and announce it.
    pub async fn add_editor(
        self: &Arc<Self>,
        handle: &ClientHandle,
        name: String,
        language: String,
    ) -> RoomResult<()> {
        let (code, room) = self.room_of(handle.id).await?;
        let id = {
            let mut state = room.state.write().await;
            let (id, _topic) =
                state.add_editor(name.clone(), language.clone(), self.config.history_limit);
            state.broadcast(&ServerMessage::EditorAdded(EditorInfo { id, name, language }));
            id
        };
        // Persist the empty row so a restart before the first edit still
        // restores the editor.
        self.writer
            .schedule(WriteKey::new(code, id), String::new(), 0)
            .await;
        Ok(())
    }

    /// Remove an editor from the caller's room. Removing the last editor is
    /// silently ignored.
    pub async fn remove_editor(self: &Arc<Self>, handle: &ClientHandle, id: u32) -> RoomResult<()> {
        let (code, room) = self.room_of(handle.id).await?;
        {
            let mut state = room.state.write().await;
            if !state.editors.contains_key(&id) {
                return Err(RoomError::EditorNotFound(id));
            }
            if state.editors.len() <= 1 {
                tracing::debug!(room = %code, editor = id, "refusing removal of the last editor");
                return Err(RoomError::LastEditor);
            }
            state.editors.remove(&id);
            for member in state.members.values_mut() {
                if member.current_editor == Some(id) {
                    member.current_editor = None;
                }
            }
            state.broadcast(&ServerMessage::EditorRemoved(id));
        }

        self.writer.cancel(&WriteKey::new(code.clone(), id)).await;
        let store = Arc::clone(&self.store);
        let room_code = code.clone();
        let removed =
            tokio::task::spawn_blocking(move || store.remove_document(&room_code, id)).await;
        match removed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(room = %code, editor = id, error = %e, "failed to delete editor row"),
            Err(e) => tracing::warn!(room = %code, editor = id, error = %e, "editor delete task failed"),
        }
        Ok(())
    }

    /// Subscribe the caller to an editor's topic and send it a snapshot. A
    /// connection sits in at most one topic, so any previous subscription
    /// is dropped first.
    pub async fn join_editor(self: &Arc<Self>, handle: &ClientHandle, id: u32) -> RoomResult<()> {
        let (_code, room) = self.room_of(handle.id).await?;
        let (content, revision) = {
            let mut state = room.state.write().await;
            let topic = state
                .editors
                .get(&id)
                .map(|e| Arc::clone(&e.topic))
                .ok_or(RoomError::EditorNotFound(id))?;

            let previous = match state.members.get_mut(&handle.id) {
                Some(member) => member.current_editor.replace(id),
                None => return Err(RoomError::NotInRoom),
            };
            if let Some(previous_id) = previous {
                if previous_id != id {
                    if let Some(entry) = state.editors.get(&previous_id) {
                        entry.topic.lock().await.unsubscribe(handle.id);
                    }
                }
            }

            let mut topic = topic.lock().await;
            topic.subscribe(handle.clone());
            topic.doc.snapshot()
        };

        let _ = handle.send(ServerMessage::EditorSynced {
            editor_id: id,
            content,
            revision,
        });
        Ok(())
    }

    /// Unsubscribe the caller from an editor's topic.
    pub async fn leave_editor(self: &Arc<Self>, handle: &ClientHandle, id: u32) -> RoomResult<()> {
        let (_code, room) = self.room_of(handle.id).await?;
        let mut state = room.state.write().await;
        let topic = state
            .editors
            .get(&id)
            .map(|e| Arc::clone(&e.topic))
            .ok_or(RoomError::EditorNotFound(id))?;
        topic.lock().await.unsubscribe(handle.id);
        if let Some(member) = state.members.get_mut(&handle.id) {
            if member.current_editor == Some(id) {
                member.current_editor = None;
            }
        }
        Ok(())
    }

    /// Route a client edit to its document, broadcast the applied form to
    /// every subscriber (the author's copy is its ack), and schedule a
    /// debounced snapshot write.
    pub async fn send_operation(
        self: &Arc<Self>,
        handle: &ClientHandle,
        editor_id: u32,
        operation: Operation,
        base_revision: u64,
    ) -> RoomResult<()> {
        let (code, room) = self.room_of(handle.id).await?;
        let topic = {
            let state = room.state.read().await;
            state
                .editors
                .get(&editor_id)
                .map(|e| Arc::clone(&e.topic))
                .ok_or(RoomError::EditorNotFound(editor_id))?
        };

        let mut topic = topic.lock().await;
        match topic.doc.ingest(operation, base_revision) {
            Ok((applied, revision)) => {
                let content = topic.doc.content().to_string();
                // Broadcasting under the topic lock keeps delivery order
                // identical to apply order.
                topic.broadcast(&ServerMessage::ReceiveOperation {
                    editor_id,
                    operation: applied,
                    revision,
                    author_socket_id: handle.id.as_u64(),
                });
                drop(topic);
                self.writer
                    .schedule(WriteKey::new(code, editor_id), content, revision)
                    .await;
                Ok(())
            }
            Err(DocumentError::RevisionTooOld { base, oldest }) => {
                // Too far behind to transform; push a fresh snapshot so the
                // client can re-author its edit.
                tracing::debug!(
                    room = %code,
                    editor = editor_id,
                    base,
                    oldest,
                    "operation predates history, forcing resync"
                );
                let (content, revision) = topic.doc.snapshot();
                drop(topic);
                let _ = handle.send(ServerMessage::EditorSynced {
                    editor_id,
                    content,
                    revision,
                });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send the caller a fresh snapshot of an editor.
    pub async fn request_sync(self: &Arc<Self>, handle: &ClientHandle, id: u32) -> RoomResult<()> {
        let (_code, room) = self.room_of(handle.id).await?;
        let topic = {
            let state = room.state.read().await;
            state
                .editors
                .get(&id)
                .map(|e| Arc::clone(&e.topic))
                .ok_or(RoomError::EditorNotFound(id))?
        };
        let (content, revision) = topic.lock().await.doc.snapshot();
        let _ = handle.send(ServerMessage::EditorSynced {
            editor_id: id,
            content,
            revision,
        });
        Ok(())
    }

    /// Remove another member from the room. Host only.
    pub async fn kick_user(
        self: &Arc<Self>,
        handle: &ClientHandle,
        target_socket_id: u64,
    ) -> RoomResult<()> {
        let (code, room) = self.room_of(handle.id).await?;
        let target = ConnectionId::from(target_socket_id);
        {
            let mut state = room.state.write().await;
            if !state.is_host(handle.id) {
                return Err(RoomError::NotHost);
            }
            if target == handle.id {
                return Err(RoomError::CannotKickHost);
            }
            let member = state
                .remove_member(target)
                .ok_or(RoomError::UserNotFound(target_socket_id))?;
            if let Some(editor_id) = member.current_editor {
                if let Some(entry) = state.editors.get(&editor_id) {
                    entry.topic.lock().await.unsubscribe(target);
                }
            }
            let _ = member.handle.send(ServerMessage::Kicked {
                message: "removed from the room by the host".to_string(),
            });
            state.broadcast(&ServerMessage::UserLeft {
                socket_id: target_socket_id,
            });
        }
        self.memberships.write().await.remove(&target);
        tracing::info!(room = %code, target = target_socket_id, "member kicked");
        Ok(())
    }

    /// Close the room for everyone and delete its persisted rows. Host only.
    pub async fn close_room(self: &Arc<Self>, handle: &ClientHandle) -> RoomResult<()> {
        let (code, room) = self.room_of(handle.id).await?;
        let member_ids = {
            let mut rooms = self.rooms.write().await;
            let mut state = room.state.write().await;
            if !state.is_host(handle.id) {
                return Err(RoomError::NotHost);
            }
            state.broadcast(&ServerMessage::RoomClosed {
                message: "the host closed the room".to_string(),
            });
            state.cancel_expiry();
            let ids: Vec<ConnectionId> = state.members.keys().copied().collect();
            state.members.clear();
            state.host = None;
            rooms.remove(&code);
            ids
        };
        {
            let mut memberships = self.memberships.write().await;
            for id in member_ids {
                memberships.remove(&id);
            }
        }

        self.writer.cancel_room(&code).await;
        self.cleanup_storage(&code).await;
        tracing::info!(room = %code, "room closed by host");
        Ok(())
    }

    /// Handle a dropped connection: leave the room, transfer the host role
    /// if needed, and arm the expiry timer when the room empties.
    pub async fn disconnect(self: &Arc<Self>, conn: ConnectionId) {
        let code = { self.memberships.write().await.remove(&conn) };
        let Some(code) = code else { return };
        let room = { self.rooms.read().await.get(&code).cloned() };
        let Some(room) = room else { return };

        let mut state = room.state.write().await;
        let was_host = state.is_host(conn);
        let Some(member) = state.remove_member(conn) else {
            return;
        };
        if let Some(editor_id) = member.current_editor {
            if let Some(entry) = state.editors.get(&editor_id) {
                entry.topic.lock().await.unsubscribe(conn);
            }
        }

        if was_host {
            if let Some(new_host) = state.oldest_member() {
                state.host = Some(new_host);
                state.broadcast(&ServerMessage::HostTransferred {
                    new_host_id: new_host.as_u64(),
                });
                tracing::info!(room = %code, new_host = %new_host, "host transferred");
            }
        }
        state.broadcast(&ServerMessage::UserLeft {
            socket_id: conn.as_u64(),
        });

        if state.members.is_empty() {
            self.arm_expiry(&mut state, code.clone());
            tracing::debug!(room = %code, "room empty, expiry armed");
        }
    }

    fn arm_expiry(self: &Arc<Self>, state: &mut super::room::RoomState, code: String) {
        state.cancel_expiry();
        let registry = Arc::clone(self);
        let ttl = self.config.room_ttl;
        state.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            registry.expire(&code).await;
        }));
    }

    /// Tear down an expired room and delete its persisted rows.
    async fn expire(self: &Arc<Self>, code: &str) {
        {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get(code).cloned() else {
                return;
            };
            if !room.state.read().await.members.is_empty() {
                // A rejoin won the race; the room lives on.
                return;
            }
            rooms.remove(code);
        }
        self.writer.cancel_room(code).await;
        self.cleanup_storage(code).await;
        tracing::info!(room = %code, "empty room expired");
    }

    async fn cleanup_storage(&self, code: &str) {
        let store = Arc::clone(&self.store);
        let room_code = code.to_string();
        match tokio::task::spawn_blocking(move || store.cleanup_room(&room_code)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(room = %code, error = %e, "failed to delete room rows"),
            Err(e) => tracing::error!(room = %code, error = %e, "room cleanup task failed"),
        }
    }
}
