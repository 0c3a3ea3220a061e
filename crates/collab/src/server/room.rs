//! Room state: members, host role, editors and their topics.
//!
//! A room groups members with a set of editors. Each editor's canonical
//! document and its subscriber set live together behind one async mutex
//! (the [`DocumentTopic`]); that mutex is the serialization boundary, so
//! operations on one editor are totally ordered while different editors in
//! the same room advance in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::document::Document;

use super::connection::{ClientHandle, ConnectionId};
use super::message::{EditorInfo, ServerMessage, UserInfo};

/// Room codes are 6 characters from an alphabet without ambiguous glyphs
/// (no I, L, O, 0, 1).
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a random room code. Uniqueness is the registry's problem.
pub fn generate_room_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// A member of a room.
#[derive(Debug)]
pub struct Member {
    pub handle: ClientHandle,
    pub username: String,
    pub color: String,
    /// Monotonic per-room join sequence; host transfer picks the minimum.
    pub join_order: u64,
    /// The editor topic this member is currently subscribed to, if any.
    pub current_editor: Option<u32>,
}

impl Member {
    /// Wire representation of this member.
    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            socket_id: self.handle.id.as_u64(),
            username: self.username.clone(),
            color: self.color.clone(),
        }
    }
}

/// One editor's canonical document plus its subscriber set.
#[derive(Debug)]
pub struct DocumentTopic {
    pub doc: Document,
    subscribers: HashMap<ConnectionId, ClientHandle>,
}

impl DocumentTopic {
    pub fn new(doc: Document) -> Self {
        Self {
            doc,
            subscribers: HashMap::new(),
        }
    }

    /// Add a subscriber; replaces a stale handle for the same connection.
    pub fn subscribe(&mut self, handle: ClientHandle) {
        self.subscribers.insert(handle.id, handle);
    }

    pub fn unsubscribe(&mut self, id: ConnectionId) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send a message to every subscriber of this topic.
    pub fn broadcast(&self, message: &ServerMessage) {
        for handle in self.subscribers.values() {
            if handle.send(message.clone()).is_err() {
                tracing::debug!(connection = %handle.id, "skipping broadcast to closed connection");
            }
        }
    }
}

/// An editor slot in a room: display metadata plus the shared topic.
#[derive(Debug)]
pub struct EditorEntry {
    pub name: String,
    pub language: String,
    pub topic: Arc<Mutex<DocumentTopic>>,
}

/// Mutable state of a room, guarded by the room's lock.
#[derive(Debug)]
pub struct RoomState {
    pub members: HashMap<ConnectionId, Member>,
    pub host: Option<ConnectionId>,
    next_join_order: u64,
    pub editors: BTreeMap<u32, EditorEntry>,
    next_editor_id: u32,
    /// Armed while the room is empty; aborted on rejoin.
    pub expiry: Option<JoinHandle<()>>,
}

impl RoomState {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            host: None,
            next_join_order: 0,
            editors: BTreeMap::new(),
            next_editor_id: 1,
            expiry: None,
        }
    }

    /// Add a member. The first member of an empty room becomes host.
    pub fn add_member(&mut self, handle: ClientHandle, username: String, color: String) {
        let id = handle.id;
        let member = Member {
            handle,
            username,
            color,
            join_order: self.next_join_order,
            current_editor: None,
        };
        self.next_join_order += 1;
        self.members.insert(id, member);
        if self.host.is_none() {
            self.host = Some(id);
        }
    }

    /// Remove a member. Clears the host slot when the host leaves; picking
    /// a successor is the caller's job.
    pub fn remove_member(&mut self, id: ConnectionId) -> Option<Member> {
        let member = self.members.remove(&id)?;
        if self.host == Some(id) {
            self.host = None;
        }
        Some(member)
    }

    /// The remaining member with the earliest join order.
    pub fn oldest_member(&self) -> Option<ConnectionId> {
        self.members
            .values()
            .min_by_key(|m| m.join_order)
            .map(|m| m.handle.id)
    }

    pub fn is_host(&self, id: ConnectionId) -> bool {
        self.host == Some(id)
    }

    /// Allocate the next editor id and create an empty document for it.
    pub fn add_editor(
        &mut self,
        name: String,
        language: String,
        history_limit: usize,
    ) -> (u32, Arc<Mutex<DocumentTopic>>) {
        let id = self.next_editor_id;
        self.next_editor_id += 1;
        let topic = Arc::new(Mutex::new(DocumentTopic::new(Document::new(id, history_limit))));
        self.editors.insert(
            id,
            EditorEntry {
                name,
                language,
                topic: Arc::clone(&topic),
            },
        );
        (id, topic)
    }

    /// Insert an editor restored from storage under its persisted id.
    pub fn insert_editor(&mut self, id: u32, name: String, language: String, doc: Document) {
        self.editors.insert(
            id,
            EditorEntry {
                name,
                language,
                topic: Arc::new(Mutex::new(DocumentTopic::new(doc))),
            },
        );
        if id >= self.next_editor_id {
            self.next_editor_id = id + 1;
        }
    }

    pub fn editor_infos(&self) -> Vec<EditorInfo> {
        self.editors
            .iter()
            .map(|(&id, entry)| EditorInfo {
                id,
                name: entry.name.clone(),
                language: entry.language.clone(),
            })
            .collect()
    }

    pub fn user_infos(&self) -> Vec<UserInfo> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.join_order);
        members.iter().map(|m| m.user_info()).collect()
    }

    /// Send a message to every member of the room.
    pub fn broadcast(&self, message: &ServerMessage) {
        for member in self.members.values() {
            if member.handle.send(message.clone()).is_err() {
                tracing::debug!(connection = %member.handle.id, "skipping broadcast to closed connection");
            }
        }
    }

    /// Send a message to every member except one connection.
    pub fn broadcast_except(&self, except: ConnectionId, message: &ServerMessage) {
        for member in self.members.values() {
            if member.handle.id == except {
                continue;
            }
            if member.handle.send(message.clone()).is_err() {
                tracing::debug!(connection = %member.handle.id, "skipping broadcast to closed connection");
            }
        }
    }

    /// Abort a pending expiry timer, if armed.
    pub fn cancel_expiry(&mut self) {
        if let Some(timer) = self.expiry.take() {
            timer.abort();
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

/// A live room. The code is immutable; everything else sits behind the lock.
#[derive(Debug)]
pub struct Room {
    code: String,
    pub state: RwLock<RoomState>,
}

impl Room {
    pub fn new(code: String) -> Self {
        Self {
            code,
            state: RwLock::new(RoomState::new()),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}
