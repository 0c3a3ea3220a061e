//! Wire message types for the WebSocket protocol.
//!
//! Every frame is a JSON object `{"event": "...", "data": ...}` carrying one
//! named event. Event names and payload shapes match the editor client; the
//! operation payload format lives in the `ot` crate.

use ot::Operation;
use serde::{Deserialize, Serialize};

/// Editor metadata as sent inside room payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorInfo {
    pub id: u32,
    pub name: String,
    pub language: String,
}

/// Member info as sent inside room payloads and `user_joined`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "socketId")]
    pub socket_id: u64,
    pub username: String,
    pub color: String,
}

/// Events sent from client to server.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a new room and join it as host.
    CreateRoom { username: String, color: String },

    /// Join an existing room by code.
    JoinRoom {
        username: String,
        color: String,
        #[serde(rename = "roomCode")]
        room_code: String,
    },

    /// Add a new editor to the room.
    AddEditor { name: String, language: String },

    /// Remove an editor. Ignored when it is the last one.
    RemoveEditor(u32),

    /// Subscribe to an editor's topic; answered with `editor_synced`.
    JoinEditor(u32),

    /// Unsubscribe from an editor's topic.
    LeaveEditor(u32),

    /// Submit an edit authored against `baseRevision`.
    SendOperation {
        #[serde(rename = "editorId")]
        editor_id: u32,
        operation: Operation,
        #[serde(rename = "baseRevision")]
        base_revision: u64,
    },

    /// Ask for a fresh snapshot of an editor.
    RequestSync(u32),

    /// Remove another member from the room. Host only.
    KickUser {
        #[serde(rename = "targetSocketId")]
        target_socket_id: u64,
    },

    /// Close the room for everyone. Host only.
    CloseRoom,
}

/// Events sent from server to client.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room created; the caller is its host.
    RoomCreated {
        #[serde(rename = "roomCode")]
        room_code: String,
        editors: Vec<EditorInfo>,
        users: Vec<UserInfo>,
        #[serde(rename = "isHost")]
        is_host: bool,
    },

    /// Joined an existing room.
    RoomJoined {
        #[serde(rename = "roomCode")]
        room_code: String,
        editors: Vec<EditorInfo>,
        users: Vec<UserInfo>,
    },

    /// A room-level command failed.
    RoomError { message: String },

    /// Another member joined the room.
    UserJoined(UserInfo),

    /// A member left the room.
    UserLeft {
        #[serde(rename = "socketId")]
        socket_id: u64,
    },

    /// The host left; another member now holds the role.
    HostTransferred {
        #[serde(rename = "newHostId")]
        new_host_id: u64,
    },

    /// The recipient was removed from the room by the host.
    Kicked { message: String },

    /// The host closed the room.
    RoomClosed { message: String },

    /// An editor was added to the room.
    EditorAdded(EditorInfo),

    /// An editor was removed from the room.
    EditorRemoved(u32),

    /// Snapshot of an editor for (re)synchronization.
    EditorSynced {
        #[serde(rename = "editorId")]
        editor_id: u32,
        content: String,
        revision: u64,
    },

    /// A (possibly transformed) operation was applied to an editor.
    /// Subscribers use it to update; the author uses it as the ack.
    ReceiveOperation {
        #[serde(rename = "editorId")]
        editor_id: u32,
        operation: Operation,
        revision: u64,
        #[serde(rename = "authorSocketId")]
        author_socket_id: u64,
    },

    /// An operation was rejected.
    OperationError { message: String },

    /// A sync request failed.
    SyncError { message: String },
}

impl ServerMessage {
    /// Create a `room_error` message.
    pub fn room_error(message: impl Into<String>) -> Self {
        Self::RoomError {
            message: message.into(),
        }
    }

    /// Create an `operation_error` message.
    pub fn operation_error(message: impl Into<String>) -> Self {
        Self::OperationError {
            message: message.into(),
        }
    }

    /// Create a `sync_error` message.
    pub fn sync_error(message: impl Into<String>) -> Self {
        Self::SyncError {
            message: message.into(),
        }
    }

    /// Serialize to a JSON frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_room_deserialization() {
        let json = r##"{"event":"create_room","data":{"username":"alice","color":"#E91E63"}}"##;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        match msg {
            ClientMessage::CreateRoom { username, color } => {
                assert_eq!(username, "alice");
                assert_eq!(color, "#E91E63");
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_join_room_deserialization() {
        let json =
            r##"{"event":"join_room","data":{"username":"bob","color":"#333","roomCode":"QWJ234"}}"##;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        match msg {
            ClientMessage::JoinRoom { room_code, .. } => assert_eq!(room_code, "QWJ234"),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_scalar_payload_deserialization() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"join_editor","data":3}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinEditor(3)));

        let msg: ClientMessage = serde_json::from_str(r#"{"event":"close_room"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::CloseRoom));
    }

    #[test]
    fn test_send_operation_deserialization() {
        let json = r#"{
            "event": "send_operation",
            "data": {
                "editorId": 1,
                "operation": [{"type":"retain","count":2},{"type":"insert","text":"hi"}],
                "baseRevision": 7
            }
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        match msg {
            ClientMessage::SendOperation {
                editor_id,
                operation,
                base_revision,
            } => {
                assert_eq!(editor_id, 1);
                assert_eq!(base_revision, 7);
                assert_eq!(operation, Operation::new().retain(2).insert("hi"));
            }
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn test_receive_operation_serialization() {
        let msg = ServerMessage::ReceiveOperation {
            editor_id: 1,
            operation: Operation::new().insert("x").retain(3),
            revision: 6,
            author_socket_id: 42,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""event":"receive_operation""#));
        assert!(json.contains(r#""editorId":1"#));
        assert!(json.contains(r#""authorSocketId":42"#));
        assert!(json.contains(r#"{"type":"insert","text":"x"}"#));
    }

    #[test]
    fn test_editor_synced_serialization() {
        let msg = ServerMessage::EditorSynced {
            editor_id: 1,
            content: "hello world".to_string(),
            revision: 1,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""event":"editor_synced""#));
        assert!(json.contains(r#""revision":1"#));
    }

    #[test]
    fn test_room_created_serialization() {
        let msg = ServerMessage::RoomCreated {
            room_code: "ABCDEF".to_string(),
            editors: vec![EditorInfo {
                id: 1,
                name: "main".to_string(),
                language: "javascript".to_string(),
            }],
            users: vec![UserInfo {
                socket_id: 1,
                username: "alice".to_string(),
                color: "#E91E63".to_string(),
            }],
            is_host: true,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""event":"room_created""#));
        assert!(json.contains(r#""roomCode":"ABCDEF""#));
        assert!(json.contains(r#""isHost":true"#));
        assert!(json.contains(r#""socketId":1"#));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = serde_json::from_str::<ClientMessage>(r#"{"event":"restart_server"}"#);
        assert!(err.is_err());
    }
}
