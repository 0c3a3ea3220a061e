//! Integration tests for the collaboration service.
//!
//! These tests drive the room registry the way the WebSocket adapter does:
//! each simulated client is a `ClientHandle` over an unbounded channel, and
//! assertions read the exact messages a real socket would carry. Scenarios
//! cover late-joiner sync, concurrent-edit convergence, restart recovery
//! through the snapshot store, host transfer, and forced resynchronization.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use collab::{
    ClientHandle, DebouncedWriter, MemoryStore, RegistryConfig, RoomRegistry, ServerMessage,
    SnapshotStore, SqliteStore, DEFAULT_ROOM_TTL,
};
use ot::Operation;

type Rx = mpsc::UnboundedReceiver<ServerMessage>;

fn client() -> (ClientHandle, Rx) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientHandle::open(tx), rx)
}

fn registry_over(store: Arc<dyn SnapshotStore>, config: RegistryConfig) -> Arc<RoomRegistry> {
    let writer = Arc::new(DebouncedWriter::new(
        Arc::clone(&store),
        Duration::from_millis(20),
    ));
    Arc::new(RoomRegistry::new(store, writer, config))
}

fn drain(rx: &mut Rx) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn room_code(rx: &mut Rx) -> String {
    match rx.try_recv().expect("expected room_created") {
        ServerMessage::RoomCreated { room_code, .. } => room_code,
        other => panic!("expected room_created, got {other:?}"),
    }
}

fn synced(rx: &mut Rx) -> (String, u64) {
    match rx.try_recv().expect("expected editor_synced") {
        ServerMessage::EditorSynced {
            content, revision, ..
        } => (content, revision),
        other => panic!("expected editor_synced, got {other:?}"),
    }
}

#[tokio::test]
async fn late_joiner_receives_current_content() {
    let registry = registry_over(Arc::new(MemoryStore::new()), RegistryConfig::default());
    let (a, mut a_rx) = client();

    registry
        .create_room(&a, "alice".into(), "#E91E63".into())
        .await
        .unwrap();
    let code = room_code(&mut a_rx);

    registry.join_editor(&a, 1).await.unwrap();
    assert_eq!(synced(&mut a_rx), (String::new(), 0));

    registry
        .send_operation(&a, 1, Operation::new().insert("hello world"), 0)
        .await
        .unwrap();
    drain(&mut a_rx);

    // B joins the room afterwards and subscribes to editor 1.
    let (b, mut b_rx) = client();
    registry
        .join_room(&b, "bob".into(), "#2196F3".into(), code)
        .await
        .unwrap();
    drain(&mut b_rx);

    registry.join_editor(&b, 1).await.unwrap();
    assert_eq!(synced(&mut b_rx), ("hello world".to_string(), 1));
}

#[tokio::test]
async fn same_position_inserts_tie_break_deterministically() {
    let registry = registry_over(Arc::new(MemoryStore::new()), RegistryConfig::default());
    let (a, mut a_rx) = client();
    let (b, mut b_rx) = client();

    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let code = room_code(&mut a_rx);
    registry
        .join_room(&b, "bob".into(), "#222".into(), code)
        .await
        .unwrap();
    registry.join_editor(&a, 1).await.unwrap();
    registry.join_editor(&b, 1).await.unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    // Seed "abc"; both then author an insert at position 0 against the
    // same revision. A's operation arrives first.
    registry
        .send_operation(&a, 1, Operation::new().insert("abc"), 0)
        .await
        .unwrap();
    let base = 1;
    registry
        .send_operation(&a, 1, Operation::new().insert("x").retain(3), base)
        .await
        .unwrap();
    registry
        .send_operation(&b, 1, Operation::new().insert("y").retain(3), base)
        .await
        .unwrap();

    // Every subscriber sees the same operation stream: A's insert applied
    // verbatim at revision 2, B's insert transformed past it at revision 3.
    for rx in [&mut a_rx, &mut b_rx] {
        let msgs = drain(rx);
        assert_eq!(msgs.len(), 3);
        match &msgs[1] {
            ServerMessage::ReceiveOperation {
                operation,
                revision,
                author_socket_id,
                ..
            } => {
                assert_eq!(*revision, 2);
                assert_eq!(*author_socket_id, a.id.as_u64());
                assert_eq!(*operation, Operation::new().insert("x").retain(3));
            }
            other => panic!("expected receive_operation, got {other:?}"),
        }
        match &msgs[2] {
            ServerMessage::ReceiveOperation {
                operation,
                revision,
                author_socket_id,
                ..
            } => {
                assert_eq!(*revision, 3);
                assert_eq!(*author_socket_id, b.id.as_u64());
                assert_eq!(*operation, Operation::new().retain(1).insert("y").retain(3));
            }
            other => panic!("expected receive_operation, got {other:?}"),
        }
    }

    registry.request_sync(&a, 1).await.unwrap();
    assert_eq!(synced(&mut a_rx), ("xyabc".to_string(), 3));
}

#[tokio::test]
async fn overlapping_deletes_converge() {
    let registry = registry_over(Arc::new(MemoryStore::new()), RegistryConfig::default());
    let (a, mut a_rx) = client();
    let (b, mut b_rx) = client();

    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let code = room_code(&mut a_rx);
    registry
        .join_room(&b, "bob".into(), "#222".into(), code)
        .await
        .unwrap();
    registry.join_editor(&a, 1).await.unwrap();
    registry.join_editor(&b, 1).await.unwrap();
    drain(&mut a_rx);
    drain(&mut b_rx);

    registry
        .send_operation(&a, 1, Operation::new().insert("hello world"), 0)
        .await
        .unwrap();
    let base = 1;

    // A deletes "hello", B concurrently deletes "ello w".
    registry
        .send_operation(&a, 1, Operation::new().delete(5).retain(6), base)
        .await
        .unwrap();
    registry
        .send_operation(&b, 1, Operation::new().retain(1).delete(6).retain(4), base)
        .await
        .unwrap();

    registry.request_sync(&b, 1).await.unwrap();
    let msgs = drain(&mut b_rx);
    match msgs.last().unwrap() {
        ServerMessage::EditorSynced {
            content, revision, ..
        } => {
            assert_eq!(content, "orld");
            assert_eq!(*revision, 3);
        }
        other => panic!("expected editor_synced, got {other:?}"),
    }
}

#[tokio::test]
async fn restart_recovery_from_persisted_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> =
        Arc::new(SqliteStore::open(dir.path().join("snapshots.db")).unwrap());
    let writer = Arc::new(DebouncedWriter::new(
        Arc::clone(&store),
        Duration::from_millis(10),
    ));
    let registry = Arc::new(RoomRegistry::new(
        Arc::clone(&store),
        Arc::clone(&writer),
        RegistryConfig::default(),
    ));

    // Session one: create a room, type some content, let the debounced
    // write land.
    let (a, mut a_rx) = client();
    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let code = room_code(&mut a_rx);
    for (base, op) in [
        Operation::new().insert("con"),
        Operation::new().retain(3).insert("tent"),
    ]
    .into_iter()
    .enumerate()
    {
        registry
            .send_operation(&a, 1, op, base as u64)
            .await
            .unwrap();
    }
    writer.flush_all().await;

    // "Restart": a fresh registry over the same database file.
    let store2: Arc<dyn SnapshotStore> =
        Arc::new(SqliteStore::open(dir.path().join("snapshots.db")).unwrap());
    let registry2 = registry_over(store2, RegistryConfig::default());

    let (back, mut back_rx) = client();
    registry2
        .join_room(&back, "alice".into(), "#111".into(), code.clone())
        .await
        .unwrap();
    match back_rx.try_recv().unwrap() {
        ServerMessage::RoomJoined {
            room_code, editors, ..
        } => {
            assert_eq!(room_code, code);
            assert_eq!(editors.len(), 1);
            assert_eq!(editors[0].id, 1);
        }
        other => panic!("expected room_joined, got {other:?}"),
    }

    registry2.join_editor(&back, 1).await.unwrap();
    assert_eq!(synced(&mut back_rx), ("content".to_string(), 2));
}

#[tokio::test]
async fn host_transfer_then_new_host_closes_room() {
    let registry = registry_over(Arc::new(MemoryStore::new()), RegistryConfig::default());
    let (h, mut h_rx) = client();
    let (m1, mut m1_rx) = client();
    let (m2, mut m2_rx) = client();

    registry
        .create_room(&h, "host".into(), "#111".into())
        .await
        .unwrap();
    let code = room_code(&mut h_rx);
    registry
        .join_room(&m1, "m1".into(), "#222".into(), code.clone())
        .await
        .unwrap();
    registry
        .join_room(&m2, "m2".into(), "#333".into(), code.clone())
        .await
        .unwrap();
    drain(&mut m1_rx);
    drain(&mut m2_rx);

    registry.disconnect(h.id).await;

    for rx in [&mut m1_rx, &mut m2_rx] {
        let msgs = drain(rx);
        assert!(
            matches!(msgs[0], ServerMessage::HostTransferred { new_host_id } if new_host_id == m1.id.as_u64())
        );
        assert!(
            matches!(msgs[1], ServerMessage::UserLeft { socket_id } if socket_id == h.id.as_u64())
        );
    }

    // The transferred role carries host privileges.
    registry.close_room(&m1).await.unwrap();
    let msgs = drain(&mut m2_rx);
    assert!(matches!(msgs[0], ServerMessage::RoomClosed { .. }));
    assert_eq!(registry.room_count().await, 0);
}

#[tokio::test]
async fn stale_operation_beyond_history_gets_forced_resync() {
    let registry = registry_over(
        Arc::new(MemoryStore::new()),
        RegistryConfig {
            room_ttl: DEFAULT_ROOM_TTL,
            history_limit: 4,
        },
    );
    let (a, mut a_rx) = client();
    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let _ = room_code(&mut a_rx);

    for base in 0..10u64 {
        registry
            .send_operation(
                &a,
                1,
                Operation::new().retain(base as usize).insert("x"),
                base,
            )
            .await
            .unwrap();
    }

    // Base 2 fell out of the 4-operation window long ago. The server must
    // answer with a snapshot instead of an error.
    registry
        .send_operation(&a, 1, Operation::new().retain(2).insert("!"), 2)
        .await
        .unwrap();
    assert_eq!(synced(&mut a_rx), ("x".repeat(10), 10));

    // Re-authoring against the snapshot revision works.
    registry
        .send_operation(&a, 1, Operation::new().retain(10).insert("!"), 10)
        .await
        .unwrap();
    registry.request_sync(&a, 1).await.unwrap();
    let msgs = drain(&mut a_rx);
    match msgs.last().unwrap() {
        ServerMessage::EditorSynced {
            content, revision, ..
        } => {
            assert_eq!(content, &format!("{}!", "x".repeat(10)));
            assert_eq!(*revision, 11);
        }
        other => panic!("expected editor_synced, got {other:?}"),
    }
}

#[tokio::test]
async fn debounced_writes_persist_the_latest_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let writer = Arc::new(DebouncedWriter::new(
        store.clone() as Arc<dyn SnapshotStore>,
        Duration::from_millis(30),
    ));
    let registry = Arc::new(RoomRegistry::new(
        store.clone() as Arc<dyn SnapshotStore>,
        writer,
        RegistryConfig::default(),
    ));

    let (a, mut a_rx) = client();
    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let code = room_code(&mut a_rx);

    // A quick burst of edits: the store should end up with exactly the
    // final content once the debounce window passes.
    for (base, text) in ["a", "b", "c"].iter().enumerate() {
        registry
            .send_operation(
                &a,
                1,
                Operation::new().retain(base).insert(*text),
                base as u64,
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(120)).await;
    let rows = store.load_documents(&code).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "abc");
    assert_eq!(rows[0].revision, 3);
}

#[tokio::test]
async fn editors_advance_independently() {
    let registry = registry_over(Arc::new(MemoryStore::new()), RegistryConfig::default());
    let (a, mut a_rx) = client();

    registry
        .create_room(&a, "alice".into(), "#111".into())
        .await
        .unwrap();
    let _ = room_code(&mut a_rx);
    registry
        .add_editor(&a, "notes".into(), "markdown".into())
        .await
        .unwrap();
    drain(&mut a_rx);

    registry
        .send_operation(&a, 1, Operation::new().insert("first"), 0)
        .await
        .unwrap();
    registry
        .send_operation(&a, 2, Operation::new().insert("second"), 0)
        .await
        .unwrap();

    registry.request_sync(&a, 1).await.unwrap();
    assert_eq!(synced(&mut a_rx), ("first".to_string(), 1));
    registry.request_sync(&a, 2).await.unwrap();
    assert_eq!(synced(&mut a_rx), ("second".to_string(), 1));
}
