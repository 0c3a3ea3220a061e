//! WebSocket collaboration server.
//!
//! Accepts WebSocket connections, decodes JSON event frames, and routes
//! them to the room registry. Each connection runs in its own task with an
//! unbounded outgoing channel drained by a forwarder task, so fan-out never
//! blocks on a slow socket.
//!
//! Construction order at startup: snapshot store, then the debounced
//! writer around it, then the registry wired to both; `run()` owns the
//! accept loop and flushes pending writes on shutdown.

pub mod connection;
pub mod message;
pub mod registry;
pub mod room;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::document::DEFAULT_HISTORY_LIMIT;
use crate::error::{RoomError, RoomResult};
use crate::storage::{DebouncedWriter, SnapshotStore};

use connection::ClientHandle;
use message::{ClientMessage, ServerMessage};
use registry::{RegistryConfig, RoomRegistry, DEFAULT_ROOM_TTL};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum total connections.
    pub max_total_connections: usize,
    /// Empty-room time to live.
    pub room_ttl: Duration,
    /// Quiet window before a document snapshot is persisted.
    pub write_debounce: Duration,
    /// Retained operations per document.
    pub history_limit: usize,
    /// Path of the SQLite snapshot database.
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            max_total_connections: 1000,
            room_ttl: DEFAULT_ROOM_TTL,
            write_debounce: Duration::from_secs(2),
            history_limit: DEFAULT_HISTORY_LIMIT,
            db_path: PathBuf::from("collab.db"),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the specified port.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Build a configuration from environment variables, falling back to
    /// defaults: `BIND_ADDRESS`, `PORT`, `MAX_CONNECTIONS`, `ROOM_TTL_SECS`,
    /// `WRITE_DEBOUNCE_MS`, `HISTORY_LIMIT`, `DB_PATH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: env_or("PORT", defaults.port),
            max_total_connections: env_or("MAX_CONNECTIONS", defaults.max_total_connections),
            room_ttl: Duration::from_secs(env_or("ROOM_TTL_SECS", defaults.room_ttl.as_secs())),
            write_debounce: Duration::from_millis(env_or(
                "WRITE_DEBOUNCE_MS",
                defaults.write_debounce.as_millis() as u64,
            )),
            history_limit: env_or("HISTORY_LIMIT", defaults.history_limit),
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        }
    }

    /// Get the full bind address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Server statistics.
#[derive(Clone, Debug, Default)]
pub struct ServerStats {
    /// Connections accepted over the server's lifetime.
    pub total_connections: u64,
    /// Currently open connections.
    pub active_connections: u64,
    /// Rooms currently live in memory.
    pub active_rooms: usize,
}

/// The collaboration server.
pub struct CollaborationServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    writer: Arc<DebouncedWriter>,
    stats: Arc<RwLock<ServerStats>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CollaborationServer {
    /// Create a server over the given snapshot store.
    pub fn new(config: ServerConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let writer = Arc::new(DebouncedWriter::new(
            Arc::clone(&store),
            config.write_debounce,
        ));
        let registry = Arc::new(RoomRegistry::new(
            store,
            Arc::clone(&writer),
            RegistryConfig {
                room_ttl: config.room_ttl,
                history_limit: config.history_limit,
            },
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            writer,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            shutdown_tx,
        }
    }

    /// The room registry backing this server.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get a handle that can signal shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Get current server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.registry.room_count().await;
        stats
    }

    /// Run the accept loop until shutdown is signaled. On shutdown every
    /// pending snapshot write is executed before returning.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr.clone(), e))?;
        tracing::info!("collaboration server listening on {}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let active = self.stats.read().await.active_connections as usize;
                            if active >= self.config.max_total_connections {
                                tracing::warn!(%peer, "connection limit reached, rejecting");
                                continue;
                            }
                            self.spawn_connection(stream, peer).await;
                        }
                        Err(e) => {
                            tracing::error!("failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server received shutdown signal");
                    break;
                }
            }
        }

        self.writer.flush_all().await;
        tracing::info!("server shutdown complete");
        Ok(())
    }

    /// Upgrade a TCP stream and run its connection loop in a new task.
    async fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        {
            let mut stats = self.stats.write().await;
            stats.total_connections += 1;
            stats.active_connections += 1;
        }

        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::error!(%peer, "websocket handshake failed: {}", e);
                    stats.write().await.active_connections -= 1;
                    return;
                }
            };
            let (mut ws_tx, mut ws_rx) = ws_stream.split();

            let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
            let handle = ClientHandle::open(tx);
            let conn_id = handle.id;
            tracing::debug!(%peer, connection = %conn_id, "connection established");

            // Forward queued server messages onto the socket.
            let outgoing = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    match msg.to_json() {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize message: {}", e);
                        }
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ClientMessage>(&text) {
                                    Ok(event) => dispatch(&registry, &handle, event).await,
                                    Err(e) => {
                                        // Protocol violations are reported,
                                        // never disconnected.
                                        tracing::debug!(connection = %conn_id, "unparseable frame: {}", e);
                                        let _ = handle.send(ServerMessage::room_error(
                                            format!("unrecognized event: {e}"),
                                        ));
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // Pong is handled by tungstenite.
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::debug!(connection = %conn_id, "connection closed");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::debug!(connection = %conn_id, "websocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            outgoing.abort();
            registry.disconnect(conn_id).await;
            stats.write().await.active_connections -= 1;
        });
    }
}

/// Route one decoded client event to the registry and put any error on the
/// wire channel that matches the command.
async fn dispatch(registry: &Arc<RoomRegistry>, handle: &ClientHandle, event: ClientMessage) {
    match event {
        ClientMessage::CreateRoom { username, color } => {
            reply_room(handle, registry.create_room(handle, username, color).await);
        }
        ClientMessage::JoinRoom {
            username,
            color,
            room_code,
        } => {
            reply_room(
                handle,
                registry.join_room(handle, username, color, room_code).await,
            );
        }
        ClientMessage::AddEditor { name, language } => {
            reply_room(handle, registry.add_editor(handle, name, language).await);
        }
        ClientMessage::RemoveEditor(id) => {
            reply_room(handle, registry.remove_editor(handle, id).await);
        }
        ClientMessage::JoinEditor(id) => {
            reply_sync(handle, registry.join_editor(handle, id).await);
        }
        ClientMessage::LeaveEditor(id) => {
            reply_room(handle, registry.leave_editor(handle, id).await);
        }
        ClientMessage::SendOperation {
            editor_id,
            operation,
            base_revision,
        } => {
            reply_operation(
                handle,
                registry
                    .send_operation(handle, editor_id, operation, base_revision)
                    .await,
            );
        }
        ClientMessage::RequestSync(id) => {
            reply_sync(handle, registry.request_sync(handle, id).await);
        }
        ClientMessage::KickUser { target_socket_id } => {
            reply_room(handle, registry.kick_user(handle, target_socket_id).await);
        }
        ClientMessage::CloseRoom => {
            reply_room(handle, registry.close_room(handle).await);
        }
    }
}

fn reply_room(handle: &ClientHandle, result: RoomResult<()>) {
    match result {
        Ok(()) => {}
        // Removing a room's only editor is refused without any reply.
        Err(RoomError::LastEditor) => {}
        Err(e) => {
            let _ = handle.send(ServerMessage::room_error(e.to_string()));
        }
    }
}

fn reply_operation(handle: &ClientHandle, result: RoomResult<()>) {
    if let Err(e) = result {
        let msg = match &e {
            RoomError::NotInRoom | RoomError::RoomNotFound(_) | RoomError::AlreadyInRoom => {
                ServerMessage::room_error(e.to_string())
            }
            _ => ServerMessage::operation_error(e.to_string()),
        };
        let _ = handle.send(msg);
    }
}

fn reply_sync(handle: &ClientHandle, result: RoomResult<()>) {
    if let Err(e) = result {
        let msg = match &e {
            RoomError::NotInRoom | RoomError::RoomNotFound(_) | RoomError::AlreadyInRoom => {
                ServerMessage::room_error(e.to_string())
            }
            _ => ServerMessage::sync_error(e.to_string()),
        };
        let _ = handle.send(msg);
    }
}

/// Handle for triggering server shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(String, std::io::Error),
}
