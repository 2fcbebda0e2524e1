//! WebSocket race server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── RaceCoordinator ── RoomSession (per room, mutex)
//! Client B ──┘          │
//!                       ├── RaceStore (RocksDB)
//!                       │       │
//!                       │       ├── rooms / codes / participants
//!                       │       └── results / snippets (LZ4)
//!                       │
//!                   RoomFeed (broadcast)
//!                       │
//!            ┌──────────┼───────────┐
//!            ▼          ▼           ▼
//!         Client A   Client B    Client C
//! ```
//!
//! Every connection speaks the bincode frame protocol over binary
//! WebSocket messages. The server is the single authority: clients send
//! raw input, the coordinator recomputes all derived state and fans the
//! resulting records out through the room's broadcast channel.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapters 3 & 8

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::RoomFeed;
use crate::model::Identity;
use crate::protocol::{MessageKind, RaceMessage};
use crate::room::RaceCoordinator;
use crate::storage::{RaceStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Persistence storage path
    pub storage_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            storage_path: PathBuf::from("coderace_data"),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The race server.
pub struct RaceServer {
    config: ServerConfig,
    /// Durable state
    store: Arc<RaceStore>,
    /// Per-room broadcast channels
    feed: Arc<RoomFeed>,
    /// Authoritative race state machine
    coordinator: Arc<RaceCoordinator>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl RaceServer {
    /// Create a new race server, opening the store at the configured path.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store_config = StoreConfig {
            path: config.storage_path.clone(),
            ..StoreConfig::default()
        };
        let store = Arc::new(RaceStore::open(store_config)?);
        let feed = Arc::new(RoomFeed::new(config.broadcast_capacity));
        let coordinator = Arc::new(RaceCoordinator::new(store.clone(), feed.clone()));

        Ok(Self {
            config,
            store,
            feed,
            coordinator,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Create with storage at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: path.into(),
            ..ServerConfig::default()
        };
        Self::new(config)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Race server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let coordinator = self.coordinator.clone();
            let feed = self.feed.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, coordinator, feed, stats).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        coordinator: Arc<RaceCoordinator>,
        feed: Arc<RoomFeed>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // State for this connection
        let mut participant_id: Option<Uuid> = None;
        let mut room_id: Option<Uuid> = None;
        let mut identity: Option<Identity> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let race_msg = match RaceMessage::decode(&bytes) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match race_msg.kind {
                                MessageKind::Join => {
                                    // First message: resolve the code and join
                                    let request = match race_msg.join_request() {
                                        Ok(r) => r,
                                        Err(e) => {
                                            log::warn!("Malformed join from {addr}: {e}");
                                            continue;
                                        }
                                    };

                                    match coordinator
                                        .join_room(
                                            &request.code,
                                            request.identity.clone(),
                                            request.profile_name.as_deref(),
                                        )
                                        .await
                                    {
                                        Ok((room, participant)) => {
                                            let channel = feed.get_or_create(room.id).await;
                                            let rx = channel
                                                .add_member(participant.id, &participant.display_name)
                                                .await;
                                            broadcast_rx = Some(rx);
                                            participant_id = Some(participant.id);
                                            room_id = Some(room.id);
                                            identity = Some(request.identity);

                                            // Reply with the authoritative snapshot; the
                                            // sender field tells the client its assigned id.
                                            let snapshot = coordinator.snapshot(room.id).await?;
                                            let reply =
                                                RaceMessage::room_state(participant.id, &snapshot)?;
                                            ws_sender
                                                .send(Message::Binary(reply.encode()?.into()))
                                                .await?;

                                            {
                                                let mut s = stats.write().await;
                                                s.active_rooms = feed.channel_count().await;
                                            }

                                            log::info!(
                                                "{} ({}) joined room {}",
                                                participant.display_name,
                                                participant.id,
                                                room.id
                                            );
                                        }
                                        Err(e) => {
                                            let reject = RaceMessage::reject(
                                                Uuid::nil(),
                                                Uuid::nil(),
                                                &e.to_string(),
                                            );
                                            ws_sender
                                                .send(Message::Binary(reject.encode()?.into()))
                                                .await?;
                                            log::debug!("Join rejected for {addr}: {e}");
                                        }
                                    }
                                }

                                MessageKind::StateRequest => {
                                    // Full reload after a reconnect or dropped frames
                                    if let Some(rid) = room_id {
                                        let snapshot = coordinator.snapshot(rid).await?;
                                        let reply = RaceMessage::room_state(
                                            participant_id.unwrap_or_else(Uuid::nil),
                                            &snapshot,
                                        )?;
                                        ws_sender
                                            .send(Message::Binary(reply.encode()?.into()))
                                            .await?;
                                    }
                                }

                                MessageKind::Progress => {
                                    if let (Some(rid), Some(pid)) = (room_id, participant_id) {
                                        let input = match race_msg.input() {
                                            Ok(i) => i,
                                            Err(e) => {
                                                log::warn!("Malformed progress from {addr}: {e}");
                                                continue;
                                            }
                                        };
                                        // The update itself is fanned out by the
                                        // coordinator; only errors go back privately.
                                        if let Err(e) =
                                            coordinator.update_progress(rid, pid, &input).await
                                        {
                                            let reject = RaceMessage::reject(
                                                pid,
                                                rid,
                                                &e.to_string(),
                                            );
                                            ws_sender
                                                .send(Message::Binary(reject.encode()?.into()))
                                                .await?;
                                        }
                                    }
                                }

                                MessageKind::Start => {
                                    if let (Some(rid), Some(ident)) = (room_id, identity.as_ref()) {
                                        if let Err(e) = coordinator.start_race(rid, ident).await {
                                            let reject = RaceMessage::reject(
                                                participant_id.unwrap_or_else(Uuid::nil),
                                                rid,
                                                &e.to_string(),
                                            );
                                            ws_sender
                                                .send(Message::Binary(reject.encode()?.into()))
                                                .await?;
                                        }
                                    }
                                }

                                MessageKind::Left => {
                                    log::debug!("Client {addr} left the room");
                                    break;
                                }

                                MessageKind::Ping => {
                                    let pong = RaceMessage::pong(
                                        participant_id.unwrap_or_else(Uuid::nil),
                                        room_id.unwrap_or_else(Uuid::nil),
                                    );
                                    ws_sender
                                        .send(Message::Binary(pong.encode()?.into()))
                                        .await?;
                                }

                                other => {
                                    log::debug!("Unhandled message kind: {other:?}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast frame. Everything on the channel is
                // server-originated authoritative state, so it is forwarded
                // to every member including the participant whose input
                // caused it — that's how a finisher learns their position.
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // No broadcast receiver yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // The client recovers with a StateRequest full reload.
                            log::warn!("Participant {participant_id:?} lagged by {n} messages");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: a dropped connection counts as leaving the room
        if let (Some(pid), Some(rid)) = (participant_id, room_id) {
            if let Err(e) = coordinator.leave(rid, pid).await {
                log::error!("Failed to remove participant {pid} from room {rid}: {e}");
            }

            let channel = feed.get_or_create(rid).await;
            channel.remove_member(&pid).await;
            feed.remove_if_empty(&rid).await;

            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = feed.channel_count().await;
        } else {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the coordinator (room creation happens through it).
    pub fn coordinator(&self) -> &Arc<RaceCoordinator> {
        &self.coordinator
    }

    /// Get the room feed.
    pub fn feed(&self) -> &Arc<RoomFeed> {
        &self.feed
    }

    /// Get the persistent store.
    pub fn store(&self) -> &Arc<RaceStore> {
        &self.store
    }
}
