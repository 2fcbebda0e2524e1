//! WebSocket race client for connecting to the race server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect)
//! - Raw input submission (the server derives all race state)
//! - Authoritative state events for the application
//!
//! There is no offline replay: keystrokes made while disconnected are
//! stale the moment the connection drops. A reconnecting client joins
//! again and reloads the full room snapshot instead.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::model::{Identity, Room};
use crate::protocol::{
    JoinRequest, MessageKind, ProtocolError, RaceMessage, RaceSummary, RoomSnapshot,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the race client.
#[derive(Debug, Clone)]
pub enum RaceEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Authoritative room snapshot; `you` is our assigned participant id
    State { you: Uuid, snapshot: RoomSnapshot },
    /// A room or participant record changed
    Changed(crate::protocol::ChangeEvent),
    /// The race started
    Started(Room),
    /// The race finished with final standings
    Finished(RaceSummary),
    /// A participant left the room
    MemberLeft(Uuid),
    /// The server rejected a request
    Rejected(String),
}

/// The race client.
///
/// Manages a WebSocket connection to the race server and surfaces the
/// server's authoritative state as events.
pub struct RaceClient {
    /// Who we are
    identity: Identity,

    /// Profile display name (authenticated identities only)
    profile_name: Option<String>,

    /// Join code of the room we race in
    code: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Participant id assigned by the server (set on first RoomState)
    participant_id: Arc<RwLock<Option<Uuid>>>,

    /// Room id resolved from the join code
    room_id: Arc<RwLock<Option<Uuid>>>,

    /// Channel to send messages to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<RaceEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<RaceEvent>,

    /// Server URL
    server_url: String,
}

impl RaceClient {
    /// Create a new race client for the given join code.
    pub fn new(
        identity: Identity,
        profile_name: Option<String>,
        code: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            identity,
            profile_name,
            code: code.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            participant_id: Arc::new(RwLock::new(None)),
            room_id: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RaceEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    /// The first RoomState frame carries our assigned participant id.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing message channel
                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket
                let ws_writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer = ws_writer.clone();
                tokio::spawn(async move {
                    while let Some(data) = out_rx.recv().await {
                        let mut w = writer.lock().await;
                        use futures_util::SinkExt;
                        if w.send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });

                // Join the room
                let request = JoinRequest {
                    code: self.code.clone(),
                    identity: self.identity.clone(),
                    profile_name: self.profile_name.clone(),
                };
                let encoded = RaceMessage::join(&request)?.encode()?;
                if let Some(ref tx) = self.outgoing_tx {
                    let _ = tx.send(encoded).await;
                }

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(RaceEvent::Connected).await;

                // Reader task: map incoming frames to events
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let participant_id = self.participant_id.clone();
                let room_id = self.room_id.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                let Ok(race_msg) = RaceMessage::decode(&bytes) else {
                                    continue;
                                };

                                let event = match race_msg.kind {
                                    MessageKind::RoomState => {
                                        match race_msg.snapshot() {
                                            Ok(snapshot) => {
                                                // The server addresses this frame to us:
                                                // the sender field is our assigned id.
                                                *participant_id.write().await =
                                                    Some(race_msg.sender);
                                                *room_id.write().await =
                                                    Some(snapshot.room.id);
                                                Some(RaceEvent::State {
                                                    you: race_msg.sender,
                                                    snapshot,
                                                })
                                            }
                                            Err(_) => None,
                                        }
                                    }
                                    MessageKind::Changed => {
                                        race_msg.change_event().ok().map(RaceEvent::Changed)
                                    }
                                    MessageKind::Started => {
                                        race_msg.room().ok().map(RaceEvent::Started)
                                    }
                                    MessageKind::Finished => {
                                        race_msg.summary().ok().map(RaceEvent::Finished)
                                    }
                                    MessageKind::Left => {
                                        Some(RaceEvent::MemberLeft(race_msg.sender))
                                    }
                                    MessageKind::Reject => race_msg
                                        .reject_reason()
                                        .ok()
                                        .map(RaceEvent::Rejected),
                                    _ => None,
                                };

                                if let Some(evt) = event {
                                    let _ = event_tx.send(evt).await;
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(RaceEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Send the full raw input text to the server.
    ///
    /// The server recomputes progress, speed, accuracy and completion;
    /// nothing derived ever travels from the client.
    pub async fn send_progress(&self, input: &str) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }

        let sender = self.participant_id.read().await.unwrap_or_else(Uuid::nil);
        let room = self.room_id.read().await.unwrap_or_else(Uuid::nil);
        let encoded = RaceMessage::progress(sender, room, input).encode()?;

        self.send_bytes(encoded).await
    }

    /// Ask the server to start the race.
    pub async fn start(&self) -> Result<(), ProtocolError> {
        let sender = self.participant_id.read().await.unwrap_or_else(Uuid::nil);
        let room = self.room_id.read().await.unwrap_or_else(Uuid::nil);
        let encoded = RaceMessage::start(sender, room).encode()?;
        self.send_bytes(encoded).await
    }

    /// Request a full authoritative snapshot (e.g. after dropped frames).
    pub async fn request_state(&self) -> Result<(), ProtocolError> {
        let sender = self.participant_id.read().await.unwrap_or_else(Uuid::nil);
        let room = self.room_id.read().await.unwrap_or_else(Uuid::nil);
        let encoded = RaceMessage::state_request(sender, room).encode()?;
        self.send_bytes(encoded).await
    }

    /// Leave the room.
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        let sender = self.participant_id.read().await.unwrap_or_else(Uuid::nil);
        let room = self.room_id.read().await.unwrap_or_else(Uuid::nil);
        let encoded = RaceMessage::left(sender, room).encode()?;
        self.send_bytes(encoded).await
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let sender = self.participant_id.read().await.unwrap_or_else(Uuid::nil);
        let room = self.room_id.read().await.unwrap_or_else(Uuid::nil);
        let encoded = RaceMessage::ping(sender, room).encode()?;
        self.send_bytes(encoded).await
    }

    async fn send_bytes(&self, encoded: Vec<u8>) -> Result<(), ProtocolError> {
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Our identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The join code we connect with.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Our participant id, once the server has assigned one.
    pub async fn participant_id(&self) -> Option<Uuid> {
        *self.participant_id.read().await
    }

    /// The room id, once the join code has been resolved.
    pub async fn room_id(&self) -> Option<Uuid> {
        *self.room_id.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
