//! Wire protocol for race synchronization.
//!
//! Every frame is one bincode-encoded [`RaceMessage`] carried in a binary
//! WebSocket message. The envelope is self-describing (kind + sender +
//! room), payloads are opaque bytes interpreted per kind:
//!
//! | Kind         | Direction        | Payload                       |
//! |--------------|------------------|-------------------------------|
//! | Join         | client → server  | bincode `JoinRequest`         |
//! | StateRequest | client → server  | empty                         |
//! | RoomState    | server → client  | bincode `RoomSnapshot`        |
//! | Progress     | client → server  | UTF-8 raw input text          |
//! | Start        | client → server  | empty                         |
//! | Started      | server → room    | bincode `Room`                |
//! | Changed      | server → room    | bincode `ChangeEvent`         |
//! | Finished     | server → room    | bincode `RaceSummary`         |
//! | Left         | client → server  | empty                         |
//! | Ping / Pong  | both             | empty                         |
//! | Reject       | server → client  | UTF-8 error description       |
//!
//! Progress frames deliberately carry the full raw input rather than a
//! delta: the server is the single authority for progress, speed, accuracy
//! and completion, and recomputes all of them from the raw text. Clients
//! never report derived values.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Identity, Participant, RaceResult, Room};

/// Protocol errors.
#[derive(Debug)]
pub enum ProtocolError {
    /// Failed to serialize a message.
    Serialization(String),
    /// Failed to deserialize a message.
    Deserialization(String),
    /// Unexpected message kind for the requested payload.
    InvalidKind { expected: MessageKind, got: MessageKind },
    /// Connection closed unexpectedly.
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Serialization(e) => write!(f, "serialization error: {e}"),
            ProtocolError::Deserialization(e) => write!(f, "deserialization error: {e}"),
            ProtocolError::InvalidKind { expected, got } => {
                write!(f, "expected {expected:?} message, got {got:?}")
            }
            ProtocolError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Message kinds. Discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    Join = 1,
    StateRequest = 2,
    RoomState = 3,
    Progress = 4,
    Start = 5,
    Started = 6,
    Changed = 7,
    Finished = 8,
    Left = 9,
    Ping = 10,
    Pong = 11,
    Reject = 12,
}

/// Payload of a Join frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Join code as entered; the server normalizes it.
    pub code: String,
    pub identity: Identity,
    /// Profile display name for authenticated identities; ignored for
    /// guests, whose name travels inside the identity.
    pub profile_name: Option<String>,
}

/// Full authoritative state of a room, sent in RoomState frames. A client
/// reconnecting after a drop reloads this instead of replaying updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Room,
    pub participants: Vec<Participant>,
}

/// Final standings of a completed race, sent in Finished frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    pub room: Room,
    /// Ordered by position ascending.
    pub results: Vec<RaceResult>,
}

/// What a change event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangedEntity {
    Room(Room),
    Participant(Participant),
}

/// Kind of change, mirroring the persistence operation that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
}

/// One state change within a room, fanned out to every member so their
/// local views converge on the server's authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entity: ChangedEntity,
}

impl ChangeEvent {
    pub fn room_id(&self) -> Uuid {
        match &self.entity {
            ChangedEntity::Room(r) => r.id,
            ChangedEntity::Participant(p) => p.room_id,
        }
    }
}

/// The envelope every frame travels in.
///
/// `sender` is the participant id of the originating client, [`Uuid::nil`]
/// for server-originated frames. The one exception is RoomState, where the
/// server sets `sender` to the recipient's own participant id so a joining
/// client learns the id it was assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceMessage {
    pub kind: MessageKind,
    pub sender: Uuid,
    pub room_id: Uuid,
    pub payload: Vec<u8>,
}

impl RaceMessage {
    /// Create a join message. The room id is unknown until the server
    /// resolves the code, so it travels as nil.
    pub fn join(request: &JoinRequest) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(request, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Join,
            sender: Uuid::nil(),
            room_id: Uuid::nil(),
            payload,
        })
    }

    pub fn state_request(sender: Uuid, room_id: Uuid) -> Self {
        Self {
            kind: MessageKind::StateRequest,
            sender,
            room_id,
            payload: Vec::new(),
        }
    }

    /// Create a room-state message addressed to one participant.
    pub fn room_state(
        recipient: Uuid,
        snapshot: &RoomSnapshot,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::RoomState,
            sender: recipient,
            room_id: snapshot.room.id,
            payload,
        })
    }

    /// Create a progress message carrying the full raw input.
    pub fn progress(sender: Uuid, room_id: Uuid, input: &str) -> Self {
        Self {
            kind: MessageKind::Progress,
            sender,
            room_id,
            payload: input.as_bytes().to_vec(),
        }
    }

    pub fn start(sender: Uuid, room_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Start,
            sender,
            room_id,
            payload: Vec::new(),
        }
    }

    pub fn started(room: &Room) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(room, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Started,
            sender: Uuid::nil(),
            room_id: room.id,
            payload,
        })
    }

    pub fn changed(event: &ChangeEvent) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(event, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Changed,
            sender: Uuid::nil(),
            room_id: event.room_id(),
            payload,
        })
    }

    pub fn finished(summary: &RaceSummary) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(summary, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Finished,
            sender: Uuid::nil(),
            room_id: summary.room.id,
            payload,
        })
    }

    pub fn left(sender: Uuid, room_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Left,
            sender,
            room_id,
            payload: Vec::new(),
        }
    }

    pub fn ping(sender: Uuid, room_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Ping,
            sender,
            room_id,
            payload: Vec::new(),
        }
    }

    pub fn pong(sender: Uuid, room_id: Uuid) -> Self {
        Self {
            kind: MessageKind::Pong,
            sender,
            room_id,
            payload: Vec::new(),
        }
    }

    pub fn reject(recipient: Uuid, room_id: Uuid, reason: &str) -> Self {
        Self {
            kind: MessageKind::Reject,
            sender: recipient,
            room_id,
            payload: reason.as_bytes().to_vec(),
        }
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(msg, _)| msg)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    fn check_kind(&self, expected: MessageKind) -> Result<(), ProtocolError> {
        if self.kind != expected {
            return Err(ProtocolError::InvalidKind {
                expected,
                got: self.kind,
            });
        }
        Ok(())
    }

    /// Extract the join request from a Join message.
    pub fn join_request(&self) -> Result<JoinRequest, ProtocolError> {
        self.check_kind(MessageKind::Join)?;
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(req, _)| req)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the snapshot from a RoomState message.
    pub fn snapshot(&self) -> Result<RoomSnapshot, ProtocolError> {
        self.check_kind(MessageKind::RoomState)?;
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(snap, _)| snap)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the raw input text from a Progress message.
    pub fn input(&self) -> Result<String, ProtocolError> {
        self.check_kind(MessageKind::Progress)?;
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the room from a Started message.
    pub fn room(&self) -> Result<Room, ProtocolError> {
        self.check_kind(MessageKind::Started)?;
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(room, _)| room)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the change event from a Changed message.
    pub fn change_event(&self) -> Result<ChangeEvent, ProtocolError> {
        self.check_kind(MessageKind::Changed)?;
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(ev, _)| ev)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the final standings from a Finished message.
    pub fn summary(&self) -> Result<RaceSummary, ProtocolError> {
        self.check_kind(MessageKind::Finished)?;
        bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map(|(summary, _)| summary)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Extract the reason text from a Reject message.
    pub fn reject_reason(&self) -> Result<String, ProtocolError> {
        self.check_kind(MessageKind::Reject)?;
        String::from_utf8(self.payload.clone())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomConfig;
    use coderace_core::snippet::Difficulty;

    fn sample_room() -> Room {
        let config = RoomConfig {
            name: Some("Test".into()),
            language: "rust".into(),
            difficulty: Difficulty::Easy,
            max_players: 4,
            is_private: false,
        };
        Room::new(&config, "ABC123".into(), "fn main() {}".into(), None, 1000)
    }

    #[test]
    fn test_join_roundtrip() {
        let req = JoinRequest {
            code: "ab12yz".into(),
            identity: Identity::Guest("Bob".into()),
            profile_name: None,
        };
        let msg = RaceMessage::join(&req).unwrap();
        let decoded = RaceMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind, MessageKind::Join);
        assert_eq!(decoded.sender, Uuid::nil());
        assert_eq!(decoded.join_request().unwrap(), req);
    }

    #[test]
    fn test_progress_carries_raw_input() {
        let sender = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        let msg = RaceMessage::progress(sender, room_id, "fn main(");
        let decoded = RaceMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.input().unwrap(), "fn main(");
        assert_eq!(decoded.sender, sender);
        assert_eq!(decoded.room_id, room_id);
    }

    #[test]
    fn test_room_state_addresses_recipient() {
        let room = sample_room();
        let p = Participant::new(room.id, Identity::Guest("Bob".into()), None, 1001);
        let recipient = p.id;
        let snapshot = RoomSnapshot {
            room: room.clone(),
            participants: vec![p],
        };
        let msg = RaceMessage::room_state(recipient, &snapshot).unwrap();
        assert_eq!(msg.sender, recipient);
        assert_eq!(msg.room_id, room.id);

        let decoded = RaceMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_changed_event_roundtrip() {
        let room = sample_room();
        let p = Participant::new(room.id, Identity::Guest("Bob".into()), None, 1001);
        let event = ChangeEvent {
            kind: ChangeKind::Updated,
            entity: ChangedEntity::Participant(p),
        };
        let msg = RaceMessage::changed(&event).unwrap();
        assert_eq!(msg.room_id, room.id);
        assert_eq!(msg.change_event().unwrap(), event);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let msg = RaceMessage::ping(Uuid::new_v4(), Uuid::new_v4());
        let err = msg.input().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidKind {
                expected: MessageKind::Progress,
                got: MessageKind::Ping,
            }
        ));
    }

    #[test]
    fn test_reject_reason() {
        let msg = RaceMessage::reject(Uuid::nil(), Uuid::new_v4(), "room is full");
        assert_eq!(msg.reject_reason().unwrap(), "room is full");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(RaceMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
