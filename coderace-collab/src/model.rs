//! Domain model: rooms, participants, identities and race results.
//!
//! A room is one race session over a fixed target snippet. Its status only
//! ever moves forward: Waiting → Racing → Finished. Participants belong to
//! exactly one room and are mutated only by their own progress updates; the
//! records are retained after the room finishes for result materialization.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use coderace_core::snippet::Difficulty;
use coderace_core::typing::TypingCheck;

/// Join codes are 6 uppercase alphanumeric characters.
pub const JOIN_CODE_LEN: usize = 6;

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a random join code.
///
/// Uniqueness is not guaranteed here; the caller checks the generated code
/// against the store's code index and retries on collision.
pub fn join_code() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    bytes[..JOIN_CODE_LEN]
        .iter()
        .map(|b| JOIN_CODE_ALPHABET[(*b as usize) % JOIN_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalize a user-entered join code (codes compare case-insensitively).
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Room lifecycle status. Transitions are monotonic; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Waiting,
    Racing,
    Finished,
}

/// Who a participant is: an authenticated identity reference or a guest
/// display name scoped to the room. Exactly one, structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    User(Uuid),
    Guest(String),
}

impl Identity {
    /// Resolve a display name: the profile name supplied by the identity
    /// provider for users, the guest name for guests, a placeholder if
    /// neither yields anything usable.
    pub fn resolve_name(&self, profile_name: Option<&str>) -> String {
        match self {
            Identity::User(_) => profile_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or("Anonymous")
                .to_string(),
            Identity::Guest(name) => {
                let name = name.trim();
                if name.is_empty() {
                    "Anonymous".to_string()
                } else {
                    name.to_string()
                }
            }
        }
    }
}

/// Configuration for creating a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Optional display name; defaults to "Room <CODE>".
    pub name: Option<String>,
    pub language: String,
    pub difficulty: Difficulty,
    /// Maximum participants; must be at least 2.
    pub max_players: u32,
    /// Private rooms are reachable only by join code.
    pub is_private: bool,
}

/// One race session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    /// Short human-enterable join code, stored normalized (uppercase).
    pub code: String,
    pub name: String,
    pub language: String,
    /// The target text participants transcribe. Immutable once set.
    pub snippet: String,
    pub max_players: u32,
    /// Absent for anonymously created rooms.
    pub created_by: Option<Identity>,
    pub is_private: bool,
    pub status: RoomStatus,
    /// Milliseconds since epoch.
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

impl Room {
    pub fn new(
        config: &RoomConfig,
        code: String,
        snippet: String,
        created_by: Option<Identity>,
        now: u64,
    ) -> Self {
        let code = normalize_code(&code);
        let name = match &config.name {
            Some(n) if !n.trim().is_empty() => n.clone(),
            _ => format!("Room {code}"),
        };
        Self {
            id: Uuid::new_v4(),
            code,
            name,
            language: config.language.clone(),
            snippet,
            max_players: config.max_players,
            created_by,
            is_private: config.is_private,
            status: RoomStatus::Waiting,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Transition Waiting → Racing. Returns false when the room has already
    /// left Waiting (concurrent double-start is a benign no-op upstream).
    pub fn begin(&mut self, now: u64) -> bool {
        if self.status != RoomStatus::Waiting {
            return false;
        }
        self.status = RoomStatus::Racing;
        self.started_at = Some(now);
        true
    }

    /// Transition Racing → Finished. Returns false when not Racing;
    /// `finished_at` is set exactly once.
    pub fn close(&mut self, now: u64) -> bool {
        if self.status != RoomStatus::Racing {
            return false;
        }
        self.status = RoomStatus::Finished;
        self.finished_at = Some(now);
        true
    }

    /// Whether new participants may still join.
    pub fn is_open(&self) -> bool {
        self.status != RoomStatus::Finished
    }
}

/// One contender in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub room_id: Uuid,
    pub identity: Identity,
    pub display_name: String,
    /// Percentage of the target reproduced, 0–100, monotonically
    /// non-decreasing until finish.
    pub progress: u8,
    pub wpm: u32,
    pub accuracy: u8,
    /// Milliseconds since epoch; set exactly once, immutable thereafter.
    pub finished_at: Option<u64>,
    /// Final rank, 1 = first. Assigned exactly once by the finish board.
    pub position: Option<u32>,
    /// Join timestamp; breaks ties for trailing positions.
    pub joined_at: u64,
    /// Set when the participant leaves mid-race. Abandoned participants no
    /// longer block room completion.
    pub abandoned: bool,
}

impl Participant {
    pub fn new(
        room_id: Uuid,
        identity: Identity,
        profile_name: Option<&str>,
        now: u64,
    ) -> Self {
        let display_name = identity.resolve_name(profile_name);
        Self {
            id: Uuid::new_v4(),
            room_id,
            identity,
            display_name,
            progress: 0,
            wpm: 0,
            accuracy: 100,
            finished_at: None,
            position: None,
            joined_at: now,
            abandoned: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Apply freshly recomputed typing state. Progress is clamped so it
    /// never decreases (a shrinking input cannot violate the data-model
    /// invariant); speed and accuracy track the raw input. Updates after
    /// finishing are ignored.
    pub fn apply_update(&mut self, check: &TypingCheck, wpm: u32, accuracy: u8) {
        if self.is_finished() {
            return;
        }
        self.progress = self.progress.max(check.progress);
        self.wpm = wpm;
        self.accuracy = accuracy;
    }
}

/// Immutable per-participant snapshot recorded at room completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub room_id: Uuid,
    pub identity: Identity,
    pub display_name: String,
    pub language: String,
    pub wpm: u32,
    pub accuracy: u8,
    /// Time from race start to finish (or to room close for non-finishers).
    pub time_taken_ms: u64,
    pub position: u32,
    /// Milliseconds since epoch; leaderboard windows select on this.
    pub created_at: u64,
}
