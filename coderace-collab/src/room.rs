//! Race coordination: room lifecycle, joins, progress and completion.
//!
//! The coordinator owns one in-memory session per active room, each behind
//! its own async mutex. Every state transition for a room — join, start,
//! progress update, finish, leave — runs under that mutex, so concurrent
//! operations on the same room serialize while distinct rooms never
//! contend. This is what makes finish positions contiguous and the
//! Waiting → Racing transition single-shot without any global lock.
//!
//! ```text
//! ┌────────────┐   join/progress   ┌─────────────────────┐
//! │ SyncServer │ ────────────────► │ RaceCoordinator      │
//! │ (per-conn) │                   │  sessions: id→Mutex  │
//! └────────────┘                   └──────┬───────┬──────┘
//!                                         │       │
//!                              RaceStore ◄┘       └► RoomFeed
//!                              (durable)             (fan-out)
//! ```
//!
//! The server is the single authority: clients send raw input text, the
//! coordinator recomputes progress, speed, accuracy and completion from it
//! and fans the authoritative records out to every room member.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use coderace_core::{metrics, typing};

use crate::broadcast::{RoomChannel, RoomFeed};
use crate::model::{
    join_code, now_ms, Identity, Participant, Room, RoomConfig, RoomStatus,
};
use crate::protocol::{
    ChangeEvent, ChangeKind, ChangedEntity, ProtocolError, RaceMessage, RaceSummary, RoomSnapshot,
};
use crate::ranking::{materialize_results, FinishBoard};
use crate::storage::{RaceStore, StoreError};

/// Attempts to find an unclaimed join code before giving up.
const MAX_CODE_ATTEMPTS: usize = 32;

/// Race coordination errors.
#[derive(Debug)]
pub enum RaceError {
    /// No room with this id
    RoomNotFound(Uuid),
    /// No room registered under this join code
    UnknownCode(String),
    /// No participant with this id in the room
    ParticipantNotFound(Uuid),
    /// The room has finished and admits no further joins or starts
    RoomClosed,
    /// The room is at capacity
    RoomFull { max_players: u32 },
    /// The requester may not perform this operation
    NotAuthorized,
    /// A race needs at least two active participants to start
    NotEnoughPlayers,
    /// No active snippet matches the requested language/difficulty
    NoSnippetAvailable { language: String },
    /// The operation is invalid in the room's current state
    InvalidState(&'static str),
    /// Storage failure
    Storage(StoreError),
    /// Protocol failure
    Protocol(ProtocolError),
}

impl std::fmt::Display for RaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            RaceError::UnknownCode(code) => write!(f, "unknown join code: {code}"),
            RaceError::ParticipantNotFound(id) => write!(f, "participant not found: {id}"),
            RaceError::RoomClosed => write!(f, "room is closed"),
            RaceError::RoomFull { max_players } => {
                write!(f, "room is full ({max_players} players max)")
            }
            RaceError::NotAuthorized => write!(f, "not authorized"),
            RaceError::NotEnoughPlayers => write!(f, "need at least 2 players to start"),
            RaceError::NoSnippetAvailable { language } => {
                write!(f, "no snippet available for language: {language}")
            }
            RaceError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            RaceError::Storage(e) => write!(f, "storage error: {e}"),
            RaceError::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for RaceError {}

impl From<StoreError> for RaceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RaceError::RoomNotFound(id),
            StoreError::UnknownCode(code) => RaceError::UnknownCode(code),
            other => RaceError::Storage(other),
        }
    }
}

impl From<ProtocolError> for RaceError {
    fn from(e: ProtocolError) -> Self {
        RaceError::Protocol(e)
    }
}

/// In-memory state of one active room. All mutation happens under the
/// session mutex held by the coordinator.
struct RoomSession {
    room: Room,
    participants: Vec<Participant>,
    board: FinishBoard,
}

impl RoomSession {
    fn find_mut(&mut self, participant_id: Uuid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == participant_id)
    }

    fn active_count(&self) -> usize {
        self.participants.iter().filter(|p| !p.abandoned).count()
    }

    /// True once every non-abandoned participant has finished.
    fn all_active_finished(&self) -> bool {
        self.participants
            .iter()
            .filter(|p| !p.abandoned)
            .all(|p| p.is_finished())
    }
}

/// Room coordinator: the server-side authority for all race state.
pub struct RaceCoordinator {
    store: Arc<RaceStore>,
    feed: Arc<RoomFeed>,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<RoomSession>>>>,
}

impl RaceCoordinator {
    pub fn new(store: Arc<RaceStore>, feed: Arc<RoomFeed>) -> Self {
        Self {
            store,
            feed,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a room: pick a snippet matching the requested language and
    /// difficulty, reserve a unique join code, persist and register the
    /// session.
    pub async fn create_room(
        &self,
        config: RoomConfig,
        creator: Option<Identity>,
    ) -> Result<Room, RaceError> {
        if config.max_players < 2 {
            return Err(RaceError::InvalidState("room capacity must be at least 2"));
        }

        let candidates = self
            .store
            .snippets_matching(&config.language, config.difficulty)?;
        if candidates.is_empty() {
            return Err(RaceError::NoSnippetAvailable {
                language: config.language,
            });
        }
        let pick = (Uuid::new_v4().as_u128() % candidates.len() as u128) as usize;
        let snippet = &candidates[pick];

        // The id is never visible until the code reservation succeeds, so
        // regenerating the whole room on a code collision is harmless.
        let mut attempts = 0;
        let room = loop {
            let room = Room::new(
                &config,
                join_code(),
                snippet.content.clone(),
                creator.clone(),
                now_ms(),
            );
            if self.store.reserve_code(&room.code, room.id)? {
                break room;
            }
            attempts += 1;
            if attempts >= MAX_CODE_ATTEMPTS {
                return Err(RaceError::InvalidState("join code space exhausted"));
            }
        };

        self.store.put_room(&room)?;

        let session = RoomSession {
            room: room.clone(),
            participants: Vec::new(),
            board: FinishBoard::new(),
        };
        self.sessions
            .write()
            .await
            .insert(room.id, Arc::new(Mutex::new(session)));

        log::info!(
            "Created room {} (code {}, language {}, max {})",
            room.id,
            room.code,
            room.language,
            room.max_players
        );
        Ok(room)
    }

    /// Join a room by code.
    ///
    /// Idempotent per identity: a second join with the same identity
    /// returns the existing participant instead of creating a duplicate.
    /// Joins are admitted until the room finishes or fills up.
    pub async fn join_room(
        &self,
        code: &str,
        identity: Identity,
        profile_name: Option<&str>,
    ) -> Result<(Room, Participant), RaceError> {
        let room_id = self.store.room_id_for_code(code)?;
        let session = self.session(room_id).await?;
        let channel = self.feed.get_or_create(room_id).await;

        let mut guard = session.lock().await;
        if !guard.room.is_open() {
            return Err(RaceError::RoomClosed);
        }

        if let Some(existing) = guard
            .participants
            .iter()
            .find(|p| p.identity == identity && !p.abandoned)
        {
            return Ok((guard.room.clone(), existing.clone()));
        }

        if guard.active_count() >= guard.room.max_players as usize {
            return Err(RaceError::RoomFull {
                max_players: guard.room.max_players,
            });
        }

        let participant = Participant::new(room_id, identity, profile_name, now_ms());
        self.store.put_participant(&participant)?;
        guard.participants.push(participant.clone());

        self.publish_change(&channel, ChangeKind::Created, ChangedEntity::Participant(participant.clone()))?;

        log::debug!(
            "{} joined room {} ({}/{})",
            participant.display_name,
            room_id,
            guard.active_count(),
            guard.room.max_players
        );
        Ok((guard.room.clone(), participant))
    }

    /// Start the race.
    ///
    /// Only the creator may start a room that has one; anonymously
    /// created rooms may be started by any active participant. Returns
    /// false when the race is already running (concurrent double-start is
    /// a benign no-op); at least two active participants are required.
    pub async fn start_race(&self, room_id: Uuid, requester: &Identity) -> Result<bool, RaceError> {
        let session = self.session(room_id).await?;
        let channel = self.feed.get_or_create(room_id).await;

        let mut guard = session.lock().await;
        match guard.room.status {
            RoomStatus::Racing => return Ok(false),
            RoomStatus::Finished => return Err(RaceError::RoomClosed),
            RoomStatus::Waiting => {}
        }

        let authorized = match &guard.room.created_by {
            Some(creator) => creator == requester,
            None => guard
                .participants
                .iter()
                .any(|p| &p.identity == requester && !p.abandoned),
        };
        if !authorized {
            return Err(RaceError::NotAuthorized);
        }

        if guard.active_count() < 2 {
            return Err(RaceError::NotEnoughPlayers);
        }

        guard.room.begin(now_ms());
        self.store.put_room(&guard.room)?;

        channel.publish(&RaceMessage::started(&guard.room)?)?;
        self.publish_change(&channel, ChangeKind::Updated, ChangedEntity::Room(guard.room.clone()))?;

        log::info!(
            "Race started in room {} with {} players",
            room_id,
            guard.active_count()
        );
        Ok(true)
    }

    /// Apply a progress update: recompute everything from the raw input.
    ///
    /// Exact reproduction of the target finishes the participant and hands
    /// out the next contiguous position; updates after finishing are
    /// ignored. When the last active participant finishes, the room closes
    /// and final standings are materialized.
    pub async fn update_progress(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
        input: &str,
    ) -> Result<Participant, RaceError> {
        let session = self.session(room_id).await?;
        let channel = self.feed.get_or_create(room_id).await;

        let mut guard = session.lock().await;
        let session = &mut *guard;

        let status = session.room.status;
        let target = &session.room.snippet;
        let started_at = session.room.started_at;

        let participant = session
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or(RaceError::ParticipantNotFound(participant_id))?;

        // A leaver's participant id stays valid for result materialization
        // but no longer accepts input.
        if participant.abandoned {
            return Err(RaceError::InvalidState("participant has left the room"));
        }
        // Finished participants ignore further input.
        if participant.is_finished() {
            return Ok(participant.clone());
        }
        match status {
            RoomStatus::Waiting => {
                return Err(RaceError::InvalidState("race has not started"));
            }
            RoomStatus::Finished => {
                return Err(RaceError::InvalidState("race already finished"));
            }
            RoomStatus::Racing => {}
        }

        let now = now_ms();
        let check = typing::check(input, target);
        let elapsed_secs = now.saturating_sub(started_at.unwrap_or(now)) as f64 / 1000.0;
        let wpm = metrics::speed_wpm(input.chars().count(), elapsed_secs);
        let accuracy = metrics::accuracy(input, target);

        participant.apply_update(&check, wpm, accuracy);

        if check.complete {
            if let Some(position) = session.board.record_finish(participant, now) {
                log::info!(
                    "{} finished room {} at position {} ({} wpm)",
                    participant.display_name,
                    room_id,
                    position,
                    participant.wpm
                );
            }
        }

        let updated = participant.clone();
        self.store.put_participant(&updated)?;
        self.publish_change(&channel, ChangeKind::Updated, ChangedEntity::Participant(updated.clone()))?;

        let room_closed = if session.all_active_finished() {
            self.finish_room(session, &channel)?;
            true
        } else {
            false
        };
        drop(guard);
        if room_closed {
            self.evict_session(room_id).await;
        }

        Ok(updated)
    }

    /// Mark a participant as having left the room.
    ///
    /// Participant records are never deleted while the room is active;
    /// leavers are flagged abandoned so they stop blocking completion and
    /// later receive a trailing position. Unknown participants and
    /// already-finished rooms are tolerated, since disconnect cleanup
    /// races with room teardown.
    pub async fn leave(&self, room_id: Uuid, participant_id: Uuid) -> Result<(), RaceError> {
        let session = match self.session(room_id).await {
            Ok(s) => s,
            Err(RaceError::RoomNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let channel = self.feed.get_or_create(room_id).await;

        let mut guard = session.lock().await;
        let session = &mut *guard;

        if session.room.status == RoomStatus::Finished {
            return Ok(());
        }

        let Some(participant) = session.find_mut(participant_id) else {
            return Ok(());
        };
        if participant.abandoned {
            return Ok(());
        }

        participant.abandoned = true;
        let updated = participant.clone();
        self.store.put_participant(&updated)?;

        channel.publish(&RaceMessage::left(participant_id, room_id))?;
        self.publish_change(&channel, ChangeKind::Updated, ChangedEntity::Participant(updated))?;

        log::debug!("Participant {participant_id} left room {room_id}");

        if session.room.status == RoomStatus::Racing && session.all_active_finished() {
            self.finish_room(session, &channel)?;
        }
        let room_closed = session.room.status == RoomStatus::Finished;
        drop(guard);
        if room_closed {
            self.evict_session(room_id).await;
        }

        Ok(())
    }

    /// Full authoritative state of a room, for joins and reconnects.
    pub async fn snapshot(&self, room_id: Uuid) -> Result<RoomSnapshot, RaceError> {
        let session = self.session(room_id).await?;
        let guard = session.lock().await;
        Ok(RoomSnapshot {
            room: guard.room.clone(),
            participants: guard.participants.clone(),
        })
    }

    /// Final standings of a finished room.
    pub async fn summary(&self, room_id: Uuid) -> Result<RaceSummary, RaceError> {
        let session = self.session(room_id).await?;
        let guard = session.lock().await;
        if guard.room.status != RoomStatus::Finished {
            return Err(RaceError::InvalidState("race has not finished"));
        }
        Ok(RaceSummary {
            room: guard.room.clone(),
            results: materialize_results(&guard.room, &guard.participants),
        })
    }

    /// Number of rooms with an in-memory session.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close the room and freeze final standings. Idempotent; called with
    /// the session mutex held.
    fn finish_room(
        &self,
        session: &mut RoomSession,
        channel: &RoomChannel,
    ) -> Result<(), RaceError> {
        if !session.room.close(now_ms()) {
            return Ok(());
        }

        session.board.finalize(&mut session.participants);
        let results = materialize_results(&session.room, &session.participants);

        self.store
            .persist_finished_race(&session.room, &session.participants, &results)?;

        let summary = RaceSummary {
            room: session.room.clone(),
            results,
        };
        channel.publish(&RaceMessage::finished(&summary)?)?;

        log::info!(
            "Room {} finished with {} results",
            session.room.id,
            summary.results.len()
        );
        Ok(())
    }

    fn publish_change(
        &self,
        channel: &RoomChannel,
        kind: ChangeKind,
        entity: ChangedEntity,
    ) -> Result<(), RaceError> {
        let event = ChangeEvent { kind, entity };
        channel.publish(&RaceMessage::changed(&event)?)?;
        Ok(())
    }

    /// Drop a finished room's in-memory session. Everything is durable by
    /// the time the room closes, so a later lookup rebuilds from the store;
    /// without this the map would grow by one session per room forever.
    async fn evict_session(&self, room_id: Uuid) {
        self.sessions.write().await.remove(&room_id);
    }

    /// Look up the in-memory session for a room, restoring it from the
    /// store after a restart.
    async fn session(&self, room_id: Uuid) -> Result<Arc<Mutex<RoomSession>>, RaceError> {
        // Fast path: read lock
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&room_id) {
                return Ok(session.clone());
            }
        }

        // Slow path: load from storage, then double-check under write lock
        let room = self.store.load_room(room_id)?;
        let participants = self.store.load_participants(room_id)?;
        let board = FinishBoard::recover(&participants);

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(&room_id) {
            return Ok(session.clone());
        }

        let session = Arc::new(Mutex::new(RoomSession {
            room,
            participants,
            board,
        }));
        sessions.insert(room_id, session.clone());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderace_core::snippet::{Difficulty, Snippet};
    use tempfile::TempDir;

    use crate::storage::StoreConfig;

    const TARGET: &str = "fn main() {}";

    fn config() -> RoomConfig {
        RoomConfig {
            name: None,
            language: "rust".into(),
            difficulty: Difficulty::Easy,
            max_players: 4,
            is_private: false,
        }
    }

    fn coordinator() -> (RaceCoordinator, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap());
        store
            .put_snippet(&Snippet::new("Main", "rust", Difficulty::Easy, TARGET))
            .unwrap();
        let feed = Arc::new(RoomFeed::new(64));
        (RaceCoordinator::new(store, feed), dir)
    }

    fn guest(name: &str) -> Identity {
        Identity::Guest(name.into())
    }

    #[tokio::test]
    async fn test_create_room_picks_snippet_and_code() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();

        assert_eq!(room.snippet, TARGET);
        assert_eq!(room.code.len(), 6);
        assert_eq!(room.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_create_room_rejects_tiny_capacity() {
        let (coord, _dir) = coordinator();
        let mut cfg = config();
        cfg.max_players = 1;
        assert!(matches!(
            coord.create_room(cfg, None).await,
            Err(RaceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_create_room_without_matching_snippet() {
        let (coord, _dir) = coordinator();
        let mut cfg = config();
        cfg.language = "cobol".into();
        assert!(matches!(
            coord.create_room(cfg, None).await,
            Err(RaceError::NoSnippetAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_by_code_case_insensitive() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();

        let lowered = room.code.to_ascii_lowercase();
        let (joined_room, p) = coord
            .join_room(&lowered, guest("Alice"), None)
            .await
            .unwrap();
        assert_eq!(joined_room.id, room.id);
        assert_eq!(p.display_name, "Alice");
        assert_eq!(p.progress, 0);
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let (coord, _dir) = coordinator();
        assert!(matches!(
            coord.join_room("ZZZZZZ", guest("Alice"), None).await,
            Err(RaceError::UnknownCode(_))
        ));
    }

    #[tokio::test]
    async fn test_join_is_idempotent_per_identity() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();

        let (_, first) = coord.join_room(&room.code, guest("Alice"), None).await.unwrap();
        let (_, second) = coord.join_room(&room.code, guest("Alice"), None).await.unwrap();
        assert_eq!(first.id, second.id);

        let snapshot = coord.snapshot(room.id).await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_join_full_room() {
        let (coord, _dir) = coordinator();
        let mut cfg = config();
        cfg.max_players = 2;
        let room = coord.create_room(cfg, None).await.unwrap();

        coord.join_room(&room.code, guest("a"), None).await.unwrap();
        coord.join_room(&room.code, guest("b"), None).await.unwrap();
        assert!(matches!(
            coord.join_room(&room.code, guest("c"), None).await,
            Err(RaceError::RoomFull { max_players: 2 })
        ));
    }

    #[tokio::test]
    async fn test_leaver_frees_capacity() {
        let (coord, _dir) = coordinator();
        let mut cfg = config();
        cfg.max_players = 2;
        let room = coord.create_room(cfg, None).await.unwrap();

        let (_, a) = coord.join_room(&room.code, guest("a"), None).await.unwrap();
        coord.join_room(&room.code, guest("b"), None).await.unwrap();

        coord.leave(room.id, a.id).await.unwrap();
        coord.join_room(&room.code, guest("c"), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_two_players() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        coord.join_room(&room.code, alice.clone(), None).await.unwrap();

        assert!(matches!(
            coord.start_race(room.id, &alice).await,
            Err(RaceError::NotEnoughPlayers)
        ));
    }

    #[tokio::test]
    async fn test_only_creator_starts_owned_room() {
        let (coord, _dir) = coordinator();
        let creator = guest("Host");
        let room = coord
            .create_room(config(), Some(creator.clone()))
            .await
            .unwrap();

        coord.join_room(&room.code, creator.clone(), None).await.unwrap();
        let intruder = guest("Mallory");
        coord.join_room(&room.code, intruder.clone(), None).await.unwrap();

        assert!(matches!(
            coord.start_race(room.id, &intruder).await,
            Err(RaceError::NotAuthorized)
        ));
        assert!(coord.start_race(room.id, &creator).await.unwrap());
    }

    #[tokio::test]
    async fn test_anonymous_room_any_participant_starts() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();

        let alice = guest("Alice");
        coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        coord.join_room(&room.code, guest("Bob"), None).await.unwrap();

        // An identity that never joined cannot start the room.
        assert!(matches!(
            coord.start_race(room.id, &guest("Outsider")).await,
            Err(RaceError::NotAuthorized)
        ));
        assert!(coord.start_race(room.id, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_double_start_is_noop() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        coord.join_room(&room.code, guest("Bob"), None).await.unwrap();

        assert!(coord.start_race(room.id, &alice).await.unwrap());
        assert!(!coord.start_race(room.id, &alice).await.unwrap());

        let snapshot = coord.snapshot(room.id).await.unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::Racing);
    }

    #[tokio::test]
    async fn test_progress_rejected_before_start() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let (_, p) = coord.join_room(&room.code, guest("Alice"), None).await.unwrap();

        assert!(matches!(
            coord.update_progress(room.id, p.id, "fn").await,
            Err(RaceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_full_race_lifecycle() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();

        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();

        // Partial progress: errors counted, progress floored, no finish.
        let p = coord
            .update_progress(room.id, pa.id, "fn majn(")
            .await
            .unwrap();
        assert_eq!(p.progress, 66); // 8 of 12 chars
        assert!(!p.is_finished());

        // Exact reproduction finishes; a prefix one char short does not.
        let p = coord
            .update_progress(room.id, pa.id, &TARGET[..TARGET.len() - 1])
            .await
            .unwrap();
        assert!(!p.is_finished());

        let p = coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        assert!(p.is_finished());
        assert_eq!(p.position, Some(1));
        assert_eq!(p.progress, 100);

        // Room still racing: Bob hasn't finished.
        let snapshot = coord.snapshot(room.id).await.unwrap();
        assert_eq!(snapshot.room.status, RoomStatus::Racing);

        let p = coord.update_progress(room.id, pb.id, TARGET).await.unwrap();
        assert_eq!(p.position, Some(2));

        // Last finisher closes the room and freezes standings.
        let summary = coord.summary(room.id).await.unwrap();
        assert_eq!(summary.room.status, RoomStatus::Finished);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].position, 1);
        assert_eq!(summary.results[0].display_name, "Alice");
        assert_eq!(summary.results[1].position, 2);
    }

    #[tokio::test]
    async fn test_input_after_finish_is_ignored() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();

        coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        let before = coord.snapshot(room.id).await.unwrap();

        // More keystrokes after finishing change nothing.
        let p = coord.update_progress(room.id, pa.id, "garbage").await.unwrap();
        assert_eq!(p.position, Some(1));
        assert_eq!(p.progress, 100);

        let after = coord.snapshot(room.id).await.unwrap();
        assert_eq!(before.participants, after.participants);
    }

    #[tokio::test]
    async fn test_join_finished_room_rejected() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();
        coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        coord.update_progress(room.id, pb.id, TARGET).await.unwrap();

        assert!(matches!(
            coord.join_room(&room.code, guest("Carol"), None).await,
            Err(RaceError::RoomClosed)
        ));
    }

    #[tokio::test]
    async fn test_leaver_gets_trailing_position() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();

        coord.update_progress(room.id, pb.id, "fn ").await.unwrap();
        coord.update_progress(room.id, pa.id, TARGET).await.unwrap();

        // Bob quits; Alice is the only remaining active participant and has
        // finished, so the room closes and Bob ranks last.
        coord.leave(room.id, pb.id).await.unwrap();

        let summary = coord.summary(room.id).await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[0].display_name, "Alice");
        assert_eq!(summary.results[1].display_name, "Bob");
        assert_eq!(summary.results[1].position, 2);
    }

    #[tokio::test]
    async fn test_session_recovery_from_store() {
        let dir = TempDir::new().unwrap();
        let store_config = StoreConfig::for_testing(dir.path());
        let room_id;
        let code;
        {
            let store = Arc::new(RaceStore::open(store_config.clone()).unwrap());
            store
                .put_snippet(&Snippet::new("Main", "rust", Difficulty::Easy, TARGET))
                .unwrap();
            let coord = RaceCoordinator::new(store, Arc::new(RoomFeed::new(64)));
            let room = coord.create_room(config(), None).await.unwrap();
            coord.join_room(&room.code, guest("Alice"), None).await.unwrap();
            room_id = room.id;
            code = room.code;
        }

        // A fresh coordinator over the same database restores the session.
        let store = Arc::new(RaceStore::open(store_config).unwrap());
        let coord = RaceCoordinator::new(store, Arc::new(RoomFeed::new(64)));

        let snapshot = coord.snapshot(room_id).await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].display_name, "Alice");

        let (room, _) = coord.join_room(&code, guest("Bob"), None).await.unwrap();
        assert_eq!(room.id, room_id);
    }

    #[tokio::test]
    async fn test_finished_room_session_is_evicted() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();
        assert_eq!(coord.session_count().await, 1);

        coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        assert_eq!(coord.session_count().await, 1);
        coord.update_progress(room.id, pb.id, TARGET).await.unwrap();

        // Closing the room drops its session; results stay readable
        // because a later lookup rebuilds from the store.
        assert_eq!(coord.session_count().await, 0);
        let summary = coord.summary(room.id).await.unwrap();
        assert_eq!(summary.room.status, RoomStatus::Finished);
        assert_eq!(summary.results.len(), 2);
    }

    #[tokio::test]
    async fn test_session_evicted_when_leave_closes_room() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();

        coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        coord.leave(room.id, pb.id).await.unwrap();

        assert_eq!(coord.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_abandoned_participant_cannot_race() {
        let (coord, _dir) = coordinator();
        let room = coord.create_room(config(), None).await.unwrap();
        let alice = guest("Alice");
        let (_, pa) = coord.join_room(&room.code, alice.clone(), None).await.unwrap();
        let (_, pb) = coord.join_room(&room.code, guest("Bob"), None).await.unwrap();
        let (_, pc) = coord.join_room(&room.code, guest("Carol"), None).await.unwrap();
        coord.start_race(room.id, &alice).await.unwrap();

        coord.leave(room.id, pb.id).await.unwrap();

        // Bob's id is still known to the room but no longer accepts input,
        // so he cannot sneak back in and take a finishing position.
        assert!(matches!(
            coord.update_progress(room.id, pb.id, TARGET).await,
            Err(RaceError::InvalidState(_))
        ));

        let p = coord.update_progress(room.id, pa.id, TARGET).await.unwrap();
        assert_eq!(p.position, Some(1));
        let p = coord.update_progress(room.id, pc.id, TARGET).await.unwrap();
        assert_eq!(p.position, Some(2));
    }
}
