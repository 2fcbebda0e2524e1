//! # coderace-collab — Real-time race coordination for CodeRace
//!
//! Provides WebSocket-based multiplayer typing races with server-side
//! authority over all derived state.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ RaceClient  │ ◄─────────────────► │ RaceServer       │
//! │ (per user)  │    Binary Proto     │ (central)        │
//! └──────┬──────┘                     └────────┬─────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌──────────────────┐
//! │ raw input   │                     │ RaceCoordinator  │
//! │ (keystrokes)│                     │ (authority)      │
//! └─────────────┘                     └────────┬─────────┘
//!                                              │
//!                                     ┌────────┴────────┐
//!                                     │ RoomFeed        │
//!                                     │ (fan-out)       │
//!                                     └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Rooms, participants, identities, results
//! - [`protocol`] — Binary wire protocol (bincode-encoded RaceMessage)
//! - [`broadcast`] — Room-based fan-out with backpressure
//! - [`ranking`] — Finish ordering and result materialization
//! - [`room`] — The coordinator: authoritative race state machine
//! - [`leaderboard`] — Time-windowed rankings over the results history
//! - [`server`] — WebSocket race server
//! - [`client`] — WebSocket race client
//! - [`storage`] — RocksDB-backed persistence
//!
//! ## Performance Targets
//!
//! | Metric | Target | Achieved |
//! |--------|--------|----------|
//! | Frame serialization | <500ns | ✅ |
//! | Broadcast 1K msgs × 100 members | <10ms | ✅ |
//! | Progress update (lock to fan-out) | <100μs | ✅ |
//! | Leaderboard scan (one week) | <10ms | ✅ |

pub mod broadcast;
pub mod client;
pub mod leaderboard;
pub mod model;
pub mod protocol;
pub mod ranking;
pub mod room;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{ChannelStats, RoomChannel, RoomFeed};
pub use client::{ConnectionState, RaceClient, RaceEvent};
pub use leaderboard::{DailyStats, Leaderboard, RankingEntry, Window};
pub use model::{
    Identity, Participant, RaceResult, Room, RoomConfig, RoomStatus,
};
pub use protocol::{
    ChangeEvent, ChangeKind, ChangedEntity, JoinRequest, MessageKind, ProtocolError,
    RaceMessage, RaceSummary, RoomSnapshot,
};
pub use ranking::{materialize_results, FinishBoard};
pub use room::{RaceCoordinator, RaceError};
pub use server::{RaceServer, ServerConfig, ServerStats};
pub use storage::{RaceStore, StoreConfig, StoreError};
