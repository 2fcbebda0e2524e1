//! Persistent storage layer for race coordination.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐    state writes   ┌──────────────┐
//! │ Coordinator  │ ────────────────► │ RaceStore    │
//! │ (in-memory)  │                   │ (RocksDB)    │
//! └──────┬───────┘                   └──────┬───────┘
//!        │                                  │
//!        │ on session load                  │ column families
//!        ▼                                  ▼
//! ┌──────────────┐    ┌─────────────────────────────────────┐
//! │ RoomSession  │    │ CF "rooms"        — room records     │
//! │ (restored)   │    │ CF "codes"        — join-code index  │
//! └──────────────┘    │ CF "participants" — per-room records │
//!                     │ CF "results"      — results history  │
//!                     │ CF "snippets"     — snippet catalog  │
//!                     └─────────────────────────────────────┘
//! ```
//!
//! ## Performance Targets
//!
//! | Metric                  | Target  | Reference                          |
//! |-------------------------|---------|------------------------------------|
//! | Open (10k rooms)        | <100ms  | DDIA Ch.3 — LSM Trees              |
//! | Room load (cache hit)   | <1ms    | Patterson §5.7 — Cache Hierarchy   |
//! | Participant save        | <50μs   | DDIA Ch.3 — Write-Ahead Logs       |
//! | Leaderboard scan (week) | <10ms   | Patterson §5.7 — Sequential I/O    |
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 3

pub mod rocks;

pub use rocks::{RaceStore, StoreConfig, StoreError};
