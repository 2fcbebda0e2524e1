//! # coderace-core — Domain logic for typing races
//!
//! Pure, synchronous building blocks shared by the coordination layer:
//!
//! - [`typing`] — position-wise comparison of live input against the target
//!   snippet (position, error count, progress, exact-match completion)
//! - [`metrics`] — typing speed (standardized words per minute) and accuracy
//! - [`snippet`] — the code snippet catalogue rooms draw their targets from
//!
//! Everything here is deterministic and recomputed from scratch on every
//! update; no incremental state is carried that could drift.

pub mod metrics;
pub mod snippet;
pub mod typing;

// Re-exports for convenience
pub use metrics::{accuracy, speed_wpm};
pub use snippet::{Difficulty, Snippet};
pub use typing::{check, TypingCheck};
