//! The code snippet catalogue rooms draw their target text from.
//!
//! Snippet administration (CRUD) lives outside the core; the coordination
//! layer only reads active snippets matching a language and difficulty.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Snippet difficulty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A code snippet that can serve as a race target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: Uuid,
    pub title: String,
    /// Language tag, e.g. "javascript", "python", "rust".
    pub language: String,
    pub difficulty: Difficulty,
    /// The target text participants transcribe.
    pub content: String,
    /// Inactive snippets are never selected for new rooms.
    pub is_active: bool,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at: u64,
}

impl Snippet {
    pub fn new(
        title: impl Into<String>,
        language: impl Into<String>,
        difficulty: Difficulty,
        content: impl Into<String>,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            language: language.into(),
            difficulty,
            content: content.into(),
            is_active: true,
            created_at,
        }
    }

    /// Whether this snippet is eligible for a room with the given config.
    pub fn matches(&self, language: &str, difficulty: Difficulty) -> bool {
        self.is_active && self.language == language && self.difficulty == difficulty
    }
}
