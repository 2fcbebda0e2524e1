//! Time-windowed leaderboard over the results history.
//!
//! Results are immutable once written, so ranking is a pure fold over a
//! window scan: select results created inside the window, order by speed
//! descending with earlier completion breaking ties, take the top N. Two
//! runs over the same data always produce the same board.

use std::sync::Arc;

use crate::model::RaceResult;
use crate::storage::{RaceStore, StoreError};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const WEEK_MS: u64 = 7 * DAY_MS;
/// Months are a fixed 30 days; the window slides, it does not align to
/// calendar boundaries.
const MONTH_MS: u64 = 30 * DAY_MS;

/// How far back a leaderboard looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Week,
    Month,
    AllTime,
}

impl Window {
    /// Earliest `created_at` admitted to the window, given the current time.
    pub fn start(self, now_ms: u64) -> u64 {
        match self {
            Window::Week => now_ms.saturating_sub(WEEK_MS),
            Window::Month => now_ms.saturating_sub(MONTH_MS),
            Window::AllTime => 0,
        }
    }
}

/// One leaderboard row, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub display_name: String,
    pub language: String,
    pub wpm: u32,
    pub accuracy: u8,
    /// Race duration formatted as M:SS.
    pub time: String,
}

/// Format a duration in milliseconds as M:SS (e.g. 83_000 → "1:23").
pub fn format_time(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Rank results: fastest first, ties broken by earlier completion.
///
/// Pure over its input; the store-backed [`Leaderboard`] feeds it a window
/// scan.
pub fn top_n(results: &[RaceResult], n: usize) -> Vec<RankingEntry> {
    let mut sorted: Vec<&RaceResult> = results.iter().collect();
    sorted.sort_by(|a, b| {
        b.wpm
            .cmp(&a.wpm)
            .then(a.created_at.cmp(&b.created_at))
    });

    sorted
        .into_iter()
        .take(n)
        .map(|r| RankingEntry {
            display_name: r.display_name.clone(),
            language: r.language.clone(),
            wpm: r.wpm,
            accuracy: r.accuracy,
            time: format_time(r.time_taken_ms),
        })
        .collect()
}

/// Aggregate activity counters for a single day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyStats {
    /// Results recorded since the start of the current day.
    pub races_today: u64,
    /// Rough volume estimate derived from recorded speeds.
    pub lines_typed: u64,
}

/// Store-backed leaderboard.
pub struct Leaderboard {
    store: Arc<RaceStore>,
}

impl Leaderboard {
    pub fn new(store: Arc<RaceStore>) -> Self {
        Self { store }
    }

    /// Top `n` results within the window ending at `now_ms`.
    pub fn top(&self, window: Window, n: usize, now_ms: u64) -> Result<Vec<RankingEntry>, StoreError> {
        let results = self.store.results_since(window.start(now_ms))?;
        Ok(top_n(&results, n))
    }

    /// Activity counters since the start of the current UTC day.
    pub fn daily_stats(&self, now_ms: u64) -> Result<DailyStats, StoreError> {
        let day_start = now_ms - (now_ms % DAY_MS);
        let results = self.store.results_since(day_start)?;

        // Two minutes of racing at the recorded speed, five words per line.
        let lines_typed = results.iter().map(|r| (r.wpm as u64 * 2) / 5).sum();

        Ok(DailyStats {
            races_today: results.len() as u64,
            lines_typed,
        })
    }
}
