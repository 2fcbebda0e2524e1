//! Position-wise validation of live input against the target snippet.
//!
//! The input is compared character by character (Unicode scalars) against
//! the target. Mismatches are allowed and counted — the input is a
//! prefix-by-position, not necessarily a true prefix of the target. A
//! participant is complete only on an exact full-text match, never early.

use serde::{Deserialize, Serialize};

/// Derived state for one input sample against a fixed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingCheck {
    /// Caret position: number of characters typed so far.
    pub position: usize,
    /// Count of positions where the typed character differs from the target.
    pub error_count: usize,
    /// Integer percentage of the target length reproduced, clamped to 0–100.
    pub progress: u8,
    /// True iff the input equals the target exactly.
    pub complete: bool,
}

/// Compare `input` against `target` and compute all derived typing state.
///
/// Characters past the end of the target do not count as errors (the
/// comparison is only defined over target indices) but still consume length,
/// so progress stays capped at 100.
pub fn check(input: &str, target: &str) -> TypingCheck {
    let target_chars: Vec<char> = target.chars().collect();
    let mut position = 0usize;
    let mut error_count = 0usize;

    for (i, ch) in input.chars().enumerate() {
        position += 1;
        if let Some(&expected) = target_chars.get(i) {
            if ch != expected {
                error_count += 1;
            }
        }
    }

    TypingCheck {
        position,
        error_count,
        progress: progress(position, target_chars.len()),
        complete: input == target,
    }
}

/// Integer progress percentage: floor(100 · typed / target), clamped to 0–100.
///
/// An empty target is treated as already fully reproduced.
pub fn progress(typed_len: usize, target_len: usize) -> u8 {
    if target_len == 0 {
        return 100;
    }
    let pct = (typed_len * 100) / target_len;
    pct.min(100) as u8
}
