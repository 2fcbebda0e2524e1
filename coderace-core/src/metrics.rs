//! Typing speed and accuracy computation.
//!
//! Speed uses the standard convention of 5 characters per "word". Both
//! functions are pure and are recomputed from the full current input on
//! every update, so dropped or duplicated progress frames cannot drift the
//! displayed numbers.

/// Accuracy percentage in 0–100.
///
/// An empty input scores 100 (no attempt is a perfect score, not zero).
/// Otherwise: round(100 · correct / typed), where correct counts
/// position-wise matches over indices both strings cover.
pub fn accuracy(input: &str, target: &str) -> u8 {
    let typed = input.chars().count();
    if typed == 0 {
        return 100;
    }

    let correct = input
        .chars()
        .zip(target.chars())
        .filter(|(a, b)| a == b)
        .count();

    // Round to nearest integer percentage.
    (((correct * 100) + typed / 2) / typed).min(100) as u8
}

/// Typing speed in standardized words per minute: (chars / 5) per minute.
///
/// Returns 0 for non-positive elapsed time. Never negative.
pub fn speed_wpm(chars_typed: usize, elapsed_secs: f64) -> u32 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    let minutes = elapsed_secs / 60.0;
    let words = chars_typed as f64 / 5.0;
    (words / minutes).round().max(0.0) as u32
}
