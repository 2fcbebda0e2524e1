//! Finish ordering and result materialization.
//!
//! The finish board hands out positions 1, 2, 3, … in the order finishes
//! are recorded. It holds no lock itself: the coordinator serializes all
//! access through the per-room session mutex, so two participants
//! completing in the same instant still receive distinct contiguous
//! positions.

use crate::model::{Participant, RaceResult, Room};

/// Position counter for one race.
#[derive(Debug)]
pub struct FinishBoard {
    next_position: u32,
}

impl Default for FinishBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl FinishBoard {
    pub fn new() -> Self {
        Self { next_position: 1 }
    }

    /// Rebuild a board from persisted participants, continuing after the
    /// highest position already handed out.
    pub fn recover(participants: &[Participant]) -> Self {
        let max = participants
            .iter()
            .filter_map(|p| p.position)
            .max()
            .unwrap_or(0);
        Self {
            next_position: max + 1,
        }
    }

    /// Record a finish: stamp the timestamp and hand out the next position.
    ///
    /// Idempotent: a participant who already finished keeps their existing
    /// position and timestamp, and `None` is returned.
    pub fn record_finish(&mut self, participant: &mut Participant, now: u64) -> Option<u32> {
        if participant.is_finished() {
            return None;
        }
        participant.finished_at = Some(now);
        participant.progress = 100;
        let position = self.next_position;
        self.next_position += 1;
        participant.position = Some(position);
        Some(position)
    }

    /// Positions handed out so far.
    pub fn assigned(&self) -> u32 {
        self.next_position - 1
    }

    /// Assign trailing positions to everyone who never finished, ordered
    /// by progress descending, then join order. Called once when the room
    /// closes; non-finishers get a position but no finish timestamp.
    pub fn finalize(&mut self, participants: &mut [Participant]) {
        let mut trailing: Vec<usize> = participants
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_finished())
            .map(|(i, _)| i)
            .collect();
        trailing.sort_by(|&a, &b| {
            participants[b]
                .progress
                .cmp(&participants[a].progress)
                .then(participants[a].joined_at.cmp(&participants[b].joined_at))
        });
        for i in trailing {
            participants[i].position = Some(self.next_position);
            self.next_position += 1;
        }
    }
}

/// Freeze a closed room's participants into immutable results.
///
/// Finishers contribute their real elapsed time; non-finishers are stamped
/// with the full race duration. Results are ordered by position.
pub fn materialize_results(room: &Room, participants: &[Participant]) -> Vec<RaceResult> {
    let started = room.started_at.unwrap_or(room.created_at);
    let closed = room.finished_at.unwrap_or(started);
    let mut results: Vec<RaceResult> = participants
        .iter()
        .map(|p| RaceResult {
            room_id: room.id,
            identity: p.identity.clone(),
            display_name: p.display_name.clone(),
            language: room.language.clone(),
            wpm: p.wpm,
            accuracy: p.accuracy,
            time_taken_ms: p
                .finished_at
                .unwrap_or(closed)
                .saturating_sub(started),
            position: p.position.unwrap_or(u32::MAX),
            created_at: closed,
        })
        .collect();
    results.sort_by_key(|r| r.position);
    results
}
