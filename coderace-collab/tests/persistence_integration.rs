//! Persistence tests: the store survives process restarts.
//!
//! Each test opens a store on a temp directory, writes through the public
//! API, drops the handle, reopens, and checks what came back.

use coderace_collab::leaderboard::{Leaderboard, Window};
use coderace_collab::model::{Identity, Participant, RaceResult, Room, RoomConfig};
use coderace_collab::storage::{RaceStore, StoreConfig, StoreError};
use coderace_core::snippet::{Difficulty, Snippet};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

fn make_room(code: &str) -> Room {
    let config = RoomConfig {
        name: None,
        language: "rust".into(),
        difficulty: Difficulty::Easy,
        max_players: 4,
        is_private: false,
    };
    Room::new(&config, code.into(), "let x = 1;".into(), None, 1_000)
}

fn make_result(name: &str, wpm: u32, position: u32, created_at: u64) -> RaceResult {
    RaceResult {
        room_id: Uuid::new_v4(),
        identity: Identity::Guest(name.into()),
        display_name: name.into(),
        language: "rust".into(),
        wpm,
        accuracy: 97,
        time_taken_ms: 45_000,
        position,
        created_at,
    }
}

#[test]
fn test_rooms_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let room = make_room("ABC123");

    {
        let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        store.put_room(&room).unwrap();
        assert!(store.reserve_code(&room.code, room.id).unwrap());
        store.sync().unwrap();
    }

    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let loaded = store.load_room(room.id).unwrap();
    assert_eq!(loaded, room);
    assert_eq!(store.room_id_for_code("abc123").unwrap(), room.id);
}

#[test]
fn test_code_reservation_is_first_writer_wins() {
    let dir = TempDir::new().unwrap();
    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    assert!(store.reserve_code("RACE01", first).unwrap());
    assert!(!store.reserve_code("race01", second).unwrap());
    assert_eq!(store.room_id_for_code("RACE01").unwrap(), first);
}

#[test]
fn test_unknown_code_lookup_fails() {
    let dir = TempDir::new().unwrap();
    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();

    let err = store.room_id_for_code("NOPE42").unwrap_err();
    assert!(matches!(err, StoreError::UnknownCode(_)));
}

#[test]
fn test_participants_scan_by_room_prefix() {
    let dir = TempDir::new().unwrap();
    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();

    let room_a = Uuid::new_v4();
    let room_b = Uuid::new_v4();
    for (room_id, name, joined_at) in [
        (room_a, "Alice", 100),
        (room_a, "Bob", 200),
        (room_b, "Other", 150),
    ] {
        let mut p = Participant::new(room_id, Identity::Guest(name.into()), None, joined_at);
        p.progress = 10;
        store.put_participant(&p).unwrap();
    }

    let loaded = store.load_participants(room_a).unwrap();
    assert_eq!(loaded.len(), 2);
    // Ordered by join time.
    assert_eq!(loaded[0].display_name, "Alice");
    assert_eq!(loaded[1].display_name, "Bob");
}

#[test]
fn test_result_sequence_recovers_after_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        // Identical timestamps force the sequence number to disambiguate.
        store.append_result(&make_result("a", 50, 1, 5_000)).unwrap();
        store.append_result(&make_result("b", 60, 2, 5_000)).unwrap();
        store.sync().unwrap();
    }

    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let seq = store.append_result(&make_result("c", 70, 1, 5_000)).unwrap();
    assert_eq!(seq, 2, "Sequence must continue past recovered keys");
    assert_eq!(store.result_count().unwrap(), 3);
}

#[test]
fn test_results_since_scans_forward_from_window_start() {
    let dir = TempDir::new().unwrap();
    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();

    store.append_result(&make_result("old", 40, 1, 1_000)).unwrap();
    store.append_result(&make_result("mid", 50, 1, 5_000)).unwrap();
    store.append_result(&make_result("new", 60, 1, 9_000)).unwrap();

    let recent = store.results_since(5_000).unwrap();
    let names: Vec<&str> = recent.iter().map(|r| r.display_name.as_str()).collect();
    assert_eq!(names, vec!["mid", "new"]);

    assert_eq!(store.results_since(0).unwrap().len(), 3);
    assert!(store.results_since(10_000).unwrap().is_empty());
}

#[test]
fn test_persist_finished_race_is_atomic_and_reloadable() {
    let dir = TempDir::new().unwrap();
    let room_id;

    {
        let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        let mut room = make_room("FINAL1");
        room_id = room.id;
        room.begin(2_000);
        room.close(60_000);

        let mut alice = Participant::new(room_id, Identity::Guest("Alice".into()), None, 1_500);
        alice.progress = 100;
        alice.finished_at = Some(50_000);
        alice.position = Some(1);
        let results = vec![make_result("Alice", 80, 1, 60_000)];

        store
            .persist_finished_race(&room, &[alice], &results)
            .unwrap();
        store.sync().unwrap();
    }

    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let room = store.load_room(room_id).unwrap();
    assert_eq!(room.finished_at, Some(60_000));

    let participants = store.load_participants(room_id).unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].position, Some(1));

    assert_eq!(store.result_count().unwrap(), 1);
}

#[test]
fn test_snippets_survive_reopen_and_filter() {
    let dir = TempDir::new().unwrap();
    let easy = Snippet::new("Hello", "rust", Difficulty::Easy, "fn main() {}");
    let hard = Snippet::new("Lifetimes", "rust", Difficulty::Hard, "fn f<'a>() {}");
    let go = Snippet::new("Hello", "go", Difficulty::Easy, "func main() {}");

    {
        let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        for s in [&easy, &hard, &go] {
            store.put_snippet(s).unwrap();
        }
        store.sync().unwrap();
    }

    let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    assert_eq!(store.snippet_count().unwrap(), 3);
    assert_eq!(store.load_snippet(easy.id).unwrap(), easy);

    let matching = store.snippets_matching("rust", Difficulty::Easy).unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].id, easy.id);
}

#[test]
fn test_leaderboard_over_reopened_store() {
    let dir = TempDir::new().unwrap();
    const DAY_MS: u64 = 24 * 60 * 60 * 1000;
    let now = 100 * DAY_MS;

    {
        let store = RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        // Inside the week.
        store
            .append_result(&make_result("recent_fast", 90, 1, now - DAY_MS))
            .unwrap();
        store
            .append_result(&make_result("recent_slow", 50, 2, now - 2 * DAY_MS))
            .unwrap();
        // Outside the week, inside the month.
        store
            .append_result(&make_result("last_month", 120, 1, now - 10 * DAY_MS))
            .unwrap();
        store.sync().unwrap();
    }

    let store = Arc::new(RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap());
    let leaderboard = Leaderboard::new(store);

    let week = leaderboard.top(Window::Week, 10, now).unwrap();
    let names: Vec<&str> = week.iter().map(|e| e.display_name.as_str()).collect();
    assert_eq!(names, vec!["recent_fast", "recent_slow"]);

    let month = leaderboard.top(Window::Month, 10, now).unwrap();
    assert_eq!(month[0].display_name, "last_month");
    assert_eq!(month.len(), 3);

    let all_time = leaderboard.top(Window::AllTime, 2, now).unwrap();
    assert_eq!(all_time.len(), 2);
    assert_eq!(all_time[0].wpm, 120);
}

#[test]
fn test_daily_stats_count_todays_races() {
    let dir = TempDir::new().unwrap();
    const DAY_MS: u64 = 24 * 60 * 60 * 1000;
    let now = 100 * DAY_MS + 12 * 60 * 60 * 1000; // midday

    let store = Arc::new(RaceStore::open(StoreConfig::for_testing(dir.path())).unwrap());
    store
        .append_result(&make_result("today_a", 50, 1, now - 1_000))
        .unwrap();
    store
        .append_result(&make_result("today_b", 75, 2, now - 2_000))
        .unwrap();
    store
        .append_result(&make_result("yesterday", 99, 1, now - DAY_MS))
        .unwrap();

    let leaderboard = Leaderboard::new(store);
    let stats = leaderboard.daily_stats(now).unwrap();
    assert_eq!(stats.races_today, 2);
    assert_eq!(stats.lines_typed, (50 * 2) / 5 + (75 * 2) / 5);
}
