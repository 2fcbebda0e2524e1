//! Fan-out broadcast to room members with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each member gets an independent receiver that buffers up to `capacity`
//! messages; slow consumers drop frames and recover via a full state reload.
//!
//! Performance target: 1,000 messages to 100 members < 10ms
//! Reference: Patterson & Hennessy, Section 6.4 — Interconnection Networks

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, RaceMessage};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_members: usize,
}

/// Atomic channel stats — lock-free on the hot path.
///
/// Stats are tracked via atomics so that publish_raw() and publish()
/// never acquire a lock. Stats are read via snapshot().
struct AtomicChannelStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicChannelStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// The broadcast channel for a single room.
///
/// All connected members of the same room share one channel. Every
/// server-originated frame (progress changes, start, finish) is fanned
/// out to all of them.
pub struct RoomChannel {
    /// Broadcast channel sender (cloned per-room)
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connected members: participant id → display name
    members: Arc<RwLock<HashMap<Uuid, String>>>,

    /// Channel capacity (messages buffered per receiver)
    capacity: usize,

    /// Lock-free stats (atomics)
    atomic_stats: Arc<AtomicChannelStats>,
}

impl RoomChannel {
    /// Create a new room channel with the given buffer capacity.
    ///
    /// `capacity` determines how many messages can be buffered per member
    /// before lagging members start dropping messages (backpressure).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicChannelStats::new()),
        }
    }

    /// Add a member to this channel.
    ///
    /// Returns a receiver for this member to consume messages.
    pub async fn add_member(
        &self,
        participant_id: Uuid,
        display_name: &str,
    ) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut members = self.members.write().await;
        members.insert(participant_id, display_name.to_string());
        self.sender.subscribe()
    }

    /// Remove a member from this channel.
    pub async fn remove_member(&self, participant_id: &Uuid) -> Option<String> {
        let mut members = self.members.write().await;
        members.remove(participant_id)
    }

    /// Publish a message to all members.
    ///
    /// The message is encoded once and shared; returns the number of
    /// receivers that got it. Stats are tracked via atomics — no lock
    /// acquired on hot path.
    pub fn publish(&self, msg: &RaceMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        let arc_bytes = Arc::new(encoded);

        let receiver_count = self.sender.send(arc_bytes).unwrap_or(0);

        // Lock-free stats update
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);

        Ok(receiver_count)
    }

    /// Publish pre-encoded bytes directly (zero-copy fast path).
    /// Fully lock-free: tokio broadcast::send + atomic stats.
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Get the current member count.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Get all connected members as (participant id, display name) pairs.
    pub async fn members(&self) -> Vec<(Uuid, String)> {
        self.members
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }

    /// Check if a member is connected.
    pub async fn has_member(&self, participant_id: &Uuid) -> bool {
        self.members.read().await.contains_key(participant_id)
    }

    /// Get channel statistics (lock-free snapshot).
    pub async fn stats(&self) -> ChannelStats {
        let members = self.members.read().await;
        ChannelStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_members: members.len(),
        }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to this channel (raw receiver).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// Room feed: maps room IDs to broadcast channels.
///
/// Each room gets its own channel so that frames are isolated between
/// concurrent races.
pub struct RoomFeed {
    channels: Arc<RwLock<HashMap<Uuid, Arc<RoomChannel>>>>,
    default_capacity: usize,
}

impl RoomFeed {
    /// Create a new room feed.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get or create the channel for the given room.
    pub async fn get_or_create(&self, room_id: Uuid) -> Arc<RoomChannel> {
        // Fast path: read lock
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(&room_id) {
                return channel.clone();
            }
        }

        // Slow path: write lock to create
        let mut channels = self.channels.write().await;
        // Double-check after acquiring write lock
        if let Some(channel) = channels.get(&room_id) {
            return channel.clone();
        }

        let channel = Arc::new(RoomChannel::new(self.default_capacity));
        channels.insert(room_id, channel.clone());
        channel
    }

    /// Remove an empty room's channel.
    pub async fn remove_if_empty(&self, room_id: &Uuid) -> bool {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(room_id) {
            if channel.member_count().await == 0 {
                channels.remove(room_id);
                return true;
            }
        }
        false
    }

    /// Get the number of rooms with an active channel.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Get all room IDs with an active channel.
    pub async fn active_rooms(&self) -> Vec<Uuid> {
        self.channels.read().await.keys().cloned().collect()
    }
}
