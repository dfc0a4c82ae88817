//! Per-room event bus: ordered in-process multicast with monotonic
//! sequence ids, a bounded replay ring, and slow-consumer eviction.
//!
//! Publication assigns `seq = counter + 1` atomically with the history
//! append, so subscribers always observe strictly increasing sequence
//! ids. Delivery is at-least-once; clients deduplicate by `seq`.

use dashmap::DashMap;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{EventEnvelope, SeqId, ServerMessage};

/// Identifier of one subscribed connection.
pub type ConnId = Uuid;

/// Capacity of the per-room replay ring.
pub const HISTORY_CAPACITY: usize = 256;

/// Default per-subscriber outbound queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Subscriber {
    sender: mpsc::Sender<EventEnvelope>,
    /// Cancelled when the subscriber is evicted as a slow consumer; the
    /// owning connection observes this and closes with `slow_consumer`.
    kill: CancellationToken,
}

#[derive(Default)]
struct Room {
    seq: SeqId,
    history: VecDeque<(SeqId, ServerMessage)>,
    subscribers: HashMap<ConnId, Subscriber>,
}

impl Room {
    fn push_history(&mut self, seq: SeqId, message: ServerMessage) {
        self.history.push_back((seq, message));
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }
}

/// Process-wide registry of room channels.
pub struct EventBus {
    rooms: DashMap<String, Room>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Subscribe a connection to a room. Returns the room's current
    /// sequence high-water mark, which callers use as the `seq` of the
    /// subscription ack.
    pub fn subscribe(
        &self,
        room: &str,
        conn: ConnId,
        sender: mpsc::Sender<EventEnvelope>,
        kill: CancellationToken,
    ) -> SeqId {
        let mut entry = self.rooms.entry(room.to_string()).or_default();
        entry.subscribers.insert(conn, Subscriber { sender, kill });
        entry.seq
    }

    pub fn unsubscribe(&self, room: &str, conn: &ConnId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.subscribers.remove(conn);
        }
    }

    /// Assign the next sequence id, append to the replay ring, and fan
    /// out to every subscriber. Subscribers whose queue is full are
    /// evicted and their kill token cancelled.
    pub fn publish(&self, room: &str, message: ServerMessage) -> SeqId {
        let mut entry = self.rooms.entry(room.to_string()).or_default();
        entry.seq += 1;
        let seq = entry.seq;
        entry.push_history(seq, message.clone());

        let envelope = EventEnvelope::room(seq, message);
        // Stack-allocated for typical room sizes.
        let mut evicted: SmallVec<[ConnId; 8]> = SmallVec::new();
        for (conn, subscriber) in &entry.subscribers {
            match subscriber.sender.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%conn, room, seq, "Evicting slow consumer");
                    subscriber.kill.cancel();
                    evicted.push(*conn);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    evicted.push(*conn);
                }
            }
        }
        for conn in evicted {
            entry.subscribers.remove(&conn);
        }
        seq
    }

    /// Re-deliver every buffered event with `seq > last_seen`, in order,
    /// to a single subscriber.
    pub fn replay_since(&self, room: &str, conn: &ConnId, last_seen: SeqId) -> usize {
        let Some(entry) = self.rooms.get(room) else {
            return 0;
        };
        let Some(subscriber) = entry.subscribers.get(conn) else {
            return 0;
        };
        let mut delivered = 0;
        for (seq, message) in &entry.history {
            if *seq > last_seen {
                let envelope = EventEnvelope::room(*seq, message.clone());
                if subscriber.sender.try_send(envelope).is_err() {
                    break;
                }
                delivered += 1;
            }
        }
        delivered
    }

    /// Current sequence high-water mark for a room.
    pub fn high_water(&self, room: &str) -> SeqId {
        self.rooms.get(room).map_or(0, |entry| entry.seq)
    }

    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |entry| entry.subscribers.len())
    }

    /// Drop a room's channel entirely (lobby became inactive). Buffered
    /// history goes with it.
    pub fn drop_room(&self, room: &str) {
        if let Some((_, room)) = self.rooms.remove(room) {
            for subscriber in room.subscribers.values() {
                subscriber.kill.cancel();
            }
        }
    }
}

/// Shared handle used across the server.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    fn typing(room: &str, who: &str) -> ServerMessage {
        ServerMessage::PlayerTyping {
            lobby_code: room.to_string(),
            principal_id: who.to_string(),
        }
    }

    #[tokio::test]
    async fn sequence_ids_are_strictly_increasing() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Uuid::new_v4();
        let mark = bus.subscribe("ROOM1", conn, tx, CancellationToken::new());
        assert_eq!(mark, 0);

        for _ in 0..5 {
            bus.publish("ROOM1", typing("ROOM1", "p"));
        }

        let mut last = 0;
        for _ in 0..5 {
            let envelope = rx.recv().await.unwrap();
            assert!(envelope.seq > last);
            last = envelope.seq;
        }
        assert_eq!(bus.high_water("ROOM1"), 5);
    }

    #[tokio::test]
    async fn rooms_have_independent_counters() {
        let bus = EventBus::new();
        bus.publish("A", typing("A", "p"));
        bus.publish("A", typing("A", "p"));
        bus.publish("B", typing("B", "p"));
        assert_eq!(bus.high_water("A"), 2);
        assert_eq!(bus.high_water("B"), 1);
    }

    #[tokio::test]
    async fn replay_delivers_only_missed_events() {
        let bus = EventBus::new();
        for _ in 0..10 {
            bus.publish("ROOM1", typing("ROOM1", "p"));
        }

        let (tx, mut rx) = mpsc::channel(32);
        let conn = Uuid::new_v4();
        let mark = bus.subscribe("ROOM1", conn, tx, CancellationToken::new());
        assert_eq!(mark, 10);

        let delivered = bus.replay_since("ROOM1", &conn, 7);
        assert_eq!(delivered, 3);
        assert_eq!(rx.recv().await.unwrap().seq, 8);
        assert_eq!(rx.recv().await.unwrap().seq, 9);
        assert_eq!(rx.recv().await.unwrap().seq, 10);
    }

    #[tokio::test]
    async fn history_ring_is_bounded() {
        let bus = EventBus::new();
        for _ in 0..(HISTORY_CAPACITY + 40) {
            bus.publish("ROOM1", typing("ROOM1", "p"));
        }
        let (tx, mut rx) = mpsc::channel(HISTORY_CAPACITY + 64);
        let conn = Uuid::new_v4();
        bus.subscribe("ROOM1", conn, tx, CancellationToken::new());

        let delivered = bus.replay_since("ROOM1", &conn, 0);
        assert_eq!(delivered, HISTORY_CAPACITY);
        // Oldest surviving event is seq 41.
        assert_eq!(rx.recv().await.unwrap().seq, 41);
    }

    #[tokio::test]
    async fn slow_consumers_are_evicted_and_cancelled() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Uuid::new_v4();
        let kill = CancellationToken::new();
        bus.subscribe("ROOM1", conn, tx, kill.clone());

        bus.publish("ROOM1", typing("ROOM1", "p"));
        assert!(!kill.is_cancelled());
        // Queue (capacity 1) is now full; the next publish evicts.
        bus.publish("ROOM1", typing("ROOM1", "p"));
        assert!(kill.is_cancelled());
        assert_eq!(bus.subscriber_count("ROOM1"), 0);
    }

    #[tokio::test]
    async fn drop_room_cancels_subscribers() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(4);
        let conn = Uuid::new_v4();
        let kill = CancellationToken::new();
        bus.subscribe("ROOM1", conn, tx, kill.clone());

        bus.drop_room("ROOM1");
        assert!(kill.is_cancelled());
        assert_eq!(bus.high_water("ROOM1"), 0);
    }
}
