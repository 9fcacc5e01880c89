//! Per-recipient buffer for events generated while the recipient was offline.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::models::OutboundEvent;

const SHARD_COUNT: usize = 16;

/// Default per-recipient capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub event: OutboundEvent,
    pub enqueued_at: DateTime<Utc>,
}

type ShardMap = HashMap<Uuid, VecDeque<QueuedMessage>>;

/// A locked shard. Holding it excludes every other queue operation for the
/// recipients that hash to it.
pub struct QueueShard<'a> {
    map: MutexGuard<'a, ShardMap>,
    capacity: usize,
}

impl QueueShard<'_> {
    /// Appends a message. When the recipient's queue is full the oldest message
    /// is dropped and returned.
    pub fn enqueue(
        &mut self,
        recipient: Uuid,
        event: OutboundEvent,
        now: DateTime<Utc>,
    ) -> Option<QueuedMessage> {
        let queue = self.map.entry(recipient).or_default();
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(QueuedMessage {
            event,
            enqueued_at: now,
        });

        if let Some(message) = &dropped {
            tracing::warn!(
                recipient = %recipient,
                capacity = self.capacity,
                dropped_event = message.event.name(),
                "Offline queue full, dropped oldest message"
            );
        }
        dropped
    }

    /// Puts events back at the front of the recipient's queue, in the given
    /// order, ahead of anything queued since. Past capacity the oldest are
    /// dropped; returns how many.
    pub fn requeue(
        &mut self,
        recipient: Uuid,
        events: Vec<OutboundEvent>,
        now: DateTime<Utc>,
    ) -> usize {
        if events.is_empty() {
            return 0;
        }
        let queue = self.map.entry(recipient).or_default();
        for event in events.into_iter().rev() {
            queue.push_front(QueuedMessage {
                event,
                enqueued_at: now,
            });
        }

        let mut dropped = 0;
        while queue.len() > self.capacity {
            queue.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(
                recipient = %recipient,
                capacity = self.capacity,
                dropped,
                "Offline queue full on requeue, dropped oldest messages"
            );
        }
        dropped
    }

    /// Removes and returns everything queued for the recipient, oldest first.
    pub fn drain(&mut self, recipient: Uuid) -> Vec<QueuedMessage> {
        self.map
            .remove(&recipient)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn depth(&self, recipient: Uuid) -> usize {
        self.map.get(&recipient).map_or(0, VecDeque::len)
    }
}

/// Sharded offline queue.
pub struct OfflineQueue {
    shards: Vec<Mutex<ShardMap>>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn shard_index(recipient: Uuid) -> usize {
        (recipient.as_u128() % SHARD_COUNT as u128) as usize
    }

    /// Locks the shard owning `recipient`.
    pub fn lock(&self, recipient: Uuid) -> QueueShard<'_> {
        let map = self.shards[Self::shard_index(recipient)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        QueueShard {
            map,
            capacity: self.capacity,
        }
    }

    pub fn enqueue(
        &self,
        recipient: Uuid,
        event: OutboundEvent,
        now: DateTime<Utc>,
    ) -> Option<QueuedMessage> {
        self.lock(recipient).enqueue(recipient, event, now)
    }

    pub fn drain(&self, recipient: Uuid) -> Vec<QueuedMessage> {
        self.lock(recipient).drain(recipient)
    }

    pub fn depth(&self, recipient: Uuid) -> usize {
        self.lock(recipient).depth(recipient)
    }

    /// Total queued messages across every recipient.
    pub fn total_depth(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .map(VecDeque::len)
                    .sum::<usize>()
            })
            .sum()
    }

    /// Drops messages enqueued more than `max_age` before `now`; returns how many.
    pub fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, queue| {
                let before = queue.len();
                queue.retain(|m| m.enqueued_at >= cutoff);
                removed += before - queue.len();
                !queue.is_empty()
            });
        }
        removed
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
