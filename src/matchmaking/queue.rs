//! Per-bucket FIFO queue

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::game::{Kit, QueueClass};

/// A waiting player
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub player: Uuid,
    #[serde(serialize_with = "kit_name")]
    pub kit: Arc<Kit>,
    pub queue_class: QueueClass,
    pub enqueued_at: DateTime<Utc>,
    /// Insertion sequence, unique per join
    #[serde(skip)]
    pub(crate) ticket: u64,
}

fn kit_name<S: serde::Serializer>(kit: &Arc<Kit>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&kit.name)
}

impl QueueEntry {
    pub fn new(player: Uuid, kit: Arc<Kit>, queue_class: QueueClass, ticket: u64) -> Self {
        Self {
            player,
            kit,
            queue_class,
            enqueued_at: Utc::now(),
            ticket,
        }
    }

    /// How long this player has been waiting
    pub fn wait_secs(&self) -> i64 {
        (Utc::now() - self.enqueued_at).num_seconds()
    }
}

/// Waiting players of one (queue class, kit) bucket in join order
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueueEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the back of the queue
    pub fn enqueue(&mut self, entry: QueueEntry) {
        // Remove if already in queue (rejoin)
        self.queue.retain(|e| e.player != entry.player);
        self.queue.push_back(entry);
    }

    /// Put a player back at the head, ahead of later joiners
    pub fn requeue_front(&mut self, entry: QueueEntry) {
        self.queue.retain(|e| e.player != entry.player);
        self.queue.push_front(entry);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, player: Uuid) -> Option<QueueEntry> {
        let pos = self.queue.iter().position(|e| e.player == player)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, player: &Uuid) -> bool {
        self.queue.iter().any(|e| &e.player == player)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queue.iter()
    }

    /// Drop entries that no longer count
    pub fn retain(&mut self, keep: impl FnMut(&QueueEntry) -> bool) {
        self.queue.retain(keep);
    }

    /// Take the two earliest entries, or nothing if fewer than two wait
    pub fn try_form_match(&mut self) -> Option<(QueueEntry, QueueEntry)> {
        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some((first, second))
    }
}
