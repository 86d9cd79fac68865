//! Matchmaking service - queue entries, pairing and match creation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::{CreateMatchError, KitRegistry, Match, MatchRegistry, QueueClass};
use crate::world::PlayerHost;

use super::queue::{MatchmakingQueue, QueueEntry};

/// Why a join was rejected. Rejections never change queue state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Already queued")]
    AlreadyQueued,

    #[error("Already in a match")]
    InMatch,

    #[error("Unknown kit '{0}'")]
    UnknownKit(String),

    #[error("Kit '{0}' is disabled")]
    KitDisabled(String),

    #[error("Kit '{0}' has no ranked queue")]
    RankedDisabled(String),
}

/// What happened after a successful join
#[derive(Debug)]
pub enum JoinOutcome {
    /// Waiting for an opponent
    Queued,
    /// Paired and moved into a match
    Matched(Arc<Match>),
    /// Paired but no arena was free; both players were sent back to the
    /// lobby and must join again
    NoArena,
    /// Paired, but the match was ended (e.g. by a disconnect) before it got
    /// going; teardown already sent both players back
    Aborted,
}

type BucketKey = (QueueClass, String);

/// Queue front end: one FIFO bucket per (queue class, kit)
pub struct QueueManager {
    entries: DashMap<Uuid, QueueEntry>,
    buckets: DashMap<BucketKey, MatchmakingQueue>,
    next_ticket: AtomicU64,
    kits: Arc<KitRegistry>,
    matches: Arc<MatchRegistry>,
    host: Arc<dyn PlayerHost>,
}

impl QueueManager {
    pub fn new(kits: Arc<KitRegistry>, matches: Arc<MatchRegistry>, host: Arc<dyn PlayerHost>) -> Self {
        Self {
            entries: DashMap::new(),
            buckets: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            kits,
            matches,
            host,
        }
    }

    fn bucket_key(class: QueueClass, kit: &str) -> BucketKey {
        (class, kit.to_ascii_lowercase())
    }

    /// Queue a player for a kit and try to pair them right away
    pub fn join(
        &self,
        player: Uuid,
        kit_name: &str,
        queue_class: QueueClass,
    ) -> Result<JoinOutcome, QueueError> {
        let kit = self
            .kits
            .get(kit_name)
            .ok_or_else(|| QueueError::UnknownKit(kit_name.to_string()))?;
        if !kit.enabled {
            return Err(QueueError::KitDisabled(kit.name.clone()));
        }
        if queue_class == QueueClass::Ranked && !kit.ranked {
            return Err(QueueError::RankedDisabled(kit.name.clone()));
        }
        if self.matches.is_in_match(player) {
            return Err(QueueError::InMatch);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let entry = QueueEntry::new(player, kit.clone(), queue_class, ticket);
        match self.entries.entry(player) {
            Entry::Occupied(_) => return Err(QueueError::AlreadyQueued),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }

        let key = Self::bucket_key(queue_class, &kit.name);
        let waiting = {
            let mut bucket = self.buckets.entry(key.clone()).or_default();
            bucket.enqueue(entry);
            bucket.len()
        };

        info!(
            player = %player,
            kit = %kit.name,
            queue = %queue_class,
            waiting,
            "Player joined queue"
        );

        Ok(self.try_pair(&key))
    }

    /// Remove a player from whatever queue they are in
    pub fn leave(&self, player: Uuid) -> bool {
        let Some((_, entry)) = self.entries.remove(&player) else {
            return false;
        };
        let key = Self::bucket_key(entry.queue_class, &entry.kit.name);
        if let Some(mut bucket) = self.buckets.get_mut(&key) {
            bucket.dequeue(player);
        }
        info!(player = %player, kit = %entry.kit.name, queue = %entry.queue_class, "Player left queue");
        true
    }

    pub fn get_entry(&self, player: Uuid) -> Option<QueueEntry> {
        self.entries.get(&player).map(|e| e.value().clone())
    }

    pub fn is_queued(&self, player: Uuid) -> bool {
        self.entries.contains_key(&player)
    }

    /// Waiting players in one bucket
    pub fn queue_size(&self, queue_class: QueueClass, kit: &str) -> usize {
        self.buckets
            .get(&Self::bucket_key(queue_class, kit))
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Waiting players across all buckets
    pub fn queued_count(&self) -> usize {
        self.entries.len()
    }

    /// Empty every queue; returns how many players were dropped
    pub fn clear(&self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.buckets.clear();
        dropped
    }

    /// Whether a bucket entry still matches the player's live queue entry
    fn is_current(&self, entry: &QueueEntry) -> bool {
        self.entries
            .get(&entry.player)
            .is_some_and(|live| live.ticket == entry.ticket)
    }

    /// Claim the two earliest live entries of a bucket
    fn take_pair(&self, key: &BucketKey) -> Option<(QueueEntry, QueueEntry)> {
        let mut bucket = self.buckets.get_mut(key)?;
        loop {
            bucket.retain(|e| self.is_current(e));
            let (a, b) = bucket.try_form_match()?;

            let claimed_a = self
                .entries
                .remove_if(&a.player, |_, live| live.ticket == a.ticket)
                .is_some();
            let claimed_b = self
                .entries
                .remove_if(&b.player, |_, live| live.ticket == b.ticket)
                .is_some();

            match (claimed_a, claimed_b) {
                (true, true) => return Some((a, b)),
                // one of the pair left concurrently; the other keeps its place
                (true, false) => self.restore_entry(&mut bucket, a),
                (false, true) => self.restore_entry(&mut bucket, b),
                (false, false) => {}
            }
        }
    }

    fn restore_entry(&self, bucket: &mut MatchmakingQueue, entry: QueueEntry) {
        if let Entry::Vacant(slot) = self.entries.entry(entry.player) {
            slot.insert(entry.clone());
            bucket.requeue_front(entry);
        }
    }

    fn try_pair(&self, key: &BucketKey) -> JoinOutcome {
        let Some((a, b)) = self.take_pair(key) else {
            return JoinOutcome::Queued;
        };

        debug!(p1 = %a.player, p2 = %b.player, kit = %a.kit.name, "Paired players");
        match self
            .matches
            .create(a.player, b.player, a.kit.clone(), a.queue_class)
        {
            Ok(m) => JoinOutcome::Matched(m),
            Err(CreateMatchError::EndedDuringSetup(id)) => {
                info!(match_id = %id, p1 = %a.player, p2 = %b.player, "Match aborted during setup");
                JoinOutcome::Aborted
            }
            Err(e) => {
                warn!(
                    kit = %a.kit.name,
                    p1 = %a.player,
                    p2 = %b.player,
                    error = %e,
                    "Pairing did not produce a match"
                );
                for player in [a.player, b.player] {
                    if !self.matches.is_in_match(player) {
                        self.matches.return_to_lobby(
                            player,
                            Some("No arena is available right now. Please queue again."),
                        );
                    }
                }
                JoinOutcome::NoArena
            }
        }
    }

    /// Drop queued players the host reports offline. Returns how many.
    pub fn sweep_offline(&self) -> usize {
        let offline: Vec<Uuid> = self
            .entries
            .iter()
            .map(|e| *e.key())
            .filter(|p| !self.host.is_online(*p))
            .collect();

        offline.into_iter().filter(|p| self.leave(*p)).count()
    }

    /// Periodic queue maintenance
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let dropped = self.sweep_offline();
            if dropped > 0 {
                info!(dropped, "Removed offline players from queue");
            }
        }
    }
}
