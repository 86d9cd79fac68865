//! Match state machine and registry of active matches
//!
//! Matches live in a single store keyed by a synthetic match id. The
//! `player -> match id` index is only written by [`MatchRegistry::create`] and
//! the teardown path, and teardown removes index entries before the arena
//! lease is returned.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arena::{Arena, ArenaPool, RestoreHandle};
use crate::util::task::Spawner;
use crate::world::{Location, MatchListener, PlayerHost};

use super::kit::Kit;
use super::{MatchResult, QueueClass};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MatchPhase {
    /// Created, players being moved in
    Pending,
    /// Counting down before the fight
    Countdown { remaining: u32 },
    /// Fight in progress
    Active,
    /// Torn down
    Ended,
}

/// Timing and lobby settings
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    /// Countdown length, one tick per second
    pub countdown_secs: u32,
    /// Ceiling after which a match is force-ended without a winner
    pub timeout: Duration,
    pub lobby: Location,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            timeout: Duration::from_secs(600),
            lobby: Location::new(0.5, 64.0, 0.5),
        }
    }
}

/// One 1v1 session
pub struct Match {
    pub id: Uuid,
    players: [Uuid; 2],
    kit: Arc<Kit>,
    queue_class: QueueClass,
    arena: Arc<Arena>,
    spawns: [Location; 2],
    phase: Mutex<MatchPhase>,
    created_at: DateTime<Utc>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    timers: Mutex<Vec<AbortHandle>>,
}

impl Match {
    fn new(
        players: [Uuid; 2],
        kit: Arc<Kit>,
        queue_class: QueueClass,
        arena: Arc<Arena>,
        spawns: [Location; 2],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            players,
            kit,
            queue_class,
            arena,
            spawns,
            phase: Mutex::new(MatchPhase::Pending),
            created_at: Utc::now(),
            started_at: Mutex::new(None),
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn players(&self) -> [Uuid; 2] {
        self.players
    }

    pub fn has_player(&self, player: Uuid) -> bool {
        self.players.contains(&player)
    }

    pub fn opponent_of(&self, player: Uuid) -> Option<Uuid> {
        match self.players {
            [a, b] if a == player => Some(b),
            [a, b] if b == player => Some(a),
            _ => None,
        }
    }

    pub fn spawn_of(&self, player: Uuid) -> Option<Location> {
        self.players
            .iter()
            .position(|p| *p == player)
            .map(|i| self.spawns[i])
    }

    pub fn kit(&self) -> &Arc<Kit> {
        &self.kit
    }

    pub fn queue_class(&self) -> QueueClass {
        self.queue_class
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn phase(&self) -> MatchPhase {
        *self.phase.lock()
    }

    pub fn is_started(&self) -> bool {
        self.phase() == MatchPhase::Active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    /// Seconds since the fight began (or since creation if it never did)
    pub fn elapsed_secs(&self) -> u64 {
        let since = self.started_at().unwrap_or(self.created_at);
        (Utc::now() - since).num_seconds().max(0) as u64
    }

    /// Pending/Countdown -> Countdown with the given remaining seconds
    fn set_countdown(&self, remaining: u32) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            MatchPhase::Pending | MatchPhase::Countdown { .. } => {
                *phase = MatchPhase::Countdown { remaining };
                true
            }
            _ => false,
        }
    }

    /// Pending/Countdown -> Active
    fn activate(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            MatchPhase::Pending | MatchPhase::Countdown { .. } => {
                *phase = MatchPhase::Active;
                *self.started_at.lock() = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Any -> Ended; false if it already was
    fn mark_ended(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == MatchPhase::Ended {
            return false;
        }
        *phase = MatchPhase::Ended;
        true
    }

    /// Keep a timer for teardown to cancel; aborted at once if teardown
    /// already happened
    fn add_timer(&self, handle: AbortHandle) {
        let mut timers = self.timers.lock();
        if self.phase() == MatchPhase::Ended {
            handle.abort();
            return;
        }
        timers.push(handle);
    }

    fn cancel_timers(&self) {
        for timer in self.timers.lock().drain(..) {
            timer.abort();
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            id: self.id,
            players: self.players,
            kit: self.kit.name.clone(),
            queue_class: self.queue_class,
            arena: self.arena.name().to_string(),
            phase: self.phase(),
            started: self.is_started(),
            created_at: self.created_at,
            started_at: self.started_at(),
        }
    }
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("id", &self.id)
            .field("players", &self.players)
            .field("kit", &self.kit.name)
            .field("arena", &self.arena.name())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Serializable view of a match
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub id: Uuid,
    pub players: [Uuid; 2],
    pub kit: String,
    pub queue_class: QueueClass,
    pub arena: String,
    pub phase: MatchPhase,
    pub started: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Why a match could not be created
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateMatchError {
    #[error("A player cannot fight themselves")]
    SamePlayer,

    #[error("Player {0} is already in a match")]
    AlreadyInMatch(Uuid),

    #[error("No arena available")]
    NoArenaAvailable,

    #[error("Match {0} ended before it started")]
    EndedDuringSetup(Uuid),
}

/// What a teardown did
pub struct EndReport {
    pub result: Option<MatchResult>,
    /// Present when this teardown returned the arena's last lease
    pub restore: Option<RestoreHandle>,
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, Arc<Match>>,
    by_player: DashMap<Uuid, Uuid>,
    pool: Arc<ArenaPool>,
    host: Arc<dyn PlayerHost>,
    listeners: RwLock<Vec<Arc<dyn MatchListener>>>,
    settings: MatchSettings,
    spawner: Spawner,
}

impl MatchRegistry {
    pub fn new(pool: Arc<ArenaPool>, host: Arc<dyn PlayerHost>, settings: MatchSettings) -> Self {
        Self {
            matches: DashMap::new(),
            by_player: DashMap::new(),
            pool,
            host,
            listeners: RwLock::new(Vec::new()),
            settings,
            spawner: Spawner::current(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn MatchListener>) {
        self.listeners.write().push(listener);
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn get_match(&self, player: Uuid) -> Option<Arc<Match>> {
        let id = *self.by_player.get(&player)?;
        self.matches.get(&id).map(|m| m.value().clone())
    }

    pub fn is_in_match(&self, player: Uuid) -> bool {
        self.get_match(player).is_some()
    }

    pub fn get_all_active_matches(&self) -> Vec<Arc<Match>> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    /// Whether this exact match object is still registered
    pub fn is_indexed(&self, m: &Arc<Match>) -> bool {
        self.matches
            .get(&m.id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), m))
    }

    /// Pair two players into a new match.
    ///
    /// Leases an arena, indexes both players, publishes the match, moves the
    /// players in and starts the countdown. On failure nothing is indexed and
    /// no lease is held. If the match is torn down while the players are
    /// being moved in, both go back to the lobby and
    /// [`CreateMatchError::EndedDuringSetup`] is returned.
    pub fn create(
        self: &Arc<Self>,
        p1: Uuid,
        p2: Uuid,
        kit: Arc<Kit>,
        queue_class: QueueClass,
    ) -> Result<Arc<Match>, CreateMatchError> {
        if p1 == p2 {
            return Err(CreateMatchError::SamePlayer);
        }
        for player in [p1, p2] {
            if self.by_player.contains_key(&player) {
                return Err(CreateMatchError::AlreadyInMatch(player));
            }
        }

        let arena = self
            .pool
            .lease(&kit)
            .ok_or(CreateMatchError::NoArenaAvailable)?;
        let Some((spawn1, spawn2)) = arena.spawns() else {
            // spawns were cleared between selection and now
            self.pool.release(&arena);
            return Err(CreateMatchError::NoArenaAvailable);
        };

        let m = Arc::new(Match::new(
            [p1, p2],
            kit,
            queue_class,
            arena.clone(),
            [spawn1, spawn2],
        ));

        if let Err(player) = self.index_players(&m) {
            self.pool.release(&arena);
            return Err(CreateMatchError::AlreadyInMatch(player));
        }
        self.matches.insert(m.id, m.clone());

        info!(
            match_id = %m.id,
            arena = %arena.name(),
            kit = %m.kit.name,
            queue = %queue_class,
            p1 = %p1,
            p2 = %p2,
            "Created new match"
        );

        self.prepare_players(&m);
        if !self.is_indexed(&m) {
            // teardown ran mid-setup and may have lobbied players we then moved
            warn!(match_id = %m.id, "Match ended during setup");
            for player in m.players {
                self.return_to_lobby(player, None);
            }
            return Err(CreateMatchError::EndedDuringSetup(m.id));
        }
        self.begin_countdown(&m);
        self.schedule_timeout(&m);
        Ok(m)
    }

    /// Claim both index slots or neither
    fn index_players(&self, m: &Arc<Match>) -> Result<(), Uuid> {
        let mut claimed = Vec::with_capacity(2);
        let mut conflict = None;
        for player in m.players {
            let inserted = match self.by_player.entry(player) {
                Entry::Vacant(slot) => {
                    slot.insert(m.id);
                    true
                }
                Entry::Occupied(_) => false,
            };
            if !inserted {
                conflict = Some(player);
                break;
            }
            claimed.push(player);
        }

        match conflict {
            Some(player) => {
                for p in claimed {
                    self.by_player.remove_if(&p, |_, id| *id == m.id);
                }
                Err(player)
            }
            None => Ok(()),
        }
    }

    fn prepare_players(&self, m: &Arc<Match>) {
        let lock = m.kit.rules().lock_movement_in_countdown && self.settings.countdown_secs > 0;
        let online = self.host.online_players();

        for (player, spawn) in m.players.iter().zip(m.spawns.iter()) {
            if !self.is_indexed(m) {
                return;
            }
            self.host.teleport_safely(*player, spawn);
            self.host.reset_state(*player);
            self.host.apply_kit(*player, &m.kit);
            if lock {
                self.host.set_movement_locked(*player, true);
            }

            for other in online.iter().filter(|o| !m.has_player(**o)) {
                self.host.hide(*player, *other);
                self.host.hide(*other, *player);
            }
        }

        let [p1, p2] = m.players;
        self.host.show(p1, p2);
        self.host.show(p2, p1);
    }

    fn begin_countdown(self: &Arc<Self>, m: &Arc<Match>) {
        let secs = self.settings.countdown_secs;
        if secs == 0 {
            self.start(m);
            return;
        }
        m.set_countdown(secs);

        let registry = self.clone();
        let target = m.clone();
        let task = self.spawner.spawn(async move {
            for remaining in (1..=secs).rev() {
                if !registry.is_indexed(&target) || !target.set_countdown(remaining) {
                    debug!(match_id = %target.id, "Countdown stopped, match gone");
                    return;
                }
                registry.message_players(&target, &format!("Match starts in {remaining}..."));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if registry.is_indexed(&target) {
                registry.start(&target);
            }
        });
        m.add_timer(task.abort_handle());
    }

    /// Countdown -> Active
    fn start(&self, m: &Arc<Match>) {
        if !m.activate() {
            return;
        }
        if m.kit.rules().lock_movement_in_countdown {
            for player in m.players {
                self.host.set_movement_locked(player, false);
            }
        }
        self.message_players(m, "Fight!");
        info!(match_id = %m.id, "Match started");
    }

    fn schedule_timeout(self: &Arc<Self>, m: &Arc<Match>) {
        let registry = self.clone();
        let target = m.clone();
        let timeout = self.settings.timeout;
        let task = self.spawner.spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.is_indexed(&target) {
                warn!(match_id = %target.id, "Match timed out, ending without a winner");
                registry.end_match(&target, None);
            }
        });
        m.add_timer(task.abort_handle());
    }

    /// Tear a match down. Returns `None` if it was already ended, so a second
    /// call (e.g. a timeout right after a forfeit) changes nothing.
    ///
    /// A `winner` that is not a participant is treated as no winner.
    pub fn end_match(&self, m: &Arc<Match>, winner: Option<Uuid>) -> Option<EndReport> {
        let removed = self
            .matches
            .remove_if(&m.id, |_, current| Arc::ptr_eq(current, m));
        if removed.is_none() {
            debug!(match_id = %m.id, "Match already ended");
            return None;
        }
        for player in m.players {
            self.by_player.remove_if(&player, |_, id| *id == m.id);
        }
        m.mark_ended();
        m.cancel_timers();

        let restore = self.pool.release(&m.arena);

        let winner = winner.filter(|w| {
            let valid = m.has_player(*w);
            if !valid {
                warn!(match_id = %m.id, winner = %w, "Ignoring winner outside the match");
            }
            valid
        });

        for player in m.players {
            let message = match winner {
                Some(w) if w == player => "You won the match!",
                Some(_) => "You lost the match.",
                None => "The match ended with no winner.",
            };
            self.return_to_lobby(player, Some(message));
        }

        let result = winner.and_then(|w| {
            Some(MatchResult {
                match_id: m.id,
                winner: w,
                loser: m.opponent_of(w)?,
                kit: m.kit.name.clone(),
                queue_class: m.queue_class,
                arena: m.arena.name().to_string(),
                duration_secs: m.elapsed_secs(),
            })
        });
        self.notify(m, result.as_ref());

        info!(
            match_id = %m.id,
            arena = %m.arena.name(),
            winner = ?winner,
            "Match ended"
        );

        Some(EndReport { result, restore })
    }

    /// Make a player visible to everyone outside a match again and, if they
    /// are online, reset them and send them to the lobby
    pub fn return_to_lobby(&self, player: Uuid, message: Option<&str>) {
        for other in self.host.online_players() {
            if other == player || self.is_in_match(other) {
                continue;
            }
            self.host.show(player, other);
            self.host.show(other, player);
        }
        self.host.set_movement_locked(player, false);
        if !self.host.is_online(player) {
            return;
        }
        self.host.reset_state(player);
        self.host.teleport_safely(player, &self.settings.lobby);
        if let Some(message) = message {
            self.host.send_message(player, message);
        }
    }

    fn notify(&self, m: &Match, result: Option<&MatchResult>) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            if let Some(result) = result {
                if let Err(e) = listener.on_match_end(result) {
                    warn!(match_id = %m.id, error = %e, "Match listener failed");
                }
            }
            listener.on_match_cleared(m.id, m.players);
        }
    }

    fn message_players(&self, m: &Match, message: &str) {
        for player in m.players {
            self.host.send_message(player, message);
        }
    }

    /// The player gives up; the opponent wins
    pub fn forfeit(&self, player: Uuid) -> Option<EndReport> {
        let m = self.get_match(player)?;
        info!(match_id = %m.id, player = %player, "Player forfeited");
        self.end_match(&m, m.opponent_of(player))
    }

    /// The player left the server mid-match; the opponent wins
    pub fn handle_disconnect(&self, player: Uuid) -> Option<EndReport> {
        let m = self.get_match(player)?;
        info!(match_id = %m.id, player = %player, "Player disconnected mid-match");
        self.end_match(&m, m.opponent_of(player))
    }

    /// End every match without a winner (shutdown). Returns pending restores.
    pub fn end_all(&self) -> Vec<RestoreHandle> {
        self.get_all_active_matches()
            .iter()
            .filter_map(|m| self.end_match(m, None))
            .filter_map(|report| report.restore)
            .collect()
    }
}
