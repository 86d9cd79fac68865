//! Application state shared across routes

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::arena::store::ArenaStore;
use crate::arena::ArenaPool;
use crate::config::Config;
use crate::game::{EndReport, KitRegistry, MatchRegistry};
use crate::matchmaking::QueueManager;
use crate::util::rate_limit::{create_limiter, JoinRateLimiter, Limiter, ADMIN_RATE_LIMIT};
use crate::world::{BlockWorld, MemoryPlayers, PlayerHost, TracingListener};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<ArenaPool>,
    pub kits: Arc<KitRegistry>,
    pub matches: Arc<MatchRegistry>,
    pub queue: Arc<QueueManager>,
    /// Presence of the in-memory host, toggled through the player routes
    pub players: Arc<MemoryPlayers>,
    pub join_limiter: JoinRateLimiter,
    pub admin_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config, world: Arc<dyn BlockWorld>, players: Arc<MemoryPlayers>) -> Self {
        let config = Arc::new(config);
        let host: Arc<dyn PlayerHost> = players.clone();

        // Kits: file if configured, stock set otherwise
        let kits = match &config.kit_file {
            Some(path) => KitRegistry::load(path).unwrap_or_else(|e| {
                error!(path = %path.display(), error = %e, "Failed to load kits, using defaults");
                KitRegistry::with_defaults()
            }),
            None => KitRegistry::with_defaults(),
        };
        let kits = Arc::new(kits);

        let pool = Arc::new(ArenaPool::load(
            world,
            config.pool_settings(),
            ArenaStore::new(&config.arena_file),
        ));

        let matches = Arc::new(MatchRegistry::new(
            pool.clone(),
            host.clone(),
            config.match_settings(),
        ));
        matches.add_listener(Arc::new(TracingListener));

        let queue = Arc::new(QueueManager::new(kits.clone(), matches.clone(), host));

        Self {
            config,
            pool,
            kits,
            matches,
            queue,
            players,
            join_limiter: JoinRateLimiter::default(),
            admin_limiter: create_limiter(ADMIN_RATE_LIMIT),
        }
    }

    /// A player came online and lands in the lobby
    pub fn player_joined(&self, player: Uuid) {
        self.players.connect(player);
        if !self.matches.is_in_match(player) {
            self.matches.return_to_lobby(player, None);
        }
        info!(player = %player, "Player connected");
    }

    /// A player went offline: drop their queue entry and forfeit any match
    pub fn player_quit(&self, player: Uuid) -> Option<EndReport> {
        self.players.disconnect(player);
        self.queue.leave(player);
        info!(player = %player, "Player disconnected");
        self.matches.handle_disconnect(player)
    }

    /// End every match, empty the queues, wait for terrain restores and
    /// persist arenas
    pub async fn shutdown(&self) {
        let restores = self.matches.end_all();
        let dropped = self.queue.clear();
        info!(restores = restores.len(), dropped, "Ending matches for shutdown");

        for restore in restores {
            let arena = restore.arena.clone();
            let report = restore.finished().await;
            info!(arena = %arena, changed = report.changed, "Arena restored for shutdown");
        }

        if self.pool.persist() {
            info!(arenas = self.pool.len(), "Arenas saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::QueueClass;
    use crate::matchmaking::JoinOutcome;
    use crate::world::{BlockPos, Location, MemoryWorld};

    fn state(dir: &tempfile::TempDir) -> AppState {
        let config = Config::from_lookup(|key| match key {
            "ARENA_FILE" => Some(dir.path().join("arenas.json").display().to_string()),
            "RESTORE_BATCH_DELAY_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        AppState::new(config, Arc::new(MemoryWorld::new()), Arc::new(MemoryPlayers::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn quit_forfeits_and_shutdown_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state
            .pool
            .create("Alpha", Location::new(0.5, 65.0, 0.5), Location::new(9.5, 65.0, 0.5))
            .unwrap();
        state
            .pool
            .set_bounds("Alpha", BlockPos::new(0, 60, 0), BlockPos::new(10, 70, 10))
            .unwrap();

        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for p in [a, b, c] {
            state.player_joined(p);
        }
        state.queue.join(a, "NoDebuff", QueueClass::Ranked).unwrap();
        let outcome = state.queue.join(b, "NoDebuff", QueueClass::Ranked).unwrap();
        assert!(matches!(outcome, JoinOutcome::Matched(_)));
        assert!(matches!(
            state.queue.join(c, "NoDebuff", QueueClass::Ranked),
            Ok(JoinOutcome::Queued)
        ));

        let report = state.player_quit(a).unwrap();
        assert_eq!(report.result.map(|r| r.winner), Some(b));
        assert!(state.player_quit(a).is_none());

        state.shutdown().await;
        assert_eq!(state.queue.queued_count(), 0);
        assert_eq!(state.matches.active_matches(), 0);
        assert!(dir.path().join("arenas.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn rejoining_player_lands_in_lobby_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state
            .pool
            .create("Ring", Location::new(0.5, 65.0, 0.5), Location::new(4.5, 65.0, 0.5))
            .unwrap();
        state
            .pool
            .set_bounds("Ring", BlockPos::new(0, 60, 0), BlockPos::new(5, 70, 5))
            .unwrap();

        let (a, b, watcher) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for p in [a, b, watcher] {
            state.player_joined(p);
        }
        state.queue.join(a, "Sumo", QueueClass::Unranked).unwrap();
        state.queue.join(b, "Sumo", QueueClass::Unranked).unwrap();
        assert!(state.players.record(a).unwrap().movement_locked);

        state.player_quit(a).unwrap();
        state.player_joined(a);

        let record = state.players.record(a).unwrap();
        assert!(!record.movement_locked);
        assert_eq!(record.location, Some(state.matches.settings().lobby));
        assert!(state.players.can_see(watcher, a));
        assert!(state.players.can_see(a, watcher));
    }
}
