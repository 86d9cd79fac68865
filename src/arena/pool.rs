//! Arena pool - arena definitions, leasing and restore scheduling

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::game::kit::Kit;
use crate::util::task::Spawner;
use crate::world::{BlockPos, BlockType, BlockWorld, Bounds, Location};

use super::restore::{restore_terrain, RestoreHandle, RestoreSettings};
use super::snapshot::TerrainSnapshot;
use super::store::{ArenaStore, StoredArena};
use super::{Arena, ArenaDefinition, ArenaSummary, LeaseRelease, SpawnSlot};

/// Pool behaviour knobs
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub restore: RestoreSettings,
    /// Allow the last-resort tier: any idle arena with spawns, ignoring
    /// bounds, restriction and build compatibility
    pub relaxed_fallback: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            restore: RestoreSettings::default(),
            relaxed_fallback: true,
        }
    }
}

/// Arena admin errors
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Arena '{0}' does not exist")]
    NotFound(String),

    #[error("Arena '{0}' already exists")]
    AlreadyExists(String),

    #[error("Arena '{0}' is in use")]
    InUse(String),

    #[error("Invalid arena name '{0}'")]
    InvalidName(String),
}

/// Owns every arena and hands out leases
pub struct ArenaPool {
    arenas: DashMap<String, Arc<Arena>>,
    world: Arc<dyn BlockWorld>,
    settings: PoolSettings,
    store: Option<ArenaStore>,
    /// Arena file entries that failed to parse, written back on every save
    unreadable: Mutex<BTreeMap<String, Value>>,
    spawner: Spawner,
}

impl ArenaPool {
    /// Empty, unpersisted pool. When built inside a tokio runtime, restores
    /// are spawned onto that runtime even if `release` runs on another thread.
    pub fn new(world: Arc<dyn BlockWorld>, settings: PoolSettings) -> Self {
        Self {
            arenas: DashMap::new(),
            world,
            settings,
            store: None,
            unreadable: Mutex::new(BTreeMap::new()),
            spawner: Spawner::current(),
        }
    }

    /// Pool backed by an arena file.
    ///
    /// Unreadable entries are skipped and kept for the next save; malformed
    /// terrain tokens are skipped per token. A file that is not readable at
    /// all is moved aside so saving cannot destroy it, and if that fails the
    /// pool runs without persistence.
    pub fn load(world: Arc<dyn BlockWorld>, settings: PoolSettings, store: ArenaStore) -> Self {
        let mut pool = Self::new(world, settings);

        match store.load() {
            Ok(loaded) => {
                if !loaded.unreadable.is_empty() {
                    warn!(
                        path = %store.path().display(),
                        skipped = loaded.unreadable.len(),
                        "Some arenas could not be loaded"
                    );
                }
                *pool.unreadable.get_mut() = loaded.unreadable;
                for (name, entry) in loaded.arenas {
                    let arena = Arena::new(name.clone(), entry.definition);
                    let decoded = TerrainSnapshot::decode(&entry.terrain);
                    if decoded.skipped > 0 {
                        warn!(arena = %name, skipped = decoded.skipped, "Arena terrain partially loaded");
                    }
                    arena.replace_terrain(decoded.snapshot);
                    pool.arenas.insert(arena.key(), Arc::new(arena));
                }
                info!(path = %store.path().display(), arenas = pool.arenas.len(), "Loaded arenas");
            }
            Err(e) => {
                error!(path = %store.path().display(), error = %e, "Failed to load arenas");
                match store.quarantine() {
                    Ok(aside) => {
                        warn!(moved_to = %aside.display(), "Unreadable arena file moved aside");
                    }
                    Err(e) => {
                        error!(error = %e, "Could not move arena file aside, arena changes will not be saved");
                        return pool;
                    }
                }
            }
        }

        pool.store = Some(store);
        pool
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    fn require(&self, name: &str) -> Result<Arc<Arena>, ArenaError> {
        self.get_arena(name)
            .ok_or_else(|| ArenaError::NotFound(name.to_string()))
    }

    pub fn get_arena(&self, name: &str) -> Option<Arc<Arena>> {
        self.arenas.get(&Self::key(name)).map(|a| a.value().clone())
    }

    /// Usable for matchmaking and not at its lease cap
    pub fn is_available(&self, name: &str) -> bool {
        self.get_arena(name)
            .is_some_and(|a| a.is_matchmaking_ready() && a.has_capacity())
    }

    /// All arenas, sorted by name
    pub fn arenas(&self) -> Vec<Arc<Arena>> {
        let mut arenas: Vec<Arc<Arena>> = self.arenas.iter().map(|a| a.value().clone()).collect();
        arenas.sort_by_key(|a| a.key());
        arenas
    }

    pub fn summaries(&self) -> Vec<ArenaSummary> {
        self.arenas().iter().map(|a| a.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }

    /// Lease an arena for a fight under `kit`.
    ///
    /// Tiers, first hit wins:
    /// 1. matchmaking-ready arena restricted to this kit
    /// 2. matchmaking-ready unrestricted arena
    /// 3. (relaxed fallback) any arena with spawns and no lease at all
    ///
    /// Tiers 1 and 2 also require build compatibility. `None` means no
    /// arena is free, which callers treat as a normal outcome.
    pub fn lease(&self, kit: &Kit) -> Option<Arc<Arena>> {
        let arenas = self.arenas();

        let restricted = arenas.iter().find(|a| {
            a.restriction()
                .is_some_and(|r| r.eq_ignore_ascii_case(&kit.name))
                && a.is_matchmaking_ready()
                && a.is_compatible_with(kit)
                && a.try_lease(false)
        });
        if let Some(arena) = restricted {
            info!(arena = %arena.name(), kit = %kit.name, "Leased kit arena");
            return Some(arena.clone());
        }

        let open = arenas.iter().find(|a| {
            a.restriction().is_none()
                && a.is_matchmaking_ready()
                && a.is_compatible_with(kit)
                && a.try_lease(false)
        });
        if let Some(arena) = open {
            info!(arena = %arena.name(), kit = %kit.name, "Leased arena");
            return Some(arena.clone());
        }

        if self.settings.relaxed_fallback {
            let fallback = arenas
                .iter()
                .find(|a| a.is_duel_ready() && a.try_lease(true));
            if let Some(arena) = fallback {
                warn!(
                    arena = %arena.name(),
                    kit = %kit.name,
                    "Leased arena through relaxed fallback"
                );
                return Some(arena.clone());
            }
        }

        None
    }

    /// Give a lease back. Once the last lease is returned the arena's terrain
    /// is restored in the background; the returned handle can be awaited.
    pub fn release(&self, arena: &Arc<Arena>) -> Option<RestoreHandle> {
        match arena.release_lease() {
            LeaseRelease::NotLeased => {
                warn!(arena = %arena.name(), "Release of an arena with no active lease");
                None
            }
            LeaseRelease::StillLeased(remaining) => {
                info!(arena = %arena.name(), remaining, "Arena lease released");
                None
            }
            LeaseRelease::Idle { restore: false } => {
                info!(arena = %arena.name(), "Arena idle");
                None
            }
            LeaseRelease::Idle { restore: true } => Some(self.schedule_restore(arena.clone())),
        }
    }

    fn schedule_restore(&self, arena: Arc<Arena>) -> RestoreHandle {
        let world = self.world.clone();
        let settings = self.settings.restore;
        let name = arena.name().to_string();

        let task = self.spawner.spawn(async move {
            let plan = arena.take_restore_plan();
            let report = restore_terrain(world, plan, arena.bounds(), settings).await;
            arena.finish_restore();
            info!(
                arena = %arena.name(),
                checked = report.checked,
                changed = report.changed,
                items = report.items_cleared,
                "Arena restored"
            );
            report
        });

        RestoreHandle { arena: name, task }
    }

    /// Log a block change made during a fight so restore can revert it.
    /// Only positions inside a leased arena's bounds are tracked.
    pub fn record_block_change(&self, arena: &str, pos: BlockPos, previous: BlockType) -> bool {
        self.get_arena(arena)
            .is_some_and(|a| a.journal_change(pos, previous))
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Create an arena with both spawns
    pub fn create(
        &self,
        name: &str,
        spawn1: Location,
        spawn2: Location,
    ) -> Result<Arc<Arena>, ArenaError> {
        let name = name.trim();
        let valid = !name.is_empty()
            && name.len() <= 32
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ArenaError::InvalidName(name.to_string()));
        }

        let arena = Arc::new(Arena::new(
            name,
            ArenaDefinition {
                spawn1: Some(spawn1),
                spawn2: Some(spawn2),
                ..Default::default()
            },
        ));

        match self.arenas.entry(Self::key(name)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ArenaError::AlreadyExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(arena.clone());
            }
        }

        info!(arena = %name, "Arena created");
        self.persist();
        Ok(arena)
    }

    pub fn set_spawn(&self, name: &str, slot: SpawnSlot, at: Location) -> Result<(), ArenaError> {
        let arena = self.require(name)?;
        arena.update_definition(|def| match slot {
            SpawnSlot::First => def.spawn1 = Some(at),
            SpawnSlot::Second => def.spawn2 = Some(at),
        });
        self.persist();
        Ok(())
    }

    /// Replace the bounds and capture a fresh snapshot of them. Returns the
    /// number of protected blocks.
    pub fn set_bounds(&self, name: &str, pos1: BlockPos, pos2: BlockPos) -> Result<usize, ArenaError> {
        let arena = self.require(name)?;
        if arena.active_leases() > 0 || arena.is_restoring() {
            return Err(ArenaError::InUse(arena.name().to_string()));
        }

        let bounds = Bounds::from_corners(pos1, pos2);
        let snapshot = TerrainSnapshot::capture(&bounds, self.world.as_ref());
        let captured = snapshot.len();

        arena.update_definition(|def| def.bounds = Some(bounds));
        arena.replace_terrain(snapshot);

        info!(
            arena = %arena.name(),
            volume = bounds.volume(),
            captured,
            "Arena bounds set"
        );
        self.persist();
        Ok(captured)
    }

    pub fn set_restriction(&self, name: &str, kit: Option<String>) -> Result<(), ArenaError> {
        let arena = self.require(name)?;
        arena.update_definition(|def| def.restriction = kit);
        self.persist();
        Ok(())
    }

    pub fn set_single_lease(&self, name: &str, single_lease: bool) -> Result<(), ArenaError> {
        let arena = self.require(name)?;
        if single_lease && arena.active_leases() > 1 {
            return Err(ArenaError::InUse(arena.name().to_string()));
        }
        arena.update_definition(|def| def.single_lease = single_lease);
        self.persist();
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), ArenaError> {
        let arena = self.require(name)?;
        if arena.active_leases() > 0 || arena.is_restoring() {
            return Err(ArenaError::InUse(arena.name().to_string()));
        }
        self.arenas.remove(&arena.key());
        info!(arena = %arena.name(), "Arena deleted");
        self.persist();
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write every arena to the arena file. Failures are logged; returns
    /// whether the write succeeded (always true without a store).
    pub fn persist(&self) -> bool {
        let Some(store) = &self.store else {
            return true;
        };

        let entries: BTreeMap<String, StoredArena> = self
            .arenas()
            .iter()
            .map(|a| {
                (
                    a.name().to_string(),
                    StoredArena {
                        definition: a.definition(),
                        terrain: a.terrain().encode(),
                    },
                )
            })
            .collect();

        let unreadable = self.unreadable.lock();
        match store.save(entries, &unreadable) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %store.path().display(), error = %e, "Failed to save arenas");
                false
            }
        }
    }
}
