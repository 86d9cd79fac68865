//! Battle arenas: definitions, lease accounting and terrain protection

pub mod pool;
pub mod restore;
pub mod snapshot;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::game::kit::Kit;
use crate::world::{BlockPos, BlockType, Bounds, Location};

pub use pool::{ArenaError, ArenaPool, PoolSettings};
pub use restore::{RestoreHandle, RestoreReport, RestoreSettings};
pub use snapshot::{CodecError, TerrainRange, TerrainSnapshot};

/// Which of the two spawn points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnSlot {
    First,
    Second,
}

/// Admin-editable part of an arena, persisted as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaDefinition {
    #[serde(default)]
    pub spawn1: Option<Location>,
    #[serde(default)]
    pub spawn2: Option<Location>,
    #[serde(default)]
    pub bounds: Option<Bounds>,
    /// Only this kit may lease the arena through the regular tiers
    #[serde(default)]
    pub restriction: Option<String>,
    /// At most one concurrent match
    #[serde(default)]
    pub single_lease: bool,
}

impl ArenaDefinition {
    pub fn spawns(&self) -> Option<(Location, Location)> {
        Some((self.spawn1?, self.spawn2?))
    }

    pub fn lease_cap(&self) -> u32 {
        if self.single_lease {
            1
        } else {
            u32::MAX
        }
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    active: u32,
    restoring: bool,
}

/// Result of giving a lease back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseRelease {
    /// Counter was already zero
    NotLeased,
    /// Other matches still hold the arena
    StillLeased(u32),
    /// Last lease returned; terrain must be restored
    Idle { restore: bool },
}

/// A named battle zone
pub struct Arena {
    name: String,
    definition: RwLock<ArenaDefinition>,
    terrain: RwLock<Arc<TerrainSnapshot>>,
    /// First pre-change block of every position touched during leases
    journal: Mutex<HashMap<BlockPos, BlockType>>,
    lease: Mutex<LeaseState>,
}

impl Arena {
    pub fn new(name: impl Into<String>, definition: ArenaDefinition) -> Self {
        Self {
            name: name.into(),
            definition: RwLock::new(definition),
            terrain: RwLock::new(Arc::new(TerrainSnapshot::new())),
            journal: Mutex::new(HashMap::new()),
            lease: Mutex::new(LeaseState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup key
    pub fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn definition(&self) -> ArenaDefinition {
        self.definition.read().clone()
    }

    pub fn spawns(&self) -> Option<(Location, Location)> {
        self.definition.read().spawns()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.definition.read().bounds
    }

    pub fn restriction(&self) -> Option<String> {
        self.definition.read().restriction.clone()
    }

    pub fn is_single_lease(&self) -> bool {
        self.definition.read().single_lease
    }

    pub fn terrain(&self) -> Arc<TerrainSnapshot> {
        self.terrain.read().clone()
    }

    pub fn active_leases(&self) -> u32 {
        self.lease.lock().active
    }

    pub fn is_restoring(&self) -> bool {
        self.lease.lock().restoring
    }

    /// Spawns and bounds set: usable for queued matches with terrain protection
    pub fn is_matchmaking_ready(&self) -> bool {
        let def = self.definition.read();
        def.spawns().is_some() && def.bounds.is_some()
    }

    /// Spawns set: usable for a lightweight fight without terrain protection
    pub fn is_duel_ready(&self) -> bool {
        self.definition.read().spawns().is_some()
    }

    /// Whether a fight under `kit` may use this arena
    pub fn is_compatible_with(&self, kit: &Kit) -> bool {
        !kit.rules().needs_exclusive_arena || self.is_single_lease()
    }

    /// Whether a lease would currently succeed
    pub fn has_capacity(&self) -> bool {
        let cap = self.definition.read().lease_cap();
        let lease = self.lease.lock();
        !lease.restoring && lease.active < cap
    }

    pub(crate) fn update_definition(&self, f: impl FnOnce(&mut ArenaDefinition)) {
        f(&mut self.definition.write());
    }

    pub(crate) fn replace_terrain(&self, snapshot: TerrainSnapshot) {
        *self.terrain.write() = Arc::new(snapshot);
        self.journal.lock().clear();
    }

    /// Take a lease if under the cap and not restoring. With `require_idle`
    /// the arena must additionally have no lease at all.
    pub(crate) fn try_lease(&self, require_idle: bool) -> bool {
        let cap = self.definition.read().lease_cap();
        let mut lease = self.lease.lock();
        if lease.restoring || lease.active >= cap || (require_idle && lease.active > 0) {
            return false;
        }
        lease.active += 1;
        true
    }

    pub(crate) fn release_lease(&self) -> LeaseRelease {
        let mut lease = self.lease.lock();
        if lease.active == 0 {
            return LeaseRelease::NotLeased;
        }
        lease.active -= 1;
        if lease.active > 0 {
            return LeaseRelease::StillLeased(lease.active);
        }

        let restore = self.definition.read().bounds.is_some() || !self.journal.lock().is_empty();
        lease.restoring = restore;
        LeaseRelease::Idle { restore }
    }

    pub(crate) fn finish_restore(&self) {
        self.lease.lock().restoring = false;
    }

    /// Record the block a position held before its first change during a lease
    pub(crate) fn journal_change(&self, pos: BlockPos, previous: BlockType) -> bool {
        let inside = self
            .definition
            .read()
            .bounds
            .is_some_and(|b| b.contains(&pos));
        if !inside || self.active_leases() == 0 {
            return false;
        }
        self.journal.lock().entry(pos).or_insert(previous);
        true
    }

    /// Snapshot entries plus journaled positions, draining the journal
    pub(crate) fn take_restore_plan(&self) -> Vec<(BlockPos, BlockType)> {
        let terrain = self.terrain();
        let journal = std::mem::take(&mut *self.journal.lock());

        let mut plan: Vec<(BlockPos, BlockType)> =
            terrain.iter().map(|(p, b)| (*p, b.clone())).collect();
        plan.extend(
            journal
                .into_iter()
                .filter(|(pos, _)| terrain.get(pos).is_none()),
        );
        plan
    }

    pub fn summary(&self) -> ArenaSummary {
        let def = self.definition();
        let lease = self.lease.lock();
        ArenaSummary {
            name: self.name.clone(),
            spawn1: def.spawn1,
            spawn2: def.spawn2,
            bounds: def.bounds,
            restriction: def.restriction,
            single_lease: def.single_lease,
            active_leases: lease.active,
            restoring: lease.restoring,
            protected_blocks: self.terrain.read().len(),
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.name)
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Read-only view for collaborators and the HTTP API
#[derive(Debug, Clone, Serialize)]
pub struct ArenaSummary {
    pub name: String,
    pub spawn1: Option<Location>,
    pub spawn2: Option<Location>,
    pub bounds: Option<Bounds>,
    pub restriction: Option<String>,
    pub single_lease: bool,
    pub active_leases: u32,
    pub restoring: bool,
    pub protected_blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::kit::MatchMode;

    fn full_definition(single_lease: bool) -> ArenaDefinition {
        ArenaDefinition {
            spawn1: Some(Location::new(0.5, 65.0, 0.5)),
            spawn2: Some(Location::new(20.5, 65.0, 0.5)),
            bounds: Some(Bounds::from_corners(
                BlockPos::new(-5, 60, -5),
                BlockPos::new(25, 80, 5),
            )),
            restriction: None,
            single_lease,
        }
    }

    #[test]
    fn single_lease_caps_at_one() {
        let arena = Arena::new("Alpha", full_definition(true));
        assert!(arena.try_lease(false));
        assert!(!arena.try_lease(false));
        assert_eq!(arena.active_leases(), 1);
    }

    #[test]
    fn release_never_goes_negative() {
        let arena = Arena::new("Alpha", full_definition(false));
        assert_eq!(arena.release_lease(), LeaseRelease::NotLeased);
        assert!(arena.try_lease(false));
        assert!(arena.try_lease(false));
        assert_eq!(arena.release_lease(), LeaseRelease::StillLeased(1));
        assert_eq!(arena.release_lease(), LeaseRelease::Idle { restore: true });
        assert_eq!(arena.active_leases(), 0);
        assert!(arena.is_restoring());
        assert!(!arena.try_lease(false), "restoring arenas are not leasable");
        arena.finish_restore();
        assert!(arena.try_lease(false));
    }

    #[test]
    fn arenas_without_bounds_skip_restore() {
        let mut def = full_definition(true);
        def.bounds = None;
        let arena = Arena::new("Lite", def);
        assert!(arena.is_duel_ready());
        assert!(!arena.is_matchmaking_ready());
        assert!(arena.try_lease(false));
        assert_eq!(arena.release_lease(), LeaseRelease::Idle { restore: false });
        assert!(!arena.is_restoring());
    }

    #[test]
    fn require_idle_rejects_shared_leases() {
        let arena = Arena::new("Shared", full_definition(false));
        assert!(arena.try_lease(true));
        assert!(!arena.try_lease(true));
        assert!(arena.try_lease(false));
    }

    #[test]
    fn build_kits_need_single_lease_arenas() {
        let build = Kit::new("BuildUHC", MatchMode::Build);
        let sumo = Kit::new("Sumo", MatchMode::Sumo);
        let shared = Arena::new("Shared", full_definition(false));
        let exclusive = Arena::new("Exclusive", full_definition(true));
        assert!(!shared.is_compatible_with(&build));
        assert!(exclusive.is_compatible_with(&build));
        assert!(shared.is_compatible_with(&sumo));
        assert!(exclusive.is_compatible_with(&sumo));
    }

    #[test]
    fn journal_only_tracks_leased_positions_inside_bounds() {
        let arena = Arena::new("Alpha", full_definition(true));
        let inside = BlockPos::new(0, 64, 0);
        assert!(!arena.journal_change(inside, BlockType::new("STONE")));

        assert!(arena.try_lease(false));
        assert!(arena.journal_change(inside, BlockType::new("STONE")));
        assert!(arena.journal_change(inside, BlockType::new("COBBLESTONE")));
        assert!(!arena.journal_change(BlockPos::new(100, 64, 0), BlockType::air()));

        let plan = arena.take_restore_plan();
        assert_eq!(plan, vec![(inside, BlockType::new("STONE"))]);
        assert!(arena.take_restore_plan().is_empty());
    }
}
