//! In-memory world and player host
//!
//! Used by the standalone server binary (players connect through HTTP) and by
//! tests as a fully observable collaborator.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::game::kit::Kit;

use super::{BlockPos, BlockType, BlockWorld, Bounds, Location, PlayerHost};

/// Sparse block store; unset positions read as air
#[derive(Default)]
pub struct MemoryWorld {
    blocks: DashMap<BlockPos, BlockType>,
    items: Mutex<Vec<BlockPos>>,
    writes: AtomicUsize,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a block as a player or world generator would
    pub fn set(&self, pos: BlockPos, block: &str) {
        let block = BlockType::new(block);
        if block.is_air() {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, block);
        }
    }

    pub fn fill(&self, bounds: &Bounds, block: &str) {
        for pos in bounds.iter() {
            self.set(pos, block);
        }
    }

    /// Drop an item entity at a position
    pub fn drop_item(&self, pos: BlockPos) {
        self.items.lock().push(pos);
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().len()
    }

    /// Number of silent writes performed by restores
    pub fn silent_writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockWorld for MemoryWorld {
    fn block_at(&self, pos: BlockPos) -> BlockType {
        self.blocks
            .get(&pos)
            .map(|b| b.value().clone())
            .unwrap_or_else(BlockType::air)
    }

    fn set_block_silent(&self, pos: BlockPos, block: &BlockType) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if block.is_air() {
            self.blocks.remove(&pos);
        } else {
            self.blocks.insert(pos, block.clone());
        }
    }

    fn clear_dropped_items(&self, bounds: &Bounds) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|pos| !bounds.contains(pos));
        before - items.len()
    }
}

/// Observable per-player state kept by [`MemoryPlayers`]
#[derive(Debug, Clone, Default)]
pub struct PlayerRecord {
    pub location: Option<Location>,
    pub kit: Option<String>,
    pub movement_locked: bool,
    pub resets: u32,
    pub messages: Vec<String>,
}

/// Player host backed by maps; presence is toggled with `connect`/`disconnect`
#[derive(Default)]
pub struct MemoryPlayers {
    online: DashSet<Uuid>,
    records: DashMap<Uuid, PlayerRecord>,
    /// (target, viewer) pairs currently hidden
    hidden: DashSet<(Uuid, Uuid)>,
}

impl MemoryPlayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, player: Uuid) {
        self.online.insert(player);
        self.records.entry(player).or_default();
    }

    pub fn disconnect(&self, player: Uuid) {
        self.online.remove(&player);
    }

    pub fn record(&self, player: Uuid) -> Option<PlayerRecord> {
        self.records.get(&player).map(|r| r.value().clone())
    }

    pub fn location(&self, player: Uuid) -> Option<Location> {
        self.records.get(&player).and_then(|r| r.location)
    }

    pub fn can_see(&self, viewer: Uuid, target: Uuid) -> bool {
        !self.hidden.contains(&(target, viewer))
    }

    pub fn hidden_pairs(&self) -> usize {
        self.hidden.len()
    }

    fn with_online(&self, player: Uuid, f: impl FnOnce(&mut PlayerRecord)) {
        if !self.online.contains(&player) {
            return;
        }
        let mut record = self.records.entry(player).or_default();
        f(record.value_mut());
    }
}

impl PlayerHost for MemoryPlayers {
    fn is_online(&self, player: Uuid) -> bool {
        self.online.contains(&player)
    }

    fn online_players(&self) -> Vec<Uuid> {
        self.online.iter().map(|p| *p).collect()
    }

    fn teleport_safely(&self, player: Uuid, to: &Location) {
        self.with_online(player, |r| r.location = Some(*to));
    }

    fn hide(&self, target: Uuid, viewer: Uuid) {
        if target != viewer {
            self.hidden.insert((target, viewer));
        }
    }

    fn show(&self, target: Uuid, viewer: Uuid) {
        self.hidden.remove(&(target, viewer));
    }

    fn apply_kit(&self, player: Uuid, kit: &Kit) {
        self.with_online(player, |r| r.kit = Some(kit.name.clone()));
    }

    fn reset_state(&self, player: Uuid) {
        self.with_online(player, |r| {
            r.kit = None;
            r.resets += 1;
        });
    }

    fn set_movement_locked(&self, player: Uuid, locked: bool) {
        self.with_online(player, |r| r.movement_locked = locked);
    }

    fn send_message(&self, player: Uuid, message: &str) {
        self.with_online(player, |r| r.messages.push(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_reads_air_by_default() {
        let world = MemoryWorld::new();
        let pos = BlockPos::new(1, 2, 3);
        assert!(world.block_at(pos).is_air());

        world.set(pos, "glass");
        assert_eq!(world.block_at(pos), BlockType::new("GLASS"));

        world.set_block_silent(pos, &BlockType::air());
        assert!(world.block_at(pos).is_air());
        assert_eq!(world.silent_writes(), 1);
    }

    #[test]
    fn clears_items_inside_bounds_only() {
        let world = MemoryWorld::new();
        world.drop_item(BlockPos::new(0, 0, 0));
        world.drop_item(BlockPos::new(50, 0, 0));
        let bounds = Bounds::from_corners(BlockPos::new(-5, -5, -5), BlockPos::new(5, 5, 5));
        assert_eq!(world.clear_dropped_items(&bounds), 1);
        assert_eq!(world.item_count(), 1);
    }

    #[test]
    fn offline_players_are_ignored() {
        let players = MemoryPlayers::new();
        let id = Uuid::new_v4();
        players.teleport_safely(id, &Location::new(0.0, 0.0, 0.0));
        assert!(players.location(id).is_none());

        players.connect(id);
        players.teleport_safely(id, &Location::new(1.0, 2.0, 3.0));
        assert_eq!(players.location(id), Some(Location::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn hide_and_show_pairs() {
        let players = MemoryPlayers::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        players.hide(a, b);
        assert!(!players.can_see(b, a));
        assert!(players.can_see(a, b));
        players.show(a, b);
        assert!(players.can_see(b, a));
    }
}
