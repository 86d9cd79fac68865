//! World and player collaborators
//!
//! The duel core never touches the game host directly. Block access, player
//! presence/visibility and match-end notifications all go through the traits
//! in this module, so the host integration (or the in-memory stand-ins in
//! [`memory`]) can be swapped without touching arena or match logic.

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::kit::Kit;
use crate::game::MatchResult;

pub use memory::{MemoryPlayers, MemoryWorld};

/// Integer block coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// A precise position players can be teleported to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Block containing this location
    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// Material name of a block, upper-case (`STONE`, `OAK_PLANKS`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(String);

/// Terrain that is never captured: it is either part of the arena's natural
/// landscape or a fluid that would re-flow on its own.
const NATURAL_BLOCKS: &[&str] = &[
    "STONE",
    "GRANITE",
    "DIORITE",
    "ANDESITE",
    "DEEPSLATE",
    "BEDROCK",
    "DIRT",
    "COARSE_DIRT",
    "GRASS_BLOCK",
    "GRASS",
    "TALL_GRASS",
    "PODZOL",
    "MYCELIUM",
    "SAND",
    "RED_SAND",
    "SANDSTONE",
    "GRAVEL",
    "CLAY",
    "SNOW",
    "SNOW_BLOCK",
    "ICE",
    "WATER",
    "LAVA",
    "COAL_ORE",
    "IRON_ORE",
    "GOLD_ORE",
    "OAK_LOG",
    "BIRCH_LOG",
    "SPRUCE_LOG",
    "JUNGLE_LOG",
    "OAK_LEAVES",
    "BIRCH_LEAVES",
    "SPRUCE_LEAVES",
    "JUNGLE_LEAVES",
];

impl BlockType {
    pub const AIR: &'static str = "AIR";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn air() -> Self {
        Self(Self::AIR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_air(&self) -> bool {
        matches!(self.0.as_str(), "AIR" | "CAVE_AIR" | "VOID_AIR")
    }

    /// Naturally occurring terrain, excluded from snapshots
    pub fn is_natural(&self) -> bool {
        NATURAL_BLOCKS.contains(&self.0.as_str())
    }

    /// Whether a snapshot should record this block
    pub fn is_capturable(&self) -> bool {
        !self.is_air() && !self.is_natural()
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive axis-aligned box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: BlockPos,
    pub max: BlockPos,
}

impl Bounds {
    /// Build from any two opposite corners
    pub fn from_corners(a: BlockPos, b: BlockPos) -> Self {
        Self {
            min: BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn contains(&self, pos: &BlockPos) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }

    /// Block count, saturating for boxes spanning most of the i32 range
    pub fn volume(&self) -> u64 {
        let span = |min: i32, max: i32| (i64::from(max) - i64::from(min) + 1) as u64;
        span(self.min.x, self.max.x)
            .saturating_mul(span(self.min.y, self.max.y))
            .saturating_mul(span(self.min.z, self.max.z))
    }

    /// Every coordinate in the box, y-major
    pub fn iter(&self) -> impl Iterator<Item = BlockPos> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| {
            (min.z..=max.z).flat_map(move |z| (min.x..=max.x).map(move |x| BlockPos::new(x, y, z)))
        })
    }
}

/// Block storage of the world the arenas live in
pub trait BlockWorld: Send + Sync {
    fn block_at(&self, pos: BlockPos) -> BlockType;

    /// Set a block without neighbour/physics updates
    fn set_block_silent(&self, pos: BlockPos, block: &BlockType);

    /// Remove dropped items and other transient entities inside the box.
    /// Returns how many were removed.
    fn clear_dropped_items(&self, bounds: &Bounds) -> usize;
}

/// Player presence, movement and visibility primitives of the host.
///
/// Every call is best effort and safe to repeat; calls for offline players
/// are ignored by implementations.
pub trait PlayerHost: Send + Sync {
    fn is_online(&self, player: Uuid) -> bool;
    fn online_players(&self) -> Vec<Uuid>;
    fn teleport_safely(&self, player: Uuid, to: &Location);
    /// Hide `target` from `viewer`
    fn hide(&self, target: Uuid, viewer: Uuid);
    /// Show `target` to `viewer`
    fn show(&self, target: Uuid, viewer: Uuid);
    fn apply_kit(&self, player: Uuid, kit: &Kit);
    /// Clear health, hunger, effects and inventory back to lobby defaults
    fn reset_state(&self, player: Uuid);
    fn set_movement_locked(&self, player: Uuid, locked: bool);
    fn send_message(&self, player: Uuid, message: &str);
}

/// Error reported by a match listener
#[derive(Debug, thiserror::Error)]
#[error("listener {listener} failed: {message}")]
pub struct ListenerError {
    pub listener: &'static str,
    pub message: String,
}

/// Observers of match teardown (ratings, statistics, hit counters)
pub trait MatchListener: Send + Sync {
    /// Decisive result with a winner. Errors are logged, never propagated.
    fn on_match_end(&self, result: &MatchResult) -> Result<(), ListenerError>;

    /// Called for every removed match, with or without a winner
    fn on_match_cleared(&self, _match_id: Uuid, _players: [Uuid; 2]) {}
}

/// Listener that only logs results
pub struct TracingListener;

impl MatchListener for TracingListener {
    fn on_match_end(&self, result: &MatchResult) -> Result<(), ListenerError> {
        tracing::info!(
            match_id = %result.match_id,
            winner = %result.winner,
            loser = %result.loser,
            kit = %result.kit,
            queue = %result.queue_class,
            duration_secs = result.duration_secs,
            "Match result"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_normalise_corners() {
        let b = Bounds::from_corners(BlockPos::new(5, 70, -2), BlockPos::new(-1, 64, 3));
        assert_eq!(b.min, BlockPos::new(-1, 64, -2));
        assert_eq!(b.max, BlockPos::new(5, 70, 3));
        assert_eq!(b.volume(), 7 * 7 * 6);
        assert_eq!(b.iter().count() as u64, b.volume());
        assert!(b.contains(&BlockPos::new(0, 64, 0)));
        assert!(!b.contains(&BlockPos::new(0, 63, 0)));
    }

    #[test]
    fn block_type_classification() {
        assert!(BlockType::new("air").is_air());
        assert!(!BlockType::air().is_capturable());
        assert!(BlockType::new("stone").is_natural());
        assert!(BlockType::new("water").is_natural());
        assert!(BlockType::new("oak_planks").is_capturable());
        assert_eq!(BlockType::new(" glass ").as_str(), "GLASS");
    }

    #[test]
    fn location_block() {
        let loc = Location::new(-0.5, 64.9, 10.2);
        assert_eq!(loc.block(), BlockPos::new(-1, 64, 10));
    }

    #[test]
    fn volume_of_extreme_boxes() {
        let widest = Bounds::from_corners(BlockPos::new(i32::MIN, 0, 0), BlockPos::new(i32::MAX, 0, 0));
        assert_eq!(widest.volume(), 1 << 32);

        let everything = Bounds::from_corners(
            BlockPos::new(i32::MIN, i32::MIN, i32::MIN),
            BlockPos::new(i32::MAX, i32::MAX, i32::MAX),
        );
        assert_eq!(everything.volume(), u64::MAX);
    }
}
