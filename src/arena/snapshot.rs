//! Terrain snapshot capture and range compression
//!
//! A snapshot holds every non-natural, non-air block inside an arena's bounds.
//! For persistence it is compressed into rectangular ranges per block type and
//! Y layer, one `<type>:<y>:<x0>:<x1>:<z0>:<z1>` token per rectangle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::world::{BlockPos, BlockType, BlockWorld, Bounds};

/// Largest rectangle a single persisted token may expand to
pub const MAX_RANGE_AREA: i64 = 1 << 20;

/// Captured pre-match terrain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerrainSnapshot {
    blocks: HashMap<BlockPos, BlockType>,
}

impl TerrainSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the inclusive box and record every capturable block
    pub fn capture(bounds: &Bounds, world: &dyn BlockWorld) -> Self {
        let blocks = bounds
            .iter()
            .filter_map(|pos| {
                let block = world.block_at(pos);
                block.is_capturable().then_some((pos, block))
            })
            .collect();
        Self { blocks }
    }

    pub fn insert(&mut self, pos: BlockPos, block: BlockType) {
        self.blocks.insert(pos, block);
    }

    pub fn get(&self, pos: &BlockPos) -> Option<&BlockType> {
        self.blocks.get(pos)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BlockPos, &BlockType)> {
        self.blocks.iter()
    }

    /// Compress into rectangles.
    ///
    /// Within each (type, y) group cells are visited in (x, z) order. From the
    /// first unconsumed cell the run is grown along X at fixed Z, then the
    /// whole X run is grown along Z while every cell of the next row is still
    /// unconsumed. The result is deterministic for a given coordinate set.
    pub fn ranges(&self) -> Vec<TerrainRange> {
        let mut groups: BTreeMap<(&BlockType, i32), BTreeSet<(i32, i32)>> = BTreeMap::new();
        for (pos, block) in &self.blocks {
            groups
                .entry((block, pos.y))
                .or_default()
                .insert((pos.x, pos.z));
        }

        let mut ranges = Vec::new();
        for ((block, y), mut remaining) in groups {
            while let Some(&(x0, z0)) = remaining.first() {
                // runs stop at the edge of the i32 range
                let mut x1 = x0;
                while let Some(x) = x1.checked_add(1).filter(|x| remaining.contains(&(*x, z0))) {
                    x1 = x;
                }

                let mut z1 = z0;
                while let Some(z) = z1
                    .checked_add(1)
                    .filter(|z| (x0..=x1).all(|x| remaining.contains(&(x, *z))))
                {
                    z1 = z;
                }

                for x in x0..=x1 {
                    for z in z0..=z1 {
                        remaining.remove(&(x, z));
                    }
                }

                ranges.push(TerrainRange {
                    block: block.clone(),
                    y,
                    x0,
                    x1,
                    z0,
                    z1,
                });
            }
        }
        ranges
    }

    /// Persisted token form
    pub fn encode(&self) -> Vec<String> {
        self.ranges().iter().map(ToString::to_string).collect()
    }

    /// Expand persisted tokens. Malformed tokens are skipped with a warning.
    pub fn decode<S: AsRef<str>>(tokens: &[S]) -> DecodedSnapshot {
        let mut snapshot = Self::new();
        let mut skipped = 0;

        for token in tokens {
            let token = token.as_ref();
            match token.parse::<TerrainRange>() {
                Ok(range) => range.expand_into(&mut snapshot),
                Err(e) => {
                    warn!(token = %token, error = %e, "Skipping malformed terrain range");
                    skipped += 1;
                }
            }
        }

        DecodedSnapshot { snapshot, skipped }
    }
}

/// Result of [`TerrainSnapshot::decode`]
#[derive(Debug)]
pub struct DecodedSnapshot {
    pub snapshot: TerrainSnapshot,
    pub skipped: usize,
}

/// One rectangle of identical blocks on a single Y layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrainRange {
    pub block: BlockType,
    pub y: i32,
    pub x0: i32,
    pub x1: i32,
    pub z0: i32,
    pub z1: i32,
}

impl TerrainRange {
    pub fn area(&self) -> i64 {
        (self.x1 as i64 - self.x0 as i64 + 1) * (self.z1 as i64 - self.z0 as i64 + 1)
    }

    fn expand_into(&self, snapshot: &mut TerrainSnapshot) {
        for x in self.x0..=self.x1 {
            for z in self.z0..=self.z1 {
                snapshot.insert(BlockPos::new(x, self.y, z), self.block.clone());
            }
        }
    }
}

impl fmt::Display for TerrainRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.block, self.y, self.x0, self.x1, self.z0, self.z1
        )
    }
}

/// Why a persisted range token was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("expected 6 ':'-separated fields")]
    FieldCount,

    #[error("empty block type")]
    EmptyType,

    #[error("invalid integer field '{0}'")]
    InvalidNumber(String),

    #[error("inverted range {0}..{1}")]
    Inverted(i32, i32),

    #[error("range covers {0} blocks")]
    TooLarge(i64),
}

impl FromStr for TerrainRange {
    type Err = CodecError;

    /// Parses from the right so block names may themselves contain ':'
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().rsplitn(6, ':');
        let mut number = || -> Result<i32, CodecError> {
            let field = fields.next().ok_or(CodecError::FieldCount)?;
            field
                .parse::<i32>()
                .map_err(|_| CodecError::InvalidNumber(field.to_string()))
        };

        let z1 = number()?;
        let z0 = number()?;
        let x1 = number()?;
        let x0 = number()?;
        let y = number()?;
        let block = fields.next().ok_or(CodecError::FieldCount)?;
        if block.trim().is_empty() {
            return Err(CodecError::EmptyType);
        }
        if x0 > x1 {
            return Err(CodecError::Inverted(x0, x1));
        }
        if z0 > z1 {
            return Err(CodecError::Inverted(z0, z1));
        }

        let range = Self {
            block: BlockType::new(block),
            y,
            x0,
            x1,
            z0,
            z1,
        };
        if range.area() > MAX_RANGE_AREA {
            return Err(CodecError::TooLarge(range.area()));
        }
        Ok(range)
    }
}
