//! Batched terrain restoration
//!
//! Restores run as background tasks. Each batch compares a handful of
//! coordinates against the live world and rewrites only those that differ,
//! then sleeps so concurrent matches sharing the world are not stalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::world::{BlockPos, BlockType, BlockWorld, Bounds};

/// Batch sizing for restores
#[derive(Debug, Clone, Copy)]
pub struct RestoreSettings {
    /// Coordinates checked per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_delay: Duration::from_millis(50),
        }
    }
}

/// Outcome of one restore run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub checked: usize,
    pub changed: usize,
    pub batches: usize,
    pub items_cleared: usize,
}

/// Awaitable handle to a scheduled restore. Dropping it detaches the task.
pub struct RestoreHandle {
    pub arena: String,
    pub(crate) task: JoinHandle<RestoreReport>,
}

impl RestoreHandle {
    /// Wait for the restore to finish. A cancelled or panicked task reports
    /// an empty run.
    pub async fn finished(self) -> RestoreReport {
        self.task.await.unwrap_or_default()
    }
}

/// Write `plan` back into the world in batches.
///
/// Dropped items inside `bounds` are cleared before the first and after the
/// last batch.
pub async fn restore_terrain(
    world: Arc<dyn BlockWorld>,
    mut plan: Vec<(BlockPos, BlockType)>,
    bounds: Option<Bounds>,
    settings: RestoreSettings,
) -> RestoreReport {
    let mut report = RestoreReport::default();
    if let Some(bounds) = &bounds {
        report.items_cleared += world.clear_dropped_items(bounds);
    }

    // bottom layer first
    plan.sort_unstable_by_key(|(pos, _)| (pos.y, pos.x, pos.z));

    let batch_size = settings.batch_size.max(1);
    let total_batches = plan.len().div_ceil(batch_size);

    for (index, batch) in plan.chunks(batch_size).enumerate() {
        for (pos, block) in batch {
            report.checked += 1;
            if world.block_at(*pos) != *block {
                world.set_block_silent(*pos, block);
                report.changed += 1;
            }
        }
        report.batches += 1;
        debug!(batch = index + 1, total = total_batches, "Restore batch applied");

        if index + 1 < total_batches {
            if settings.batch_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(settings.batch_delay).await;
            }
        }
    }

    if let Some(bounds) = &bounds {
        report.items_cleared += world.clear_dropped_items(bounds);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryWorld;

    fn plan(n: i32, block: &str) -> Vec<(BlockPos, BlockType)> {
        (0..n)
            .map(|x| (BlockPos::new(x, 64, 0), BlockType::new(block)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn restores_only_differing_blocks_in_batches() {
        let world = Arc::new(MemoryWorld::new());
        for x in 0..30 {
            world.set(BlockPos::new(x, 64, 0), "GLASS");
        }
        world.set(BlockPos::new(3, 64, 0), "TNT");
        world.set(BlockPos::new(40, 64, 0), "AIR");

        let report =
            restore_terrain(world.clone(), plan(60, "GLASS"), None, RestoreSettings::default()).await;

        assert_eq!(report.checked, 60);
        assert_eq!(report.batches, 3);
        // TNT at x=3 plus x in 30..60
        assert_eq!(report.changed, 31);
        assert_eq!(world.silent_writes(), 31);
        assert_eq!(world.block_at(BlockPos::new(3, 64, 0)), BlockType::new("GLASS"));
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_spaced_by_delay() {
        let world = Arc::new(MemoryWorld::new());
        let settings = RestoreSettings {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
        };
        let start = tokio::time::Instant::now();
        let report = restore_terrain(world, plan(35, "GLASS"), None, settings).await;

        assert_eq!(report.batches, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn clears_items_within_bounds() {
        let world = Arc::new(MemoryWorld::new());
        world.drop_item(BlockPos::new(1, 64, 1));
        world.drop_item(BlockPos::new(100, 64, 1));
        let bounds = Bounds::from_corners(BlockPos::new(0, 60, 0), BlockPos::new(10, 70, 10));

        let report =
            restore_terrain(world.clone(), Vec::new(), Some(bounds), RestoreSettings::default())
                .await;
        assert_eq!(report.items_cleared, 1);
        assert_eq!(report.batches, 0);
        assert_eq!(world.item_count(), 1);
    }
}
