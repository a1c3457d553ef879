//! Cleanup scheduler: periodic and on-demand reclamation.
//!
//! Each pass trims over-occupied pools back toward a comfortable level and
//! sweeps the deferred-release list. The synchronous variant is meant to be
//! called ahead of heavy operations (export render, AI inference).

use crate::eviction;
use crate::manager::{
    push_cleanup_history, spawn_periodic, sweep_deferred, total_used, MemoryManager,
};
use crate::pool::PoolKind;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

/// Occupancy above which a pool gets trimmed.
const CLEANUP_TRIGGER_RATIO: f64 = 0.7;
/// Occupancy a trimmed pool is brought down to.
const CLEANUP_TARGET_RATIO: f64 = 0.5;

/// Occupancy targets for `optimize_for_processing`.
const OPTIMIZE_LOW_PRIORITY_TARGET: f64 = 0.2;
const OPTIMIZE_PREVIEW_TRIGGER: f64 = 0.8;
const OPTIMIZE_PREVIEW_TARGET: f64 = 0.4;

/// What one cleanup pass did to one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolCleanup {
    pub pool: PoolKind,
    /// Bytes reclaimed from the pool.
    pub freed: u64,
    /// Blocks evicted from the pool.
    pub blocks: usize,
}

/// Structured result of one cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub started_at: SystemTime,
    pub duration: Duration,
    /// Tracked usage across all pools before the pass.
    pub memory_before: u64,
    /// Tracked usage across all pools after the pass.
    pub memory_after: u64,
    pub pools_cleaned: Vec<PoolCleanup>,
    /// Deferred payloads whose release hook ran during the sweep.
    pub deferred_released: usize,
}

impl CleanupReport {
    /// Bytes reclaimed across all pools.
    pub fn total_freed(&self) -> u64 {
        self.memory_before.saturating_sub(self.memory_after)
    }
}

impl MemoryManager {
    /// Run one cleanup pass now: trim every pool above 70% occupancy down
    /// to 50%, then sweep the deferred-release list.
    pub fn run_cleanup(&self) -> CleanupReport {
        let clock = Instant::now();
        let started_at = SystemTime::now();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let memory_before = total_used(state);
        let mut pools_cleaned = Vec::new();

        let kinds: Vec<PoolKind> = state.pools.keys().copied().collect();
        for kind in kinds {
            let plan = {
                let Some(pool) = state.pools.get(&kind) else {
                    continue;
                };
                if pool.usage_ratio() <= CLEANUP_TRIGGER_RATIO {
                    continue;
                }
                let target_used = (pool.capacity() as f64 * CLEANUP_TARGET_RATIO) as u64;
                let required = pool.used().saturating_sub(target_used);
                if required == 0 {
                    continue;
                }
                eviction::plan_eviction(pool, required)
            };
            let blocks = plan.victims.len();
            let freed = self.execute_plan(state, kind, plan);
            if freed > 0 {
                pools_cleaned.push(PoolCleanup {
                    pool: kind,
                    freed,
                    blocks,
                });
            }
        }

        let deferred_released = sweep_deferred(state);
        let memory_after = total_used(state);
        let report = CleanupReport {
            started_at,
            duration: clock.elapsed(),
            memory_before,
            memory_after,
            pools_cleaned,
            deferred_released,
        };
        push_cleanup_history(state, report.clone());
        drop(guard);

        info!(
            freed = report.total_freed(),
            pools = report.pools_cleaned.len(),
            deferred_released,
            "cleanup pass complete"
        );
        report
    }

    /// Free low-priority caches ahead of a heavy operation: temp data and
    /// thumbnails are trimmed to 20% occupancy, and the preview cache to
    /// 40% when it sits above 80%.
    pub fn optimize_for_processing(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let before = total_used(state);

        for (kind, trigger, target) in [
            (PoolKind::TempData, 0.0, OPTIMIZE_LOW_PRIORITY_TARGET),
            (PoolKind::Thumbnails, 0.0, OPTIMIZE_LOW_PRIORITY_TARGET),
            (
                PoolKind::PreviewCache,
                OPTIMIZE_PREVIEW_TRIGGER,
                OPTIMIZE_PREVIEW_TARGET,
            ),
        ] {
            let plan = {
                let Some(pool) = state.pools.get(&kind) else {
                    continue;
                };
                if pool.usage_ratio() <= trigger {
                    continue;
                }
                let target_used = (pool.capacity() as f64 * target) as u64;
                let required = pool.used().saturating_sub(target_used);
                if required == 0 {
                    continue;
                }
                eviction::plan_eviction(pool, required)
            };
            self.execute_plan(state, kind, plan);
        }

        let freed = before.saturating_sub(total_used(state));
        drop(guard);
        info!(freed, "optimized pools for processing");
    }

    /// Start the periodic cleanup task. Idempotent; a no-op when
    /// `auto_cleanup` is disabled in the configuration.
    pub fn start_auto_cleanup(self: &Arc<Self>) {
        if !self.config.auto_cleanup {
            debug!("auto cleanup disabled by configuration");
            return;
        }
        let mut task = self.cleanup_task.lock();
        if task.is_some() {
            debug!("cleanup scheduler already running");
            return;
        }
        *task = spawn_periodic(
            "cutforge-cleanup",
            self.config.cleanup_interval,
            self,
            |manager| {
                manager.run_cleanup();
            },
        );
    }

    /// Stop the periodic cleanup task, waiting out any in-flight pass.
    /// Idempotent.
    pub fn stop_auto_cleanup(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.stop();
        }
    }

    /// Whether the periodic cleanup task is running.
    pub fn is_auto_cleanup_running(&self) -> bool {
        self.cleanup_task.lock().is_some()
    }
}
