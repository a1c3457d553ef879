//! Read-only usage reporting.
//!
//! `stats` takes a point-in-time snapshot under the state lock and lets
//! formatting and serialization happen outside it.

use crate::block::Priority;
use crate::cleanup::CleanupReport;
use crate::manager::{total_used, AllocationRecord, MemoryManager};
use crate::pool::{Pool, PoolKind};
use serde::Serialize;
use std::fmt::Write as _;

/// Snapshot of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub kind: PoolKind,
    pub capacity: u64,
    pub used: u64,
    pub usage_ratio: f64,
    pub block_count: usize,
    pub evictable: bool,
    /// Block counts indexed by `Priority::index()`.
    pub priority_distribution: [usize; 4],
}

impl PoolStats {
    fn from_pool(pool: &Pool) -> Self {
        Self {
            kind: pool.kind(),
            capacity: pool.capacity(),
            used: pool.used(),
            usage_ratio: pool.usage_ratio(),
            block_count: pool.block_count(),
            evictable: pool.is_evictable(),
            priority_distribution: pool.priority_counts(),
        }
    }

    /// Number of blocks at the given priority.
    pub fn count_at(&self, priority: Priority) -> usize {
        self.priority_distribution[priority.index()]
    }
}

/// Snapshot of the whole manager.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    /// Per-pool snapshots, in registry order.
    pub pools: Vec<PoolStats>,
    pub total_used: u64,
    pub total_capacity: u64,
    pub global_limit: u64,
    pub global_usage_ratio: f64,
    pub peak_usage: u64,
    pub block_count: usize,
    pub monitoring: bool,
    pub auto_cleanup_running: bool,
}

impl MemoryStats {
    /// Snapshot for one pool, if present.
    pub fn pool(&self, kind: PoolKind) -> Option<&PoolStats> {
        self.pools.iter().find(|p| p.kind == kind)
    }

    /// Multi-line human-readable summary for diagnostics panels and logs.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "memory: {} / {} ({:.1}%), peak {}, {} blocks",
            format_bytes(self.total_used),
            format_bytes(self.global_limit),
            self.global_usage_ratio * 100.0,
            format_bytes(self.peak_usage),
            self.block_count,
        );
        for pool in &self.pools {
            let _ = writeln!(
                out,
                "  {}: {} / {} ({:.1}%), {} blocks{}",
                pool.kind,
                format_bytes(pool.used),
                format_bytes(pool.capacity),
                pool.usage_ratio * 100.0,
                pool.block_count,
                if pool.evictable { "" } else { ", protected" },
            );
        }
        out
    }
}

/// Render a byte count with a binary-unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

impl MemoryManager {
    /// Take a point-in-time snapshot of all pools and global usage.
    pub fn stats(&self) -> MemoryStats {
        let (pools, total, peak) = {
            let state = self.state.lock();
            let pools: Vec<PoolStats> = self
                .config
                .pools
                .iter()
                .filter_map(|pc| state.pools.get(&pc.kind))
                .map(PoolStats::from_pool)
                .collect();
            (pools, total_used(&state), state.peak_usage)
        };
        // Task flags are read outside the state lock; they sit behind
        // their own mutexes.
        MemoryStats {
            total_capacity: pools.iter().map(|p| p.capacity).sum(),
            block_count: pools.iter().map(|p| p.block_count).sum(),
            global_usage_ratio: if self.config.global_limit == 0 {
                0.0
            } else {
                total as f64 / self.config.global_limit as f64
            },
            pools,
            total_used: total,
            global_limit: self.config.global_limit,
            peak_usage: peak,
            monitoring: self.is_monitoring(),
            auto_cleanup_running: self.is_auto_cleanup_running(),
        }
    }

    /// Snapshot of one pool.
    pub fn pool_stats(&self, kind: PoolKind) -> Option<PoolStats> {
        let state = self.state.lock();
        state.pools.get(&kind).map(PoolStats::from_pool)
    }

    /// Live usage summed across all pools.
    pub fn total_used(&self) -> u64 {
        total_used(&self.state.lock())
    }

    /// Highest total usage observed since construction.
    pub fn peak_usage(&self) -> u64 {
        self.state.lock().peak_usage
    }

    /// The most recent allocation-history records, newest last.
    pub fn recent_allocations(&self, n: usize) -> Vec<AllocationRecord> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Reports from recent cleanup passes, oldest first.
    pub fn cleanup_history(&self) -> Vec<CleanupReport> {
        self.state.lock().cleanup_history.iter().cloned().collect()
    }
}
