//! Manager configuration.

use crate::pool::PoolKind;
use cutforge_core::memory_budget;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Which workload class this pool serves.
    pub kind: PoolKind,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Whether global eviction may reclaim from this pool.
    pub evictable: bool,
}

impl PoolConfig {
    /// Default configuration for the given kind.
    pub fn for_kind(kind: PoolKind) -> Self {
        Self {
            kind,
            capacity: kind.default_capacity(),
            evictable: kind.default_evictable(),
        }
    }
}

/// Configuration for the memory manager.
///
/// `Default` gives the standard six-pool registry with the budgets from
/// `cutforge_core::memory_budget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Ceiling on combined usage across all pools, in bytes.
    pub global_limit: u64,
    /// Process-memory fraction that triggers a warning event.
    pub warning_threshold: f64,
    /// Process-memory fraction that triggers a critical warning event.
    pub critical_threshold: f64,
    /// Usage-monitor tick interval.
    pub monitor_interval: Duration,
    /// Auto-cleanup tick interval.
    pub cleanup_interval: Duration,
    /// Whether the cleanup scheduler runs automatically once started.
    pub auto_cleanup: bool,
    /// The pool registry, created once at manager construction.
    pub pools: Vec<PoolConfig>,
    /// Pools global eviction walks, in reclaim order. Pools whose
    /// `evictable` flag is false are skipped even if listed.
    pub eviction_order: Vec<PoolKind>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            global_limit: memory_budget::GLOBAL_MEMORY_LIMIT,
            warning_threshold: 0.8,
            critical_threshold: 0.95,
            monitor_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            auto_cleanup: true,
            pools: PoolKind::ALL.into_iter().map(PoolConfig::for_kind).collect(),
            eviction_order: vec![
                PoolKind::TempData,
                PoolKind::Thumbnails,
                PoolKind::PreviewCache,
                PoolKind::EffectsScratch,
            ],
        }
    }
}

impl MemoryConfig {
    /// Override one pool's capacity, keeping the rest of the registry.
    pub fn with_pool_capacity(mut self, kind: PoolKind, capacity: u64) -> Self {
        for pool in &mut self.pools {
            if pool.kind == kind {
                pool.capacity = capacity;
            }
        }
        self
    }

    /// Override the global ceiling.
    pub fn with_global_limit(mut self, limit: u64) -> Self {
        self.global_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_all_kinds() {
        let config = MemoryConfig::default();
        assert_eq!(config.pools.len(), PoolKind::ALL.len());
        for kind in PoolKind::ALL {
            assert!(config.pools.iter().any(|p| p.kind == kind));
        }
    }

    #[test]
    fn test_eviction_order_skips_protected_pools() {
        let config = MemoryConfig::default();
        assert!(!config.eviction_order.contains(&PoolKind::VideoFrames));
        assert!(!config.eviction_order.contains(&PoolKind::AiModels));
        assert_eq!(config.eviction_order[0], PoolKind::TempData);
    }

    #[test]
    fn test_capacity_override() {
        let config = MemoryConfig::default().with_pool_capacity(PoolKind::TempData, 1000);
        let temp = config
            .pools
            .iter()
            .find(|p| p.kind == PoolKind::TempData)
            .unwrap();
        assert_eq!(temp.capacity, 1000);
    }
}
