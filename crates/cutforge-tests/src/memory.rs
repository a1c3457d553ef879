//! Integration tests for the memory resource manager.
//!
//! Exercises the cross-crate surface: pooled allocation with eviction,
//! the global ceiling, resize, monitoring and cleanup tasks, events, and
//! the frame-buffer convenience layer.

use cutforge_core::PixelFormat;
use cutforge_memory::{
    AllocationRequest, BlockId, MemoryConfig, MemoryError, MemoryEvent, MemoryManager,
    MemorySample, Payload, PoolConfig, PoolKind, Priority, SystemMemoryProbe,
};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────

/// Plain opaque payload standing in for caller-owned scratch data.
struct Scratch;

impl Payload for Scratch {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cutforge_memory=debug")
        .with_test_writer()
        .try_init();
}

fn request(pool: PoolKind, size: u64, priority: Priority) -> AllocationRequest {
    AllocationRequest::new(pool, size, Arc::new(Scratch)).with_priority(priority)
}

/// Small budgets so tests exercise eviction without real gigabytes:
/// temp 1000, thumbnails 500, preview 1500, global 2000.
fn small_config() -> MemoryConfig {
    let config = MemoryConfig {
        global_limit: 2000,
        ..MemoryConfig::default()
    };
    config
        .with_pool_capacity(PoolKind::VideoFrames, 2000)
        .with_pool_capacity(PoolKind::PreviewCache, 1500)
        .with_pool_capacity(PoolKind::EffectsScratch, 1000)
        .with_pool_capacity(PoolKind::AiModels, 2000)
        .with_pool_capacity(PoolKind::TempData, 1000)
        .with_pool_capacity(PoolKind::Thumbnails, 500)
}

fn manager() -> MemoryManager {
    init_logging();
    MemoryManager::new(small_config())
}

// ── Pressure scenarios ─────────────────────────────────────────

#[test]
fn scenario_full_pool_evicts_oldest_low_priority_block() {
    let mgr = manager();

    let x = mgr
        .allocate(request(PoolKind::TempData, 600, Priority::Low))
        .unwrap();
    assert_eq!(mgr.pool_stats(PoolKind::TempData).unwrap().used, 600);

    let y = mgr
        .allocate(request(PoolKind::TempData, 600, Priority::Low))
        .unwrap();
    assert_eq!(mgr.pool_stats(PoolKind::TempData).unwrap().used, 600);
    assert!(mgr.touch(x).is_none(), "x should have been evicted");
    assert!(mgr.touch(y).is_some());
}

#[test]
fn scenario_critical_block_blocks_the_pool() {
    let mgr = manager();
    mgr.allocate(request(PoolKind::TempData, 1000, Priority::Critical))
        .unwrap();

    let err = mgr
        .allocate(request(PoolKind::TempData, 1, Priority::Low))
        .unwrap_err();
    assert!(matches!(err, MemoryError::PoolExhausted { .. }));
}

#[test]
fn scenario_resize_evicts_low_priority_but_respects_critical() {
    let mgr = manager();

    // Low-priority content: shrink succeeds after eviction
    mgr.allocate(request(PoolKind::Thumbnails, 400, Priority::Low))
        .unwrap();
    mgr.resize(PoolKind::Thumbnails, 300).unwrap();
    let stats = mgr.pool_stats(PoolKind::Thumbnails).unwrap();
    assert_eq!(stats.capacity, 300);
    assert!(stats.used <= 300);

    // A critical block alone above the target: shrink fails, unchanged
    let pinned = mgr
        .allocate(request(PoolKind::Thumbnails, 250, Priority::Critical))
        .unwrap();
    let err = mgr.resize(PoolKind::Thumbnails, 200).unwrap_err();
    assert!(matches!(err, MemoryError::InvalidResize { .. }));
    let stats = mgr.pool_stats(PoolKind::Thumbnails).unwrap();
    assert_eq!(stats.capacity, 300);
    assert!(mgr.touch(pinned).is_some());
}

#[test]
fn scenario_global_ceiling_reclaims_across_pools() {
    // global limit 100; temp holds 70 low-priority; preview asks for 40.
    // The per-pool check passes but the ceiling forces >=10 out of temp.
    let config = MemoryConfig {
        global_limit: 100,
        pools: vec![
            PoolConfig {
                kind: PoolKind::TempData,
                capacity: 80,
                evictable: true,
            },
            PoolConfig {
                kind: PoolKind::PreviewCache,
                capacity: 60,
                evictable: true,
            },
        ],
        eviction_order: vec![PoolKind::TempData],
        ..MemoryConfig::default()
    };
    let mgr = MemoryManager::new(config);

    for _ in 0..7 {
        mgr.allocate(request(PoolKind::TempData, 10, Priority::Low))
            .unwrap();
    }
    assert_eq!(mgr.pool_stats(PoolKind::TempData).unwrap().used, 70);

    let id = mgr
        .allocate(request(PoolKind::PreviewCache, 40, Priority::Medium))
        .unwrap();
    assert!(mgr.touch(id).is_some());
    assert!(mgr.total_used() <= 100);
    assert!(
        mgr.pool_stats(PoolKind::TempData).unwrap().used <= 60,
        "at least 10 bytes reclaimed from temp"
    );
}

// ── Invariants ─────────────────────────────────────────────────

#[test]
fn used_equals_sum_of_blocks_at_quiescence() {
    let mgr = manager();
    let mut live: Vec<BlockId> = Vec::new();
    for i in 0..20u64 {
        let pool = if i % 2 == 0 {
            PoolKind::TempData
        } else {
            PoolKind::Thumbnails
        };
        if let Ok(id) = mgr.allocate(request(pool, 20 + i, Priority::Medium)) {
            live.push(id);
        }
    }
    for id in live.iter().step_by(3) {
        mgr.deallocate(*id);
    }

    let stats = mgr.stats();
    let summed: u64 = stats.pools.iter().map(|p| p.used).sum();
    assert_eq!(summed, stats.total_used);
    assert_eq!(stats.total_used, mgr.total_used());
}

#[test]
fn deallocate_twice_returns_true_then_false() {
    let mgr = manager();
    let id = mgr
        .allocate(request(PoolKind::TempData, 100, Priority::Medium))
        .unwrap();
    assert!(mgr.deallocate(id));
    let used_after_first = mgr.total_used();
    assert!(!mgr.deallocate(id));
    assert_eq!(mgr.total_used(), used_after_first);
}

#[test]
fn equal_priority_evicts_least_recently_touched_first() {
    let mgr = manager();
    let first = mgr
        .allocate(request(PoolKind::TempData, 400, Priority::Medium))
        .unwrap();
    let second = mgr
        .allocate(request(PoolKind::TempData, 400, Priority::Medium))
        .unwrap();
    // Touch the first: the second becomes the eviction candidate
    mgr.touch(first);

    mgr.allocate(request(PoolKind::TempData, 400, Priority::Medium))
        .unwrap();
    assert!(mgr.touch(first).is_some());
    assert!(mgr.touch(second).is_none());
}

#[test]
fn allocation_failure_is_an_error_not_a_panic() {
    let mgr = manager();
    let result = mgr.allocate(request(PoolKind::TempData, 100_000, Priority::Low));
    assert!(matches!(result, Err(MemoryError::PoolExhausted { .. })));
}

// ── Events ─────────────────────────────────────────────────────

#[test]
fn subscriber_sees_freed_and_failed_events() {
    let mgr = manager();
    let rx = mgr.subscribe();

    let id = mgr
        .allocate(request(PoolKind::TempData, 1000, Priority::Critical))
        .unwrap();
    let _ = mgr.allocate(request(PoolKind::TempData, 50, Priority::Low));
    mgr.deallocate(id);

    let events: Vec<MemoryEvent> = rx.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, MemoryEvent::AllocationFailed { requested: 50, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, MemoryEvent::MemoryFreed { size: 1000, .. })));
}

// ── Background tasks ───────────────────────────────────────────

/// Probe that always reports pressure above the warning threshold.
struct PressureProbe;

impl SystemMemoryProbe for PressureProbe {
    fn sample(&mut self) -> Option<MemorySample> {
        Some(MemorySample {
            process_rss: 900,
            total_system: 1000,
        })
    }
}

#[test]
fn monitor_task_emits_warnings_until_stopped() {
    let config = MemoryConfig {
        monitor_interval: Duration::from_millis(10),
        ..small_config()
    };
    let mgr = Arc::new(MemoryManager::new(config));
    let rx = mgr.subscribe();

    mgr.start_monitoring_with(PressureProbe);
    std::thread::sleep(Duration::from_millis(100));
    mgr.stop_monitoring();

    let warnings = rx
        .try_iter()
        .filter(|e| matches!(e, MemoryEvent::MemoryWarning { .. }))
        .count();
    assert!(warnings > 0, "periodic ticks should have warned");

    // Stopped: no further ticks fire
    let drained: Vec<_> = rx.try_iter().collect();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rx.try_iter().count(), 0, "stale ticks after stop: {drained:?}");
}

#[test]
fn shutdown_stops_tasks_and_releases_everything() {
    let config = MemoryConfig {
        monitor_interval: Duration::from_millis(10),
        cleanup_interval: Duration::from_millis(10),
        ..small_config()
    };
    let mgr = Arc::new(MemoryManager::new(config));
    mgr.start_monitoring_with(PressureProbe);
    mgr.start_auto_cleanup();

    mgr.allocate(request(PoolKind::TempData, 500, Priority::Critical))
        .unwrap();
    // 16x4 RGBA with 64-byte stride alignment: 256 bytes per frame, well
    // inside the small test budgets
    mgr.create_frame_buffer(16, 4, 4, 2).unwrap();

    mgr.shutdown();
    assert!(!mgr.is_monitoring());
    assert!(!mgr.is_auto_cleanup_running());
    assert_eq!(mgr.total_used(), 0);
}

#[test]
fn concurrent_churn_keeps_the_ledger_exact() {
    let mgr = Arc::new(manager());
    mgr.start_auto_cleanup();

    let mut handles = Vec::new();
    for worker in 0..4u64 {
        let mgr = Arc::clone(&mgr);
        handles.push(std::thread::spawn(move || {
            let pool = match worker % 3 {
                0 => PoolKind::TempData,
                1 => PoolKind::Thumbnails,
                _ => PoolKind::PreviewCache,
            };
            for i in 0..200u64 {
                match mgr.allocate(request(pool, 1 + (i % 40), Priority::Medium)) {
                    Ok(id) => {
                        mgr.touch(id);
                        if i % 2 == 0 {
                            mgr.deallocate(id);
                        }
                    }
                    Err(MemoryError::PoolExhausted { .. })
                    | Err(MemoryError::GlobalLimitExceeded { .. }) => {
                        // Expected under pressure; keep churning
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    mgr.stop_auto_cleanup();

    let stats = mgr.stats();
    let summed: u64 = stats.pools.iter().map(|p| p.used).sum();
    assert_eq!(summed, stats.total_used);
    assert!(stats.total_used <= mgr.config().global_limit);
    assert!(stats.peak_usage >= stats.total_used);
}

// ── Frame-buffer convenience layer ─────────────────────────────

#[test]
fn frame_buffer_round_trip_through_the_manager() {
    init_logging();
    let mgr = MemoryManager::new(MemoryConfig::default());

    let id = mgr.create_frame_buffer(128, 72, 4, 4).unwrap();
    let frame = mgr.frame(id, 3).expect("frame within range");
    assert_eq!((frame.width, frame.height), (128, 72));
    assert_eq!(frame.format, PixelFormat::Rgba8);
    assert_eq!(
        mgr.pool_stats(PoolKind::VideoFrames).unwrap().used,
        mgr.total_used()
    );

    assert!(mgr.frame(id, 4).is_none());
    mgr.deallocate(id);
    assert!(mgr.frame(id, 0).is_none());
    assert_eq!(mgr.total_used(), 0);
}

#[test]
fn frame_buffers_are_eviction_protected_from_global_pressure() {
    // Frame pool is not in the eviction order: global pressure from other
    // pools must fail rather than drop frames.
    let config = MemoryConfig {
        global_limit: 3000,
        ..MemoryConfig::default()
    }
    .with_pool_capacity(PoolKind::VideoFrames, 3000)
    .with_pool_capacity(PoolKind::TempData, 3000);
    let mgr = MemoryManager::new(config);

    let frames = mgr.create_frame_buffer(16, 2, 4, 1).unwrap();
    let frame_bytes = mgr.total_used();
    assert!(frame_bytes > 0);

    let err = mgr
        .allocate(request(PoolKind::TempData, 3000, Priority::Low))
        .unwrap_err();
    assert!(matches!(err, MemoryError::GlobalLimitExceeded { .. }));
    assert!(mgr.touch(frames).is_some(), "frames survived the pressure");
}
