//! Usage monitor: a read-only periodic tick comparing process and pool
//! usage against the configured thresholds.

use crate::events::{MemoryEvent, WarningKind};
use crate::manager::{spawn_periodic, MemoryManager};
use crate::pool::PoolKind;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Pool occupancy above which the monitor reports an overflow.
const POOL_OVERFLOW_RATIO: f64 = 0.9;

/// One reading of process and system memory.
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    /// Resident set size of this process, in bytes.
    pub process_rss: u64,
    /// Total physical memory, in bytes.
    pub total_system: u64,
}

/// Source of process/system memory readings.
///
/// The monitor owns one probe for its lifetime; tests substitute a fake.
pub trait SystemMemoryProbe: Send + 'static {
    /// Take a reading. `None` when the platform query fails; the tick
    /// then skips the process-level checks.
    fn sample(&mut self) -> Option<MemorySample>;
}

/// Probe backed by the `sysinfo` crate.
pub struct SysinfoProbe {
    sys: System,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemoryProbe for SysinfoProbe {
    fn sample(&mut self) -> Option<MemorySample> {
        let pid = self.pid?;
        self.sys.refresh_memory();
        // sysinfo 0.37 removed refresh_process; refresh just our pid
        let _ = self
            .sys
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = self.sys.process(pid)?;
        Some(MemorySample {
            process_rss: process.memory(),
            total_system: self.sys.total_memory(),
        })
    }
}

/// One monitor pass. Reads state, emits threshold events, mutates nothing.
pub(crate) fn monitor_tick(manager: &MemoryManager, probe: &mut dyn SystemMemoryProbe) {
    if let Some(sample) = probe.sample() {
        let warning = threshold_bytes(sample.total_system, manager.config.warning_threshold);
        let critical = threshold_bytes(sample.total_system, manager.config.critical_threshold);
        if sample.process_rss > critical {
            warn!(
                rss = sample.process_rss,
                threshold = critical,
                "process memory critical"
            );
            manager.events.emit(MemoryEvent::MemoryWarning {
                kind: WarningKind::ProcessMemoryCritical,
                current: sample.process_rss,
                threshold: critical,
            });
        } else if sample.process_rss > warning {
            warn!(
                rss = sample.process_rss,
                threshold = warning,
                "process memory high"
            );
            manager.events.emit(MemoryEvent::MemoryWarning {
                kind: WarningKind::ProcessMemory,
                current: sample.process_rss,
                threshold: warning,
            });
        }
    } else {
        debug!("system memory probe returned no sample");
    }

    // Snapshot under the lock, emit outside it.
    let overflows: Vec<(PoolKind, u64, u64)> = {
        let state = manager.state.lock();
        state
            .pools
            .values()
            .filter(|pool| pool.usage_ratio() > POOL_OVERFLOW_RATIO)
            .map(|pool| (pool.kind(), pool.used(), pool.capacity()))
            .collect()
    };
    for (pool, used, capacity) in overflows {
        manager.events.emit(MemoryEvent::PoolOverflow {
            pool,
            used,
            capacity,
        });
    }
}

fn threshold_bytes(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction) as u64
}

impl MemoryManager {
    /// Start the usage monitor with the default `sysinfo` probe.
    /// Idempotent: a running monitor is left alone.
    pub fn start_monitoring(self: &Arc<Self>) {
        self.start_monitoring_with(SysinfoProbe::new());
    }

    /// Start the usage monitor with a caller-supplied probe.
    pub fn start_monitoring_with(self: &Arc<Self>, mut probe: impl SystemMemoryProbe) {
        let mut task = self.monitor_task.lock();
        if task.is_some() {
            debug!("usage monitor already running");
            return;
        }
        *task = spawn_periodic(
            "cutforge-usage-monitor",
            self.config.monitor_interval,
            self,
            move |manager| monitor_tick(manager, &mut probe),
        );
    }

    /// Stop the usage monitor, waiting out any in-flight tick.
    /// Idempotent: a stopped monitor is a no-op.
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.monitor_task.lock().take() {
            task.stop();
        }
    }

    /// Whether the usage monitor is running.
    pub fn is_monitoring(&self) -> bool {
        self.monitor_task.lock().is_some()
    }
}
