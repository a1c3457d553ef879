//! The memory manager: allocation engine, pool registry, and lifecycle.
//!
//! Every structural mutation (allocate, deallocate, eviction, resize) runs
//! under one mutex over [`ManagerState`]; reads that observe blocks take
//! the same mutex so nothing is seen mid-eviction. Internal helpers take
//! `&mut ManagerState` so eviction can reuse the removal path without
//! re-locking.

use crate::block::{Block, BlockId, Priority, SharedPayload};
use crate::cleanup::CleanupReport;
use crate::config::MemoryConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::events::{EventBus, FreeReason, MemoryEvent, WarningKind};
use crate::eviction::{self, EvictionPlan};
use crate::pool::{Pool, PoolKind};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const HISTORY_CAP: usize = 1000;
const CLEANUP_HISTORY_CAP: usize = 100;

/// What an allocation-history record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOp {
    Allocate,
    Deallocate,
    Evict,
}

/// One entry in the bounded allocation history.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationRecord {
    pub timestamp: SystemTime,
    pub pool: PoolKind,
    pub block: BlockId,
    pub size: u64,
    pub op: HistoryOp,
}

/// Parameters for one allocation.
pub struct AllocationRequest {
    pub pool: PoolKind,
    pub size: u64,
    pub payload: SharedPayload,
    pub priority: Priority,
    pub description: String,
    pub tags: HashSet<String>,
    /// Optional secondary-index key; later lookups resolve it to the
    /// block id until the block reaches a terminal state.
    pub key: Option<String>,
}

impl AllocationRequest {
    /// A Medium-priority request with no description, tags, or key.
    pub fn new(pool: PoolKind, size: u64, payload: SharedPayload) -> Self {
        Self {
            pool,
            size,
            payload,
            priority: Priority::default(),
            description: String::new(),
            tags: HashSet::new(),
            key: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Mutable manager state, guarded by a single mutex.
pub(crate) struct ManagerState {
    pub(crate) pools: HashMap<PoolKind, Pool>,
    /// Secondary index: external key -> live block id.
    pub(crate) lookup: HashMap<String, BlockId>,
    pub(crate) history: VecDeque<AllocationRecord>,
    pub(crate) cleanup_history: VecDeque<CleanupReport>,
    pub(crate) peak_usage: u64,
    /// Payloads whose blocks are gone but which still had outside handles
    /// at removal time; released by the cleanup sweep once unreferenced.
    pub(crate) deferred: Vec<SharedPayload>,
}

/// Arbitrates a finite memory budget across the workload-class pools.
///
/// Construct once, share by reference (wrap in `Arc` to run the periodic
/// background tasks), and call [`MemoryManager::shutdown`] before teardown.
pub struct MemoryManager {
    pub(crate) config: MemoryConfig,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) events: EventBus,
    pub(crate) monitor_task: Mutex<Option<TaskHandle>>,
    pub(crate) cleanup_task: Mutex<Option<TaskHandle>>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryManager {
    /// Create a manager with the given configuration. The pool registry is
    /// fixed from here on; only capacities may change (via `resize`).
    pub fn new(config: MemoryConfig) -> Self {
        let pools = config
            .pools
            .iter()
            .map(|pc| (pc.kind, Pool::new(pc.kind, pc.capacity, pc.evictable)))
            .collect();
        Self {
            config,
            state: Mutex::new(ManagerState {
                pools,
                lookup: HashMap::new(),
                history: VecDeque::with_capacity(HISTORY_CAP),
                cleanup_history: VecDeque::new(),
                peak_usage: 0,
                deferred: Vec::new(),
            }),
            events: EventBus::new(),
            monitor_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Subscribe to diagnostic events.
    pub fn subscribe(&self) -> Receiver<MemoryEvent> {
        self.events.subscribe()
    }

    /// Allocate a block.
    ///
    /// Runs per-pool eviction (then global eviction) when budgets are
    /// tight; per-pool eviction is all-or-nothing, so a request that
    /// cannot fit never destroys existing data.
    pub fn allocate(&self, request: AllocationRequest) -> MemoryResult<BlockId> {
        if request.size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Per-pool budget
        let pool = state
            .pools
            .get(&request.pool)
            .ok_or_else(|| MemoryError::PoolNotFound {
                name: request.pool.name().to_string(),
            })?;
        if pool.used() + request.size > pool.capacity() {
            let required = pool.used() + request.size - pool.capacity();
            let plan = eviction::plan_eviction(pool, required);
            if !plan.covers(required) {
                let available = pool.available() + plan.reclaimable;
                self.events.emit(MemoryEvent::PoolOverflow {
                    pool: request.pool,
                    used: pool.used(),
                    capacity: pool.capacity(),
                });
                self.events.emit(MemoryEvent::AllocationFailed {
                    reason: format!("pool {} exhausted", request.pool),
                    requested: request.size,
                });
                warn!(
                    pool = %request.pool,
                    requested = request.size,
                    available,
                    "allocation failed: pool exhausted"
                );
                return Err(MemoryError::PoolExhausted {
                    pool: request.pool,
                    requested: request.size,
                    available,
                });
            }
            self.execute_plan(state, request.pool, plan);
        }

        // Global ceiling
        let total = total_used(state);
        if total + request.size > self.config.global_limit {
            let required = total + request.size - self.config.global_limit;
            self.evict_global(state, required);
            let total = total_used(state);
            if total + request.size > self.config.global_limit {
                self.events.emit(MemoryEvent::MemoryWarning {
                    kind: WarningKind::GlobalLimit,
                    current: total,
                    threshold: self.config.global_limit,
                });
                self.events.emit(MemoryEvent::AllocationFailed {
                    reason: "global memory limit".to_string(),
                    requested: request.size,
                });
                warn!(
                    requested = request.size,
                    used = total,
                    limit = self.config.global_limit,
                    "allocation failed: global limit"
                );
                return Err(MemoryError::GlobalLimitExceeded {
                    requested: request.size,
                    used: total,
                    limit: self.config.global_limit,
                });
            }
        }

        // Create and insert
        let block = Block::new(
            request.size,
            request.priority,
            request.payload,
            request.description,
            request.tags,
            request.key,
        );
        let id = block.id();
        if let Some(key) = block.key.clone() {
            if let Some(previous) = state.lookup.insert(key, id) {
                debug!(block = %previous, "secondary index key remapped");
            }
        }
        push_history(
            state,
            AllocationRecord {
                timestamp: SystemTime::now(),
                pool: request.pool,
                block: id,
                size: request.size,
                op: HistoryOp::Allocate,
            },
        );
        if let Some(pool) = state.pools.get_mut(&request.pool) {
            pool.insert(block);
        }
        let total = total_used(state);
        if total > state.peak_usage {
            state.peak_usage = total;
        }
        debug!(block = %id, pool = %request.pool, size = request.size, "allocated");
        Ok(id)
    }

    /// Release a block. Idempotent: an unknown or already-terminal id is a
    /// no-op returning `false`.
    pub fn deallocate(&self, id: BlockId) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(kind) = owning_pool(state, id) else {
            debug!(block = %id, "deallocate: block not found");
            return false;
        };
        self.remove_block(state, kind, id, FreeReason::Deallocated)
            .is_some()
    }

    /// Touch a block: bump its recency clock and access counter, and
    /// return a shared handle to its payload. `None` once the block has
    /// reached a terminal state.
    pub fn touch(&self, id: BlockId) -> Option<SharedPayload> {
        let mut guard = self.state.lock();
        for pool in guard.pools.values_mut() {
            if let Some(block) = pool.get_mut(id) {
                block.touch();
                return Some(block.payload.clone());
            }
        }
        None
    }

    /// Resolve a secondary-index key to its live block, if any.
    pub fn find_by_key(&self, key: &str) -> Option<BlockId> {
        self.state.lock().lookup.get(key).copied()
    }

    /// Allocate with scope-bound lifetime: the returned guard deallocates
    /// the block when dropped.
    pub fn scoped(&self, request: AllocationRequest) -> MemoryResult<AllocationGuard<'_>> {
        let id = self.allocate(request)?;
        Ok(AllocationGuard { manager: self, id })
    }

    /// Change a pool's capacity.
    ///
    /// Shrinking below current usage first evicts the difference; if that
    /// cannot be done without touching Critical blocks the resize fails
    /// with nothing evicted and the capacity unchanged.
    pub fn resize(&self, kind: PoolKind, new_capacity: u64) -> MemoryResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let plan = {
            let pool = state
                .pools
                .get(&kind)
                .ok_or_else(|| MemoryError::PoolNotFound {
                    name: kind.name().to_string(),
                })?;
            if new_capacity < pool.used() {
                let required = pool.used() - new_capacity;
                let plan = eviction::plan_eviction(pool, required);
                if !plan.covers(required) {
                    return Err(MemoryError::InvalidResize {
                        pool: kind,
                        requested: new_capacity,
                        required: pool.used() - plan.reclaimable,
                    });
                }
                Some(plan)
            } else {
                None
            }
        };
        if let Some(plan) = plan {
            self.execute_plan(state, kind, plan);
        }
        if let Some(pool) = state.pools.get_mut(&kind) {
            pool.set_capacity(new_capacity);
        }
        info!(pool = %kind, capacity = new_capacity, "pool resized");
        Ok(())
    }

    /// Stop both background tasks, release every block, and clear the
    /// histories. Idempotent; call before tearing the manager down.
    pub fn shutdown(&self) {
        self.stop_monitoring();
        self.stop_auto_cleanup();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let kinds: Vec<PoolKind> = state.pools.keys().copied().collect();
        for kind in kinds {
            let ids = match state.pools.get(&kind) {
                Some(pool) => pool.block_ids(),
                None => continue,
            };
            for id in ids {
                self.remove_block(state, kind, id, FreeReason::Deallocated);
            }
        }
        let released = sweep_deferred(state);
        state.history.clear();
        state.cleanup_history.clear();
        info!(deferred_released = released, "memory manager shut down");
    }

    // ── Internal mutation path ─────────────────────────────────────

    /// Remove a block through the shared path used by deallocate,
    /// eviction, cleanup, and shutdown. Returns the freed size.
    pub(crate) fn remove_block(
        &self,
        state: &mut ManagerState,
        kind: PoolKind,
        id: BlockId,
        reason: FreeReason,
    ) -> Option<u64> {
        let block = state.pools.get_mut(&kind)?.remove(id)?;

        // Invalidate the secondary index only if the key still maps here;
        // a remapped key belongs to a newer block.
        if let Some(key) = &block.key {
            if state.lookup.get(key) == Some(&block.id) {
                state.lookup.remove(key);
            }
        }

        let size = block.size;
        push_history(
            state,
            AllocationRecord {
                timestamp: SystemTime::now(),
                pool: kind,
                block: id,
                size,
                op: match reason {
                    FreeReason::Deallocated => HistoryOp::Deallocate,
                    FreeReason::Evicted => HistoryOp::Evict,
                },
            },
        );
        release_payload(state, block.payload);
        self.events.emit(MemoryEvent::MemoryFreed {
            pool: kind,
            size,
            reason,
        });
        debug!(block = %id, pool = %kind, size, ?reason, "block removed");
        Some(size)
    }

    /// Execute an eviction plan against one pool. Returns bytes freed.
    pub(crate) fn execute_plan(
        &self,
        state: &mut ManagerState,
        kind: PoolKind,
        plan: EvictionPlan,
    ) -> u64 {
        let mut freed = 0u64;
        for id in plan.victims {
            freed += self
                .remove_block(state, kind, id, FreeReason::Evicted)
                .unwrap_or(0);
        }
        freed
    }

    /// Walk the configured eviction order, reclaiming from each evictable
    /// pool at most half its usage and at most the remaining shortfall.
    pub(crate) fn evict_global(&self, state: &mut ManagerState, required: u64) -> u64 {
        let mut freed = 0u64;
        for kind in &self.config.eviction_order {
            if freed >= required {
                break;
            }
            let target = match state.pools.get(kind) {
                Some(pool) if pool.is_evictable() => (pool.used() / 2).min(required - freed),
                _ => continue,
            };
            if target == 0 {
                continue;
            }
            let plan = match state.pools.get(kind) {
                Some(pool) => eviction::plan_eviction(pool, target),
                None => continue,
            };
            freed += self.execute_plan(state, *kind, plan);
        }
        if freed > 0 {
            info!(freed, required, "global eviction pass");
        }
        freed
    }
}

/// Sum of live usage across all pools.
pub(crate) fn total_used(state: &ManagerState) -> u64 {
    state.pools.values().map(Pool::used).sum()
}

fn owning_pool(state: &ManagerState, id: BlockId) -> Option<PoolKind> {
    state
        .pools
        .values()
        .find(|pool| pool.contains(id))
        .map(Pool::kind)
}

fn push_history(state: &mut ManagerState, record: AllocationRecord) {
    if state.history.len() == HISTORY_CAP {
        state.history.pop_front();
    }
    state.history.push_back(record);
}

pub(crate) fn push_cleanup_history(state: &mut ManagerState, report: CleanupReport) {
    if state.cleanup_history.len() == CLEANUP_HISTORY_CAP {
        state.cleanup_history.pop_front();
    }
    state.cleanup_history.push_back(report);
}

/// Run a payload's release hook if the manager holds the only reference;
/// otherwise park it for the deferred sweep. Release failures are logged
/// and swallowed; the accounting has already been corrected by then.
fn release_payload(state: &mut ManagerState, mut payload: SharedPayload) {
    match Arc::get_mut(&mut payload) {
        Some(p) => {
            if let Err(error) = p.release() {
                warn!(%error, "payload release hook failed");
            }
        }
        None => state.deferred.push(payload),
    }
}

/// Release every deferred payload that has become unreferenced. Returns
/// how many were released.
pub(crate) fn sweep_deferred(state: &mut ManagerState) -> usize {
    let mut released = 0usize;
    let mut retained = Vec::new();
    for mut payload in state.deferred.drain(..) {
        match Arc::get_mut(&mut payload) {
            Some(p) => {
                if let Err(error) = p.release() {
                    warn!(%error, "deferred payload release failed");
                }
                released += 1;
            }
            None => retained.push(payload),
        }
    }
    state.deferred = retained;
    released
}

/// Holds a block for the duration of a scope; deallocates on drop.
pub struct AllocationGuard<'a> {
    manager: &'a MemoryManager,
    id: BlockId,
}

impl AllocationGuard<'_> {
    /// The guarded block's id.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Touch the guarded block.
    pub fn payload(&self) -> Option<SharedPayload> {
        self.manager.touch(self.id)
    }
}

impl Drop for AllocationGuard<'_> {
    fn drop(&mut self) {
        self.manager.deallocate(self.id);
    }
}

// ── Background task plumbing ───────────────────────────────────────

/// Handle to a periodic background task.
pub(crate) struct TaskHandle {
    shutdown_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl TaskHandle {
    /// Signal shutdown and join, waiting out any in-flight tick.
    pub(crate) fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if self.thread.join().is_err() {
            warn!("background task panicked");
        }
    }
}

/// Spawn a named thread that runs `tick` on an interval until shut down
/// or until the manager is dropped (the task holds only a weak handle, so
/// a tick can never run against a destroyed manager).
pub(crate) fn spawn_periodic(
    name: &'static str,
    interval: Duration,
    manager: &Arc<MemoryManager>,
    mut tick: impl FnMut(&MemoryManager) + Send + 'static,
) -> Option<TaskHandle> {
    let weak = Arc::downgrade(manager);
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let ticker = crossbeam_channel::tick(interval);
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            crossbeam_channel::select! {
                recv(ticker) -> _ => {
                    let Some(manager) = weak.upgrade() else { break };
                    tick(&manager);
                }
                recv(shutdown_rx) -> _ => break,
            }
        });
    match spawned {
        Ok(thread) => Some(TaskHandle {
            shutdown_tx,
            thread,
        }),
        Err(error) => {
            warn!(task = name, %error, "failed to spawn background task");
            None
        }
    }
}
