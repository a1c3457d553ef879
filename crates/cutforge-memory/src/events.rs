//! Diagnostic events emitted by the manager.
//!
//! The presentation layer subscribes through [`EventBus::subscribe`] and
//! drains its receiver at its own pace; emission never blocks the
//! allocation path.

use crate::pool::PoolKind;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What a `MemoryWarning` event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Process RSS crossed the warning threshold.
    ProcessMemory,
    /// Process RSS crossed the critical threshold.
    ProcessMemoryCritical,
    /// An allocation ran into the global ceiling.
    GlobalLimit,
}

/// Why memory was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeReason {
    /// Caller released the block.
    Deallocated,
    /// The eviction policy reclaimed the block.
    Evicted,
}

/// A diagnostic event.
#[derive(Debug, Clone)]
pub enum MemoryEvent {
    /// Memory pressure crossed a configured threshold.
    MemoryWarning {
        kind: WarningKind,
        current: u64,
        threshold: u64,
    },
    /// A pool is full or nearly full.
    PoolOverflow {
        pool: PoolKind,
        used: u64,
        capacity: u64,
    },
    /// A block was removed and its bytes returned to the pool.
    MemoryFreed {
        pool: PoolKind,
        size: u64,
        reason: FreeReason,
    },
    /// An allocation could not be satisfied.
    AllocationFailed { reason: String, requested: u64 },
}

/// Fan-out of [`MemoryEvent`]s to any number of subscribers.
///
/// Disconnected subscribers are dropped lazily on the next emit.
pub(crate) struct EventBus {
    senders: Mutex<Vec<Sender<MemoryEvent>>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber.
    pub(crate) fn subscribe(&self) -> Receiver<MemoryEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub(crate) fn emit(&self, event: MemoryEvent) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
