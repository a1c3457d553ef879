//! CutForge Memory - Pooled memory resource manager
//!
//! Arbitrates a finite memory budget across the workload classes of a
//! video editor: decoded frame buffers, preview cache, effects scratch,
//! AI model weights, temporary data, and thumbnails.
//!
//! - Per-class bounded pools with exact usage accounting
//! - Priority-tagged blocks; Critical blocks are never auto-evicted
//! - Eviction by priority, then recency, then access frequency
//! - A global ceiling across all pools
//! - Periodic usage monitoring with threshold events
//! - Periodic and on-demand cleanup passes
//!
//! Construct a [`MemoryManager`], share it by reference (wrap in an `Arc`
//! to run the background tasks), and call [`MemoryManager::shutdown`]
//! before teardown.

pub mod block;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod events;
mod eviction;
pub mod frame_buffers;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod stats;

pub use block::{Block, BlockId, Payload, Priority, SharedPayload};
pub use cleanup::{CleanupReport, PoolCleanup};
pub use config::{MemoryConfig, PoolConfig};
pub use error::{MemoryError, MemoryResult};
pub use events::{FreeReason, MemoryEvent, WarningKind};
pub use frame_buffers::{FrameBufferPayload, VIDEO_FRAME_TAG};
pub use manager::{
    AllocationGuard, AllocationRecord, AllocationRequest, HistoryOp, MemoryManager,
};
pub use monitor::{MemorySample, SysinfoProbe, SystemMemoryProbe};
pub use pool::{Pool, PoolKind};
pub use stats::{MemoryStats, PoolStats};
