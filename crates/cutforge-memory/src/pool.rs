//! Named, bounded pools of tracked blocks.

use crate::block::{Block, BlockId};
use crate::error::MemoryError;
use cutforge_core::memory_budget;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The fixed set of workload classes the manager arbitrates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Decoded frame buffers for clips under the playhead.
    VideoFrames,
    /// Rendered preview cache for timeline scrubbing.
    PreviewCache,
    /// Scratch space for effect render passes.
    EffectsScratch,
    /// Resident AI model weights.
    AiModels,
    /// Short-lived intermediate data.
    TempData,
    /// Timeline thumbnail strips.
    Thumbnails,
}

impl PoolKind {
    /// All pool kinds, in registry order.
    pub const ALL: [PoolKind; 6] = [
        PoolKind::VideoFrames,
        PoolKind::PreviewCache,
        PoolKind::EffectsScratch,
        PoolKind::AiModels,
        PoolKind::TempData,
        PoolKind::Thumbnails,
    ];

    /// Registry name for this pool.
    pub fn name(self) -> &'static str {
        match self {
            Self::VideoFrames => "video_frames",
            Self::PreviewCache => "preview_cache",
            Self::EffectsScratch => "effects_scratch",
            Self::AiModels => "ai_models",
            Self::TempData => "temp_data",
            Self::Thumbnails => "thumbnails",
        }
    }

    /// Default capacity in bytes.
    pub fn default_capacity(self) -> u64 {
        match self {
            Self::VideoFrames => memory_budget::VIDEO_FRAME_POOL,
            Self::PreviewCache => memory_budget::PREVIEW_CACHE_POOL,
            Self::EffectsScratch => memory_budget::EFFECTS_SCRATCH_POOL,
            Self::AiModels => memory_budget::AI_MODEL_POOL,
            Self::TempData => memory_budget::TEMP_DATA_POOL,
            Self::Thumbnails => memory_budget::THUMBNAIL_POOL,
        }
    }

    /// Whether global eviction may reclaim from this pool by default.
    ///
    /// Frame buffers and model weights are excluded by policy: dropping
    /// them mid-operation stalls playback or forces a model reload.
    pub fn default_evictable(self) -> bool {
        match self {
            Self::VideoFrames | Self::AiModels => false,
            Self::PreviewCache | Self::EffectsScratch | Self::TempData | Self::Thumbnails => true,
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PoolKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoolKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| MemoryError::PoolNotFound {
                name: s.to_string(),
            })
    }
}

/// A bounded collection of blocks with live usage accounting.
///
/// Invariants, maintained by every insert/remove:
/// - `used` equals the sum of contained block sizes
/// - `priority_counts` matches the actual per-priority block counts
pub struct Pool {
    kind: PoolKind,
    capacity: u64,
    used: u64,
    evictable: bool,
    blocks: HashMap<BlockId, Block>,
    priority_counts: [usize; 4],
}

impl Pool {
    pub(crate) fn new(kind: PoolKind, capacity: u64, evictable: bool) -> Self {
        Self {
            kind,
            capacity,
            used: 0,
            evictable,
            blocks: HashMap::new(),
            priority_counts: [0; 4],
        }
    }

    /// Pool kind.
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Live usage in bytes.
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Whether global eviction may reclaim from this pool.
    pub fn is_evictable(&self) -> bool {
        self.evictable
    }

    /// Number of tracked blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Fraction of capacity in use.
    pub fn usage_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return if self.used == 0 { 0.0 } else { 1.0 };
        }
        self.used as f64 / self.capacity as f64
    }

    /// Bytes the pool can still accept without eviction.
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    /// Per-priority block counts, indexed by `Priority::index()`.
    pub fn priority_counts(&self) -> [usize; 4] {
        self.priority_counts
    }

    pub(crate) fn set_capacity(&mut self, capacity: u64) {
        self.capacity = capacity;
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub(crate) fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub(crate) fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub(crate) fn insert(&mut self, block: Block) {
        self.used += block.size;
        self.priority_counts[block.priority.index()] += 1;
        self.blocks.insert(block.id, block);
    }

    pub(crate) fn remove(&mut self, id: BlockId) -> Option<Block> {
        let block = self.blocks.remove(&id)?;
        self.used = self.used.saturating_sub(block.size);
        self.priority_counts[block.priority.index()] =
            self.priority_counts[block.priority.index()].saturating_sub(1);
        Some(block)
    }
}
