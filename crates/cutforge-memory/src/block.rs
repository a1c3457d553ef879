//! Tracked memory blocks: identity, priority, and the opaque payload.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Unique identifier for a tracked block.
///
/// Generated at allocation time; remains valid until the block reaches a
/// terminal state (deallocated or evicted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(Uuid);

impl BlockId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Eviction-order hint for a block.
///
/// `Critical` blocks are never selected by automatic eviction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    /// Index into a fixed-size per-priority table.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// An opaque payload tracked by a block.
///
/// Payload types may opt into the release capability by overriding
/// [`Payload::release`]; the manager invokes it exactly once, when the
/// owning block has reached a terminal state and no outside handles remain.
/// Release failures are logged, never propagated: accounting does not
/// depend on release succeeding.
pub trait Payload: Any + Send + Sync {
    /// Typed access for read-back paths.
    fn as_any(&self) -> &dyn Any;

    /// Release hook, called once ownership has returned to the manager.
    fn release(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Shared handle to a payload, handed out by `touch` without copying.
pub type SharedPayload = Arc<dyn Payload>;

/// One tracked allocation unit.
#[derive(Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) size: u64,
    pub(crate) priority: Priority,
    pub(crate) payload: SharedPayload,
    pub(crate) created_at: Instant,
    pub(crate) last_access: Instant,
    pub(crate) access_count: u64,
    pub(crate) description: String,
    pub(crate) tags: HashSet<String>,
    /// Secondary-index key, kept on the block so removal invalidates the
    /// index in O(1).
    pub(crate) key: Option<String>,
}

impl Block {
    pub(crate) fn new(
        size: u64,
        priority: Priority,
        payload: SharedPayload,
        description: String,
        tags: HashSet<String>,
        key: Option<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: BlockId::generate(),
            size,
            priority,
            payload,
            created_at: now,
            last_access: now,
            access_count: 0,
            description,
            tags,
            key,
        }
    }

    /// Record an access: bumps the recency clock and the access counter.
    pub(crate) fn touch(&mut self) {
        self.last_access = Instant::now();
        self.access_count += 1;
    }

    /// Block id.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// When the block was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Accounted size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Eviction priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Number of times the block has been touched.
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Seconds since the block was last touched (or created).
    pub fn idle_secs(&self) -> f64 {
        self.last_access.elapsed().as_secs_f64()
    }

    /// Whether the block carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// Payload is opaque; Debug covers the accounting fields only.
impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("priority", &self.priority)
            .field("access_count", &self.access_count)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl Payload for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_block_ids_unique() {
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(BlockId::generate()));
        }
    }

    #[test]
    fn test_touch_bumps_counters() {
        let mut block = Block::new(
            64,
            Priority::Medium,
            Arc::new(Dummy),
            String::new(),
            HashSet::new(),
            None,
        );
        let before = block.last_access;
        block.touch();
        block.touch();
        assert_eq!(block.access_count(), 2);
        assert!(block.last_access >= before);
        assert!(block.last_access >= block.created_at());
    }
}
