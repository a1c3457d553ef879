//! Eviction policy: priority-first, then least-recently-used, then
//! least-frequently-used.
//!
//! Planning is pure selection over a pool; execution goes through the
//! manager's removal path so accounting, history, and events stay in one
//! place. Critical blocks are never candidates.

use crate::block::{BlockId, Priority};
use crate::pool::Pool;

/// The outcome of planning an eviction against one pool.
pub(crate) struct EvictionPlan {
    /// Blocks to remove, in eviction order.
    pub victims: Vec<BlockId>,
    /// Bytes the plan frees if executed in full.
    pub reclaimable: u64,
}

impl EvictionPlan {
    /// Whether executing the plan frees at least `required` bytes.
    pub fn covers(&self, required: u64) -> bool {
        self.reclaimable >= required
    }
}

/// Select blocks to evict from `pool` until `required` bytes are covered
/// or the non-Critical candidates run out.
///
/// Candidates are ordered by `(priority asc, last_access asc,
/// access_count asc)`: lowest priority first, then least recently touched,
/// then least frequently touched.
pub(crate) fn plan_eviction(pool: &Pool, required: u64) -> EvictionPlan {
    let mut candidates: Vec<_> = pool
        .blocks()
        .filter(|b| b.priority() < Priority::Critical)
        .collect();
    candidates.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then(a.last_access.cmp(&b.last_access))
            .then(a.access_count.cmp(&b.access_count))
    });

    let mut victims = Vec::new();
    let mut reclaimable = 0u64;
    for block in candidates {
        if reclaimable >= required {
            break;
        }
        victims.push(block.id());
        reclaimable += block.size();
    }

    EvictionPlan {
        victims,
        reclaimable,
    }
}
