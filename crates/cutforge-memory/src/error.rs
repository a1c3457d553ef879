//! Error types for the memory subsystem.

use crate::pool::PoolKind;
use thiserror::Error;

/// Errors that can occur in memory manager operations.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No pool is registered under the given name.
    #[error("Unknown memory pool: {name}")]
    PoolNotFound { name: String },

    /// The pool cannot fit the request even after evicting everything
    /// below Critical priority.
    #[error("Pool {pool} exhausted: requested {requested} bytes, {available} reclaimable")]
    PoolExhausted {
        pool: PoolKind,
        requested: u64,
        available: u64,
    },

    /// The allocation would push total usage past the global ceiling and
    /// global eviction could not cover the shortfall.
    #[error("Global memory limit exceeded: requested {requested} bytes with {used}/{limit} in use")]
    GlobalLimitExceeded {
        requested: u64,
        used: u64,
        limit: u64,
    },

    /// A shrink cannot be satisfied without evicting Critical blocks.
    #[error("Cannot resize pool {pool} to {requested} bytes: {required} bytes pinned")]
    InvalidResize {
        pool: PoolKind,
        requested: u64,
        required: u64,
    },

    /// Zero-sized allocation request.
    #[error("Allocation size must be greater than zero")]
    InvalidSize,
}

/// Result type alias for memory manager operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
