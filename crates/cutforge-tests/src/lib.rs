//! Integration test crate for CutForge Studio.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on the core and memory crates to verify they work together.

#[cfg(test)]
mod memory;
