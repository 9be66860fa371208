//! Versioned cache of static and cacheable resources.
//!
//! This module provides:
//! - Generations: a manifest is installed into a new generation in one
//!   transaction, then activated, evicting every other generation
//! - Lookups and cache fills against the current generation only
//! - Best-effort semantics: a cache fault never fails the request that caused it

mod manager;
mod storage;
mod traits;

pub use manager::CacheManager;
pub use storage::{CacheStore, SqliteCache};
pub use traits::CacheSource;
