//! Metadata cache with time-based freshness.
//!
//! This module provides:
//! - An in-memory mirror that serves all reads
//! - Write-behind persistence to a durable backend (SQLite by default)
//! - Freshness evaluated at read time against the configured TTL, so a TTL
//!   change applies to entries already on disk
//! - Pruning of entries stale for a grace multiple of the TTL

mod entry;
mod layer;
mod storage;

pub use entry::{CacheEntry, StoredEntry};
pub use layer::{CacheSettings, MetadataCache};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
