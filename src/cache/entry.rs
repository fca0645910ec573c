//! Cache entry types, in memory and on disk.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metadata::MetadataRecord;

/// A cached lookup result as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub url: String,
  pub metadata: Arc<MetadataRecord>,
  /// When the record was committed
  pub fetched_at: DateTime<Utc>,
  /// TTL in effect when the entry was read
  pub ttl: Duration,
}

impl CacheEntry {
  /// An entry is fresh while `now - fetched_at < ttl`.
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now - self.fetched_at < self.ttl
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.fetched_at
  }
}

/// Persisted form of an entry. The TTL is deliberately absent; it is applied
/// from configuration at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
  pub data: MetadataRecord,
  /// Commit time in epoch milliseconds
  pub timestamp: i64,
}
