//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use super::entry::StoredEntry;
use crate::metadata::MetadataRecord;

/// Trait for durable cache backends.
///
/// Calls are blocking; the cache layer runs them off the async path.
pub trait CacheStorage: Send + Sync {
  /// Load every stored entry, keyed by URL.
  fn load_all(&self) -> Result<Vec<(String, StoredEntry)>>;

  /// Insert or overwrite the entry for a URL.
  fn store(&self, url: &str, entry: &StoredEntry) -> Result<()>;

  /// Remove the entry for a URL, if any.
  fn remove(&self, url: &str) -> Result<()>;

  /// Remove every entry.
  fn clear(&self) -> Result<()>;

  /// Remove entries committed before `cutoff_ms`. Returns how many went.
  fn remove_older_than(&self, cutoff_ms: i64) -> Result<usize>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - the in-memory mirror is all there is.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load_all(&self) -> Result<Vec<(String, StoredEntry)>> {
    Ok(Vec::new())
  }

  fn store(&self, _url: &str, _entry: &StoredEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _url: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }

  fn remove_older_than(&self, _cutoff_ms: i64) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per exact URL; data is the serialized metadata record
CREATE TABLE IF NOT EXISTS metadata_cache (
    url TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metadata_cache_timestamp
    ON metadata_cache(timestamp);
"#;

impl CacheStorage for SqliteStorage {
  fn load_all(&self) -> Result<Vec<(String, StoredEntry)>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT url, data, timestamp FROM metadata_cache")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let entries = rows
      .into_iter()
      .filter_map(|(url, data, timestamp)| {
        match serde_json::from_slice::<MetadataRecord>(&data) {
          Ok(data) => Some((url, StoredEntry { data, timestamp })),
          Err(e) => {
            warn!(url, error = %e, "skipping undecodable cache row");
            None
          }
        }
      })
      .collect();

    Ok(entries)
  }

  fn store(&self, url: &str, entry: &StoredEntry) -> Result<()> {
    let conn = self.lock()?;
    let data =
      serde_json::to_vec(&entry.data).map_err(|e| eyre!("Failed to serialize metadata: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO metadata_cache (url, data, timestamp) VALUES (?, ?, ?)",
        params![url, data, entry.timestamp],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, url: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM metadata_cache WHERE url = ?", params![url])
      .map_err(|e| eyre!("Failed to remove cache entry: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM metadata_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }

  fn remove_older_than(&self, cutoff_ms: i64) -> Result<usize> {
    let conn = self.lock()?;

    let removed = conn
      .execute(
        "DELETE FROM metadata_cache WHERE timestamp < ?",
        params![cutoff_ms],
      )
      .map_err(|e| eyre!("Failed to prune cache: {}", e))?;

    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(title: &str, timestamp: i64) -> StoredEntry {
    StoredEntry {
      data: MetadataRecord {
        enabled: true,
        title: title.to_string(),
        ..MetadataRecord::default()
      },
      timestamp,
    }
  }

  #[test]
  fn test_store_and_load_round_trips_through_sqlite() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    storage.store("https://a.example/", &entry("A", 10)).unwrap();
    storage.store("https://a.example/", &entry("A2", 20)).unwrap();
    storage.store("https://b.example/", &entry("B", 30)).unwrap();

    let mut loaded = storage.load_all().unwrap();
    loaded.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].0, "https://a.example/");
    assert_eq!(loaded[0].1, entry("A2", 20));
  }

  #[test]
  fn test_remove_and_prune() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store("old", &entry("old", 100)).unwrap();
    storage.store("edge", &entry("edge", 200)).unwrap();
    storage.store("new", &entry("new", 300)).unwrap();

    assert_eq!(storage.remove_older_than(200).unwrap(), 1);
    storage.remove("new").unwrap();

    let remaining = storage.load_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, "edge");
  }

  #[test]
  fn test_undecodable_rows_are_skipped() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store("good", &entry("good", 1)).unwrap();
    storage
      .lock()
      .unwrap()
      .execute(
        "INSERT INTO metadata_cache (url, data, timestamp) VALUES ('bad', x'00ff', 1)",
        [],
      )
      .unwrap();

    let loaded = storage.load_all().unwrap();

    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, "good");
  }

  #[test]
  fn test_clear() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.store("a", &entry("a", 1)).unwrap();

    storage.clear().unwrap();

    assert!(storage.load_all().unwrap().is_empty());
  }
}
