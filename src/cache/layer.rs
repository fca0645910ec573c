//! In-memory cache mirror with write-behind persistence.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::entry::{CacheEntry, StoredEntry};
use super::storage::{CacheStorage, NoopStorage};
use crate::clock::Clock;
use crate::config::Config;
use crate::metadata::MetadataRecord;

/// Freshness policy for the cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
  /// How long a committed record counts as fresh
  pub ttl: Duration,
  /// Entries stale for longer than `ttl * prune_grace` are dropped by
  /// [`MetadataCache::prune`]
  pub prune_grace: i32,
}

impl From<&Config> for CacheSettings {
  fn from(config: &Config) -> Self {
    Self {
      ttl: config.cache_ttl(),
      prune_grace: config.prune_grace,
    }
  }
}

/// Keyed store of previously resolved metadata.
///
/// Keys are exact URL strings. Reads are served from memory; mutations are
/// queued to a background writer that applies them to the durable backend in
/// order. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct MetadataCache {
  inner: Arc<CacheInner>,
}

struct CacheInner {
  entries: Mutex<HashMap<String, Mirrored>>,
  settings: CacheSettings,
  clock: Arc<dyn Clock>,
  writes: mpsc::UnboundedSender<StorageOp>,
}

#[derive(Clone)]
struct Mirrored {
  metadata: Arc<MetadataRecord>,
  fetched_at: DateTime<Utc>,
}

enum StorageOp {
  Store { url: String, entry: StoredEntry },
  Remove(String),
  Clear,
  RemoveOlderThan(i64),
  Flush(oneshot::Sender<()>),
}

impl MetadataCache {
  /// Open the cache on top of `storage`, loading its contents into memory.
  ///
  /// Must be called from within a tokio runtime; the background writer is
  /// spawned here.
  pub fn open(
    storage: Arc<dyn CacheStorage>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let entries: HashMap<String, Mirrored> = storage
      .load_all()?
      .into_iter()
      .filter_map(|(url, stored)| {
        let fetched_at = DateTime::from_timestamp_millis(stored.timestamp)?;
        Some((
          url,
          Mirrored {
            metadata: Arc::new(stored.data),
            fetched_at,
          },
        ))
      })
      .collect();
    debug!(entries = entries.len(), "cache loaded");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_behind(storage, rx));

    Ok(Self {
      inner: Arc::new(CacheInner {
        entries: Mutex::new(entries),
        settings,
        clock,
        writes: tx,
      }),
    })
  }

  /// A cache that lives only as long as the process.
  pub fn in_memory(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_behind(Arc::new(NoopStorage), rx));

    Self {
      inner: Arc::new(CacheInner {
        entries: Mutex::new(HashMap::new()),
        settings,
        clock,
        writes: tx,
      }),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.inner.clock.now()
  }

  /// Look up an entry, fresh or stale.
  pub fn get(&self, url: &str) -> Option<CacheEntry> {
    let entries = self.lock();
    entries.get(url).map(|mirrored| self.entry(url, mirrored))
  }

  /// Look up an entry only if it is still fresh.
  pub fn get_fresh(&self, url: &str) -> Option<CacheEntry> {
    let now = self.now();
    self.get(url).filter(|entry| entry.is_fresh(now))
  }

  pub fn is_fresh(&self, url: &str) -> bool {
    self.get_fresh(url).is_some()
  }

  /// Commit a record for `url`, replacing any previous entry and stamping it
  /// with the current time.
  pub fn put(&self, url: &str, metadata: MetadataRecord) -> CacheEntry {
    let mirrored = Mirrored {
      metadata: Arc::new(metadata),
      fetched_at: self.now(),
    };
    let entry = self.entry(url, &mirrored);

    self.lock().insert(url.to_string(), mirrored);
    self.enqueue(StorageOp::Store {
      url: url.to_string(),
      entry: StoredEntry {
        data: entry.metadata.as_ref().clone(),
        timestamp: entry.fetched_at.timestamp_millis(),
      },
    });

    entry
  }

  /// Drop the entry for `url`. Returns whether one existed.
  pub fn invalidate(&self, url: &str) -> bool {
    let existed = self.lock().remove(url).is_some();
    self.enqueue(StorageOp::Remove(url.to_string()));
    existed
  }

  pub fn clear(&self) {
    self.lock().clear();
    self.enqueue(StorageOp::Clear);
  }

  /// Remove entries that have been stale for longer than `ttl * prune_grace`.
  /// Returns how many in-memory entries were removed.
  ///
  /// Compared at millisecond precision, the resolution storage keeps.
  pub fn prune(&self, now: DateTime<Utc>) -> usize {
    let settings = self.inner.settings;
    let retention = settings.ttl * settings.prune_grace.saturating_add(1);
    let cutoff_ms = (now - retention).timestamp_millis();

    let removed = {
      let mut entries = self.lock();
      let before = entries.len();
      entries.retain(|_, mirrored| mirrored.fetched_at.timestamp_millis() >= cutoff_ms);
      before - entries.len()
    };

    self.enqueue(StorageOp::RemoveOlderThan(cutoff_ms));
    debug!(removed, "cache pruned");
    removed
  }

  /// Snapshot of all entries, sorted by URL.
  pub fn entries(&self) -> Vec<CacheEntry> {
    let mut snapshot: Vec<CacheEntry> = self
      .lock()
      .iter()
      .map(|(url, mirrored)| self.entry(url, mirrored))
      .collect();
    snapshot.sort_by(|a, b| a.url.cmp(&b.url));
    snapshot
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Wait until every mutation queued so far has reached durable storage.
  pub async fn flush(&self) {
    let (tx, rx) = oneshot::channel();
    self.enqueue(StorageOp::Flush(tx));
    let _ = rx.await;
  }

  fn entry(&self, url: &str, mirrored: &Mirrored) -> CacheEntry {
    CacheEntry {
      url: url.to_string(),
      metadata: Arc::clone(&mirrored.metadata),
      fetched_at: mirrored.fetched_at,
      ttl: self.inner.settings.ttl,
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Mirrored>> {
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn enqueue(&self, op: StorageOp) {
    if self.inner.writes.send(op).is_err() {
      warn!("cache writer has stopped; change not persisted");
    }
  }
}

impl StorageOp {
  fn apply(self, storage: &dyn CacheStorage) -> Result<()> {
    match self {
      StorageOp::Store { url, entry } => storage.store(&url, &entry),
      StorageOp::Remove(url) => storage.remove(&url),
      StorageOp::Clear => storage.clear(),
      StorageOp::RemoveOlderThan(cutoff) => storage.remove_older_than(cutoff).map(|_| ()),
      StorageOp::Flush(done) => {
        let _ = done.send(());
        Ok(())
      }
    }
  }
}

/// Apply queued mutations to storage one at a time, in submission order.
async fn write_behind(storage: Arc<dyn CacheStorage>, mut rx: mpsc::UnboundedReceiver<StorageOp>) {
  while let Some(op) = rx.recv().await {
    if let StorageOp::Flush(done) = op {
      let _ = done.send(());
      continue;
    }

    let storage = Arc::clone(&storage);
    match tokio::task::spawn_blocking(move || op.apply(storage.as_ref())).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "cache write failed"),
      Err(e) => warn!(error = %e, "cache writer task failed"),
    }
  }
}
