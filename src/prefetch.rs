//! Opportunistic cache warming for links the user can currently see.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::config::Config;
use crate::fetch::{FetchCoordinator, Priority};

#[derive(Debug, Clone, Copy)]
pub struct PrefetchSettings {
  pub enabled: bool,
  /// Cap on prefetches outstanding at once
  pub batch_size: usize,
  /// Re-scan period for the periodic loop
  pub interval: Duration,
}

impl From<&Config> for PrefetchSettings {
  fn from(config: &Config) -> Self {
    Self {
      enabled: config.enabled && config.prefetch_enabled,
      batch_size: config.prefetch_batch_size,
      interval: config.prefetch_interval(),
    }
  }
}

/// Issues low-priority lookups through the coordinator. Never renders.
#[derive(Clone)]
pub struct PrefetchScheduler {
  coordinator: FetchCoordinator,
  settings: PrefetchSettings,
  permits: Arc<Semaphore>,
}

impl PrefetchScheduler {
  pub fn new(coordinator: FetchCoordinator, settings: PrefetchSettings) -> Self {
    Self {
      coordinator,
      permits: Arc::new(Semaphore::new(settings.batch_size)),
      settings,
    }
  }

  /// False when either the master switch or prefetching is turned off.
  pub fn is_enabled(&self) -> bool {
    self.settings.enabled
  }

  /// Prefetch the given visible links.
  ///
  /// URLs already fresh in the cache or already in flight are skipped, as
  /// are duplicates. Stops issuing once `batch_size` prefetches are
  /// outstanding. Returns how many were issued.
  pub fn schedule<I>(&self, urls: I) -> usize
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    if !self.settings.enabled {
      return 0;
    }

    let cache = self.coordinator.cache();
    let mut seen = HashSet::new();
    let mut issued = 0;

    for url in urls {
      let url = url.as_ref();
      if !seen.insert(url.to_string()) {
        continue;
      }
      if cache.is_fresh(url) || self.coordinator.is_in_flight(url) {
        trace!(url, "prefetch skipped");
        continue;
      }

      let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
        debug!(url, "prefetch cap reached");
        break;
      };

      let handle = self.coordinator.resolve(url, Priority::Prefetch);
      let url = url.to_string();
      tokio::spawn(async move {
        let _permit = permit;
        match handle.await {
          Ok(record) => debug!(url, enabled = record.enabled, "prefetched"),
          Err(e) if e.is_silent() => trace!(url, error = %e, "prefetch not run"),
          Err(e) => debug!(url, error = %e, "prefetch failed"),
        }
      });
      issued += 1;
    }

    issued
  }

  /// Wait until no prefetch is outstanding.
  pub async fn wait_idle(&self) {
    let all = u32::try_from(self.settings.batch_size).unwrap_or(u32::MAX);
    // Closed only if the semaphore is dropped, which cannot happen while we hold it
    let _ = self.permits.acquire_many(all).await;
  }

  /// Prefetch whenever the visible link set changes and on a fixed interval.
  /// The loop ends when the sender is dropped.
  pub fn spawn(&self, mut visible: watch::Receiver<Vec<String>>) -> JoinHandle<()> {
    let scheduler = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(scheduler.settings.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          changed = visible.changed() => {
            if changed.is_err() {
              break;
            }
          }
          _ = ticker.tick() => {}
        }

        let urls = visible.borrow_and_update().clone();
        let issued = scheduler.schedule(&urls);
        if issued > 0 {
          debug!(issued, visible = urls.len(), "prefetch batch issued");
        }
      }
    })
  }
}
