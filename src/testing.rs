//! Test doubles shared by the pipeline's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::Result;

use crate::cache::{CacheSettings, CacheStorage, MetadataCache, StoredEntry};
use crate::clock::ManualClock;
use crate::error::FetchError;
use crate::fetch::{CoordinatorConfig, FetchCoordinator, FetchFuture, PageFetcher};
use crate::hover::TargetId;
use crate::metadata::MetaTagParser;
use crate::placement::Position;
use crate::render::{RenderRequest, Renderer};

/// HTML page carrying the given meta tags.
pub fn page(tags: &[(&str, &str)]) -> String {
  let metas: String = tags
    .iter()
    .map(|(name, content)| format!("<meta name=\"{name}\" content=\"{content}\">\n"))
    .collect();
  format!("<html><head>\n{metas}</head><body></body></html>")
}

/// An opted-in product page titled `title`.
pub fn product_page(title: &str) -> String {
  page(&[
    ("itabs:enabled", "true"),
    ("itabs:title", title),
    ("itabs:tab:reviews", "Great sound"),
  ])
}

/// Fetcher serving canned pages after a fixed delay, counting calls per URL.
pub struct FakeFetcher {
  delay: Duration,
  pages: Mutex<HashMap<String, Result<String, FetchError>>>,
  calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
  pub fn new(delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      delay,
      pages: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    })
  }

  pub fn serve(&self, url: &str, body: String) {
    self.pages.lock().unwrap().insert(url.to_string(), Ok(body));
  }

  pub fn fail(&self, url: &str) {
    self
      .pages
      .lock()
      .unwrap()
      .insert(url.to_string(), Err(FetchError::network(url, "connection refused")));
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
  }
}

impl PageFetcher for FakeFetcher {
  fn fetch(&self, url: &str, _timeout: Duration) -> FetchFuture {
    self.calls.lock().unwrap().push(url.to_string());
    let page = self
      .pages
      .lock()
      .unwrap()
      .get(url)
      .cloned()
      .unwrap_or_else(|| Err(FetchError::network(url, "404 Not Found")));
    let delay = self.delay;

    Box::pin(async move {
      tokio::time::sleep(delay).await;
      page
    })
  }
}

/// Storage that only counts writes.
#[derive(Default)]
pub struct CountingStorage {
  pub stores: AtomicUsize,
}

impl CacheStorage for CountingStorage {
  fn load_all(&self) -> Result<Vec<(String, StoredEntry)>> {
    Ok(Vec::new())
  }

  fn store(&self, _url: &str, _entry: &StoredEntry) -> Result<()> {
    self.stores.fetch_add(1, Ordering::SeqCst);
    Ok(())
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

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
  Show {
    target: TargetId,
    url: String,
    generation: u64,
  },
  Reposition {
    target: TargetId,
    generation: u64,
    position: Position,
  },
  SelectTab {
    target: TargetId,
    tab: String,
  },
  Hide {
    target: TargetId,
    generation: u64,
  },
}

/// Renderer that records what it was asked to do.
#[derive(Default)]
pub struct RecordingRenderer {
  calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
  pub fn calls(&self) -> Vec<RenderCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn shows(&self) -> usize {
    self
      .calls()
      .iter()
      .filter(|call| matches!(call, RenderCall::Show { .. }))
      .count()
  }
}

impl Renderer for RecordingRenderer {
  fn show(&self, request: RenderRequest) {
    self.calls.lock().unwrap().push(RenderCall::Show {
      target: request.target,
      url: request.url,
      generation: request.session_generation,
    });
  }

  fn reposition(&self, target: TargetId, generation: u64, position: Position) {
    self.calls.lock().unwrap().push(RenderCall::Reposition {
      target,
      generation,
      position,
    });
  }

  fn select_tab(&self, target: TargetId, _generation: u64, tab: &str) {
    self.calls.lock().unwrap().push(RenderCall::SelectTab {
      target,
      tab: tab.to_string(),
    });
  }

  fn hide(&self, target: TargetId, generation: u64) {
    self
      .calls
      .lock()
      .unwrap()
      .push(RenderCall::Hide { target, generation });
  }
}

/// Coordinator over an in-memory cache with a 24h TTL.
pub fn coordinator(
  fetcher: Arc<FakeFetcher>,
  clock: Arc<ManualClock>,
  config: CoordinatorConfig,
) -> FetchCoordinator {
  let cache = MetadataCache::in_memory(
    CacheSettings {
      ttl: chrono::Duration::hours(24),
      prune_grace: 7,
    },
    clock,
  );
  FetchCoordinator::new(cache, fetcher, Arc::new(MetaTagParser), config)
}
