use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{CacheSettings, CacheStorage, MetadataCache, NoopStorage, SqliteStorage};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::event::HoverEvent;
use crate::fetch::{FetchCoordinator, FetchOutcome, HttpFetcher, Priority};
use crate::hover::{HoverSessionManager, TargetId};
use crate::metadata::MetaTagParser;
use crate::placement::{Rect, Viewport};
use crate::prefetch::PrefetchScheduler;
use crate::render::Renderer;

/// Link the CLI pretends to hover.
const CLI_TARGET: TargetId = 1;

/// The assembled pipeline: cache, coordinator, prefetcher and hover sessions.
pub struct App {
  config: Config,
  cache: MetadataCache,
  coordinator: FetchCoordinator,
  prefetch: PrefetchScheduler,
  hover: HoverSessionManager,
}

impl App {
  pub fn new(config: Config, renderer: Arc<dyn Renderer>) -> Result<Self> {
    let storage: Arc<dyn CacheStorage> = if config.persist_cache {
      let path = config.cache_path()?;
      info!(path = %path.display(), "opening cache");
      Arc::new(SqliteStorage::open(&path)?)
    } else {
      Arc::new(NoopStorage)
    };

    let cache = MetadataCache::open(
      storage,
      CacheSettings::from(&config),
      Arc::new(SystemClock),
    )?;
    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
    let coordinator = FetchCoordinator::new(
      cache.clone(),
      fetcher,
      Arc::new(MetaTagParser),
      (&config).into(),
    );
    let prefetch = PrefetchScheduler::new(coordinator.clone(), (&config).into());
    let hover = HoverSessionManager::new(coordinator.clone(), renderer, (&config).into());

    Ok(Self {
      config,
      cache,
      coordinator,
      prefetch,
      hover,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &MetadataCache {
    &self.cache
  }

  pub fn prefetch(&self) -> &PrefetchScheduler {
    &self.prefetch
  }

  /// Look up one URL at hover priority, fetching if needed.
  pub async fn preview(&self, url: &str) -> FetchOutcome {
    self.coordinator.resolve(url, Priority::Hover).await
  }

  /// Hover `url` for `hold`, then leave. Renderer handoffs happen as the
  /// session progresses.
  pub async fn hover(&self, url: &str, hold: Duration) {
    let viewport = Viewport {
      width: 1280.0,
      height: 800.0,
    };
    let rect = Rect {
      x: 100.0,
      y: 120.0,
      width: 180.0,
      height: 20.0,
    };

    self.hover.handle(HoverEvent::Enter {
      target: CLI_TARGET,
      url: url.to_string(),
      rect,
      viewport,
    });
    tokio::time::sleep(hold).await;
    self.hover.handle(HoverEvent::Leave { target: CLI_TARGET });
  }

  /// Wait for queued cache writes to reach durable storage.
  pub async fn shutdown(&self) {
    self.cache.flush().await;
  }
}
