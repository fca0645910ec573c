//! Request coalescing and concurrency control for metadata fetches.
//!
//! At most one fetch+parse runs per URL. Every caller asking for a URL that
//! is already being fetched attaches to the same ticket as a waiter and gets
//! the same outcome. Tickets share a global concurrency ceiling: hover
//! requests queue for a slot, prefetch requests are dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = coordinator.resolve("https://shop.example/p/1", Priority::Hover);
//! match handle.await {
//!     Ok(record) if record.enabled => render(record),
//!     _ => {} // no preview
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::fetcher::PageFetcher;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::error::FetchError;
use crate::metadata::{normalize, DocumentParser, MetadataRecord};

/// What a resolved lookup yields
pub type FetchOutcome = Result<Arc<MetadataRecord>, FetchError>;

/// Who is asking. With no slot free, hover requests queue and prefetches
/// are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
  Prefetch,
  Hover,
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
  /// Ceiling on fetches running at once
  pub max_concurrent: usize,
  /// Bound on each fetch
  pub timeout: Duration,
}

impl From<&Config> for CoordinatorConfig {
  fn from(config: &Config) -> Self {
    Self {
      max_concurrent: config.max_concurrent_fetches,
      timeout: config.fetch_timeout(),
    }
  }
}

/// Deduplicating, budgeted front door to the page fetcher.
///
/// Cloning is cheap and clones share tickets and budget.
#[derive(Clone)]
pub struct FetchCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  cache: MetadataCache,
  fetcher: Arc<dyn PageFetcher>,
  parser: Arc<dyn DocumentParser>,
  config: CoordinatorConfig,
  state: Mutex<State>,
}

#[derive(Default)]
struct State {
  tickets: HashMap<String, Ticket>,
  /// Hover tickets waiting for a slot, oldest first
  queue: VecDeque<String>,
  running: usize,
  next_id: u64,
}

impl State {
  fn next_id(&mut self) -> u64 {
    self.next_id += 1;
    self.next_id
  }
}

/// One in-flight network+parse operation and everyone waiting on it.
struct Ticket {
  id: u64,
  phase: Phase,
  waiters: Vec<Waiter>,
}

enum Phase {
  Queued,
  Pending(AbortHandle),
}

struct Waiter {
  id: u64,
  tx: oneshot::Sender<FetchOutcome>,
}

impl FetchCoordinator {
  pub fn new(
    cache: MetadataCache,
    fetcher: Arc<dyn PageFetcher>,
    parser: Arc<dyn DocumentParser>,
    config: CoordinatorConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        cache,
        fetcher,
        parser,
        config,
        state: Mutex::new(State::default()),
      }),
    }
  }

  pub fn cache(&self) -> &MetadataCache {
    &self.inner.cache
  }

  /// Resolve metadata for `url`.
  ///
  /// 1. Fresh cache entry: the handle is ready immediately
  /// 2. Ticket already open for the URL: join it as a waiter, whatever
  ///    priority opened it
  /// 3. Otherwise open a ticket, starting it now if a slot is free. Without
  ///    a slot, hover tickets queue and prefetches are dropped.
  ///
  /// Dropping the handle withdraws interest; see [`FetchHandle::cancel`].
  pub fn resolve(&self, url: &str, priority: Priority) -> FetchHandle {
    let mut state = self.inner.lock();

    if let Some(entry) = self.inner.cache.get_fresh(url) {
      debug!(url, "cache hit");
      return FetchHandle::ready(url, Ok(entry.metadata));
    }

    let waiter_id = state.next_id();
    let (tx, rx) = oneshot::channel();

    if let Some(ticket) = state.tickets.get_mut(url) {
      ticket.waiters.push(Waiter { id: waiter_id, tx });
      debug!(url, waiters = ticket.waiters.len(), "joined in-flight fetch");
      return FetchHandle::waiting(&self.inner, url, waiter_id, rx);
    }

    let has_slot = state.running < self.inner.config.max_concurrent;
    if !has_slot && priority == Priority::Prefetch {
      debug!(url, "prefetch dropped, fetch budget exhausted");
      return FetchHandle::ready(
        url,
        Err(FetchError::Dropped {
          url: url.to_string(),
        }),
      );
    }

    let ticket_id = state.next_id();
    state.tickets.insert(
      url.to_string(),
      Ticket {
        id: ticket_id,
        phase: Phase::Queued,
        waiters: vec![Waiter { id: waiter_id, tx }],
      },
    );

    if has_slot {
      self.inner.start(&mut state, url);
    } else {
      debug!(url, queued = state.queue.len() + 1, "fetch budget exhausted, queued");
      state.queue.push_back(url.to_string());
    }

    FetchHandle::waiting(&self.inner, url, waiter_id, rx)
  }

  /// Whether a ticket (running or queued) exists for `url`.
  pub fn is_in_flight(&self, url: &str) -> bool {
    self.inner.lock().tickets.contains_key(url)
  }

  /// Number of open tickets, running or queued.
  pub fn in_flight(&self) -> usize {
    self.inner.lock().tickets.len()
  }

  /// Number of fetches currently holding a slot.
  pub fn running(&self) -> usize {
    self.inner.lock().running
  }
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Spawn the fetch for a queued ticket and take a slot for it.
  fn start(self: &Arc<Self>, state: &mut State, url: &str) {
    let Some(ticket) = state.tickets.get_mut(url) else {
      return;
    };
    if !matches!(ticket.phase, Phase::Queued) {
      return;
    }

    info!(url, "fetching metadata");
    let ticket_id = ticket.id;
    let inner = Arc::clone(self);
    let owned_url = url.to_string();
    let task = tokio::spawn(async move {
      let outcome = inner.run(&owned_url).await;
      inner.complete(&owned_url, ticket_id, outcome);
    });

    ticket.phase = Phase::Pending(task.abort_handle());
    state.running += 1;
  }

  /// Fetch, parse and normalize. A document that cannot be parsed becomes
  /// the disabled record; only network failures are errors.
  async fn run(&self, url: &str) -> Result<MetadataRecord, FetchError> {
    let timeout = self.config.timeout;
    let document = match tokio::time::timeout(timeout, self.fetcher.fetch(url, timeout)).await {
      Ok(result) => result?,
      Err(_) => {
        return Err(FetchError::Timeout {
          url: url.to_string(),
          timeout_ms: timeout.as_millis() as u64,
        })
      }
    };

    match self.parser.parse(&document) {
      Ok(pairs) => Ok(normalize(&pairs)),
      Err(e) => {
        debug!(url, error = %e, "unparseable document, caching negative result");
        Ok(MetadataRecord::disabled())
      }
    }
  }

  /// The single commit path: write the cache, notify waiters, free the slot.
  fn complete(
    self: &Arc<Self>,
    url: &str,
    ticket_id: u64,
    outcome: Result<MetadataRecord, FetchError>,
  ) {
    let mut state = self.lock();

    // The ticket may have been aborted (and possibly replaced) meanwhile
    if state.tickets.get(url).map(|t| t.id) != Some(ticket_id) {
      return;
    }
    let Some(ticket) = state.tickets.remove(url) else {
      return;
    };
    state.running = state.running.saturating_sub(1);

    let outcome: FetchOutcome = match outcome {
      Ok(record) => {
        let entry = self.cache.put(url, record);
        info!(url, enabled = entry.metadata.enabled, "metadata cached");
        Ok(entry.metadata)
      }
      Err(e) => {
        debug!(url, error = %e, "fetch failed, not cached");
        Err(e)
      }
    };

    for waiter in ticket.waiters {
      // Receiver gone means the waiter stopped listening; nothing to do
      let _ = waiter.tx.send(outcome.clone());
    }

    self.pump(&mut state);
  }

  /// Remove one waiter; abort the ticket once nobody is left.
  fn withdraw(self: &Arc<Self>, url: &str, waiter_id: u64) {
    let mut state = self.lock();

    let Some(ticket) = state.tickets.get_mut(url) else {
      return;
    };
    ticket.waiters.retain(|waiter| waiter.id != waiter_id);
    if !ticket.waiters.is_empty() {
      return;
    }

    let Some(ticket) = state.tickets.remove(url) else {
      return;
    };
    match ticket.phase {
      Phase::Pending(task) => {
        task.abort();
        state.running = state.running.saturating_sub(1);
        debug!(url, "no waiters left, fetch aborted");
        self.pump(&mut state);
      }
      Phase::Queued => {
        state.queue.retain(|queued| queued != url);
        debug!(url, "no waiters left, dropped from queue");
      }
    }
  }

  /// Start queued tickets while slots are free.
  fn pump(self: &Arc<Self>, state: &mut State) {
    while state.running < self.config.max_concurrent {
      let Some(url) = state.queue.pop_front() else {
        break;
      };
      self.start(state, &url);
    }
  }
}

/// Future for one caller's interest in a URL.
///
/// Dropping it before completion (or calling [`cancel`](Self::cancel))
/// withdraws that interest. When the last waiter of a ticket withdraws, the
/// network operation is aborted and nothing is cached.
pub struct FetchHandle {
  url: String,
  state: HandleState,
}

enum HandleState {
  Ready(Option<FetchOutcome>),
  Waiting {
    coordinator: Arc<Inner>,
    waiter: u64,
    rx: oneshot::Receiver<FetchOutcome>,
  },
  Done,
}

impl FetchHandle {
  fn ready(url: &str, outcome: FetchOutcome) -> Self {
    Self {
      url: url.to_string(),
      state: HandleState::Ready(Some(outcome)),
    }
  }

  fn waiting(
    coordinator: &Arc<Inner>,
    url: &str,
    waiter: u64,
    rx: oneshot::Receiver<FetchOutcome>,
  ) -> Self {
    Self {
      url: url.to_string(),
      state: HandleState::Waiting {
        coordinator: Arc::clone(coordinator),
        waiter,
        rx,
      },
    }
  }

  /// Withdraw interest explicitly.
  pub fn cancel(self) {
    drop(self);
  }
}

fn aborted(url: &str) -> FetchError {
  FetchError::Aborted {
    url: url.to_string(),
  }
}

impl Future for FetchHandle {
  type Output = FetchOutcome;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = &mut *self;
    let outcome = match &mut this.state {
      HandleState::Ready(outcome) => outcome.take().unwrap_or_else(|| Err(aborted(&this.url))),
      HandleState::Waiting { rx, .. } => match Pin::new(rx).poll(cx) {
        Poll::Pending => return Poll::Pending,
        // Sender dropped without a result: the ticket's task was torn down
        Poll::Ready(result) => result.unwrap_or_else(|_| Err(aborted(&this.url))),
      },
      HandleState::Done => Err(aborted(&this.url)),
    };

    this.state = HandleState::Done;
    Poll::Ready(outcome)
  }
}

impl Drop for FetchHandle {
  fn drop(&mut self) {
    if let HandleState::Waiting {
      coordinator,
      waiter,
      ..
    } = &self.state
    {
      coordinator.withdraw(&self.url, *waiter);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::testing::{coordinator, page, product_page, FakeFetcher};

  const URL: &str = "https://shop.example/p/1";

  fn config(max_concurrent: usize) -> CoordinatorConfig {
    CoordinatorConfig {
      max_concurrent,
      timeout: Duration::from_secs(5),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_resolves_share_one_fetch() {
    let fetcher = FakeFetcher::new(Duration::from_millis(50));
    fetcher.serve(URL, product_page("Headphones"));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(4));

    let first = coordinator.resolve(URL, Priority::Hover);
    let second = coordinator.resolve(URL, Priority::Prefetch);
    assert_eq!(coordinator.in_flight(), 1);

    let (a, b) = tokio::join!(first, second);

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(a.unwrap().title, "Headphones");
    assert_eq!(b.unwrap().title, "Headphones");
    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(coordinator.running(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_served_until_ttl_then_refetched() {
    let fetcher = FakeFetcher::new(Duration::from_millis(10));
    fetcher.serve(URL, product_page("Headphones"));
    let clock = Arc::new(ManualClock::new());
    let coordinator = coordinator(fetcher.clone(), clock.clone(), config(4));

    coordinator.resolve(URL, Priority::Hover).await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    clock.advance(chrono::Duration::hours(24) - chrono::Duration::milliseconds(1));
    let cached = coordinator.resolve(URL, Priority::Hover);
    assert!(!coordinator.is_in_flight(URL));
    cached.await.unwrap();
    assert_eq!(fetcher.calls(), 1);

    clock.advance(chrono::Duration::milliseconds(1));
    coordinator.resolve(URL, Priority::Hover).await.unwrap();
    assert_eq!(fetcher.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_network_failure_reaches_all_waiters_and_is_not_cached() {
    let fetcher = FakeFetcher::new(Duration::from_millis(10));
    fetcher.fail(URL);
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(4));

    let (a, b) = tokio::join!(
      coordinator.resolve(URL, Priority::Hover),
      coordinator.resolve(URL, Priority::Hover)
    );

    assert!(matches!(a, Err(FetchError::Network { .. })));
    assert_eq!(a, b);
    assert!(coordinator.cache().get(URL).is_none());

    fetcher.serve(URL, product_page("Back online"));
    let record = coordinator.resolve(URL, Priority::Hover).await.unwrap();
    assert_eq!(record.title, "Back online");
    assert_eq!(fetcher.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unparseable_document_is_cached_as_disabled() {
    let fetcher = FakeFetcher::new(Duration::from_millis(10));
    fetcher.serve(URL, "plain text, no markup".to_string());
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(4));

    let record = coordinator.resolve(URL, Priority::Hover).await.unwrap();

    assert!(!record.enabled);
    assert!(coordinator.cache().is_fresh(URL));
    coordinator.resolve(URL, Priority::Hover).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_page_without_opt_in_is_cached_negative_result() {
    let fetcher = FakeFetcher::new(Duration::from_millis(10));
    fetcher.serve(URL, page(&[("itabs:title", "Not opted in")]));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(4));

    let record = coordinator.resolve(URL, Priority::Hover).await.unwrap();

    assert_eq!(*record, MetadataRecord::disabled());
    assert!(coordinator.cache().is_fresh(URL));
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_fetch_times_out() {
    let fetcher = FakeFetcher::new(Duration::from_secs(30));
    fetcher.serve(URL, product_page("Too slow"));
    let coordinator = coordinator(
      fetcher.clone(),
      Arc::new(ManualClock::new()),
      CoordinatorConfig {
        max_concurrent: 4,
        timeout: Duration::from_millis(200),
      },
    );

    let outcome = coordinator.resolve(URL, Priority::Hover).await;

    assert_eq!(
      outcome,
      Err(FetchError::Timeout {
        url: URL.to_string(),
        timeout_ms: 200
      })
    );
    assert!(coordinator.cache().get(URL).is_none());
    assert_eq!(coordinator.running(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_ceiling_drops_prefetch_and_queues_hover() {
    let fetcher = FakeFetcher::new(Duration::from_millis(100));
    for url in ["a", "b", "c"] {
      fetcher.serve(url, product_page(url));
    }
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(1));

    let a = coordinator.resolve("a", Priority::Hover);
    let b = coordinator.resolve("b", Priority::Prefetch);
    let c = coordinator.resolve("c", Priority::Hover);

    assert_eq!(coordinator.running(), 1);
    assert!(coordinator.is_in_flight("c"));
    assert!(!coordinator.is_in_flight("b"));
    assert_eq!(
      b.await,
      Err(FetchError::Dropped {
        url: "b".to_string()
      })
    );

    let (a, c) = tokio::join!(a, c);
    assert_eq!(a.unwrap().title, "a");
    assert_eq!(c.unwrap().title, "c");
    assert_eq!(fetcher.calls_for("b"), 0);
    assert_eq!(fetcher.calls(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_last_waiter_cancelling_aborts_fetch() {
    let fetcher = FakeFetcher::new(Duration::from_millis(100));
    fetcher.serve(URL, product_page("Headphones"));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(1));

    let handle = coordinator.resolve(URL, Priority::Hover);
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel();

    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(coordinator.running(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(coordinator.cache().get(URL).is_none());

    // The freed slot is usable again
    let record = coordinator.resolve(URL, Priority::Hover).await.unwrap();
    assert_eq!(record.title, "Headphones");
  }

  #[tokio::test(start_paused = true)]
  async fn test_remaining_waiter_still_receives_result() {
    let fetcher = FakeFetcher::new(Duration::from_millis(100));
    fetcher.serve(URL, product_page("Headphones"));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(4));

    let leaving = coordinator.resolve(URL, Priority::Hover);
    let staying = coordinator.resolve(URL, Priority::Prefetch);
    drop(leaving);

    assert!(coordinator.is_in_flight(URL));
    assert_eq!(staying.await.unwrap().title, "Headphones");
    assert!(coordinator.cache().is_fresh(URL));
  }

  #[tokio::test(start_paused = true)]
  async fn test_hover_joins_prefetch_ticket_at_ceiling() {
    let fetcher = FakeFetcher::new(Duration::from_millis(100));
    fetcher.serve(URL, product_page("Headphones"));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(1));

    let prefetch = coordinator.resolve(URL, Priority::Prefetch);
    let hover = coordinator.resolve(URL, Priority::Hover);
    assert_eq!(coordinator.in_flight(), 1);
    assert_eq!(coordinator.running(), 1);

    // The prefetcher giving up does not take the hover's fetch with it
    drop(prefetch);
    assert_eq!(hover.await.unwrap().title, "Headphones");
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancelled_queued_ticket_never_starts() {
    let fetcher = FakeFetcher::new(Duration::from_millis(100));
    fetcher.serve("a", product_page("a"));
    fetcher.serve("b", product_page("b"));
    let coordinator = coordinator(fetcher.clone(), Arc::new(ManualClock::new()), config(1));

    let a = coordinator.resolve("a", Priority::Hover);
    let b = coordinator.resolve("b", Priority::Hover);
    b.cancel();

    a.await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(fetcher.calls_for("b"), 0);
    assert_eq!(coordinator.in_flight(), 0);
  }
}
