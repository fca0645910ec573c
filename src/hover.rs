//! Per-link hover sessions: debounce, fetch, display, cancel.
//!
//! Each hovered link gets a session with a generation number. Every
//! asynchronous continuation (timer fire, fetch completion) carries the
//! generation it was started under and does nothing unless that generation
//! is still current and the session is still in the state it expects. That
//! check is what keeps a slow fetch for a link the user already left from
//! ever being rendered.
//!
//! ```text
//! Idle ──enter──▶ Waiting ──timer──▶ Fetching ──ok+current──▶ Displayed
//!                   │                   │                        │
//!                 leave        leave/fail/no opt-in            leave
//!                   ▼                   ▼                        ▼
//!                 Idle                Idle                     Idle
//! ```
//!
//! A cancelled session is destroyed outright. Generations come from one
//! counter shared by all links, so a later session always has a larger
//! number than any continuation still in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use crate::config::Config;
use crate::event::{EventHandler, HoverEvent};
use crate::fetch::{FetchCoordinator, FetchHandle, FetchOutcome, Priority};
use crate::metadata::MetadataRecord;
use crate::placement::{place, PlacementConfig, Position, Rect, Size, Viewport};
use crate::render::{RenderRequest, Renderer};

/// Identity of a link element on the host page.
pub type TargetId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  /// No session for this link yet
  Idle,
  /// Debounce timer running
  Waiting,
  /// Fetch issued, result pending
  Fetching,
  /// Preview shown
  Displayed,
}

#[derive(Debug, Clone)]
pub struct HoverSettings {
  pub enabled: bool,
  pub delay: Duration,
  pub preview: Size,
  pub placement: PlacementConfig,
}

impl From<&Config> for HoverSettings {
  fn from(config: &Config) -> Self {
    Self {
      enabled: config.enabled,
      delay: config.hover_delay(),
      preview: config.preview,
      placement: config.placement,
    }
  }
}

/// Owns the hover lifecycle of every observed link.
#[derive(Clone)]
pub struct HoverSessionManager {
  inner: Arc<ManagerInner>,
}

struct ManagerInner {
  coordinator: FetchCoordinator,
  renderer: Arc<dyn Renderer>,
  settings: HoverSettings,
  sessions: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
  /// Live sessions only; ended sessions are removed
  by_target: HashMap<TargetId, Session>,
  last_generation: u64,
}

impl Sessions {
  fn next_generation(&mut self) -> u64 {
    self.last_generation += 1;
    self.last_generation
  }

  /// Destroy the session for `target`. Returns the generation to hide if a
  /// preview was on screen.
  fn end(&mut self, target: TargetId) -> Option<u64> {
    let session = self.by_target.remove(&target)?;
    if let Some(task) = session.task {
      task.abort();
    }
    (session.state == SessionState::Displayed).then_some(session.generation)
  }
}

struct Session {
  url: String,
  generation: u64,
  state: SessionState,
  rect: Rect,
  viewport: Viewport,
  task: Option<AbortHandle>,
  metadata: Option<Arc<MetadataRecord>>,
  active_tab: Option<String>,
}

impl HoverSessionManager {
  pub fn new(
    coordinator: FetchCoordinator,
    renderer: Arc<dyn Renderer>,
    settings: HoverSettings,
  ) -> Self {
    Self {
      inner: Arc::new(ManagerInner {
        coordinator,
        renderer,
        settings,
        sessions: Mutex::new(Sessions::default()),
      }),
    }
  }

  /// Dispatch one event from the host page.
  pub fn handle(&self, event: HoverEvent) {
    match event {
      HoverEvent::Enter {
        target,
        url,
        rect,
        viewport,
      } => self.hover_enter(target, &url, rect, viewport),
      HoverEvent::Leave { target } => self.hover_leave(target),
      HoverEvent::Geometry {
        target,
        rect,
        viewport,
      } => self.geometry_changed(target, rect, viewport),
      HoverEvent::TabSelected {
        target,
        generation,
        tab,
      } => {
        self.tab_selected(target, generation, &tab);
      }
    }
  }

  /// Dispatch queued events on a background task. Abort the returned handle
  /// to stop.
  pub fn spawn(&self, mut events: EventHandler) -> JoinHandle<()> {
    let manager = self.clone();
    tokio::spawn(async move {
      while let Some(event) = events.next().await {
        manager.handle(event);
      }
    })
  }

  /// Start a session (Idle → Waiting). A repeat enter on a link whose
  /// session is already waiting, fetching or displayed for the same URL is
  /// ignored.
  pub fn hover_enter(&self, target: TargetId, url: &str, rect: Rect, viewport: Viewport) {
    if !self.inner.settings.enabled {
      return;
    }

    let hide = {
      let mut sessions = self.inner.lock();

      if sessions
        .by_target
        .get(&target)
        .is_some_and(|session| session.url == url)
      {
        debug!(target, url, "repeat hover ignored");
        return;
      }
      let superseded = sessions.end(target);

      let generation = sessions.next_generation();
      let task = tokio::spawn(ManagerInner::run_session(
        Arc::clone(&self.inner),
        target,
        generation,
        url.to_string(),
      ));
      debug!(target, url, generation, "hover session started");

      sessions.by_target.insert(
        target,
        Session {
          url: url.to_string(),
          generation,
          state: SessionState::Waiting,
          rect,
          viewport,
          task: Some(task.abort_handle()),
          metadata: None,
          active_tab: None,
        },
      );

      superseded
    };

    if let Some(generation) = hide {
      self.inner.renderer.hide(target, generation);
    }
  }

  /// End the session for a link. Pending timers and fetches are abandoned;
  /// a displayed preview is removed.
  pub fn hover_leave(&self, target: TargetId) {
    let hide = {
      let mut sessions = self.inner.lock();
      let Some(session) = sessions.by_target.get(&target) else {
        return;
      };
      debug!(target, generation = session.generation, state = ?session.state, "hover left");
      sessions.end(target)
    };

    if let Some(generation) = hide {
      self.inner.renderer.hide(target, generation);
    }
  }

  /// Recompute placement after a scroll or resize.
  pub fn geometry_changed(&self, target: TargetId, rect: Rect, viewport: Viewport) {
    let moved = {
      let mut sessions = self.inner.lock();
      let Some(session) = sessions.by_target.get_mut(&target) else {
        return;
      };
      session.rect = rect;
      session.viewport = viewport;

      if session.state != SessionState::Displayed {
        return;
      }
      (session.generation, self.inner.place(rect, viewport))
    };

    self.inner.renderer.reposition(target, moved.0, moved.1);
  }

  /// Switch tabs in a displayed preview. Ignored unless `generation` is the
  /// one the preview was rendered under. Returns whether it was applied.
  pub fn tab_selected(&self, target: TargetId, generation: u64, tab: &str) -> bool {
    {
      let mut sessions = self.inner.lock();
      let Some(session) = sessions.by_target.get_mut(&target) else {
        return false;
      };
      if session.generation != generation || session.state != SessionState::Displayed {
        debug!(target, generation, "tab selection from stale preview ignored");
        return false;
      }
      let known = session
        .metadata
        .as_ref()
        .is_some_and(|metadata| metadata.tab(tab).is_some());
      if !known {
        return false;
      }
      session.active_tab = Some(tab.to_string());
    }

    self.inner.renderer.select_tab(target, generation, tab);
    true
  }

  pub fn state(&self, target: TargetId) -> SessionState {
    self
      .inner
      .lock()
      .by_target
      .get(&target)
      .map_or(SessionState::Idle, |session| session.state)
  }

  pub fn generation(&self, target: TargetId) -> Option<u64> {
    self
      .inner
      .lock()
      .by_target
      .get(&target)
      .map(|session| session.generation)
  }

  pub fn active_tab(&self, target: TargetId) -> Option<String> {
    self
      .inner
      .lock()
      .by_target
      .get(&target)
      .and_then(|session| session.active_tab.clone())
  }
}

impl ManagerInner {
  fn lock(&self) -> MutexGuard<'_, Sessions> {
    self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn place(&self, rect: Rect, viewport: Viewport) -> Position {
    place(
      rect,
      viewport,
      self.settings.preview,
      &self.settings.placement,
    )
  }

  /// Debounce, then fetch, then hand the result to `finish`. Aborting this
  /// task drops the fetch handle, which withdraws from the ticket.
  async fn run_session(inner: Arc<Self>, target: TargetId, generation: u64, url: String) {
    tokio::time::sleep(inner.settings.delay).await;

    let Some(handle) = inner.begin_fetch(target, generation, &url) else {
      return;
    };
    let outcome = handle.await;
    inner.finish(target, generation, outcome);
  }

  /// Waiting → Fetching, if the session is still the one that set the timer.
  fn begin_fetch(
    &self,
    target: TargetId,
    generation: u64,
    url: &str,
  ) -> Option<FetchHandle> {
    let mut sessions = self.lock();
    let session = sessions.by_target.get_mut(&target)?;
    if session.generation != generation || session.state != SessionState::Waiting {
      return None;
    }

    session.state = SessionState::Fetching;
    debug!(target, url, generation, "debounce elapsed, resolving");
    Some(self.coordinator.resolve(url, Priority::Hover))
  }

  /// Fetching → Displayed, or the session ends.
  fn finish(&self, target: TargetId, generation: u64, outcome: FetchOutcome) {
    let request = {
      let mut sessions = self.lock();
      let Some(session) = sessions.by_target.get_mut(&target) else {
        return;
      };
      if session.generation != generation || session.state != SessionState::Fetching {
        debug!(target, generation, "discarding result for superseded session");
        return;
      }
      // The task calling us is finishing on its own
      session.task = None;

      match outcome {
        Ok(metadata) if metadata.enabled => {
          let position = self.place(session.rect, session.viewport);
          session.state = SessionState::Displayed;
          session.active_tab = metadata.tab_names().next().map(String::from);
          session.metadata = Some(Arc::clone(&metadata));
          RenderRequest {
            target,
            url: session.url.clone(),
            metadata,
            position,
            session_generation: generation,
          }
        }
        Ok(_) => {
          debug!(target, url = %session.url, "link has no preview");
          sessions.end(target);
          return;
        }
        Err(e) => {
          if !e.is_silent() {
            debug!(target, error = %e, "no preview");
          }
          sessions.end(target);
          return;
        }
      }
    };

    self.renderer.show(request);
  }
}
