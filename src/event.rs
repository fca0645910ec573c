use tokio::sync::mpsc;

use crate::hover::TargetId;
use crate::placement::{Rect, Viewport};

/// Interaction events delivered by the host page
#[derive(Debug, Clone, PartialEq)]
pub enum HoverEvent {
  /// Pointer entered a link
  Enter {
    target: TargetId,
    url: String,
    rect: Rect,
    viewport: Viewport,
  },
  /// Pointer left a link
  Leave { target: TargetId },
  /// Scroll or resize moved a link
  Geometry {
    target: TargetId,
    rect: Rect,
    viewport: Viewport,
  },
  /// Tab clicked in a displayed preview; `generation` is echoed from the render handoff
  TabSelected {
    target: TargetId,
    generation: u64,
    tab: String,
  },
}

/// Event queue between the host page and the session manager
pub struct EventHandler {
  tx: mpsc::UnboundedSender<HoverEvent>,
  rx: mpsc::UnboundedReceiver<HoverEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Get a sender for feeding events in
  pub fn sender(&self) -> mpsc::UnboundedSender<HoverEvent> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HoverEvent> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}
