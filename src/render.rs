//! Handoff from the pipeline to whatever draws the preview.

use std::sync::Arc;

use crate::hover::TargetId;
use crate::metadata::{MetadataRecord, TabContent};
use crate::placement::Position;

/// Everything needed to draw one preview.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
  pub target: TargetId,
  pub url: String,
  pub metadata: Arc<MetadataRecord>,
  pub position: Position,
  /// Must be echoed back with any interaction the renderer forwards
  pub session_generation: u64,
}

/// Draws, moves and removes preview widgets.
///
/// Only ever receives enabled records. Never feeds back into caching or
/// fetch decisions.
pub trait Renderer: Send + Sync {
  fn show(&self, request: RenderRequest);

  /// The target or viewport moved while the preview is displayed.
  fn reposition(&self, target: TargetId, generation: u64, position: Position);

  fn select_tab(&self, target: TargetId, generation: u64, tab: &str);

  fn hide(&self, target: TargetId, generation: u64);
}

/// Renderer that prints previews as text, for the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
  fn show(&self, request: RenderRequest) {
    println!("{}", describe(&request));
  }

  fn reposition(&self, target: TargetId, generation: u64, position: Position) {
    println!(
      "[link {target} #{generation}] moved to ({:.0}, {:.0})",
      position.x, position.y
    );
  }

  fn select_tab(&self, target: TargetId, generation: u64, tab: &str) {
    println!("[link {target} #{generation}] tab {tab}");
  }

  fn hide(&self, target: TargetId, generation: u64) {
    println!("[link {target} #{generation}] preview closed");
  }
}

/// Plain-text rendition of a preview card.
pub fn describe(request: &RenderRequest) -> String {
  let metadata = &request.metadata;
  let mut out = format!(
    "[link {} #{}] preview at ({:.0}, {:.0}) for {}\n  {}",
    request.target,
    request.session_generation,
    request.position.x,
    request.position.y,
    request.url,
    metadata.title
  );

  if !metadata.description.is_empty() {
    out.push_str(&format!("\n  {}", metadata.description));
  }
  if let Some(image) = &metadata.image {
    out.push_str(&format!("\n  image: {image}"));
  }

  for tab in &metadata.tabs {
    out.push_str(&format!("\n  [{}]", tab.name));
    match &tab.content {
      TabContent::Text(text) => out.push_str(&format!("\n    {text}")),
      TabContent::Structured(rows) => {
        for (key, value) in rows {
          out.push_str(&format!("\n    {key}: {value}"));
        }
      }
    }
  }

  out
}
