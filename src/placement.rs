//! Preview widget placement relative to the hovered link.

use serde::{Deserialize, Serialize};

/// Bounding box of the hovered link, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
  pub x: f64,
  pub y: f64,
  pub width: f64,
  pub height: f64,
}

impl Rect {
  pub fn right(&self) -> f64 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f64 {
    self.y + self.height
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
  pub width: f64,
  pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
  pub width: f64,
  pub height: f64,
}

/// Top-left corner of the preview.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
  /// Minimum distance kept from the viewport edges when clamping
  pub margin: f64,
  /// Space between the link and the preview
  pub gap: f64,
}

impl Default for PlacementConfig {
  fn default() -> Self {
    Self {
      margin: 10.0,
      gap: 8.0,
    }
  }
}

/// Compute where the preview goes.
///
/// Horizontally: right of the target if it fits, else left of it, else
/// clamped into the viewport. Vertically: below if it fits, else above,
/// clamped so it never leaves the top or bottom edge.
pub fn place(target: Rect, viewport: Viewport, size: Size, config: &PlacementConfig) -> Position {
  Position {
    x: horizontal(target, viewport, size, config),
    y: vertical(target, viewport, size, config),
  }
}

fn horizontal(target: Rect, viewport: Viewport, size: Size, config: &PlacementConfig) -> f64 {
  let right = target.right() + config.gap;
  if right >= 0.0 && right + size.width <= viewport.width - config.margin {
    return right;
  }

  let left = target.x - config.gap - size.width;
  if left >= config.margin && left + size.width <= viewport.width {
    return left;
  }

  let (low, high) = if viewport.width - size.width - config.margin >= config.margin {
    (config.margin, viewport.width - size.width - config.margin)
  } else {
    // Not enough room to honor the margin on both sides
    (0.0, (viewport.width - size.width).max(0.0))
  };
  target.x.clamp(low, high)
}

fn vertical(target: Rect, viewport: Viewport, size: Size, config: &PlacementConfig) -> f64 {
  let below = target.bottom() + config.gap;
  if below >= 0.0 && below + size.height <= viewport.height {
    return below;
  }

  let above = target.y - config.gap - size.height;
  above.clamp(0.0, (viewport.height - size.height).max(0.0))
}
