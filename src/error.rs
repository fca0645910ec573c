//! Failure outcomes of the fetch pipeline.
//!
//! None of these are ever shown to the user; a missing preview is the only
//! visible effect.

use thiserror::Error;

/// Why a metadata lookup produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Connection failure or non-success HTTP status. Transient, never cached.
  #[error("failed to fetch {url}: {reason}")]
  Network { url: String, reason: String },

  /// The page did not answer within the configured timeout. Transient, never cached.
  #[error("fetching {url} timed out after {timeout_ms}ms")]
  Timeout { url: String, timeout_ms: u64 },

  /// Every interested caller withdrew before the fetch finished.
  #[error("fetch of {url} was aborted")]
  Aborted { url: String },

  /// A prefetch arrived while the concurrency budget was exhausted.
  #[error("prefetch of {url} dropped: fetch budget exhausted")]
  Dropped { url: String },
}

impl FetchError {
  pub fn network(url: &str, reason: impl ToString) -> Self {
    Self::Network {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }

  /// Deliberate outcomes of cancellation or budgeting rather than failures.
  pub fn is_silent(&self) -> bool {
    matches!(self, Self::Aborted { .. } | Self::Dropped { .. })
  }
}

/// A fetched document that cannot be read as markup at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("document contains no markup")]
  NoMarkup,
}
