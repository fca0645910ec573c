use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;

/// Documents are cut off here; the meta tags live in the head.
pub const MAX_DOCUMENT_BYTES: usize = 2 * 1024 * 1024;

/// A boxed future resolving to the raw document text
pub type FetchFuture = BoxFuture<'static, Result<String, FetchError>>;

/// Retrieves the raw document behind a URL.
pub trait PageFetcher: Send + Sync {
  fn fetch(&self, url: &str, timeout: Duration) -> FetchFuture;
}

/// HTTP(S) page fetcher
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(user_agent: &str) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl PageFetcher for HttpFetcher {
  fn fetch(&self, url: &str, timeout: Duration) -> FetchFuture {
    let client = self.client.clone();
    let url = url.to_string();

    Box::pin(async move {
      let target = Url::parse(&url).map_err(|e| FetchError::network(&url, e))?;
      if !matches!(target.scheme(), "http" | "https") {
        return Err(FetchError::network(
          &url,
          format!("unsupported scheme {}", target.scheme()),
        ));
      }

      let mut response = client
        .get(target)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(&url, timeout, e))?
        .error_for_status()
        .map_err(|e| FetchError::network(&url, e))?;

      let mut body = Vec::new();
      while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| classify(&url, timeout, e))?
      {
        let room = MAX_DOCUMENT_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() == MAX_DOCUMENT_BYTES {
          break;
        }
      }

      Ok(String::from_utf8_lossy(&body).into_owned())
    })
  }
}

fn classify(url: &str, timeout: Duration, error: reqwest::Error) -> FetchError {
  if error.is_timeout() {
    FetchError::Timeout {
      url: url.to_string(),
      timeout_ms: timeout.as_millis() as u64,
    }
  } else {
    FetchError::network(url, error)
  }
}
