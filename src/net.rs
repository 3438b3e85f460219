//! Network transport behind a trait so the routing core can be exercised
//! without a live network.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Response shape used for network results, cache hits and the placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  /// Whether the status is in the success class, and so worth caching.
  /// Client and server errors are served but never stored.
  pub fn is_cacheable(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A read-only transport. Implementations perform a GET against the target.
#[allow(async_fn_in_trait)]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, url: &Url) -> Result<HttpResponse>;
}

/// reqwest-backed production transport.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self::new()
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &Url) -> Result<HttpResponse> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(HttpResponse {
      status,
      content_type,
      body,
    })
  }
}
