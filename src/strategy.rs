//! Fetch strategies: what each routing class does with storage and network.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::net::{Fetcher, HttpResponse};
use crate::router::{InterceptedRequest, RequestMode};
use crate::tier::{request_key, Entry, TierKind, TierRegistry, TierStorage, HTML_CONTENT_TYPE};

/// Served when the dedicated store holds no document.
const PLACEHOLDER_HTML: &str = "<h1>No document stored</h1>";

/// The three fetch strategies, sharing one registry and one transport.
///
/// Strategies own entry-level reads and writes; they never create or delete
/// tiers wholesale.
pub struct FetchStrategies<S: TierStorage + 'static, F: Fetcher> {
  registry: TierRegistry<S>,
  fetcher: Arc<F>,
  /// Key of the document served when a navigation fails offline
  fallback_key: String,
  /// Fixed key of the single user-document slot
  dedicated_key: String,
}

impl<S: TierStorage + 'static, F: Fetcher> FetchStrategies<S, F> {
  pub fn new(
    registry: TierRegistry<S>,
    fetcher: Arc<F>,
    fallback_url: &Url,
    store_url: &Url,
  ) -> Self {
    Self {
      registry,
      fetcher,
      fallback_key: request_key("GET", fallback_url),
      dedicated_key: request_key("GET", store_url),
    }
  }

  /// Dedicated-store lookup. Serves the stored user document, or a fixed
  /// placeholder when the slot is empty. Never touches the network and
  /// never fails; a storage error degrades to the placeholder.
  pub async fn dedicated_store(&self) -> HttpResponse {
    match self.registry.get(TierKind::User, &self.dedicated_key) {
      Ok(Some(entry)) => entry.into_response(),
      Ok(None) => placeholder(),
      Err(e) => {
        warn!("dedicated store lookup failed, serving placeholder: {}", e);
        placeholder()
      }
    }
  }

  /// Cache-first with network fill. A live-set hit is returned as-is with no
  /// revalidation. On a miss the network is tried, populating the shell tier
  /// on success. A failed navigation falls back to the cached root document.
  pub async fn cache_first(&self, req: &InterceptedRequest) -> Option<HttpResponse> {
    let key = req.key();

    match self.registry.match_live(&key) {
      Ok(Some(entry)) => return Some(entry.into_response()),
      Ok(None) => {}
      Err(e) => warn!("cache lookup failed for {}: {}", req.url, e),
    }

    match self.fetcher.fetch(&req.url).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.write_through(req, &response);
        }
        Some(response)
      }
      Err(e) => {
        debug!("network failed for {}: {}", req.url, e);
        if req.mode == RequestMode::Navigate {
          self.cached_fallback()
        } else {
          None
        }
      }
    }
  }

  /// Network-first with cache fallback. A fresh response wins and repopulates
  /// the shell tier; on failure any previously cached copy of the exact
  /// request is served instead.
  pub async fn network_first(&self, req: &InterceptedRequest) -> Option<HttpResponse> {
    match self.fetcher.fetch(&req.url).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.write_through(req, &response);
        }
        Some(response)
      }
      Err(e) => {
        debug!("network failed for {}, trying cache: {}", req.url, e);
        match self.registry.match_live(&req.key()) {
          Ok(Some(entry)) => Some(entry.into_response()),
          Ok(None) => None,
          Err(err) => {
            warn!("cache fallback failed for {}: {}", req.url, err);
            None
          }
        }
      }
    }
  }

  /// Detached write-through population of the shell tier.
  ///
  /// Returning the response to the caller must not wait on the write, so
  /// the write runs on its own task and a failure is dropped after logging.
  fn write_through(&self, req: &InterceptedRequest, response: &HttpResponse) {
    let entry = Entry::from_response(&req.method, &req.url, response);
    let registry = self.registry.clone();

    tokio::spawn(async move {
      if let Err(e) = registry.put(TierKind::Shell, &entry) {
        debug!("write-through population dropped for {}: {}", entry.url, e);
      }
    });
  }

  fn cached_fallback(&self) -> Option<HttpResponse> {
    match self.registry.match_live(&self.fallback_key) {
      Ok(Some(entry)) => Some(entry.into_response()),
      Ok(None) => None,
      Err(e) => {
        warn!("navigation fallback lookup failed: {}", e);
        None
      }
    }
  }
}

fn placeholder() -> HttpResponse {
  HttpResponse {
    status: 200,
    content_type: Some(HTML_CONTENT_TYPE.to_string()),
    body: PLACEHOLDER_HTML.as_bytes().to_vec(),
  }
}
