//! Request classification and dispatch to the fetch strategies.

use url::Url;

use crate::net::{Fetcher, HttpResponse};
use crate::strategy::FetchStrategies;
use crate::tier::{request_key, TierStorage};

/// How a request is classified for routing. Exactly one class per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// The fixed user-document path
  DedicatedStore,
  /// Same origin as the application shell
  SameOrigin,
  /// Everything else (fonts, CDNs)
  External,
}

/// Whether the request is a full-page navigation or a sub-resource load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  Subresource,
}

/// One intercepted outbound read.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl InterceptedRequest {
  pub fn get(url: Url, mode: RequestMode) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode,
    }
  }

  /// The storage key this request reads from or populates.
  pub fn key(&self) -> String {
    request_key(&self.method, &self.url)
  }
}

/// What routing produced for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
  /// A response to hand back to the caller
  Response(HttpResponse),
  /// Not intercepted; the underlying transport handles it unmodified
  Passthrough,
  /// The original failure propagates to the caller
  NoResponse,
}

/// Classify a target URL. Pure and deterministic: same inputs, same class.
///
/// The dedicated-store check compares the path component exactly, before any
/// origin comparison; everything on the configured origin is SameOrigin and
/// the rest is External.
pub fn classify(url: &Url, origin: &Url, store_path: &str) -> RouteClass {
  if url.path() == store_path {
    RouteClass::DedicatedStore
  } else if url.origin() == origin.origin() {
    RouteClass::SameOrigin
  } else {
    RouteClass::External
  }
}

/// Routes every intercepted read to exactly one strategy.
pub struct Router<S: TierStorage + 'static, F: Fetcher> {
  strategies: FetchStrategies<S, F>,
  origin: Url,
  store_path: String,
}

impl<S: TierStorage + 'static, F: Fetcher> Router<S, F> {
  pub fn new(strategies: FetchStrategies<S, F>, origin: Url, store_path: String) -> Self {
    Self {
      strategies,
      origin,
      store_path,
    }
  }

  /// Route one request. Non-GET requests are never intercepted.
  pub async fn route(&self, req: &InterceptedRequest) -> RouteOutcome {
    if req.method != "GET" {
      return RouteOutcome::Passthrough;
    }

    match classify(&req.url, &self.origin, &self.store_path) {
      RouteClass::DedicatedStore => RouteOutcome::Response(self.strategies.dedicated_store().await),
      RouteClass::SameOrigin => match self.strategies.cache_first(req).await {
        Some(response) => RouteOutcome::Response(response),
        None => RouteOutcome::NoResponse,
      },
      RouteClass::External => match self.strategies.network_first(req).await {
        Some(response) => RouteOutcome::Response(response),
        None => RouteOutcome::NoResponse,
      },
    }
  }
}
