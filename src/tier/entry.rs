//! Stored entries and request-key derivation.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::HttpResponse;

/// Content type used for user-supplied documents and the placeholder.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// One stored (key, response) pair within a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  /// Opaque lookup key derived from the request's method and target
  pub key: String,
  /// Original target URL, kept for diagnostics
  pub url: String,
  /// Status of the response at store time
  pub status: u16,
  /// Content-Type header value, if the response carried one
  pub content_type: Option<String>,
  /// Response body bytes
  pub body: Vec<u8>,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

impl Entry {
  /// Build an entry from a fetched response, keyed by the originating request.
  pub fn from_response(method: &str, url: &Url, response: &HttpResponse) -> Self {
    Self {
      key: request_key(method, url),
      url: url.to_string(),
      status: response.status,
      content_type: response.content_type.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  /// Convert back into the response shape served to callers.
  pub fn into_response(self) -> HttpResponse {
    HttpResponse {
      status: self.status,
      content_type: self.content_type,
      body: self.body,
    }
  }
}

/// Derive the stable, fixed-length lookup key for a request.
///
/// SHA256 over "METHOD url" so keys are opaque and safe to use as storage
/// identifiers regardless of what the URL contains.
pub fn request_key(method: &str, url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_key_is_deterministic() {
    let a = request_key("GET", &url("https://app.example/index.html"));
    let b = request_key("GET", &url("https://app.example/index.html"));
    assert_eq!(a, b);
  }

  #[test]
  fn test_key_varies_by_target() {
    let a = request_key("GET", &url("https://app.example/a.js"));
    let b = request_key("GET", &url("https://app.example/b.js"));
    assert_ne!(a, b);
  }

  #[test]
  fn test_key_varies_by_method() {
    let a = request_key("GET", &url("https://app.example/a.js"));
    let b = request_key("HEAD", &url("https://app.example/a.js"));
    assert_ne!(a, b);
  }

  #[test]
  fn test_key_is_fixed_length_hex() {
    let key = request_key("GET", &url("https://app.example/?q=very&long=query"));
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_entry_round_trips_response() {
    let response = HttpResponse {
      status: 200,
      content_type: Some("text/javascript".to_string()),
      body: b"console.log(1)".to_vec(),
    };
    let entry = Entry::from_response("GET", &url("https://app.example/app.js"), &response);
    assert_eq!(entry.key, request_key("GET", &url("https://app.example/app.js")));
    assert_eq!(entry.into_response(), response);
  }
}
