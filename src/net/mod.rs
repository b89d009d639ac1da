//! Request/response model shared by the router, the cache and the fetcher.

mod fetcher;

pub use fetcher::{Fetcher, HttpFetcher};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  /// Anything else (assets, API calls)
  Subresource,
}

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Subresource,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn post_json(url: Url, body: &serde_json::Value) -> Self {
    Self {
      method: Method::POST,
      url,
      mode: RequestMode::Subresource,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(body.to_string().into_bytes()),
    }
  }
}

/// A response as served to the caller, from whichever source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  /// Plain-text response, used for synthetic errors.
  pub fn text(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      headers: vec![(
        "content-type".to_string(),
        "application/json".to_string(),
      )],
      body: value.to_string().into_bytes(),
    }
  }

  /// Exactly 200, the only status worth caching.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
