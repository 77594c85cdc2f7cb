//! Request and response descriptors exchanged with the host and the network.

use std::fmt;

use bytes::Bytes;
pub use reqwest::Method;
use url::Url;

/// How the host issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// A top-level page navigation.
  Navigate,
  SameOrigin,
  NoCors,
  #[default]
  Cors,
}

/// The kind of resource a request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Manifest,
  Image,
  Style,
  Font,
  Script,
  /// `fetch()` calls and anything else without a declared destination.
  #[default]
  Empty,
}

impl Destination {
  /// Destinations served from the static partition.
  pub fn is_static_asset(self) -> bool {
    matches!(
      self,
      Destination::Manifest
        | Destination::Image
        | Destination::Style
        | Destination::Font
        | Destination::Script
    )
  }
}

/// An outgoing request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// A plain `GET` with no declared destination.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
      headers: Vec::new(),
    }
  }

  /// A page navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Key under which a response for this request is stored.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(&self.method, &self.url)
  }
}

/// Normalized storage key: method plus URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method.as_str(), url))
  }

  /// Key for a plain `GET` of `url`.
  pub fn for_url(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A response snapshot. Bodies are fully buffered; the assets handled here
/// are small shell files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// A `200 OK` response with the given body.
  pub fn ok(body: impl Into<Bytes>) -> Self {
    Self::new(200, body)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Whether the status is in the 2xx range. Only these are ever cached.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
