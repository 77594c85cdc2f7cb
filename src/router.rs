//! Request classification: which strategy, if any, handles a request.

use url::{Origin, Url};

use crate::cache::PartitionKind;
use crate::http::{Destination, Method, Request, RequestMode};

/// What to do with an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Leave the request alone; it goes to the network unmodified.
  PassThrough,
  NetworkFirst(PartitionKind),
  StaleWhileRevalidate(PartitionKind),
}

/// Classifies requests against the worker's scope.
#[derive(Debug, Clone)]
pub struct Router {
  origin: Origin,
  /// Path suffix (`/index.html`) that marks a request as a navigation.
  start_suffix: Option<String>,
}

impl Router {
  pub fn new(scope: &Url, start_url: &Url) -> Self {
    let start_suffix = start_url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .filter(|file| !file.is_empty())
      .map(|file| format!("/{}", file));

    Self {
      origin: scope.origin(),
      start_suffix,
    }
  }

  /// First match wins:
  /// 1. non-`GET` passes through
  /// 2. cross-origin passes through
  /// 3. navigations go network-first against core
  /// 4. static destinations go stale-while-revalidate against static
  /// 5. everything else passes through
  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET {
      return Route::PassThrough;
    }

    if request.url.origin() != self.origin {
      return Route::PassThrough;
    }

    if self.is_navigation(request) {
      return Route::NetworkFirst(PartitionKind::Core);
    }

    if request.destination.is_static_asset() {
      return Route::StaleWhileRevalidate(PartitionKind::Static);
    }

    Route::PassThrough
  }

  fn is_navigation(&self, request: &Request) -> bool {
    request.mode == RequestMode::Navigate
      || request.destination == Destination::Document
      || self
        .start_suffix
        .as_deref()
        .is_some_and(|suffix| request.url.path().ends_with(suffix))
  }
}
