//! Fetch strategies run against a cache partition.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStorage, Partition};
use crate::error::{CacheError, FetchError, Result};
use crate::http::{Request, Response};
use crate::network::Network;

/// Default budget for the network leg of network-first.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_millis(2500);

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fresh from the network
  Network,
  /// Response the host fetched ahead of routing
  Preload,
  /// Cached copy of the requested resource
  Cache,
  /// Cached start page standing in for an uncached navigation
  StartFallback,
  /// Not intercepted, forwarded to the network as-is
  PassThrough,
}

/// A response together with its origin.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
}

impl Served {
  pub fn new(response: Response, source: ServedFrom) -> Self {
    Self { response, source }
  }
}

/// Runs network-first and stale-while-revalidate over a shared network.
pub struct StrategyEngine<N> {
  network: Arc<N>,
  start_url: Url,
  timeout: Duration,
}

impl<N> Clone for StrategyEngine<N> {
  fn clone(&self) -> Self {
    Self {
      network: Arc::clone(&self.network),
      start_url: self.start_url.clone(),
      timeout: self.timeout,
    }
  }
}

impl<N: Network> StrategyEngine<N> {
  pub fn new(network: Arc<N>, start_url: Url) -> Self {
    Self {
      network,
      start_url,
      timeout: DEFAULT_NETWORK_TIMEOUT,
    }
  }

  /// Set the network budget for network-first.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Prefer the network within the timeout, else fall back to the cache.
  ///
  /// 1. Fetch, cancelling the request once the timeout elapses
  /// 2. Success status: store, then return it
  /// 3. Other status: return it without storing
  /// 4. Error or timeout: cached copy of the request, else the cached start
  ///    page, else `NetworkFirstExhausted`
  pub async fn network_first<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
  ) -> Result<Served> {
    let cancel = CancellationToken::new();
    let fetch = self.network.fetch(request, cancel.clone());

    let error = match tokio::time::timeout(self.timeout, fetch).await {
      Ok(Ok(response)) => {
        return Ok(self.store_fresh(request, partition, response, ServedFrom::Network));
      }
      Ok(Err(e)) => e,
      Err(_) => {
        cancel.cancel();
        FetchError::TimedOut(self.timeout)
      }
    };

    debug!(url = %request.url, error = %error, "network leg failed, trying cache");

    if let Some(cached) = partition.match_request(request)? {
      return Ok(Served::new(cached, ServedFrom::Cache));
    }

    if let Some(start) = partition.match_url(&self.start_url)? {
      debug!(url = %request.url, start = %self.start_url, "serving start page fallback");
      return Ok(Served::new(start, ServedFrom::StartFallback));
    }

    warn!(url = %request.url, error = %error, "no network and nothing cached");
    Err(CacheError::NetworkFirstExhausted {
      url: request.url.to_string(),
      source: error,
    })
  }

  /// Network-first for a response the host already fetched: store it if
  /// successful and return it.
  pub fn store_preloaded<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
    response: Response,
  ) -> Served {
    self.store_fresh(request, partition, response, ServedFrom::Preload)
  }

  fn store_fresh<S: CacheStorage>(
    &self,
    request: &Request,
    partition: &Partition<S>,
    response: Response,
    source: ServedFrom,
  ) -> Served {
    // A live response is still worth returning when the write fails
    if let Err(e) = partition.put(request, &response) {
      warn!(
        url = %request.url,
        partition = partition.name(),
        error = %e,
        "failed to cache response"
      );
    }
    Served::new(response, source)
  }

  /// Serve the cached copy right away and refresh it in the background.
  ///
  /// Without a cached copy the caller waits for the network, and a network
  /// failure surfaces. Background refresh failures never do.
  pub async fn stale_while_revalidate<S: CacheStorage>(
    &self,
    request: Request,
    partition: &Partition<S>,
  ) -> Result<Served> {
    let cached = partition.match_request(&request)?;

    let refresh = tokio::spawn(revalidate(
      Arc::clone(&self.network),
      request,
      partition.clone(),
    ));

    if let Some(cached) = cached {
      // Detached: its outcome only ever reaches storage
      return Ok(Served::new(cached, ServedFrom::Cache));
    }

    match refresh.await {
      Ok(Ok(response)) => Ok(Served::new(response, ServedFrom::Network)),
      Ok(Err(e)) => Err(CacheError::Network(e)),
      Err(e) => Err(CacheError::Network(FetchError::Transport(format!(
        "refresh task failed: {}",
        e
      )))),
    }
  }
}

async fn revalidate<N: Network, S: CacheStorage>(
  network: Arc<N>,
  request: Request,
  partition: Partition<S>,
) -> std::result::Result<Response, FetchError> {
  let response = match network.fetch(&request, CancellationToken::new()).await {
    Ok(response) => response,
    Err(e) => {
      debug!(url = %request.url, error = %e, "background refresh failed");
      return Err(e);
    }
  };

  match partition.put(&request, &response) {
    Ok(true) => debug!(url = %request.url, partition = partition.name(), "entry refreshed"),
    Ok(false) => debug!(url = %request.url, status = response.status, "not caching error response"),
    Err(e) => warn!(url = %request.url, error = %e, "failed to store refreshed entry"),
  }

  Ok(response)
}
