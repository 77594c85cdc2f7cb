//! Error types for cache storage, network access and lifecycle handling.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecycleState;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Failure reported by the network boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The request never produced a response (DNS, connect, TLS, body read...).
  #[error("network request failed: {0}")]
  Transport(String),

  /// The caller cancelled the request before it completed.
  #[error("network request cancelled")]
  Cancelled,

  /// No response arrived within the allotted time.
  #[error("no network response within {0:?}")]
  TimedOut(Duration),
}

/// Why a single asset could not be added during population.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PopulationFailure {
  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("server answered with status {0}")]
  Status(u16),

  #[error("could not store response: {0}")]
  Storage(String),
}

/// A hosting-environment capability refused or failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("host environment error: {0}")]
pub struct HostError(pub String);

#[derive(Debug, Error)]
pub enum CacheError {
  /// The partition storage is unavailable or failed.
  #[error("cache storage failure: {0}")]
  Storage(String),

  /// A mandatory asset could not be fetched or stored during install.
  #[error("failed to populate {partition} with {url}: {reason}")]
  Population {
    partition: String,
    url: String,
    reason: PopulationFailure,
  },

  /// No network response, no cached match and no cached start page.
  #[error("{url} is unreachable and nothing is cached for it")]
  NetworkFirstExhausted {
    url: String,
    #[source]
    source: FetchError,
  },

  #[error(transparent)]
  Network(#[from] FetchError),

  #[error("cannot {action} while {state:?}")]
  InvalidTransition {
    action: &'static str,
    state: LifecycleState,
  },
}

impl CacheError {
  /// Whether this error belongs to a failed install.
  pub fn is_population(&self) -> bool {
    matches!(self, CacheError::Population { .. })
  }
}
