//! Offline-first asset cache for small web application shells.
//!
//! A [`Worker`] sits between an application and the network. It keeps two
//! partitions per deployment generation (core shell files and static assets),
//! answers navigations network-first with a bounded timeout and a cached
//! start page as last resort, serves static assets stale-while-revalidate, and
//! drops partitions of older generations when it activates.

pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod network;
pub mod router;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use cache::{CacheStorage, MemoryStorage, Namespace, Partition, PartitionKind, SqliteStorage};
pub use config::{Config, WorkerSettings};
pub use error::{CacheError, FetchError, HostError, PopulationFailure};
pub use generation::{Clock, FixedClock, GenerationTag, SystemClock};
pub use http::{CacheKey, Destination, Method, Request, RequestMode, Response};
pub use lifecycle::{
  ClientMessage, DetachedHost, FetchEvent, Host, LifecycleState, PreloadResponse, Worker,
};
pub use network::{HttpNetwork, Network};
pub use router::{Route, Router};
pub use strategy::{Served, ServedFrom, StrategyEngine};
