//! Generation-scoped partitions: opening, populating and purging.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use crate::error::{CacheError, PopulationFailure, Result};
use crate::generation::GenerationTag;
use crate::http::{CacheKey, Request, Response};
use crate::network::Network;

/// The two asset classes each generation stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Shell files the app needs to boot.
  Core,
  /// Icons, scripts, styles, fonts, images.
  Static,
}

impl PartitionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      PartitionKind::Core => "core",
      PartitionKind::Static => "static",
    }
  }
}

impl fmt::Display for PartitionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Handle to one named partition.
pub struct Partition<S> {
  name: String,
  storage: Arc<S>,
}

impl<S> Clone for Partition<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

impl<S> fmt::Debug for Partition<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Partition").field("name", &self.name).finish()
  }
}

impl<S: CacheStorage> Partition<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.storage.get(&self.name, &request.cache_key())
  }

  pub fn match_url(&self, url: &Url) -> Result<Option<Response>> {
    self.storage.get(&self.name, &CacheKey::for_url(url))
  }

  /// Store `response` for `request`. Non-success responses are never
  /// stored; returns whether anything was written.
  pub fn put(&self, request: &Request, response: &Response) -> Result<bool> {
    if !response.is_success() {
      return Ok(false);
    }
    self
      .storage
      .put(&self.name, &request.cache_key(), response)?;
    Ok(true)
  }
}

/// Partitions of one generation over a shared storage backend.
pub struct Namespace<S> {
  storage: Arc<S>,
  tag: GenerationTag,
}

impl<S> Clone for Namespace<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      tag: self.tag.clone(),
    }
  }
}

impl<S: CacheStorage> Namespace<S> {
  pub fn new(storage: Arc<S>, tag: GenerationTag) -> Self {
    Self { storage, tag }
  }

  pub fn tag(&self) -> &GenerationTag {
    &self.tag
  }

  /// `"{kind}-{tag}"`
  pub fn partition_name(&self, kind: PartitionKind) -> String {
    format!("{}-{}", kind, self.tag)
  }

  /// Names of this generation's core and static partitions.
  pub fn current_names(&self) -> HashSet<String> {
    [PartitionKind::Core, PartitionKind::Static]
      .into_iter()
      .map(|kind| self.partition_name(kind))
      .collect()
  }

  /// Open this generation's partition of `kind`, creating it if absent.
  pub fn open(&self, kind: PartitionKind) -> Result<Partition<S>> {
    let name = self.partition_name(kind);
    self.storage.open_partition(&name)?;
    Ok(Partition {
      name,
      storage: Arc::clone(&self.storage),
    })
  }

  /// Fetch and store every asset, in order.
  ///
  /// The first asset that fails to fetch, answers with a non-success status
  /// or cannot be stored aborts the run. Assets stored before it stay.
  pub async fn populate<N: Network>(
    &self,
    kind: PartitionKind,
    assets: &[Url],
    network: &N,
  ) -> Result<Partition<S>> {
    let partition = self.open(kind)?;

    for url in assets {
      let request = Request::get(url.clone());
      let fault = |reason: PopulationFailure| CacheError::Population {
        partition: partition.name().to_string(),
        url: url.to_string(),
        reason,
      };

      let response = network
        .fetch(&request, CancellationToken::new())
        .await
        .map_err(|e| fault(e.into()))?;

      if !response.is_success() {
        return Err(fault(PopulationFailure::Status(response.status)));
      }

      partition
        .put(&request, &response)
        .map_err(|e| fault(PopulationFailure::Storage(e.to_string())))?;

      debug!(partition = partition.name(), url = %url, "asset cached");
    }

    info!(
      partition = partition.name(),
      assets = assets.len(),
      "partition populated"
    );

    Ok(partition)
  }

  /// Delete every partition whose name is not in `keep`.
  ///
  /// Returns the names that were removed. Partitions that vanish between
  /// listing and deletion are skipped silently.
  pub fn purge_obsolete(&self, keep: &HashSet<String>) -> Result<Vec<String>> {
    let mut purged = Vec::new();

    for name in self.storage.partition_names()? {
      if keep.contains(&name) {
        continue;
      }
      if self.storage.delete_partition(&name)? {
        purged.push(name);
      } else {
        warn!(partition = %name, "partition already gone");
      }
    }

    if !purged.is_empty() {
      info!(purged = ?purged, "removed obsolete partitions");
    }

    Ok(purged)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use crate::error::FetchError;
  use crate::testing::{url, FakeNetwork};

  fn namespace(tag: &str) -> (Arc<MemoryStorage>, Namespace<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let ns = Namespace::new(Arc::clone(&storage), GenerationTag::from(tag));
    (storage, ns)
  }

  #[test]
  fn test_partition_names() {
    let (_, ns) = namespace("gen2");
    assert_eq!(ns.partition_name(PartitionKind::Core), "core-gen2");
    assert_eq!(ns.partition_name(PartitionKind::Static), "static-gen2");
    assert_eq!(
      ns.current_names(),
      HashSet::from(["core-gen2".to_string(), "static-gen2".to_string()])
    );
  }

  #[test]
  fn test_open_creates_partition() {
    let (storage, ns) = namespace("gen1");
    let partition = ns.open(PartitionKind::Core).unwrap();
    assert_eq!(partition.name(), "core-gen1");
    assert_eq!(storage.partition_names().unwrap(), vec!["core-gen1"]);
  }

  #[test]
  fn test_put_skips_non_success() {
    let (_, ns) = namespace("gen1");
    let partition = ns.open(PartitionKind::Static).unwrap();
    let request = Request::get(url("/missing.png"));

    assert!(!partition.put(&request, &Response::new(404, "nope")).unwrap());
    assert_eq!(partition.match_request(&request).unwrap(), None);

    assert!(partition.put(&request, &Response::ok("png")).unwrap());
    assert!(partition.match_request(&request).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_populate_then_read_back() {
    let (_, ns) = namespace("gen1");
    let assets = vec![url("/"), url("/index.html"), url("/manifest.webmanifest")];
    let network = FakeNetwork::new();
    for asset in &assets {
      network.respond(asset.as_str(), Response::ok(asset.path().to_string()));
    }

    let partition = ns
      .populate(PartitionKind::Core, &assets, &network)
      .await
      .unwrap();

    for asset in &assets {
      let cached = partition.match_url(asset).unwrap().unwrap();
      assert!(cached.is_success());
      assert_eq!(cached.body.as_ref(), asset.path().as_bytes());
    }
  }

  #[tokio::test]
  async fn test_populate_fails_on_error_status_and_keeps_earlier_assets() {
    let (_, ns) = namespace("gen1");
    let assets = vec![url("/icons/a.png"), url("/icons/b.png"), url("/icons/c.png")];
    let network = FakeNetwork::new();
    network.respond(assets[0].as_str(), Response::ok("a"));
    network.respond(assets[1].as_str(), Response::new(404, "gone"));
    network.respond(assets[2].as_str(), Response::ok("c"));

    let err = ns
      .populate(PartitionKind::Static, &assets, &network)
      .await
      .unwrap_err();

    match err {
      CacheError::Population {
        partition,
        url,
        reason,
      } => {
        assert_eq!(partition, "static-gen1");
        assert_eq!(url, assets[1].to_string());
        assert_eq!(reason, PopulationFailure::Status(404));
      }
      other => panic!("unexpected error: {other}"),
    }

    let partition = ns.open(PartitionKind::Static).unwrap();
    assert!(partition.match_url(&assets[0]).unwrap().is_some());
    assert!(partition.match_url(&assets[1]).unwrap().is_none());
    // Aborted before the third asset was even requested
    assert!(partition.match_url(&assets[2]).unwrap().is_none());
    assert_eq!(network.calls_to(assets[2].as_str()), 0);
  }

  #[tokio::test]
  async fn test_populate_fails_on_network_error() {
    let (_, ns) = namespace("gen1");
    let assets = vec![url("/index.html")];
    let network = FakeNetwork::new();
    network.fail(
      assets[0].as_str(),
      FetchError::Transport("offline".to_string()),
    );

    let err = ns
      .populate(PartitionKind::Core, &assets, &network)
      .await
      .unwrap_err();
    assert!(err.is_population());
  }

  #[test]
  fn test_purge_keeps_only_current_generation() {
    let (storage, ns) = namespace("gen2");
    for name in ["core-gen1", "static-gen1", "core-gen2"] {
      storage.open_partition(name).unwrap();
    }

    let purged = ns.purge_obsolete(&ns.current_names()).unwrap();

    assert_eq!(purged, vec!["core-gen1", "static-gen1"]);
    assert_eq!(storage.partition_names().unwrap(), vec!["core-gen2"]);
  }

  #[test]
  fn test_purge_keeps_preseeded_static_partition() {
    let (storage, ns) = namespace("gen2");
    for name in ["core-gen1", "static-gen1", "core-gen2", "static-gen2"] {
      storage.open_partition(name).unwrap();
    }

    ns.purge_obsolete(&ns.current_names()).unwrap();

    assert_eq!(
      storage.partition_names().unwrap(),
      vec!["core-gen2", "static-gen2"]
    );
  }

  #[test]
  fn test_purge_is_idempotent() {
    let (storage, ns) = namespace("gen2");
    storage.open_partition("core-gen1").unwrap();

    assert_eq!(ns.purge_obsolete(&ns.current_names()).unwrap().len(), 1);
    assert!(ns.purge_obsolete(&ns.current_names()).unwrap().is_empty());
  }

  #[test]
  fn test_partition_debug_shows_name() {
    let (_, ns) = namespace("gen1");
    let partition = ns.open(PartitionKind::Static).unwrap();
    assert_eq!(format!("{:?}", partition), r#"Partition { name: "static-gen1" }"#);
  }
}
