//! Worker lifecycle: install, activate, fetch handling and client messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, Namespace, PartitionKind};
use crate::config::WorkerSettings;
use crate::error::{CacheError, FetchError, HostError, Result};
use crate::generation::{Clock, GenerationTag};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::router::{Route, Router};
use crate::strategy::{Served, ServedFrom, StrategyEngine};

/// Lifecycle of one worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed; an older generation may still control clients
  Waiting,
  Activating,
  /// Controls clients and handles fetches
  Active,
  /// Install failed; this generation never takes over
  Redundant,
}

/// Capabilities of the hosting environment.
#[async_trait]
pub trait Host: Send + Sync + 'static {
  /// Whether the host can start navigation fetches before routing.
  fn supports_navigation_preload(&self) -> bool {
    false
  }

  async fn enable_navigation_preload(&self) -> std::result::Result<(), HostError> {
    Err(HostError("navigation preload is not supported".to_string()))
  }

  /// Take control of every open client without waiting for a navigation.
  async fn claim_clients(&self) -> std::result::Result<(), HostError>;
}

/// A host with no clients and no optional features.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedHost;

#[async_trait]
impl Host for DetachedHost {
  async fn claim_clients(&self) -> std::result::Result<(), HostError> {
    Ok(())
  }
}

/// Inbound messages from controlled pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Leave `Waiting` now, even if older clients are still open.
  #[serde(rename = "ACTIVATE_NOW", alias = "SKIP_WAITING")]
  ActivateNow,
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  /// Parse a JSON payload; anything that isn't a typed object is `None`.
  pub fn from_json(payload: &str) -> Option<Self> {
    serde_json::from_str(payload).ok()
  }
}

/// A response the host began fetching before the request was routed.
pub type PreloadResponse = BoxFuture<'static, std::result::Result<Option<Response>, FetchError>>;

/// An intercepted request.
pub struct FetchEvent {
  pub request: Request,
  pub preload: Option<PreloadResponse>,
}

impl FetchEvent {
  pub fn new(request: Request) -> Self {
    Self {
      request,
      preload: None,
    }
  }

  pub fn with_preload(mut self, preload: PreloadResponse) -> Self {
    self.preload = Some(preload);
    self
  }
}

/// One generation of the cache worker.
///
/// Owns the generation tag, partitions, strategies and router; storage,
/// network and host are shared with whatever else the embedder runs.
pub struct Worker<S, N, H = DetachedHost> {
  namespace: Namespace<S>,
  engine: StrategyEngine<N>,
  router: Router,
  network: Arc<N>,
  host: Arc<H>,
  core_assets: Vec<Url>,
  static_assets: Vec<Url>,
  state: Mutex<LifecycleState>,
  /// Set once an install run has claimed the `Installing` state
  install_started: AtomicBool,
  skip_waiting: AtomicBool,
  navigation_preload: AtomicBool,
}

impl<S: CacheStorage, N: Network, H: Host> Worker<S, N, H> {
  pub fn new(
    settings: WorkerSettings,
    storage: Arc<S>,
    network: Arc<N>,
    host: Arc<H>,
    clock: &dyn Clock,
  ) -> Self {
    let tag = GenerationTag::current(&settings.epoch, clock);
    let engine = StrategyEngine::new(Arc::clone(&network), settings.start_url.clone())
      .with_timeout(settings.network_timeout);
    let router = Router::new(&settings.scope, &settings.start_url);

    Self {
      namespace: Namespace::new(storage, tag),
      engine,
      router,
      network,
      host,
      core_assets: settings.core_assets,
      static_assets: settings.static_assets,
      state: Mutex::new(LifecycleState::Installing),
      install_started: AtomicBool::new(false),
      skip_waiting: AtomicBool::new(false),
      navigation_preload: AtomicBool::new(false),
    }
  }

  pub fn tag(&self) -> &GenerationTag {
    self.namespace.tag()
  }

  pub fn namespace(&self) -> &Namespace<S> {
    &self.namespace
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, next: LifecycleState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
  }

  /// Move from `from` to `to`, or report why `action` is not allowed.
  fn transition(
    &self,
    action: &'static str,
    from: LifecycleState,
    to: LifecycleState,
  ) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state != from {
      return Err(CacheError::InvalidTransition {
        action,
        state: *state,
      });
    }
    *state = to;
    Ok(())
  }

  /// Claim the single install run for this generation.
  fn begin_install(&self) -> Result<()> {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state != LifecycleState::Installing || self.install_started.swap(true, Ordering::SeqCst) {
      return Err(CacheError::InvalidTransition {
        action: "install",
        state: *state,
      });
    }
    Ok(())
  }

  /// Whether the host should promote this worker without waiting for old
  /// clients to close.
  pub fn should_activate(&self) -> bool {
    self.state() == LifecycleState::Waiting && self.skip_waiting.load(Ordering::SeqCst)
  }

  pub fn navigation_preload_enabled(&self) -> bool {
    self.navigation_preload.load(Ordering::SeqCst)
  }

  /// Populate the core partition, then the static one.
  ///
  /// Any population fault makes this generation redundant so the previous
  /// one stays in control.
  pub async fn install(&self) -> Result<()> {
    self.begin_install()?;
    info!(generation = %self.tag(), "installing");

    let populated = async {
      self
        .namespace
        .populate(PartitionKind::Core, &self.core_assets, self.network.as_ref())
        .await?;
      self
        .namespace
        .populate(PartitionKind::Static, &self.static_assets, self.network.as_ref())
        .await
    }
    .await;

    if let Err(e) = populated {
      error!(generation = %self.tag(), error = %e, "install failed");
      self.set_state(LifecycleState::Redundant);
      return Err(e);
    }

    self.set_state(LifecycleState::Waiting);
    self.skip_waiting.store(true, Ordering::SeqCst);
    info!(generation = %self.tag(), "installed, requesting immediate activation");
    Ok(())
  }

  /// Drop other generations' partitions and take control of clients.
  pub async fn activate(&self) -> Result<()> {
    self.transition("activate", LifecycleState::Waiting, LifecycleState::Activating)?;
    info!(generation = %self.tag(), "activating");

    if let Err(e) = self.namespace.purge_obsolete(&self.namespace.current_names()) {
      error!(generation = %self.tag(), error = %e, "failed to purge old partitions");
      self.set_state(LifecycleState::Waiting);
      return Err(e);
    }

    if self.host.supports_navigation_preload() {
      match self.host.enable_navigation_preload().await {
        Ok(()) => {
          self.navigation_preload.store(true, Ordering::SeqCst);
          debug!("navigation preload enabled");
        }
        Err(e) => debug!(error = %e, "navigation preload unavailable"),
      }
    }

    if let Err(e) = self.host.claim_clients().await {
      warn!(error = %e, "failed to claim clients");
    }

    self.set_state(LifecycleState::Active);
    info!(generation = %self.tag(), "active");
    Ok(())
  }

  /// React to a message from a controlled page.
  pub async fn handle_message(&self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::ActivateNow => {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state() == LifecycleState::Waiting {
          info!(generation = %self.tag(), "activation forced by client");
          self.activate().await?;
        }
      }
      ClientMessage::Unknown => debug!("ignoring unknown client message"),
    }
    Ok(())
  }

  /// Answer an intercepted request.
  ///
  /// Until this generation is active every request goes straight to the
  /// network.
  pub async fn handle_fetch(&self, event: FetchEvent) -> Result<Served> {
    let FetchEvent { request, preload } = event;

    let route = if self.state() == LifecycleState::Active {
      self.router.classify(&request)
    } else {
      Route::PassThrough
    };

    match route {
      Route::PassThrough => self.pass_through(&request).await,
      Route::NetworkFirst(kind) => {
        let partition = self.namespace.open(kind)?;

        if let Some(preload) = preload.filter(|_| self.navigation_preload_enabled()) {
          match preload.await {
            Ok(Some(response)) => {
              return Ok(self.engine.store_preloaded(&request, &partition, response));
            }
            Ok(None) => {}
            Err(e) => debug!(url = %request.url, error = %e, "preload failed"),
          }
        }

        self.engine.network_first(&request, &partition).await
      }
      Route::StaleWhileRevalidate(kind) => {
        let partition = self.namespace.open(kind)?;
        self.engine.stale_while_revalidate(request, &partition).await
      }
    }
  }

  async fn pass_through(&self, request: &Request) -> Result<Served> {
    let response = self.network.fetch(request, CancellationToken::new()).await?;
    Ok(Served::new(response, ServedFrom::PassThrough))
  }
}
