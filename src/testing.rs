//! Fakes for the network and host boundaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::WorkerSettings;
use crate::error::{FetchError, HostError};
use crate::http::{Request, Response};
use crate::lifecycle::Host;
use crate::network::Network;

pub(crate) const SCOPE: &str = "https://app.test/";

/// Route `tracing` output through the test harness so it shows up for
/// failing tests. Only the first call in a process installs anything.
pub(crate) fn init_test_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_test_writer()
    .try_init();
}

pub(crate) fn url(path: &str) -> Url {
  Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub(crate) fn settings() -> WorkerSettings {
  WorkerSettings {
    scope: url("/"),
    epoch: "shell-v1".to_string(),
    start_url: url("/index.html"),
    core_assets: vec![url("/"), url("/index.html"), url("/manifest.webmanifest")],
    static_assets: vec![url("/icons/icon-192.png"), url("/icons/icon-512.png")],
    network_timeout: Duration::from_millis(2500),
  }
}

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail(FetchError),
  /// Never answers; resolves only when cancelled.
  Hang,
}

/// Scripted network keyed by absolute URL. Unknown URLs fail as unreachable.
#[derive(Default)]
pub(crate) struct FakeNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  fn script(&self, url: &str, reply: Reply) {
    self.replies.lock().unwrap().insert(url.to_string(), reply);
  }

  pub(crate) fn respond(&self, url: &str, response: Response) {
    self.script(url, Reply::Respond(response));
  }

  pub(crate) fn fail(&self, url: &str, error: FetchError) {
    self.script(url, Reply::Fail(error));
  }

  pub(crate) fn hang(&self, url: &str) {
    self.script(url, Reply::Hang);
  }

  /// Answer every URL of `settings` with a 200 echoing its path.
  pub(crate) fn serve_assets(&self, settings: &WorkerSettings) {
    for asset in settings.core_assets.iter().chain(&settings.static_assets) {
      self.respond(asset.as_str(), Response::ok(asset.path().to_string()));
    }
  }

  pub(crate) fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  pub(crate) fn calls_to(&self, url: &str) -> usize {
    self
      .requests
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(
    &self,
    request: &Request,
    cancel: CancellationToken,
  ) -> Result<Response, FetchError> {
    self.requests.lock().unwrap().push(request.clone());
    let reply = self
      .replies
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned();

    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Fail(error)) => Err(error),
      Some(Reply::Hang) => {
        cancel.cancelled().await;
        Err(FetchError::Cancelled)
      }
      None => Err(FetchError::Transport(format!("no route to {}", request.url))),
    }
  }
}

/// Host that records lifecycle calls.
#[derive(Default)]
pub(crate) struct RecordingHost {
  pub(crate) preload_supported: bool,
  pub(crate) preload_fails: bool,
  pub(crate) claim_fails: bool,
  pub(crate) preload_enabled: AtomicBool,
  pub(crate) claims: AtomicUsize,
}

impl RecordingHost {
  pub(crate) fn with_preload() -> Self {
    Self {
      preload_supported: true,
      ..Self::default()
    }
  }

  pub(crate) fn preload_enabled(&self) -> bool {
    self.preload_enabled.load(Ordering::SeqCst)
  }

  pub(crate) fn claims(&self) -> usize {
    self.claims.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Host for RecordingHost {
  fn supports_navigation_preload(&self) -> bool {
    self.preload_supported
  }

  async fn enable_navigation_preload(&self) -> Result<(), HostError> {
    if self.preload_fails {
      return Err(HostError("preload unavailable".to_string()));
    }
    self.preload_enabled.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn claim_clients(&self) -> Result<(), HostError> {
    if self.claim_fails {
      return Err(HostError("clients gone".to_string()));
    }
    self.claims.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
