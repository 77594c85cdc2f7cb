//! Network boundary: the fetch primitive strategies fall back on.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::http::{Request, Response};

/// Something that can turn a request into a response.
///
/// Implementations must stop work and return [`FetchError::Cancelled`] once
/// `cancel` fires. A response with a non-success status is still `Ok`.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(
    &self,
    request: &Request,
    cancel: CancellationToken,
  ) -> std::result::Result<Response, FetchError>;
}

/// HTTP client backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Use a preconfigured client (proxies, custom roots, user agent).
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }

  async fn send(&self, request: &Request) -> std::result::Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let res = builder
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = res.status().as_u16();
    let headers = res
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = res
      .bytes()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(
    &self,
    request: &Request,
    cancel: CancellationToken,
  ) -> std::result::Result<Response, FetchError> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        debug!(url = %request.url, "fetch cancelled");
        Err(FetchError::Cancelled)
      }
      result = self.send(request) => result,
    }
  }
}
