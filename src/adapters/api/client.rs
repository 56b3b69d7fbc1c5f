//! CLOB HTTP Client - Authenticated REST API Client
//!
//! Wraps reqwest with authentication, a concurrency limit and
//! per-call retry policies for all Polymarket CLOB REST API interactions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use super::auth::ClobAuth;
use crate::adapters::retry::{self, RetryPolicy};

/// Configuration for the CLOB HTTP client.
#[derive(Debug, Clone)]
pub struct ClobClientConfig {
  /// Base URL for the CLOB API.
  pub base_url: String,
  /// Per-request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
}

impl Default for ClobClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://clob.polymarket.com".to_string(),
      timeout: Duration::from_secs(10),
      max_concurrent: 10,
    }
  }
}

/// Authenticated HTTP client for the Polymarket CLOB API.
pub struct ClobClient {
  http: Client,
  auth: Arc<ClobAuth>,
  config: ClobClientConfig,
  semaphore: Arc<Semaphore>,
}

impl ClobClient {
  /// Create a new CLOB client.
  pub fn new(auth: Arc<ClobAuth>, config: ClobClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

    Ok(Self {
      http,
      auth,
      config,
      semaphore,
    })
  }

  /// GET a JSON document. `None` on 404.
  pub async fn get(&self, path: &str, policy: &RetryPolicy) -> Result<Option<Value>> {
    self.execute(Method::GET, path, "", policy).await
  }

  /// POST a JSON body and return the JSON reply.
  pub async fn post(&self, path: &str, body: &str, policy: &RetryPolicy) -> Result<Value> {
    self
      .execute(Method::POST, path, body, policy)
      .await?
      .with_context(|| format!("POST {path} returned 404"))
  }

  /// DELETE a resource. `None` on 404.
  pub async fn delete(&self, path: &str, policy: &RetryPolicy) -> Result<Option<Value>> {
    self.execute(Method::DELETE, path, "", policy).await
  }

  async fn execute(
    &self,
    method: Method,
    path: &str,
    body: &str,
    policy: &RetryPolicy,
  ) -> Result<Option<Value>> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let op = format!("{method} {path}");
    retry::retry_async(policy, &op, move || self.send_once(method.clone(), path, body, policy))
      .await
  }

  async fn send_once(
    &self,
    method: Method,
    path: &str,
    body: &str,
    policy: &RetryPolicy,
  ) -> Result<Option<Value>> {
    let url = format!("{}{}", self.config.base_url, path);
    let mut req = self.http.request(method.clone(), &url);
    for (name, value) in self.auth.headers(method.as_str(), path, body) {
      req = req.header(name, value);
    }
    if !body.is_empty() {
      req = req
        .header("Content-Type", "application/json")
        .body(body.to_string());
    }

    let response = req
      .send()
      .await
      .map_err(|e| retry::transport_error("venue", &e))?;

    let status = response.status();
    debug!(%method, path, status = status.as_u16(), "CLOB response");

    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !status.is_success() {
      let text = response.text().await.unwrap_or_default();
      return Err(policy.status_error("venue", status, &text));
    }

    let value = response
      .json::<Value>()
      .await
      .map_err(|e| retry::transport_error("venue", &e))?;
    Ok(Some(value))
  }
}
