//! REST Client - Retrying Public Market-Data Client
//!
//! Wraps reqwest with a concurrency limit and retry-with-backoff on
//! transient failures (429, 5xx, transport errors). Only unauthenticated
//! GETs are needed for price polling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
  /// Base URL, without trailing slash.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Maximum retries on transient errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl RestClientConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      timeout: Duration::from_secs(10),
      max_concurrent: 4,
      max_retries: 2,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

/// Rate-limited HTTP client for one venue's public REST API.
pub struct RestClient {
  http: Client,
  config: RestClientConfig,
  semaphore: Arc<Semaphore>,
}

impl RestClient {
  pub fn new(config: RestClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(2)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

    Ok(Self {
      http,
      config,
      semaphore,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.config.base_url
  }

  /// GET `path` (including query string) with retries.
  pub async fn get(&self, path: &str) -> Result<Response> {
    let url = format!("{}{}", self.config.base_url, path);
    let _permit = self
      .semaphore
      .acquire()
      .await
      .context("Semaphore closed")?;

    let mut last_error = None;

    for attempt in 0..=self.config.max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), "Retrying request");
        sleep(delay).await;
      }

      match self.http.get(&url).send().await {
        Ok(response) => match response.status() {
          StatusCode::OK => return Ok(response),
          StatusCode::TOO_MANY_REQUESTS => {
            warn!(url = %url, "Rate limited, backing off");
            last_error = Some(anyhow::anyhow!("Rate limited"));
          }
          status if status.is_server_error() => {
            warn!(status = %status, url = %url, "Server error, retrying");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status => {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("API error {status}: {body}"));
          }
        },
        Err(e) => {
          warn!(error = %e, attempt, "Request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }

  /// GET and deserialize a JSON body.
  pub async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
    let response = self.get(path).await?;
    response
      .json::<T>()
      .await
      .with_context(|| format!("Invalid JSON from {path}"))
  }
}
