//! ScrapingAnt fetch client with cascading anti-detection configurations.
//!
//! The target portals block, throttle, and fingerprint aggressively, so a
//! single request shape is not enough. [`CascadeClient`] issues one logical
//! fetch and transparently retries it across an ordered list of alternate
//! [`FetchConfig`]s (rendering mode, egress country, stealth flags) until one
//! returns a document or all are exhausted.
//!
//! # Example
//!
//! ```rust,ignore
//! use scrapingant_client::ScrapingAntClient;
//!
//! let client = ScrapingAntClient::new("your-api-key".into())?;
//! let doc = client.fetch(&url).await?;
//! println!("{} bytes from config #{}", doc.body.len(), doc.config_index);
//! ```

pub mod config;
pub mod error;

pub use config::FetchConfig;
pub use error::{FetchError, Result};

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

const BASE_URL: &str = "https://api.scrapingant.com/v2/general";

/// How long to wait before retrying the same configuration after the
/// upstream reports its concurrency limit.
const THROTTLE_BACKOFF: Duration = Duration::from_secs(60);

/// Per-request transport timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A raw upstream response, before cascade classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: Url,
    pub body: String,
    /// Index into the cascade of the configuration that succeeded.
    pub config_index: usize,
}

/// Executes one request under one configuration (seam for mocking).
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn execute(&self, url: &Url, config: &FetchConfig) -> anyhow::Result<RawResponse>;
}

/// Transport over the ScrapingAnt v2 HTTP API.
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpTransport {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        })
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn execute(&self, url: &Url, config: &FetchConfig) -> anyhow::Result<RawResponse> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("url", url.as_str()), ("x-api-key", &self.api_key)])
            .query(&config.query_params())
            .send()
            .await
            .context("upstream request failed")?;

        let status = resp.status().as_u16();
        let body = resp.text().await.context("failed to read upstream body")?;

        Ok(RawResponse { status, body })
    }
}

/// How the cascade reacts to a classified response.
enum Step {
    Advance(FetchError),
    RetryThenAdvance(FetchError),
    FailIfLast(FetchError),
}

fn classify(status: u16, body: &str) -> Step {
    match status {
        423 => Step::Advance(FetchError::Blocked),
        409 => Step::RetryThenAdvance(FetchError::Throttled),
        422 => Step::Advance(FetchError::Malformed(truncate(body))),
        404 => Step::Advance(FetchError::Unreachable),
        _ => Step::FailIfLast(FetchError::Upstream {
            status,
            message: truncate(body),
        }),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Issues a single logical fetch, walking the configuration cascade.
///
/// Holds no crawl state; its only side effects are network IO and logging.
pub struct CascadeClient<T> {
    transport: T,
    configs: Vec<FetchConfig>,
    throttle_backoff: Duration,
}

impl CascadeClient<HttpTransport> {
    /// Client over the real ScrapingAnt API with the default cascade.
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(api_key)?,
            configs: FetchConfig::default_cascade(),
            throttle_backoff: THROTTLE_BACKOFF,
        })
    }
}

/// Convenience alias for the production client.
pub type ScrapingAntClient = CascadeClient<HttpTransport>;

impl<T: FetchTransport> CascadeClient<T> {
    pub fn with_transport(transport: T, configs: Vec<FetchConfig>) -> Self {
        Self {
            transport,
            configs,
            throttle_backoff: THROTTLE_BACKOFF,
        }
    }

    /// Override the 409 backoff interval (tests use a short one).
    pub fn with_throttle_backoff(mut self, backoff: Duration) -> Self {
        self.throttle_backoff = backoff;
        self
    }

    /// Fetch `url`, trying each configuration in order.
    ///
    /// A blocked, throttled, malformed, or unreachable response advances to
    /// the next configuration; a concurrency limit is retried once on the
    /// same configuration after a fixed backoff. The first document returned
    /// wins. Exhausting the cascade yields [`FetchError::Exhausted`].
    pub async fn fetch(&self, url: &Url) -> Result<FetchedDocument> {
        let total = self.configs.len();

        for (index, config) in self.configs.iter().enumerate() {
            let is_last = index + 1 == total;
            let mut throttle_retried = false;

            loop {
                debug!(url = %url, config = %config, attempt = index + 1, "Trying fetch configuration");

                let resp = match self.transport.execute(url, config).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        if is_last {
                            return Err(FetchError::Transport(e));
                        }
                        warn!(url = %url, attempt = index + 1, error = %e, "Transport error, advancing to next configuration");
                        break;
                    }
                };

                if (200..300).contains(&resp.status) {
                    info!(url = %url, attempt = index + 1, "Fetch succeeded");
                    return Ok(FetchedDocument {
                        url: url.clone(),
                        body: resp.body,
                        config_index: index,
                    });
                }

                match classify(resp.status, &resp.body) {
                    Step::Advance(reason) => {
                        warn!(url = %url, attempt = index + 1, status = resp.status, %reason, "Advancing to next configuration");
                        break;
                    }
                    Step::RetryThenAdvance(reason) => {
                        if throttle_retried {
                            warn!(url = %url, attempt = index + 1, "Concurrency limit persists after retry, advancing");
                            break;
                        }
                        warn!(url = %url, attempt = index + 1, backoff_secs = self.throttle_backoff.as_secs(), %reason, "Concurrency limit reached, waiting before retrying same configuration");
                        tokio::time::sleep(self.throttle_backoff).await;
                        throttle_retried = true;
                    }
                    Step::FailIfLast(reason) => {
                        if is_last {
                            return Err(reason);
                        }
                        warn!(url = %url, attempt = index + 1, status = resp.status, "Upstream error, advancing to next configuration");
                        break;
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: total,
        })
    }
}
