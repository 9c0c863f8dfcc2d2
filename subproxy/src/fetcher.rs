use crate::parser::parse_subscription_content;
use crate::types::{FetchError, NodeCandidate, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("subproxy/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_ms: 8000,
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }
}

/// Downloads subscription payloads, one URL at a time.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_millis(config.timeout_ms))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, config })
    }

    /// Fetch and decode every subscription in order.
    ///
    /// The first unreachable subscription aborts the whole batch.
    pub async fn fetch_subscriptions(&self, urls: &[String]) -> Result<Vec<NodeCandidate>> {
        let mut nodes = Vec::new();
        for url in urls {
            let content = self.fetch_text(url).await?;
            nodes.extend(parse_subscription_content(&content, url));
        }
        Ok(nodes)
    }

    /// Single GET bounded by the configured timeout.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let start = Instant::now();
        debug!("Fetching subscription: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            error!("Subscription request to {} failed: HTTP {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let content = response.text().await.map_err(|e| self.classify(url, e))?;
        info!(
            "Fetched subscription {} ({} bytes in {}ms)",
            url,
            content.len(),
            start.elapsed().as_millis()
        );
        Ok(content)
    }

    fn classify(&self, url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            error!("Subscription request to {} timed out", url);
            FetchError::Timeout {
                url: url.to_string(),
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            error!("Subscription request to {} failed: {}", url, source);
            FetchError::Http {
                url: url.to_string(),
                source,
            }
        }
    }
}
