use crate::config::FetchConfig;
use crate::types::{PipelineError, Result};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Shared HTTP fetching with per-host pacing and bounded retries.
/// Every request inherits the client-level timeout; callers that need a
/// stricter budget wrap their call in `tokio::time::timeout`.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Fetch a UTF-8 text document.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch a document that may be in a legacy encoding (the ranking pages
    /// are served as EUC-KR). The charset is sniffed from the body; if the
    /// bytes already decode cleanly as UTF-8 they are used as-is.
    pub async fn fetch_text_decoded(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;

        if let Ok(text) = std::str::from_utf8(&bytes) {
            return Ok(text.to_string());
        }

        let (decoded, _, had_errors) = encoding_rs::EUC_KR.decode(&bytes);
        if had_errors {
            warn!(url, "Lossy EUC-KR decode, some characters replaced");
        }
        Ok(decoded.into_owned())
    }

    /// Fetch and deserialize a JSON document, with optional request headers
    /// (search API credentials are passed this way).
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        self.apply_rate_limit(url).await?;

        let mut backoff = self.backoff();
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..=self.config.max_retries {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        last_error = Some(PipelineError::Upstream(format!(
                            "HTTP {} from {}",
                            status, url
                        )));
                    } else {
                        match response.json::<T>().await {
                            Ok(parsed) => return Ok(parsed),
                            Err(e) => return Err(PipelineError::Http(e)),
                        }
                    }
                }
                Err(e) => last_error = Some(PipelineError::Http(e)),
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    debug!(url, attempt = attempt + 1, "Retrying after {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::Upstream(format!("fetch failed: {}", url))))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.apply_rate_limit(url).await?;

        let mut backoff = self.backoff();
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        last_error = Some(PipelineError::Upstream(format!(
                            "HTTP {} from {}",
                            status, url
                        )));
                    } else {
                        match response.bytes().await {
                            Ok(bytes) => {
                                debug!(url, bytes = bytes.len(), "Fetched");
                                return Ok(bytes.to_vec());
                            }
                            Err(e) => last_error = Some(PipelineError::Http(e)),
                        }
                    }
                }
                Err(e) => last_error = Some(PipelineError::Http(e)),
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!(url, attempt = attempt + 1, "Fetch failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::Upstream(format!("fetch failed: {}", url))))
    }

    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 8),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 30)),
            ..Default::default()
        }
    }

    /// Enforce a minimum interval between requests to the same host.
    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        if host.is_empty() {
            return Ok(());
        }

        let min_interval = Duration::from_millis(self.config.min_host_interval_ms);

        // The lock is never held across the sleep: pacing one host must
        // not stall concurrent fetches to the others.
        let wait = {
            let rate_limiter = self.rate_limiter.read().await;
            rate_limiter
                .get(&host)
                .and_then(|last_request| min_interval.checked_sub(last_request.elapsed()))
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                debug!(host, "Rate limiting, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        self.rate_limiter.write().await.insert(host, Instant::now());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pacing_one_host_does_not_stall_another() {
        let config = FetchConfig {
            min_host_interval_ms: 300,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(config).unwrap();
        fetcher
            .apply_rate_limit("https://a.example.com/first")
            .await
            .unwrap();

        let other_host = async {
            let started = Instant::now();
            fetcher
                .apply_rate_limit("https://b.example.com/page")
                .await
                .unwrap();
            started.elapsed()
        };
        let (paced, other_elapsed) = tokio::join!(
            fetcher.apply_rate_limit("https://a.example.com/second"),
            other_host
        );
        paced.unwrap();
        assert!(
            other_elapsed < Duration::from_millis(150),
            "unrelated host waited {:?}",
            other_elapsed
        );
    }

    #[tokio::test]
    async fn same_host_requests_are_paced() {
        let config = FetchConfig {
            min_host_interval_ms: 200,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(config).unwrap();
        fetcher
            .apply_rate_limit("https://a.example.com/first")
            .await
            .unwrap();

        let started = Instant::now();
        fetcher
            .apply_rate_limit("https://a.example.com/second")
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
