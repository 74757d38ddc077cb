//! HTTP Client Module
//!
//! Shared reqwest client for API calls and asset downloads with:
//! - Semaphore-based concurrency limiting
//! - A direct `governor` rate limiter (requests per second)
//!
//! Failed requests are not retried; the caller sees the first error.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{IngestionError, Result};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Requests per second allowed through the limiter
    pub rate_limit_rps: u32,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            rate_limit_rps: 25,
            user_agent: format!("storyblok-ingestion/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&ClientConfig> for HttpClientConfig {
    fn from(client: &ClientConfig) -> Self {
        Self {
            max_concurrent_requests: client.max_concurrent_requests,
            request_timeout: client.request_timeout(),
            connect_timeout: client.connect_timeout(),
            rate_limit_rps: client.rate_limit_rps,
            ..Default::default()
        }
    }
}

/// Concurrency- and rate-limited HTTP client
pub struct ThrottledHttpClient {
    /// Inner reqwest client
    client: Client,
    /// Global concurrency semaphore
    semaphore: Arc<Semaphore>,
    /// Request rate limiter
    rate_limiter: DefaultDirectRateLimiter,
    /// Total timeout for API calls; asset bodies are not bounded by it
    request_timeout: Duration,
}

impl ThrottledHttpClient {
    /// Creates a new throttled HTTP client
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));

        let rps = NonZeroU32::new(config.rate_limit_rps).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Ok(Self {
            client,
            semaphore,
            rate_limiter,
            request_timeout: config.request_timeout,
        })
    }

    /// Creates a client with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Executes a GET request with query parameters
    ///
    /// Non-success statuses become [`IngestionError::ApiError`] carrying the
    /// response body.
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        let request = self
            .client
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .build()?;
        self.execute(request).await
    }

    /// Executes a plain GET request without a total timeout
    ///
    /// Used for streamed asset bodies, whose duration depends on their size.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let request = self.client.get(url).build()?;
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestionError::ConnectionLost("Semaphore closed".to_string()))?;

        self.rate_limiter.until_ready().await;

        let method = request.method().clone();
        let path = request.url().path().to_string();

        debug!(method = %method, path = %path, "Executing HTTP request");

        let response = self.client.execute(request).await?;
        let status = response.status();

        if status.is_success() {
            debug!(status = %status, path = %path, "Request succeeded");
            return Ok(response);
        }

        warn!(status = %status, path = %path, "Request failed");
        let body = response.text().await.unwrap_or_default();
        Err(IngestionError::ApiError {
            code: status_code(status),
            message: body,
        })
    }

    /// Gets the number of available permits
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

fn status_code(status: StatusCode) -> String {
    status.as_u16().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_config_defaults() {
        let config = HttpClientConfig::default();
        assert_eq!(config.max_concurrent_requests, 10);
        assert_eq!(config.rate_limit_rps, 25);
        assert!(config.user_agent.starts_with("storyblok-ingestion/"));
    }

    #[test]
    fn test_config_from_client_options() {
        let mut client = ClientConfig::with_token("tok");
        client.max_concurrent_requests = 3;
        client.rate_limit_rps = 7;

        let config = HttpClientConfig::from(&client);

        assert_eq!(config.max_concurrent_requests, 3);
        assert_eq!(config.rate_limit_rps, 7);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_semaphore_limiting() {
        let config = HttpClientConfig {
            max_concurrent_requests: 2,
            ..Default::default()
        };

        let client = ThrottledHttpClient::new(config).unwrap();

        assert_eq!(client.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_request_timeout_applies_to_api_calls_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(600)))
            .mount(&server)
            .await;

        let client = ThrottledHttpClient::new(HttpClientConfig {
            request_timeout: Duration::from_millis(150),
            ..Default::default()
        })
        .unwrap();
        let url = format!("{}/slow", server.uri());

        let api = client.get_with_query(&url, &[("page", "1")]).await;
        assert!(matches!(api, Err(IngestionError::HttpError(ref e)) if e.is_timeout()));

        let asset = client.get(&url).await;
        assert!(asset.is_ok());
    }

    #[tokio::test]
    async fn test_zero_rate_limit_falls_back_to_one() {
        let config = HttpClientConfig {
            rate_limit_rps: 0,
            ..Default::default()
        };

        assert!(ThrottledHttpClient::new(config).is_ok());
    }
}
