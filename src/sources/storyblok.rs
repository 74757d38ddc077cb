//! Storyblok Content Delivery API transport
//!
//! https://www.storyblok.com/docs/api/content-delivery/v2
//!
//! Listing endpoints return the page of entries in the body and the
//! collection size in the `Total` response header.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{CmsResponse, CmsTransport};
use crate::config::ClientConfig;
use crate::error::{IngestionError, Result};
use crate::http_client::{HttpClientConfig, ThrottledHttpClient};
use crate::params::RequestParams;

const TOTAL_HEADER: &str = "total";

/// Storyblok CDN API source
pub struct StoryblokSource {
    client: Arc<ThrottledHttpClient>,
    base_url: String,
    access_token: String,
}

impl StoryblokSource {
    /// Creates a new Storyblok source
    pub fn new(
        client: Arc<ThrottledHttpClient>,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Builds the source and its HTTP client from the `client` options
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let access_token = config
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(IngestionError::MissingOption("accessToken"))?;

        let client = Arc::new(ThrottledHttpClient::new(HttpClientConfig::from(config))?);
        Ok(Self::new(client, config.base_url.clone(), access_token))
    }

    /// Shared HTTP client, reused for asset downloads
    pub fn http_client(&self) -> Arc<ThrottledHttpClient> {
        self.client.clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CmsTransport for StoryblokSource {
    async fn get(&self, path: &str, params: &RequestParams) -> Result<CmsResponse> {
        let url = self.endpoint(path);

        let mut query = params.to_query();
        query.push(("token".to_string(), self.access_token.clone()));

        let response = self.client.get_with_query(&url, &query).await?;

        let header_total = response
            .headers()
            .get(TOTAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = response.text().await?;
        let data: Value = serde_json::from_str(&text)?;

        let total = header_total.or_else(|| data.get("total").and_then(Value::as_u64));

        debug!(path = %path, total = ?total, "Decoded CMS response");

        Ok(CmsResponse::new(data, total))
    }
}
