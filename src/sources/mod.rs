//! CMS transports
//!
//! The loader and orchestrator only see [`CmsTransport`]; `StoryblokSource`
//! is the reqwest-backed implementation for the content delivery API.

pub mod storyblok;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::params::RequestParams;

/// One decoded API response
#[derive(Debug, Clone)]
pub struct CmsResponse {
    /// Response body
    pub data: Value,
    /// Total number of entries in the collection, when the API reports it
    pub total: Option<u64>,
}

impl CmsResponse {
    pub fn new(data: Value, total: Option<u64>) -> Self {
        Self { data, total }
    }
}

/// Read-only access to the CMS API
#[async_trait]
pub trait CmsTransport: Send + Sync {
    /// Issues `GET {path}` with the given query parameters
    async fn get(&self, path: &str, params: &RequestParams) -> Result<CmsResponse>;
}

#[async_trait]
impl<T: CmsTransport + ?Sized> CmsTransport for Arc<T> {
    async fn get(&self, path: &str, params: &RequestParams) -> Result<CmsResponse> {
        (**self).get(path, params).await
    }
}

pub use storyblok::StoryblokSource;
