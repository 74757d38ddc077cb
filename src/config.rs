//! Configuration for the Storyblok ingestion run
//!
//! Values come from an optional config file layered under `STORYBLOK_*`
//! environment variables (`__` separates nested keys, e.g.
//! `STORYBLOK_CLIENT__ACCESS_TOKEN`). Keys also accept the camelCase
//! option spellings (`accessToken`, `typeName`, ...).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assets::AssetNaming;
use crate::error::{IngestionError, Result};
use crate::params::RequestParams;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Transport
    pub client: Option<ClientConfig>,

    // Content selection
    #[serde(default)]
    pub version: ContentVersion,
    #[serde(default = "default_type_name", alias = "typeName", alias = "typename")]
    pub type_name: String,
    #[serde(default)]
    pub params: RequestParams,
    #[serde(default, alias = "additionalTypes", alias = "additionaltypes")]
    pub additional_types: Vec<AdditionalType>,

    // Assets
    #[serde(default, alias = "downloadImages", alias = "downloadimages")]
    pub download_assets: bool,
    #[serde(
        default = "default_asset_directory",
        alias = "imageDirectory",
        alias = "imagedirectory"
    )]
    pub asset_directory: String,
    #[serde(default = "default_asset_root")]
    pub asset_root: PathBuf,
    #[serde(default)]
    pub asset_naming: AssetNaming,
    #[serde(default = "default_asset_hosts")]
    pub asset_hosts: Vec<String>,
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    // Run behaviour
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    // Node store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Options handed to the CMS transport
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(alias = "accessToken", alias = "accesstoken")]
    pub access_token: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

/// Content state requested from the delivery API
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentVersion {
    #[default]
    Draft,
    Published,
}

impl ContentVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

/// What the orchestrator does when one entity/locale load fails
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failed load ends the run with its error
    #[default]
    AbortRun,
    /// Log the failure and continue with the next locale or entity type
    ContinueOnError,
}

/// A non-localized collection fetched in addition to stories
#[derive(Debug, Clone, Deserialize)]
pub struct AdditionalType {
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default, alias = "name", alias = "displayName", alias = "displayname")]
    pub display_name: String,
    #[serde(default)]
    pub params: RequestParams,
}

impl AdditionalType {
    pub fn new(kind: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            display_name: display_name.into(),
            params: RequestParams::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.kind.trim().is_empty() && !self.display_name.trim().is_empty()
    }
}

fn default_type_name() -> String {
    "StoryblokEntry".to_string()
}

fn default_asset_directory() -> String {
    "storyblok_assets".to_string()
}

fn default_asset_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_asset_hosts() -> Vec<String> {
    vec![
        "//a.storyblok.com/f/".to_string(),
        "//a-us.storyblok.com/f/".to_string(),
    ]
}

fn default_max_concurrent_downloads() -> usize {
    4
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/nodes")
}

fn default_base_url() -> String {
    "https://api.storyblok.com/v2".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_rate_limit_rps() -> u32 {
    25 // stays under the uncached-request budget of the CDN API
}

fn default_max_concurrent_requests() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: None,
            version: ContentVersion::default(),
            type_name: default_type_name(),
            params: RequestParams::new(),
            additional_types: Vec::new(),
            download_assets: false,
            asset_directory: default_asset_directory(),
            asset_root: default_asset_root(),
            asset_naming: AssetNaming::default(),
            asset_hosts: default_asset_hosts(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            failure_policy: FailurePolicy::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl ClientConfig {
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            rate_limit_rps: default_rate_limit_rps(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Builds a config with only the access token set
    pub fn with_access_token(access_token: impl Into<String>) -> Self {
        Self {
            client: Some(ClientConfig::with_token(access_token)),
            ..Self::default()
        }
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("STORYBLOK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Checks the options every run needs before any request is made
    pub fn validate(&self) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or(IngestionError::MissingOption("client"))?;

        match client.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(IngestionError::MissingOption("accessToken")),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.client.as_ref().and_then(|c| c.access_token.as_deref())
    }

    /// Additional types that name both a kind and a collection
    pub fn complete_additional_types(&self) -> impl Iterator<Item = &AdditionalType> {
        self.additional_types.iter().filter(|t| t.is_complete())
    }
}
