//! Error types for the Storyblok ingestion crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("The {0} option is required")]
    MissingOption(&'static str),

    #[error("API error: {code} - {message}")]
    ApiError {
        code: String,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        endpoint: String,
        reason: String,
    },

    #[error("Invalid request parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid {kind} record: {reason}")]
    InvalidRecord {
        kind: String,
        reason: String,
    },

    #[error("Asset error: {0}")]
    AssetError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl IngestionError {
    /// True for errors raised before any remote call was attempted
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingOption(_) | Self::ConfigError(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
