//! Storyblok content ingestion
//!
//! Loads every entry of the configured entity kinds from the Storyblok
//! content delivery API, across all locales of the space, and hands them to
//! a node store:
//! - exhaustive page-by-page loading
//! - per-kind id normalization
//! - asset URLs in story content rewritten to local files and downloaded
//! - configurable failure policy per run

pub mod assets;
pub mod config;
pub mod error;
pub mod http_client;
pub mod loader;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod params;
pub mod processor;
pub mod sources;
pub mod space;
pub mod store;
pub mod walker;

#[cfg(test)]
mod testing;

pub use config::{AdditionalType, ClientConfig, Config, ContentVersion, FailurePolicy};
pub use error::{IngestionError, Result};
pub use normalize::{NormalizedRecord, NormalizerRegistry};
pub use orchestrator::{EntityRun, Orchestrator, RunReport};
pub use params::RequestParams;
pub use processor::{EntityProcessor, EntitySpec, ProcessReport};
pub use sources::{CmsTransport, StoryblokSource};
pub use store::{FileSystemNodeStore, MemoryNodeStore, NodeStore};
