//! Prometheus metrics for ingestion runs
//!
//! Metrics include:
//! - listing pages fetched per entity kind
//! - records stored and skipped per collection
//! - asset downloads by outcome
//! - entity processing latency (histogram)
//!
//! A run is a batch job, so metrics are exported as a text snapshot at the
//! end instead of being served.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramOpts, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::path::Path;
use tracing::{error, info};

use crate::error::Result;

/// Asset outcomes
pub const ASSET_DOWNLOADED: &str = "downloaded";
pub const ASSET_SKIPPED: &str = "skipped";
pub const ASSET_FAILED: &str = "failed";

static PAGES_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cms_ingestion_pages_fetched_total",
        "Listing pages fetched from the CMS",
        &["kind"]
    )
    .expect("Failed to create pages_fetched metric")
});

static RECORDS_STORED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cms_ingestion_records_stored_total",
        "Records upserted into the node store",
        &["collection"]
    )
    .expect("Failed to create records_stored metric")
});

static RECORDS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cms_ingestion_records_skipped_total",
        "Records dropped because they could not be normalized",
        &["collection"]
    )
    .expect("Failed to create records_skipped metric")
});

static ASSETS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cms_ingestion_assets_total",
        "Asset downloads by outcome",
        &["outcome"]
    )
    .expect("Failed to create assets metric")
});

static ENTITY_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];
    register_histogram_vec!(
        HistogramOpts::new(
            "cms_ingestion_entity_seconds",
            "Time to load and store one entity kind"
        )
        .buckets(buckets),
        &["kind"]
    )
    .expect("Failed to create entity_latency metric")
});

pub fn record_page_fetched(kind: &str) {
    PAGES_FETCHED.with_label_values(&[kind]).inc();
}

pub fn record_stored(collection: &str) {
    RECORDS_STORED.with_label_values(&[collection]).inc();
}

pub fn record_skipped(collection: &str) {
    RECORDS_SKIPPED.with_label_values(&[collection]).inc();
}

/// `outcome` is one of the `ASSET_*` constants
pub fn record_asset(outcome: &str) {
    ASSETS.with_label_values(&[outcome]).inc();
}

pub fn record_entity_latency(kind: &str, latency_secs: f64) {
    ENTITY_LATENCY.with_label_values(&[kind]).observe(latency_secs);
}

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

/// Writes the current snapshot to `path`
pub async fn write_snapshot(path: &Path) -> Result<()> {
    tokio::fs::write(path, gather_metrics()).await?;
    info!(path = %path.display(), "Wrote metrics snapshot");
    Ok(())
}

/// Measures one entity kind; records on drop
pub struct EntityTimer {
    kind: String,
    start: std::time::Instant,
}

impl EntityTimer {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for EntityTimer {
    fn drop(&mut self) {
        record_entity_latency(&self.kind, self.start.elapsed().as_secs_f64());
    }
}
