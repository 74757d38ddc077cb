//! Loading, normalizing and storing one entity kind

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::assets::AssetMaterializer;
use crate::error::Result;
use crate::loader::PaginatedLoader;
use crate::metrics::{self, EntityTimer};
use crate::normalize::{NormalizerRegistry, STORIES};
use crate::params::{ParamLayers, RequestParams, PER_PAGE};
use crate::sources::CmsTransport;
use crate::space::Locale;
use crate::store::NodeStore;

/// Page size used when the caller sets none
pub const DEFAULT_PER_PAGE: u64 = 1000;

/// One entity kind to load into one collection
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    /// Endpoint name under `cdn/`, e.g. `stories`
    pub kind: String,
    /// Node store collection
    pub display_name: String,
    pub params: RequestParams,
    /// `None` and `Some("")` both mean no locale filter
    pub locale: Option<Locale>,
}

impl EntitySpec {
    pub fn new(kind: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            display_name: display_name.into(),
            params: RequestParams::new(),
            locale: None,
        }
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<Locale>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

/// Counters for one `process` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub fetched: usize,
    pub stored: usize,
    pub skipped: usize,
    /// Asset references replaced by local paths or descriptors
    pub assets_rewritten: usize,
    pub assets_downloaded: usize,
    pub assets_skipped: usize,
    pub asset_failures: usize,
}

impl ProcessReport {
    pub fn absorb(&mut self, other: &ProcessReport) {
        self.fetched += other.fetched;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.assets_rewritten += other.assets_rewritten;
        self.assets_downloaded += other.assets_downloaded;
        self.assets_skipped += other.assets_skipped;
        self.asset_failures += other.asset_failures;
    }
}

pub struct EntityProcessor {
    transport: Arc<dyn CmsTransport>,
    normalizers: NormalizerRegistry,
    assets: Option<AssetMaterializer>,
}

impl EntityProcessor {
    pub fn new(transport: Arc<dyn CmsTransport>, normalizers: NormalizerRegistry) -> Self {
        Self {
            transport,
            normalizers,
            assets: None,
        }
    }

    /// Enables asset materialization for stories
    pub fn with_assets(mut self, assets: AssetMaterializer) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Loads every entry of `spec.kind` and upserts it into `spec.display_name`
    ///
    /// Fetch and store errors are returned; unusable records and asset
    /// failures are logged and counted.
    #[instrument(
        skip(self, store, spec),
        fields(kind = %spec.kind, collection = %spec.display_name, locale = ?spec.locale)
    )]
    pub async fn process(&self, store: &dyn NodeStore, spec: &EntitySpec) -> Result<ProcessReport> {
        let _timer = EntityTimer::new(&spec.kind);

        let params = ParamLayers::new()
            .defaults(RequestParams::new().with(PER_PAGE, DEFAULT_PER_PAGE))
            .caller(spec.params.clone())
            .merge();

        let loader = PaginatedLoader::new(self.transport.as_ref());
        let records = loader
            .load_all(&spec.kind, &params, spec.locale.as_deref())
            .await?;

        let mut report = ProcessReport {
            fetched: records.len(),
            ..Default::default()
        };

        let materializer = self.assets.as_ref().filter(|_| spec.kind == STORIES);

        for raw in records {
            let mut record = match self.normalizers.normalize(&spec.kind, raw) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Skipping record");
                    metrics::record_skipped(&spec.display_name);
                    report.skipped += 1;
                    continue;
                }
            };

            if let Some(materializer) = materializer {
                let assets = materializer.materialize(&mut record).await;
                report.assets_rewritten += assets.rewritten;
                report.assets_downloaded += assets.downloaded;
                report.assets_skipped += assets.skipped;
                report.asset_failures += assets.failed;
            }

            store.add_node(&spec.display_name, record).await?;
            metrics::record_stored(&spec.display_name);
            report.stored += 1;
        }

        info!(
            fetched = report.fetched,
            stored = report.stored,
            skipped = report.skipped,
            assets_rewritten = report.assets_rewritten,
            assets_downloaded = report.assets_downloaded,
            asset_failures = report.asset_failures,
            "Processed entity"
        );

        Ok(report)
    }
}
