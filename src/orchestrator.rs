//! Run orchestration
//!
//! A run walks every locale of the space for stories, then every additional
//! entity type once, strictly one after another:
//! - configuration is validated before any request
//! - collections are declared once per run
//! - the failure policy decides whether a failed load ends the run

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::assets::{
    AssetDownloader, AssetFetcher, AssetLayout, AssetMaterializer, AssetResolver, HttpAssetFetcher,
    TokioFs,
};
use crate::config::{Config, FailurePolicy};
use crate::error::{IngestionError, Result};
use crate::normalize::{NormalizerRegistry, STORIES};
use crate::params::{ParamLayers, RequestParams, PER_PAGE, VERSION};
use crate::processor::{EntityProcessor, EntitySpec, ProcessReport};
use crate::sources::{CmsTransport, StoryblokSource};
use crate::space::{fetch_space, resolve_locales, Locale};
use crate::store::NodeStore;
use crate::walker::ContentWalker;

/// Page size for stories when the configuration sets none
pub const STORIES_PER_PAGE: u64 = 25;

/// Outcome of one entity/locale load
#[derive(Debug, Clone, Serialize)]
pub struct EntityRun {
    pub kind: String,
    pub collection: String,
    pub locale: Option<Locale>,
    pub report: ProcessReport,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub locales: Vec<Locale>,
    pub entities: Vec<EntityRun>,
    /// Sum over all successful loads
    pub totals: ProcessReport,
    /// Loads that failed under `ContinueOnError`
    pub failed: usize,
}

impl RunReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            locales: Vec::new(),
            entities: Vec::new(),
            totals: ProcessReport::default(),
            failed: 0,
        }
    }

    fn push(&mut self, spec: &EntitySpec, outcome: std::result::Result<ProcessReport, String>) {
        let (report, error) = match outcome {
            Ok(report) => {
                self.totals.absorb(&report);
                (report, None)
            }
            Err(e) => {
                self.failed += 1;
                (ProcessReport::default(), Some(e))
            }
        };

        self.entities.push(EntityRun {
            kind: spec.kind.clone(),
            collection: spec.display_name.clone(),
            locale: spec.locale.clone(),
            report,
            error,
        });
    }
}

pub struct Orchestrator {
    transport: Arc<dyn CmsTransport>,
    processor: EntityProcessor,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn CmsTransport>, processor: EntityProcessor) -> Self {
        Self { transport, processor }
    }

    /// Wires the HTTP source, default normalizers and, when enabled, asset
    /// downloads from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let client = config
            .client
            .as_ref()
            .ok_or(IngestionError::MissingOption("client"))?;

        let source = Arc::new(StoryblokSource::from_config(client)?);
        let http = source.http_client();
        let transport: Arc<dyn CmsTransport> = source;

        let mut processor = EntityProcessor::new(transport.clone(), NormalizerRegistry::with_defaults());
        if config.download_assets {
            let fetcher = Arc::new(HttpAssetFetcher::new(http));
            processor = processor.with_assets(asset_materializer(config, fetcher));
            info!(
                root = %config.asset_root.display(),
                directory = %config.asset_directory,
                "Asset downloads enabled"
            );
        }

        Ok(Self::new(transport, processor))
    }

    /// Fetches the space, returning the locales a run would iterate
    pub async fn locales(&self) -> Result<Vec<Locale>> {
        let space = fetch_space(self.transport.as_ref()).await?;
        Ok(resolve_locales(&space.language_codes))
    }

    /// Runs one full ingestion into `store`
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run(&self, config: &Config, store: &dyn NodeStore) -> Result<RunReport> {
        config.validate()?;

        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());
        let mut report = RunReport::new(run_id);

        info!(
            type_name = %config.type_name,
            version = config.version.as_str(),
            policy = ?config.failure_policy,
            "Starting ingestion run"
        );

        report.locales = self.locales().await?;

        for ignored in config.additional_types.iter().filter(|t| !t.is_complete()) {
            warn!(kind = %ignored.kind, name = %ignored.display_name, "Ignoring additional type without kind or name");
        }
        let additional: Vec<_> = config.complete_additional_types().collect();

        store.declare_collection(&config.type_name).await?;
        for entity in &additional {
            store.declare_collection(&entity.display_name).await?;
        }

        let version = RequestParams::new().with(VERSION, config.version.as_str());

        let story_params = ParamLayers::new()
            .defaults(RequestParams::new().with(PER_PAGE, STORIES_PER_PAGE))
            .caller(config.params.clone())
            .fixed(version.clone())
            .merge();

        for locale in report.locales.clone() {
            let spec = EntitySpec::new(STORIES, config.type_name.clone())
                .with_params(story_params.clone())
                .with_locale(locale);
            self.process(store, &spec, config.failure_policy, &mut report).await?;
        }

        for entity in additional {
            let params = ParamLayers::new()
                .caller(entity.params.clone())
                .fixed(version.clone())
                .merge();
            let spec = EntitySpec::new(entity.kind.clone(), entity.display_name.clone()).with_params(params);
            self.process(store, &spec, config.failure_policy, &mut report).await?;
        }

        report.finished_at = Some(Utc::now());
        info!(
            locales = report.locales.len(),
            stored = report.totals.stored,
            skipped = report.totals.skipped,
            assets_downloaded = report.totals.assets_downloaded,
            asset_failures = report.totals.asset_failures,
            failed = report.failed,
            "Ingestion run finished"
        );

        Ok(report)
    }

    async fn process(
        &self,
        store: &dyn NodeStore,
        spec: &EntitySpec,
        policy: FailurePolicy,
        report: &mut RunReport,
    ) -> Result<()> {
        match self.processor.process(store, spec).await {
            Ok(processed) => {
                report.push(spec, Ok(processed));
                Ok(())
            }
            Err(e) => match policy {
                FailurePolicy::AbortRun => {
                    error!(kind = %spec.kind, locale = ?spec.locale, error = %e, "Load failed, aborting run");
                    Err(e)
                }
                FailurePolicy::ContinueOnError => {
                    warn!(kind = %spec.kind, locale = ?spec.locale, error = %e, "Load failed, continuing");
                    report.push(spec, Err(e.to_string()));
                    Ok(())
                }
            },
        }
    }
}

fn asset_materializer(config: &Config, fetcher: Arc<dyn AssetFetcher>) -> AssetMaterializer {
    let walker = ContentWalker::new(
        AssetResolver::new(config.asset_hosts.clone()),
        AssetLayout::new(config.asset_root.clone(), config.asset_naming),
    );
    let downloader = AssetDownloader::new(Arc::new(TokioFs), fetcher, config.max_concurrent_downloads);
    AssetMaterializer::new(walker, downloader, config.asset_directory.clone())
}
