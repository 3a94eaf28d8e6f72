//! # Bank Product Comparator
//!
//! A library for reconciling heterogeneous bank product records (scraped listings, search
//! snippets, model extractions) into one canonical schema, scoring how complete they are and
//! comparing competing offers side by side.
//!
//! ## Core Concepts
//!
//! - **Raw Records**: Loosely keyed JSON objects whose keys follow each source's own spelling
//! - **Field Mapping Table**: Canonical fields per product type with their aliases, formats and polarity
//! - **Normalized Records**: Every canonical field present, as a display value or the "Н/Д" sentinel
//! - **Acquisition Chain**: Direct fetch → search-derived → model-derived → synthetic, each tagged with provenance and confidence
//! - **Comparison**: Row-per-field winners, insights and a recommendation for the reference entity
//! - **Trends**: Dated history of one field over a window, reconstructed from search or synthesized
//!
//! ## Example
//!
//! ```rust,ignore
//! use bank_product_comparator::*;
//! use serde_json::json;
//!
//! let workflow = ComparisonWorkflow::builtin(PipelineConfig::default())?;
//!
//! let records = vec![
//!     ("Сбербанк".to_string(), json!({"ставка": "25.9%", "льготный_период": "120 дней"})),
//!     ("Т-Банк".to_string(), json!({"процентная_ставка": 29.9, "грейс_период": 55})),
//! ];
//! let raws: Vec<(String, RawRecord)> = records
//!     .into_iter()
//!     .map(|(name, value)| (name, value.as_object().cloned().unwrap_or_default()))
//!     .collect();
//!
//! let normalized = Normalizer::new(workflow.table()).normalize_all(&raws, ProductType::CreditCard);
//! let result = DeterministicComparator::new(workflow.table(), &workflow.config().comparison)
//!     .compare(&normalized, ProductType::CreditCard)?;
//!
//! for insight in &result.insights {
//!     println!("{}", insight);
//! }
//! println!("{}", result.recommendation);
//! ```
//!
//! With collaborators attached, [`ComparisonWorkflow::compare`] acquires the records itself:
//!
//! ```rust,ignore
//! let workflow = ComparisonWorkflow::builtin(PipelineConfig::default())?
//!     .with_fetcher(&my_fetcher)
//!     .with_search(&my_search);
//! let report = workflow
//!     .compare(&["Сбербанк".to_string(), "ВТБ".to_string()], ProductType::Deposit)
//!     .await?;
//! ```

pub mod acquisition;
pub mod assisted;
pub mod comparator;
pub mod config;
pub mod error;
pub mod extraction;
pub mod field_mapping;
pub mod normalizer;
pub mod router;
pub mod schema;
pub mod sources;
pub mod synthetic;
pub mod trend;
pub mod utils;
pub mod validator;

#[cfg(feature = "gemini")]
pub mod llm;

pub use acquisition::{AcquisitionPipeline, PipelineEvent};
pub use assisted::AssistedExtractor;
pub use comparator::DeterministicComparator;
pub use config::{MappingConfig, PipelineConfig};
pub use error::{ComparatorError, Result};
pub use extraction::{ExtractionRequest, ExtractionService, ExtractionTask};
pub use field_mapping::{FieldMappingTable, FieldSpec, ProductSchema};
pub use normalizer::Normalizer;
pub use router::{RequestKind, RequestRouter, RoutedRequest};
pub use schema::*;
pub use sources::{DirectFetcher, SearchHit, SearchProvider, SearchQuery};
pub use trend::{TrendDirection, TrendReconstructor, TrendSummary};
pub use validator::{BatchReport, Validator};

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

/// Everything one comparison produced: the result itself, the validation of the records it
/// was built from, and where each record came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub result: ComparisonResult,
    pub validation: BatchReport,
    /// Provenance per entity, in input order.
    pub sources: Vec<SourcedRecord>,
}

impl ComparisonReport {
    /// Entities whose record did not come from a real source.
    pub fn synthetic_entities(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|source| source.origin == DataOrigin::Synthetic)
            .map(|source| source.entity.as_str())
            .collect()
    }
}

/// Owns the loaded tables and wires the components together.
///
/// Collaborators are borrowed and optional; whatever is missing is skipped by the stages that
/// would have used it.
pub struct ComparisonWorkflow<'a> {
    table: FieldMappingTable,
    config: PipelineConfig,
    fetcher: Option<&'a dyn DirectFetcher>,
    search: Option<&'a dyn SearchProvider>,
    extractor: Option<&'a dyn ExtractionService>,
    progress: Option<Sender<PipelineEvent>>,
}

impl<'a> ComparisonWorkflow<'a> {
    pub fn new(table: FieldMappingTable, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table,
            config,
            fetcher: None,
            search: None,
            extractor: None,
            progress: None,
        })
    }

    /// Workflow over the built-in field mapping table.
    pub fn builtin(config: PipelineConfig) -> Result<Self> {
        Self::new(FieldMappingTable::builtin()?, config)
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn DirectFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_search(mut self, search: &'a dyn SearchProvider) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_extractor(mut self, extractor: &'a dyn ExtractionService) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_progress(mut self, progress: Sender<PipelineEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn table(&self) -> &FieldMappingTable {
        &self.table
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Acquires a record for every entity, validates the batch and compares it. The first
    /// entity is the reference.
    pub async fn compare(
        &self,
        entities: &[String],
        product_type: ProductType,
    ) -> Result<ComparisonReport> {
        comparator::check_entities(entities.iter().map(String::as_str))?;
        info!(
            "Comparing {} {} offers, reference {}",
            entities.len(),
            product_type,
            entities[0]
        );

        let sources = self.acquisition().acquire_all(entities, product_type).await;
        for source in &sources {
            debug!(
                "{}: {:?} record, confidence {:.2}, {} failed stages",
                source.entity,
                source.origin,
                source.confidence,
                source.failed_stages.len()
            );
        }

        let raws: Vec<(String, RawRecord)> = sources
            .iter()
            .map(|source| (source.entity.clone(), source.record.clone()))
            .collect();
        let result = self.compare_records(&raws, product_type).await?;
        let validation = Validator::new(&self.table, &self.config.validation)
            .validate_batch(&raws, product_type);
        if !validation.all_valid() {
            warn!(
                "{} of {} {} records failed validation",
                validation.entities.len() - validation.valid_count,
                validation.entities.len(),
                product_type
            );
        }

        Ok(ComparisonReport {
            result,
            validation,
            sources,
        })
    }

    /// Compares records the caller already holds, skipping acquisition.
    ///
    /// Uses the assisted comparison when `prefer_assisted` is set and an extraction service
    /// is attached; it falls back to the deterministic comparison on its own.
    pub async fn compare_records(
        &self,
        raws: &[(String, RawRecord)],
        product_type: ProductType,
    ) -> Result<ComparisonResult> {
        if let (true, Some(extractor)) = (self.config.prefer_assisted, self.extractor) {
            return AssistedExtractor::new(&self.table, &self.config.comparison)
                .with_extractor(extractor)
                .compare_assisted(raws, product_type)
                .await;
        }

        let normalized = Normalizer::new(&self.table).normalize_all(raws, product_type);
        DeterministicComparator::new(&self.table, &self.config.comparison)
            .compare(&normalized, product_type)
    }

    /// Reconstructs the history of `field` for one entity over `window`.
    pub async fn trend(
        &self,
        entity: &str,
        product_type: ProductType,
        field: &str,
        window: TrendWindow,
    ) -> Result<TrendSeries> {
        self.reconstructor()
            .reconstruct(entity, product_type, field, window)
            .await
    }

    /// Same as [`ComparisonWorkflow::trend`] over a named window ending on `today`.
    pub async fn trend_for_period(
        &self,
        entity: &str,
        product_type: ProductType,
        field: &str,
        period: TrendPeriod,
        today: NaiveDate,
    ) -> Result<TrendSeries> {
        self.reconstructor()
            .reconstruct_period(entity, product_type, field, period, today)
            .await
    }

    fn acquisition(&self) -> AcquisitionPipeline<'_> {
        let mut pipeline = AcquisitionPipeline::new(&self.table, &self.config.acquisition);
        if let Some(fetcher) = self.fetcher {
            pipeline = pipeline.with_fetcher(fetcher);
        }
        if let Some(search) = self.search {
            pipeline = pipeline.with_search(search);
        }
        if let Some(extractor) = self.extractor {
            pipeline = pipeline.with_extractor(extractor);
        }
        if let Some(progress) = &self.progress {
            pipeline = pipeline.with_progress(progress.clone());
        }
        pipeline
    }

    fn reconstructor(&self) -> TrendReconstructor<'_> {
        let mut reconstructor = TrendReconstructor::new(&self.table, &self.config.trend);
        if let Some(search) = self.search {
            reconstructor = reconstructor.with_search(search);
        }
        if let Some(extractor) = self.extractor {
            reconstructor = reconstructor.with_extractor(extractor);
        }
        reconstructor
    }
}
