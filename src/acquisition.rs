use crate::config::AcquisitionConfig;
use crate::error::{ComparatorError, Result};
use crate::extraction::{
    record_contract, with_deadline, ExtractionRequest, ExtractionService, ExtractionTask,
};
use crate::field_mapping::FieldMappingTable;
use crate::normalizer::{lookup_field, Lookup};
use crate::schema::{
    AcquisitionStage, DataOrigin, ProductType, RawRecord, SourcedRecord, StageFailure,
};
use crate::sources::{usable_snippets, DirectFetcher, SearchHit, SearchProvider, SearchQuery};
use crate::synthetic::synthetic_record;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::Sender;

/// Progress notifications for callers that want to show acquisition as it happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    StageStarted {
        entity: String,
        stage: AcquisitionStage,
    },
    StageFailed {
        entity: String,
        stage: AcquisitionStage,
        reason: String,
    },
    Resolved {
        entity: String,
        origin: DataOrigin,
        confidence: f64,
    },
}

/// Output of a successful stage before it is tagged with origin and confidence.
struct Harvest {
    record: RawRecord,
    /// The text behind the record was too short to trust beyond the lower bound.
    thin: bool,
}

/// Ordered chain of unreliable sources for one (entity, product) pair:
/// direct fetch, search-derived extraction, model-derived extraction, synthetic placeholder.
///
/// Every collaborator is optional; a stage without one fails immediately and the chain moves
/// on. The synthetic stage cannot fail, so [`AcquisitionPipeline::acquire`] always returns a
/// record.
pub struct AcquisitionPipeline<'a> {
    table: &'a FieldMappingTable,
    config: &'a AcquisitionConfig,
    fetcher: Option<&'a dyn DirectFetcher>,
    search: Option<&'a dyn SearchProvider>,
    extractor: Option<&'a dyn ExtractionService>,
    progress: Option<Sender<PipelineEvent>>,
}

impl<'a> AcquisitionPipeline<'a> {
    pub fn new(table: &'a FieldMappingTable, config: &'a AcquisitionConfig) -> Self {
        Self {
            table,
            config,
            fetcher: None,
            search: None,
            extractor: None,
            progress: None,
        }
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

    pub async fn acquire(&self, entity: &str, product_type: ProductType) -> SourcedRecord {
        let mut failed_stages = Vec::new();
        let mut snippets: Vec<SearchHit> = Vec::new();

        for stage in [
            AcquisitionStage::DirectFetch,
            AcquisitionStage::SearchDerived,
            AcquisitionStage::ModelDerived,
        ] {
            self.send_event(PipelineEvent::StageStarted {
                entity: entity.to_string(),
                stage,
            });

            let outcome = match stage {
                AcquisitionStage::DirectFetch => self.direct_fetch(entity, product_type).await,
                AcquisitionStage::SearchDerived => {
                    self.search_derived(entity, product_type, &mut snippets).await
                }
                _ => self.model_derived(entity, product_type, &snippets).await,
            };

            match outcome {
                Ok(harvest) => {
                    return self
                        .resolve(entity, product_type, stage, harvest, failed_stages)
                        .await;
                }
                Err(e) => {
                    warn!("{} {}: stage {} failed: {}", entity, product_type, stage, e);
                    let reason = e.to_string();
                    self.send_event(PipelineEvent::StageFailed {
                        entity: entity.to_string(),
                        stage,
                        reason: reason.clone(),
                    });
                    failed_stages.push(StageFailure { stage, reason });
                }
            }
        }

        self.send_event(PipelineEvent::StageStarted {
            entity: entity.to_string(),
            stage: AcquisitionStage::Synthetic,
        });
        let harvest = Harvest {
            record: synthetic_record(self.table.schema(product_type), entity),
            thin: false,
        };
        self.resolve(
            entity,
            product_type,
            AcquisitionStage::Synthetic,
            harvest,
            failed_stages,
        )
        .await
    }

    /// Runs the chains of several entities concurrently. Results keep the input order.
    pub async fn acquire_all(
        &self,
        entities: &[String],
        product_type: ProductType,
    ) -> Vec<SourcedRecord> {
        join_all(
            entities
                .iter()
                .map(|entity| self.acquire(entity, product_type)),
        )
        .await
    }

    async fn direct_fetch(&self, entity: &str, product_type: ProductType) -> Result<Harvest> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| not_configured(AcquisitionStage::DirectFetch, "direct fetcher"))?;
        let record = with_deadline(
            "direct fetch",
            self.config.direct_fetch_timeout(),
            fetcher.fetch(entity, product_type),
        )
        .await?;
        if record.is_empty() {
            return Err(ComparatorError::AcquisitionFailed {
                stage: AcquisitionStage::DirectFetch.to_string(),
                details: "listing is empty".to_string(),
            });
        }
        Ok(Harvest {
            record,
            thin: false,
        })
    }

    async fn search_derived(
        &self,
        entity: &str,
        product_type: ProductType,
        snippets: &mut Vec<SearchHit>,
    ) -> Result<Harvest> {
        let search = self
            .search
            .ok_or_else(|| not_configured(AcquisitionStage::SearchDerived, "search provider"))?;
        let query = SearchQuery::current_terms(entity, product_type);
        let hits = with_deadline(
            "search",
            self.config.search_timeout(),
            search.search(&query),
        )
        .await?;

        let usable: Vec<SearchHit> = usable_snippets(
            &hits,
            self.config.min_snippet_chars,
            self.config.max_snippets,
        )
        .into_iter()
        .cloned()
        .collect();
        debug!(
            "{} {}: {} search hits, {} usable",
            entity,
            product_type,
            hits.len(),
            usable.len()
        );
        if usable.is_empty() {
            return Err(ComparatorError::AcquisitionFailed {
                stage: AcquisitionStage::SearchDerived.to_string(),
                details: format!("none of {} search hits is usable", hits.len()),
            });
        }
        *snippets = usable;

        let texts: Vec<&str> = snippets.iter().map(|h| h.snippet_text.as_str()).collect();
        let record = self
            .extract_record(
                entity,
                product_type,
                &texts,
                "Извлеки условия продукта только из приведенных фрагментов поисковой выдачи.",
            )
            .await?;
        Ok(Harvest {
            record,
            thin: false,
        })
    }

    async fn model_derived(
        &self,
        entity: &str,
        product_type: ProductType,
        snippets: &[SearchHit],
    ) -> Result<Harvest> {
        let texts: Vec<&str> = snippets.iter().map(|h| h.snippet_text.as_str()).collect();
        let text_chars: usize = texts.iter().map(|t| t.chars().count()).sum();
        let record = self
            .extract_record(
                entity,
                product_type,
                &texts,
                "Используй приведенные фрагменты, если они есть, и свои знания об актуальных \
                 условиях банка. Неизвестные значения оставь пустыми.",
            )
            .await?;
        Ok(Harvest {
            record,
            thin: text_chars < self.config.thin_text_chars,
        })
    }

    async fn extract_record(
        &self,
        entity: &str,
        product_type: ProductType,
        texts: &[&str],
        guidance: &str,
    ) -> Result<RawRecord> {
        let extractor = self
            .extractor
            .ok_or_else(|| not_configured(AcquisitionStage::ModelDerived, "extraction service"))?;
        let schema = self.table.schema(product_type);

        let request = ExtractionRequest {
            task: ExtractionTask::ProductRecord,
            product_type,
            target_entities: vec![entity.to_string()],
            raw_payloads: texts.iter().map(|t| Value::String(t.to_string())).collect(),
            instructions: format!(
                "Банк: {}. Продукт: {}. {} Верни JSON-объект с полями: {}.",
                entity,
                product_type.display_name(),
                guidance,
                schema.field_names().collect::<Vec<_>>().join(", ")
            ),
            output_contract: record_contract(schema),
        };

        let response = with_deadline(
            "extraction",
            self.config.extraction_timeout(),
            extractor.extract(&request),
        )
        .await?;
        self.shape_check(product_type, response)
    }

    /// A usable extraction is a JSON object resolving at least one required field.
    fn shape_check(&self, product_type: ProductType, response: Value) -> Result<RawRecord> {
        let Value::Object(record) = response else {
            return Err(ComparatorError::ContractViolation(
                "expected a JSON object".to_string(),
            ));
        };
        if self.resolved_fields(&record, product_type) == 0 {
            return Err(ComparatorError::ContractViolation(
                "no recognizable field in the extracted record".to_string(),
            ));
        }
        Ok(record)
    }

    fn resolved_fields(&self, record: &RawRecord, product_type: ProductType) -> usize {
        self.table
            .schema(product_type)
            .fields()
            .iter()
            .filter(|spec| matches!(lookup_field(record, spec), Lookup::Value(_)))
            .count()
    }

    async fn resolve(
        &self,
        entity: &str,
        product_type: ProductType,
        stage: AcquisitionStage,
        harvest: Harvest,
        failed_stages: Vec<StageFailure>,
    ) -> SourcedRecord {
        let origin = stage.origin();
        let range = self.config.confidence_range(origin);
        let confidence = if harvest.thin {
            range.min
        } else {
            let required = self.table.schema(product_type).required_count();
            let resolved = self.resolved_fields(&harvest.record, product_type);
            range.at(resolved as f64 / required as f64)
        };

        info!(
            "{} {}: resolved from {:?} with confidence {:.2} after {} failed stages",
            entity,
            product_type,
            origin,
            confidence,
            failed_stages.len()
        );
        self.send_event(PipelineEvent::Resolved {
            entity: entity.to_string(),
            origin,
            confidence,
        });

        SourcedRecord {
            entity: entity.to_string(),
            product_type,
            record: harvest.record,
            origin,
            confidence,
            failed_stages,
        }
    }

    /// Progress is best effort: a full or closed channel drops the event instead of stalling
    /// the chain.
    fn send_event(&self, event: PipelineEvent) {
        if let Some(tx) = &self.progress {
            if let Err(e) = tx.try_send(event) {
                debug!("Progress event dropped: {}", e);
            }
        }
    }
}

fn not_configured(stage: AcquisitionStage, collaborator: &str) -> ComparatorError {
    ComparatorError::AcquisitionFailed {
        stage: stage.to_string(),
        details: format!("no {} configured", collaborator),
    }
}
