// src/pipeline.rs

use crate::analysis::{AnalysisService, DocumentRef};
use crate::catalog::QueryCatalog;
use crate::config::Config;
use crate::decoder::ResultDecoder;
use crate::error::{NormalizationWarning, PipelineError};
use crate::normalize::FieldNormalizer;
use crate::poller::{JobPoller, PollPolicy};
use crate::storage::{ObjectStore, record_key};
use crate::submitter::{AnalysisJobSubmitter, RateLimiter};
use crate::transform::{ActivityRecord, RecordTransformer, RegionClassifier};
use futures::StreamExt;
use futures::stream;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// A record produced for one bill, with any non-fatal normalization notes.
#[derive(Debug)]
pub struct BillOutput {
    pub record: ActivityRecord,
    pub warnings: Vec<NormalizationWarning>,
}

#[derive(Debug)]
pub struct FailedBill {
    pub document: DocumentRef,
    pub error: PipelineError,
}

/// Partitioned result of a run, handed to persistence.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ActivityRecord>,
    pub failed: Vec<FailedBill>,
    pub warnings: Vec<(DocumentRef, NormalizationWarning)>,
    /// Bills skipped because a document listed before them in the same run
    /// produced the same event id. Each entry carries that event id.
    pub duplicates: Vec<(DocumentRef, String)>,
}

impl BatchOutcome {
    /// Documents worth submitting again (timeouts, rejected submissions).
    pub fn retryable(&self) -> impl Iterator<Item = &DocumentRef> {
        self.failed
            .iter()
            .filter(|f| f.error.is_retryable())
            .map(|f| &f.document)
    }
}

#[derive(Debug, Default)]
pub struct PersistSummary {
    pub written: usize,
    pub failed: Vec<(String, String)>,
}

pub struct BatchPipeline {
    catalog: Arc<QueryCatalog>,
    submitter: AnalysisJobSubmitter,
    poller: JobPoller,
    transformer: RecordTransformer,
    store: Arc<dyn ObjectStore>,
    policy: PollPolicy,
    max_concurrency: usize,
    output_prefix: String,
}

impl BatchPipeline {
    pub fn new(
        analysis: Arc<dyn AnalysisService>,
        classifier: Arc<dyn RegionClassifier>,
        store: Arc<dyn ObjectStore>,
        config: &Config,
    ) -> Self {
        let catalog = Arc::new(QueryCatalog::utility_bill());
        let limiter = Arc::new(RateLimiter::new(config.pipeline.submit_interval()));
        info!(
            queries = catalog.len(),
            submit_interval_ms = limiter.interval().as_millis() as u64,
            max_concurrency = config.pipeline.max_concurrency,
            "Pipeline configured"
        );

        Self {
            submitter: AnalysisJobSubmitter::new(analysis.clone(), catalog.clone(), limiter),
            poller: JobPoller::new(analysis),
            transformer: RecordTransformer::new(
                classifier,
                config.enrichment.country.clone(),
                config.pipeline.category,
            ),
            catalog,
            store,
            policy: config.pipeline.poll_policy(),
            max_concurrency: config.pipeline.max_concurrency.max(1),
            output_prefix: config.storage.output_prefix.clone(),
        }
    }

    /// Run one bill end to end: submit, wait, decode, normalize, transform.
    pub async fn run_document(&self, document: &DocumentRef) -> Result<BillOutput, PipelineError> {
        let span = info_span!("bill", document = %document);
        self.process(document).instrument(span).await
    }

    async fn process(&self, document: &DocumentRef) -> Result<BillOutput, PipelineError> {
        let slot = self.submitter.submit_one(document.clone()).await;
        let mut job = slot.job?;

        let blocks = self.poller.await_completion(&mut job, &self.policy).await?;
        let fields = ResultDecoder::new(&self.catalog).decode(&blocks)?;
        drop(blocks);
        info!(
            job = %job.handle,
            fields = fields.len(),
            aliases = ?fields.iter().map(|(alias, _)| alias.as_str()).collect::<Vec<_>>(),
            "Decoded analysis result"
        );

        let bill = FieldNormalizer::normalize(fields)?;
        let record = self.transformer.transform(&bill, document).await?;
        info!(event_id = %record.activity_event_id, activity = %record.activity, "Record ready");

        Ok(BillOutput {
            record,
            warnings: bill.warnings,
        })
    }

    /// Process every document under `prefix`. Failing to list is fatal for
    /// the whole run; anything after that is isolated per bill.
    pub async fn run_batch(&self, prefix: &str) -> Result<BatchOutcome, PipelineError> {
        let documents = self
            .store
            .list(prefix)
            .await
            .map_err(|e| PipelineError::Storage(format!("listing {prefix:?}: {e}")))?;
        info!(prefix = %prefix, count = documents.len(), "Candidate bills");

        Ok(self.run_documents(documents).await)
    }

    /// Fan out one chain per document, at most `max_concurrency` in flight.
    /// Results are partitioned in listing order, so when two bills share an
    /// event id the one listed first is kept.
    pub async fn run_documents(&self, documents: Vec<DocumentRef>) -> BatchOutcome {
        let mut results: Vec<_> = stream::iter(documents.into_iter().enumerate())
            .map(|(index, doc)| async move {
                let result = self.run_document(&doc).await;
                (index, doc, result)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut outcome = BatchOutcome::default();
        let mut seen = HashSet::new();
        for (_, document, result) in results {
            match result {
                Ok(output) => {
                    for warning in output.warnings {
                        outcome.warnings.push((document.clone(), warning));
                    }
                    let event_id = &output.record.activity_event_id;
                    if !seen.insert(event_id.clone()) {
                        warn!(document = %document, event_id = %event_id, "Duplicate bill in batch");
                        outcome.duplicates.push((document, event_id.clone()));
                        continue;
                    }
                    outcome.succeeded.push(output.record);
                }
                Err(error) => {
                    error!(document = %document, kind = error.kind(), error = %error, "Bill failed");
                    outcome.failed.push(FailedBill { document, error });
                }
            }
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            warnings = outcome.warnings.len(),
            duplicates = outcome.duplicates.len(),
            "Batch complete"
        );
        outcome
    }

    /// Write every produced record to the store. One failed write does not
    /// stop the others.
    pub async fn persist(&self, records: &[ActivityRecord]) -> PersistSummary {
        let mut summary = PersistSummary::default();
        for record in records {
            let key = record_key(&self.output_prefix, record);
            let written = match serde_json::to_vec_pretty(record) {
                Ok(bytes) => self
                    .store
                    .write(&key, &bytes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match written {
                Ok(()) => summary.written += 1,
                Err(e) => {
                    error!(key = %key, error = %e, "Failed to persist record");
                    summary.failed.push((key, e));
                }
            }
        }
        info!(written = summary.written, failed = summary.failed.len(), "Records persisted");
        summary
    }
}
