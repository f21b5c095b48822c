// src/submitter.rs

use crate::analysis::{AnalysisJob, AnalysisService, DocumentRef, JobStatus};
use crate::catalog::QueryCatalog;
use crate::error::PipelineError;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

/// Batch-wide throttle: successive `acquire` calls return at least
/// `interval` apart, however many tasks are waiting.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn acquire(&self) {
        // Held across the sleep so waiters are released one at a time.
        let mut next = self.next_slot.lock().await;
        if let Some(at) = *next {
            if at > Instant::now() {
                sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.interval);
    }
}

/// Outcome of submitting one document: a running job or the reason it
/// never started.
#[derive(Debug)]
pub struct SubmissionSlot {
    pub document: DocumentRef,
    pub job: Result<AnalysisJob, PipelineError>,
}

impl SubmissionSlot {
    pub fn is_running(&self) -> bool {
        self.job.is_ok()
    }
}

pub struct AnalysisJobSubmitter {
    service: Arc<dyn AnalysisService>,
    catalog: Arc<QueryCatalog>,
    limiter: Arc<RateLimiter>,
}

impl AnalysisJobSubmitter {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        catalog: Arc<QueryCatalog>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            service,
            catalog,
            limiter,
        }
    }

    /// Submit a single document, waiting for the shared throttle first.
    pub async fn submit_one(&self, document: DocumentRef) -> SubmissionSlot {
        self.limiter.acquire().await;

        let job = match self.service.submit(&document, &self.catalog).await {
            Ok(handle) => {
                info!(document = %document, job = %handle, "Analysis job submitted");
                Ok(AnalysisJob {
                    handle,
                    source_document: document.clone(),
                    status: JobStatus::Submitted,
                })
            }
            Err(e) => {
                warn!(document = %document, error = %e, "Analysis submission failed");
                Err(PipelineError::SubmissionFailure {
                    document: document.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        SubmissionSlot { document, job }
    }

    /// Submit every document. Slots come back in the same order as `documents`;
    /// a failed submission occupies its slot instead of aborting the batch.
    pub async fn submit_all(&self, documents: Vec<DocumentRef>) -> Vec<SubmissionSlot> {
        let total = documents.len();
        let slots = join_all(documents.into_iter().map(|doc| self.submit_one(doc))).await;

        let running = slots.iter().filter(|s| s.is_running()).count();
        info!(total, running, failed = total - running, "Batch submission complete");
        slots
    }
}
