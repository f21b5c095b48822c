use crate::analysis::JobHandle;
use crate::catalog::FieldAlias;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by the external collaborators (analysis, storage, enrichment).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can stop a single bill from producing a record, plus the
/// few batch-fatal conditions.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("submission failed for {document}: {reason}")]
    SubmissionFailure { document: String, reason: String },

    #[error("job {handle} did not finish within {waited:?}")]
    Timeout { handle: JobHandle, waited: Duration },

    /// The service could not be reached about a job; its real state is unknown.
    #[error("lost contact with job {handle}: {reason}")]
    PollFailure { handle: JobHandle, reason: String },

    #[error("job {handle} failed: {reason}")]
    JobFailure { handle: JobHandle, reason: String },

    #[error("malformed analysis result: {0}")]
    MalformedResult(String),

    #[error("could not extract {field}: {reason}")]
    FieldExtractionFailure { field: FieldAlias, reason: String },

    #[error("region enrichment failed: {0}")]
    EnrichmentFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether re-running the same document may succeed. A job the service
    /// reported as failed is never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout { .. }
                | PipelineError::PollFailure { .. }
                | PipelineError::SubmissionFailure { .. }
        )
    }

    /// Short machine-friendly label, used in logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SubmissionFailure { .. } => "submission_failure",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::PollFailure { .. } => "poll_failure",
            PipelineError::JobFailure { .. } => "job_failure",
            PipelineError::MalformedResult(_) => "malformed_result",
            PipelineError::FieldExtractionFailure { .. } => "field_extraction_failure",
            PipelineError::EnrichmentFailure(_) => "enrichment_failure",
            PipelineError::Storage(_) => "storage",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Non-fatal problem found while normalizing a field. The raw text is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationWarning {
    pub field: FieldAlias,
    pub raw: String,
    pub message: String,
}

impl std::fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (kept {:?})", self.field, self.message, self.raw)
    }
}
