use crate::error::PipelineError;
use crate::poller::PollPolicy;
use crate::transform::Category;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisSection {
    /// Full endpoint URL. When unset, the regional public endpoint is used.
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Upper bound on a single start or status request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_results() -> u32 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            max_results: default_max_results(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AnalysisSection {
    pub fn resolved_endpoint(&self) -> String {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://textract.{}.amazonaws.com", self.region),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_input_prefix")]
    pub input_prefix: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

fn default_db_path() -> String {
    "billstore/objects.db".to_string()
}

fn default_bucket() -> String {
    "utility-bills".to_string()
}

fn default_input_prefix() -> String {
    "incoming/".to_string()
}

fn default_output_prefix() -> String {
    "activity-records/".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bucket: default_bucket(),
            input_prefix: default_input_prefix(),
            output_prefix: default_output_prefix(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrichmentSection {
    #[serde(default = "default_enrichment_url")]
    pub base_url: String,
    /// Country passed to the region lookup; bills carry no country field.
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,
}

fn default_enrichment_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_enrichment_timeout() -> u64 {
    10
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            base_url: default_enrichment_url(),
            country: default_country(),
            timeout_secs: default_enrichment_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_submit_interval_ms")]
    pub submit_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff: f64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub category: Category,
}

fn default_submit_interval_ms() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_backoff() -> f64 {
    1.5
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_max_poll_errors() -> u32 {
    3
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            submit_interval_ms: default_submit_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            poll_backoff: default_poll_backoff(),
            job_timeout_secs: default_job_timeout_secs(),
            max_poll_errors: default_max_poll_errors(),
            max_concurrency: default_max_concurrency(),
            category: Category::default(),
        }
    }
}

impl PipelineSection {
    pub fn submit_interval(&self) -> Duration {
        Duration::from_millis(self.submit_interval_ms)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.max_poll_interval_ms),
            self.poll_backoff,
            Duration::from_secs(self.job_timeout_secs),
            self.max_poll_errors,
        )
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let p = &self.pipeline;
        if p.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "pipeline.max_concurrency must be at least 1".into(),
            ));
        }
        if p.poll_backoff.is_nan() || p.poll_backoff < 1.0 {
            return Err(PipelineError::Config(format!(
                "pipeline.poll_backoff must be >= 1.0, got {}",
                p.poll_backoff
            )));
        }
        if Duration::from_secs(p.job_timeout_secs) < Duration::from_millis(p.poll_interval_ms) {
            return Err(PipelineError::Config(
                "pipeline.job_timeout_secs is shorter than one poll interval".into(),
            ));
        }
        if self.analysis.request_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "analysis.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.enrichment.country.trim().is_empty() {
            return Err(PipelineError::Config("enrichment.country is empty".into()));
        }
        Ok(())
    }
}
