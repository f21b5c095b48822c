// In-memory stand-ins for the external collaborators.

use crate::analysis::{AnalysisService, Block, DocumentRef, JobHandle, JobStatus, PollResponse};
use crate::catalog::QueryCatalog;
use crate::error::BoxError;
use crate::transform::{RegionClassification, RegionClassifier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Outcome {
    Succeed(Vec<Vec<Block>>),
    Fail(String),
    Never,
    Unreachable,
    /// Status requests never answer.
    Hang,
    /// Finishes at once, but result page requests never answer.
    StallsPaging,
    /// Finishes at once and always has another result page.
    EndlessPages,
}

/// Scripted behaviour of one analysis job.
#[derive(Debug, Clone)]
pub struct FakeJob {
    polls_before_done: u32,
    outcome: Outcome,
    polled: u32,
}

impl FakeJob {
    pub fn succeeds_after(polls: u32, blocks: Vec<Block>) -> Self {
        Self {
            polls_before_done: polls,
            outcome: Outcome::Succeed(vec![blocks]),
            polled: 0,
        }
    }

    pub fn with_page(mut self, blocks: Vec<Block>) -> Self {
        if let Outcome::Succeed(pages) = &mut self.outcome {
            pages.push(blocks);
        }
        self
    }

    pub fn fails(message: &str) -> Self {
        Self::scripted(Outcome::Fail(message.to_string()))
    }

    pub fn never_finishes() -> Self {
        Self::scripted(Outcome::Never)
    }

    pub fn unreachable() -> Self {
        Self::scripted(Outcome::Unreachable)
    }

    pub fn hangs() -> Self {
        Self::scripted(Outcome::Hang)
    }

    pub fn stalls_paging() -> Self {
        Self::scripted(Outcome::StallsPaging)
    }

    pub fn endless_pages() -> Self {
        Self::scripted(Outcome::EndlessPages)
    }

    fn scripted(outcome: Outcome) -> Self {
        Self {
            polls_before_done: 0,
            outcome,
            polled: 0,
        }
    }
}

#[derive(Default)]
struct AnalysisState {
    jobs: HashMap<String, FakeJob>,
    scripts: HashMap<String, FakeJob>,
    rejected: HashMap<String, String>,
    submit_times: Vec<Instant>,
    poll_times: HashMap<String, Vec<Instant>>,
}

#[derive(Default)]
pub struct FakeAnalysis {
    state: Mutex<AnalysisState>,
}

impl FakeAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job directly under `handle`.
    pub fn set_job(&self, handle: &str, job: FakeJob) {
        self.state.lock().unwrap().jobs.insert(handle.to_string(), job);
    }

    /// Behaviour of the job created when `key` is submitted.
    pub fn script_document(&self, key: &str, job: FakeJob) {
        self.state.lock().unwrap().scripts.insert(key.to_string(), job);
    }

    pub fn reject_submission(&self, key: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(key.to_string(), reason.to_string());
    }

    pub fn submit_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().submit_times.clone()
    }

    pub fn poll_times(&self, handle: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .poll_times
            .get(handle)
            .cloned()
            .unwrap_or_default()
    }

    pub fn poll_count(&self, handle: &str) -> usize {
        self.poll_times(handle).len()
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn submit(
        &self,
        document: &DocumentRef,
        _catalog: &QueryCatalog,
    ) -> Result<JobHandle, BoxError> {
        let mut state = self.state.lock().unwrap();
        state.submit_times.push(Instant::now());
        if let Some(reason) = state.rejected.get(&document.key) {
            return Err(reason.clone().into());
        }
        let handle = format!("job-{}", document.key);
        let job = state
            .scripts
            .get(&document.key)
            .cloned()
            .unwrap_or_else(|| FakeJob::succeeds_after(0, Vec::new()));
        state.jobs.insert(handle.clone(), job);
        Ok(JobHandle::new(handle))
    }

    async fn poll(
        &self,
        handle: &JobHandle,
        next_token: Option<&str>,
    ) -> Result<PollResponse, BoxError> {
        let hangs = {
            let mut state = self.state.lock().unwrap();
            state
                .poll_times
                .entry(handle.to_string())
                .or_default()
                .push(Instant::now());
            state.jobs.get(handle.as_str()).is_some_and(|job| match job.outcome {
                Outcome::Hang => true,
                Outcome::StallsPaging => next_token.is_some(),
                _ => false,
            })
        };
        if hangs {
            return futures::future::pending().await;
        }

        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(handle.as_str())
            .ok_or_else(|| format!("unknown job {handle}"))?;

        let in_progress = PollResponse {
            status: JobStatus::InProgress,
            blocks: Vec::new(),
            next_token: None,
            status_message: None,
        };

        if let Some(token) = next_token {
            let index: usize = token.parse()?;
            let (blocks, more) = match &job.outcome {
                Outcome::Succeed(pages) => (pages[index].clone(), index + 1 < pages.len()),
                Outcome::EndlessPages => (Vec::new(), true),
                _ => return Err("page requested for unfinished job".into()),
            };
            return Ok(PollResponse {
                status: JobStatus::Succeeded,
                blocks,
                next_token: more.then(|| (index + 1).to_string()),
                status_message: None,
            });
        }

        if matches!(job.outcome, Outcome::Unreachable) {
            return Err("connection refused".into());
        }
        job.polled += 1;
        if job.polled <= job.polls_before_done {
            return Ok(in_progress);
        }
        match &job.outcome {
            Outcome::Succeed(pages) => Ok(PollResponse {
                status: JobStatus::Succeeded,
                blocks: pages[0].clone(),
                next_token: (pages.len() > 1).then(|| "1".to_string()),
                status_message: None,
            }),
            Outcome::Fail(message) => Ok(PollResponse {
                status: JobStatus::Failed,
                blocks: Vec::new(),
                next_token: None,
                status_message: Some(message.clone()),
            }),
            Outcome::Never | Outcome::Hang => Ok(in_progress),
            Outcome::Unreachable => Err("connection refused".into()),
            Outcome::StallsPaging | Outcome::EndlessPages => Ok(PollResponse {
                status: JobStatus::Succeeded,
                blocks: Vec::new(),
                next_token: Some("1".to_string()),
                status_message: None,
            }),
        }
    }
}

/// Region lookup keyed by postal code.
#[derive(Default)]
pub struct FakeRegions {
    regions: HashMap<String, RegionClassification>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, postal_code: &str, region: &str, name: &str) -> Self {
        self.regions.insert(
            postal_code.to_string(),
            RegionClassification {
                region: region.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegionClassifier for FakeRegions {
    async fn classify(
        &self,
        country: &str,
        postal_code: &str,
    ) -> Result<RegionClassification, BoxError> {
        self.calls
            .lock()
            .unwrap()
            .push((country.to_string(), postal_code.to_string()));
        self.regions
            .get(postal_code)
            .cloned()
            .ok_or_else(|| format!("no grid region for {country} {postal_code}").into())
    }
}

/// The block stream a well-behaved service returns for a complete bill,
/// with page and line blocks interleaved.
pub fn bill_blocks(supplier: &str, meter: &str, date: &str, address: &str) -> Vec<Block> {
    vec![
        Block::other("PAGE"),
        Block::query("Customer_Name"),
        Block::answer("Jordan Smith"),
        Block::other("LINE"),
        Block::query("Customer_Address"),
        Block::answer(address),
        Block::query("ES_ID"),
        Block::answer(meter),
        Block::query("kWh_Usage"),
        Block::answer("1,204"),
        Block::other("WORD"),
        Block::query("Bill_Date"),
        Block::answer(date),
        Block::query("Utility_Provider_Name"),
        Block::answer(supplier),
    ]
}
