// src/poller.rs

use crate::analysis::{AnalysisJob, AnalysisService, Block, JobStatus};
use crate::error::PipelineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};

/// The service asks callers not to check job status more often than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A result stream longer than this is treated as a misbehaving service.
pub const MAX_RESULT_PAGES: usize = 10_000;

const UNBOUNDED_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// How often and for how long to wait on a job.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff: f64,
    pub timeout: Duration,
    pub max_poll_errors: u32,
}

impl PollPolicy {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(
        interval: Duration,
        max_interval: Duration,
        backoff: f64,
        timeout: Duration,
        max_poll_errors: u32,
    ) -> Self {
        if interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Poll interval below service minimum, clamping"
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        Self {
            interval,
            max_interval: max_interval.max(interval),
            backoff: if backoff.is_finite() { backoff.max(1.0) } else { 1.0 },
            timeout,
            max_poll_errors: max_poll_errors.max(1),
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff).min(self.max_interval)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(10),
            1.5,
            Duration::from_secs(300),
            3,
        )
    }
}

pub struct JobPoller {
    service: Arc<dyn AnalysisService>,
}

impl JobPoller {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }

    /// Wait until `job` reaches a terminal state and return its full block
    /// stream (all result pages). Every request is bounded by the job
    /// deadline. The last status check happens at the deadline itself; a job
    /// still running then is a `Timeout` and is not polled again.
    pub async fn await_completion(
        &self,
        job: &mut AnalysisJob,
        policy: &PollPolicy,
    ) -> Result<Vec<Block>, PipelineError> {
        let started = Instant::now();
        // Timeouts too large for the clock are effectively unbounded.
        let deadline = started
            .checked_add(policy.timeout)
            .unwrap_or_else(|| started + UNBOUNDED_WAIT);
        let mut interval = policy.interval;
        let mut errors = 0u32;

        let first_page = loop {
            let polled = timeout_at(deadline, self.service.poll(&job.handle, None))
                .await
                .map_err(|_| timed_out(job, started))?;
            match polled {
                Ok(response) => {
                    errors = 0;
                    advance(job, response.status);
                    match response.status {
                        JobStatus::Succeeded => break response,
                        JobStatus::Failed => {
                            let reason = response
                                .status_message
                                .unwrap_or_else(|| "service reported failure".to_string());
                            warn!(job = %job.handle, reason = %reason, "Analysis job failed");
                            return Err(PipelineError::JobFailure {
                                handle: job.handle.clone(),
                                reason,
                            });
                        }
                        JobStatus::Submitted | JobStatus::InProgress => {
                            debug!(job = %job.handle, wait_ms = interval.as_millis() as u64, "Job still running");
                        }
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(job = %job.handle, attempt = errors, error = %e, "Status poll failed");
                    if errors >= policy.max_poll_errors {
                        return Err(PipelineError::PollFailure {
                            handle: job.handle.clone(),
                            reason: format!("status polling failed {errors} times: {e}"),
                        });
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(job, started));
            }
            sleep(interval.min(deadline - now)).await;
            interval = policy.next_interval(interval);
        };

        let mut blocks = first_page.blocks;
        let mut next_token = first_page.next_token;
        let mut pages = 1;
        while let Some(token) = next_token {
            if pages >= MAX_RESULT_PAGES {
                return Err(PipelineError::MalformedResult(format!(
                    "job {} returned more than {MAX_RESULT_PAGES} result pages",
                    job.handle
                )));
            }
            let page = timeout_at(deadline, self.service.poll(&job.handle, Some(&token)))
                .await
                .map_err(|_| timed_out(job, started))?
                .map_err(|e| PipelineError::PollFailure {
                    handle: job.handle.clone(),
                    reason: format!("fetching result page {}: {e}", pages + 1),
                })?;
            blocks.extend(page.blocks);
            next_token = page.next_token;
            pages += 1;
        }

        info!(
            job = %job.handle,
            pages,
            blocks = blocks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis job succeeded"
        );
        Ok(blocks)
    }
}

fn timed_out(job: &AnalysisJob, started: Instant) -> PipelineError {
    let waited = started.elapsed();
    warn!(job = %job.handle, waited_ms = waited.as_millis() as u64, "Analysis job timed out");
    PipelineError::Timeout {
        handle: job.handle.clone(),
        waited,
    }
}

/// Move the job forward. Terminal states are never left and a running job
/// never goes back to `Submitted`.
fn advance(job: &mut AnalysisJob, observed: JobStatus) {
    if job.status.is_terminal() {
        return;
    }
    if observed == JobStatus::Submitted && job.status == JobStatus::InProgress {
        return;
    }
    job.status = observed;
}
