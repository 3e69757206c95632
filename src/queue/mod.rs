// ============================================================================
// Queue Module
// ============================================================================
//
// Background execution capability used by queued actions:
// - `Job`: unit of work with retry/timeout knobs and a terminal `failed` hook
// - `JobContext`: per-attempt handle (release for retry, explicit fail)
// - `QueueDispatcher`: push single jobs or dispatch a batch
// - `InMemoryQueue`: in-process driver with a deterministic drain and a
//   background worker
//
// ============================================================================

pub mod batch;
pub mod memory;

pub use batch::{BatchSummary, PendingBatch};
pub use memory::{FailedJob, InMemoryQueue, JobOutcome, QueueWorker};

use crate::core::{ActionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Shared handle injected into the dispatcher.
pub type SharedQueue = Arc<dyn QueueDispatcher>;

/// Optional retry knobs. Unset values fall back to queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the job is failed.
    pub tries: Option<u32>,
    /// Wall-clock limit for one attempt.
    pub timeout: Option<Duration>,
    /// Delay before a failed attempt is retried.
    pub backoff: Option<Duration>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = Some(tries.max(1));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

#[derive(Debug, Default)]
struct JobAttemptState {
    released: Option<Duration>,
    failed: Option<String>,
}

/// Handle to the attempt currently executing.
///
/// Cloned into whatever code runs inside the job so it can release the
/// job back onto the queue or fail it outright.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Uuid,
    attempts: u32,
    batch_id: Option<Uuid>,
    state: Arc<Mutex<JobAttemptState>>,
}

impl JobContext {
    pub fn new(job_id: Uuid, attempts: u32, batch_id: Option<Uuid>) -> Self {
        Self {
            job_id,
            attempts,
            batch_id,
            state: Arc::new(Mutex::new(JobAttemptState::default())),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// 1-based attempt number.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Id of the queue batch this job belongs to, if any.
    pub fn batch_id(&self) -> Option<Uuid> {
        self.batch_id
    }

    /// Put the job back on the queue after `delay`.
    pub fn release(&self, delay: Duration) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .released = Some(delay);
    }

    /// Fail the job now, skipping any remaining attempts.
    pub fn fail(&self, reason: impl Into<String>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed = Some(reason.into());
    }

    pub fn is_released(&self) -> bool {
        self.released_delay().is_some()
    }

    pub fn has_failed(&self) -> bool {
        self.failure().is_some()
    }

    pub(crate) fn released_delay(&self) -> Option<Duration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .released
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed
            .clone()
    }
}

/// A unit of background work.
#[async_trait]
pub trait Job: Send + Sync {
    fn display_name(&self) -> String;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    async fn handle(&self, ctx: &JobContext) -> Result<()>;

    /// Called once when the job will not be attempted again.
    async fn failed(&self, error: &ActionError);
}

/// Queue capability: push jobs and dispatch batches.
#[async_trait]
pub trait QueueDispatcher: Send + Sync {
    /// Enqueue one job, returning its id.
    async fn push(&self, job: Arc<dyn Job>, connection: &str, queue: &str) -> Result<Uuid>;

    /// Enqueue every job of the batch under one batch id.
    async fn dispatch_batch(&self, batch: PendingBatch) -> Result<BatchSummary>;
}
