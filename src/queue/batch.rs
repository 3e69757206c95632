use super::Job;
use crate::core::ActionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type BatchCallback = Arc<dyn Fn(&BatchSummary) + Send + Sync>;
pub type BatchCatchCallback = Arc<dyn Fn(&BatchSummary, &ActionError) + Send + Sync>;

/// Progress snapshot of a dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub id: Uuid,
    pub name: String,
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchSummary {
    pub fn processed_jobs(&self) -> usize {
        self.total_jobs - self.pending_jobs
    }

    /// Completion percentage (0-100).
    pub fn progress(&self) -> u8 {
        if self.total_jobs == 0 {
            return 100;
        }
        u8::try_from(self.processed_jobs() * 100 / self.total_jobs).unwrap_or(100)
    }

    pub fn finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_jobs > 0
    }
}

/// A batch being assembled before dispatch.
///
/// Jobs added here run as one queue-native unit: `then` fires once every
/// job succeeded, `catch` on the first terminal failure, `finally` once
/// no job is left pending. Unless failures are allowed, the first
/// failure cancels the jobs that have not started yet.
pub struct PendingBatch {
    name: String,
    connection: Option<String>,
    queue: Option<String>,
    pub(crate) allow_failures: bool,
    pub(crate) jobs: Vec<Arc<dyn Job>>,
    pub(crate) then_callbacks: Vec<BatchCallback>,
    pub(crate) catch_callbacks: Vec<BatchCatchCallback>,
    pub(crate) finally_callbacks: Vec<BatchCallback>,
}

impl Default for PendingBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingBatch {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            connection: None,
            queue: None,
            allow_failures: false,
            jobs: Vec::new(),
            then_callbacks: Vec::new(),
            catch_callbacks: Vec::new(),
            finally_callbacks: Vec::new(),
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn on_connection(&mut self, connection: impl Into<String>) -> &mut Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn on_queue(&mut self, queue: impl Into<String>) -> &mut Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn allow_failures(&mut self, allow: bool) -> &mut Self {
        self.allow_failures = allow;
        self
    }

    pub fn add(&mut self, job: Arc<dyn Job>) -> &mut Self {
        self.jobs.push(job);
        self
    }

    pub fn then<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&BatchSummary) + Send + Sync + 'static,
    {
        self.then_callbacks.push(Arc::new(callback));
        self
    }

    pub fn catch<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&BatchSummary, &ActionError) + Send + Sync + 'static,
    {
        self.catch_callbacks.push(Arc::new(callback));
        self
    }

    pub fn finally<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&BatchSummary) + Send + Sync + 'static,
    {
        self.finally_callbacks.push(Arc::new(callback));
        self
    }

    pub fn batch_name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn allows_failures(&self) -> bool {
        self.allow_failures
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

impl fmt::Debug for PendingBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingBatch")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("queue", &self.queue)
            .field("allow_failures", &self.allow_failures)
            .field("jobs", &self.jobs.len())
            .finish()
    }
}
