use super::batch::{BatchCallback, BatchCatchCallback, BatchSummary, PendingBatch};
use super::{Job, JobContext, QueueDispatcher};
use crate::config::ActionConfig;
use crate::core::{ActionError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration as TokioDuration, Instant, sleep, timeout};
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

const IDLE_POLL_MS: u64 = 50;

struct QueuedEnvelope {
    id: Uuid,
    job: Arc<dyn Job>,
    connection: String,
    queue: String,
    attempts: u32,
    available_at: Instant,
    batch_id: Option<Uuid>,
}

struct BatchRecord {
    summary: BatchSummary,
    allow_failures: bool,
    then_callbacks: Vec<BatchCallback>,
    catch_callbacks: Vec<BatchCatchCallback>,
    finally_callbacks: Vec<BatchCallback>,
}

/// A job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub id: Uuid,
    pub connection: String,
    pub queue: String,
    pub job: String,
    pub exception: String,
    pub failed_at: DateTime<Utc>,
}

/// What happened to a job on one pass through the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Released { delay: Duration },
    Failed { error: String },
    /// Belonged to a cancelled batch and never ran.
    Skipped,
}

/// In-process queue driver.
///
/// Jobs are held in FIFO order with per-job availability times (for
/// released/backed-off jobs). `run_until_idle` drains deterministically;
/// `spawn_worker` runs the same loop on background tasks.
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueuedEnvelope>>,
    batches: Mutex<HashMap<Uuid, BatchRecord>>,
    failed: Mutex<Vec<FailedJob>>,
    notify: Notify,
    default_tries: u32,
    default_backoff: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_defaults(1, Duration::ZERO)
    }

    pub fn from_config(config: &ActionConfig) -> Self {
        Self::with_defaults(config.default_tries, config.default_backoff)
    }

    pub fn with_defaults(default_tries: u32, default_backoff: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            batches: Mutex::new(HashMap::new()),
            failed: Mutex::new(Vec::new()),
            notify: Notify::new(),
            default_tries: default_tries.max(1),
            default_backoff,
        }
    }

    /// Jobs waiting on the named queue (delayed ones included).
    pub async fn size(&self, queue: &str) -> usize {
        self.pending
            .lock()
            .await
            .iter()
            .filter(|envelope| envelope.queue == queue)
            .count()
    }

    pub async fn total_pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Display names of waiting jobs in queue order.
    pub async fn pending_jobs(&self) -> Vec<String> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|envelope| envelope.job.display_name())
            .collect()
    }

    pub async fn failed_jobs(&self) -> Vec<FailedJob> {
        self.failed.lock().await.clone()
    }

    pub async fn batch(&self, batch_id: Uuid) -> Option<BatchSummary> {
        self.batches
            .lock()
            .await
            .get(&batch_id)
            .map(|record| record.summary.clone())
    }

    /// Cancels a batch; its jobs that have not started will be skipped.
    pub async fn cancel_batch(&self, batch_id: Uuid) -> Result<()> {
        let mut batches = self.batches.lock().await;
        let record = batches
            .get_mut(&batch_id)
            .ok_or_else(|| ActionError::NotFound(format!("batch {batch_id}")))?;
        record.summary.cancelled = true;
        Ok(())
    }

    async fn enqueue(&self, envelope: QueuedEnvelope) {
        self.pending.lock().await.push_back(envelope);
        self.notify.notify_one();
    }

    async fn take_available(&self) -> Option<QueuedEnvelope> {
        let mut pending = self.pending.lock().await;
        let now = Instant::now();
        let index = pending
            .iter()
            .position(|envelope| envelope.available_at <= now)?;
        pending.remove(index)
    }

    async fn next_available_at(&self) -> Option<Instant> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|envelope| envelope.available_at)
            .min()
    }

    /// Runs the next available job, if any.
    pub async fn work_next(&self) -> Result<Option<JobOutcome>> {
        let Some(envelope) = self.take_available().await else {
            return Ok(None);
        };
        Ok(Some(self.process(envelope).await))
    }

    /// Processes jobs until nothing is left, waiting out release delays.
    ///
    /// Returns how many job passes were made.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut passes = 0usize;
        loop {
            if self.work_next().await?.is_some() {
                passes += 1;
                continue;
            }
            match self.next_available_at().await {
                Some(at) => tokio::time::sleep_until(at).await,
                None => return Ok(passes),
            }
        }
    }

    /// Starts `concurrency` background tasks pulling from this queue.
    pub fn spawn_worker(self: &Arc<Self>, concurrency: usize) -> QueueWorker {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(concurrency.max(1));

        for worker_index in 0..concurrency.max(1) {
            let queue = Arc::clone(self);
            let mut stop_rx = stop_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    match queue.work_next().await {
                        Ok(Some(_)) => continue,
                        Ok(None) => {}
                        Err(err) => {
                            event!(Level::ERROR, worker = worker_index, error = %err, "queue worker pass failed");
                        }
                    }
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = queue.notify.notified() => {}
                        _ = sleep(TokioDuration::from_millis(IDLE_POLL_MS)) => {}
                    }
                }
            }));
        }

        QueueWorker {
            stop_tx: Some(stop_tx),
            handles,
        }
    }

    async fn process(&self, envelope: QueuedEnvelope) -> JobOutcome {
        let job_name = envelope.job.display_name();
        let attempts = envelope.attempts + 1;
        let span = info_span!(
            "queue.job",
            job = %job_name,
            job_id = %envelope.id,
            queue = %envelope.queue,
            attempt = attempts
        );

        async {
            if let Some(batch_id) = envelope.batch_id {
                if self.batch_cancelled(batch_id).await {
                    let batch_name = self
                        .batch(batch_id)
                        .await
                        .map(|summary| summary.name)
                        .unwrap_or_default();
                    envelope
                        .job
                        .failed(&ActionError::BatchCancelled(batch_name))
                        .await;
                    self.settle_batch_job(batch_id, None).await;
                    event!(Level::INFO, "job skipped, batch cancelled");
                    return JobOutcome::Skipped;
                }
            }

            let policy = envelope.job.retry_policy();
            let tries = policy.tries.unwrap_or(self.default_tries).max(1);
            let backoff = policy.backoff.unwrap_or(self.default_backoff);
            let ctx = JobContext::new(envelope.id, attempts, envelope.batch_id);

            let result = match policy.timeout {
                Some(limit) => match timeout(limit, envelope.job.handle(&ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(ActionError::Timeout(limit)),
                },
                None => envelope.job.handle(&ctx).await,
            };

            if let Some(reason) = ctx.failure() {
                return self.fail(envelope, ActionError::Handler(reason)).await;
            }

            match result {
                Ok(()) => {
                    if let Some(delay) = ctx.released_delay() {
                        if attempts >= tries {
                            let err = ActionError::MaxAttemptsExceeded {
                                job: job_name.clone(),
                                attempts,
                            };
                            return self.fail(envelope, err).await;
                        }
                        self.requeue(envelope, attempts, delay).await;
                        return JobOutcome::Released { delay };
                    }
                    if let Some(batch_id) = envelope.batch_id {
                        self.settle_batch_job(batch_id, None).await;
                    }
                    event!(Level::DEBUG, "job completed");
                    JobOutcome::Completed
                }
                Err(err) if err.is_retryable() && attempts < tries => {
                    event!(Level::WARN, error = %err, "job attempt failed, releasing");
                    self.requeue(envelope, attempts, backoff).await;
                    JobOutcome::Released { delay: backoff }
                }
                Err(err) => self.fail(envelope, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn requeue(&self, mut envelope: QueuedEnvelope, attempts: u32, delay: Duration) {
        envelope.attempts = attempts;
        envelope.available_at = Instant::now() + delay;
        self.enqueue(envelope).await;
    }

    async fn fail(&self, envelope: QueuedEnvelope, err: ActionError) -> JobOutcome {
        event!(Level::ERROR, error = %err, "job failed");
        envelope.job.failed(&err).await;

        self.failed.lock().await.push(FailedJob {
            id: envelope.id,
            connection: envelope.connection.clone(),
            queue: envelope.queue.clone(),
            job: envelope.job.display_name(),
            exception: err.to_string(),
            failed_at: Utc::now(),
        });

        let error = err.to_string();
        if let Some(batch_id) = envelope.batch_id {
            self.settle_batch_job(batch_id, Some(err)).await;
        }
        JobOutcome::Failed { error }
    }

    async fn batch_cancelled(&self, batch_id: Uuid) -> bool {
        self.batches
            .lock()
            .await
            .get(&batch_id)
            .map(|record| record.summary.cancelled)
            .unwrap_or(false)
    }

    /// Books one finished job against its batch and fires callbacks
    /// outside the lock.
    async fn settle_batch_job(&self, batch_id: Uuid, failure: Option<ActionError>) {
        let mut catch = Vec::new();
        let mut then = Vec::new();
        let mut finally = Vec::new();
        let mut just_finished = false;

        let summary = {
            let mut batches = self.batches.lock().await;
            let Some(record) = batches.get_mut(&batch_id) else {
                return;
            };

            record.summary.pending_jobs = record.summary.pending_jobs.saturating_sub(1);
            if failure.is_some() {
                record.summary.failed_jobs += 1;
                if record.summary.failed_jobs == 1 {
                    catch = record.catch_callbacks.clone();
                }
                if !record.allow_failures {
                    record.summary.cancelled = true;
                }
            }

            if record.summary.pending_jobs == 0 && record.summary.finished_at.is_none() {
                record.summary.finished_at = Some(Utc::now());
                just_finished = true;
                if record.summary.failed_jobs == 0 && !record.summary.cancelled {
                    then = record.then_callbacks.clone();
                }
                finally = record.finally_callbacks.clone();
            }

            record.summary.clone()
        };

        if let Some(err) = &failure {
            for callback in &catch {
                callback(&summary, err);
            }
        }
        for callback in &then {
            callback(&summary);
        }
        for callback in &finally {
            callback(&summary);
        }

        if just_finished {
            event!(Level::INFO, batch_id = %summary.id, failed = summary.failed_jobs, "batch finished");
        }
    }
}

#[async_trait]
impl QueueDispatcher for InMemoryQueue {
    async fn push(&self, job: Arc<dyn Job>, connection: &str, queue: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        event!(Level::DEBUG, job = %job.display_name(), job_id = %id, queue = %queue, "job pushed");
        self.enqueue(QueuedEnvelope {
            id,
            job,
            connection: connection.to_string(),
            queue: queue.to_string(),
            attempts: 0,
            available_at: Instant::now(),
            batch_id: None,
        })
        .await;
        Ok(id)
    }

    async fn dispatch_batch(&self, batch: PendingBatch) -> Result<BatchSummary> {
        let batch_id = Uuid::new_v4();
        let connection = batch.connection().unwrap_or("memory").to_string();
        let queue = batch.queue().unwrap_or("default").to_string();
        let now = Utc::now();
        let total_jobs = batch.jobs.len();

        let summary = BatchSummary {
            id: batch_id,
            name: batch.batch_name().to_string(),
            total_jobs,
            pending_jobs: total_jobs,
            failed_jobs: 0,
            cancelled: false,
            created_at: now,
            finished_at: (total_jobs == 0).then_some(now),
        };

        let PendingBatch {
            jobs,
            allow_failures,
            then_callbacks,
            catch_callbacks,
            finally_callbacks,
            ..
        } = batch;

        // An empty batch completes immediately.
        if total_jobs == 0 {
            for callback in then_callbacks.iter().chain(finally_callbacks.iter()) {
                callback(&summary);
            }
        }

        self.batches.lock().await.insert(
            batch_id,
            BatchRecord {
                summary: summary.clone(),
                allow_failures,
                then_callbacks,
                catch_callbacks,
                finally_callbacks,
            },
        );

        for job in jobs {
            self.enqueue(QueuedEnvelope {
                id: Uuid::new_v4(),
                job,
                connection: connection.clone(),
                queue: queue.clone(),
                attempts: 0,
                available_at: Instant::now(),
                batch_id: Some(batch_id),
            })
            .await;
        }

        event!(Level::INFO, batch_id = %batch_id, jobs = total_jobs, "batch dispatched");
        Ok(summary)
    }
}

/// Handle to background worker tasks. Dropping it stops them.
pub struct QueueWorker {
    stop_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl QueueWorker {
    /// Signals every task to stop and waits for them to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        for handle in std::mem::take(&mut self.handles) {
            handle
                .await
                .map_err(|err| ActionError::Queue(format!("queue worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        for handle in &self.handles {
            handle.abort();
        }
    }
}
