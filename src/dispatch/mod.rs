// ============================================================================
// Action Dispatch
// ============================================================================
//
// Turns "run action A with fields F against targets T" into ledger-audited
// executions:
//
//   standalone   -> one handler call with no targets (inline or queued)
//   request      -> page targets in chunks, filter each chunk for the actor,
//                   run each non-empty chunk in its own unit of work
//   using        -> the action's own dispatch callback, no chunking
//
// Synchronous chunks write `running` ledger rows, call the handler and
// mark the rows `finished`. A handler error propagates and leaves the rows
// `running`. Queued chunks write `waiting` rows and hand a
// `CallQueuedAction` job to the queue (or to the pending batch).
//
// ============================================================================

pub mod queued;
pub mod response;
pub mod transaction;

pub use queued::CallQueuedAction;
pub use response::Response;
pub use transaction::Transaction;

use crate::action::{
    Action, ActionFields, ActionInvocation, ActionMethod, ActionModelCollection, ActionRequest,
    DispatchUsing,
};
use crate::core::{Model, Result};
use crate::ledger::ActionEventStatus;
use crate::queue::PendingBatch;
use crate::runtime::ActionRuntime;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

enum Dispatchable {
    Standalone { method: ActionMethod },
    Request { method: ActionMethod, chunk_count: usize },
    Using(DispatchUsing),
}

/// Orchestrates one action run. Pick a mode with one of the `handle_*`
/// methods, then call [`DispatchAction::dispatch`].
pub struct DispatchAction {
    request: ActionRequest,
    action: Action,
    fields: ActionFields,
    runtime: ActionRuntime,
    pending_batch: Option<PendingBatch>,
    dispatchable: Option<Dispatchable>,
}

impl DispatchAction {
    /// Opens a pending batch right away when the action is batchable.
    pub fn new(
        request: ActionRequest,
        action: Action,
        fields: ActionFields,
        runtime: ActionRuntime,
    ) -> Self {
        let pending_batch = action.is_batchable().then(|| {
            let mut batch = PendingBatch::new();
            batch
                .name(action.name())
                .on_connection(queue_connection(&action, &runtime))
                .on_queue(queue_name(&action, &runtime));
            if let Some(hook) = action.batch_hook() {
                hook(&fields, &mut batch);
            }
            batch
        });

        Self {
            request,
            action,
            fields,
            runtime,
            pending_batch,
            dispatchable: None,
        }
    }

    pub fn handle_standalone(mut self, method: ActionMethod) -> Self {
        self.dispatchable = Some(Dispatchable::Standalone { method });
        self
    }

    pub fn handle_request(mut self, method: ActionMethod, chunk_count: usize) -> Self {
        self.dispatchable = Some(Dispatchable::Request {
            method,
            chunk_count: chunk_count.max(1),
        });
        self
    }

    pub fn handle_using(mut self, callback: DispatchUsing) -> Self {
        self.dispatchable = Some(Dispatchable::Using(callback));
        self
    }

    pub fn pending_batch(&self) -> Option<&PendingBatch> {
        self.pending_batch.as_ref()
    }

    /// Runs the selected mode, then dispatches the pending batch if any.
    ///
    /// Without a selected mode nothing runs and the response is not executed.
    pub async fn dispatch(mut self) -> Result<Response> {
        let span = info_span!(
            "action_dispatch",
            action = %self.action.name(),
            queued = self.action.should_queue()
        );

        async move {
            let response = match self.dispatchable.take() {
                None => Response::new(),
                Some(Dispatchable::Standalone { method }) => {
                    self.dispatch_standalone(&method).await?
                }
                Some(Dispatchable::Request {
                    method,
                    chunk_count,
                }) => {
                    if self.action.should_queue() {
                        self.queue_request(&method, chunk_count).await?
                    } else {
                        self.run_request(&method, chunk_count).await?
                    }
                }
                Some(Dispatchable::Using(callback)) => {
                    callback(
                        self.request.clone(),
                        self.fields.clone(),
                        self.runtime.clone(),
                    )
                    .await?
                }
            };

            if let Some(batch) = self.pending_batch.take() {
                let summary = self.runtime.queue.dispatch_batch(batch).await?;
                event!(
                    Level::INFO,
                    queue_batch = %summary.id,
                    jobs = summary.total_jobs,
                    "action batch dispatched"
                );
            }

            event!(
                Level::DEBUG,
                was_executed = response.was_executed(),
                results = response.results().len(),
                "dispatch complete"
            );
            Ok(response)
        }
        .instrument(span)
        .await
    }

    async fn dispatch_standalone(&mut self, method: &ActionMethod) -> Result<Response> {
        if self.action.should_queue() {
            self.add_queued_action_job(method, Vec::new()).await?;
            return Ok(Response::new().successful(None));
        }

        let result = self
            .dispatch_synchronously_for_collection(method, Vec::new())
            .await?;
        Ok(Response::new().successful(Some(JsonValue::Array(vec![result]))))
    }

    /// Synchronous chunked run. Not executed when no chunk had an
    /// authorized target.
    async fn run_request(&self, method: &ActionMethod, chunk_count: usize) -> Result<Response> {
        let mut cursor = self
            .request
            .chunks(self.runtime.models.clone(), chunk_count);
        let mut results = Vec::new();
        let mut was_executed = false;

        while let Some(chunk) = cursor.next().await? {
            let models = self.authorized(chunk);
            if models.is_empty() {
                continue;
            }
            was_executed = true;
            results.push(
                self.dispatch_synchronously_for_collection(method, models)
                    .await?,
            );
        }

        let response = Response::new().successful(Some(JsonValue::Array(results)));
        Ok(if was_executed {
            response
        } else {
            response.failed()
        })
    }

    /// Queued chunked run: one job per non-empty authorized chunk.
    async fn queue_request(&mut self, method: &ActionMethod, chunk_count: usize) -> Result<Response> {
        let mut cursor = self
            .request
            .chunks(self.runtime.models.clone(), chunk_count);
        let mut jobs = 0usize;

        while let Some(chunk) = cursor.next().await? {
            let models = self.authorized(chunk);
            if models.is_empty() {
                continue;
            }
            self.add_queued_action_job(method, models).await?;
            jobs += 1;
        }

        event!(Level::INFO, jobs, "queued action jobs");
        Ok(Response::new().successful(None))
    }

    fn authorized(&self, chunk: Vec<Model>) -> Vec<Model> {
        ActionModelCollection::new(chunk)
            .filter_for_execution(&self.request, &self.action, self.runtime.gate.as_ref())
            .into_models()
    }

    /// One chunk's unit of work: ledger rows at `running`, handler call,
    /// rows to `finished` once the handler returned.
    pub async fn dispatch_synchronously_for_collection(
        &self,
        method: &ActionMethod,
        models: Vec<Model>,
    ) -> Result<JsonValue> {
        let handler = method.handler(&self.action)?;
        let mut txn = Transaction::begin(self.runtime.ledger.clone());
        let batch_id = txn.batch_id();

        let span = info_span!(
            "action_chunk",
            %batch_id,
            method = %method,
            models = models.len()
        );

        async move {
            if self.action.records_action_events() {
                self.record(&mut txn, &models, ActionEventStatus::Running)
                    .await?;
            }

            let invocation = ActionInvocation::new(
                batch_id,
                self.fields.clone(),
                models,
                self.request.actor.clone(),
                self.runtime.ledger.clone(),
            );

            match handler(invocation).await {
                Ok(result) => {
                    let elapsed_ms = txn.duration().as_millis() as u64;
                    txn.commit().await?;
                    event!(Level::DEBUG, elapsed_ms, "chunk finished");
                    Ok(result)
                }
                Err(err) => {
                    event!(
                        Level::ERROR,
                        error = %err,
                        open_rows = txn.recorded(),
                        "action handler failed"
                    );
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Writes `waiting` rows for the chunk and hands a job to the pending
    /// batch, or straight to the queue.
    pub async fn add_queued_action_job(
        &mut self,
        method: &ActionMethod,
        models: Vec<Model>,
    ) -> Result<Uuid> {
        let mut txn = Transaction::begin(self.runtime.ledger.clone());
        let batch_id = txn.batch_id();
        if self.action.records_action_events() {
            self.record(&mut txn, &models, ActionEventStatus::Waiting)
                .await?;
        }
        // Left uncommitted: the job moves its rows on from `waiting`.
        drop(txn);

        let job = Arc::new(CallQueuedAction::new(
            self.action.clone().with_batch_id(batch_id),
            method.clone(),
            self.fields.clone(),
            models,
            self.request.actor.clone(),
            self.runtime.ledger.clone(),
        ));

        match self.pending_batch.as_mut() {
            Some(batch) => {
                batch.add(job);
                event!(Level::DEBUG, %batch_id, "job added to pending batch");
            }
            None => {
                let connection = queue_connection(&self.action, &self.runtime);
                let queue = queue_name(&self.action, &self.runtime);
                let job_id = self.runtime.queue.push(job, &connection, &queue).await?;
                event!(Level::DEBUG, %batch_id, %job_id, queue = %queue, "job pushed");
            }
        }
        Ok(batch_id)
    }

    async fn record(
        &self,
        txn: &mut Transaction,
        models: &[Model],
        status: ActionEventStatus,
    ) -> Result<()> {
        let scope = self.request.ledger_scope(&self.action, &self.fields);
        txn.record(&scope, models, status, self.runtime.config.ledger_retention_limit)
            .await?;
        Ok(())
    }
}

fn queue_connection(action: &Action, runtime: &ActionRuntime) -> String {
    action
        .queue_options()
        .and_then(|options| options.connection.clone())
        .unwrap_or_else(|| runtime.config.default_connection.clone())
}

fn queue_name(action: &Action, runtime: &ActionRuntime) -> String {
    action
        .queue_options()
        .and_then(|options| options.queue.clone())
        .unwrap_or_else(|| runtime.config.default_queue.clone())
}
