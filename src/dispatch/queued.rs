use crate::action::method::failed_handler_for;
use crate::action::{Action, ActionFields, ActionInvocation, ActionMethod};
use crate::core::{ActionError, Actor, Model, Result};
use crate::ledger::SharedLedger;
use crate::queue::{Job, JobContext, RetryPolicy};
use async_trait::async_trait;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Queue job running one chunk of a queued action.
pub struct CallQueuedAction {
    action: Action,
    method: ActionMethod,
    fields: ActionFields,
    models: Vec<Model>,
    actor: Actor,
    batch_id: Uuid,
    ledger: SharedLedger,
}

impl CallQueuedAction {
    /// `action` must already be bound to its ledger batch.
    pub fn new(
        action: Action,
        method: ActionMethod,
        fields: ActionFields,
        models: Vec<Model>,
        actor: Actor,
        ledger: SharedLedger,
    ) -> Self {
        let batch_id = action.batch_id().unwrap_or_else(Uuid::now_v7);
        Self {
            action,
            method,
            fields,
            models,
            actor,
            batch_id,
            ledger,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn method(&self) -> &ActionMethod {
        &self.method
    }

    fn invocation(&self) -> ActionInvocation {
        ActionInvocation::new(
            self.batch_id,
            self.fields.clone(),
            self.models.clone(),
            self.actor.clone(),
            self.ledger.clone(),
        )
    }
}

#[async_trait]
impl Job for CallQueuedAction {
    fn display_name(&self) -> String {
        self.action.name().to_string()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.action.retry_policy()
    }

    /// Rows go `running`, the handler runs, and rows go `finished` unless
    /// the attempt was failed or released.
    async fn handle(&self, ctx: &JobContext) -> Result<()> {
        let span = info_span!(
            "queued_action",
            action = %self.action.name(),
            batch_id = %self.batch_id,
            attempt = ctx.attempts(),
            models = self.models.len()
        );

        async {
            self.ledger.mark_batch_as_running(self.batch_id).await?;

            let handler = self.method.handler(&self.action)?;
            handler(self.invocation().on_job(ctx.clone())).await?;

            if !ctx.has_failed() && !ctx.is_released() {
                self.ledger.mark_batch_as_finished(self.batch_id).await?;
            } else {
                event!(
                    Level::INFO,
                    released = ctx.is_released(),
                    failed = ctx.has_failed(),
                    "batch left open"
                );
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Rows go `failed` with the error text, then the matching failed hook runs.
    async fn failed(&self, error: &ActionError) {
        let exception = error.to_string();
        event!(
            Level::WARN,
            action = %self.action.name(),
            batch_id = %self.batch_id,
            error = %exception,
            "queued action failed"
        );

        if let Err(err) = self
            .ledger
            .mark_batch_as_failed(self.batch_id, Some(exception.clone()))
            .await
        {
            event!(Level::ERROR, error = %err, "could not mark batch failed");
        }

        let model_type = self.models.first().map(|model| model.model_type.as_str());
        if let Some(hook) = failed_handler_for(&self.action, model_type) {
            if let Err(err) = hook(self.invocation(), exception).await {
                event!(Level::ERROR, error = %err, "failed hook returned an error");
            }
        }
    }
}
