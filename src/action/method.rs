use super::{Action, ActionFields};
use crate::core::{ActionError, Actor, Model, Result, model::basename};
use crate::ledger::SharedLedger;
use crate::queue::JobContext;
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Handler run against one chunk of target models.
pub type ActionHandler =
    Arc<dyn Fn(ActionInvocation) -> BoxFuture<'static, Result<JsonValue>> + Send + Sync>;

/// Hook run when a queued chunk terminally fails; receives the error text.
pub type FailedHandler =
    Arc<dyn Fn(ActionInvocation, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Which handler an action runs for a given target type.
///
/// Precedence: explicit callback, then a handler registered for the
/// target type, then the generic handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionMethod {
    Callback,
    ForType(String),
    Handle,
}

impl ActionMethod {
    pub fn determine(action: &Action, target_type: &str) -> Self {
        if action.handle_callback.is_some() {
            return Self::Callback;
        }
        match lookup_by_type(&action.type_handlers, target_type) {
            Some((key, _)) => Self::ForType(key.to_string()),
            None => Self::Handle,
        }
    }

    /// Resolves the handler, `MissingActionHandler` when none is registered.
    pub fn handler(&self, action: &Action) -> Result<ActionHandler> {
        let handler = match self {
            Self::Callback => action.handle_callback.clone(),
            Self::ForType(key) => action.type_handlers.get(key).cloned(),
            Self::Handle => action.default_handler.clone(),
        };
        handler.ok_or_else(|| ActionError::missing_handler(action.name(), self.name()))
    }

    pub fn name(&self) -> String {
        match self {
            Self::Callback => "handleUsingCallback".to_string(),
            Self::ForType(key) => format!("handleFor{}", basename(key)),
            Self::Handle => "handle".to_string(),
        }
    }
}

impl fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Failure hook for a chunk whose first model has `model_type`: the
/// type-specific hook when registered, else the generic one.
pub(crate) fn failed_handler_for(action: &Action, model_type: Option<&str>) -> Option<FailedHandler> {
    model_type
        .and_then(|model_type| lookup_by_type(&action.failed_handlers, model_type))
        .map(|(_, hook)| hook.clone())
        .or_else(|| action.default_failed_handler.clone())
}

/// Exact type tag first, then the namespace-free basename.
fn lookup_by_type<'a, V>(
    table: &'a std::collections::HashMap<String, V>,
    model_type: &str,
) -> Option<(&'a str, &'a V)> {
    table
        .get_key_value(model_type)
        .or_else(|| table.get_key_value(basename(model_type)))
        .or_else(|| {
            table
                .iter()
                .find(|(key, _)| basename(key) == basename(model_type))
        })
        .map(|(key, value)| (key.as_str(), value))
}

/// Everything a handler sees for one chunk.
#[derive(Clone)]
pub struct ActionInvocation {
    pub batch_id: Uuid,
    pub fields: ActionFields,
    pub models: Vec<Model>,
    pub actor: Actor,
    ledger: SharedLedger,
    job: Option<JobContext>,
}

impl ActionInvocation {
    pub(crate) fn new(
        batch_id: Uuid,
        fields: ActionFields,
        models: Vec<Model>,
        actor: Actor,
        ledger: SharedLedger,
    ) -> Self {
        Self {
            batch_id,
            fields,
            models,
            actor,
            ledger,
            job: None,
        }
    }

    pub(crate) fn on_job(mut self, job: JobContext) -> Self {
        self.job = Some(job);
        self
    }

    /// Marks one model's row of this batch finished.
    pub async fn mark_as_finished(&self, model: &Model) -> Result<u64> {
        self.ledger.mark_as_finished(self.batch_id, model).await
    }

    /// Marks one model's row of this batch failed; siblings keep running.
    pub async fn mark_as_failed(&self, model: &Model, error: impl fmt::Display) -> Result<u64> {
        self.ledger
            .mark_as_failed(self.batch_id, model, Some(error.to_string()))
            .await
    }

    /// Queue attempt this invocation runs in, `None` when synchronous.
    pub fn job(&self) -> Option<&JobContext> {
        self.job.as_ref()
    }

    pub fn is_queued(&self) -> bool {
        self.job.is_some()
    }

    /// Puts the queued job back for a later attempt. No-op when synchronous.
    pub fn release(&self, delay: Duration) -> bool {
        match &self.job {
            Some(job) => {
                job.release(delay);
                true
            }
            None => false,
        }
    }

    /// Fails the queued job without further attempts. No-op when synchronous.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        match &self.job {
            Some(job) => {
                job.fail(reason);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ActionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionInvocation")
            .field("batch_id", &self.batch_id)
            .field("fields", &self.fields)
            .field("models", &self.models.len())
            .field("actor", &self.actor)
            .field("queued", &self.job.is_some())
            .finish()
    }
}
