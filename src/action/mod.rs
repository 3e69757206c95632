// ============================================================================
// Action
// ============================================================================
//
// The user-authored unit of work:
// - display metadata serialized for the UI (name, uri key, confirmation,
//   visibility, modal presentation, fields)
// - authorization callbacks (`can_see`, `can_run`)
// - a dispatch table of handlers: explicit callback, per-type entries and
//   a generic fallback (see `ActionMethod`)
// - optional queueing (`QueueOptions`) with a retry policy and batching
//
// `Action::handle_request` is the entry point used by the HTTP layer.
//
// ============================================================================

pub mod collection;
pub mod fields;
pub mod method;
pub mod request;
pub mod response;

pub use collection::ActionModelCollection;
pub use fields::{ActionFields, Field};
pub use method::{ActionHandler, ActionInvocation, ActionMethod, FailedHandler};
pub use request::{ActionRequest, ChunkCursor, PivotContext};
pub use response::ActionResponse;

use crate::core::{Actor, Model, Result};
use crate::dispatch::{DispatchAction, Response};
use crate::queue::{PendingBatch, RetryPolicy};
use crate::runtime::ActionRuntime;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

pub type RunCallback = Arc<dyn Fn(&Actor, &Model) -> bool + Send + Sync>;
pub type SeeCallback = Arc<dyn Fn(&Actor) -> bool + Send + Sync>;
/// Post-processing of the flattened chunk results.
pub type ThenCallback = Arc<dyn Fn(Vec<JsonValue>) -> JsonValue + Send + Sync>;
pub type ResultHandler = Arc<dyn Fn(&ActionFields, Vec<JsonValue>) -> JsonValue + Send + Sync>;
/// Configures the pending batch before any job is added to it.
pub type BatchHook = Arc<dyn Fn(&ActionFields, &mut PendingBatch) + Send + Sync>;
/// Replaces chunked dispatch entirely.
pub type DispatchUsing = Arc<
    dyn Fn(ActionRequest, ActionFields, ActionRuntime) -> BoxFuture<'static, Result<Response>>
        + Send
        + Sync,
>;

static SLUG_SEPARATORS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").ok());

/// How many targets an action requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionKind {
    /// One or more selected targets.
    #[default]
    Normal,
    /// No targets.
    Standalone,
    /// Exactly one target.
    Sole,
}

/// Queue placement of a queued action. Unset names use the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub connection: Option<String>,
    pub queue: Option<String>,
    pub retry: RetryPolicy,
    /// Run every chunk job of one request as a single queue batch.
    pub batchable: bool,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batchable(mut self) -> Self {
        self.batchable = true;
        self
    }
}

#[derive(Clone)]
pub struct Action {
    name: String,
    uri_key: Option<String>,
    kind: ActionKind,
    confirm_text: String,
    confirm_button_text: String,
    cancel_button_text: String,
    destructive: bool,
    without_confirmation: bool,
    without_action_events: bool,
    show_on_index: bool,
    show_on_detail: bool,
    show_inline: bool,
    modal_style: String,
    modal_size: String,
    fields: Vec<Field>,
    chunk_count: Option<usize>,
    queue: Option<QueueOptions>,
    run_callback: Option<RunCallback>,
    see_callback: Option<SeeCallback>,
    pub(crate) handle_callback: Option<ActionHandler>,
    pub(crate) type_handlers: HashMap<String, ActionHandler>,
    pub(crate) default_handler: Option<ActionHandler>,
    then_callback: Option<ThenCallback>,
    result_handler: Option<ResultHandler>,
    pub(crate) failed_handlers: HashMap<String, FailedHandler>,
    pub(crate) default_failed_handler: Option<FailedHandler>,
    batch_hook: Option<BatchHook>,
    dispatch_using: Option<DispatchUsing>,
    batch_id: Option<Uuid>,
}

fn box_handler<F, Fut>(handler: F) -> ActionHandler
where
    F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue>> + Send + 'static,
{
    Arc::new(move |invocation| {
        Box::pin(handler(invocation)) as BoxFuture<'static, Result<JsonValue>>
    })
}

fn box_failed<F, Fut>(hook: F) -> FailedHandler
where
    F: Fn(ActionInvocation, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |invocation, error| {
        Box::pin(hook(invocation, error)) as BoxFuture<'static, Result<()>>
    })
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri_key: None,
            kind: ActionKind::Normal,
            confirm_text: "Are you sure you want to run this action?".to_string(),
            confirm_button_text: "Run Action".to_string(),
            cancel_button_text: "Cancel".to_string(),
            destructive: false,
            without_confirmation: false,
            without_action_events: false,
            show_on_index: true,
            show_on_detail: true,
            show_inline: false,
            modal_style: "window".to_string(),
            modal_size: "2xl".to_string(),
            fields: Vec::new(),
            chunk_count: None,
            queue: None,
            run_callback: None,
            see_callback: None,
            handle_callback: None,
            type_handlers: HashMap::new(),
            default_handler: None,
            then_callback: None,
            result_handler: None,
            failed_handlers: HashMap::new(),
            default_failed_handler: None,
            batch_hook: None,
            dispatch_using: None,
            batch_id: None,
        }
    }

    /// Action whose handler is an explicit callback, used for every target type.
    pub fn using<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue>> + Send + 'static,
    {
        let mut action = Self::new(name);
        action.handle_callback = Some(box_handler(handler));
        action
    }

    /// Standalone action without ledger rows that just returns `response`.
    pub fn respond_with(response: ActionResponse) -> Self {
        let payload = response.to_json();
        Self::using("Response", move |_| {
            let payload = payload.clone();
            async move { Ok(payload) }
        })
        .standalone()
        .without_action_events()
        .without_confirmation()
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::respond_with(ActionResponse::message(text))
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self::respond_with(ActionResponse::danger(text))
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self::respond_with(ActionResponse::redirect(url))
    }

    pub fn visit(path: impl Into<String>, options: JsonValue) -> Self {
        Self::respond_with(ActionResponse::visit(path, options))
    }

    pub fn download(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self::respond_with(ActionResponse::download(url, name))
    }

    pub fn modal(component: impl Into<String>, payload: JsonValue) -> Self {
        Self::respond_with(ActionResponse::modal(component, payload))
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn uri_key_as(mut self, key: impl Into<String>) -> Self {
        self.uri_key = Some(key.into());
        self
    }

    pub fn standalone(mut self) -> Self {
        self.kind = ActionKind::Standalone;
        self
    }

    pub fn sole(mut self) -> Self {
        self.kind = ActionKind::Sole;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn without_confirmation(mut self) -> Self {
        self.without_confirmation = true;
        self
    }

    /// Skip ledger rows for this action.
    pub fn without_action_events(mut self) -> Self {
        self.without_action_events = true;
        self
    }

    pub fn confirm_text(mut self, text: impl Into<String>) -> Self {
        self.confirm_text = text.into();
        self
    }

    pub fn confirm_button_text(mut self, text: impl Into<String>) -> Self {
        self.confirm_button_text = text.into();
        self
    }

    pub fn cancel_button_text(mut self, text: impl Into<String>) -> Self {
        self.cancel_button_text = text.into();
        self
    }

    pub fn only_on_index(mut self) -> Self {
        self.show_on_index = true;
        self.show_on_detail = false;
        self
    }

    pub fn only_on_detail(mut self) -> Self {
        self.show_on_index = false;
        self.show_on_detail = true;
        self
    }

    pub fn show_inline(mut self) -> Self {
        self.show_inline = true;
        self
    }

    pub fn fullscreen(mut self) -> Self {
        self.modal_style = "fullscreen".to_string();
        self
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.modal_size = size.into();
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    /// Chunk size for this action; the configured default applies otherwise.
    pub fn chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = Some(count.max(1));
        self
    }

    // ------------------------------------------------------------------
    // Queueing
    // ------------------------------------------------------------------

    pub fn queued(mut self, options: QueueOptions) -> Self {
        self.queue = Some(options);
        self
    }

    pub fn should_queue(&self) -> bool {
        self.queue.is_some()
    }

    pub fn is_batchable(&self) -> bool {
        self.queue.as_ref().is_some_and(|queue| queue.batchable)
    }

    pub fn queue_options(&self) -> Option<&QueueOptions> {
        self.queue.as_ref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.queue
            .as_ref()
            .map(|queue| queue.retry.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    pub fn can_run<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Actor, &Model) -> bool + Send + Sync + 'static,
    {
        self.run_callback = Some(Arc::new(callback));
        self
    }

    pub fn can_see<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Actor) -> bool + Send + Sync + 'static,
    {
        self.see_callback = Some(Arc::new(callback));
        self
    }

    /// Generic handler used when no callback or type entry matches.
    pub fn handle<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue>> + Send + 'static,
    {
        self.default_handler = Some(box_handler(handler));
        self
    }

    /// Handler for targets of `model_type` (matched exactly or by basename).
    pub fn handle_for<F, Fut>(mut self, model_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue>> + Send + 'static,
    {
        self.type_handlers
            .insert(model_type.into(), box_handler(handler));
        self
    }

    pub fn then<F>(mut self, callback: F) -> Self
    where
        F: Fn(Vec<JsonValue>) -> JsonValue + Send + Sync + 'static,
    {
        self.then_callback = Some(Arc::new(callback));
        self
    }

    /// Overrides the default "last result wins" reduction.
    pub fn handle_result_using<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ActionFields, Vec<JsonValue>) -> JsonValue + Send + Sync + 'static,
    {
        self.result_handler = Some(Arc::new(handler));
        self
    }

    pub fn failed<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ActionInvocation, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.default_failed_handler = Some(box_failed(hook));
        self
    }

    pub fn failed_for<F, Fut>(mut self, model_type: impl Into<String>, hook: F) -> Self
    where
        F: Fn(ActionInvocation, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.failed_handlers
            .insert(model_type.into(), box_failed(hook));
        self
    }

    pub fn with_batch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ActionFields, &mut PendingBatch) + Send + Sync + 'static,
    {
        self.batch_hook = Some(Arc::new(hook));
        self
    }

    pub fn dispatch_request_using<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(ActionRequest, ActionFields, ActionRuntime) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.dispatch_using = Some(Arc::new(move |request, fields, runtime| {
            Box::pin(callback(request, fields, runtime)) as BoxFuture<'static, Result<Response>>
        }));
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL-safe key, the slug of the name unless set explicitly.
    pub fn uri_key(&self) -> String {
        match &self.uri_key {
            Some(key) => key.clone(),
            None => slug(&self.name),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn is_standalone(&self) -> bool {
        self.kind == ActionKind::Standalone
    }

    pub fn is_sole(&self) -> bool {
        self.kind == ActionKind::Sole
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }

    pub fn records_action_events(&self) -> bool {
        !self.without_action_events
    }

    pub fn declared_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn chunk_size(&self, default: usize) -> usize {
        self.chunk_count.unwrap_or(default).max(1)
    }

    pub fn has_run_callback(&self) -> bool {
        self.run_callback.is_some()
    }

    pub(crate) fn batch_hook(&self) -> Option<&BatchHook> {
        self.batch_hook.as_ref()
    }

    pub fn authorized_to_run(&self, actor: &Actor, model: &Model) -> bool {
        self.run_callback
            .as_ref()
            .is_none_or(|callback| callback(actor, model))
    }

    pub fn authorized_to_see(&self, actor: &Actor) -> bool {
        self.see_callback
            .as_ref()
            .is_none_or(|callback| callback(actor))
    }

    /// Ledger batch this copy of the action is bound to.
    pub fn batch_id(&self) -> Option<Uuid> {
        self.batch_id
    }

    pub fn with_batch_id(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Runs the action for one request and builds the reply payload.
    ///
    /// Returns the configured danger message when no target was authorized,
    /// the `then` callback's value when set, else `handle_result`.
    pub async fn handle_request(
        &self,
        request: ActionRequest,
        runtime: &ActionRuntime,
    ) -> Result<JsonValue> {
        let span = info_span!(
            "action_request",
            action = %self.name,
            actor = %request.actor.id,
            model_type = %request.model_type
        );

        async move {
            let fields = request.resolve_fields(self)?;
            request.validate_targets(self)?;

            let dispatcher =
                DispatchAction::new(request.clone(), self.clone(), fields.clone(), runtime.clone());

            let dispatcher = if let Some(callback) = self.dispatch_using.clone() {
                dispatcher.handle_using(callback)
            } else {
                let method = ActionMethod::determine(self, request.target_model_type());
                method.handler(self)?;

                if self.is_standalone() {
                    dispatcher.handle_standalone(method)
                } else {
                    let chunk_count = self.chunk_size(runtime.config.chunk_count);
                    dispatcher.handle_request(method, chunk_count)
                }
            };

            let response = dispatcher.dispatch().await?;

            if !response.was_executed() {
                event!(Level::INFO, "no authorized targets");
                return Ok(
                    ActionResponse::danger(runtime.config.not_authorized_message.clone()).into(),
                );
            }

            let results = response.into_results();
            if let Some(then) = &self.then_callback {
                return Ok(then(flatten(results)));
            }
            Ok(self.handle_result(&fields, results))
        }
        .instrument(span)
        .await
    }

    /// Reduces chunk results to one reply: the last result, or null.
    pub fn handle_result(&self, fields: &ActionFields, results: Vec<JsonValue>) -> JsonValue {
        match &self.result_handler {
            Some(handler) => handler(fields, results),
            None => results.into_iter().last().unwrap_or(JsonValue::Null),
        }
    }
}

fn flatten(results: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut flat = Vec::with_capacity(results.len());
    for result in results {
        match result {
            JsonValue::Array(items) => flat.extend(flatten(items)),
            other => flat.push(other),
        }
    }
    flat
}

fn slug(name: &str) -> String {
    let lower = name.to_lowercase();
    let joined = match SLUG_SEPARATORS.as_ref() {
        Some(separators) => separators.replace_all(&lower, "-").into_owned(),
        None => lower.replace(' ', "-"),
    };
    joined.trim_matches('-').to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionMetadata<'a> {
    name: &'a str,
    uri_key: String,
    confirm_text: &'a str,
    confirm_button_text: &'a str,
    cancel_button_text: &'a str,
    destructive: bool,
    standalone: bool,
    sole: bool,
    without_confirmation: bool,
    show_on_index: bool,
    show_on_detail: bool,
    show_inline: bool,
    modal_style: &'a str,
    modal_size: &'a str,
    fields: &'a [Field],
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ActionMetadata {
            name: &self.name,
            uri_key: self.uri_key(),
            confirm_text: &self.confirm_text,
            confirm_button_text: &self.confirm_button_text,
            cancel_button_text: &self.cancel_button_text,
            destructive: self.destructive,
            standalone: self.is_standalone(),
            sole: self.is_sole(),
            without_confirmation: self.without_confirmation,
            show_on_index: self.show_on_index,
            show_on_detail: self.show_on_detail,
            show_inline: self.show_inline,
            modal_style: &self.modal_style,
            modal_size: &self.modal_size,
            fields: &self.fields,
        }
        .serialize(serializer)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queue", &self.queue)
            .field("chunk_count", &self.chunk_count)
            .field("type_handlers", &self.type_handlers.keys().collect::<Vec<_>>())
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}
