// ============================================================================
// Resource Actions Library
// ============================================================================
//
// Audited bulk actions for admin resources:
// - `action`: user-authored actions, handler resolution, fields, payloads
// - `dispatch`: chunked synchronous or queued execution of one request
// - `ledger`: one action-event row per (batch, target) with retention
// - `queue`: background jobs, retry policy, queue-native batches
// - `storage`: model source and resource policy capabilities
// - `http`: axum routes for listing and running actions
//
// ============================================================================

//! # Examples
//!
//! ```
//! use resource_actions::{Action, ActionConfig, ActionRequest, ActionRuntime, Actor, Model};
//! use resource_actions::{ActionResponse, TargetSelection};
//!
//! # #[tokio::main]
//! # async fn main() -> resource_actions::Result<()> {
//! let memory = ActionRuntime::in_memory(ActionConfig::default());
//! memory
//!     .store
//!     .save_all([Model::new("Post", "1"), Model::new("Post", "2")])
//!     .await;
//!
//! let archive = Action::new("Archive").handle(|invocation| async move {
//!     Ok(ActionResponse::message(format!("Archived {}", invocation.models.len())).to_json())
//! });
//!
//! let request = ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All);
//! let reply = archive.handle_request(request, &memory.runtime).await?;
//! assert_eq!(reply["message"], "Archived 2");
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod http;
pub mod ledger;
pub mod prelude;
pub mod queue;
pub mod runtime;
pub mod storage;

pub use action::{
    Action, ActionFields, ActionInvocation, ActionKind, ActionMethod, ActionModelCollection,
    ActionRequest, ActionResponse, Field, PivotContext, QueueOptions,
};
pub use config::ActionConfig;
pub use core::{ActionError, Actor, Model, ModelKey, Result};
pub use dispatch::{CallQueuedAction, DispatchAction, Response, Transaction};
pub use ledger::{
    ActionEvent, ActionEventLedger, ActionEventStatus, InMemoryActionEventLedger, NewActionEvent,
};
pub use queue::{
    BatchSummary, InMemoryQueue, Job, JobContext, PendingBatch, QueueDispatcher, QueueWorker,
    RetryPolicy,
};
pub use runtime::{ActionRuntime, InMemoryRuntime};
pub use storage::{
    AllowAll, InMemoryModelStore, ModelSource, ResourceGate, TargetQuery, TargetSelection,
};
