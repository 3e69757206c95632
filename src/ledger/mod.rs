// ============================================================================
// Action Event Ledger
// ============================================================================
//
// Audit trail of every action batch: one row per (batch, target model).
//
// Every status write is scoped by batch id (plus model identity for
// per-model updates) and guarded by `status NOT IN (finished, failed)`.
// That predicate is the only concurrency control: redundant terminal
// writes from racing workers become no-ops.
//
// ============================================================================

pub mod event;
pub mod memory;
mod resource_events;

pub use event::{ActionEvent, ActionEventStatus, LedgerKeys, LedgerScope, NewActionEvent};
pub use memory::InMemoryActionEventLedger;

use crate::core::{Model, ModelKey, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Shared handle injected into the dispatcher and queued jobs.
pub type SharedLedger = Arc<dyn ActionEventLedger>;

/// Distinct (actionable_type, actionable_id) pairs of `events`, in first-seen order.
pub fn actionables_of(events: &[NewActionEvent]) -> Vec<(String, String)> {
    let mut actionables: Vec<(String, String)> = Vec::new();
    for event in events {
        let key = (event.actionable_type.clone(), event.actionable_id.clone());
        if !actionables.contains(&key) {
            actionables.push(key);
        }
    }
    actionables
}

/// Storage capability behind the action-event table.
///
/// Implementations provide atomic multi-row insert (alone or together with
/// retention pruning), predicate-guarded bulk status updates and pruning. The lifecycle helpers
/// (`mark_*`) are built on top of these.
#[async_trait]
pub trait ActionEventLedger: Send + Sync {
    /// Inserts all rows or none, returning them with ids assigned.
    async fn insert(&self, events: Vec<NewActionEvent>) -> Result<Vec<ActionEvent>>;

    /// Keeps the `limit` most recent rows (by id) per actionable, deleting the rest.
    async fn prune(&self, actionables: &[(String, String)], limit: usize) -> Result<u64>;

    /// Moves every non-terminal row of the batch to `status`.
    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> Result<u64>;

    /// Moves the non-terminal row of one model in the batch to `status`.
    async fn update_model_status(
        &self,
        batch_id: Uuid,
        model: &ModelKey,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> Result<u64>;

    async fn for_batch(&self, batch_id: Uuid) -> Result<Vec<ActionEvent>>;

    /// Rows for one actionable model, newest first.
    async fn for_actionable(
        &self,
        actionable_type: &str,
        actionable_id: &str,
    ) -> Result<Vec<ActionEvent>>;

    /// Rows still `waiting`/`running` whose last update is older than `cutoff`.
    async fn unfinished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActionEvent>>;

    /// Inserts the batch rows and prunes every actionable they touch as one
    /// unit of work: either all rows land and retention holds, or nothing
    /// is written.
    async fn create_for_models(
        &self,
        events: Vec<NewActionEvent>,
        limit: usize,
    ) -> Result<Vec<ActionEvent>>;

    async fn mark_batch_as_running(&self, batch_id: Uuid) -> Result<u64> {
        self.update_batch_status(batch_id, ActionEventStatus::Running, None)
            .await
    }

    async fn mark_batch_as_finished(&self, batch_id: Uuid) -> Result<u64> {
        self.update_batch_status(batch_id, ActionEventStatus::Finished, None)
            .await
    }

    async fn mark_batch_as_failed(&self, batch_id: Uuid, exception: Option<String>) -> Result<u64> {
        self.update_batch_status(batch_id, ActionEventStatus::Failed, exception)
            .await
    }

    async fn mark_as_finished(&self, batch_id: Uuid, model: &Model) -> Result<u64> {
        self.update_model_status(batch_id, &model.key(), ActionEventStatus::Finished, None)
            .await
    }

    async fn mark_as_failed(
        &self,
        batch_id: Uuid,
        model: &Model,
        exception: Option<String>,
    ) -> Result<u64> {
        self.update_model_status(batch_id, &model.key(), ActionEventStatus::Failed, exception)
            .await
    }
}
