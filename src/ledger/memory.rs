use super::{ActionEvent, ActionEventLedger, ActionEventStatus, NewActionEvent, actionables_of};
use crate::core::{ModelKey, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{Level, event};
use uuid::Uuid;

/// Ledger table kept in process memory, keyed by auto-increment id.
///
/// All writes happen under a single write lock, which gives the same
/// guarantees the trait asks of a SQL table: atomic multi-row insert and
/// predicate-guarded updates.
pub struct InMemoryActionEventLedger {
    rows: RwLock<BTreeMap<u64, ActionEvent>>,
    next_id: AtomicU64,
}

impl Default for InMemoryActionEventLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryActionEventLedger {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Every row in id order.
    pub async fn all(&self) -> Vec<ActionEvent> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn find(&self, id: u64) -> Option<ActionEvent> {
        self.rows.read().await.get(&id).cloned()
    }
}

impl InMemoryActionEventLedger {
    fn insert_locked(
        &self,
        rows: &mut BTreeMap<u64, ActionEvent>,
        events: Vec<NewActionEvent>,
    ) -> Vec<ActionEvent> {
        let now = Utc::now();
        let mut created = Vec::with_capacity(events.len());

        for new_event in events {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let row = new_event.into_event(id, now);
            rows.insert(id, row.clone());
            created.push(row);
        }

        event!(Level::DEBUG, rows = created.len(), "ledger rows inserted");
        created
    }
}

/// Keeps the `limit` newest rows per actionable.
fn prune_locked(
    rows: &mut BTreeMap<u64, ActionEvent>,
    actionables: &[(String, String)],
    limit: usize,
) -> u64 {
    let mut removed = 0u64;

    for (actionable_type, actionable_id) in actionables {
        let stale: Vec<u64> = rows
            .values()
            .rev()
            .filter(|row| &row.actionable_type == actionable_type && &row.actionable_id == actionable_id)
            .skip(limit)
            .map(|row| row.id)
            .collect();

        for id in stale {
            rows.remove(&id);
            removed += 1;
        }
    }

    if removed > 0 {
        event!(Level::DEBUG, removed, limit, "ledger rows pruned");
    }
    removed
}

fn apply_status(row: &mut ActionEvent, status: ActionEventStatus, exception: &Option<String>) {
    row.status = status;
    if let Some(exception) = exception {
        row.exception = exception.clone();
    }
    row.updated_at = Utc::now();
}

#[async_trait]
impl ActionEventLedger for InMemoryActionEventLedger {
    async fn insert(&self, events: Vec<NewActionEvent>) -> Result<Vec<ActionEvent>> {
        let mut rows = self.rows.write().await;
        Ok(self.insert_locked(&mut rows, events))
    }

    async fn prune(&self, actionables: &[(String, String)], limit: usize) -> Result<u64> {
        let mut rows = self.rows.write().await;
        Ok(prune_locked(&mut rows, actionables, limit))
    }

    async fn create_for_models(
        &self,
        events: Vec<NewActionEvent>,
        limit: usize,
    ) -> Result<Vec<ActionEvent>> {
        let actionables = actionables_of(&events);
        let mut rows = self.rows.write().await;
        let created = self.insert_locked(&mut rows, events);
        prune_locked(&mut rows, &actionables, limit);
        Ok(created)
    }

    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut updated = 0u64;

        for row in rows
            .values_mut()
            .filter(|row| row.batch_id == batch_id && !row.status.is_terminal())
        {
            apply_status(row, status, &exception);
            updated += 1;
        }

        event!(Level::DEBUG, %batch_id, %status, updated, "ledger batch status updated");
        Ok(updated)
    }

    async fn update_model_status(
        &self,
        batch_id: Uuid,
        model: &ModelKey,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut updated = 0u64;

        for row in rows.values_mut().filter(|row| {
            row.batch_id == batch_id
                && row.model_type == model.model_type
                && row.model_id.as_deref() == Some(model.id.as_str())
                && !row.status.is_terminal()
        }) {
            apply_status(row, status, &exception);
            updated += 1;
        }

        Ok(updated)
    }

    async fn for_batch(&self, batch_id: Uuid) -> Result<Vec<ActionEvent>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn for_actionable(
        &self,
        actionable_type: &str,
        actionable_id: &str,
    ) -> Result<Vec<ActionEvent>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .rev()
            .filter(|row| row.actionable_type == actionable_type && row.actionable_id == actionable_id)
            .cloned()
            .collect())
    }

    async fn unfinished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActionEvent>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| !row.status.is_terminal() && row.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Model;
    use crate::ledger::{LedgerKeys, LedgerScope};
    use serde_json::json;

    fn scope() -> LedgerScope {
        LedgerScope {
            user_id: "1".into(),
            name: "Archive".into(),
            fields: json!({}),
            keys: LedgerKeys::Direct,
        }
    }

    #[tokio::test]
    async fn terminal_rows_are_never_reopened() {
        let ledger = InMemoryActionEventLedger::new();
        let batch = Uuid::now_v7();
        let model = Model::new("Post", "1");
        ledger
            .insert(NewActionEvent::for_models(
                &scope(),
                batch,
                std::slice::from_ref(&model),
                ActionEventStatus::Running,
            ))
            .await
            .unwrap();

        assert_eq!(ledger.mark_batch_as_finished(batch).await.unwrap(), 1);
        assert_eq!(ledger.mark_batch_as_running(batch).await.unwrap(), 0);
        assert_eq!(
            ledger
                .mark_as_failed(batch, &model, Some("late".into()))
                .await
                .unwrap(),
            0
        );

        let rows = ledger.for_batch(batch).await.unwrap();
        assert_eq!(rows[0].status, ActionEventStatus::Finished);
        assert_eq!(rows[0].exception, "");
    }

    #[tokio::test]
    async fn per_model_update_leaves_siblings_alone() {
        let ledger = InMemoryActionEventLedger::new();
        let batch = Uuid::now_v7();
        let models = vec![Model::new("Post", "1"), Model::new("Post", "2")];
        ledger
            .insert(NewActionEvent::for_models(
                &scope(),
                batch,
                &models,
                ActionEventStatus::Running,
            ))
            .await
            .unwrap();

        ledger
            .mark_as_failed(batch, &models[0], Some("locked".into()))
            .await
            .unwrap();
        ledger.mark_batch_as_finished(batch).await.unwrap();

        let rows = ledger.for_batch(batch).await.unwrap();
        assert_eq!(rows[0].status, ActionEventStatus::Failed);
        assert_eq!(rows[0].exception, "locked");
        assert_eq!(rows[1].status, ActionEventStatus::Finished);
    }

    #[tokio::test]
    async fn unfinished_before_skips_terminal_rows() {
        let ledger = InMemoryActionEventLedger::new();
        let running = Uuid::now_v7();
        let done = Uuid::now_v7();
        for batch in [running, done] {
            ledger
                .insert(NewActionEvent::for_models(
                    &scope(),
                    batch,
                    &[Model::new("Post", "1")],
                    ActionEventStatus::Running,
                ))
                .await
                .unwrap();
        }
        ledger.mark_batch_as_finished(done).await.unwrap();

        let stuck = ledger
            .unfinished_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].batch_id, running);
    }
}
