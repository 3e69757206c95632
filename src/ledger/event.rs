use crate::core::{Model, ModelKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one ledger row.
///
/// ```text
/// Waiting ──> Running ──> Finished
///    │           │
///    └───────────┴──────> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionEventStatus {
    /// Queued, not picked up by a worker yet.
    Waiting,
    /// Handler is executing (or crashed while executing).
    Running,
    Finished,
    Failed,
}

impl ActionEventStatus {
    /// Terminal rows never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionEventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ledger row: one (batch, target) audit fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub id: u64,
    pub batch_id: Uuid,
    pub user_id: String,
    pub name: String,
    pub actionable_type: String,
    pub actionable_id: String,
    pub target_type: String,
    pub target_id: String,
    pub model_type: String,
    pub model_id: Option<String>,
    pub fields: JsonValue,
    pub original: Option<JsonValue>,
    pub changes: Option<JsonValue>,
    pub status: ActionEventStatus,
    pub exception: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionEvent {
    pub fn model_key(&self) -> Option<ModelKey> {
        self.model_id
            .as_ref()
            .map(|id| ModelKey::new(self.model_type.clone(), id.clone()))
    }

    pub fn actionable(&self) -> (&str, &str) {
        (&self.actionable_type, &self.actionable_id)
    }
}

/// A ledger row before insertion (no id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActionEvent {
    pub batch_id: Uuid,
    pub user_id: String,
    pub name: String,
    pub actionable_type: String,
    pub actionable_id: String,
    pub target_type: String,
    pub target_id: String,
    pub model_type: String,
    pub model_id: Option<String>,
    pub fields: JsonValue,
    pub original: Option<JsonValue>,
    pub changes: Option<JsonValue>,
    pub status: ActionEventStatus,
    pub exception: String,
}

impl NewActionEvent {
    pub(crate) fn into_event(self, id: u64, now: DateTime<Utc>) -> ActionEvent {
        ActionEvent {
            id,
            batch_id: self.batch_id,
            user_id: self.user_id,
            name: self.name,
            actionable_type: self.actionable_type,
            actionable_id: self.actionable_id,
            target_type: self.target_type,
            target_id: self.target_id,
            model_type: self.model_type,
            model_id: self.model_id,
            fields: self.fields,
            original: self.original,
            changes: self.changes,
            status: self.status,
            exception: self.exception,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds one row per target model for an action batch.
    ///
    /// Direct targets record the model itself as actionable, target and
    /// model. Pivot targets record the parent as actionable, the related
    /// model as target and the pivot row as model.
    pub fn for_models(
        scope: &LedgerScope,
        batch_id: Uuid,
        models: &[Model],
        status: ActionEventStatus,
    ) -> Vec<NewActionEvent> {
        models
            .iter()
            .map(|model| {
                let (actionable_type, actionable_id, target_type, target_id) = match &scope.keys {
                    LedgerKeys::Direct => (
                        model.model_type.clone(),
                        model.id.clone(),
                        model.model_type.clone(),
                        model.id.clone(),
                    ),
                    LedgerKeys::Pivot {
                        parent_type,
                        related_type,
                        foreign_pivot_key,
                        related_pivot_key,
                    } => (
                        parent_type.clone(),
                        model.attribute_key(foreign_pivot_key).unwrap_or_default(),
                        related_type.clone(),
                        model.attribute_key(related_pivot_key).unwrap_or_default(),
                    ),
                };

                NewActionEvent {
                    batch_id,
                    user_id: scope.user_id.clone(),
                    name: scope.name.clone(),
                    actionable_type,
                    actionable_id,
                    target_type,
                    target_id,
                    model_type: model.model_type.clone(),
                    model_id: Some(model.id.clone()),
                    fields: scope.fields.clone(),
                    original: None,
                    changes: None,
                    status,
                    exception: String::new(),
                }
            })
            .collect()
    }
}

/// Request-level attributes shared by every row of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerScope {
    pub user_id: String,
    pub name: String,
    pub fields: JsonValue,
    pub keys: LedgerKeys,
}

/// How actionable/target identities are derived from a target model.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerKeys {
    Direct,
    Pivot {
        parent_type: String,
        related_type: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(keys: LedgerKeys) -> LedgerScope {
        LedgerScope {
            user_id: "7".into(),
            name: "Archive".into(),
            fields: json!({"reason": "stale"}),
            keys,
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ActionEventStatus::Waiting.is_terminal());
        assert!(!ActionEventStatus::Running.is_terminal());
        assert!(ActionEventStatus::Finished.is_terminal());
        assert!(ActionEventStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_value(ActionEventStatus::Waiting).unwrap(),
            json!("waiting")
        );
    }

    #[test]
    fn direct_rows_point_at_the_model() {
        let batch = Uuid::now_v7();
        let rows = NewActionEvent::for_models(
            &scope(LedgerKeys::Direct),
            batch,
            &[Model::new("Post", "1"), Model::new("Post", "2")],
            ActionEventStatus::Running,
        );

        assert_eq!(rows.len(), 2);
        let second = &rows[1];
        assert_eq!(second.batch_id, batch);
        assert_eq!(second.actionable_type, "Post");
        assert_eq!(second.actionable_id, "2");
        assert_eq!(second.target_id, "2");
        assert_eq!(second.model_id.as_deref(), Some("2"));
        assert_eq!(second.fields, json!({"reason": "stale"}));
        assert_eq!(second.status, ActionEventStatus::Running);
    }

    #[test]
    fn pivot_rows_split_actionable_target_and_model() {
        let pivot = Model::new("role_user", "40")
            .with_attribute("user_id", json!(3))
            .with_attribute("role_id", json!(12));
        let rows = NewActionEvent::for_models(
            &scope(LedgerKeys::Pivot {
                parent_type: "User".into(),
                related_type: "Role".into(),
                foreign_pivot_key: "user_id".into(),
                related_pivot_key: "role_id".into(),
            }),
            Uuid::now_v7(),
            &[pivot],
            ActionEventStatus::Waiting,
        );

        let row = &rows[0];
        assert_eq!((row.actionable_type.as_str(), row.actionable_id.as_str()), ("User", "3"));
        assert_eq!((row.target_type.as_str(), row.target_id.as_str()), ("Role", "12"));
        assert_eq!(row.model_type, "role_user");
        assert_eq!(row.model_id.as_deref(), Some("40"));
    }
}
