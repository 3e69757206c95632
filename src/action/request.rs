use super::{Action, ActionFields};
use crate::core::{ActionError, Actor, Model, Result};
use crate::ledger::{LedgerKeys, LedgerScope};
use crate::storage::{PivotQuery, SharedModelSource, TargetQuery, TargetSelection};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Many-to-many relationship an action was invoked through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotContext {
    pub parent_type: String,
    pub parent_id: String,
    pub relationship: String,
    /// Type alias of the join-table rows.
    pub pivot_type: String,
    /// Pivot column referencing the parent.
    pub foreign_pivot_key: String,
    /// Pivot column referencing the related model.
    pub related_pivot_key: String,
}

/// One "run this action" request.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub actor: Actor,
    /// Type of the resource's models (the related type for pivot actions).
    pub model_type: String,
    pub selection: TargetSelection,
    pub input: JsonMap<String, JsonValue>,
    pub pivot: Option<PivotContext>,
}

impl ActionRequest {
    pub fn new(actor: Actor, model_type: impl Into<String>, selection: TargetSelection) -> Self {
        Self {
            actor,
            model_type: model_type.into(),
            selection,
            input: JsonMap::new(),
            pivot: None,
        }
    }

    /// Request without selected targets.
    pub fn standalone(actor: Actor, model_type: impl Into<String>) -> Self {
        Self::new(actor, model_type, TargetSelection::Ids(Vec::new()))
    }

    pub fn with_input(mut self, input: JsonValue) -> Self {
        if let JsonValue::Object(map) = input {
            self.input = map;
        }
        self
    }

    pub fn with_field(mut self, attribute: impl Into<String>, value: JsonValue) -> Self {
        self.input.insert(attribute.into(), value);
        self
    }

    pub fn via_pivot(mut self, pivot: PivotContext) -> Self {
        self.pivot = Some(pivot);
        self
    }

    pub fn is_pivot_action(&self) -> bool {
        self.pivot.is_some()
    }

    /// Type of the rows handlers receive: the pivot type for pivot actions.
    pub fn target_model_type(&self) -> &str {
        self.pivot
            .as_ref()
            .map_or(self.model_type.as_str(), |pivot| pivot.pivot_type.as_str())
    }

    pub fn resolve_fields(&self, action: &Action) -> Result<ActionFields> {
        ActionFields::resolve(action.declared_fields(), &self.input)
    }

    pub fn validate_targets(&self, action: &Action) -> Result<()> {
        if action.is_standalone() {
            return Ok(());
        }
        match self.selection.explicit_len() {
            Some(0) => Err(ActionError::Validation(
                "No resources were selected for this action.".to_string(),
            )),
            Some(1) => Ok(()),
            _ if action.is_sole() => Err(ActionError::Validation(
                "This action may only be run against a single resource.".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn ledger_scope(&self, action: &Action, fields: &ActionFields) -> LedgerScope {
        let keys = match &self.pivot {
            None => LedgerKeys::Direct,
            Some(pivot) => LedgerKeys::Pivot {
                parent_type: pivot.parent_type.clone(),
                related_type: self.model_type.clone(),
                foreign_pivot_key: pivot.foreign_pivot_key.clone(),
                related_pivot_key: pivot.related_pivot_key.clone(),
            },
        };
        LedgerScope {
            user_id: self.actor.id.clone(),
            name: action.name().to_string(),
            fields: fields.for_storage(),
            keys,
        }
    }

    pub fn target_query(&self) -> TargetQuery {
        let query = TargetQuery::new(self.model_type.clone(), self.selection.clone());
        match &self.pivot {
            None => query,
            Some(pivot) => query.through_pivot(PivotQuery {
                pivot_type: pivot.pivot_type.clone(),
                parent_id: pivot.parent_id.clone(),
                foreign_pivot_key: pivot.foreign_pivot_key.clone(),
                related_pivot_key: pivot.related_pivot_key.clone(),
            }),
        }
    }

    /// Pages through the targets in primary-key order, `size` rows at a time.
    pub fn chunks(&self, source: SharedModelSource, size: usize) -> ChunkCursor {
        ChunkCursor {
            source,
            query: self.target_query(),
            size: size.max(1),
            after: None,
            done: false,
        }
    }
}

/// Keyset cursor over a target query.
pub struct ChunkCursor {
    source: SharedModelSource,
    query: TargetQuery,
    size: usize,
    after: Option<String>,
    done: bool,
}

impl ChunkCursor {
    pub async fn next(&mut self) -> Result<Option<Vec<Model>>> {
        if self.done {
            return Ok(None);
        }

        let chunk = self
            .source
            .fetch_chunk(&self.query, self.after.as_deref(), self.size)
            .await?;

        if chunk.len() < self.size {
            self.done = true;
        }
        match chunk.last() {
            Some(last) => {
                self.after = Some(last.id.clone());
                Ok(Some(chunk))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryModelStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn chunk_cursor_walks_every_row_once() {
        let store = Arc::new(InMemoryModelStore::new());
        store
            .save_all((1..=5).map(|id| Model::new("Post", id.to_string())))
            .await;

        let request = ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All);
        let mut cursor = request.chunks(store, 2);
        let mut sizes = Vec::new();
        while let Some(chunk) = cursor.next().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn sole_actions_need_exactly_one_target() {
        let action = Action::new("Impersonate").sole();
        let actor = Actor::new("1");

        let one = ActionRequest::new(actor.clone(), "User", TargetSelection::ids(["3"]));
        assert!(one.validate_targets(&action).is_ok());

        let two = ActionRequest::new(actor.clone(), "User", TargetSelection::ids(["3", "4"]));
        assert!(two.validate_targets(&action).is_err());

        let none = ActionRequest::new(actor, "User", TargetSelection::ids(Vec::<String>::new()));
        assert!(none.validate_targets(&action).is_err());
    }

    #[test]
    fn standalone_actions_accept_empty_selection() {
        let action = Action::new("Export").standalone();
        let request = ActionRequest::standalone(Actor::new("1"), "User");
        assert!(request.validate_targets(&action).is_ok());
        assert!(request.validate_targets(&Action::new("Archive")).is_err());
    }

    #[test]
    fn pivot_requests_record_parent_as_actionable() {
        let request = ActionRequest::new(Actor::new("7"), "Role", TargetSelection::ids(["1"]))
            .via_pivot(PivotContext {
                parent_type: "User".into(),
                parent_id: "4".into(),
                relationship: "roles".into(),
                pivot_type: "role_user".into(),
                foreign_pivot_key: "user_id".into(),
                related_pivot_key: "role_id".into(),
            })
            .with_field("reason", json!("audit"));

        assert!(request.is_pivot_action());
        assert_eq!(request.target_model_type(), "role_user");

        let scope = request.ledger_scope(&Action::new("Revoke"), &ActionFields::new());
        assert_eq!(scope.user_id, "7");
        assert_eq!(
            scope.keys,
            LedgerKeys::Pivot {
                parent_type: "User".into(),
                related_type: "Role".into(),
                foreign_pivot_key: "user_id".into(),
                related_pivot_key: "role_id".into(),
            }
        );
        assert_eq!(request.target_query().row_type(), "role_user");
    }
}
