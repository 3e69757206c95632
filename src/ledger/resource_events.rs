//! Ledger rows for plain resource CRUD operations.
//!
//! These share the action-event table so the resource timeline shows
//! edits and bulk actions side by side. They are written already
//! `finished` and carry no field snapshot.

use super::{ActionEventStatus, NewActionEvent};
use crate::core::{Actor, Model};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

impl NewActionEvent {
    fn for_resource(actor: &Actor, name: &str, model: &Model) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            user_id: actor.id.clone(),
            name: name.to_string(),
            actionable_type: model.model_type.clone(),
            actionable_id: model.id.clone(),
            target_type: model.model_type.clone(),
            target_id: model.id.clone(),
            model_type: model.model_type.clone(),
            model_id: Some(model.id.clone()),
            fields: JsonValue::String(String::new()),
            original: None,
            changes: None,
            status: ActionEventStatus::Finished,
            exception: String::new(),
        }
    }

    pub fn for_resource_create(actor: &Actor, model: &Model) -> Self {
        let mut event = Self::for_resource(actor, "Create", model);
        event.changes = Some(model.attributes.clone());
        event
    }

    /// Records only the attributes that changed between `original` and `updated`.
    pub fn for_resource_update(actor: &Actor, original: &Model, updated: &Model) -> Self {
        let (before, after) = attribute_diff(original, updated);
        let mut event = Self::for_resource(actor, "Update", updated);
        event.original = Some(before);
        event.changes = Some(after);
        event
    }

    /// One row per deleted model, all sharing a batch id.
    pub fn for_resource_delete(actor: &Actor, models: &[Model]) -> Vec<Self> {
        Self::for_resource_batch(actor, "Delete", models)
    }

    pub fn for_resource_restore(actor: &Actor, models: &[Model]) -> Vec<Self> {
        Self::for_resource_batch(actor, "Restore", models)
    }

    fn for_resource_batch(actor: &Actor, name: &str, models: &[Model]) -> Vec<Self> {
        let batch_id = Uuid::now_v7();
        models
            .iter()
            .map(|model| {
                let mut event = Self::for_resource(actor, name, model);
                event.batch_id = batch_id;
                event
            })
            .collect()
    }

    pub fn for_attached_resource(
        actor: &Actor,
        parent: &Model,
        related: &Model,
        pivot: &Model,
    ) -> Self {
        let mut event = Self::for_pivot(actor, "Attach", parent, related, pivot);
        event.changes = Some(pivot.attributes.clone());
        event
    }

    pub fn for_attached_resource_update(
        actor: &Actor,
        parent: &Model,
        related: &Model,
        original_pivot: &Model,
        updated_pivot: &Model,
    ) -> Self {
        let (before, after) = attribute_diff(original_pivot, updated_pivot);
        let mut event = Self::for_pivot(actor, "Update Attached", parent, related, updated_pivot);
        event.original = Some(before);
        event.changes = Some(after);
        event
    }

    /// Detached pivot rows no longer exist, so `model_id` is left empty.
    pub fn for_resource_detach(
        actor: &Actor,
        parent: &Model,
        related: &[Model],
        pivot_type: &str,
    ) -> Vec<Self> {
        let batch_id = Uuid::now_v7();
        related
            .iter()
            .map(|model| Self {
                batch_id,
                user_id: actor.id.clone(),
                name: "Detach".to_string(),
                actionable_type: parent.model_type.clone(),
                actionable_id: parent.id.clone(),
                target_type: model.model_type.clone(),
                target_id: model.id.clone(),
                model_type: pivot_type.to_string(),
                model_id: None,
                fields: JsonValue::String(String::new()),
                original: None,
                changes: None,
                status: ActionEventStatus::Finished,
                exception: String::new(),
            })
            .collect()
    }

    fn for_pivot(actor: &Actor, name: &str, parent: &Model, related: &Model, pivot: &Model) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            user_id: actor.id.clone(),
            name: name.to_string(),
            actionable_type: parent.model_type.clone(),
            actionable_id: parent.id.clone(),
            target_type: related.model_type.clone(),
            target_id: related.id.clone(),
            model_type: pivot.model_type.clone(),
            model_id: Some(pivot.id.clone()),
            fields: JsonValue::String(String::new()),
            original: None,
            changes: None,
            status: ActionEventStatus::Finished,
            exception: String::new(),
        }
    }
}

fn attribute_diff(original: &Model, updated: &Model) -> (JsonValue, JsonValue) {
    let empty = JsonMap::new();
    let before = original.attributes.as_object().unwrap_or(&empty);
    let after = updated.attributes.as_object().unwrap_or(&empty);

    let mut original_values = JsonMap::new();
    let mut changed_values = JsonMap::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            changed_values.insert(key.clone(), value.clone());
            if let Some(previous) = before.get(key) {
                original_values.insert(key.clone(), previous.clone());
            }
        }
    }

    (
        JsonValue::Object(original_values),
        JsonValue::Object(changed_values),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_records_only_dirty_attributes() {
        let actor = Actor::new("1");
        let before = Model::new("Post", "5").with_attributes(json!({"title": "Old", "views": 3}));
        let after = Model::new("Post", "5")
            .with_attributes(json!({"title": "New", "views": 3, "slug": "new"}));

        let event = NewActionEvent::for_resource_update(&actor, &before, &after);

        assert_eq!(event.name, "Update");
        assert_eq!(event.status, ActionEventStatus::Finished);
        assert_eq!(event.original, Some(json!({"title": "Old"})));
        assert_eq!(event.changes, Some(json!({"title": "New", "slug": "new"})));
    }

    #[test]
    fn delete_rows_share_a_batch() {
        let actor = Actor::new("1");
        let rows = NewActionEvent::for_resource_delete(
            &actor,
            &[Model::new("Post", "1"), Model::new("Post", "2")],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].batch_id, rows[1].batch_id);
        assert!(rows.iter().all(|row| row.name == "Delete"));
    }

    #[test]
    fn attach_points_actionable_at_parent() {
        let actor = Actor::new("1");
        let parent = Model::new("User", "3");
        let role = Model::new("Role", "12");
        let pivot = Model::new("role_user", "40").with_attributes(json!({"user_id": 3, "role_id": 12}));

        let event = NewActionEvent::for_attached_resource(&actor, &parent, &role, &pivot);

        assert_eq!(event.name, "Attach");
        assert_eq!(event.actionable_type, "User");
        assert_eq!(event.target_type, "Role");
        assert_eq!(event.model_type, "role_user");
        assert_eq!(event.changes, Some(json!({"user_id": 3, "role_id": 12})));
    }

    #[test]
    fn detach_has_no_model_id() {
        let actor = Actor::new("1");
        let rows = NewActionEvent::for_resource_detach(
            &actor,
            &Model::new("User", "3"),
            &[Model::new("Role", "12")],
            "role_user",
        );
        assert_eq!(rows[0].model_id, None);
        assert_eq!(rows[0].model_type, "role_user");
    }
}
