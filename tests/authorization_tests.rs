use resource_actions::{
    Action, ActionConfig, ActionRequest, ActionRuntime, Actor, Model, PivotContext,
    TargetSelection,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn handled_ids(action: Action, seen: Arc<Mutex<Vec<String>>>) -> Action {
    action.handle(move |invocation| {
        let seen = seen.clone();
        async move {
            seen.lock()
                .unwrap()
                .extend(invocation.models.iter().map(|model| model.id.clone()));
            Ok(Value::Null)
        }
    })
}

fn deny_post_two(_: &Actor, model: &Model, _: &str) -> bool {
    model.id != "2"
}

#[tokio::test]
async fn resource_policy_excludes_models_without_run_callback() {
    let memory = ActionRuntime::in_memory(ActionConfig::default()).with_gate(deny_post_two);
    memory
        .store
        .save_all([Model::new("Post", "1"), Model::new("Post", "2")])
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let action = handled_ids(Action::new("Archive"), seen.clone());

    action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), ["1"]);
    assert_eq!(memory.ledger.len().await, 1);
}

#[tokio::test]
async fn run_callback_overrides_resource_policy() {
    let memory = ActionRuntime::in_memory(ActionConfig::default()).with_gate(deny_post_two);
    memory
        .store
        .save_all([Model::new("Post", "1"), Model::new("Post", "2")])
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let action = handled_ids(Action::new("Archive").can_run(|_, _| true), seen.clone());

    action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), ["1", "2"]);
}

#[tokio::test]
async fn gate_receives_the_action_uri_key() {
    let asked = Arc::new(Mutex::new(Vec::new()));
    let recorder = asked.clone();
    let memory = ActionRuntime::in_memory(ActionConfig::default()).with_gate(
        move |actor: &Actor, model: &Model, action: &str| {
            recorder
                .lock()
                .unwrap()
                .push(format!("{}:{}:{action}", actor.id, model.id));
            true
        },
    );
    memory.store.save_all([Model::new("Post", "1")]).await;

    Action::new("Mark As Spam")
        .handle(|_| async { Ok(Value::Null) })
        .handle_request(
            ActionRequest::new(Actor::new("5"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(*asked.lock().unwrap(), ["5:1:mark-as-spam"]);
}

#[tokio::test]
async fn pivot_actions_skip_the_gate_and_log_parent_and_related() {
    let memory = ActionRuntime::in_memory(ActionConfig::default())
        .with_gate(|_: &Actor, _: &Model, _: &str| false);
    memory
        .store
        .save_all([
            Model::new("role_user", "10").with_attributes(json!({"user_id": 1, "role_id": 4})),
            Model::new("role_user", "11").with_attributes(json!({"user_id": 1, "role_id": 5})),
            Model::new("role_user", "12").with_attributes(json!({"user_id": 2, "role_id": 4})),
        ])
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let action = handled_ids(Action::new("Expire Role"), seen.clone());

    let request = ActionRequest::new(
        Actor::new("8"),
        "Role",
        TargetSelection::Ids(vec!["4".into(), "5".into()]),
    )
    .via_pivot(PivotContext {
        parent_type: "User".into(),
        parent_id: "1".into(),
        relationship: "roles".into(),
        pivot_type: "role_user".into(),
        foreign_pivot_key: "user_id".into(),
        related_pivot_key: "role_id".into(),
    });

    action.handle_request(request, &memory.runtime).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), ["10", "11"]);

    let rows = memory.ledger.all().await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.actionable() == ("User", "1")));
    assert_eq!(rows[0].target_type, "Role");
    assert_eq!(rows[0].target_id, "4");
    assert_eq!(rows[1].target_id, "5");
    assert_eq!(rows[0].model_type, "role_user");
    assert_eq!(rows[0].model_id.as_deref(), Some("10"));
}

#[tokio::test]
async fn hidden_actions_are_not_seen() {
    let admin = Actor::new("1").named("Admin");
    let guest = Actor::new("2");
    let action = Action::new("Impersonate").can_see(|actor| actor.name.as_deref() == Some("Admin"));

    assert!(action.authorized_to_see(&admin));
    assert!(!action.authorized_to_see(&guest));
}
