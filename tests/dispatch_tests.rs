use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resource_actions::ledger::ActionEventLedger;
use resource_actions::{
    Action, ActionConfig, ActionError, ActionEvent, ActionEventStatus, ActionFields, ActionMethod,
    ActionRequest, ActionResponse, ActionRuntime, Actor, DispatchAction, InMemoryActionEventLedger,
    InMemoryModelStore, InMemoryQueue, Model, ModelKey, NewActionEvent, Response, TargetSelection,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn posts(ids: &[&str]) -> Vec<Model> {
    ids.iter()
        .map(|id| Model::new("Post", *id).with_attribute("title", json!(format!("Post {id}"))))
        .collect()
}

fn ids(models: &[Model]) -> Vec<String> {
    models.iter().map(|model| model.id.clone()).collect()
}

#[tokio::test]
async fn archive_runs_in_chunks_and_finishes_every_row() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2", "3"])).await;

    let ledger = memory.ledger.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = seen.clone();

    let archive = Action::new("Archive").handle(move |invocation| {
        let ledger = ledger.clone();
        let seen = seen_in_handler.clone();
        async move {
            let rows = ledger.for_batch(invocation.batch_id).await?;
            assert!(rows.iter().all(|row| row.status == ActionEventStatus::Running));
            seen.lock().unwrap().push(ids(&invocation.models));
            Ok(json!(invocation.models.len()))
        }
    });

    let request = ActionRequest::new(
        Actor::new("7"),
        "Post",
        TargetSelection::Ids(vec!["1".into(), "2".into(), "3".into()]),
    );
    let response = DispatchAction::new(
        request,
        archive,
        ActionFields::new(),
        memory.runtime.clone(),
    )
    .handle_request(ActionMethod::Handle, 2)
    .dispatch()
    .await
    .unwrap();

    assert!(response.was_executed());
    assert_eq!(response.results(), [json!(2), json!(1)]);
    assert_eq!(*seen.lock().unwrap(), [vec!["1", "2"], vec!["3"]]);

    let rows = memory.ledger.all().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.status == ActionEventStatus::Finished));
    assert!(rows.iter().all(|row| row.name == "Archive" && row.user_id == "7"));
    assert_ne!(rows[0].batch_id, rows[2].batch_id);
    assert_eq!(rows[0].batch_id, rows[1].batch_id);
}

#[tokio::test]
async fn only_chunks_with_authorized_targets_contribute_results() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2", "3"])).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let action = Action::new("Feature")
        .can_run(|_, model| model.id == "2")
        .handle(move |invocation| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({ "featured": ids(&invocation.models) })) }
        });

    let request = ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All);
    let response = DispatchAction::new(request, action, ActionFields::new(), memory.runtime)
        .handle_request(ActionMethod::Handle, 1)
        .dispatch()
        .await
        .unwrap();

    assert!(response.was_executed());
    assert_eq!(response.results(), [json!({ "featured": ["2"] })]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memory.ledger.len().await, 1);
}

#[tokio::test]
async fn standalone_action_runs_once_without_targets() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let action = Action::new("Rebuild Search Index")
        .standalone()
        .handle(move |invocation| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert!(invocation.models.is_empty());
                Ok(ActionResponse::message("Index rebuilt").to_json())
            }
        });

    let reply = action
        .handle_request(ActionRequest::standalone(Actor::new("1"), "Post"), &memory.runtime)
        .await
        .unwrap();

    assert_eq!(reply, json!({ "message": "Index rebuilt" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(memory.ledger.is_empty().await);
}

#[tokio::test]
async fn handler_precedence_picks_callback_then_type_then_default() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory
        .store
        .save_all([Model::new("App\\Models\\Invoice", "1")])
        .await;
    let request = || {
        ActionRequest::new(
            Actor::new("1"),
            "App\\Models\\Invoice",
            TargetSelection::Ids(vec!["1".into()]),
        )
    };

    let generic = Action::new("Send").handle(|_| async { Ok(json!("handle")) });
    let typed = generic
        .clone()
        .handle_for("Invoice", |_| async { Ok(json!("handleForInvoice")) });
    let callback = Action::using("Send", |_| async { Ok(json!("callback")) })
        .handle_for("Invoice", |_| async { Ok(json!("handleForInvoice")) })
        .handle(|_| async { Ok(json!("handle")) });

    for (action, expected) in [
        (callback, "callback"),
        (typed, "handleForInvoice"),
        (generic, "handle"),
    ] {
        let reply = action
            .handle_request(request(), &memory.runtime)
            .await
            .unwrap();
        assert_eq!(reply, json!(expected));
    }
}

#[tokio::test]
async fn last_chunk_result_wins_without_then() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2", "3"])).await;

    let action = Action::new("Score")
        .chunk_count(1)
        .handle(|invocation| async move {
            let id: u64 = invocation.models[0].id.parse().unwrap_or_default();
            Ok(json!(id * 10))
        });

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();
    assert_eq!(reply, json!(30));
}

#[tokio::test]
async fn then_receives_flattened_results() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2", "3"])).await;

    let action = Action::new("Export")
        .chunk_count(2)
        .handle(|invocation| async move { Ok(json!(ids(&invocation.models))) })
        .then(|results| json!({ "exported": results }));

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();
    assert_eq!(reply, json!({ "exported": ["1", "2", "3"] }));
}

#[tokio::test]
async fn unauthorized_request_returns_danger_message() {
    let memory = ActionRuntime::in_memory(
        ActionConfig::default().not_authorized_message("Nope."),
    );
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Delete Forever")
        .can_run(|_, _| false)
        .handle(|_| async { Ok(Value::Null) });

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(reply, json!({ "danger": "Nope." }));
    assert!(memory.ledger.is_empty().await);
}

#[tokio::test]
async fn handler_error_leaves_rows_running() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Sync").handle(|_| async {
        Err(resource_actions::ActionError::handler("remote api down"))
    });

    let err = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Handler error: remote api down");

    let rows = memory.ledger.all().await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.status == ActionEventStatus::Running));
}

#[tokio::test]
async fn actions_without_events_write_no_rows() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Touch")
        .without_action_events()
        .handle(|invocation| async move { Ok(json!(invocation.models.len())) });

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(reply, json!(2));
    assert!(memory.ledger.is_empty().await);
}

#[tokio::test]
async fn handlers_can_mark_single_models() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Publish").handle(|invocation| async move {
        invocation
            .mark_as_failed(&invocation.models[1], "missing body")
            .await?;
        Ok(Value::Null)
    });

    action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    let rows = memory.ledger.all().await;
    assert_eq!(rows[0].status, ActionEventStatus::Finished);
    assert_eq!(rows[1].status, ActionEventStatus::Failed);
    assert_eq!(rows[1].exception, "missing body");
}

#[tokio::test]
async fn fields_are_resolved_and_stored_on_rows() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1"])).await;

    let action = Action::new("Reject")
        .field(resource_actions::Field::text("Reason").required())
        .handle(|invocation| async move {
            Ok(json!(invocation.fields.get_str("reason").unwrap_or_default()))
        });

    let missing = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::Ids(vec!["1".into()])),
            &memory.runtime,
        )
        .await
        .unwrap_err();
    assert!(missing.to_string().contains("The Reason field is required."));

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::Ids(vec!["1".into()]))
                .with_field("reason", json!("spam")),
            &memory.runtime,
        )
        .await
        .unwrap();
    assert_eq!(reply, json!("spam"));

    let rows = memory.ledger.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].fields, json!({ "reason": "spam" }));
}

#[tokio::test]
async fn sole_actions_reject_multiple_targets() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Impersonate")
        .sole()
        .handle(|_| async { Ok(Value::Null) });

    let err = action
        .handle_request(
            ActionRequest::new(
                Actor::new("1"),
                "Post",
                TargetSelection::Ids(vec!["1".into(), "2".into()]),
            ),
            &memory.runtime,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, resource_actions::ActionError::Validation(_)));
}

#[tokio::test]
async fn custom_dispatch_replaces_chunking() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1", "2"])).await;

    let action = Action::new("Bulk Sync")
        .dispatch_request_using(|request, _fields, _runtime| async move {
            Ok(Response::new().successful(Some(json!(format!("synced {}", request.model_type)))))
        })
        .handle(|_| async { Ok(json!("chunked")) });

    let reply = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(reply, json!("synced Post"));
    assert!(memory.ledger.is_empty().await);
}

#[tokio::test]
async fn missing_handler_is_reported_before_dispatch() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory.store.save_all(posts(&["1"])).await;

    let err = Action::new("Nothing")
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        resource_actions::ActionError::MissingActionHandler { .. }
    ));
    assert!(memory.ledger.is_empty().await);
}

#[tokio::test]
async fn canned_response_actions_reply_without_ledger_rows() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());

    let reply = Action::download("/exports/7.csv", "users.csv")
        .handle_request(
            ActionRequest::standalone(Actor::new("1"), "User"),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(
        reply,
        ActionResponse::download("/exports/7.csv", "users.csv").to_json()
    );
    assert!(memory.ledger.is_empty().await);

    let message = Action::message("Saved");
    assert!(message.is_standalone());
    assert_eq!(
        serde_json::to_value(&message).unwrap()["withoutConfirmation"],
        json!(true)
    );
}

#[tokio::test]
async fn mixed_primary_keys_are_each_handled_once() {
    let memory = ActionRuntime::in_memory(ActionConfig::default());
    memory
        .store
        .save_all(["10", "1a", "2", "b", "3"].map(|id| Model::new("Post", id)))
        .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let action = Action::new("Touch").chunk_count(1).handle(move |invocation| {
        recorder.lock().unwrap().extend(ids(&invocation.models));
        async { Ok(Value::Null) }
    });

    action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &memory.runtime,
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), ["2", "3", "10", "1a", "b"]);
    assert_eq!(memory.ledger.len().await, 5);
}

/// Ledger whose batch writes always fail; everything else is delegated.
struct ReadOnlyLedger(InMemoryActionEventLedger);

#[async_trait]
impl ActionEventLedger for ReadOnlyLedger {
    async fn insert(&self, _: Vec<NewActionEvent>) -> resource_actions::Result<Vec<ActionEvent>> {
        Err(ActionError::Ledger("ledger is read-only".into()))
    }

    async fn prune(
        &self,
        actionables: &[(String, String)],
        limit: usize,
    ) -> resource_actions::Result<u64> {
        self.0.prune(actionables, limit).await
    }

    async fn create_for_models(
        &self,
        _: Vec<NewActionEvent>,
        _: usize,
    ) -> resource_actions::Result<Vec<ActionEvent>> {
        Err(ActionError::Ledger("ledger is read-only".into()))
    }

    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> resource_actions::Result<u64> {
        self.0.update_batch_status(batch_id, status, exception).await
    }

    async fn update_model_status(
        &self,
        batch_id: Uuid,
        model: &ModelKey,
        status: ActionEventStatus,
        exception: Option<String>,
    ) -> resource_actions::Result<u64> {
        self.0.update_model_status(batch_id, model, status, exception).await
    }

    async fn for_batch(&self, batch_id: Uuid) -> resource_actions::Result<Vec<ActionEvent>> {
        self.0.for_batch(batch_id).await
    }

    async fn for_actionable(
        &self,
        actionable_type: &str,
        actionable_id: &str,
    ) -> resource_actions::Result<Vec<ActionEvent>> {
        self.0.for_actionable(actionable_type, actionable_id).await
    }

    async fn unfinished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> resource_actions::Result<Vec<ActionEvent>> {
        self.0.unfinished_before(cutoff).await
    }
}

#[tokio::test]
async fn ledger_write_failure_stops_the_chunk_before_the_handler() {
    let store = Arc::new(InMemoryModelStore::new());
    store.save_all(posts(&["1", "2"])).await;
    let runtime = ActionRuntime::new(
        Arc::new(ReadOnlyLedger(InMemoryActionEventLedger::new())),
        Arc::new(InMemoryQueue::new()),
        store,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let action = Action::new("Archive").handle(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Null) }
    });

    let err = action
        .handle_request(
            ActionRequest::new(Actor::new("1"), "Post", TargetSelection::All),
            &runtime,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::Ledger(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
