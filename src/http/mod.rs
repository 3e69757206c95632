//! HTTP adapter for the action pipeline.
//!
//! Routes:
//! - `GET /resources/:resource/actions` lists the actions the actor may see
//! - `POST /resources/:resource/action?action=<uri-key>` runs one action
//!
//! The acting user is read from the `x-actor-id` header (and the optional
//! `x-actor-name`).

pub mod error;

pub use error::{ErrorResponse, HttpError};

use crate::action::{Action, ActionRequest, ActionResponse, PivotContext};
use crate::core::Actor;
use crate::runtime::ActionRuntime;
use crate::storage::TargetSelection;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Level, event};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";

/// Join table a parent resource exposes pivot actions through.
#[derive(Debug, Clone)]
pub struct PivotRelation {
    pub pivot_type: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
    pub actions: Vec<Action>,
}

impl PivotRelation {
    pub fn new(
        pivot_type: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            pivot_type: pivot_type.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// Actions declared by one resource.
#[derive(Debug, Clone)]
pub struct ResourceActions {
    pub model_type: String,
    pub actions: Vec<Action>,
    pub relations: HashMap<String, PivotRelation>,
}

impl ResourceActions {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            actions: Vec::new(),
            relations: HashMap::new(),
        }
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn relation(mut self, relationship: impl Into<String>, relation: PivotRelation) -> Self {
        self.relations.insert(relationship.into(), relation);
        self
    }

    pub fn find_action(&self, uri_key: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.uri_key() == uri_key)
    }
}

/// Resource uri key -> declared actions.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    resources: HashMap<String, ResourceActions>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource: impl Into<String>, actions: ResourceActions) -> Self {
        self.resources.insert(resource.into(), actions);
        self
    }

    pub fn resource(&self, resource: &str) -> Option<&ResourceActions> {
        self.resources.get(resource)
    }

    fn require(&self, resource: &str) -> error::Result<&ResourceActions> {
        self.resource(resource)
            .ok_or_else(|| HttpError::NotFound(format!("resource '{resource}' not found")))
    }
}

#[derive(Clone)]
struct HttpState {
    registry: Arc<ActionRegistry>,
    runtime: ActionRuntime,
}

pub fn router(registry: ActionRegistry, runtime: ActionRuntime) -> axum::Router {
    let state = HttpState {
        registry: Arc::new(registry),
        runtime,
    };

    axum::Router::new()
        .route("/resources/:resource/actions", get(list_actions))
        .route("/resources/:resource/action", post(run_action))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViaQuery {
    via_resource: Option<String>,
    via_relationship: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunActionQuery {
    action: String,
}

/// `"all"`, a comma-separated id list, or a JSON array of ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceSelection {
    Keyword(String),
    List(Vec<JsonValue>),
}

impl Default for ResourceSelection {
    fn default() -> Self {
        ResourceSelection::List(Vec::new())
    }
}

impl ResourceSelection {
    fn into_selection(self) -> TargetSelection {
        match self {
            ResourceSelection::Keyword(keyword) if keyword == "all" => TargetSelection::All,
            ResourceSelection::Keyword(list) => TargetSelection::Ids(
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            ResourceSelection::List(ids) => {
                TargetSelection::Ids(ids.iter().filter_map(json_key).collect())
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunActionBody {
    #[serde(default)]
    resources: ResourceSelection,
    #[serde(default)]
    fields: JsonMap<String, JsonValue>,
    via_resource: Option<String>,
    via_resource_id: Option<JsonValue>,
    via_relationship: Option<String>,
    #[serde(default)]
    pivot_action: bool,
}

fn json_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(key) => Some(key.clone()),
        JsonValue::Number(key) => Some(key.to_string()),
        _ => None,
    }
}

fn actor_from(headers: &HeaderMap) -> error::Result<Actor> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HttpError::Unauthorized("missing actor".to_string()))?;

    let actor = Actor::new(id);
    Ok(
        match headers
            .get(ACTOR_NAME_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some(name) => actor.named(name),
            None => actor,
        },
    )
}

async fn list_actions(
    State(state): State<HttpState>,
    Path(resource): Path<String>,
    Query(via): Query<ViaQuery>,
    headers: HeaderMap,
) -> error::Result<Json<JsonValue>> {
    let actor = actor_from(&headers)?;
    let entry = state.registry.require(&resource)?;

    let visible = |actions: &[Action]| -> Vec<JsonValue> {
        actions
            .iter()
            .filter(|action| action.authorized_to_see(&actor))
            .filter_map(|action| serde_json::to_value(action).ok())
            .collect()
    };

    let pivot_actions = match (&via.via_resource, &via.via_relationship) {
        (Some(parent), Some(relationship)) => state
            .registry
            .resource(parent)
            .and_then(|parent| parent.relations.get(relationship))
            .map(|relation| visible(&relation.actions))
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    Ok(Json(json!({
        "actions": visible(&entry.actions),
        "pivotActions": pivot_actions,
    })))
}

/// An empty body means "no input"; anything else must be a valid run body.
fn parse_run_body(bytes: &[u8]) -> error::Result<RunActionBody> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunActionBody::default());
    }
    serde_json::from_slice(bytes)
        .map_err(|err| HttpError::Input(format!("malformed request body: {err}")))
}

async fn run_action(
    State(state): State<HttpState>,
    Path(resource): Path<String>,
    Query(query): Query<RunActionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> error::Result<Response> {
    let actor = actor_from(&headers)?;
    let body = parse_run_body(&body)?;
    let entry = state.registry.require(&resource)?;

    let mut request = ActionRequest::new(
        actor.clone(),
        entry.model_type.clone(),
        body.resources.into_selection(),
    );
    request.input = body.fields;

    let found = if body.pivot_action {
        let (parent_key, relationship) = match (&body.via_resource, &body.via_relationship) {
            (Some(parent), Some(relationship)) => (parent.as_str(), relationship.as_str()),
            _ => {
                return Err(HttpError::Input(
                    "pivot actions need viaResource and viaRelationship".to_string(),
                ));
            }
        };
        let parent_id = body
            .via_resource_id
            .as_ref()
            .and_then(json_key)
            .ok_or_else(|| HttpError::Input("pivot actions need viaResourceId".to_string()))?;
        let parent = state.registry.require(parent_key)?;
        let relation = parent.relations.get(relationship).ok_or_else(|| {
            HttpError::NotFound(format!("relationship '{relationship}' not found"))
        })?;

        request = request.via_pivot(PivotContext {
            parent_type: parent.model_type.clone(),
            parent_id,
            relationship: relationship.to_string(),
            pivot_type: relation.pivot_type.clone(),
            foreign_pivot_key: relation.foreign_pivot_key.clone(),
            related_pivot_key: relation.related_pivot_key.clone(),
        });
        relation
            .actions
            .iter()
            .find(|action| action.uri_key() == query.action)
    } else {
        entry.find_action(&query.action)
    };
    let action = found
        .ok_or_else(|| HttpError::NotFound(format!("action '{}' not found", query.action)))?;

    if !action.authorized_to_see(&actor) {
        return Err(HttpError::NotFound(format!(
            "action '{}' not found",
            query.action
        )));
    }

    let result = action.handle_request(request, &state.runtime).await?;
    event!(Level::INFO, action = %action.name(), actor = %actor.id, "action request handled");

    if ActionResponse::is_danger_payload(&result) {
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(result)).into_response());
    }
    if result.is_null() {
        let message = ActionResponse::message(state.runtime.config.executed_message.clone());
        return Ok(Json(message.to_json()).into_response());
    }
    Ok(Json(result).into_response())
}
