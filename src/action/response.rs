use serde::{Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

/// Reply payloads an action can hand back to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse {
    Message(String),
    Danger(String),
    Deleted,
    Redirect(String),
    Visit { path: String, options: JsonValue },
    OpenInNewTab(String),
    Download { url: String, name: String },
    Modal { component: String, payload: JsonValue },
}

impl ActionResponse {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self::Danger(text.into())
    }

    pub fn deleted() -> Self {
        Self::Deleted
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect(url.into())
    }

    pub fn visit(path: impl Into<String>, options: JsonValue) -> Self {
        Self::Visit {
            path: path.into(),
            options,
        }
    }

    pub fn open_in_new_tab(url: impl Into<String>) -> Self {
        Self::OpenInNewTab(url.into())
    }

    pub fn download(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            name: name.into(),
        }
    }

    pub fn modal(component: impl Into<String>, payload: JsonValue) -> Self {
        Self::Modal {
            component: component.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Message(text) => json!({ "message": text }),
            Self::Danger(text) => json!({ "danger": text }),
            Self::Deleted => json!({ "deleted": true }),
            Self::Redirect(url) => json!({ "redirect": url }),
            Self::Visit { path, options } => json!({
                "visit": { "path": path, "options": options }
            }),
            Self::OpenInNewTab(url) => json!({ "openInNewTab": url }),
            Self::Download { url, name } => json!({ "download": url, "name": name }),
            Self::Modal { component, payload } => {
                let mut body = JsonMap::new();
                if let JsonValue::Object(payload) = payload {
                    body.extend(payload.clone());
                }
                body.insert("modal".to_string(), JsonValue::String(component.clone()));
                JsonValue::Object(body)
            }
        }
    }

    pub fn is_danger(&self) -> bool {
        matches!(self, Self::Danger(_))
    }

    /// True when an arbitrary handler result is a danger payload.
    pub fn is_danger_payload(value: &JsonValue) -> bool {
        value.get("danger").is_some_and(JsonValue::is_string)
    }
}

impl From<ActionResponse> for JsonValue {
    fn from(response: ActionResponse) -> Self {
        response.to_json()
    }
}

impl Serialize for ActionResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shapes() {
        assert_eq!(
            ActionResponse::message("Done").to_json(),
            json!({"message": "Done"})
        );
        assert_eq!(
            ActionResponse::download("/exports/1.csv", "users.csv").to_json(),
            json!({"download": "/exports/1.csv", "name": "users.csv"})
        );
        assert_eq!(
            ActionResponse::visit("/resources/users/1", json!({"remember": true})).to_json(),
            json!({"visit": {"path": "/resources/users/1", "options": {"remember": true}}})
        );
    }

    #[test]
    fn modal_payload_is_merged_with_component() {
        let body = ActionResponse::modal("confirm-export", json!({"rows": 3})).to_json();
        assert_eq!(body, json!({"modal": "confirm-export", "rows": 3}));
    }

    #[test]
    fn danger_payloads_are_detected() {
        assert!(ActionResponse::danger("nope").is_danger());
        assert!(ActionResponse::is_danger_payload(&json!({"danger": "nope"})));
        assert!(!ActionResponse::is_danger_payload(&json!({"message": "ok"})));
        assert!(!ActionResponse::is_danger_payload(&JsonValue::Null));
    }
}
