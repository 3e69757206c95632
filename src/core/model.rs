use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;

/// A database-backed record an action can run against.
///
/// `model_type` is the morph alias recorded in the ledger (`"Invoice"`,
/// `"role_user"` for a pivot row, ...). Attributes are kept as a JSON
/// object so the ledger can snapshot them for CRUD events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub model_type: String,
    pub id: String,
    #[serde(default = "empty_object")]
    pub attributes: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(JsonMap::new())
}

impl Model {
    pub fn new(model_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            id: id.into(),
            attributes: empty_object(),
        }
    }

    pub fn with_attributes(mut self, attributes: JsonValue) -> Self {
        self.attributes = match attributes {
            JsonValue::Object(map) => JsonValue::Object(map),
            _ => empty_object(),
        };
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: JsonValue) {
        if !self.attributes.is_object() {
            self.attributes = empty_object();
        }
        if let JsonValue::Object(map) = &mut self.attributes {
            map.insert(name.into(), value);
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&JsonValue> {
        self.attributes.as_object().and_then(|map| map.get(name))
    }

    /// Reads an attribute holding a foreign key, accepting string or numeric storage.
    pub fn attribute_key(&self, name: &str) -> Option<String> {
        match self.attribute(name)? {
            JsonValue::String(value) => Some(value.clone()),
            JsonValue::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.model_type.clone(), self.id.clone())
    }

    /// Type name without any namespace prefix (`App\Models\Invoice` -> `Invoice`).
    pub fn basename(&self) -> &str {
        basename(&self.model_type)
    }
}

pub(crate) fn basename(model_type: &str) -> &str {
    model_type
        .rsplit(['\\', ':', '/'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(model_type)
}

/// (model_type, model_id) identity of one ledger target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub model_type: String,
    pub id: String,
}

impl ModelKey {
    pub fn new(model_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.id)
    }
}

/// The authenticated user running an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
