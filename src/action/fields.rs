use crate::core::{ActionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;

/// A parameter the UI collects before running an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub attribute: String,
    pub name: String,
    pub component: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            name: name.into(),
            component: "text-field".to_string(),
            required: false,
            default: None,
            help: None,
        }
    }

    /// Text input whose attribute is the snake_case form of `name`.
    pub fn text(name: impl Into<String>) -> Self {
        let name = name.into();
        let attribute = snake_case(&name);
        Self::new(name, attribute)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::text(name).component("boolean-field")
    }

    pub fn textarea(name: impl Into<String>) -> Self {
        Self::text(name).component("textarea-field")
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn help(mut self, text: impl Into<String>) -> Self {
        self.help = Some(text.into());
        self
    }

    /// Reads this field from submitted input, applying the default and
    /// the required rule. Blank strings count as missing.
    pub fn resolve(&self, input: &JsonMap<String, JsonValue>) -> Result<JsonValue> {
        let submitted = input
            .get(&self.attribute)
            .filter(|value| !is_blank(value))
            .cloned();

        match submitted.or_else(|| self.default.clone()) {
            Some(value) => Ok(value),
            None if self.required => Err(ActionError::Validation(format!(
                "The {} field is required.",
                self.name
            ))),
            None => Ok(JsonValue::Null),
        }
    }
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push('_');
        }
        out.push_str(&word.to_lowercase());
    }
    out
}

/// Resolved parameter values for one action run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionFields {
    values: BTreeMap<String, JsonValue>,
}

impl ActionFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every declared field against the submitted input.
    pub fn resolve(fields: &[Field], input: &JsonMap<String, JsonValue>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for field in fields {
            values.insert(field.attribute.clone(), field.resolve(input)?);
        }
        Ok(Self { values })
    }

    pub fn with(mut self, attribute: impl Into<String>, value: JsonValue) -> Self {
        self.values.insert(attribute.into(), value);
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&JsonValue> {
        self.values.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(JsonValue::as_str)
    }

    pub fn get_bool(&self, attribute: &str) -> Option<bool> {
        self.get(attribute).and_then(JsonValue::as_bool)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.values.iter()
    }

    /// Snapshot written into the ledger `fields` column.
    pub fn for_storage(&self) -> JsonValue {
        JsonValue::Object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: JsonValue) -> JsonMap<String, JsonValue> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn text_field_derives_snake_case_attribute() {
        let field = Field::text("Notify Customer");
        assert_eq!(field.attribute, "notify_customer");
        assert_eq!(field.component, "text-field");
    }

    #[test]
    fn defaults_fill_blank_input() {
        let fields = vec![
            Field::text("Reason").default_value(json!("cleanup")),
            Field::boolean("Notify"),
        ];
        let resolved = ActionFields::resolve(&fields, &input(json!({"reason": "  "}))).unwrap();

        assert_eq!(resolved.get_str("reason"), Some("cleanup"));
        assert_eq!(resolved.get("notify"), Some(&JsonValue::Null));
        assert_eq!(
            resolved.for_storage(),
            json!({"notify": null, "reason": "cleanup"})
        );
    }

    #[test]
    fn missing_required_field_is_a_validation_error() {
        let fields = vec![Field::text("Reason").required()];
        let err = ActionFields::resolve(&fields, &input(json!({}))).unwrap_err();
        assert!(matches!(err, ActionError::Validation(message) if message.contains("Reason")));
    }
}
