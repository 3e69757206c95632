use serde::Serialize;
use serde_json::Value as JsonValue;

/// Outcome of one dispatch.
///
/// `was_executed` is the only truth signal: results may be empty for an
/// executed dispatch and non-empty for a failed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    was_executed: bool,
    results: Vec<JsonValue>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the dispatch executed. `None`/null become no results, an array
    /// becomes its elements, anything else a single result.
    pub fn successful(mut self, results: Option<JsonValue>) -> Self {
        self.was_executed = true;
        self.results = match results {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items,
            Some(other) => vec![other],
        };
        self
    }

    /// Marks the dispatch not executed, leaving results untouched.
    pub fn failed(mut self) -> Self {
        self.was_executed = false;
        self
    }

    pub fn was_executed(&self) -> bool {
        self.was_executed
    }

    pub fn results(&self) -> &[JsonValue] {
        &self.results
    }

    pub fn into_results(self) -> Vec<JsonValue> {
        self.results
    }
}
