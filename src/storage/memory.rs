use super::{ModelSource, TargetQuery, compare_keys};
use crate::core::{ActionError, Model, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{Level, event};

/// Model rows grouped by type, kept in process memory.
pub struct InMemoryModelStore {
    tables: RwLock<HashMap<String, HashMap<String, Model>>>,
}

impl Default for InMemoryModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or replaces a row, returning the previous version.
    pub async fn save(&self, model: Model) -> Option<Model> {
        let mut tables = self.tables.write().await;
        tables
            .entry(model.model_type.clone())
            .or_default()
            .insert(model.id.clone(), model)
    }

    pub async fn save_all<I>(&self, models: I)
    where
        I: IntoIterator<Item = Model>,
    {
        let mut tables = self.tables.write().await;
        for model in models {
            tables
                .entry(model.model_type.clone())
                .or_default()
                .insert(model.id.clone(), model);
        }
    }

    /// Merges `changes` into the row's attributes, returning (original, updated).
    pub async fn force_fill(
        &self,
        model_type: &str,
        id: &str,
        changes: JsonValue,
    ) -> Result<(Model, Model)> {
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(model_type)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| ActionError::NotFound(format!("{model_type}:{id}")))?;

        let original = row.clone();
        if let JsonValue::Object(changes) = changes {
            for (name, value) in changes {
                row.set_attribute(name, value);
            }
        }
        Ok((original, row.clone()))
    }

    pub async fn find(&self, model_type: &str, id: &str) -> Option<Model> {
        let tables = self.tables.read().await;
        tables.get(model_type).and_then(|rows| rows.get(id)).cloned()
    }

    /// Every row of a type in primary-key order.
    pub async fn all(&self, model_type: &str) -> Vec<Model> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Model> = tables
            .get(model_type)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|left, right| compare_keys(&left.id, &right.id));
        rows
    }

    pub async fn remove(&self, model_type: &str, id: &str) -> Option<Model> {
        let mut tables = self.tables.write().await;
        tables.get_mut(model_type).and_then(|rows| rows.remove(id))
    }

    pub async fn count(&self, model_type: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(model_type).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl ModelSource for InMemoryModelStore {
    async fn fetch_chunk(
        &self,
        query: &TargetQuery,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Model>> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(query.row_type()) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&Model> = rows
            .values()
            .filter(|model| match &query.pivot {
                None => query.selection.contains(&model.id),
                Some(pivot) => {
                    model.attribute_key(&pivot.foreign_pivot_key).as_deref()
                        == Some(pivot.parent_id.as_str())
                        && model
                            .attribute_key(&pivot.related_pivot_key)
                            .is_some_and(|related| query.selection.contains(&related))
                }
            })
            .filter(|model| after.is_none_or(|after| compare_keys(&model.id, after).is_gt()))
            .collect();

        matching.sort_by(|left, right| compare_keys(&left.id, &right.id));
        let chunk: Vec<Model> = matching.into_iter().take(limit).cloned().collect();

        event!(
            Level::TRACE,
            model_type = query.row_type(),
            after = after.unwrap_or(""),
            rows = chunk.len(),
            "model chunk fetched"
        );
        Ok(chunk)
    }
}
