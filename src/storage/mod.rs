// ============================================================================
// Storage Capabilities
// ============================================================================
//
// What the action pipeline needs from the host's persistence layer:
// - `ModelSource`: stable-order chunked iteration over a target query
// - `ResourceGate`: the owning resource's "may this actor run actions
//   against this instance" policy
//
// `InMemoryModelStore` implements `ModelSource` for tests and embedding.
//
// ============================================================================

pub mod memory;

pub use memory::InMemoryModelStore;

use crate::core::{Actor, Model, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

pub type SharedModelSource = Arc<dyn ModelSource>;
pub type SharedResourceGate = Arc<dyn ResourceGate>;

/// Which rows of a model type a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSelection {
    /// Every row matching the query.
    All,
    /// Explicitly selected primary keys.
    Ids(Vec<String>),
}

impl TargetSelection {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }

    /// Number of explicitly selected ids, `None` for `All`.
    pub fn explicit_len(&self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Ids(ids) => Some(ids.len()),
        }
    }
}

/// Join-table lookup used by pivot actions.
///
/// Selected ids are related-model keys; the rows returned are pivot rows
/// whose `foreign_pivot_key` equals `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotQuery {
    pub pivot_type: String,
    pub parent_id: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetQuery {
    pub model_type: String,
    pub selection: TargetSelection,
    pub pivot: Option<PivotQuery>,
}

impl TargetQuery {
    pub fn new(model_type: impl Into<String>, selection: TargetSelection) -> Self {
        Self {
            model_type: model_type.into(),
            selection,
            pivot: None,
        }
    }

    pub fn through_pivot(mut self, pivot: PivotQuery) -> Self {
        self.pivot = Some(pivot);
        self
    }

    /// Type of the rows this query yields.
    pub fn row_type(&self) -> &str {
        self.pivot
            .as_ref()
            .map_or(self.model_type.as_str(), |pivot| pivot.pivot_type.as_str())
    }
}

/// Chunked iteration over target models.
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Returns at most `limit` rows with a primary key strictly greater than
    /// `after`, in ascending primary-key order.
    async fn fetch_chunk(
        &self,
        query: &TargetQuery,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Model>>;
}

/// Resource-level policy consulted for non-pivot actions without their own
/// run callback.
pub trait ResourceGate: Send + Sync {
    fn authorized_to_run_action(&self, actor: &Actor, model: &Model, action: &str) -> bool;
}

impl<F> ResourceGate for F
where
    F: Fn(&Actor, &Model, &str) -> bool + Send + Sync,
{
    fn authorized_to_run_action(&self, actor: &Actor, model: &Model, action: &str) -> bool {
        self(actor, model, action)
    }
}

/// Gate that lets every actor through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ResourceGate for AllowAll {
    fn authorized_to_run_action(&self, _actor: &Actor, _model: &Model, _action: &str) -> bool {
        true
    }
}

/// Primary-key order: integer keys first in numeric order, then every
/// other key lexically. Numerically equal keys (`"7"`, `"07"`) fall back to
/// lexical order so distinct keys never compare equal.
pub fn compare_keys(left: &str, right: &str) -> Ordering {
    match (left.parse::<i64>(), right.parse::<i64>()) {
        (Ok(left_num), Ok(right_num)) => left_num.cmp(&right_num).then_with(|| left.cmp(right)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}
