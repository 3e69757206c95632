use super::{Action, ActionRequest};
use crate::core::Model;
use crate::storage::ResourceGate;

/// Candidate target models of one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionModelCollection {
    models: Vec<Model>,
}

impl ActionModelCollection {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// Keeps only the models the actor may run `action` against.
    ///
    /// Pivot actions and actions with their own run callback are decided by
    /// the action alone; everything else also needs the resource gate.
    pub fn filter_for_execution(
        self,
        request: &ActionRequest,
        action: &Action,
        gate: &dyn ResourceGate,
    ) -> Self {
        let action_only = request.is_pivot_action() || action.has_run_callback();
        let action_key = action.uri_key();

        let models = self
            .models
            .into_iter()
            .filter(|model| {
                action.authorized_to_run(&request.actor, model)
                    && (action_only
                        || gate.authorized_to_run_action(&request.actor, model, &action_key))
            })
            .collect();

        Self { models }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    pub fn into_models(self) -> Vec<Model> {
        self.models
    }
}

impl From<Vec<Model>> for ActionModelCollection {
    fn from(models: Vec<Model>) -> Self {
        Self::new(models)
    }
}
