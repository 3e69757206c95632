// ============================================================================
// Action Runtime
// ============================================================================
//
// Collaborators an action dispatch needs, injected once and cloned into
// every dispatcher and queued job.
//
// ============================================================================

use crate::config::ActionConfig;
use crate::ledger::{InMemoryActionEventLedger, SharedLedger};
use crate::queue::{InMemoryQueue, SharedQueue};
use crate::storage::{
    AllowAll, InMemoryModelStore, ResourceGate, SharedModelSource, SharedResourceGate,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct ActionRuntime {
    pub ledger: SharedLedger,
    pub queue: SharedQueue,
    pub models: SharedModelSource,
    pub gate: SharedResourceGate,
    pub config: Arc<ActionConfig>,
}

impl ActionRuntime {
    /// Runtime with an allow-all resource gate and default configuration.
    pub fn new(ledger: SharedLedger, queue: SharedQueue, models: SharedModelSource) -> Self {
        Self {
            ledger,
            queue,
            models,
            gate: Arc::new(AllowAll),
            config: Arc::new(ActionConfig::default()),
        }
    }

    pub fn with_gate<G>(mut self, gate: G) -> Self
    where
        G: ResourceGate + 'static,
    {
        self.gate = Arc::new(gate);
        self
    }

    pub fn with_config(mut self, config: ActionConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Runtime over in-memory collaborators, which are returned alongside
    /// for direct inspection.
    pub fn in_memory(config: ActionConfig) -> InMemoryRuntime {
        let ledger = Arc::new(InMemoryActionEventLedger::new());
        let queue = Arc::new(InMemoryQueue::from_config(&config));
        let store = Arc::new(InMemoryModelStore::new());
        let runtime = Self::new(ledger.clone(), queue.clone(), store.clone()).with_config(config);

        InMemoryRuntime {
            runtime,
            ledger,
            queue,
            store,
        }
    }
}

impl std::fmt::Debug for ActionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// In-memory runtime plus typed handles to its collaborators.
#[derive(Clone)]
pub struct InMemoryRuntime {
    pub runtime: ActionRuntime,
    pub ledger: Arc<InMemoryActionEventLedger>,
    pub queue: Arc<InMemoryQueue>,
    pub store: Arc<InMemoryModelStore>,
}

impl InMemoryRuntime {
    pub fn with_gate<G>(mut self, gate: G) -> Self
    where
        G: ResourceGate + 'static,
    {
        self.runtime = self.runtime.with_gate(gate);
        self
    }
}
