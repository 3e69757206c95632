// ============================================================================
// Chunk Unit of Work
// ============================================================================
//
// A chunk touches the ledger in two steps that commit independently:
//
//   record  -> insert the chunk's rows and prune old ones, all or nothing
//   commit  -> move the batch's still-open rows to `finished`
//
// A handler error between the two drops the transaction uncommitted: the
// recorded rows stay open and the error propagates to the caller.
//
// ============================================================================

use crate::core::{Model, Result};
use crate::ledger::{ActionEvent, ActionEventStatus, LedgerScope, NewActionEvent, SharedLedger};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct Transaction {
    /// Time-ordered id shared by every ledger row of the chunk
    batch_id: Uuid,
    ledger: SharedLedger,
    recorded: usize,
    start_time: Instant,
}

impl Transaction {
    /// Open a unit of work with a fresh batch id
    pub fn begin(ledger: SharedLedger) -> Self {
        Self::with_batch_id(ledger, Uuid::now_v7())
    }

    pub fn with_batch_id(ledger: SharedLedger, batch_id: Uuid) -> Self {
        Self {
            batch_id,
            ledger,
            recorded: 0,
            start_time: Instant::now(),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Rows written by [`Transaction::record`] so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Writes one `status` row per model under this batch id, pruning each
    /// touched actionable down to `retention_limit` (never below 1) in the
    /// same ledger call.
    ///
    /// # Errors
    /// Returns the ledger error; no row is written in that case
    pub async fn record(
        &mut self,
        scope: &LedgerScope,
        models: &[Model],
        status: ActionEventStatus,
        retention_limit: usize,
    ) -> Result<Vec<ActionEvent>> {
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let rows = NewActionEvent::for_models(scope, self.batch_id, models, status);
        let created = self
            .ledger
            .create_for_models(rows, retention_limit.max(1))
            .await?;
        self.recorded += created.len();
        Ok(created)
    }

    /// Marks the batch's open rows `finished`, returning how many moved.
    /// A transaction that recorded nothing commits without a ledger write.
    pub async fn commit(self) -> Result<u64> {
        if self.recorded == 0 {
            return Ok(0);
        }
        self.ledger.mark_batch_as_finished(self.batch_id).await
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("batch_id", &self.batch_id)
            .field("recorded", &self.recorded)
            .finish_non_exhaustive()
    }
}
