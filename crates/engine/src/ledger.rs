//! Idempotency ledger on top of an [`ExecutionLedger`] store.
//!
//! Reads decide whether an action is redundant; writes are compare-and-set
//! on `last_executed_at` so two concurrent runs cannot lose an update.

use std::sync::Arc;

use adpilot_core::ledger::{skip_reason, ExecutionRecord, LedgerEntry, SkipReason};
use adpilot_core::metrics::{EntityState, EntityType};
use adpilot_core::rule::ActionType;
use adpilot_core::types::DbId;

use crate::error::EngineError;
use crate::ports::{ExecutionLedger, LedgerWrite};

/// Guarded writes give up after this many conflicts in a row.
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of [`IdempotencyLedger::should_execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerDecision {
    Execute,
    Skip(SkipReason),
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn ExecutionLedger>,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn ExecutionLedger>) -> Self {
        Self { store }
    }

    pub async fn find(
        &self,
        rule_id: DbId,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        self.store.find(rule_id, entity_type, entity_id).await
    }

    /// Check `previous` (the record for this rule and entity) against the
    /// entity's current state.
    pub fn should_execute(
        previous: Option<&ExecutionRecord>,
        action: ActionType,
        target_labels: &[String],
        state: &EntityState,
    ) -> LedgerDecision {
        match skip_reason(previous, action, target_labels, state) {
            Some(reason) => LedgerDecision::Skip(reason),
            None => LedgerDecision::Execute,
        }
    }

    /// Write a successful action, retrying on a concurrent update.
    ///
    /// `previous` is the record the caller last saw. On conflict the record
    /// is re-read and the write repeated against the fresh value.
    pub async fn record(
        &self,
        entry: &LedgerEntry,
        previous: Option<&ExecutionRecord>,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut expected = previous.map(|p| p.last_executed_at);
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.store.write_if_unchanged(entry, expected).await? {
                LedgerWrite::Applied(record) => return Ok(record),
                LedgerWrite::Conflict => {
                    tracing::debug!(
                        rule_id = entry.rule_id,
                        entity_id = %entry.entity_id,
                        attempt,
                        "Ledger record changed concurrently, re-reading"
                    );
                    expected = self
                        .store
                        .find(entry.rule_id, entry.entity_type, &entry.entity_id)
                        .await?
                        .map(|r| r.last_executed_at);
                }
            }
        }
        Err(EngineError::Ledger(format!(
            "record for rule {} entity {} kept changing after {MAX_WRITE_ATTEMPTS} attempts",
            entry.rule_id, entry.entity_id
        )))
    }
}
