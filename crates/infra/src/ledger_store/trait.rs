use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use mutua_core::{DeathId, DomainError, ObligationId};
use mutua_dues::{EntityRef, KindTag, Obligation, ObligationCommand, ObligationEvent, Payment};

use super::query::{JournalFilter, ObligationFilter, Page, Pagination};

/// Obligation store operation error.
///
/// Infrastructure failures, plus `Rejected` for a business decision taken
/// against freshly-locked state (not found, overpayment, duplicate, ...).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row lock could not be obtained in time, or the backend aborted on a
    /// serialization failure. Safe to retry.
    #[error("lock contention: {0}")]
    Concurrency(String),

    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row violates a ledger invariant.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl StoreError {
    pub fn poisoned() -> Self {
        StoreError::Runtime("lock poisoned".to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Concurrency(_))
    }
}

/// Result of a committed mutation: the state after the commit and the events it applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub obligation: Obligation,
    pub events: Vec<ObligationEvent>,
}

/// Result of a duplicate-skipping bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedBatch {
    pub created: Vec<Obligation>,
    /// Rows whose duplicate key turned out to be taken by the time of the insert.
    pub skipped: usize,
}

/// Durable obligation store and payment journal.
///
/// Every mutation of an existing obligation goes through [`LedgerStore::execute`],
/// which re-reads the obligation under an exclusive lock, lets the aggregate
/// decide, persists the resulting events and refreshes the cached balance
/// before releasing the lock. Two concurrent payments therefore never both
/// pass the remaining-balance check.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new obligation.
    ///
    /// Fails with `Rejected(Conflict)` if its duplicate key is already held by a
    /// live obligation.
    async fn insert(&self, obligation: Obligation) -> Result<(), StoreError>;

    /// Insert generated obligations for one death, skipping every row whose
    /// duplicate key is already live. Never fails because of a duplicate.
    async fn insert_generated(
        &self,
        death_id: DeathId,
        kind: KindTag,
        obligations: Vec<Obligation>,
    ) -> Result<GeneratedBatch, StoreError>;

    /// Entities already holding a live obligation of `kind` for `death_id`.
    async fn live_entities_for_death(
        &self,
        death_id: DeathId,
        kind: KindTag,
    ) -> Result<HashSet<EntityRef>, StoreError>;

    async fn load(&self, id: ObligationId) -> Result<Option<Obligation>, StoreError>;

    /// Filtered, paginated listing, newest first.
    async fn list(
        &self,
        filter: &ObligationFilter,
        pagination: Pagination,
    ) -> Result<Page<Obligation>, StoreError>;

    /// Every obligation matching the filter (read-side aggregation).
    async fn scan(&self, filter: &ObligationFilter) -> Result<Vec<Obligation>, StoreError>;

    /// Run a command against one obligation atomically.
    async fn execute(&self, command: ObligationCommand) -> Result<Committed, StoreError>;

    /// Physically remove an obligation that has no payments.
    async fn delete(&self, id: ObligationId) -> Result<(), StoreError>;

    /// Journal entries, newest first.
    async fn journal(
        &self,
        filter: &JournalFilter,
        pagination: Pagination,
    ) -> Result<Page<Payment>, StoreError>;
}

#[async_trait::async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn insert(&self, obligation: Obligation) -> Result<(), StoreError> {
        (**self).insert(obligation).await
    }

    async fn insert_generated(
        &self,
        death_id: DeathId,
        kind: KindTag,
        obligations: Vec<Obligation>,
    ) -> Result<GeneratedBatch, StoreError> {
        (**self).insert_generated(death_id, kind, obligations).await
    }

    async fn live_entities_for_death(
        &self,
        death_id: DeathId,
        kind: KindTag,
    ) -> Result<HashSet<EntityRef>, StoreError> {
        (**self).live_entities_for_death(death_id, kind).await
    }

    async fn load(&self, id: ObligationId) -> Result<Option<Obligation>, StoreError> {
        (**self).load(id).await
    }

    async fn list(
        &self,
        filter: &ObligationFilter,
        pagination: Pagination,
    ) -> Result<Page<Obligation>, StoreError> {
        (**self).list(filter, pagination).await
    }

    async fn scan(&self, filter: &ObligationFilter) -> Result<Vec<Obligation>, StoreError> {
        (**self).scan(filter).await
    }

    async fn execute(&self, command: ObligationCommand) -> Result<Committed, StoreError> {
        (**self).execute(command).await
    }

    async fn delete(&self, id: ObligationId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn journal(
        &self,
        filter: &JournalFilter,
        pagination: Pagination,
    ) -> Result<Page<Payment>, StoreError> {
        (**self).journal(filter, pagination).await
    }
}
