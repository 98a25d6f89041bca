//! Obligation store and payment journal.
//!
//! The store owns the only write path for obligations. Callers hand it a
//! command; the store locks the obligation, lets the aggregate decide and
//! persists the outcome in one step.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::{PostgresLedgerStore, connect_database};
pub use query::{DEFAULT_PAGE_SIZE, JournalFilter, MAX_PAGE_SIZE, ObligationFilter, Page, Pagination};
pub use r#trait::{Committed, GeneratedBatch, LedgerStore, StoreError};
