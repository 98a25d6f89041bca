//! Infrastructure layer: ledger persistence, registries, services, notices.

pub mod config;
pub mod ledger_store;
pub mod notify;
pub mod receipt;
pub mod registry;
pub mod services;

#[cfg(test)]
mod integration_tests;

pub use config::LedgerConfig;
pub use ledger_store::{
    InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, connect_database,
};
pub use notify::{LedgerNotice, LoggingNoticeSink, NoticeEnvelope, NoticeSink, NotificationBroadcaster};
pub use receipt::{PlainTextReceiptRenderer, Receipt, ReceiptRenderer};
pub use registry::{DeathRegistry, InMemoryRegistry, MembershipRegistry, PostgresRegistry};
pub use services::{
    DueGenerator, LedgerError, LedgerQueryService, ObligationService, SettlementService,
};
