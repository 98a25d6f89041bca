use serde::{Deserialize, Serialize};
use thiserror::Error;

use mutua_core::{DeathId, DomainError};

use crate::ledger_store::StoreError;
use crate::registry::RegistryError;

/// Error returned by ledger services.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("death not found: {0}")]
    EventNotFound(DeathId),

    /// Lock contention persisted after the internal retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(domain) => LedgerError::Domain(domain),
            StoreError::Concurrency(msg) => LedgerError::ConcurrencyConflict(msg),
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    /// Client-visible status class (HTTP semantics).
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Domain(DomainError::NotFound(_)) | LedgerError::EventNotFound(_) => 404,
            LedgerError::Domain(DomainError::Conflict(_)) => 409,
            LedgerError::Domain(DomainError::InvariantViolation(_)) => 500,
            LedgerError::Domain(_) => 400,
            LedgerError::ConcurrencyConflict(_) | LedgerError::Registry(RegistryError::Unavailable(_)) => 503,
            LedgerError::Registry(RegistryError::Corrupt(_)) => 500,
            LedgerError::Store(StoreError::Backend(_)) => 503,
            LedgerError::Store(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Domain(err) => err.code(),
            LedgerError::EventNotFound(_) => "event_not_found",
            LedgerError::ConcurrencyConflict(_) => "concurrency_conflict",
            LedgerError::Registry(RegistryError::Unavailable(_)) => "registry_unavailable",
            LedgerError::Registry(RegistryError::Corrupt(_)) => "registry_corrupt",
            LedgerError::Store(StoreError::Backend(_)) => "store_unavailable",
            LedgerError::Store(_) => "internal_error",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable error payload for the surrounding API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
