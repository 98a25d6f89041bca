//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only (validation, ledger rules, conflicts).
/// Storage and transport failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (non-positive amount, missing reference, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced obligation, member, lineage or payment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The payment would push the amount paid above the amount owed.
    #[error("payment of {requested} exceeds the remaining balance of {remaining}")]
    Overpayment { requested: u64, remaining: u64 },

    /// Nothing remains to be paid on the obligation.
    #[error("obligation is already settled")]
    AlreadySettled,

    /// The obligation has been cancelled; no money can move against it.
    #[error("obligation is cancelled")]
    CancelledObligation,

    /// Core fields can only change while the obligation is unpaid.
    #[error("obligation can no longer be modified: {0}")]
    ImmutableState(String),

    /// The fine has no individual target left to transfer to a lineage.
    #[error("no transferable individual target")]
    NoTransferableTarget,

    /// A settled fine is never reassigned.
    #[error("fine is already paid")]
    AlreadyPaid,

    /// A domain invariant was violated (overflow, inconsistent state).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflicting record already exists (duplicate obligation for an event).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        Self::ImmutableState(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::NotFound(_) => "not_found",
            DomainError::Overpayment { .. } => "overpayment",
            DomainError::AlreadySettled => "already_settled",
            DomainError::CancelledObligation => "cancelled_obligation",
            DomainError::ImmutableState(_) => "immutable_state",
            DomainError::NoTransferableTarget => "no_transferable_target",
            DomainError::AlreadyPaid => "already_paid",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::Conflict(_) => "duplicate_obligation",
        }
    }

    /// Whether the error is a business-rule rejection (as opposed to bad input or a lookup miss).
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            DomainError::Overpayment { .. }
                | DomainError::AlreadySettled
                | DomainError::CancelledObligation
                | DomainError::ImmutableState(_)
                | DomainError::NoTransferableTarget
                | DomainError::AlreadyPaid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            DomainError::Overpayment { requested: 600, remaining: 500 }.code(),
            "overpayment"
        );
        assert_eq!(DomainError::AlreadySettled.code(), "already_settled");
        assert_eq!(DomainError::NoTransferableTarget.code(), "no_transferable_target");
        assert_eq!(DomainError::validation("x").code(), "validation_error");
    }

    #[test]
    fn overpayment_message_names_both_amounts() {
        let msg = DomainError::Overpayment { requested: 600, remaining: 500 }.to_string();
        assert!(msg.contains("600"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn business_rules_are_classified() {
        assert!(DomainError::AlreadyPaid.is_business_rule());
        assert!(!DomainError::not_found("obligation").is_business_rule());
        assert!(!DomainError::validation("amount").is_business_rule());
    }
}
