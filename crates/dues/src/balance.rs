//! Balance calculator.
//!
//! The single source of truth for paid/remaining amounts and status. Stored
//! status columns are a cache of [`compute`] and must always agree with it.

use serde::{Deserialize, Serialize};

use mutua_core::{Amount, DomainError, DomainResult};

use crate::payment::Payment;

/// Status of an obligation as derived from its journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Cancelled,
    /// Fine reassigned from an individual to a lineage, not yet fully paid.
    Transferred,
}

impl ObligationStatus {
    pub const ALL: [ObligationStatus; 5] = [
        ObligationStatus::Unpaid,
        ObligationStatus::PartiallyPaid,
        ObligationStatus::Paid,
        ObligationStatus::Cancelled,
        ObligationStatus::Transferred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObligationStatus::Unpaid => "unpaid",
            ObligationStatus::PartiallyPaid => "partially_paid",
            ObligationStatus::Paid => "paid",
            ObligationStatus::Cancelled => "cancelled",
            ObligationStatus::Transferred => "transferred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Still something to collect.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ObligationStatus::Unpaid | ObligationStatus::PartiallyPaid | ObligationStatus::Transferred
        )
    }
}

impl core::fmt::Display for ObligationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sticky lifecycle markers that override the payment-derived status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Open,
    /// A fine with at least one transferred target. Overridden only by Paid.
    Transferred,
    /// Terminal. Overrides everything.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amount_owed: Amount,
    pub amount_paid: Amount,
    pub amount_remaining: Amount,
    /// Journal sum of a cancelled obligation; zero otherwise.
    pub written_off: Amount,
    pub status: ObligationStatus,
}

/// Derive the balance of an obligation from its journal.
///
/// Fails with `InvariantViolation` when the journal exceeds the amount owed,
/// which can only happen with corrupt data.
pub fn compute(amount_owed: Amount, payments: &[Payment], standing: Standing) -> DomainResult<Balance> {
    let journal = Amount::sum(payments.iter().map(|p| p.amount))?;
    from_totals(amount_owed, journal, standing)
}

/// Same rules as [`compute`], starting from an already-summed journal.
pub fn from_totals(amount_owed: Amount, journal: Amount, standing: Standing) -> DomainResult<Balance> {
    if journal > amount_owed {
        return Err(DomainError::invariant(format!(
            "journal total {journal} exceeds amount owed {amount_owed}"
        )));
    }

    if standing == Standing::Cancelled {
        return Ok(Balance {
            amount_owed,
            amount_paid: Amount::ZERO,
            amount_remaining: Amount::ZERO,
            written_off: journal,
            status: ObligationStatus::Cancelled,
        });
    }

    let amount_remaining = amount_owed.checked_sub(journal)?;
    Ok(Balance {
        amount_owed,
        amount_paid: journal,
        amount_remaining,
        written_off: Amount::ZERO,
        status: derive_status(journal, amount_remaining, standing),
    })
}

/// Status for a non-cancelled obligation.
pub fn derive_status(amount_paid: Amount, amount_remaining: Amount, standing: Standing) -> ObligationStatus {
    match standing {
        Standing::Cancelled => ObligationStatus::Cancelled,
        _ if amount_remaining.is_zero() => ObligationStatus::Paid,
        Standing::Transferred => ObligationStatus::Transferred,
        Standing::Open if amount_paid.is_zero() => ObligationStatus::Unpaid,
        Standing::Open => ObligationStatus::PartiallyPaid,
    }
}
