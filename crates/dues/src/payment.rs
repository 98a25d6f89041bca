//! Payment journal entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mutua_core::{Amount, DomainError, ObligationId, PaymentId, UserId};

/// How the money was handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    MobileMoney,
    Transfer,
    /// Recorded by an operator without a money trail ("marked as paid").
    MarkedPaid,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::MobileMoney => "mobile_money",
            PaymentMode::Transfer => "transfer",
            PaymentMode::MarkedPaid => "marked_paid",
        }
    }
}

impl core::str::FromStr for PaymentMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMode::Cash),
            "mobile_money" => Ok(PaymentMode::MobileMoney),
            "transfer" => Ok(PaymentMode::Transfer),
            "marked_paid" => Ok(PaymentMode::MarkedPaid),
            other => Err(DomainError::validation(format!(
                "unknown payment mode: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable journal entry: money applied against one obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub obligation_id: ObligationId,
    pub amount: Amount,
    pub paid_at: DateTime<Utc>,
    pub mode: PaymentMode,
    pub reference: String,
    pub validated_by: Option<UserId>,
    pub note: Option<String>,
}

/// Caller-supplied metadata for a payment about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_id: PaymentId,
    pub mode: PaymentMode,
    /// Receipt or transaction reference; generated when absent or blank.
    pub reference: Option<String>,
    pub validated_by: Option<UserId>,
    pub note: Option<String>,
    pub paid_at: DateTime<Utc>,
}

impl PaymentDetails {
    pub fn new(mode: PaymentMode, paid_at: DateTime<Utc>) -> Self {
        Self {
            payment_id: PaymentId::new(),
            mode,
            reference: None,
            validated_by: None,
            note: None,
            paid_at,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn validated_by(mut self, user: UserId) -> Self {
        self.validated_by = Some(user);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// The reference to store: the caller's, trimmed, or a generated one.
    pub fn resolved_reference(&self) -> String {
        match self.reference.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => payment_reference(self.paid_at, self.payment_id),
        }
    }

    pub fn into_payment(self, obligation_id: ObligationId, amount: Amount) -> Payment {
        let reference = self.resolved_reference();
        Payment {
            id: self.payment_id,
            obligation_id,
            amount,
            paid_at: self.paid_at,
            mode: self.mode,
            reference,
            validated_by: self.validated_by,
            note: self.note,
        }
    }
}

/// `PAY-YYYYMMDD-XXXXXXXX`, the suffix taken from the random tail of the payment id.
pub fn payment_reference(paid_at: DateTime<Utc>, payment_id: PaymentId) -> String {
    let simple = payment_id.as_uuid().simple().to_string();
    let tail = &simple[simple.len() - 8..];
    format!(
        "PAY-{}-{}",
        paid_at.format("%Y%m%d"),
        tail.to_ascii_uppercase()
    )
}
