//! Receipts for recorded payments.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mutua_core::PaymentId;
use mutua_dues::{Obligation, Payment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub payment_id: PaymentId,
    pub reference: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("receipt rendering failed: {0}")]
    Render(String),
}

/// Renders a receipt for a payment that has already been committed.
///
/// `obligation` is the state right after the payment was applied.
pub trait ReceiptRenderer: Send + Sync {
    fn render(&self, obligation: &Obligation, payment: &Payment) -> Result<Receipt, ReceiptError>;
}

impl<R> ReceiptRenderer for Arc<R>
where
    R: ReceiptRenderer + ?Sized,
{
    fn render(&self, obligation: &Obligation, payment: &Payment) -> Result<Receipt, ReceiptError> {
        (**self).render(obligation, payment)
    }
}

/// Plain-text receipt.
#[derive(Debug, Clone)]
pub struct PlainTextReceiptRenderer {
    issuer: String,
}

impl PlainTextReceiptRenderer {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }
}

impl Default for PlainTextReceiptRenderer {
    fn default() -> Self {
        Self::new("Village association")
    }
}

impl ReceiptRenderer for PlainTextReceiptRenderer {
    fn render(&self, obligation: &Obligation, payment: &Payment) -> Result<Receipt, ReceiptError> {
        if payment.obligation_id != obligation.id_typed() {
            return Err(ReceiptError::Render(format!(
                "payment {} does not belong to obligation {}",
                payment.id,
                obligation.id_typed()
            )));
        }

        let render = |e: std::fmt::Error| ReceiptError::Render(e.to_string());
        let balance = obligation.balance();
        let mut body = String::new();

        writeln!(body, "{}", self.issuer).map_err(render)?;
        writeln!(body, "RECEIPT {}", payment.reference).map_err(render)?;
        writeln!(body, "Date: {}", payment.paid_at.format("%d/%m/%Y %H:%M")).map_err(render)?;
        writeln!(body, "For: {}", obligation.motif()).map_err(render)?;
        if let Some(fine) = obligation.fine() {
            writeln!(body, "Fine: {}", fine.reference).map_err(render)?;
        }
        writeln!(body, "Amount paid: {}", payment.amount).map_err(render)?;
        writeln!(body, "Mode: {}", payment.mode).map_err(render)?;
        writeln!(
            body,
            "Paid to date: {} of {}",
            balance.amount_paid, balance.amount_owed
        )
        .map_err(render)?;
        writeln!(body, "Remaining: {}", balance.amount_remaining).map_err(render)?;
        write!(body, "Status: {}", balance.status).map_err(render)?;

        Ok(Receipt {
            payment_id: payment.id,
            reference: payment.reference.clone(),
            body,
        })
    }
}
