//! Applying payments to obligations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use mutua_core::{Amount, AggregateRoot, DomainError, ObligationId, PaymentId};
use mutua_dues::{
    Obligation, ObligationCommand, ObligationEvent, Payment, PaymentDetails, RecordPayment,
    SettleInFull,
};
use mutua_events::EventBus;

use crate::ledger_store::{Committed, LedgerStore};
use crate::notify::{LedgerNotice, NoticeEnvelope, publish_best_effort};
use crate::receipt::{Receipt, ReceiptRenderer};

use super::{LedgerError, execute_with_retry};

/// A committed payment and everything that happened after the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// State after the payment.
    pub obligation: Obligation,
    pub payment: Payment,
    pub receipt: Option<Receipt>,
    /// Post-commit failures (notification, receipt). The payment stands.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRejection {
    pub obligation_id: ObligationId,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub settled: Vec<SettlementOutcome>,
    pub rejected: Vec<BatchRejection>,
}

pub struct SettlementService<S, B> {
    store: S,
    bus: B,
    receipts: Option<Arc<dyn ReceiptRenderer>>,
}

impl<S, B> SettlementService<S, B>
where
    S: LedgerStore,
    B: EventBus<NoticeEnvelope>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            receipts: None,
        }
    }

    pub fn with_receipts(mut self, renderer: Arc<dyn ReceiptRenderer>) -> Self {
        self.receipts = Some(renderer);
        self
    }

    /// Partial settlement: append a payment of `amount`.
    #[instrument(skip(self, details), fields(obligation_id = %id, payment_id = %details.payment_id), err)]
    pub async fn record_payment(
        &self,
        id: ObligationId,
        amount: u64,
        details: PaymentDetails,
    ) -> Result<SettlementOutcome, LedgerError> {
        let committed = execute_with_retry(
            &self.store,
            ObligationCommand::RecordPayment(RecordPayment {
                obligation_id: id,
                amount: Amount::new(amount),
                details,
            }),
        )
        .await?;
        self.after_commit(committed)
    }

    /// Full settlement: append a payment equal to the remaining balance.
    #[instrument(skip(self, details), fields(obligation_id = %id, payment_id = %details.payment_id), err)]
    pub async fn settle_in_full(
        &self,
        id: ObligationId,
        details: PaymentDetails,
    ) -> Result<SettlementOutcome, LedgerError> {
        let committed = execute_with_retry(
            &self.store,
            ObligationCommand::SettleInFull(SettleInFull {
                obligation_id: id,
                details,
            }),
        )
        .await?;
        self.after_commit(committed)
    }

    /// Apply the same amount to several obligations, one transaction each.
    ///
    /// Never fails as a whole: every rejection is reported with its code.
    /// Each payment gets its own id; the rest of `details` is shared.
    #[instrument(skip(self, ids, details), fields(count = ids.len()))]
    pub async fn settle_batch(
        &self,
        ids: &[ObligationId],
        amount: u64,
        details: PaymentDetails,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for &id in ids {
            let details = PaymentDetails {
                payment_id: PaymentId::new(),
                ..details.clone()
            };
            match self.record_payment(id, amount, details).await {
                Ok(settled) => outcome.settled.push(settled),
                Err(err) => outcome.rejected.push(BatchRejection {
                    obligation_id: id,
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        info!(
            settled = outcome.settled.len(),
            rejected = outcome.rejected.len(),
            "batch settlement finished"
        );
        outcome
    }

    fn after_commit(&self, committed: Committed) -> Result<SettlementOutcome, LedgerError> {
        let Committed { obligation, events } = committed;
        let recorded = events
            .iter()
            .find_map(|e| match e {
                ObligationEvent::PaymentRecorded(p) => Some(p.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::invariant("payment command committed without a payment"))?;
        let payment = recorded.payment;

        info!(
            obligation_id = %obligation.id_typed(),
            payment_id = %payment.id,
            status = %obligation.status(),
            "payment recorded"
        );

        let mut warnings = Vec::new();
        let liable = obligation.liable_entities();

        publish_best_effort(
            &self.bus,
            LedgerNotice::PaymentRecorded {
                obligation_id: obligation.id_typed(),
                payment_id: payment.id,
                amount: payment.amount,
                reference: payment.reference.clone(),
                mode: payment.mode,
                amount_remaining: obligation.amount_remaining(),
                status: obligation.status(),
                liable: liable.clone(),
                occurred_at: recorded.occurred_at,
            }
            .into_envelope(obligation.version()),
            &mut warnings,
        );

        if obligation.amount_remaining().is_zero() {
            publish_best_effort(
                &self.bus,
                LedgerNotice::ObligationSettled {
                    obligation_id: obligation.id_typed(),
                    kind: obligation.kind_tag(),
                    amount_owed: obligation.amount_owed(),
                    motif: obligation.motif().to_string(),
                    liable,
                    occurred_at: recorded.occurred_at,
                }
                .into_envelope(obligation.version()),
                &mut warnings,
            );
        }

        let receipt = match &self.receipts {
            Some(renderer) => match renderer.render(&obligation, &payment) {
                Ok(receipt) => Some(receipt),
                Err(err) => {
                    warn!(payment_id = %payment.id, error = %err, "receipt rendering failed");
                    warnings.push(format!("receipt unavailable: {err}"));
                    None
                }
            },
            None => None,
        };

        Ok(SettlementOutcome {
            obligation,
            payment,
            receipt,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use mutua_core::{DeathId, MemberId};
    use mutua_dues::{DraftKind, ObligationDraft, ObligationStatus, PaymentMode};
    use mutua_events::{EventBus, InMemoryEventBus, Subscription};

    use crate::ledger_store::InMemoryLedgerStore;
    use crate::receipt::{PlainTextReceiptRenderer, ReceiptError};

    type Service = SettlementService<Arc<InMemoryLedgerStore>, Arc<InMemoryEventBus<NoticeEnvelope>>>;

    fn setup() -> (Service, Arc<InMemoryLedgerStore>, Subscription<NoticeEnvelope>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        (SettlementService::new(Arc::clone(&store), bus), store, sub)
    }

    async fn open(store: &InMemoryLedgerStore, amount: u64) -> ObligationId {
        let o = Obligation::open(
            ObligationId::new(),
            ObligationDraft {
                kind: DraftKind::MemberDue {
                    member_id: MemberId::new(),
                },
                amount: Amount::new(amount),
                motif: "Death of FOUDA Anne".into(),
                description: None,
                death_id: Some(DeathId::new()),
                issued_on: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                due_by: None,
            },
            Utc::now(),
        )
        .unwrap();
        let id = o.id_typed();
        store.insert(o).await.unwrap();
        id
    }

    fn cash() -> PaymentDetails {
        PaymentDetails::new(PaymentMode::Cash, Utc::now())
    }

    #[tokio::test]
    async fn partial_then_full_payment() {
        let (service, store, sub) = setup();
        let id = open(&store, 10_000).await;

        let first = service.record_payment(id, 4_000, cash()).await.unwrap();
        assert_eq!(first.obligation.status(), ObligationStatus::PartiallyPaid);
        assert_eq!(first.obligation.amount_remaining(), Amount::new(6_000));
        assert!(first.warnings.is_empty());

        let second = service.record_payment(id, 6_000, cash()).await.unwrap();
        assert_eq!(second.obligation.status(), ObligationStatus::Paid);
        assert_eq!(second.obligation.payments().len(), 2);

        let types: Vec<String> = sub.drain().iter().map(|n| n.event_type().to_string()).collect();
        assert_eq!(
            types,
            vec![
                "ledger.payment.recorded",
                "ledger.payment.recorded",
                "ledger.obligation.settled"
            ]
        );
    }

    #[tokio::test]
    async fn overpayment_leaves_balance_unchanged() {
        let (service, store, sub) = setup();
        let id = open(&store, 500).await;

        let err = service.record_payment(id, 600, cash()).await.unwrap_err();
        assert_eq!(err.code(), "overpayment");

        let o = store.load(id).await.unwrap().unwrap();
        assert_eq!(o.amount_owed(), Amount::new(500));
        assert_eq!(o.amount_paid(), Amount::ZERO);
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn settle_in_full_pays_the_remainder_once() {
        let (service, store, _sub) = setup();
        let id = open(&store, 500).await;
        service.record_payment(id, 200, cash()).await.unwrap();

        let outcome = service.settle_in_full(id, cash()).await.unwrap();
        assert_eq!(outcome.payment.amount, Amount::new(300));
        assert_eq!(outcome.obligation.status(), ObligationStatus::Paid);

        let err = service.settle_in_full(id, cash()).await.unwrap_err();
        assert_eq!(err.code(), "already_settled");
    }

    struct BrokenRenderer;

    impl ReceiptRenderer for BrokenRenderer {
        fn render(&self, _: &Obligation, _: &Payment) -> Result<Receipt, ReceiptError> {
            Err(ReceiptError::Render("printer offline".into()))
        }
    }

    #[tokio::test]
    async fn receipt_failure_is_a_warning() {
        let (service, store, _sub) = setup();
        let service = service.with_receipts(Arc::new(BrokenRenderer));
        let id = open(&store, 500).await;

        let outcome = service.record_payment(id, 500, cash()).await.unwrap();
        assert!(outcome.receipt.is_none());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(store.load(id).await.unwrap().unwrap().status(), ObligationStatus::Paid);
    }

    #[tokio::test]
    async fn receipt_is_rendered_after_commit() {
        let (service, store, _sub) = setup();
        let service = service.with_receipts(Arc::new(PlainTextReceiptRenderer::default()));
        let id = open(&store, 500).await;

        let outcome = service.record_payment(id, 100, cash()).await.unwrap();
        let receipt = outcome.receipt.unwrap();
        assert_eq!(receipt.payment_id, outcome.payment.id);
        assert!(receipt.body.contains("Remaining: 400"));
    }

    #[tokio::test]
    async fn batch_reports_each_rejection() {
        let (service, store, _sub) = setup();
        let open_id = open(&store, 1_000).await;
        let small_id = open(&store, 100).await;
        let unknown = ObligationId::new();

        let outcome = service
            .settle_batch(&[open_id, small_id, unknown], 500, cash())
            .await;

        assert_eq!(outcome.settled.len(), 1);
        assert_eq!(outcome.settled[0].obligation.id_typed(), open_id);
        let codes: Vec<&str> = outcome.rejected.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["overpayment", "not_found"]);
    }
}
