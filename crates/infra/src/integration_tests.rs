//! End-to-end tests across the ledger pipeline.
//!
//! Registry → DueGenerator → LedgerStore → SettlementService → EventBus →
//! NotificationBroadcaster, with the query service reading the result.
//!
//! Verifies:
//! - Generated dues, payments and notices line up
//! - Concurrent partial payments never overpay an obligation
//! - A transferred fine moves arrears from the member to the lineage

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    use chrono::{NaiveDate, Utc};

    use mutua_core::{Amount, CategoryId, DeathId, LineageId, MemberId};
    use mutua_dues::{
        Category, Death, DraftKind, EligibilityRules, EntityRef, FineNature, Lineage, Member,
        MemberStatus, Obligation, ObligationDraft, ObligationStatus, PaymentDetails, PaymentMode,
    };
    use mutua_events::InMemoryEventBus;

    use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
    use crate::notify::{NoticeEnvelope, NotificationBroadcaster, SinkError};
    use crate::registry::InMemoryRegistry;
    use crate::services::{
        CreateKind, CreateObligation, DueGenerator, LedgerQueryService, ObligationService,
        SettlementService, TotalsFilter,
    };

    type Store = Arc<InMemoryLedgerStore>;
    type Registry = Arc<InMemoryRegistry>;
    type Bus = Arc<InMemoryEventBus<NoticeEnvelope>>;

    struct Village {
        store: Store,
        registry: Registry,
        bus: Bus,
        lineage: Lineage,
        category: Category,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn village() -> Village {
        let registry = Arc::new(InMemoryRegistry::new());
        let lineage = Lineage {
            id: LineageId::new(),
            name: "Mvog-Betsi".into(),
            family_id: None,
        };
        let category = Category {
            id: CategoryId::new(),
            label: "Adults".into(),
            eligibility_start: Some(date(2015, 1, 1)),
            lineage_due_amount: None,
        };
        registry.add_lineage(lineage.clone());
        registry.add_category(category.clone());

        Village {
            store: Arc::new(InMemoryLedgerStore::new()),
            registry,
            bus: Arc::new(InMemoryEventBus::new()),
            lineage,
            category,
        }
    }

    fn enrol(v: &Village, last: &str, status: MemberStatus) -> Member {
        let member = Member {
            id: MemberId::new(),
            last_name: last.into(),
            first_names: "Paul".into(),
            status,
            lineage_id: Some(v.lineage.id),
            category_id: Some(v.category.id),
            email: None,
        };
        v.registry.add_member(member.clone());
        member
    }

    fn cash() -> PaymentDetails {
        PaymentDetails::new(PaymentMode::Cash, Utc::now())
    }

    #[tokio::test]
    async fn death_to_settlement_pipeline() {
        let v = village();
        let deceased = enrol(&v, "OWONA", MemberStatus::Deceased);
        let payers: Vec<Member> = ["AMOUGOU", "BILOA", "ZANGA"]
            .into_iter()
            .map(|last| enrol(&v, last, MemberStatus::Active))
            .collect();
        let death = Death {
            id: DeathId::new(),
            member_id: deceased.id,
            date: date(2024, 5, 2),
        };
        v.registry.record_death(death.clone());

        let (tx, rx) = mpsc::channel::<String>();
        let broadcaster = NotificationBroadcaster::spawn(&v.bus, move |notice: &NoticeEnvelope| {
            tx.send(notice.event_type().to_string())
                .map_err(|e| SinkError::Delivery(e.to_string()))
        })
        .unwrap();

        let generator = DueGenerator::new(
            Arc::clone(&v.store),
            Arc::clone(&v.registry),
            Arc::clone(&v.bus),
            EligibilityRules::default(),
        );
        let report = generator.generate_member_dues(death.id).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.total_amount, Amount::new(1_500));

        let settlement = SettlementService::new(Arc::clone(&v.store), Arc::clone(&v.bus));
        let queries = LedgerQueryService::new(Arc::clone(&v.store), Arc::clone(&v.registry));

        let first = queries.member_statement(payers[0].id).await.unwrap();
        assert_eq!(first.open.len(), 1);
        assert_eq!(first.lines[0].motif, "Death of OWONA Paul");
        settlement
            .settle_in_full(first.lines[0].obligation_id, cash())
            .await
            .unwrap();

        let second = queries.member_statement(payers[1].id).await.unwrap();
        settlement
            .record_payment(second.lines[0].obligation_id, 200, cash())
            .await
            .unwrap();

        let totals = queries.global_totals(&TotalsFilter::default()).await.unwrap();
        assert_eq!(totals.count, 3);
        assert_eq!(totals.total_paid, Amount::new(700));
        assert_eq!(totals.total_remaining, Amount::new(800));

        let delivered: Vec<String> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            delivered,
            vec![
                "ledger.dues.generated",
                "ledger.payment.recorded",
                "ledger.obligation.settled",
                "ledger.payment.recorded",
            ]
        );
        broadcaster.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_partial_payments_never_overpay() {
        let v = village();
        let member = enrol(&v, "ETOUNDI", MemberStatus::Active);
        let obligation = Obligation::open(
            mutua_core::ObligationId::new(),
            ObligationDraft {
                kind: DraftKind::MemberDue { member_id: member.id },
                amount: Amount::new(1_000),
                motif: "Annual contribution".into(),
                description: None,
                death_id: None,
                issued_on: date(2024, 1, 1),
                due_by: None,
            },
            Utc::now(),
        )
        .unwrap();
        let id = obligation.id_typed();
        v.store.insert(obligation).await.unwrap();

        let settlement = Arc::new(SettlementService::new(Arc::clone(&v.store), Arc::clone(&v.bus)));
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let settlement = Arc::clone(&settlement);
                tokio::spawn(async move { settlement.record_payment(id, 100, cash()).await })
            })
            .collect();

        let mut accepted = 0;
        let mut rejected = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => rejected.push(err.code()),
            }
        }

        assert_eq!(accepted, 10);
        assert_eq!(rejected, vec!["already_settled"; 2]);

        let stored = v.store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.amount_paid(), Amount::new(1_000));
        assert_eq!(stored.payments().len(), 10);
        assert_eq!(stored.status(), ObligationStatus::Paid);
        assert_eq!(stored.recompute().unwrap(), stored.balance());
    }

    #[tokio::test]
    async fn transferred_fine_moves_arrears_to_the_lineage() {
        let v = village();
        let offender = enrol(&v, "NDZANA", MemberStatus::Active);

        let obligations = ObligationService::new(Arc::clone(&v.store), Arc::clone(&v.registry));
        let queries = LedgerQueryService::new(Arc::clone(&v.store), Arc::clone(&v.registry));

        let fine = obligations
            .create(CreateObligation {
                kind: CreateKind::Fine {
                    nature: FineNature::Pecuniary,
                    sanction: None,
                    targets: vec![EntityRef::Member(offender.id)],
                    created_by: None,
                },
                amount: 2_000,
                motif: "Absence at the general assembly".into(),
                description: None,
                death_id: None,
                issued_on: Some(date(2024, 3, 9)),
                due_by: None,
            })
            .await
            .unwrap();

        let before = queries.top_arrears(None, &TotalsFilter::default()).await.unwrap();
        assert_eq!(before[0].entity, EntityRef::Member(offender.id));

        let transferred = obligations.transfer_fine(fine.id_typed()).await.unwrap();
        assert_eq!(transferred.status(), ObligationStatus::Transferred);

        let after = queries.top_arrears(None, &TotalsFilter::default()).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].entity, EntityRef::Lineage(v.lineage.id));
        assert_eq!(after[0].display_name, "Mvog-Betsi");
        assert_eq!(after[0].outstanding, Amount::new(2_000));

        let member = queries.entity_balance(EntityRef::Member(offender.id)).await.unwrap();
        assert_eq!(member.outstanding, Amount::ZERO);
    }
}
