//! Administrative operations on obligations.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use mutua_core::{Amount, DeathId, DomainError, LineageId, MemberId, ObligationId, TargetId, UserId};
use mutua_dues::{
    AmendObligation, CancelObligation, DraftKind, EntityRef, FineNature, FineTarget,
    FineTargetDraft, MemberLineage, Obligation, ObligationCommand, ObligationDraft, Payment,
    TargetState, TransferFine,
};

use crate::ledger_store::{JournalFilter, LedgerStore, ObligationFilter, Page, Pagination};
use crate::registry::{DeathRegistry, MembershipRegistry};

use super::{LedgerError, execute_with_retry};

/// Kind-specific part of a manual creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateKind {
    MemberDue {
        member_id: MemberId,
    },
    LineageDue {
        lineage_id: LineageId,
    },
    Fine {
        nature: FineNature,
        sanction: Option<String>,
        targets: Vec<EntityRef>,
        created_by: Option<UserId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateObligation {
    #[serde(flatten)]
    pub kind: CreateKind,
    pub amount: u64,
    pub motif: String,
    pub description: Option<String>,
    pub death_id: Option<DeathId>,
    /// Defaults to today.
    pub issued_on: Option<NaiveDate>,
    pub due_by: Option<NaiveDate>,
}

/// Fields to change on an unpaid obligation. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendRequest {
    pub amount: Option<u64>,
    pub motif: Option<String>,
    pub description: Option<String>,
    pub due_by: Option<NaiveDate>,
    /// Replaces a fine's whole target list.
    pub targets: Option<Vec<EntityRef>>,
}

pub struct ObligationService<S, R> {
    store: S,
    registry: R,
}

impl<S, R> ObligationService<S, R>
where
    S: LedgerStore,
    R: MembershipRegistry + DeathRegistry,
{
    pub fn new(store: S, registry: R) -> Self {
        Self { store, registry }
    }

    /// Create an obligation by hand.
    ///
    /// The owing member or lineage and the death, when given, must exist.
    /// A due tied to a death fails with `Conflict` if a live one already exists.
    #[instrument(skip(self, request), err)]
    pub async fn create(&self, request: CreateObligation) -> Result<Obligation, LedgerError> {
        if let Some(death_id) = request.death_id {
            if self.registry.death(death_id).await?.is_none() {
                return Err(LedgerError::EventNotFound(death_id));
            }
        }

        let kind = match request.kind {
            CreateKind::MemberDue { member_id } => {
                self.display_name(EntityRef::Member(member_id)).await?;
                DraftKind::MemberDue { member_id }
            }
            CreateKind::LineageDue { lineage_id } => {
                self.display_name(EntityRef::Lineage(lineage_id)).await?;
                DraftKind::LineageDue { lineage_id }
            }
            CreateKind::Fine {
                nature,
                sanction,
                targets,
                created_by,
            } => {
                let mut drafts = Vec::with_capacity(targets.len());
                for entity in targets {
                    drafts.push(FineTargetDraft {
                        entity,
                        display_name: self.display_name(entity).await?,
                    });
                }
                DraftKind::Fine {
                    nature,
                    sanction,
                    targets: drafts,
                    created_by,
                }
            }
        };

        let now = Utc::now();
        let draft = ObligationDraft {
            kind,
            amount: Amount::new(request.amount),
            motif: request.motif,
            description: request.description,
            death_id: request.death_id,
            issued_on: request.issued_on.unwrap_or_else(|| now.date_naive()),
            due_by: request.due_by,
        };

        let obligation = Obligation::open(ObligationId::new(), draft, now)?;
        self.store.insert(obligation.clone()).await?;

        info!(
            obligation_id = %obligation.id_typed(),
            kind = obligation.kind_tag().as_str(),
            "obligation created"
        );
        Ok(obligation)
    }

    pub async fn get(&self, id: ObligationId) -> Result<Obligation, LedgerError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("obligation {id}")).into())
    }

    pub async fn list(
        &self,
        filter: &ObligationFilter,
        pagination: Pagination,
    ) -> Result<Page<Obligation>, LedgerError> {
        Ok(self.store.list(filter, pagination).await?)
    }

    /// Change core fields of an unpaid obligation.
    #[instrument(skip(self, request), fields(obligation_id = %id), err)]
    pub async fn amend(&self, id: ObligationId, request: AmendRequest) -> Result<Obligation, LedgerError> {
        let targets = match request.targets {
            Some(entities) => {
                let current = self.get(id).await?;
                let existing: Vec<FineTarget> =
                    current.fine().map(|f| f.targets.clone()).unwrap_or_default();

                let mut targets = Vec::with_capacity(entities.len());
                for entity in entities {
                    let reused = existing
                        .iter()
                        .find(|t| t.entity == entity && t.is_active())
                        .map(|t| t.id);
                    targets.push(FineTarget {
                        id: reused.unwrap_or_else(TargetId::new),
                        entity,
                        display_name: self.display_name(entity).await?,
                        state: TargetState::Active,
                    });
                }
                Some(targets)
            }
            None => None,
        };

        let committed = execute_with_retry(
            &self.store,
            ObligationCommand::Amend(AmendObligation {
                obligation_id: id,
                amount: request.amount.map(Amount::new),
                motif: request.motif,
                description: request.description,
                due_by: request.due_by,
                targets,
                occurred_at: Utc::now(),
            }),
        )
        .await?;

        info!(obligation_id = %id, "obligation amended");
        Ok(committed.obligation)
    }

    /// Void an obligation. Payments already recorded stay in the journal and
    /// are reported as written off.
    #[instrument(skip(self, reason), fields(obligation_id = %id), err)]
    pub async fn cancel(&self, id: ObligationId, reason: Option<String>) -> Result<Obligation, LedgerError> {
        let committed = execute_with_retry(
            &self.store,
            ObligationCommand::Cancel(CancelObligation {
                obligation_id: id,
                reason,
                occurred_at: Utc::now(),
            }),
        )
        .await?;

        info!(
            obligation_id = %id,
            written_off = committed.obligation.written_off().value(),
            "obligation cancelled"
        );
        Ok(committed.obligation)
    }

    /// Physically remove an obligation without payments.
    #[instrument(skip(self), fields(obligation_id = %id), err)]
    pub async fn delete(&self, id: ObligationId) -> Result<(), LedgerError> {
        self.store.delete(id).await?;
        info!(obligation_id = %id, "obligation deleted");
        Ok(())
    }

    /// Move a fine's first active individual target onto that member's lineage.
    #[instrument(skip(self), fields(obligation_id = %id), err)]
    pub async fn transfer_fine(&self, id: ObligationId) -> Result<Obligation, LedgerError> {
        let current = self.get(id).await?;

        // Resolve every active individual target's lineage up front; the
        // aggregate picks the target under the row lock.
        let mut lineages = Vec::new();
        if let Some(fine) = current.fine() {
            for target in fine.targets.iter().filter(|t| t.is_transferable()) {
                let EntityRef::Member(member_id) = target.entity else {
                    continue;
                };
                let Some(member) = self.registry.member(member_id).await? else {
                    continue;
                };
                let Some(lineage_id) = member.lineage_id else {
                    continue;
                };
                if let Some(lineage) = self.registry.lineage(lineage_id).await? {
                    lineages.push(MemberLineage {
                        member_id,
                        lineage_id,
                        lineage_name: lineage.name,
                    });
                }
            }
        }

        let committed = execute_with_retry(
            &self.store,
            ObligationCommand::TransferFine(TransferFine {
                obligation_id: id,
                lineages,
                new_target_id: TargetId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .await?;

        info!(obligation_id = %id, "fine transferred to lineage");
        Ok(committed.obligation)
    }

    /// Journal entries of one obligation, newest first.
    pub async fn payments_for(&self, id: ObligationId) -> Result<Vec<Payment>, LedgerError> {
        let obligation = self.get(id).await?;
        let mut payments = obligation.payments().to_vec();
        payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at).then_with(|| b.id.cmp(&a.id)));
        Ok(payments)
    }

    pub async fn journal(
        &self,
        filter: &JournalFilter,
        pagination: Pagination,
    ) -> Result<Page<Payment>, LedgerError> {
        Ok(self.store.journal(filter, pagination).await?)
    }

    async fn display_name(&self, entity: EntityRef) -> Result<String, LedgerError> {
        let name = match entity {
            EntityRef::Member(id) => self.registry.member(id).await?.map(|m| m.full_name()),
            EntityRef::Lineage(id) => self.registry.lineage(id).await?.map(|l| l.name),
            EntityRef::Category(id) => self.registry.category(id).await?.map(|c| c.label),
        };
        name.ok_or_else(|| DomainError::not_found(entity.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use mutua_core::{DeathId, LineageId};
    use mutua_dues::{Death, KindTag, Lineage, Member, MemberStatus, ObligationStatus};

    use crate::ledger_store::InMemoryLedgerStore;
    use crate::registry::InMemoryRegistry;

    struct Fixture {
        service: ObligationService<Arc<InMemoryLedgerStore>, Arc<InMemoryRegistry>>,
        member: Member,
        lineage: Lineage,
        death: Death,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryRegistry::new());
        let lineage = Lineage {
            id: LineageId::new(),
            name: "Mvog-Ada".into(),
            family_id: None,
        };
        let member = Member {
            id: MemberId::new(),
            last_name: "ONANA".into(),
            first_names: "Marie".into(),
            status: MemberStatus::Active,
            lineage_id: Some(lineage.id),
            category_id: None,
            email: None,
        };
        let deceased = Member {
            id: MemberId::new(),
            last_name: "MBARGA".into(),
            first_names: "Louis".into(),
            status: MemberStatus::Deceased,
            lineage_id: None,
            category_id: None,
            email: None,
        };
        let death = Death {
            id: DeathId::new(),
            member_id: deceased.id,
            date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
        };
        registry.add_lineage(lineage.clone());
        registry.add_member(member.clone());
        registry.add_member(deceased);
        registry.record_death(death.clone());

        Fixture {
            service: ObligationService::new(Arc::new(InMemoryLedgerStore::new()), registry),
            member,
            lineage,
            death,
        }
    }

    fn member_due(member_id: MemberId, death_id: Option<DeathId>) -> CreateObligation {
        CreateObligation {
            kind: CreateKind::MemberDue { member_id },
            amount: 500,
            motif: "Death of MBARGA Louis".into(),
            description: None,
            death_id,
            issued_on: None,
            due_by: None,
        }
    }

    fn fine(targets: Vec<EntityRef>) -> CreateObligation {
        CreateObligation {
            kind: CreateKind::Fine {
                nature: FineNature::Pecuniary,
                sanction: None,
                targets,
                created_by: None,
            },
            amount: 2_000,
            motif: "Absence at general assembly".into(),
            description: None,
            death_id: None,
            issued_on: Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            due_by: None,
        }
    }

    #[tokio::test]
    async fn manual_creation_rechecks_duplicates() {
        let f = fixture();
        f.service
            .create(member_due(f.member.id, Some(f.death.id)))
            .await
            .unwrap();

        let err = f
            .service
            .create(member_due(f.member.id, Some(f.death.id)))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let f = fixture();
        let err = f.service.create(member_due(MemberId::new(), None)).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = f
            .service
            .create(member_due(f.member.id, Some(DeathId::new())))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn fine_targets_carry_registry_names() {
        let f = fixture();
        let o = f
            .service
            .create(fine(vec![EntityRef::Member(f.member.id)]))
            .await
            .unwrap();

        let details = o.fine().unwrap();
        assert_eq!(details.targets[0].display_name, "ONANA Marie");
        assert!(details.reference.starts_with("AM-20240501-"));
        assert_eq!(o.kind_tag(), KindTag::Fine);
    }

    #[tokio::test]
    async fn amend_is_refused_after_a_payment() {
        let f = fixture();
        let o = f.service.create(member_due(f.member.id, None)).await.unwrap();

        let amended = f
            .service
            .amend(
                o.id_typed(),
                AmendRequest {
                    amount: Some(750),
                    ..AmendRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(amended.amount_owed(), Amount::new(750));

        f.service
            .store
            .execute(ObligationCommand::RecordPayment(mutua_dues::RecordPayment {
                obligation_id: o.id_typed(),
                amount: Amount::new(100),
                details: mutua_dues::PaymentDetails::new(mutua_dues::PaymentMode::Cash, Utc::now()),
            }))
            .await
            .unwrap();

        let err = f
            .service
            .amend(o.id_typed(), AmendRequest {
                motif: Some("changed".into()),
                ..AmendRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "immutable_state");
    }

    #[tokio::test]
    async fn transfer_moves_fine_to_member_lineage() {
        let f = fixture();
        let o = f
            .service
            .create(fine(vec![EntityRef::Member(f.member.id)]))
            .await
            .unwrap();

        let moved = f.service.transfer_fine(o.id_typed()).await.unwrap();
        assert_eq!(moved.status(), ObligationStatus::Transferred);
        let targets = &moved.fine().unwrap().targets;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].state, TargetState::Transferred);
        assert_eq!(targets[1].entity, EntityRef::Lineage(f.lineage.id));
        assert_eq!(targets[1].display_name, "Mvog-Ada");
        assert_eq!(moved.amount_owed(), o.amount_owed());

        let err = f.service.transfer_fine(o.id_typed()).await.unwrap_err();
        assert_eq!(err.code(), "no_transferable_target");
    }

    #[tokio::test]
    async fn cancel_then_delete_rules() {
        let f = fixture();
        let o = f.service.create(member_due(f.member.id, None)).await.unwrap();

        let cancelled = f.service.cancel(o.id_typed(), Some("entered twice".into())).await.unwrap();
        assert_eq!(cancelled.status(), ObligationStatus::Cancelled);
        assert_eq!(cancelled.written_off(), Amount::ZERO);

        let err = f.service.cancel(o.id_typed(), None).await.unwrap_err();
        assert_eq!(err.code(), "cancelled_obligation");

        f.service.delete(o.id_typed()).await.unwrap();
        let err = f.service.get(o.id_typed()).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
