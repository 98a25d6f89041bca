//! Death-triggered due generation.
//!
//! A run resolves the eligible entities, subtracts those that already hold a
//! live due for the death, and inserts the rest through
//! [`LedgerStore::insert_generated`], which re-checks every duplicate key
//! atomically. Re-running a generation is therefore harmless: rows that
//! appeared in the meantime are skipped and counted, never treated as errors.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use mutua_core::{Amount, DeathId, DomainError, ObligationId};
use mutua_dues::{
    Death, EligibilityRules, EntityRef, KindTag, Member, Obligation, ObligationDraft,
    lineage_due_amount,
};
use mutua_events::EventBus;

use crate::ledger_store::{GeneratedBatch, LedgerStore, StoreError};
use crate::notify::{LedgerNotice, NoticeEnvelope, publish_best_effort};
use crate::registry::{DeathRegistry, MembershipRegistry};

use super::LedgerError;

/// Lineage generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageDueRequest {
    pub death_id: DeathId,
    /// Used when the deceased's category sets no rate.
    pub amount_per_lineage: Option<u64>,
    #[serde(default)]
    pub exclude_deceased_lineage: bool,
    /// Generation date; defaults to today.
    pub issued_on: Option<NaiveDate>,
}

impl LineageDueRequest {
    pub fn new(death_id: DeathId) -> Self {
        Self {
            death_id,
            amount_per_lineage: None,
            exclude_deceased_lineage: false,
            issued_on: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub death_id: DeathId,
    pub kind: KindTag,
    pub eligible: usize,
    pub already_existing: usize,
    pub created: usize,
    /// Eligible entities whose due was created by a concurrent run.
    pub skipped_concurrently: usize,
    /// Eligible entities whose draft failed validation; listed in `warnings`.
    pub invalid: usize,
    pub total_amount: Amount,
    pub created_ids: Vec<ObligationId>,
    pub warnings: Vec<String>,
}

pub struct DueGenerator<S, R, B> {
    store: S,
    registry: R,
    bus: B,
    rules: EligibilityRules,
}

impl<S, R, B> DueGenerator<S, R, B>
where
    S: LedgerStore,
    R: MembershipRegistry + DeathRegistry,
    B: EventBus<NoticeEnvelope>,
{
    pub fn new(store: S, registry: R, bus: B, rules: EligibilityRules) -> Self {
        Self {
            store,
            registry,
            bus,
            rules,
        }
    }

    pub fn rules(&self) -> &EligibilityRules {
        &self.rules
    }

    /// One individual due per eligible member.
    #[instrument(skip(self), fields(death_id = %death_id), err)]
    pub async fn generate_member_dues(&self, death_id: DeathId) -> Result<GenerationReport, LedgerError> {
        let (death, deceased) = self.resolve_death(death_id).await?;

        let members = self.registry.members().await?;
        let categories: HashMap<_, _> = self
            .registry
            .categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let deceased_members = self.registry.deceased_members().await?;

        let candidates = self
            .rules
            .eligible_members(&death, &members, &categories, &deceased_members)
            .into_iter()
            .map(|m| {
                (
                    EntityRef::Member(m.id),
                    self.rules.member_due_draft(&death, &deceased, m),
                )
            })
            .collect();

        self.run(death_id, KindTag::MemberDue, candidates).await
    }

    /// One lineage due per lineage, optionally without the deceased's own.
    #[instrument(skip(self, request), fields(death_id = %request.death_id), err)]
    pub async fn generate_lineage_dues(&self, request: LineageDueRequest) -> Result<GenerationReport, LedgerError> {
        let (death, deceased) = self.resolve_death(request.death_id).await?;

        let category = match deceased.category_id {
            Some(id) => self.registry.category(id).await?,
            None => None,
        };
        let amount = lineage_due_amount(
            category.as_ref(),
            request.amount_per_lineage.map(Amount::new),
            self.rules.lineage_due_amount,
        );
        let today = request.issued_on.unwrap_or_else(|| Utc::now().date_naive());

        let lineages = self.registry.lineages().await?;
        let mut candidates = Vec::new();
        for lineage in self.rules.eligible_lineages(
            &lineages,
            deceased.lineage_id,
            request.exclude_deceased_lineage,
        ) {
            let draft = self
                .rules
                .lineage_due_draft(&death, &deceased, lineage, amount, today)?;
            candidates.push((EntityRef::Lineage(lineage.id), draft));
        }

        self.run(request.death_id, KindTag::LineageDue, candidates).await
    }

    async fn resolve_death(&self, death_id: DeathId) -> Result<(Death, Member), LedgerError> {
        let death = self
            .registry
            .death(death_id)
            .await?
            .ok_or(LedgerError::EventNotFound(death_id))?;
        let deceased = self
            .registry
            .member(death.member_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("deceased member {}", death.member_id)))?;
        Ok((death, deceased))
    }

    async fn run(
        &self,
        death_id: DeathId,
        kind: KindTag,
        candidates: Vec<(EntityRef, ObligationDraft)>,
    ) -> Result<GenerationReport, LedgerError> {
        let eligible = candidates.len();
        let existing = self.store.live_entities_for_death(death_id, kind).await?;

        let now = Utc::now();
        let mut fresh = Vec::new();
        let mut already_existing = 0;
        let mut invalid = 0;
        let mut warnings = Vec::new();
        for (entity, draft) in candidates {
            if existing.contains(&entity) {
                already_existing += 1;
                continue;
            }
            match Obligation::open(ObligationId::new(), draft, now) {
                Ok(obligation) => fresh.push(obligation),
                Err(err) => {
                    warn!(death_id = %death_id, entity = %entity, error = %err, "skipping invalid due");
                    warnings.push(format!("{entity}: {err}"));
                    invalid += 1;
                }
            }
        }

        let batch = if fresh.is_empty() {
            GeneratedBatch::default()
        } else {
            self.insert_with_retry(death_id, kind, fresh).await?
        };

        let total_amount = Amount::sum(batch.created.iter().map(Obligation::amount_owed))?;
        let mut report = GenerationReport {
            death_id,
            kind,
            eligible,
            already_existing,
            created: batch.created.len(),
            skipped_concurrently: batch.skipped,
            invalid,
            total_amount,
            created_ids: batch.created.iter().map(Obligation::id_typed).collect(),
            warnings,
        };

        info!(
            death_id = %death_id,
            kind = kind.as_str(),
            eligible = report.eligible,
            already_existing = report.already_existing,
            created = report.created,
            skipped = report.skipped_concurrently,
            invalid = report.invalid,
            total_amount = report.total_amount.value(),
            "due generation finished"
        );

        if report.created > 0 {
            publish_best_effort(
                &self.bus,
                LedgerNotice::DuesGenerated {
                    death_id,
                    kind,
                    created: report.created,
                    total_amount,
                    occurred_at: now,
                }
                .into_envelope(0),
                &mut report.warnings,
            );
        }

        Ok(report)
    }

    async fn insert_with_retry(
        &self,
        death_id: DeathId,
        kind: KindTag,
        obligations: Vec<Obligation>,
    ) -> Result<GeneratedBatch, LedgerError> {
        match self
            .store
            .insert_generated(death_id, kind, obligations.clone())
            .await
        {
            Err(StoreError::Concurrency(first)) => {
                warn!(death_id = %death_id, error = %first, "lock contention during generation, retrying once");
                Ok(self.store.insert_generated(death_id, kind, obligations).await?)
            }
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mutua_core::{CategoryId, LineageId, MemberId};
    use mutua_dues::{Category, Lineage, MemberStatus};
    use mutua_events::{InMemoryEventBus, Subscription};

    use crate::ledger_store::{InMemoryLedgerStore, ObligationFilter};
    use crate::registry::InMemoryRegistry;

    type Generator = DueGenerator<Arc<InMemoryLedgerStore>, Arc<InMemoryRegistry>, Arc<InMemoryEventBus<NoticeEnvelope>>>;

    struct World {
        generator: Generator,
        store: Arc<InMemoryLedgerStore>,
        registry: Arc<InMemoryRegistry>,
        notices: Subscription<NoticeEnvelope>,
        death: Death,
        lineages: Vec<Lineage>,
        category: Category,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn member(last: &str, status: MemberStatus, category: Option<CategoryId>, lineage: Option<LineageId>) -> Member {
        Member {
            id: MemberId::new(),
            last_name: last.into(),
            first_names: "A.".into(),
            status,
            lineage_id: lineage,
            category_id: category,
            email: None,
        }
    }

    /// Three eligible members, plus one exempt, one inactive, one in a
    /// category opening after the death and one without a category.
    fn world() -> World {
        let registry = Arc::new(InMemoryRegistry::new());
        let store = Arc::new(InMemoryLedgerStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let notices = bus.subscribe();

        let lineages: Vec<Lineage> = ["Mvog-Ada", "Mvog-Mbi", "Essos"]
            .into_iter()
            .map(|name| Lineage {
                id: LineageId::new(),
                name: name.into(),
                family_id: None,
            })
            .collect();
        for l in &lineages {
            registry.add_lineage(l.clone());
        }

        let category = Category {
            id: CategoryId::new(),
            label: "Adults".into(),
            eligibility_start: Some(date(2020, 1, 1)),
            lineage_due_amount: None,
        };
        let late = Category {
            id: CategoryId::new(),
            label: "Newcomers".into(),
            eligibility_start: Some(date(2030, 1, 1)),
            lineage_due_amount: None,
        };
        registry.add_category(category.clone());
        registry.add_category(late.clone());

        let deceased = member("MBARGA", MemberStatus::Deceased, Some(category.id), Some(lineages[0].id));
        registry.add_member(deceased.clone());
        for last in ["ABENA", "BELLA", "NKODO"] {
            registry.add_member(member(last, MemberStatus::Active, Some(category.id), Some(lineages[1].id)));
        }
        registry.add_member(member("EXEMPT", MemberStatus::ActiveExempt, Some(category.id), None));
        registry.add_member(member("IDLE", MemberStatus::Inactive, Some(category.id), None));
        registry.add_member(member("LATE", MemberStatus::Active, Some(late.id), None));
        registry.add_member(member("NOCAT", MemberStatus::Active, None, None));

        let death = Death {
            id: DeathId::new(),
            member_id: deceased.id,
            date: date(2024, 7, 14),
        };
        registry.record_death(death.clone());

        World {
            generator: DueGenerator::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                bus,
                EligibilityRules::default(),
            ),
            store,
            registry,
            notices,
            death,
            lineages,
            category,
        }
    }

    #[tokio::test]
    async fn member_generation_is_idempotent() {
        let w = world();

        let first = w.generator.generate_member_dues(w.death.id).await.unwrap();
        assert_eq!(first.eligible, 3);
        assert_eq!(first.already_existing, 0);
        assert_eq!(first.created, 3);
        assert_eq!(first.total_amount, Amount::new(1_500));

        let second = w.generator.generate_member_dues(w.death.id).await.unwrap();
        assert_eq!(second.eligible, 3);
        assert_eq!(second.already_existing, 3);
        assert_eq!(second.created, 0);
        assert_eq!(w.store.len(), 3);

        let notices = w.notices.drain();
        assert_eq!(notices.len(), 1, "only the run that created dues notifies");
    }

    #[tokio::test]
    async fn member_dues_carry_death_details() {
        let w = world();
        w.generator.generate_member_dues(w.death.id).await.unwrap();

        let dues = w
            .store
            .scan(&ObligationFilter {
                death_id: Some(w.death.id),
                ..ObligationFilter::default()
            })
            .await
            .unwrap();
        assert!(dues.iter().all(|o| o.issued_on() == w.death.date));
        assert!(dues.iter().all(|o| o.motif() == "Death of MBARGA A."));
        assert!(dues.iter().all(|o| o.amount_owed() == Amount::new(500)));
    }

    #[tokio::test]
    async fn invalid_drafts_are_skipped_and_counted() {
        let w = world();
        let generator = DueGenerator::new(
            Arc::clone(&w.store),
            Arc::clone(&w.registry),
            Arc::new(InMemoryEventBus::<NoticeEnvelope>::new()),
            EligibilityRules {
                member_due_amount: Amount::ZERO,
                ..EligibilityRules::default()
            },
        );

        let report = generator.generate_member_dues(w.death.id).await.unwrap();
        assert_eq!(report.eligible, 3);
        assert_eq!(report.invalid, 3);
        assert_eq!(report.created, 0);
        assert_eq!(report.warnings.len(), 3);
        assert_eq!(w.store.len(), 0);

        let valid = w.generator.generate_member_dues(w.death.id).await.unwrap();
        assert_eq!(valid.invalid, 0);
        assert_eq!(valid.created, 3);
    }

    #[tokio::test]
    async fn unknown_death_is_event_not_found() {
        let w = world();
        let err = w.generator.generate_member_dues(DeathId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::EventNotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn lineage_generation_excludes_deceased_lineage_on_request() {
        let w = world();
        let mut request = LineageDueRequest::new(w.death.id);
        request.exclude_deceased_lineage = true;
        request.issued_on = Some(date(2024, 7, 20));

        let report = w.generator.generate_lineage_dues(request).await.unwrap();
        assert_eq!(report.eligible, w.lineages.len() - 1);
        assert_eq!(report.created, 2);
        assert_eq!(report.total_amount, Amount::new(20_000));

        let dues = w
            .store
            .scan(&ObligationFilter {
                kind: Some(KindTag::LineageDue),
                ..ObligationFilter::default()
            })
            .await
            .unwrap();
        assert!(dues.iter().all(|o| o.due_by() == Some(date(2024, 8, 19))));
        assert!(dues.iter().all(|o| o.issued_on() == date(2024, 7, 20)));
    }

    #[tokio::test]
    async fn lineage_amount_prefers_category_rate() {
        let w = world();
        let mut rated = w.category.clone();
        rated.lineage_due_amount = Some(Amount::new(7_500));
        w.registry.add_category(rated);

        let mut request = LineageDueRequest::new(w.death.id);
        request.amount_per_lineage = Some(3_000);
        let report = w.generator.generate_lineage_dues(request).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.total_amount, Amount::new(22_500));
    }

    #[tokio::test]
    async fn cancelled_due_is_regenerated() {
        let w = world();
        let first = w.generator.generate_member_dues(w.death.id).await.unwrap();

        w.store
            .execute(mutua_dues::ObligationCommand::Cancel(mutua_dues::CancelObligation {
                obligation_id: first.created_ids[0],
                reason: None,
                occurred_at: Utc::now(),
            }))
            .await
            .unwrap();

        let again = w.generator.generate_member_dues(w.death.id).await.unwrap();
        assert_eq!(again.already_existing, 2);
        assert_eq!(again.created, 1);
    }
}
