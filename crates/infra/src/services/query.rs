//! Read-side aggregation over the ledger.
//!
//! Every figure is recomputed from obligations and their journals with the
//! balance rules of `mutua-dues`; nothing here keeps running totals.
//!
//! Fines with several live targets are joint liabilities. Per-entity figures
//! (balances, arrears) charge the full remaining amount to every target,
//! while global figures count each obligation once.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use mutua_core::{Amount, DomainError, DomainResult, FamilyId, LineageId, MemberId, ObligationId};
use mutua_dues::{Balance, EntityRef, KindTag, Member, MemberStatus, Obligation, ObligationStatus};

use crate::ledger_store::{LedgerStore, ObligationFilter};
use crate::registry::MembershipRegistry;

use super::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBalance {
    pub entity: EntityRef,
    pub total_owed: Amount,
    pub total_paid: Amount,
    pub outstanding: Amount,
    pub obligation_count: usize,
    pub open_count: usize,
    /// Member not active: owes nothing for now.
    pub exempt: bool,
}

impl EntityBalance {
    fn zero(entity: EntityRef, exempt: bool) -> Self {
        Self {
            entity,
            total_owed: Amount::ZERO,
            total_paid: Amount::ZERO,
            outstanding: Amount::ZERO,
            obligation_count: 0,
            open_count: 0,
            exempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLine {
    pub obligation_id: ObligationId,
    pub kind: KindTag,
    pub motif: String,
    pub issued_on: NaiveDate,
    pub due_by: Option<NaiveDate>,
    pub amount_owed: Amount,
    pub amount_paid: Amount,
    pub amount_remaining: Amount,
    pub status: ObligationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatement {
    pub member: Member,
    pub balance: EntityBalance,
    pub lines: Vec<BalanceLine>,
    /// Lines still awaiting payment.
    pub open: Vec<BalanceLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Period {
    /// Inclusive issue-date range.
    Range { from: NaiveDate, to: NaiveDate },
    Year { year: i32 },
}

impl Period {
    pub fn bounds(&self) -> DomainResult<(NaiveDate, NaiveDate)> {
        match *self {
            Period::Range { from, to } if from <= to => Ok((from, to)),
            Period::Range { .. } => Err(DomainError::validation("period starts after it ends")),
            Period::Year { year } => NaiveDate::from_ymd_opt(year, 1, 1)
                .zip(NaiveDate::from_ymd_opt(year, 12, 31))
                .ok_or_else(|| DomainError::validation(format!("year {year} out of range"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsFilter {
    pub period: Option<Period>,
    pub lineage: Option<LineageId>,
    pub family: Option<FamilyId>,
    pub kind: Option<KindTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTotals {
    pub count: usize,
    pub total_owed: Amount,
    pub total_paid: Amount,
    pub total_remaining: Amount,
    pub average_amount: Amount,
    /// Paid share of the owed total, in whole percent.
    pub payment_rate: u32,
    /// Journal sum of cancelled obligations.
    pub written_off: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    pub status: ObligationStatus,
    pub count: usize,
    pub total_owed: Amount,
    pub total_paid: Amount,
    pub total_remaining: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTotals {
    /// 1 to 12.
    pub month: u32,
    pub count: usize,
    pub total_owed: Amount,
    pub total_paid: Amount,
    pub total_remaining: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrears {
    pub entity: EntityRef,
    pub display_name: String,
    pub outstanding: Amount,
    pub obligation_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBalance {
    pub id: Uuid,
    pub name: String,
    pub member_count: usize,
    pub total_owed: Amount,
    pub total_paid: Amount,
    pub outstanding: Amount,
}

/// Owed / paid / remaining accumulator.
#[derive(Debug, Clone, Copy, Default)]
struct Sums {
    count: usize,
    owed: Amount,
    paid: Amount,
    remaining: Amount,
}

impl Sums {
    fn add(&mut self, balance: &Balance) -> DomainResult<()> {
        self.count += 1;
        self.owed = self.owed.checked_add(balance.amount_owed)?;
        self.paid = self.paid.checked_add(balance.amount_paid)?;
        self.remaining = self.remaining.checked_add(balance.amount_remaining)?;
        Ok(())
    }
}

/// Entities a lineage/family filter narrows to.
struct Scope {
    lineages: HashSet<LineageId>,
    members: HashSet<MemberId>,
}

impl Scope {
    fn covers(&self, o: &Obligation) -> bool {
        o.liable_entities().iter().any(|e| match e {
            EntityRef::Member(id) => self.members.contains(id),
            EntityRef::Lineage(id) => self.lineages.contains(id),
            EntityRef::Category(_) => false,
        })
    }
}

pub struct LedgerQueryService<S, R> {
    store: S,
    registry: R,
    default_top_n: usize,
}

impl<S, R> LedgerQueryService<S, R>
where
    S: LedgerStore,
    R: MembershipRegistry,
{
    pub fn new(store: S, registry: R) -> Self {
        Self {
            store,
            registry,
            default_top_n: 10,
        }
    }

    pub fn with_top_arrears_limit(mut self, n: usize) -> Self {
        self.default_top_n = n;
        self
    }

    /// Outstanding balance of one entity over its live obligations.
    #[instrument(skip(self, entity), fields(entity = %entity), err)]
    pub async fn entity_balance(&self, entity: EntityRef) -> Result<EntityBalance, LedgerError> {
        match entity {
            EntityRef::Member(id) => {
                let member = self.member(id).await?;
                if member.status != MemberStatus::Active {
                    return Ok(EntityBalance::zero(entity, true));
                }
            }
            EntityRef::Lineage(id) => {
                self.registry
                    .lineage(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found(format!("lineage {id}")))?;
            }
            EntityRef::Category(id) => {
                self.registry
                    .category(id)
                    .await?
                    .ok_or_else(|| DomainError::not_found(format!("category {id}")))?;
            }
        }

        let obligations = self.store.scan(&ObligationFilter::for_entity(entity)).await?;
        balance_of(entity, &obligations)
    }

    /// Balance plus one line per live obligation of the member.
    #[instrument(skip(self, member_id), fields(member_id = %member_id), err)]
    pub async fn member_statement(&self, member_id: MemberId) -> Result<MemberStatement, LedgerError> {
        let member = self.member(member_id).await?;
        let entity = EntityRef::Member(member_id);
        let obligations = self.store.scan(&ObligationFilter::for_entity(entity)).await?;

        let balance = if member.status == MemberStatus::Active {
            balance_of(entity, &obligations)?
        } else {
            EntityBalance::zero(entity, true)
        };

        let lines = obligations
            .iter()
            .map(line_of)
            .collect::<DomainResult<Vec<_>>>()?;
        let open = lines.iter().filter(|l| l.status.is_open()).cloned().collect();

        Ok(MemberStatement {
            member,
            balance,
            lines,
            open,
        })
    }

    /// Owed, paid and remaining over live obligations; written-off separately.
    #[instrument(skip(self, filter), err)]
    pub async fn global_totals(&self, filter: &TotalsFilter) -> Result<GlobalTotals, LedgerError> {
        let obligations = self.select(filter, true).await?;

        let mut sums = Sums::default();
        let mut written_off = Amount::ZERO;
        for o in &obligations {
            let balance = o.recompute()?;
            if o.is_live() {
                sums.add(&balance)?;
            } else {
                written_off = written_off.checked_add(balance.written_off)?;
            }
        }

        let average_amount = match sums.count {
            0 => Amount::ZERO,
            n => Amount::new(sums.owed.value() / n as u64),
        };
        let payment_rate = match sums.owed.value() {
            0 => 0,
            owed => ((u128::from(sums.paid.value()) * 100 + u128::from(owed) / 2) / u128::from(owed)) as u32,
        };

        Ok(GlobalTotals {
            count: sums.count,
            total_owed: sums.owed,
            total_paid: sums.paid,
            total_remaining: sums.remaining,
            average_amount,
            payment_rate,
            written_off,
        })
    }

    /// Count and sums per status, every status listed.
    pub async fn breakdown_by_status(&self, filter: &TotalsFilter) -> Result<Vec<StatusBreakdown>, LedgerError> {
        let obligations = self.select(filter, true).await?;

        let mut by_status: HashMap<ObligationStatus, Sums> = HashMap::new();
        for o in &obligations {
            let balance = o.recompute()?;
            by_status.entry(balance.status).or_default().add(&balance)?;
        }

        Ok(ObligationStatus::ALL
            .iter()
            .map(|&status| {
                let sums = by_status.get(&status).copied().unwrap_or_default();
                StatusBreakdown {
                    status,
                    count: sums.count,
                    total_owed: sums.owed,
                    total_paid: sums.paid,
                    total_remaining: sums.remaining,
                }
            })
            .collect())
    }

    /// Live obligations issued in `year`, per month (all twelve listed).
    pub async fn monthly_totals(&self, year: i32, filter: &TotalsFilter) -> Result<Vec<MonthlyTotals>, LedgerError> {
        let filter = TotalsFilter {
            period: Some(Period::Year { year }),
            ..*filter
        };
        let obligations = self.select(&filter, false).await?;

        let mut months: BTreeMap<u32, Sums> = (1..=12).map(|m| (m, Sums::default())).collect();
        for o in &obligations {
            let balance = o.recompute()?;
            months.entry(o.issued_on().month()).or_default().add(&balance)?;
        }

        Ok(months
            .into_iter()
            .map(|(month, sums)| MonthlyTotals {
                month,
                count: sums.count,
                total_owed: sums.owed,
                total_paid: sums.paid,
                total_remaining: sums.remaining,
            })
            .collect())
    }

    /// Entities with the largest outstanding amounts, largest first.
    ///
    /// Members who are not active are left out. Ties are ordered by entity id.
    #[instrument(skip(self, filter), err)]
    pub async fn top_arrears(&self, n: Option<usize>, filter: &TotalsFilter) -> Result<Vec<Arrears>, LedgerError> {
        let limit = n.unwrap_or(self.default_top_n);
        let obligations = self.select(filter, false).await?;

        let members: HashMap<MemberId, Member> = self
            .registry
            .members()
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut totals: HashMap<EntityRef, (Amount, usize)> = HashMap::new();
        for o in &obligations {
            let balance = o.recompute()?;
            if balance.amount_remaining.is_zero() {
                continue;
            }
            let entities: HashSet<EntityRef> = o.liable_entities().into_iter().collect();
            for entity in entities {
                if let EntityRef::Member(id) = entity {
                    if members.get(&id).is_none_or(|m| m.status != MemberStatus::Active) {
                        continue;
                    }
                }
                let entry = totals.entry(entity).or_insert((Amount::ZERO, 0));
                entry.0 = entry.0.checked_add(balance.amount_remaining)?;
                entry.1 += 1;
            }
        }

        let mut ranked: Vec<(EntityRef, Amount, usize)> = totals
            .into_iter()
            .map(|(entity, (outstanding, count))| (entity, outstanding, count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.raw_id().cmp(&b.0.raw_id())));
        ranked.truncate(limit);

        let mut out = Vec::with_capacity(ranked.len());
        for (entity, outstanding, obligation_count) in ranked {
            out.push(Arrears {
                display_name: self.display_name(entity, &members).await?,
                entity,
                outstanding,
                obligation_count,
            });
        }
        Ok(out)
    }

    /// Individual dues of active members, grouped by lineage.
    pub async fn balances_by_lineage(&self) -> Result<Vec<GroupBalance>, LedgerError> {
        let per_member = self.active_member_dues().await?;
        let lineages = self.registry.lineages().await?;

        let mut groups: Vec<GroupBalance> = Vec::with_capacity(lineages.len());
        for lineage in lineages {
            let mut group = empty_group(*lineage.id.as_uuid(), lineage.name);
            for (member, sums) in per_member.values() {
                if member.lineage_id == Some(lineage.id) {
                    add_to_group(&mut group, sums)?;
                }
            }
            groups.push(group);
        }
        sort_groups(&mut groups);
        Ok(groups)
    }

    /// Individual dues of active members, grouped by family (through lineages).
    pub async fn balances_by_family(&self) -> Result<Vec<GroupBalance>, LedgerError> {
        let per_member = self.active_member_dues().await?;
        let family_of: HashMap<LineageId, FamilyId> = self
            .registry
            .lineages()
            .await?
            .into_iter()
            .filter_map(|l| l.family_id.map(|f| (l.id, f)))
            .collect();
        let families = self.registry.families().await?;

        let mut groups: Vec<GroupBalance> = Vec::with_capacity(families.len());
        for family in families {
            let mut group = empty_group(*family.id.as_uuid(), family.name);
            for (member, sums) in per_member.values() {
                let in_family = member
                    .lineage_id
                    .and_then(|l| family_of.get(&l))
                    .is_some_and(|f| *f == family.id);
                if in_family {
                    add_to_group(&mut group, sums)?;
                }
            }
            groups.push(group);
        }
        sort_groups(&mut groups);
        Ok(groups)
    }

    async fn member(&self, id: MemberId) -> Result<Member, LedgerError> {
        self.registry
            .member(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("member {id}")).into())
    }

    /// Obligations matching the filter; cancelled ones only when asked for.
    async fn select(&self, filter: &TotalsFilter, with_cancelled: bool) -> Result<Vec<Obligation>, LedgerError> {
        let (issued_from, issued_to) = match filter.period {
            Some(period) => {
                let (from, to) = period.bounds()?;
                (Some(from), Some(to))
            }
            None => (None, None),
        };
        let store_filter = ObligationFilter {
            kind: filter.kind,
            issued_from,
            issued_to,
            include_cancelled: with_cancelled,
            ..ObligationFilter::default()
        };

        let obligations = self.store.scan(&store_filter).await?;
        match self.scope(filter).await? {
            Some(scope) => Ok(obligations.into_iter().filter(|o| scope.covers(o)).collect()),
            None => Ok(obligations),
        }
    }

    async fn scope(&self, filter: &TotalsFilter) -> Result<Option<Scope>, LedgerError> {
        if filter.lineage.is_none() && filter.family.is_none() {
            return Ok(None);
        }

        let lineages: HashSet<LineageId> = self
            .registry
            .lineages()
            .await?
            .into_iter()
            .filter(|l| filter.lineage.is_none_or(|id| id == l.id))
            .filter(|l| filter.family.is_none_or(|f| l.family_id == Some(f)))
            .map(|l| l.id)
            .collect();
        let members = self
            .registry
            .members()
            .await?
            .into_iter()
            .filter(|m| m.lineage_id.is_some_and(|l| lineages.contains(&l)))
            .map(|m| m.id)
            .collect();

        Ok(Some(Scope { lineages, members }))
    }

    /// Sums of live individual dues per active member.
    async fn active_member_dues(&self) -> Result<HashMap<MemberId, (Member, Sums)>, LedgerError> {
        let mut per_member: HashMap<MemberId, (Member, Sums)> = self
            .registry
            .members()
            .await?
            .into_iter()
            .filter(|m| m.status == MemberStatus::Active)
            .map(|m| (m.id, (m, Sums::default())))
            .collect();

        let dues = self
            .store
            .scan(&ObligationFilter {
                kind: Some(KindTag::MemberDue),
                ..ObligationFilter::default()
            })
            .await?;
        for o in &dues {
            let balance = o.recompute()?;
            for entity in o.liable_entities() {
                if let EntityRef::Member(id) = entity {
                    if let Some((_, sums)) = per_member.get_mut(&id) {
                        sums.add(&balance)?;
                    }
                }
            }
        }
        Ok(per_member)
    }

    async fn display_name(&self, entity: EntityRef, members: &HashMap<MemberId, Member>) -> Result<String, LedgerError> {
        let name = match entity {
            EntityRef::Member(id) => members.get(&id).map(Member::full_name),
            EntityRef::Lineage(id) => self.registry.lineage(id).await?.map(|l| l.name),
            EntityRef::Category(id) => self.registry.category(id).await?.map(|c| c.label),
        };
        Ok(name.unwrap_or_else(|| entity.to_string()))
    }
}

fn balance_of(entity: EntityRef, obligations: &[Obligation]) -> Result<EntityBalance, LedgerError> {
    let mut balance = EntityBalance::zero(entity, false);
    for o in obligations.iter().filter(|o| o.is_live()) {
        let b = o.recompute()?;
        balance.total_owed = balance.total_owed.checked_add(b.amount_owed)?;
        balance.total_paid = balance.total_paid.checked_add(b.amount_paid)?;
        balance.outstanding = balance.outstanding.checked_add(b.amount_remaining)?;
        balance.obligation_count += 1;
        if b.status.is_open() {
            balance.open_count += 1;
        }
    }
    Ok(balance)
}

fn line_of(o: &Obligation) -> DomainResult<BalanceLine> {
    let b = o.recompute()?;
    Ok(BalanceLine {
        obligation_id: o.id_typed(),
        kind: o.kind_tag(),
        motif: o.motif().to_string(),
        issued_on: o.issued_on(),
        due_by: o.due_by(),
        amount_owed: b.amount_owed,
        amount_paid: b.amount_paid,
        amount_remaining: b.amount_remaining,
        status: b.status,
    })
}

fn empty_group(id: Uuid, name: String) -> GroupBalance {
    GroupBalance {
        id,
        name,
        member_count: 0,
        total_owed: Amount::ZERO,
        total_paid: Amount::ZERO,
        outstanding: Amount::ZERO,
    }
}

fn add_to_group(group: &mut GroupBalance, sums: &Sums) -> DomainResult<()> {
    group.member_count += 1;
    group.total_owed = group.total_owed.checked_add(sums.owed)?;
    group.total_paid = group.total_paid.checked_add(sums.paid)?;
    group.outstanding = group.outstanding.checked_add(sums.remaining)?;
    Ok(())
}

fn sort_groups(groups: &mut [GroupBalance]) {
    groups.sort_by(|a, b| b.outstanding.cmp(&a.outstanding).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use mutua_core::{Aggregate, DeathId};
    use mutua_dues::{
        DraftKind, Family, FineNature, FineTargetDraft, Lineage, ObligationCommand,
        ObligationDraft, PaymentDetails, PaymentMode, RecordPayment,
    };

    use crate::ledger_store::InMemoryLedgerStore;
    use crate::registry::InMemoryRegistry;

    struct World {
        service: LedgerQueryService<Arc<InMemoryLedgerStore>, Arc<InMemoryRegistry>>,
        store: Arc<InMemoryLedgerStore>,
        registry: Arc<InMemoryRegistry>,
        lineage: Lineage,
        family: Family,
    }

    fn world() -> World {
        let registry = Arc::new(InMemoryRegistry::new());
        let store = Arc::new(InMemoryLedgerStore::new());
        let family = Family {
            id: FamilyId::new(),
            name: "Ewondo".into(),
        };
        let lineage = Lineage {
            id: LineageId::new(),
            name: "Mvog-Ada".into(),
            family_id: Some(family.id),
        };
        registry.add_family(family.clone());
        registry.add_lineage(lineage.clone());
        World {
            service: LedgerQueryService::new(Arc::clone(&store), Arc::clone(&registry)),
            store,
            registry,
            lineage,
            family,
        }
    }

    fn enrol(w: &World, last: &str, status: MemberStatus, in_lineage: bool) -> Member {
        let m = Member {
            id: MemberId::new(),
            last_name: last.into(),
            first_names: "B.".into(),
            status,
            lineage_id: in_lineage.then_some(w.lineage.id),
            category_id: None,
            email: None,
        };
        w.registry.add_member(m.clone());
        m
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    /// Open, insert and pay an obligation; returns it as stored.
    async fn due(w: &World, kind: DraftKind, owed: u64, paid: u64, issued_on: NaiveDate) -> Obligation {
        let mut o = Obligation::open(
            ObligationId::new(),
            ObligationDraft {
                kind,
                amount: Amount::new(owed),
                motif: "Contribution".into(),
                description: None,
                death_id: Some(DeathId::new()),
                issued_on,
                due_by: None,
            },
            Utc::now(),
        )
        .unwrap();
        if paid > 0 {
            o.execute(&ObligationCommand::RecordPayment(RecordPayment {
                obligation_id: o.id_typed(),
                amount: Amount::new(paid),
                details: PaymentDetails::new(PaymentMode::Cash, Utc::now()),
            }))
            .unwrap();
        }
        w.store.insert(o.clone()).await.unwrap();
        o
    }

    fn member_due(id: MemberId) -> DraftKind {
        DraftKind::MemberDue { member_id: id }
    }

    #[tokio::test]
    async fn entity_balance_sums_live_obligations() {
        let w = world();
        let m = enrol(&w, "ONDOA", MemberStatus::Active, true);
        due(&w, member_due(m.id), 500, 200, date(1, 10)).await;
        due(&w, member_due(m.id), 500, 500, date(2, 10)).await;
        let cancelled = due(&w, member_due(m.id), 500, 0, date(3, 10)).await;
        w.store
            .execute(ObligationCommand::Cancel(mutua_dues::CancelObligation {
                obligation_id: cancelled.id_typed(),
                reason: None,
                occurred_at: Utc::now(),
            }))
            .await
            .unwrap();

        let balance = w.service.entity_balance(EntityRef::Member(m.id)).await.unwrap();
        assert_eq!(balance.obligation_count, 2);
        assert_eq!(balance.open_count, 1);
        assert_eq!(balance.total_owed, Amount::new(1_000));
        assert_eq!(balance.total_paid, Amount::new(700));
        assert_eq!(balance.outstanding, Amount::new(300));
        assert!(!balance.exempt);
    }

    #[tokio::test]
    async fn inactive_member_owes_nothing() {
        let w = world();
        let m = enrol(&w, "EXEMPT", MemberStatus::ActiveExempt, true);
        due(&w, member_due(m.id), 500, 0, date(1, 10)).await;

        let balance = w.service.entity_balance(EntityRef::Member(m.id)).await.unwrap();
        assert!(balance.exempt);
        assert_eq!(balance.outstanding, Amount::ZERO);

        let statement = w.service.member_statement(m.id).await.unwrap();
        assert_eq!(statement.lines.len(), 1);
        assert!(statement.balance.exempt);
    }

    #[tokio::test]
    async fn global_totals_report_rate_and_write_offs() {
        let w = world();
        let m = enrol(&w, "ATEBA", MemberStatus::Active, true);
        due(&w, member_due(m.id), 10_000, 4_000, date(1, 5)).await;
        due(&w, member_due(m.id), 500, 500, date(1, 6)).await;
        let partly = due(&w, member_due(m.id), 1_000, 300, date(1, 7)).await;
        w.store
            .execute(ObligationCommand::Cancel(mutua_dues::CancelObligation {
                obligation_id: partly.id_typed(),
                reason: Some("member left".into()),
                occurred_at: Utc::now(),
            }))
            .await
            .unwrap();

        let totals = w.service.global_totals(&TotalsFilter::default()).await.unwrap();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.total_owed, Amount::new(10_500));
        assert_eq!(totals.total_paid, Amount::new(4_500));
        assert_eq!(totals.total_remaining, Amount::new(6_000));
        assert_eq!(totals.average_amount, Amount::new(5_250));
        assert_eq!(totals.payment_rate, 43);
        assert_eq!(totals.written_off, Amount::new(300));
    }

    #[tokio::test]
    async fn totals_filter_by_family_and_period() {
        let w = world();
        let inside = enrol(&w, "INSIDE", MemberStatus::Active, true);
        let outside = enrol(&w, "OUTSIDE", MemberStatus::Active, false);
        due(&w, member_due(inside.id), 500, 0, date(1, 5)).await;
        due(&w, member_due(inside.id), 700, 0, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()).await;
        due(&w, member_due(outside.id), 900, 0, date(1, 5)).await;
        due(&w, DraftKind::LineageDue { lineage_id: w.lineage.id }, 10_000, 0, date(2, 1)).await;

        let filter = TotalsFilter {
            family: Some(w.family.id),
            period: Some(Period::Year { year: 2024 }),
            ..TotalsFilter::default()
        };
        let totals = w.service.global_totals(&filter).await.unwrap();
        assert_eq!(totals.count, 2);
        assert_eq!(totals.total_owed, Amount::new(10_500));

        let months = w.service.monthly_totals(2024, &filter).await.unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0].total_owed, Amount::new(500));
        assert_eq!(months[1].total_owed, Amount::new(10_000));
        assert_eq!(months[2].count, 0);
    }

    #[tokio::test]
    async fn breakdown_lists_every_status() {
        let w = world();
        let m = enrol(&w, "NGUELE", MemberStatus::Active, false);
        due(&w, member_due(m.id), 500, 0, date(1, 1)).await;
        due(&w, member_due(m.id), 500, 100, date(1, 1)).await;

        let breakdown = w.service.breakdown_by_status(&TotalsFilter::default()).await.unwrap();
        assert_eq!(breakdown.len(), ObligationStatus::ALL.len());
        let partial = breakdown
            .iter()
            .find(|b| b.status == ObligationStatus::PartiallyPaid)
            .unwrap();
        assert_eq!(partial.count, 1);
        assert_eq!(partial.total_remaining, Amount::new(400));
    }

    #[tokio::test]
    async fn top_arrears_charges_joint_fines_to_each_target() {
        let w = world();
        let a = enrol(&w, "AKONO", MemberStatus::Active, true);
        let b = enrol(&w, "BODO", MemberStatus::Active, true);
        let gone = enrol(&w, "GONE", MemberStatus::Inactive, true);

        due(&w, member_due(a.id), 500, 0, date(1, 1)).await;
        due(&w, member_due(gone.id), 5_000, 0, date(1, 1)).await;
        due(
            &w,
            DraftKind::Fine {
                nature: FineNature::Pecuniary,
                sanction: None,
                targets: vec![
                    FineTargetDraft {
                        entity: EntityRef::Member(a.id),
                        display_name: a.full_name(),
                    },
                    FineTargetDraft {
                        entity: EntityRef::Member(b.id),
                        display_name: b.full_name(),
                    },
                ],
                created_by: None,
            },
            2_000,
            0,
            date(1, 2),
        )
        .await;

        let top = w.service.top_arrears(None, &TotalsFilter::default()).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].entity, EntityRef::Member(a.id));
        assert_eq!(top[0].outstanding, Amount::new(2_500));
        assert_eq!(top[0].display_name, "AKONO B.");
        assert_eq!(top[1].outstanding, Amount::new(2_000));

        let totals = w.service.global_totals(&TotalsFilter::default()).await.unwrap();
        assert_eq!(totals.total_remaining, Amount::new(7_500));

        let limited = w.service.top_arrears(Some(1), &TotalsFilter::default()).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn grouped_balances_follow_lineage_and_family() {
        let w = world();
        let m = enrol(&w, "ESSOMBA", MemberStatus::Active, true);
        enrol(&w, "LONER", MemberStatus::Active, false);
        due(&w, member_due(m.id), 500, 100, date(1, 1)).await;

        let by_lineage = w.service.balances_by_lineage().await.unwrap();
        assert_eq!(by_lineage.len(), 1);
        assert_eq!(by_lineage[0].name, "Mvog-Ada");
        assert_eq!(by_lineage[0].member_count, 1);
        assert_eq!(by_lineage[0].outstanding, Amount::new(400));

        let by_family = w.service.balances_by_family().await.unwrap();
        assert_eq!(by_family[0].id, *w.family.id.as_uuid());
        assert_eq!(by_family[0].total_paid, Amount::new(100));
    }

    #[test]
    fn period_bounds() {
        assert_eq!(
            Period::Year { year: 2024 }.bounds().unwrap(),
            (date(1, 1), date(12, 31))
        );
        assert!(Period::Range { from: date(2, 1), to: date(1, 1) }.bounds().is_err());
    }
}
