//! Who owes what when a member dies.

use std::collections::{HashMap, HashSet};

use chrono::{Days, NaiveDate};

use mutua_core::{Amount, CategoryId, DomainError, DomainResult, LineageId, MemberId};

use crate::membership::{Category, Death, Lineage, Member};
use crate::obligation::{DraftKind, ObligationDraft};

/// Amounts and switches used by due generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRules {
    pub member_due_amount: Amount,
    pub lineage_due_amount: Amount,
    pub lineage_grace_days: u32,
    pub exclude_deceased_lineage: bool,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self {
            member_due_amount: Amount::new(500),
            lineage_due_amount: Amount::new(10_000),
            lineage_grace_days: 30,
            exclude_deceased_lineage: false,
        }
    }
}

impl EligibilityRules {
    /// Members owing an individual due for `death`.
    ///
    /// Active, not the deceased, not themselves recorded as dead, and in a
    /// category whose eligibility started on or before the death date.
    pub fn eligible_members<'a>(
        &self,
        death: &Death,
        members: &'a [Member],
        categories: &HashMap<CategoryId, Category>,
        deceased: &HashSet<MemberId>,
    ) -> Vec<&'a Member> {
        members
            .iter()
            .filter(|m| m.status.owes_dues())
            .filter(|m| m.id != death.member_id && !deceased.contains(&m.id))
            .filter(|m| {
                m.category_id
                    .and_then(|c| categories.get(&c))
                    .is_some_and(|c| c.eligible_on(death.date))
            })
            .collect()
    }

    /// Lineages owing a lineage due, optionally without the deceased's own.
    pub fn eligible_lineages<'a>(
        &self,
        lineages: &'a [Lineage],
        deceased_lineage: Option<LineageId>,
        exclude_deceased_lineage: bool,
    ) -> Vec<&'a Lineage> {
        let excluded = if exclude_deceased_lineage || self.exclude_deceased_lineage {
            deceased_lineage
        } else {
            None
        };
        lineages
            .iter()
            .filter(|l| Some(l.id) != excluded)
            .collect()
    }

    pub fn member_due_draft(&self, death: &Death, deceased: &Member, member: &Member) -> ObligationDraft {
        ObligationDraft {
            kind: DraftKind::MemberDue {
                member_id: member.id,
            },
            amount: self.member_due_amount,
            motif: member_due_motif(deceased),
            description: None,
            death_id: Some(death.id),
            issued_on: death.date,
            due_by: None,
        }
    }

    pub fn lineage_due_draft(
        &self,
        death: &Death,
        deceased: &Member,
        lineage: &Lineage,
        amount: Amount,
        today: NaiveDate,
    ) -> DomainResult<ObligationDraft> {
        let due_by = today
            .checked_add_days(Days::new(u64::from(self.lineage_grace_days)))
            .ok_or_else(|| DomainError::invariant("due date out of range"))?;

        Ok(ObligationDraft {
            kind: DraftKind::LineageDue {
                lineage_id: lineage.id,
            },
            amount,
            motif: lineage_due_motif(deceased),
            description: Some(lineage_due_description(deceased, death.date)),
            death_id: Some(death.id),
            issued_on: today,
            due_by: Some(due_by),
        })
    }
}

/// Amount each lineage owes: the deceased's category rate when set, else the
/// requested amount, else the configured default.
pub fn lineage_due_amount(category: Option<&Category>, requested: Option<Amount>, default: Amount) -> Amount {
    category
        .and_then(|c| c.lineage_due_amount)
        .filter(|a| !a.is_zero())
        .or(requested.filter(|a| !a.is_zero()))
        .unwrap_or(default)
}

pub fn member_due_motif(deceased: &Member) -> String {
    format!("Death of {}", deceased.full_name())
}

pub fn lineage_due_motif(deceased: &Member) -> String {
    format!("Lineage due: death of {}", deceased.full_name())
}

pub fn lineage_due_description(deceased: &Member, date: NaiveDate) -> String {
    format!(
        "Lineage contribution for the death of {} on {}",
        deceased.full_name(),
        date.format("%d/%m/%Y")
    )
}
