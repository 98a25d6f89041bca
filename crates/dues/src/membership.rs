//! Membership records consumed by the ledger.
//!
//! The ledger never writes these; they come from the membership and death
//! registries and drive eligibility and display names.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mutua_core::{Amount, CategoryId, DeathId, FamilyId, LineageId, MemberId};

/// Membership status of a registered person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    /// Active but exempted from dues.
    ActiveExempt,
    Inactive,
    Deceased,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::ActiveExempt => "active_exempt",
            MemberStatus::Inactive => "inactive",
            MemberStatus::Deceased => "deceased",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(MemberStatus::Active),
            "active_exempt" => Some(MemberStatus::ActiveExempt),
            "inactive" => Some(MemberStatus::Inactive),
            "deceased" => Some(MemberStatus::Deceased),
            _ => None,
        }
    }

    /// Only plainly active members owe dues.
    pub fn owes_dues(&self) -> bool {
        matches!(self, MemberStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub last_name: String,
    pub first_names: String,
    pub status: MemberStatus,
    pub lineage_id: Option<LineageId>,
    pub category_id: Option<CategoryId>,
    pub email: Option<String>,
}

impl Member {
    /// "LAST First names", as printed on dues and receipts.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_names)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: LineageId,
    pub name: String,
    pub family_id: Option<FamilyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    pub name: String,
}

/// Membership category (age class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub label: String,
    /// Members of this category owe death dues for deaths on or after this date.
    /// `None` means the category never owes individual dues.
    pub eligibility_start: Option<NaiveDate>,
    /// Lineage due amount when someone of this category dies.
    pub lineage_due_amount: Option<Amount>,
}

impl Category {
    pub fn eligible_on(&self, date: NaiveDate) -> bool {
        self.eligibility_start.is_some_and(|start| start <= date)
    }
}

/// A recorded death: the triggering event of due generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Death {
    pub id: DeathId,
    pub member_id: MemberId,
    pub date: NaiveDate,
}
