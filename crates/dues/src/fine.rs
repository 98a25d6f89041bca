//! Fines: targets, nature, reference and the individual-to-lineage transfer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mutua_core::{CategoryId, DomainError, DomainResult, LineageId, MemberId, ObligationId, TargetId, UserId};

/// Whom an obligation (or a fine target) is assessed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Member(MemberId),
    Lineage(LineageId),
    Category(CategoryId),
}

impl EntityRef {
    pub fn kind_str(&self) -> &'static str {
        match self {
            EntityRef::Member(_) => "member",
            EntityRef::Lineage(_) => "lineage",
            EntityRef::Category(_) => "category",
        }
    }

    pub fn raw_id(&self) -> uuid::Uuid {
        match self {
            EntityRef::Member(id) => *id.as_uuid(),
            EntityRef::Lineage(id) => *id.as_uuid(),
            EntityRef::Category(id) => *id.as_uuid(),
        }
    }

    pub fn from_parts(kind: &str, id: uuid::Uuid) -> DomainResult<Self> {
        match kind {
            "member" => Ok(EntityRef::Member(MemberId::from_uuid(id))),
            "lineage" => Ok(EntityRef::Lineage(LineageId::from_uuid(id))),
            "category" => Ok(EntityRef::Category(CategoryId::from_uuid(id))),
            other => Err(DomainError::validation(format!("unknown entity kind: {other}"))),
        }
    }
}

impl core::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.raw_id())
    }
}

/// Pecuniary fines are money only; mixed fines also carry a non-monetary sanction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineNature {
    Pecuniary,
    Mixed,
}

impl FineNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            FineNature::Pecuniary => "pecuniary",
            FineNature::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pecuniary" => Some(FineNature::Pecuniary),
            "mixed" => Some(FineNature::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Active,
    /// One-way: an individual target whose liability moved to their lineage.
    Transferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTarget {
    pub id: TargetId,
    pub entity: EntityRef,
    pub display_name: String,
    pub state: TargetState,
}

impl FineTarget {
    pub fn is_active(&self) -> bool {
        self.state == TargetState::Active
    }

    /// An active individual target can be transferred to its lineage.
    pub fn is_transferable(&self) -> bool {
        self.is_active() && matches!(self.entity, EntityRef::Member(_))
    }
}

/// A target as supplied at creation or amendment, before ids are minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTargetDraft {
    pub entity: EntityRef,
    pub display_name: String,
}

impl FineTargetDraft {
    pub fn into_target(self) -> FineTarget {
        FineTarget {
            id: TargetId::new(),
            entity: self.entity,
            display_name: self.display_name,
            state: TargetState::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineDetails {
    /// `AM-YYYYMMDD-NNNN`.
    pub reference: String,
    pub nature: FineNature,
    /// Non-monetary part of a mixed fine.
    pub sanction: Option<String>,
    pub targets: Vec<FineTarget>,
    pub created_by: Option<UserId>,
}

impl FineDetails {
    pub fn first_transferable(&self) -> Option<&FineTarget> {
        self.targets.iter().find(|t| t.is_transferable())
    }

    pub fn has_transferred_target(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.state == TargetState::Transferred)
    }

    /// Entities currently liable for the fine.
    pub fn liable_entities(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.targets
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.entity)
    }
}

/// Validate a target list before it is attached to a fine.
pub fn validate_targets(targets: &[FineTarget]) -> DomainResult<()> {
    if targets.is_empty() {
        return Err(DomainError::validation("a fine needs at least one target"));
    }
    for (i, t) in targets.iter().enumerate() {
        if t.display_name.trim().is_empty() {
            return Err(DomainError::validation("fine target name is required"));
        }
        if targets[..i].iter().any(|other| other.entity == t.entity && other.is_active() && t.is_active()) {
            return Err(DomainError::validation(format!(
                "target {} is listed twice",
                t.display_name
            )));
        }
    }
    Ok(())
}

/// Validate nature-specific fields.
pub fn validate_nature(nature: FineNature, sanction: Option<&str>) -> DomainResult<()> {
    match (nature, sanction.map(str::trim)) {
        (FineNature::Mixed, None) | (FineNature::Mixed, Some("")) => Err(DomainError::validation(
            "a mixed fine needs a sanction description",
        )),
        _ => Ok(()),
    }
}

/// `AM-YYYYMMDD-NNNN`, the number taken from the random tail of the obligation id.
///
/// Deterministic: the same date and id always give the same reference, so a
/// restored fine keeps it. Two fines issued the same day may share a number;
/// the reference is a label, the obligation id stays the key.
pub fn fine_reference(issued_on: NaiveDate, id: ObligationId) -> String {
    let bytes = id.as_uuid().as_bytes();
    let n = u16::from_be_bytes([bytes[14], bytes[15]]) % 10_000;
    format!("AM-{}-{:04}", issued_on.format("%Y%m%d"), n)
}
