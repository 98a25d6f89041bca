//! Filters and pagination for obligation and journal listings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use mutua_core::{DeathId, ObligationId};
use mutua_dues::{EntityRef, KindTag, Obligation, ObligationStatus, Payment, PaymentMode};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    /// 0-based offset.
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Slice an already-filtered, already-ordered collection.
    pub fn paginate<T>(self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items: Vec<T> = items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect();
        Page::new(items, total, self)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matching rows across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let seen = u64::from(pagination.offset) + items.len() as u64;
        Self {
            has_more: seen < total,
            items,
            total,
            pagination,
        }
    }
}

/// Obligation listing filter. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationFilter {
    pub kind: Option<KindTag>,
    pub status: Option<ObligationStatus>,
    /// Obligations this entity is currently liable for (fine targets included).
    pub entity: Option<EntityRef>,
    pub death_id: Option<DeathId>,
    pub issued_from: Option<NaiveDate>,
    pub issued_to: Option<NaiveDate>,
    /// Case-insensitive match on motif, description or fine reference.
    pub search: Option<String>,
    /// Cancelled obligations are hidden unless asked for.
    pub include_cancelled: bool,
}

impl ObligationFilter {
    pub fn for_entity(entity: EntityRef) -> Self {
        Self {
            entity: Some(entity),
            ..Self::default()
        }
    }

    pub fn with_cancelled(mut self) -> Self {
        self.include_cancelled = true;
        self
    }

    pub fn shows_cancelled(&self) -> bool {
        self.include_cancelled || self.status == Some(ObligationStatus::Cancelled)
    }

    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, o: &Obligation) -> bool {
        if !o.is_live() && !self.shows_cancelled() {
            return false;
        }
        if self.kind.is_some_and(|k| k != o.kind_tag()) {
            return false;
        }
        if self.status.is_some_and(|s| s != o.status()) {
            return false;
        }
        if self.death_id.is_some() && self.death_id != o.death_id() {
            return false;
        }
        if self.issued_from.is_some_and(|d| o.issued_on() < d) {
            return false;
        }
        if self.issued_to.is_some_and(|d| o.issued_on() > d) {
            return false;
        }
        if let Some(entity) = self.entity {
            if !o.liable_entities().contains(&entity) {
                return false;
            }
        }
        if let Some(term) = self.search_term() {
            let hit = o.motif().to_lowercase().contains(&term)
                || o.description().is_some_and(|d| d.to_lowercase().contains(&term))
                || o.fine().is_some_and(|f| f.reference.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Journal listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFilter {
    pub obligation_id: Option<ObligationId>,
    pub paid_from: Option<DateTime<Utc>>,
    pub paid_to: Option<DateTime<Utc>>,
    pub mode: Option<PaymentMode>,
}

impl JournalFilter {
    pub fn matches(&self, p: &Payment) -> bool {
        self.obligation_id.is_none_or(|id| id == p.obligation_id)
            && self.paid_from.is_none_or(|from| p.paid_at >= from)
            && self.paid_to.is_none_or(|to| p.paid_at <= to)
            && self.mode.is_none_or(|m| m == p.mode)
    }
}

/// Newest first, ties by id so pages are stable.
pub(crate) fn sort_obligations(items: &mut [Obligation]) {
    items.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id_typed().cmp(&a.id_typed()))
    });
}

pub(crate) fn sort_payments(items: &mut [Payment]) {
    items.sort_by(|a, b| b.paid_at.cmp(&a.paid_at).then_with(|| b.id.cmp(&a.id)));
}
