use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use mutua_core::{
    Aggregate, AggregateRoot, Amount, DeathId, DomainError, DomainResult, LineageId, MemberId,
    ObligationId, TargetId, UserId,
};
use mutua_events::Event;

use crate::balance::{self, Balance, ObligationStatus, Standing};
use crate::fine::{
    self, EntityRef, FineDetails, FineNature, FineTarget, FineTargetDraft, TargetState,
};
use crate::payment::{Payment, PaymentDetails};

/// Discriminant of [`ObligationKind`], used in filters and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindTag {
    MemberDue,
    LineageDue,
    Fine,
}

impl KindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            KindTag::MemberDue => "member_due",
            KindTag::LineageDue => "lineage_due",
            KindTag::Fine => "fine",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "member_due" => Some(KindTag::MemberDue),
            "lineage_due" => Some(KindTag::LineageDue),
            "fine" => Some(KindTag::Fine),
            _ => None,
        }
    }
}

/// What an obligation is, with the fields only that kind carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObligationKind {
    MemberDue { member_id: MemberId },
    LineageDue { lineage_id: LineageId },
    Fine(FineDetails),
}

impl ObligationKind {
    pub fn tag(&self) -> KindTag {
        match self {
            ObligationKind::MemberDue { .. } => KindTag::MemberDue,
            ObligationKind::LineageDue { .. } => KindTag::LineageDue,
            ObligationKind::Fine(_) => KindTag::Fine,
        }
    }

    /// Entities currently answerable for the obligation.
    ///
    /// A fine with several active targets is a joint liability of all of them.
    pub fn liable_entities(&self) -> Vec<EntityRef> {
        match self {
            ObligationKind::MemberDue { member_id } => vec![EntityRef::Member(*member_id)],
            ObligationKind::LineageDue { lineage_id } => vec![EntityRef::Lineage(*lineage_id)],
            ObligationKind::Fine(details) => details.liable_entities().collect(),
        }
    }
}

/// At most one live obligation exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DuplicateKey {
    pub kind: KindTag,
    pub entity: EntityRef,
    pub death_id: DeathId,
}

impl core::fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} for {} on death {}", self.kind.as_str(), self.entity, self.death_id)
    }
}

/// Kind-specific input of a new obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DraftKind {
    MemberDue {
        member_id: MemberId,
    },
    LineageDue {
        lineage_id: LineageId,
    },
    Fine {
        nature: FineNature,
        sanction: Option<String>,
        targets: Vec<FineTargetDraft>,
        created_by: Option<UserId>,
    },
}

/// Input of a new obligation, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationDraft {
    pub kind: DraftKind,
    pub amount: Amount,
    pub motif: String,
    pub description: Option<String>,
    pub death_id: Option<DeathId>,
    pub issued_on: NaiveDate,
    pub due_by: Option<NaiveDate>,
}

impl ObligationDraft {
    /// Duplicate key the draft would occupy, if it is tied to a death.
    pub fn duplicate_key(&self) -> Option<DuplicateKey> {
        let death_id = self.death_id?;
        match &self.kind {
            DraftKind::MemberDue { member_id } => Some(DuplicateKey {
                kind: KindTag::MemberDue,
                entity: EntityRef::Member(*member_id),
                death_id,
            }),
            DraftKind::LineageDue { lineage_id } => Some(DuplicateKey {
                kind: KindTag::LineageDue,
                entity: EntityRef::Lineage(*lineage_id),
                death_id,
            }),
            DraftKind::Fine { .. } => None,
        }
    }
}

/// Persisted fields of an obligation, used to restore it from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationParts {
    pub id: ObligationId,
    pub kind: ObligationKind,
    pub amount_owed: Amount,
    pub motif: String,
    pub description: Option<String>,
    pub death_id: Option<DeathId>,
    pub issued_on: NaiveDate,
    pub due_by: Option<NaiveDate>,
    pub payments: Vec<Payment>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    /// Status column as stored; checked against the journal on restore.
    pub cached_status: Option<ObligationStatus>,
}

/// Aggregate root: a due or a fine, with its payment journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    id: ObligationId,
    kind: ObligationKind,
    amount_owed: Amount,
    motif: String,
    description: Option<String>,
    death_id: Option<DeathId>,
    issued_on: NaiveDate,
    due_by: Option<NaiveDate>,

    status: ObligationStatus,
    amount_paid: Amount,
    amount_remaining: Amount,
    written_off: Amount,
    payments: Vec<Payment>,

    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Obligation {
    /// Validate a draft and open a new, unpaid obligation.
    pub fn open(id: ObligationId, draft: ObligationDraft, now: DateTime<Utc>) -> DomainResult<Self> {
        if draft.amount.is_zero() {
            return Err(DomainError::validation("amount must be positive"));
        }
        let motif = draft.motif.trim().to_string();
        if motif.is_empty() {
            return Err(DomainError::validation("motif is required"));
        }
        if let Some(due_by) = draft.due_by {
            if due_by < draft.issued_on {
                return Err(DomainError::validation("due date precedes issue date"));
            }
        }

        let kind = match draft.kind {
            DraftKind::MemberDue { member_id } => ObligationKind::MemberDue { member_id },
            DraftKind::LineageDue { lineage_id } => ObligationKind::LineageDue { lineage_id },
            DraftKind::Fine {
                nature,
                sanction,
                targets,
                created_by,
            } => {
                fine::validate_nature(nature, sanction.as_deref())?;
                let targets: Vec<FineTarget> =
                    targets.into_iter().map(FineTargetDraft::into_target).collect();
                fine::validate_targets(&targets)?;
                ObligationKind::Fine(FineDetails {
                    reference: fine::fine_reference(draft.issued_on, id),
                    nature,
                    sanction,
                    targets,
                    created_by,
                })
            }
        };

        Ok(Self {
            id,
            kind,
            amount_owed: draft.amount,
            motif,
            description: draft.description,
            death_id: draft.death_id,
            issued_on: draft.issued_on,
            due_by: draft.due_by,
            status: ObligationStatus::Unpaid,
            amount_paid: Amount::ZERO,
            amount_remaining: draft.amount,
            written_off: Amount::ZERO,
            payments: Vec::new(),
            cancelled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Rebuild from storage, recomputing the balance from the journal.
    ///
    /// Fails with `InvariantViolation` when the journal overpays the obligation
    /// or the stored status disagrees with the computed one.
    pub fn restore(parts: ObligationParts) -> DomainResult<Self> {
        let mut obligation = Self {
            id: parts.id,
            kind: parts.kind,
            amount_owed: parts.amount_owed,
            motif: parts.motif,
            description: parts.description,
            death_id: parts.death_id,
            issued_on: parts.issued_on,
            due_by: parts.due_by,
            status: ObligationStatus::Unpaid,
            amount_paid: Amount::ZERO,
            amount_remaining: parts.amount_owed,
            written_off: Amount::ZERO,
            payments: parts.payments,
            cancelled_at: parts.cancelled_at,
            cancel_reason: parts.cancel_reason,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
        };

        let derived = obligation.recompute()?;
        if let Some(cached) = parts.cached_status {
            if cached != derived.status {
                return Err(DomainError::invariant(format!(
                    "stored status {cached} disagrees with journal-derived status {}",
                    derived.status
                )));
            }
        }
        obligation.set_balance(derived);
        Ok(obligation)
    }

    pub fn id_typed(&self) -> ObligationId {
        self.id
    }

    pub fn kind(&self) -> &ObligationKind {
        &self.kind
    }

    pub fn kind_tag(&self) -> KindTag {
        self.kind.tag()
    }

    pub fn fine(&self) -> Option<&FineDetails> {
        match &self.kind {
            ObligationKind::Fine(details) => Some(details),
            _ => None,
        }
    }

    pub fn amount_owed(&self) -> Amount {
        self.amount_owed
    }

    pub fn amount_paid(&self) -> Amount {
        self.amount_paid
    }

    pub fn amount_remaining(&self) -> Amount {
        self.amount_remaining
    }

    pub fn written_off(&self) -> Amount {
        self.written_off
    }

    pub fn status(&self) -> ObligationStatus {
        self.status
    }

    pub fn motif(&self) -> &str {
        &self.motif
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn death_id(&self) -> Option<DeathId> {
        self.death_id
    }

    pub fn issued_on(&self) -> NaiveDate {
        self.issued_on
    }

    pub fn due_by(&self) -> Option<NaiveDate> {
        self.due_by
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_live(&self) -> bool {
        self.cancelled_at.is_none()
    }

    pub fn liable_entities(&self) -> Vec<EntityRef> {
        self.kind.liable_entities()
    }

    /// Cached balance, as last written by `apply`.
    pub fn balance(&self) -> Balance {
        Balance {
            amount_owed: self.amount_owed,
            amount_paid: self.amount_paid,
            amount_remaining: self.amount_remaining,
            written_off: self.written_off,
            status: self.status,
        }
    }

    /// Balance recomputed from the journal.
    pub fn recompute(&self) -> DomainResult<Balance> {
        balance::compute(self.amount_owed, &self.payments, self.standing())
    }

    pub fn standing(&self) -> Standing {
        if self.cancelled_at.is_some() {
            Standing::Cancelled
        } else if self.fine().is_some_and(FineDetails::has_transferred_target) {
            Standing::Transferred
        } else {
            Standing::Open
        }
    }

    pub fn duplicate_key(&self) -> Option<DuplicateKey> {
        let death_id = self.death_id?;
        let entity = match &self.kind {
            ObligationKind::MemberDue { member_id } => EntityRef::Member(*member_id),
            ObligationKind::LineageDue { lineage_id } => EntityRef::Lineage(*lineage_id),
            ObligationKind::Fine(_) => return None,
        };
        Some(DuplicateKey {
            kind: self.kind_tag(),
            entity,
            death_id,
        })
    }

    fn set_balance(&mut self, b: Balance) {
        self.amount_paid = b.amount_paid;
        self.amount_remaining = b.amount_remaining;
        self.written_off = b.written_off;
        self.status = b.status;
    }
}

impl AggregateRoot for Obligation {
    type Id = ObligationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordPayment (partial settlement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub obligation_id: ObligationId,
    pub amount: Amount,
    pub details: PaymentDetails,
}

/// Command: SettleInFull (pay whatever remains).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleInFull {
    pub obligation_id: ObligationId,
    pub details: PaymentDetails,
}

/// Command: AmendObligation. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendObligation {
    pub obligation_id: ObligationId,
    pub amount: Option<Amount>,
    pub motif: Option<String>,
    pub description: Option<String>,
    pub due_by: Option<NaiveDate>,
    /// Full replacement of a fine's targets.
    pub targets: Option<Vec<FineTarget>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelObligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelObligation {
    pub obligation_id: ObligationId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Lineage of an individual fine target, resolved before the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLineage {
    pub member_id: MemberId,
    pub lineage_id: LineageId,
    pub lineage_name: String,
}

/// Command: TransferFine.
///
/// `lineages` maps the fine's individual targets to their lineages; the
/// target to transfer is chosen by `handle` against current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFine {
    pub obligation_id: ObligationId,
    pub lineages: Vec<MemberLineage>,
    pub new_target_id: TargetId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationCommand {
    RecordPayment(RecordPayment),
    SettleInFull(SettleInFull),
    Amend(AmendObligation),
    Cancel(CancelObligation),
    TransferFine(TransferFine),
}

impl ObligationCommand {
    pub fn obligation_id(&self) -> ObligationId {
        match self {
            ObligationCommand::RecordPayment(c) => c.obligation_id,
            ObligationCommand::SettleInFull(c) => c.obligation_id,
            ObligationCommand::Amend(c) => c.obligation_id,
            ObligationCommand::Cancel(c) => c.obligation_id,
            ObligationCommand::TransferFine(c) => c.obligation_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObligationCommand::RecordPayment(_) => "record_payment",
            ObligationCommand::SettleInFull(_) => "settle_in_full",
            ObligationCommand::Amend(_) => "amend",
            ObligationCommand::Cancel(_) => "cancel",
            ObligationCommand::TransferFine(_) => "transfer_fine",
        }
    }
}

/// Event: PaymentRecorded. Carries the balance after the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub obligation_id: ObligationId,
    pub payment: Payment,
    pub amount_paid: Amount,
    pub amount_remaining: Amount,
    pub status: ObligationStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ObligationAmended. Carries the resulting core fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationAmended {
    pub obligation_id: ObligationId,
    pub amount_owed: Amount,
    pub motif: String,
    pub description: Option<String>,
    pub due_by: Option<NaiveDate>,
    pub targets: Option<Vec<FineTarget>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ObligationCancelled. The journal is kept; its sum is written off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationCancelled {
    pub obligation_id: ObligationId,
    pub reason: Option<String>,
    pub written_off: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FineTransferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTransferred {
    pub obligation_id: ObligationId,
    pub from_target: TargetId,
    pub member_id: MemberId,
    pub lineage_target: FineTarget,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationEvent {
    PaymentRecorded(PaymentRecorded),
    ObligationAmended(ObligationAmended),
    ObligationCancelled(ObligationCancelled),
    FineTransferred(FineTransferred),
}

impl Event for ObligationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ObligationEvent::PaymentRecorded(_) => "ledger.obligation.payment_recorded",
            ObligationEvent::ObligationAmended(_) => "ledger.obligation.amended",
            ObligationEvent::ObligationCancelled(_) => "ledger.obligation.cancelled",
            ObligationEvent::FineTransferred(_) => "ledger.fine.transferred",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ObligationEvent::PaymentRecorded(e) => e.occurred_at,
            ObligationEvent::ObligationAmended(e) => e.occurred_at,
            ObligationEvent::ObligationCancelled(e) => e.occurred_at,
            ObligationEvent::FineTransferred(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Obligation {
    type Command = ObligationCommand;
    type Event = ObligationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ObligationEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.amount_paid = e.amount_paid;
                self.amount_remaining = e.amount_remaining;
                self.status = e.status;
                self.updated_at = e.occurred_at;
            }
            ObligationEvent::ObligationAmended(e) => {
                self.amount_owed = e.amount_owed;
                self.amount_remaining =
                    Amount::new(e.amount_owed.value().saturating_sub(self.amount_paid.value()));
                self.motif = e.motif.clone();
                self.description = e.description.clone();
                self.due_by = e.due_by;
                if let (Some(targets), ObligationKind::Fine(details)) = (&e.targets, &mut self.kind) {
                    details.targets = targets.clone();
                }
                self.updated_at = e.occurred_at;
            }
            ObligationEvent::ObligationCancelled(e) => {
                self.cancelled_at = Some(e.occurred_at);
                self.cancel_reason = e.reason.clone();
                self.amount_paid = Amount::ZERO;
                self.amount_remaining = Amount::ZERO;
                self.written_off = e.written_off;
                self.status = ObligationStatus::Cancelled;
                self.updated_at = e.occurred_at;
            }
            ObligationEvent::FineTransferred(e) => {
                if let ObligationKind::Fine(details) = &mut self.kind {
                    if let Some(target) = details.targets.iter_mut().find(|t| t.id == e.from_target) {
                        target.state = TargetState::Transferred;
                    }
                    details.targets.push(e.lineage_target.clone());
                }
                self.status = balance::derive_status(
                    self.amount_paid,
                    self.amount_remaining,
                    Standing::Transferred,
                );
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.obligation_id() != self.id {
            return Err(DomainError::invariant("obligation_id mismatch"));
        }

        match command {
            ObligationCommand::RecordPayment(cmd) => self.handle_payment(cmd.amount, &cmd.details),
            ObligationCommand::SettleInFull(cmd) => self.handle_settle_in_full(cmd),
            ObligationCommand::Amend(cmd) => self.handle_amend(cmd),
            ObligationCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ObligationCommand::TransferFine(cmd) => self.handle_transfer(cmd),
        }
    }
}

impl Obligation {
    fn ensure_collectable(&self) -> DomainResult<()> {
        if self.status == ObligationStatus::Cancelled {
            return Err(DomainError::CancelledObligation);
        }
        if self.amount_remaining.is_zero() {
            return Err(DomainError::AlreadySettled);
        }
        Ok(())
    }

    fn handle_payment(
        &self,
        amount: Amount,
        details: &PaymentDetails,
    ) -> Result<Vec<ObligationEvent>, DomainError> {
        if amount.is_zero() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        self.ensure_collectable()?;

        if amount > self.amount_remaining {
            return Err(DomainError::Overpayment {
                requested: amount.value(),
                remaining: self.amount_remaining.value(),
            });
        }

        let amount_paid = self.amount_paid.checked_add(amount)?;
        let amount_remaining = self.amount_owed.checked_sub(amount_paid)?;
        let status = balance::derive_status(amount_paid, amount_remaining, self.standing());

        Ok(vec![ObligationEvent::PaymentRecorded(PaymentRecorded {
            obligation_id: self.id,
            payment: details.clone().into_payment(self.id, amount),
            amount_paid,
            amount_remaining,
            status,
            occurred_at: details.paid_at,
        })])
    }

    fn handle_settle_in_full(&self, cmd: &SettleInFull) -> Result<Vec<ObligationEvent>, DomainError> {
        self.ensure_collectable()?;
        self.handle_payment(self.amount_remaining, &cmd.details)
    }

    fn handle_amend(&self, cmd: &AmendObligation) -> Result<Vec<ObligationEvent>, DomainError> {
        if self.status != ObligationStatus::Unpaid {
            return Err(DomainError::immutable(format!(
                "only unpaid obligations can be amended (status is {})",
                self.status
            )));
        }

        let amount_owed = match cmd.amount {
            Some(a) if a.is_zero() => {
                return Err(DomainError::validation("amount must be positive"));
            }
            Some(a) => a,
            None => self.amount_owed,
        };

        let motif = match cmd.motif.as_deref().map(str::trim) {
            Some("") => return Err(DomainError::validation("motif is required")),
            Some(m) => m.to_string(),
            None => self.motif.clone(),
        };

        let due_by = cmd.due_by.or(self.due_by);
        if due_by.is_some_and(|d| d < self.issued_on) {
            return Err(DomainError::validation("due date precedes issue date"));
        }

        if let Some(targets) = &cmd.targets {
            if self.fine().is_none() {
                return Err(DomainError::validation("only fines have targets"));
            }
            fine::validate_targets(targets)?;
        }

        Ok(vec![ObligationEvent::ObligationAmended(ObligationAmended {
            obligation_id: self.id,
            amount_owed,
            motif,
            description: cmd.description.clone().or_else(|| self.description.clone()),
            due_by,
            targets: cmd.targets.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelObligation) -> Result<Vec<ObligationEvent>, DomainError> {
        match self.status {
            ObligationStatus::Cancelled => return Err(DomainError::CancelledObligation),
            ObligationStatus::Paid => return Err(DomainError::AlreadySettled),
            _ => {}
        }

        Ok(vec![ObligationEvent::ObligationCancelled(ObligationCancelled {
            obligation_id: self.id,
            reason: cmd.reason.clone(),
            written_off: self.amount_paid,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferFine) -> Result<Vec<ObligationEvent>, DomainError> {
        let Some(details) = self.fine() else {
            return Err(DomainError::validation("only fines can be transferred"));
        };
        match self.status {
            ObligationStatus::Cancelled => return Err(DomainError::CancelledObligation),
            ObligationStatus::Paid => return Err(DomainError::AlreadyPaid),
            _ => {}
        }

        let target = details
            .first_transferable()
            .ok_or(DomainError::NoTransferableTarget)?;
        let EntityRef::Member(member_id) = target.entity else {
            return Err(DomainError::NoTransferableTarget);
        };

        let lineage = cmd
            .lineages
            .iter()
            .find(|l| l.member_id == member_id)
            .ok_or_else(|| {
                DomainError::validation(format!("{} has no lineage", target.display_name))
            })?;

        Ok(vec![ObligationEvent::FineTransferred(FineTransferred {
            obligation_id: self.id,
            from_target: target.id,
            member_id,
            lineage_target: FineTarget {
                id: cmd.new_target_id,
                entity: EntityRef::Lineage(lineage.lineage_id),
                display_name: lineage.lineage_name.clone(),
                state: TargetState::Active,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}
