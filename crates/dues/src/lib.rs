//! Dues & payment ledger domain (pure).
//!
//! Business rules for death dues, lineage dues and fines: the obligation state
//! machine, the balance calculator, payment validation, fine transfer and the
//! eligibility rules used by due generation. No IO, no storage, no async.

pub mod balance;
pub mod eligibility;
pub mod fine;
pub mod membership;
pub mod obligation;
pub mod payment;

pub use balance::{Balance, ObligationStatus, Standing};
pub use eligibility::{
    EligibilityRules, lineage_due_amount, lineage_due_description, lineage_due_motif,
    member_due_motif,
};
pub use fine::{EntityRef, FineDetails, FineNature, FineTarget, FineTargetDraft, TargetState};
pub use membership::{Category, Death, Family, Lineage, Member, MemberStatus};
pub use obligation::{
    AmendObligation, CancelObligation, DraftKind, DuplicateKey, FineTransferred, KindTag,
    MemberLineage, Obligation, ObligationAmended, ObligationCancelled, ObligationCommand,
    ObligationDraft, ObligationEvent, ObligationKind, ObligationParts, PaymentRecorded,
    RecordPayment, SettleInFull, TransferFine,
};
pub use payment::{Payment, PaymentDetails, PaymentMode, payment_reference};
