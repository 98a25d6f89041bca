//! `mutua-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, aggregate traits and money.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use error::{DomainError, DomainResult};
pub use id::{
    CategoryId, DeathId, FamilyId, LineageId, MemberId, ObligationId, PaymentId, TargetId, UserId,
};
pub use value_object::Amount;
