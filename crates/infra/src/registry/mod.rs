//! Read-only lookups into the membership and death registries.
//!
//! The ledger never writes these records. Eligibility rules and obligation
//! creation consult them through the traits below.

pub mod in_memory;
pub mod postgres;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use mutua_core::{CategoryId, DeathId, FamilyId, LineageId, MemberId};
use mutua_dues::{Category, Death, Family, Lineage, Member};

pub use in_memory::InMemoryRegistry;
pub use postgres::PostgresRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt registry record: {0}")]
    Corrupt(String),
}

/// Member, lineage, family and category lookups.
#[async_trait::async_trait]
pub trait MembershipRegistry: Send + Sync {
    async fn member(&self, id: MemberId) -> Result<Option<Member>, RegistryError>;

    /// Every member, whatever their status.
    async fn members(&self) -> Result<Vec<Member>, RegistryError>;

    async fn lineage(&self, id: LineageId) -> Result<Option<Lineage>, RegistryError>;

    async fn lineages(&self) -> Result<Vec<Lineage>, RegistryError>;

    async fn family(&self, id: FamilyId) -> Result<Option<Family>, RegistryError>;

    async fn families(&self) -> Result<Vec<Family>, RegistryError>;

    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RegistryError>;

    async fn categories(&self) -> Result<Vec<Category>, RegistryError>;
}

/// Recorded deaths (the triggering events of due generation).
#[async_trait::async_trait]
pub trait DeathRegistry: Send + Sync {
    async fn death(&self, id: DeathId) -> Result<Option<Death>, RegistryError>;

    /// Members with a recorded death.
    async fn deceased_members(&self) -> Result<HashSet<MemberId>, RegistryError>;
}

#[async_trait::async_trait]
impl<R> MembershipRegistry for Arc<R>
where
    R: MembershipRegistry + ?Sized,
{
    async fn member(&self, id: MemberId) -> Result<Option<Member>, RegistryError> {
        (**self).member(id).await
    }

    async fn members(&self) -> Result<Vec<Member>, RegistryError> {
        (**self).members().await
    }

    async fn lineage(&self, id: LineageId) -> Result<Option<Lineage>, RegistryError> {
        (**self).lineage(id).await
    }

    async fn lineages(&self) -> Result<Vec<Lineage>, RegistryError> {
        (**self).lineages().await
    }

    async fn family(&self, id: FamilyId) -> Result<Option<Family>, RegistryError> {
        (**self).family(id).await
    }

    async fn families(&self) -> Result<Vec<Family>, RegistryError> {
        (**self).families().await
    }

    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RegistryError> {
        (**self).category(id).await
    }

    async fn categories(&self) -> Result<Vec<Category>, RegistryError> {
        (**self).categories().await
    }
}

#[async_trait::async_trait]
impl<R> DeathRegistry for Arc<R>
where
    R: DeathRegistry + ?Sized,
{
    async fn death(&self, id: DeathId) -> Result<Option<Death>, RegistryError> {
        (**self).death(id).await
    }

    async fn deceased_members(&self) -> Result<HashSet<MemberId>, RegistryError> {
        (**self).deceased_members().await
    }
}
