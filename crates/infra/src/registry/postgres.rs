//! Read-only registry queries over the membership tables.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mutua_core::{Amount, CategoryId, DeathId, FamilyId, LineageId, MemberId};
use mutua_dues::{Category, Death, Family, Lineage, Member, MemberStatus};

use super::{DeathRegistry, MembershipRegistry, RegistryError};

const MEMBER_COLUMNS: &str = "id, last_name, first_names, status, lineage_id, category_id, email";
const CATEGORY_COLUMNS: &str = "id, label, eligibility_start, lineage_due_amount";

#[derive(Debug, Clone)]
pub struct PostgresRegistry {
    pool: Arc<PgPool>,
}

impl PostgresRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn unavailable(operation: &str, err: sqlx::Error) -> RegistryError {
    RegistryError::Unavailable(format!("{operation}: {err}"))
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<T, RegistryError> {
    T::from_row(row).map_err(|e| RegistryError::Corrupt(e.to_string()))
}

#[async_trait::async_trait]
impl MembershipRegistry for PostgresRegistry {
    #[instrument(skip(self), fields(member_id = %id), err)]
    async fn member(&self, id: MemberId) -> Result<Option<Member>, RegistryError> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| unavailable("member", e))?;
        row.as_ref()
            .map(|r| decode::<MemberRow>(r).and_then(Member::try_from))
            .transpose()
    }

    async fn members(&self) -> Result<Vec<Member>, RegistryError> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members ORDER BY last_name, first_names, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| unavailable("members", e))?;
        rows.iter()
            .map(|r| decode::<MemberRow>(r).and_then(Member::try_from))
            .collect()
    }

    async fn lineage(&self, id: LineageId) -> Result<Option<Lineage>, RegistryError> {
        let row = sqlx::query("SELECT id, name, family_id FROM lineages WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| unavailable("lineage", e))?;
        row.as_ref().map(lineage_from_row).transpose()
    }

    async fn lineages(&self) -> Result<Vec<Lineage>, RegistryError> {
        let rows = sqlx::query("SELECT id, name, family_id FROM lineages ORDER BY name, id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| unavailable("lineages", e))?;
        rows.iter().map(lineage_from_row).collect()
    }

    async fn family(&self, id: FamilyId) -> Result<Option<Family>, RegistryError> {
        let row = sqlx::query("SELECT id, name FROM families WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| unavailable("family", e))?;
        row.as_ref().map(family_from_row).transpose()
    }

    async fn families(&self) -> Result<Vec<Family>, RegistryError> {
        let rows = sqlx::query("SELECT id, name FROM families ORDER BY name, id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| unavailable("families", e))?;
        rows.iter().map(family_from_row).collect()
    }

    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RegistryError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| unavailable("category", e))?;
        row.as_ref().map(category_from_row).transpose()
    }

    async fn categories(&self) -> Result<Vec<Category>, RegistryError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY label, id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| unavailable("categories", e))?;
        rows.iter().map(category_from_row).collect()
    }
}

#[async_trait::async_trait]
impl DeathRegistry for PostgresRegistry {
    #[instrument(skip(self), fields(death_id = %id), err)]
    async fn death(&self, id: DeathId) -> Result<Option<Death>, RegistryError> {
        let row = sqlx::query("SELECT id, member_id, date FROM deaths WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| unavailable("death", e))?;

        row.as_ref()
            .map(|r| -> Result<Death, RegistryError> {
                let corrupt = |e: sqlx::Error| RegistryError::Corrupt(e.to_string());
                Ok(Death {
                    id: DeathId::from_uuid(r.try_get("id").map_err(corrupt)?),
                    member_id: MemberId::from_uuid(r.try_get("member_id").map_err(corrupt)?),
                    date: r.try_get("date").map_err(corrupt)?,
                })
            })
            .transpose()
    }

    async fn deceased_members(&self) -> Result<HashSet<MemberId>, RegistryError> {
        let rows = sqlx::query("SELECT DISTINCT member_id FROM deaths")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| unavailable("deceased_members", e))?;
        rows.iter()
            .map(|r| {
                r.try_get::<Uuid, _>("member_id")
                    .map(MemberId::from_uuid)
                    .map_err(|e| RegistryError::Corrupt(e.to_string()))
            })
            .collect()
    }
}

#[derive(Debug)]
struct MemberRow {
    id: Uuid,
    last_name: String,
    first_names: String,
    status: String,
    lineage_id: Option<Uuid>,
    category_id: Option<Uuid>,
    email: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for MemberRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MemberRow {
            id: row.try_get("id")?,
            last_name: row.try_get("last_name")?,
            first_names: row.try_get("first_names")?,
            status: row.try_get("status")?,
            lineage_id: row.try_get("lineage_id")?,
            category_id: row.try_get("category_id")?,
            email: row.try_get("email")?,
        })
    }
}

impl TryFrom<MemberRow> for Member {
    type Error = RegistryError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let status = MemberStatus::parse(&row.status).ok_or_else(|| {
            RegistryError::Corrupt(format!("member {}: unknown status {}", row.id, row.status))
        })?;
        Ok(Member {
            id: MemberId::from_uuid(row.id),
            last_name: row.last_name,
            first_names: row.first_names,
            status,
            lineage_id: row.lineage_id.map(LineageId::from_uuid),
            category_id: row.category_id.map(CategoryId::from_uuid),
            email: row.email,
        })
    }
}

fn lineage_from_row(row: &PgRow) -> Result<Lineage, RegistryError> {
    let corrupt = |e: sqlx::Error| RegistryError::Corrupt(e.to_string());
    Ok(Lineage {
        id: LineageId::from_uuid(row.try_get("id").map_err(corrupt)?),
        name: row.try_get("name").map_err(corrupt)?,
        family_id: row
            .try_get::<Option<Uuid>, _>("family_id")
            .map_err(corrupt)?
            .map(FamilyId::from_uuid),
    })
}

fn family_from_row(row: &PgRow) -> Result<Family, RegistryError> {
    let corrupt = |e: sqlx::Error| RegistryError::Corrupt(e.to_string());
    Ok(Family {
        id: FamilyId::from_uuid(row.try_get("id").map_err(corrupt)?),
        name: row.try_get("name").map_err(corrupt)?,
    })
}

fn category_from_row(row: &PgRow) -> Result<Category, RegistryError> {
    let corrupt = |e: sqlx::Error| RegistryError::Corrupt(e.to_string());
    let id: Uuid = row.try_get("id").map_err(corrupt)?;
    let amount: Option<i64> = row.try_get("lineage_due_amount").map_err(corrupt)?;
    let lineage_due_amount = amount
        .map(|v| {
            u64::try_from(v)
                .map(Amount::new)
                .map_err(|_| RegistryError::Corrupt(format!("category {id}: negative lineage due amount")))
        })
        .transpose()?;

    Ok(Category {
        id: CategoryId::from_uuid(id),
        label: row.try_get("label").map_err(corrupt)?,
        eligibility_start: row
            .try_get::<Option<NaiveDate>, _>("eligibility_start")
            .map_err(corrupt)?,
        lineage_due_amount,
    })
}
