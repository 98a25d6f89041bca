//! Postgres-backed obligation store and payment journal.
//!
//! ## Locking
//!
//! `execute` and `delete` read the obligation with `SELECT ... FOR UPDATE`
//! inside a transaction whose `lock_timeout` is set from configuration, so
//! a payment, cancellation or transfer always validates against the latest
//! committed journal. Inserts tied to a death take a transaction-scoped
//! advisory lock on that death before checking for a live duplicate, which
//! keeps duplicate prevention correct without a unique index.
//!
//! ## Error mapping
//!
//! | PostgreSQL code | Meaning                  | `StoreError`             |
//! |-----------------|--------------------------|--------------------------|
//! | `55P03`         | lock not available       | `Concurrency`            |
//! | `40001`         | serialization failure    | `Concurrency`            |
//! | `40P01`         | deadlock detected        | `Concurrency`            |
//! | `23505`         | unique violation         | `Rejected(Conflict)`     |
//! | other           |                          | `Backend`                |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use mutua_core::{
    Aggregate, Amount, DeathId, DomainError, LineageId, MemberId, ObligationId, PaymentId,
    TargetId, UserId,
};
use mutua_dues::{
    EntityRef, FineDetails, FineNature, FineTarget, KindTag, Obligation, ObligationCommand,
    ObligationEvent, ObligationKind, ObligationParts, ObligationStatus, Payment, PaymentMode,
    TargetState,
};

use super::query::{JournalFilter, ObligationFilter, Page, Pagination};
use super::r#trait::{Committed, GeneratedBatch, LedgerStore, StoreError};

const MIGRATION: &str = include_str!("../../migrations/0001_ledger.sql");

const OBLIGATION_COLUMNS: &str = "o.id, o.kind, o.entity_kind, o.entity_id, o.amount_owed, \
     o.status, o.motif, o.description, o.death_id, o.issued_on, o.due_by, o.fine_reference, \
     o.fine_nature, o.fine_sanction, o.created_by, o.cancelled_at, o.cancel_reason, \
     o.created_at, o.updated_at, o.version";

const PAYMENT_COLUMNS: &str =
    "p.id, p.obligation_id, p.amount, p.paid_at, p.mode, p.reference, p.validated_by, p.note";

/// Open a connection pool.
pub async fn connect_database(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Postgres-backed [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger and registry tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        Ok(tx)
    }

    async fn commit(tx: Transaction<'static, Postgres>, operation: &str) -> Result<(), StoreError> {
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self, obligation), fields(obligation_id = %obligation.id_typed()), err)]
    async fn insert(&self, obligation: Obligation) -> Result<(), StoreError> {
        let mut tx = self.begin("insert").await?;

        if let Some(key) = obligation.duplicate_key() {
            lock_death(&mut tx, key.death_id).await?;
            let live = live_entities(&mut tx, key.death_id, key.kind).await?;
            if live.contains(&key.entity) {
                return Err(DomainError::conflict(format!("a live {key} already exists")).into());
            }
        }

        insert_obligation(&mut tx, &obligation).await?;
        Self::commit(tx, "insert").await
    }

    #[instrument(
        skip(self, obligations),
        fields(
            death_id = %death_id,
            kind = kind.as_str(),
            requested = obligations.len(),
            created = tracing::field::Empty
        ),
        err
    )]
    async fn insert_generated(
        &self,
        death_id: DeathId,
        kind: KindTag,
        obligations: Vec<Obligation>,
    ) -> Result<GeneratedBatch, StoreError> {
        let mut tx = self.begin("insert_generated").await?;
        lock_death(&mut tx, death_id).await?;
        let mut taken = live_entities(&mut tx, death_id, kind).await?;

        let mut batch = GeneratedBatch::default();
        for obligation in obligations {
            let key = match obligation.duplicate_key() {
                Some(k) if k.death_id == death_id && k.kind == kind => k,
                _ => {
                    return Err(DomainError::invariant(format!(
                        "generated obligation {} does not belong to this generation",
                        obligation.id_typed()
                    ))
                    .into());
                }
            };
            if !taken.insert(key.entity) {
                batch.skipped += 1;
                continue;
            }
            insert_obligation(&mut tx, &obligation).await?;
            batch.created.push(obligation);
        }

        Self::commit(tx, "insert_generated").await?;
        Span::current().record("created", batch.created.len());
        Ok(batch)
    }

    async fn live_entities_for_death(
        &self,
        death_id: DeathId,
        kind: KindTag,
    ) -> Result<HashSet<EntityRef>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("live_entities_for_death", e))?;
        live_entities(&mut conn, death_id, kind).await
    }

    #[instrument(skip(self), fields(obligation_id = %id), err)]
    async fn load(&self, id: ObligationId) -> Result<Option<Obligation>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        let sql = format!("SELECT {OBLIGATION_COLUMNS} FROM obligations o WHERE o.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        match row {
            Some(row) => Ok(hydrate(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset), err)]
    async fn list(
        &self,
        filter: &ObligationFilter,
        pagination: Pagination,
    ) -> Result<Page<Obligation>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM obligations o");
        push_obligation_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("count_obligations", e))?
            .try_get(0)
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations o"
        ));
        push_obligation_filter(&mut page, filter);
        page.push(" ORDER BY o.created_at DESC, o.id DESC LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(pagination.offset));

        let rows = page
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;
        let items = hydrate(&mut conn, rows).await?;

        Ok(Page::new(items, total.max(0) as u64, pagination))
    }

    #[instrument(skip(self, filter), err)]
    async fn scan(&self, filter: &ObligationFilter) -> Result<Vec<Obligation>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("scan", e))?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations o"
        ));
        push_obligation_filter(&mut qb, filter);
        qb.push(" ORDER BY o.created_at DESC, o.id DESC");

        let rows = qb
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("scan", e))?;
        hydrate(&mut conn, rows).await
    }

    #[instrument(
        skip(self, command),
        fields(obligation_id = %command.obligation_id(), command = command.name()),
        err
    )]
    async fn execute(&self, command: ObligationCommand) -> Result<Committed, StoreError> {
        let id = command.obligation_id();
        let mut tx = self.begin("execute").await?;

        let sql = format!("SELECT {OBLIGATION_COLUMNS} FROM obligations o WHERE o.id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_obligation", e))?
            .ok_or_else(|| DomainError::not_found(format!("obligation {id}")))?;

        let mut obligation = hydrate(&mut tx, vec![row])
            .await?
            .pop()
            .ok_or_else(|| StoreError::Corrupt(format!("obligation {id} vanished under lock")))?;

        // Rejections return before any write; dropping `tx` rolls back.
        let events = obligation.execute(&command)?;
        let derived = obligation
            .recompute()
            .map_err(|e| StoreError::Corrupt(format!("obligation {id}: {e}")))?;
        if derived != obligation.balance() {
            return Err(StoreError::Corrupt(format!(
                "cached balance of {id} drifted from its journal"
            )));
        }

        let mut targets_changed = false;
        for event in &events {
            match event {
                ObligationEvent::PaymentRecorded(e) => insert_payment(&mut tx, &e.payment).await?,
                ObligationEvent::ObligationAmended(e) => targets_changed |= e.targets.is_some(),
                ObligationEvent::FineTransferred(_) => targets_changed = true,
                ObligationEvent::ObligationCancelled(_) => {}
            }
        }
        if targets_changed {
            replace_targets(&mut tx, &obligation).await?;
        }
        update_obligation(&mut tx, &obligation).await?;

        Self::commit(tx, "execute").await?;
        Ok(Committed { obligation, events })
    }

    #[instrument(skip(self), fields(obligation_id = %id), err)]
    async fn delete(&self, id: ObligationId) -> Result<(), StoreError> {
        let mut tx = self.begin("delete").await?;

        sqlx::query("SELECT id FROM obligations WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_obligation", e))?
            .ok_or_else(|| DomainError::not_found(format!("obligation {id}")))?;

        let has_payments: bool =
            sqlx::query("SELECT EXISTS (SELECT 1 FROM payments WHERE obligation_id = $1)")
                .bind(id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("count_payments", e))?
                .try_get(0)
                .map_err(|e| StoreError::Corrupt(format!("failed to read payment flag: {e}")))?;
        if has_payments {
            return Err(DomainError::immutable(
                "an obligation with payments cannot be deleted; cancel it instead",
            )
            .into());
        }

        sqlx::query("DELETE FROM obligations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Self::commit(tx, "delete").await
    }

    #[instrument(skip(self, filter), fields(limit = pagination.limit, offset = pagination.offset), err)]
    async fn journal(
        &self,
        filter: &JournalFilter,
        pagination: Pagination,
    ) -> Result<Page<Payment>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("journal", e))?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM payments p");
        push_journal_filter(&mut count, filter);
        let total: i64 = count
            .build()
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("count_payments", e))?
            .try_get(0)
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;

        let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {PAYMENT_COLUMNS} FROM payments p"));
        push_journal_filter(&mut page, filter);
        page.push(" ORDER BY p.paid_at DESC, p.id DESC LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(pagination.offset));

        let rows = page
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("journal", e))?;

        let items = rows
            .iter()
            .map(|row| {
                PaymentRow::from_row(row)
                    .map_err(|e| StoreError::Corrupt(format!("failed to decode payment row: {e}")))
                    .and_then(Payment::try_from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total.max(0) as u64, pagination))
    }
}

async fn lock_death(tx: &mut Transaction<'static, Postgres>, death_id: DeathId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("ledger-death:{death_id}"))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_death", e))?;
    Ok(())
}

async fn live_entities(
    conn: &mut PgConnection,
    death_id: DeathId,
    kind: KindTag,
) -> Result<HashSet<EntityRef>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT entity_kind, entity_id
        FROM obligations
        WHERE death_id = $1 AND kind = $2 AND cancelled_at IS NULL AND entity_id IS NOT NULL
        "#,
    )
    .bind(death_id.as_uuid())
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("live_entities", e))?;

    rows.iter()
        .map(|row| {
            let kind: String = row
                .try_get("entity_kind")
                .map_err(|e| StoreError::Corrupt(format!("failed to read entity_kind: {e}")))?;
            let id: Uuid = row
                .try_get("entity_id")
                .map_err(|e| StoreError::Corrupt(format!("failed to read entity_id: {e}")))?;
            EntityRef::from_parts(&kind, id).map_err(|e| StoreError::Corrupt(e.to_string()))
        })
        .collect()
}

/// Load payments and fine targets for obligation rows and restore the aggregates.
async fn hydrate(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Obligation>, StoreError> {
    let rows = rows
        .iter()
        .map(|row| {
            ObligationRow::from_row(row)
                .map_err(|e| StoreError::Corrupt(format!("failed to decode obligation row: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments p WHERE p.obligation_id = ANY($1) ORDER BY p.paid_at ASC, p.id ASC"
    );
    let payment_rows = sqlx::query(&sql)
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_payments", e))?;

    let mut payments: HashMap<Uuid, Vec<Payment>> = HashMap::new();
    for row in &payment_rows {
        let payment = PaymentRow::from_row(row)
            .map_err(|e| StoreError::Corrupt(format!("failed to decode payment row: {e}")))
            .and_then(Payment::try_from)?;
        payments
            .entry(*payment.obligation_id.as_uuid())
            .or_default()
            .push(payment);
    }

    let target_rows = sqlx::query(
        r#"
        SELECT id, obligation_id, entity_kind, entity_id, display_name, state
        FROM fine_targets
        WHERE obligation_id = ANY($1)
        ORDER BY obligation_id, position ASC
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_targets", e))?;

    let mut targets: HashMap<Uuid, Vec<FineTarget>> = HashMap::new();
    for row in &target_rows {
        let target = TargetRow::from_row(row)
            .map_err(|e| StoreError::Corrupt(format!("failed to decode target row: {e}")))?;
        let obligation_id = target.obligation_id;
        targets
            .entry(obligation_id)
            .or_default()
            .push(FineTarget::try_from(target)?);
    }

    rows.into_iter()
        .map(|row| {
            let p = payments.remove(&row.id).unwrap_or_default();
            let t = targets.remove(&row.id).unwrap_or_default();
            row.into_obligation(p, t)
        })
        .collect()
}

async fn insert_obligation(tx: &mut Transaction<'static, Postgres>, o: &Obligation) -> Result<(), StoreError> {
    let (entity_kind, entity_id) = match o.kind() {
        ObligationKind::MemberDue { member_id } => (Some("member"), Some(*member_id.as_uuid())),
        ObligationKind::LineageDue { lineage_id } => (Some("lineage"), Some(*lineage_id.as_uuid())),
        ObligationKind::Fine(_) => (None, None),
    };
    let fine = o.fine();
    let b = o.balance();

    sqlx::query(
        r#"
        INSERT INTO obligations (
            id, kind, entity_kind, entity_id,
            amount_owed, amount_paid, amount_remaining, written_off, status,
            motif, description, death_id, issued_on, due_by,
            fine_reference, fine_nature, fine_sanction, created_by,
            cancelled_at, cancel_reason, created_at, updated_at, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
        "#,
    )
    .bind(o.id_typed().as_uuid())
    .bind(o.kind_tag().as_str())
    .bind(entity_kind)
    .bind(entity_id)
    .bind(to_db(b.amount_owed)?)
    .bind(to_db(b.amount_paid)?)
    .bind(to_db(b.amount_remaining)?)
    .bind(to_db(b.written_off)?)
    .bind(b.status.as_str())
    .bind(o.motif())
    .bind(o.description())
    .bind(o.death_id().map(|d| *d.as_uuid()))
    .bind(o.issued_on())
    .bind(o.due_by())
    .bind(fine.map(|f| f.reference.clone()))
    .bind(fine.map(|f| f.nature.as_str()))
    .bind(fine.and_then(|f| f.sanction.clone()))
    .bind(fine.and_then(|f| f.created_by).map(|u| *u.as_uuid()))
    .bind(o.cancelled_at())
    .bind(o.cancel_reason())
    .bind(o.created_at())
    .bind(o.updated_at())
    .bind(version_to_db(o)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_obligation", e))?;

    if fine.is_some() {
        replace_targets(tx, o).await?;
    }
    Ok(())
}

async fn update_obligation(tx: &mut Transaction<'static, Postgres>, o: &Obligation) -> Result<(), StoreError> {
    let b = o.balance();
    sqlx::query(
        r#"
        UPDATE obligations SET
            amount_owed = $2,
            amount_paid = $3,
            amount_remaining = $4,
            written_off = $5,
            status = $6,
            motif = $7,
            description = $8,
            due_by = $9,
            cancelled_at = $10,
            cancel_reason = $11,
            updated_at = $12,
            version = $13
        WHERE id = $1
        "#,
    )
    .bind(o.id_typed().as_uuid())
    .bind(to_db(b.amount_owed)?)
    .bind(to_db(b.amount_paid)?)
    .bind(to_db(b.amount_remaining)?)
    .bind(to_db(b.written_off)?)
    .bind(b.status.as_str())
    .bind(o.motif())
    .bind(o.description())
    .bind(o.due_by())
    .bind(o.cancelled_at())
    .bind(o.cancel_reason())
    .bind(o.updated_at())
    .bind(version_to_db(o)?)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_obligation", e))?;
    Ok(())
}

async fn replace_targets(tx: &mut Transaction<'static, Postgres>, o: &Obligation) -> Result<(), StoreError> {
    let Some(fine) = o.fine() else {
        return Ok(());
    };

    sqlx::query("DELETE FROM fine_targets WHERE obligation_id = $1")
        .bind(o.id_typed().as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete_targets", e))?;

    for (position, target) in fine.targets.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO fine_targets (id, obligation_id, position, entity_kind, entity_id, display_name, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(target.id.as_uuid())
        .bind(o.id_typed().as_uuid())
        .bind(position as i32)
        .bind(target.entity.kind_str())
        .bind(target.entity.raw_id())
        .bind(&target.display_name)
        .bind(target_state_str(target.state))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_target", e))?;
    }
    Ok(())
}

async fn insert_payment(tx: &mut Transaction<'static, Postgres>, p: &Payment) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (id, obligation_id, amount, paid_at, mode, reference, validated_by, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(p.id.as_uuid())
    .bind(p.obligation_id.as_uuid())
    .bind(to_db(p.amount)?)
    .bind(p.paid_at)
    .bind(p.mode.as_str())
    .bind(&p.reference)
    .bind(p.validated_by.map(|u| *u.as_uuid()))
    .bind(p.note.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_payment", e))?;
    Ok(())
}

fn push_obligation_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ObligationFilter) {
    qb.push(" WHERE TRUE");
    if !filter.shows_cancelled() {
        qb.push(" AND o.cancelled_at IS NULL");
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND o.kind = ").push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND o.status = ").push_bind(status.as_str());
    }
    if let Some(death_id) = filter.death_id {
        qb.push(" AND o.death_id = ").push_bind(*death_id.as_uuid());
    }
    if let Some(from) = filter.issued_from {
        qb.push(" AND o.issued_on >= ").push_bind(from);
    }
    if let Some(to) = filter.issued_to {
        qb.push(" AND o.issued_on <= ").push_bind(to);
    }
    if let Some(entity) = filter.entity {
        qb.push(" AND ((o.entity_kind = ")
            .push_bind(entity.kind_str())
            .push(" AND o.entity_id = ")
            .push_bind(entity.raw_id())
            .push(") OR EXISTS (SELECT 1 FROM fine_targets t WHERE t.obligation_id = o.id AND t.state = 'active' AND t.entity_kind = ")
            .push_bind(entity.kind_str())
            .push(" AND t.entity_id = ")
            .push_bind(entity.raw_id())
            .push("))");
    }
    if let Some(term) = filter.search_term() {
        let pattern = format!("%{}%", escape_like(&term));
        qb.push(" AND (o.motif ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR o.description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR o.fine_reference ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_journal_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JournalFilter) {
    qb.push(" WHERE TRUE");
    if let Some(id) = filter.obligation_id {
        qb.push(" AND p.obligation_id = ").push_bind(*id.as_uuid());
    }
    if let Some(from) = filter.paid_from {
        qb.push(" AND p.paid_at >= ").push_bind(from);
    }
    if let Some(to) = filter.paid_to {
        qb.push(" AND p.paid_at <= ").push_bind(to);
    }
    if let Some(mode) = filter.mode {
        qb.push(" AND p.mode = ").push_bind(mode.as_str());
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn to_db(amount: Amount) -> Result<i64, StoreError> {
    i64::try_from(amount.value())
        .map_err(|_| DomainError::validation(format!("amount {amount} exceeds storage range")).into())
}

fn from_db(value: i64, field: &str) -> Result<Amount, StoreError> {
    u64::try_from(value)
        .map(Amount::new)
        .map_err(|_| StoreError::Corrupt(format!("negative {field}: {value}")))
}

fn version_to_db(o: &Obligation) -> Result<i64, StoreError> {
    use mutua_core::AggregateRoot;
    i64::try_from(o.version()).map_err(|_| StoreError::Corrupt("version overflow".to_string()))
}

fn target_state_str(state: TargetState) -> &'static str {
    match state {
        TargetState::Active => "active",
        TargetState::Transferred => "transferred",
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                Some("23505") => StoreError::Rejected(DomainError::conflict(msg)),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct ObligationRow {
    id: Uuid,
    kind: String,
    entity_kind: Option<String>,
    entity_id: Option<Uuid>,
    amount_owed: i64,
    status: String,
    motif: String,
    description: Option<String>,
    death_id: Option<Uuid>,
    issued_on: NaiveDate,
    due_by: Option<NaiveDate>,
    fine_reference: Option<String>,
    fine_nature: Option<String>,
    fine_sanction: Option<String>,
    created_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for ObligationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ObligationRow {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            entity_kind: row.try_get("entity_kind")?,
            entity_id: row.try_get("entity_id")?,
            amount_owed: row.try_get("amount_owed")?,
            status: row.try_get("status")?,
            motif: row.try_get("motif")?,
            description: row.try_get("description")?,
            death_id: row.try_get("death_id")?,
            issued_on: row.try_get("issued_on")?,
            due_by: row.try_get("due_by")?,
            fine_reference: row.try_get("fine_reference")?,
            fine_nature: row.try_get("fine_nature")?,
            fine_sanction: row.try_get("fine_sanction")?,
            created_by: row.try_get("created_by")?,
            cancelled_at: row.try_get("cancelled_at")?,
            cancel_reason: row.try_get("cancel_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl ObligationRow {
    fn into_obligation(self, payments: Vec<Payment>, targets: Vec<FineTarget>) -> Result<Obligation, StoreError> {
        let id = self.id;
        let corrupt = |what: &str| StoreError::Corrupt(format!("obligation {id}: {what}"));

        let kind = match (KindTag::parse(&self.kind), self.entity_id) {
            (Some(KindTag::MemberDue), Some(entity)) => ObligationKind::MemberDue {
                member_id: MemberId::from_uuid(entity),
            },
            (Some(KindTag::LineageDue), Some(entity)) => ObligationKind::LineageDue {
                lineage_id: LineageId::from_uuid(entity),
            },
            (Some(KindTag::Fine), None) => ObligationKind::Fine(FineDetails {
                reference: self.fine_reference.ok_or_else(|| corrupt("fine without reference"))?,
                nature: self
                    .fine_nature
                    .as_deref()
                    .and_then(FineNature::parse)
                    .ok_or_else(|| corrupt("fine without a known nature"))?,
                sanction: self.fine_sanction,
                targets,
                created_by: self.created_by.map(UserId::from_uuid),
            }),
            _ => return Err(corrupt(&format!("kind {} with entity {:?}", self.kind, self.entity_kind))),
        };

        let cached_status = ObligationStatus::parse(&self.status)
            .ok_or_else(|| corrupt(&format!("unknown status {}", self.status)))?;

        Obligation::restore(ObligationParts {
            id: ObligationId::from_uuid(self.id),
            kind,
            amount_owed: from_db(self.amount_owed, "amount_owed")?,
            motif: self.motif,
            description: self.description,
            death_id: self.death_id.map(DeathId::from_uuid),
            issued_on: self.issued_on,
            due_by: self.due_by,
            payments,
            cancelled_at: self.cancelled_at,
            cancel_reason: self.cancel_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: u64::try_from(self.version).map_err(|_| corrupt("negative version"))?,
            cached_status: Some(cached_status),
        })
        .map_err(|e| corrupt(&e.to_string()))
    }
}

#[derive(Debug)]
struct PaymentRow {
    id: Uuid,
    obligation_id: Uuid,
    amount: i64,
    paid_at: DateTime<Utc>,
    mode: String,
    reference: String,
    validated_by: Option<Uuid>,
    note: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for PaymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PaymentRow {
            id: row.try_get("id")?,
            obligation_id: row.try_get("obligation_id")?,
            amount: row.try_get("amount")?,
            paid_at: row.try_get("paid_at")?,
            mode: row.try_get("mode")?,
            reference: row.try_get("reference")?,
            validated_by: row.try_get("validated_by")?,
            note: row.try_get("note")?,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let mode: PaymentMode = row
            .mode
            .parse()
            .map_err(|e: DomainError| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?;
        Ok(Payment {
            id: PaymentId::from_uuid(row.id),
            obligation_id: ObligationId::from_uuid(row.obligation_id),
            amount: from_db(row.amount, "payment amount")?,
            paid_at: row.paid_at,
            mode,
            reference: row.reference,
            validated_by: row.validated_by.map(UserId::from_uuid),
            note: row.note,
        })
    }
}

#[derive(Debug)]
struct TargetRow {
    id: Uuid,
    obligation_id: Uuid,
    entity_kind: String,
    entity_id: Uuid,
    display_name: String,
    state: String,
}

impl<'r> FromRow<'r, PgRow> for TargetRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TargetRow {
            id: row.try_get("id")?,
            obligation_id: row.try_get("obligation_id")?,
            entity_kind: row.try_get("entity_kind")?,
            entity_id: row.try_get("entity_id")?,
            display_name: row.try_get("display_name")?,
            state: row.try_get("state")?,
        })
    }
}

impl TryFrom<TargetRow> for FineTarget {
    type Error = StoreError;

    fn try_from(row: TargetRow) -> Result<Self, Self::Error> {
        let state = match row.state.as_str() {
            "active" => TargetState::Active,
            "transferred" => TargetState::Transferred,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "fine target {}: unknown state {other}",
                    row.id
                )));
            }
        };
        Ok(FineTarget {
            id: TargetId::from_uuid(row.id),
            entity: EntityRef::from_parts(&row.entity_kind, row.entity_id)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            display_name: row.display_name,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("100%_a\\b"), "100\\%\\_a\\\\b");
    }

    #[test]
    fn amounts_outside_bigint_are_rejected() {
        assert!(matches!(
            to_db(Amount::new(u64::MAX)),
            Err(StoreError::Rejected(DomainError::Validation(_)))
        ));
        assert_eq!(to_db(Amount::new(500)).unwrap(), 500);
        assert!(matches!(from_db(-1, "amount"), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn migration_defines_ledger_tables() {
        for table in ["obligations", "payments", "fine_targets", "members", "deaths"] {
            assert!(MIGRATION.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")));
        }
    }
}
