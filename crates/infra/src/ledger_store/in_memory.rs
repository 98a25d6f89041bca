use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use mutua_core::{Aggregate, DeathId, DomainError, ObligationId};
use mutua_dues::{EntityRef, KindTag, Obligation, ObligationCommand, Payment};

use super::query::{self, JournalFilter, ObligationFilter, Page, Pagination};
use super::r#trait::{Committed, GeneratedBatch, LedgerStore, StoreError};

type Row = Arc<Mutex<Obligation>>;

/// In-memory obligation store.
///
/// Intended for tests/dev. Each obligation sits behind its own mutex, which
/// plays the role of the row lock: `execute` holds it from re-read to write.
/// The map lock is only taken briefly to find or insert rows; it is held in
/// write mode across a duplicate check so that check and insert are atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    rows: RwLock<HashMap<ObligationId, Row>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row(&self, id: ObligationId) -> Result<Option<Row>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows.get(&id).cloned())
    }

    fn snapshot_all(&self) -> Result<Vec<Obligation>, StoreError> {
        let rows: Vec<Row> = {
            let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
            rows.values().cloned().collect()
        };
        rows.iter()
            .map(|row| {
                row.lock()
                    .map(|o| o.clone())
                    .map_err(|_| StoreError::poisoned())
            })
            .collect()
    }

    fn live_keys(rows: &HashMap<ObligationId, Row>) -> Result<HashSet<mutua_dues::DuplicateKey>, StoreError> {
        let mut keys = HashSet::new();
        for row in rows.values() {
            let o = row.lock().map_err(|_| StoreError::poisoned())?;
            if o.is_live() {
                if let Some(key) = o.duplicate_key() {
                    keys.insert(key);
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, obligation: Obligation) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;

        if rows.contains_key(&obligation.id_typed()) {
            return Err(DomainError::conflict(format!(
                "obligation {} already exists",
                obligation.id_typed()
            ))
            .into());
        }
        if let Some(key) = obligation.duplicate_key() {
            if Self::live_keys(&rows)?.contains(&key) {
                return Err(DomainError::conflict(format!("a live {key} already exists")).into());
            }
        }

        rows.insert(obligation.id_typed(), Arc::new(Mutex::new(obligation)));
        Ok(())
    }

    async fn insert_generated(
        &self,
        death_id: DeathId,
        kind: KindTag,
        obligations: Vec<Obligation>,
    ) -> Result<GeneratedBatch, StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let mut taken = Self::live_keys(&rows)?;

        let mut batch = GeneratedBatch::default();
        for obligation in obligations {
            let key = match obligation.duplicate_key() {
                Some(k) if k.death_id == death_id && k.kind == kind => k,
                _ => {
                    return Err(DomainError::invariant(format!(
                        "generated obligation {} does not belong to {} generation for death {death_id}",
                        obligation.id_typed(),
                        kind.as_str()
                    ))
                    .into());
                }
            };

            if !taken.insert(key) {
                batch.skipped += 1;
                continue;
            }
            rows.insert(obligation.id_typed(), Arc::new(Mutex::new(obligation.clone())));
            batch.created.push(obligation);
        }

        Ok(batch)
    }

    async fn live_entities_for_death(
        &self,
        death_id: DeathId,
        kind: KindTag,
    ) -> Result<HashSet<EntityRef>, StoreError> {
        Ok(self
            .snapshot_all()?
            .iter()
            .filter(|o| o.is_live())
            .filter_map(Obligation::duplicate_key)
            .filter(|k| k.death_id == death_id && k.kind == kind)
            .map(|k| k.entity)
            .collect())
    }

    async fn load(&self, id: ObligationId) -> Result<Option<Obligation>, StoreError> {
        match self.row(id)? {
            Some(row) => {
                let o = row.lock().map_err(|_| StoreError::poisoned())?;
                Ok(Some(o.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &ObligationFilter,
        pagination: Pagination,
    ) -> Result<Page<Obligation>, StoreError> {
        let items = self.scan(filter).await?;
        Ok(pagination.paginate(items))
    }

    async fn scan(&self, filter: &ObligationFilter) -> Result<Vec<Obligation>, StoreError> {
        let mut items: Vec<Obligation> = self
            .snapshot_all()?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        query::sort_obligations(&mut items);
        Ok(items)
    }

    async fn execute(&self, command: ObligationCommand) -> Result<Committed, StoreError> {
        let id = command.obligation_id();
        let row = self
            .row(id)?
            .ok_or_else(|| DomainError::not_found(format!("obligation {id}")))?;

        let mut current = row.lock().map_err(|_| StoreError::poisoned())?;

        // Decide and apply on a copy; the row only changes if every step succeeds.
        let mut next = current.clone();
        let events = next.execute(&command)?;
        let derived = next
            .recompute()
            .map_err(|e| StoreError::Corrupt(format!("obligation {id}: {e}")))?;
        if derived != next.balance() {
            return Err(StoreError::Corrupt(format!(
                "cached balance of {id} drifted from its journal"
            )));
        }

        *current = next.clone();
        Ok(Committed {
            obligation: next,
            events,
        })
    }

    async fn delete(&self, id: ObligationId) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| StoreError::poisoned())?;
        let row = rows
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("obligation {id}")))?;

        let has_payments = {
            let o = row.lock().map_err(|_| StoreError::poisoned())?;
            !o.payments().is_empty()
        };
        if has_payments {
            return Err(DomainError::immutable("an obligation with payments cannot be deleted; cancel it instead").into());
        }

        rows.remove(&id);
        Ok(())
    }

    async fn journal(
        &self,
        filter: &JournalFilter,
        pagination: Pagination,
    ) -> Result<Page<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self
            .snapshot_all()?
            .into_iter()
            .flat_map(|o| o.payments().to_vec())
            .filter(|p| filter.matches(p))
            .collect();
        query::sort_payments(&mut payments);
        Ok(pagination.paginate(payments))
    }
}
