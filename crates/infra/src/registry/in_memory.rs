use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use mutua_core::{CategoryId, DeathId, FamilyId, LineageId, MemberId};
use mutua_dues::{Category, Death, Family, Lineage, Member};

use super::{DeathRegistry, MembershipRegistry, RegistryError};

#[derive(Debug, Default)]
struct Records {
    members: HashMap<MemberId, Member>,
    lineages: HashMap<LineageId, Lineage>,
    families: HashMap<FamilyId, Family>,
    categories: HashMap<CategoryId, Category>,
    deaths: HashMap<DeathId, Death>,
}

/// In-memory membership and death registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: RwLock<Records>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, member: Member) {
        if let Ok(mut r) = self.inner.write() {
            r.members.insert(member.id, member);
        }
    }

    pub fn add_lineage(&self, lineage: Lineage) {
        if let Ok(mut r) = self.inner.write() {
            r.lineages.insert(lineage.id, lineage);
        }
    }

    pub fn add_family(&self, family: Family) {
        if let Ok(mut r) = self.inner.write() {
            r.families.insert(family.id, family);
        }
    }

    pub fn add_category(&self, category: Category) {
        if let Ok(mut r) = self.inner.write() {
            r.categories.insert(category.id, category);
        }
    }

    /// Record a death. The member's status is not changed.
    pub fn record_death(&self, death: Death) {
        if let Ok(mut r) = self.inner.write() {
            r.deaths.insert(death.id, death);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Records) -> T) -> Result<T, RegistryError> {
        let records = self
            .inner
            .read()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&records))
    }
}

fn sorted<K, V: Clone>(map: &HashMap<K, V>, key: impl Fn(&V) -> String) -> Vec<V> {
    let mut values: Vec<V> = map.values().cloned().collect();
    values.sort_by_key(|v| key(v));
    values
}

#[async_trait::async_trait]
impl MembershipRegistry for InMemoryRegistry {
    async fn member(&self, id: MemberId) -> Result<Option<Member>, RegistryError> {
        self.read(|r| r.members.get(&id).cloned())
    }

    async fn members(&self) -> Result<Vec<Member>, RegistryError> {
        self.read(|r| sorted(&r.members, |m| format!("{}|{}", m.full_name(), m.id)))
    }

    async fn lineage(&self, id: LineageId) -> Result<Option<Lineage>, RegistryError> {
        self.read(|r| r.lineages.get(&id).cloned())
    }

    async fn lineages(&self) -> Result<Vec<Lineage>, RegistryError> {
        self.read(|r| sorted(&r.lineages, |l| format!("{}|{}", l.name, l.id)))
    }

    async fn family(&self, id: FamilyId) -> Result<Option<Family>, RegistryError> {
        self.read(|r| r.families.get(&id).cloned())
    }

    async fn families(&self) -> Result<Vec<Family>, RegistryError> {
        self.read(|r| sorted(&r.families, |f| format!("{}|{}", f.name, f.id)))
    }

    async fn category(&self, id: CategoryId) -> Result<Option<Category>, RegistryError> {
        self.read(|r| r.categories.get(&id).cloned())
    }

    async fn categories(&self) -> Result<Vec<Category>, RegistryError> {
        self.read(|r| sorted(&r.categories, |c| format!("{}|{}", c.label, c.id)))
    }
}

#[async_trait::async_trait]
impl DeathRegistry for InMemoryRegistry {
    async fn death(&self, id: DeathId) -> Result<Option<Death>, RegistryError> {
        self.read(|r| r.deaths.get(&id).cloned())
    }

    async fn deceased_members(&self) -> Result<HashSet<MemberId>, RegistryError> {
        self.read(|r| r.deaths.values().map(|d| d.member_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mutua_dues::MemberStatus;

    fn member(last: &str) -> Member {
        Member {
            id: MemberId::new(),
            last_name: last.into(),
            first_names: "Jean".into(),
            status: MemberStatus::Active,
            lineage_id: None,
            category_id: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn lookups_and_listing_order() {
        let registry = InMemoryRegistry::new();
        let (b, a) = (member("BIYA"), member("ATANGANA"));
        registry.add_member(b.clone());
        registry.add_member(a.clone());

        assert_eq!(registry.member(b.id).await.unwrap(), Some(b.clone()));
        assert!(registry.member(MemberId::new()).await.unwrap().is_none());

        let names: Vec<String> = registry
            .members()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.last_name)
            .collect();
        assert_eq!(names, vec!["ATANGANA", "BIYA"]);
    }

    #[tokio::test]
    async fn recorded_deaths_mark_members_deceased() {
        let registry = InMemoryRegistry::new();
        let m = member("ESSOMBA");
        registry.add_member(m.clone());
        let death = Death {
            id: DeathId::new(),
            member_id: m.id,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        registry.record_death(death.clone());

        assert_eq!(registry.death(death.id).await.unwrap(), Some(death));
        assert!(registry.deceased_members().await.unwrap().contains(&m.id));
    }
}
