//! Ledger configuration from the environment.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use mutua_core::Amount;
use mutua_dues::EligibilityRules;

pub const DATABASE_URL_ENV: &str = "MUTUA_DATABASE_URL";
pub const DB_MAX_CONNECTIONS_ENV: &str = "MUTUA_DB_MAX_CONNECTIONS";
pub const LOCK_TIMEOUT_MS_ENV: &str = "MUTUA_LOCK_TIMEOUT_MS";
pub const MEMBER_DUE_AMOUNT_ENV: &str = "MUTUA_MEMBER_DUE_AMOUNT";
pub const LINEAGE_DUE_AMOUNT_ENV: &str = "MUTUA_LINEAGE_DUE_AMOUNT";
pub const LINEAGE_DUE_GRACE_DAYS_ENV: &str = "MUTUA_LINEAGE_DUE_GRACE_DAYS";
pub const EXCLUDE_DECEASED_LINEAGE_ENV: &str = "MUTUA_EXCLUDE_DECEASED_LINEAGE";
pub const TOP_ARREARS_LIMIT_ENV: &str = "MUTUA_TOP_ARREARS_LIMIT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Postgres URL; `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub member_due_amount: Amount,
    pub lineage_due_amount: Amount,
    pub lineage_due_grace_days: u32,
    pub exclude_deceased_lineage: bool,
    pub top_arrears_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            lock_timeout: Duration::from_millis(5_000),
            member_due_amount: Amount::new(500),
            lineage_due_amount: Amount::new(10_000),
            lineage_due_grace_days: 30,
            exclude_deceased_lineage: false,
            top_arrears_limit: 10,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take
    /// their default; set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let database_url = get(DATABASE_URL_ENV);
        if database_url.is_none() {
            warn!("{DATABASE_URL_ENV} is not set; using the in-memory ledger store");
        }

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&get, DB_MAX_CONNECTIONS_ENV, defaults.db_max_connections)?,
            lock_timeout: Duration::from_millis(parse_or(
                &get,
                LOCK_TIMEOUT_MS_ENV,
                defaults.lock_timeout.as_millis() as u64,
            )?),
            member_due_amount: Amount::positive(
                parse_or(&get, MEMBER_DUE_AMOUNT_ENV, defaults.member_due_amount.value())?,
                MEMBER_DUE_AMOUNT_ENV,
            )?,
            lineage_due_amount: Amount::positive(
                parse_or(&get, LINEAGE_DUE_AMOUNT_ENV, defaults.lineage_due_amount.value())?,
                LINEAGE_DUE_AMOUNT_ENV,
            )?,
            lineage_due_grace_days: parse_or(&get, LINEAGE_DUE_GRACE_DAYS_ENV, defaults.lineage_due_grace_days)?,
            exclude_deceased_lineage: parse_or(
                &get,
                EXCLUDE_DECEASED_LINEAGE_ENV,
                defaults.exclude_deceased_lineage,
            )?,
            top_arrears_limit: parse_or(&get, TOP_ARREARS_LIMIT_ENV, defaults.top_arrears_limit)?,
        })
    }

    /// Amounts and switches for the due generator.
    pub fn rules(&self) -> EligibilityRules {
        EligibilityRules {
            member_due_amount: self.member_due_amount,
            lineage_due_amount: self.lineage_due_amount,
            lineage_grace_days: self.lineage_due_grace_days,
            exclude_deceased_lineage: self.exclude_deceased_lineage,
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.rules(), EligibilityRules::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (DATABASE_URL_ENV, "postgres://ledger@localhost/mutua"),
            (LOCK_TIMEOUT_MS_ENV, "750"),
            (MEMBER_DUE_AMOUNT_ENV, "1000"),
            (EXCLUDE_DECEASED_LINEAGE_ENV, "true"),
            (TOP_ARREARS_LIMIT_ENV, " 25 "),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://ledger@localhost/mutua"));
        assert_eq!(config.lock_timeout, Duration::from_millis(750));
        assert_eq!(config.member_due_amount, Amount::new(1000));
        assert!(config.exclude_deceased_lineage);
        assert_eq!(config.top_arrears_limit, 25);
        assert!(config.rules().exclude_deceased_lineage);
    }

    #[test]
    fn invalid_values_are_errors() {
        let err = LedgerConfig::from_lookup(lookup(&[(LINEAGE_DUE_GRACE_DAYS_ENV, "soon")])).unwrap_err();
        assert!(err.to_string().contains(LINEAGE_DUE_GRACE_DAYS_ENV));

        assert!(LedgerConfig::from_lookup(lookup(&[(MEMBER_DUE_AMOUNT_ENV, "0")])).is_err());
    }
}
