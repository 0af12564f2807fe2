//! Store configuration loaded from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | required |
//! | `INVOICER_DB_MAX_CONNECTIONS` | `5` |
//! | `INVOICER_DB_ACQUIRE_TIMEOUT_SECS` | `30` |
//! | `INVOICER_INVOICE_TABLE` | `invoicing_invoice` |
//! | `INVOICER_ITEM_TABLE` | `invoicing_item` |

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use invoicer_invoicing::{Invoice, Item, Table};

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub invoice_table: String,
    pub item_table: String,
}

// Keep credentials in DATABASE_URL out of logs.
impl core::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("invoice_table", &self.invoice_table)
            .field("item_table", &self.item_table)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            invoice_table: Invoice::TABLE.to_string(),
            item_table: Item::TABLE.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let mut config = Self::new(database_url);

        if let Some(raw) = lookup("INVOICER_DB_MAX_CONNECTIONS") {
            config.max_connections = parse_positive("INVOICER_DB_MAX_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = lookup("INVOICER_DB_ACQUIRE_TIMEOUT_SECS") {
            let secs = parse_positive("INVOICER_DB_ACQUIRE_TIMEOUT_SECS", &raw)?;
            config.acquire_timeout = Duration::from_secs(u64::from(secs));
        }
        if let Some(name) = lookup("INVOICER_INVOICE_TABLE") {
            config.invoice_table = name;
        }
        if let Some(name) = lookup("INVOICER_ITEM_TABLE") {
            config.item_table = name;
        }

        tracing::debug!(config = ?config, "store configuration loaded");
        Ok(config)
    }

    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.database_url)
            .await
            .map_err(|e| StoreError::Connection {
                operation: "connect",
                message: e.to_string(),
            })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let value: u32 = raw.trim().parse().map_err(|_| invalid("not an integer"))?;
    if value == 0 {
        return Err(invalid("must be positive"));
    }
    Ok(value)
}
