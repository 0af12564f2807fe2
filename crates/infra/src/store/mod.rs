//! Invoice store boundary.
//!
//! A store runs [`InvoiceQuery`]/[`ItemQuery`] criteria against persisted
//! rows and provides the exclusive table lock used to serialize
//! read-modify-write sequences on invoices.
//!
//! ## Transactions
//!
//! Locking needs an explicit transaction handle: there is no ambient
//! "current transaction". The lock is held until the handle commits, rolls
//! back, or is dropped. A handle that already finished stays usable as a
//! value, and locking through it is a [`StoreError::Precondition`].
//!
//! ## Errors
//!
//! Store failures are returned unchanged; nothing here retries. Filters
//! that match nothing return an empty `Vec`, not an error.

pub mod in_memory;
pub mod postgres;
mod sql;

pub use in_memory::{InMemoryInvoiceStore, InMemoryTransaction};
pub use postgres::{PgInvoiceStore, PgStoreTransaction};

use thiserror::Error;

use invoicer_invoicing::{Invoice, InvoiceQuery, Item, ItemQuery};

/// Store operation error.
///
/// - **Precondition**: the call itself was not allowed (lock without an
///   active transaction, or a backend that cannot take the lock).
/// - **Database / Connection / Decode**: the backend failed; surfaced as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },

    #[error("connection error in {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },

    #[error("failed to decode row: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn no_transaction(operation: &str) -> Self {
        Self::Precondition(format!("{operation} requested without enclosing transaction"))
    }

    pub(crate) fn invalid_relation(name: &str, reason: &str) -> Self {
        Self::Database {
            operation: "resolve_relation",
            code: None,
            message: format!("malformed relation name {name:?}: {reason}"),
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}

/// Handle on an open store transaction.
#[async_trait::async_trait]
pub trait StoreTransaction: Send {
    /// `false` once the transaction committed or rolled back.
    fn is_active(&self) -> bool;

    /// Commit and release every lock taken through this handle.
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back and release every lock taken through this handle.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Query and lock access to the invoice and line-item tables.
#[async_trait::async_trait]
pub trait InvoiceStore: Send + Sync {
    type Transaction: StoreTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Invoices matching `query`, ordered by `(date_due, id)`.
    ///
    /// Waits while another transaction holds the invoice table lock.
    async fn invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError>;

    /// Same as [`invoices`](Self::invoices), inside `tx`. This is how the lock
    /// holder reads the table it locked.
    async fn invoices_in(
        &self,
        tx: &mut Self::Transaction,
        query: &InvoiceQuery,
    ) -> Result<Vec<Invoice>, StoreError>;

    /// Items matching `query`, ordered by `id`.
    async fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError>;

    /// Take the exclusive (`ACCESS EXCLUSIVE`) lock on the invoice table.
    ///
    /// Blocks until granted. No timeout is applied here.
    async fn lock(&self, tx: &mut Self::Transaction) -> Result<(), StoreError>;
}
