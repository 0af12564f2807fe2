//! Infrastructure layer: invoice stores, table locking, configuration.

pub mod config;
pub mod lock;
pub mod store;


pub use config::{ConfigError, StoreConfig};
pub use lock::{LockMode, Relation};
pub use store::{
    InMemoryInvoiceStore, InMemoryTransaction, InvoiceStore, PgInvoiceStore, PgStoreTransaction,
    StoreError, StoreTransaction,
};
