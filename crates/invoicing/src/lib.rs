//! Invoicing records and the filter layer over them.
//!
//! This crate is pure: it describes the invoice and line-item rows, the
//! status lifecycle shared with the schema, and lazy query criteria. Running
//! queries and locking tables is the infrastructure layer's job.

pub mod query;
pub mod schema;
pub mod status;

pub use query::{DueCutoff, InvoicePredicate, InvoiceQuery, ItemPredicate, ItemQuery};
pub use schema::{Invoice, InvoiceId, Item, ItemId, Table, VatId};
pub use status::InvoiceStatus;
