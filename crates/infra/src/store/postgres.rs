//! Postgres-backed invoice store.
//!
//! Queries are rendered with `sqlx::QueryBuilder` (every value is a bind
//! parameter) and the table lock is a literal `LOCK TABLE` statement on the
//! transaction's connection.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `25P01` | `Precondition` | `LOCK TABLE` outside a transaction block |
//! | Database | `0A000` | `Precondition` | Backend cannot run the lock statement |
//! | Database | Any other | `Database` | Permissions, unknown relation, constraint, ... |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `Connection` | Network or pool failure |
//! | ColumnDecode / Decode / ColumnNotFound | N/A | `Decode` | Row does not fit the record |
//! | Other | N/A | `Database` | Anything else |

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use invoicer_invoicing::{
    Invoice, InvoiceId, InvoiceQuery, InvoiceStatus, Item, ItemId, ItemQuery, VatId,
};

use super::sql::{select_invoices, select_items};
use super::{InvoiceStore, StoreError, StoreTransaction};
use crate::config::StoreConfig;
use crate::lock::{LockMode, Relation, lock_statement};

/// Postgres-backed invoice store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
#[derive(Debug, Clone)]
pub struct PgInvoiceStore {
    pool: Arc<PgPool>,
    invoice_table: Relation,
    item_table: Relation,
}

impl PgInvoiceStore {
    /// Store over the default relations named by the record schema.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            invoice_table: Relation::of::<Invoice>(),
            item_table: Relation::of::<Item>(),
        }
    }

    /// Store over explicitly named (optionally schema-qualified) relations.
    pub fn with_tables(pool: PgPool, invoice_table: &str, item_table: &str) -> Result<Self, StoreError> {
        Ok(Self {
            pool: Arc::new(pool),
            invoice_table: Relation::parse(invoice_table)?,
            item_table: Relation::parse(item_table)?,
        })
    }

    pub fn from_config(pool: PgPool, config: &StoreConfig) -> Result<Self, StoreError> {
        Self::with_tables(pool, &config.invoice_table, &config.item_table)
    }

    pub fn invoice_table(&self) -> &Relation {
        &self.invoice_table
    }

    #[instrument(
        skip(self, query),
        fields(operation = "fetch_invoices", predicates = query.predicates().len(), row_count),
        err
    )]
    pub async fn fetch_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        let mut qb = select_invoices(&self.invoice_table, query);
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_invoices", e))?;
        let invoices = decode_invoices(rows)?;
        tracing::Span::current().record("row_count", invoices.len());
        Ok(invoices)
    }

    #[instrument(
        skip(self, tx, query),
        fields(operation = "fetch_invoices_in", predicates = query.predicates().len()),
        err
    )]
    pub async fn fetch_invoices_in(
        &self,
        tx: &mut PgStoreTransaction,
        query: &InvoiceQuery,
    ) -> Result<Vec<Invoice>, StoreError> {
        let conn = tx.connection("invoices_in")?;
        let mut qb = select_invoices(&self.invoice_table, query);
        let rows = qb
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("fetch_invoices_in", e))?;
        decode_invoices(rows)
    }

    #[instrument(
        skip(self, query),
        fields(operation = "fetch_items", predicates = query.predicates().len()),
        err
    )]
    pub async fn fetch_items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        let mut qb = select_items(&self.item_table, query);
        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_items", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let item = ItemRow::from_row(&row).map_err(|e| StoreError::Decode(e.to_string()))?;
            items.push(item.into());
        }
        Ok(items)
    }

    /// Lock the invoice table in `mode` for the rest of `tx`.
    #[instrument(
        skip(self, tx),
        fields(operation = "lock", relation = %self.invoice_table, mode = %mode),
        err
    )]
    pub async fn lock_with_mode(&self, tx: &mut PgStoreTransaction, mode: LockMode) -> Result<(), StoreError> {
        let conn = tx.connection("lock")?;
        lock_relation(conn, &self.invoice_table, mode).await
    }

    /// Lock the invoice table on a connection the caller manages.
    ///
    /// Postgres refuses the statement unless `conn` is inside a transaction
    /// block; that refusal comes back as [`StoreError::Precondition`].
    #[instrument(
        skip(self, conn),
        fields(operation = "lock_on", relation = %self.invoice_table, mode = %mode),
        err
    )]
    pub async fn lock_on(&self, conn: &mut PgConnection, mode: LockMode) -> Result<(), StoreError> {
        lock_relation(conn, &self.invoice_table, mode).await
    }
}

async fn lock_relation(conn: &mut PgConnection, relation: &Relation, mode: LockMode) -> Result<(), StoreError> {
    let statement = lock_statement(relation, mode);
    debug!(%statement, "waiting for table lock");
    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&statement))
        .await
        .map_err(|e| map_sqlx_error("lock_table", e))?;
    info!(%relation, %mode, blocks_reads = mode.blocks_reads(), "table lock granted");
    Ok(())
}

/// Transaction handle for [`PgInvoiceStore`].
///
/// Dropping an active handle rolls the transaction back.
pub struct PgStoreTransaction {
    inner: Option<Transaction<'static, Postgres>>,
}

impl core::fmt::Debug for PgStoreTransaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgStoreTransaction")
            .field("active", &self.inner.is_some())
            .finish()
    }
}

impl PgStoreTransaction {
    fn connection(&mut self, operation: &str) -> Result<&mut PgConnection, StoreError> {
        match self.inner.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(StoreError::no_transaction(operation)),
        }
    }
}

#[async_trait::async_trait]
impl StoreTransaction for PgStoreTransaction {
    fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| StoreError::precondition("commit on a finished transaction"))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self
            .inner
            .take()
            .ok_or_else(|| StoreError::precondition("rollback on a finished transaction"))?;
        tx.rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback_transaction", e))
    }
}

#[async_trait::async_trait]
impl InvoiceStore for PgInvoiceStore {
    type Transaction = PgStoreTransaction;

    async fn begin(&self) -> Result<PgStoreTransaction, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PgStoreTransaction { inner: Some(tx) })
    }

    async fn invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        self.fetch_invoices(query).await
    }

    async fn invoices_in(
        &self,
        tx: &mut PgStoreTransaction,
        query: &InvoiceQuery,
    ) -> Result<Vec<Invoice>, StoreError> {
        self.fetch_invoices_in(tx, query).await
    }

    async fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        self.fetch_items(query).await
    }

    async fn lock(&self, tx: &mut PgStoreTransaction) -> Result<(), StoreError> {
        self.lock_with_mode(tx, LockMode::AccessExclusive).await
    }
}

/// SQLSTATE codes that mean "this call is not allowed here" rather than
/// "the store failed".
fn is_precondition_sqlstate(code: &str) -> bool {
    matches!(code, "25P01" | "0A000")
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            match code.as_deref() {
                Some(c) if is_precondition_sqlstate(c) => {
                    StoreError::Precondition(format!("{operation}: {}", db_err.message()))
                }
                _ => StoreError::Database {
                    operation,
                    code,
                    message: db_err.message().to_string(),
                },
            }
        }
        sqlx::Error::PoolClosed => StoreError::Connection {
            operation,
            message: "connection pool closed".to_string(),
        },
        sqlx::Error::PoolTimedOut => StoreError::Connection {
            operation,
            message: "timed out acquiring a connection".to_string(),
        },
        sqlx::Error::Io(e) => StoreError::Connection {
            operation,
            message: e.to_string(),
        },
        sqlx::Error::Tls(e) => StoreError::Connection {
            operation,
            message: e.to_string(),
        },
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)) => StoreError::Decode(format!("{operation}: {e}")),
        other => StoreError::Database {
            operation,
            code: None,
            message: other.to_string(),
        },
    }
}

fn decode_invoices(rows: Vec<PgRow>) -> Result<Vec<Invoice>, StoreError> {
    let mut invoices = Vec::with_capacity(rows.len());
    for row in rows {
        let raw = InvoiceRow::from_row(&row).map_err(|e| StoreError::Decode(e.to_string()))?;
        invoices.push(Invoice::try_from(raw)?);
    }
    Ok(invoices)
}

// SQLx row types

#[derive(Debug)]
struct InvoiceRow {
    id: uuid::Uuid,
    number: String,
    status: String,
    date_issue: NaiveDate,
    date_due: NaiveDate,
    customer_vat_id: String,
    supplier_vat_id: String,
}

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            status: row.try_get("status")?,
            date_issue: row.try_get("date_issue")?,
            date_due: row.try_get("date_due")?,
            customer_vat_id: row.try_get("customer_vat_id")?,
            supplier_vat_id: row.try_get("supplier_vat_id")?,
        })
    }
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = StoreError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let decode = |e: invoicer_core::DomainError| StoreError::Decode(format!("invoice {}: {e}", row.id));
        Ok(Invoice {
            id: InvoiceId::from_uuid(row.id),
            status: row.status.parse::<InvoiceStatus>().map_err(decode)?,
            customer_vat_id: VatId::from_column(&row.customer_vat_id).map_err(decode)?,
            supplier_vat_id: VatId::from_column(&row.supplier_vat_id).map_err(decode)?,
            number: row.number,
            date_issue: row.date_issue,
            date_due: row.date_due,
        })
    }
}

#[derive(Debug)]
struct ItemRow {
    id: uuid::Uuid,
    invoice_id: uuid::Uuid,
    title: String,
    quantity: i64,
    unit_price: i64,
    tag: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            title: row.try_get("title")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            tag: row.try_get("tag")?,
        })
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId::from_uuid(row.id),
            invoice_id: InvoiceId::from_uuid(row.invoice_id),
            title: row.title,
            quantity: row.quantity,
            unit_price: row.unit_price,
            tag: row.tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, customer_vat_id: &str) -> InvoiceRow {
        InvoiceRow {
            id: uuid::Uuid::now_v7(),
            number: "2024-0007".to_string(),
            status: status.to_string(),
            date_issue: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            date_due: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            customer_vat_id: customer_vat_id.to_string(),
            supplier_vat_id: String::new(),
        }
    }

    #[test]
    fn lock_outside_transaction_block_is_a_precondition() {
        assert!(is_precondition_sqlstate("25P01"));
        assert!(is_precondition_sqlstate("0A000"));
        // undefined_table, insufficient_privilege, lock_not_available
        assert!(!is_precondition_sqlstate("42P01"));
        assert!(!is_precondition_sqlstate("42501"));
        assert!(!is_precondition_sqlstate("55P03"));
    }

    #[test]
    fn pool_failures_are_connection_errors() {
        let err = map_sqlx_error("fetch_invoices", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Connection { operation: "fetch_invoices", .. }));
        assert!(!err.is_precondition());
    }

    #[test]
    fn missing_column_is_a_decode_error() {
        let err = map_sqlx_error("fetch_items", sqlx::Error::ColumnNotFound("tag".to_string()));
        assert!(matches!(err, StoreError::Decode(msg) if msg.contains("tag")));
    }

    #[test]
    fn row_decodes_into_invoice() {
        let inv = Invoice::try_from(row("SENT", "SK2022748965")).unwrap();
        assert_eq!(inv.status, InvoiceStatus::Sent);
        assert_eq!(inv.customer_vat_id.unwrap().as_str(), "SK2022748965");
        assert_eq!(inv.supplier_vat_id, None);
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let err = Invoice::try_from(row("ARCHIVED", "")).unwrap_err();
        assert!(matches!(err, StoreError::Decode(msg) if msg.contains("ARCHIVED")));
    }
}
