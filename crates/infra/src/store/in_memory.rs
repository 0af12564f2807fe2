use std::sync::{Arc, RwLock, RwLockReadGuard};

use tokio::sync::{OwnedRwLockWriteGuard, RwLock as TableLock};
use tracing::{debug, info};

use invoicer_invoicing::{Invoice, InvoiceQuery, Item, ItemQuery};

use super::{InvoiceStore, StoreError, StoreTransaction};
use crate::lock::{LockMode, Relation};

#[derive(Debug, Default)]
struct Tables {
    invoices: Vec<Invoice>,
    items: Vec<Item>,
}

/// In-memory invoice store.
///
/// Intended for tests/dev. The invoice table lock behaves like Postgres'
/// `ACCESS EXCLUSIVE`: while a transaction holds it, other lockers, plain
/// reads and inserts on invoices wait until that transaction finishes.
#[derive(Debug, Clone)]
pub struct InMemoryInvoiceStore {
    tables: Arc<RwLock<Tables>>,
    invoice_table_lock: Arc<TableLock<()>>,
}

impl Default for InMemoryInvoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            invoice_table_lock: Arc::new(TableLock::new(())),
        }
    }

    pub fn with_records(
        invoices: impl IntoIterator<Item = Invoice>,
        items: impl IntoIterator<Item = Item>,
    ) -> Self {
        let store = Self::new();
        if let Ok(mut tables) = store.tables.write() {
            tables.invoices.extend(invoices);
            tables.items.extend(items);
        }
        store
    }

    /// Insert or replace an invoice (by id). Waits for the table lock.
    pub async fn insert_invoice(&self, invoice: Invoice) -> Result<(), StoreError> {
        let _shared = self.invoice_table_lock.read().await;
        let mut tables = self.tables.write().map_err(|_| poisoned("insert_invoice"))?;
        tables.invoices.retain(|i| i.id != invoice.id);
        tables.invoices.push(invoice);
        Ok(())
    }

    /// Insert or replace an invoice from inside `tx`.
    ///
    /// Does not wait when `tx` itself holds the table lock. Writes are applied
    /// immediately; rolling `tx` back does not undo them.
    pub async fn insert_invoice_in(
        &self,
        tx: &mut InMemoryTransaction,
        invoice: Invoice,
    ) -> Result<(), StoreError> {
        if !tx.is_active() {
            return Err(StoreError::no_transaction("insert_invoice_in"));
        }
        if !tx.holds_invoice_lock() {
            return self.insert_invoice(invoice).await;
        }
        let mut tables = self.tables.write().map_err(|_| poisoned("insert_invoice_in"))?;
        tables.invoices.retain(|i| i.id != invoice.id);
        tables.invoices.push(invoice);
        Ok(())
    }

    /// Insert or replace a line item (by id).
    pub async fn insert_item(&self, item: Item) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned("insert_item"))?;
        tables.items.retain(|i| i.id != item.id);
        tables.items.push(item);
        Ok(())
    }

    fn read_tables(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| poisoned(operation))
    }

    fn select_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        let tables = self.read_tables("invoices")?;
        let mut rows: Vec<Invoice> = query.apply(&tables.invoices).cloned().collect();
        rows.sort_by_key(|i| (i.date_due, i.id));
        Ok(rows)
    }
}

fn poisoned(operation: &'static str) -> StoreError {
    StoreError::Database {
        operation,
        code: None,
        message: "lock poisoned".to_string(),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Transaction handle for [`InMemoryInvoiceStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    state: TxState,
    invoice_lock: Option<OwnedRwLockWriteGuard<()>>,
}

impl InMemoryTransaction {
    pub fn holds_invoice_lock(&self) -> bool {
        self.invoice_lock.is_some()
    }

    fn finish(&mut self, next: TxState, operation: &str) -> Result<(), StoreError> {
        if self.state != TxState::Active {
            return Err(StoreError::precondition(format!(
                "{operation} on a finished transaction ({:?})",
                self.state
            )));
        }
        self.state = next;
        if self.invoice_lock.take().is_some() {
            debug!(operation, "invoice table lock released");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StoreTransaction for InMemoryTransaction {
    fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.finish(TxState::Committed, "commit")
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finish(TxState::RolledBack, "rollback")
    }
}

#[async_trait::async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        Ok(InMemoryTransaction {
            state: TxState::Active,
            invoice_lock: None,
        })
    }

    async fn invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, StoreError> {
        let _shared = self.invoice_table_lock.read().await;
        self.select_invoices(query)
    }

    async fn invoices_in(
        &self,
        tx: &mut InMemoryTransaction,
        query: &InvoiceQuery,
    ) -> Result<Vec<Invoice>, StoreError> {
        if !tx.is_active() {
            return Err(StoreError::no_transaction("invoices_in"));
        }
        if tx.holds_invoice_lock() {
            return self.select_invoices(query);
        }
        let _shared = self.invoice_table_lock.read().await;
        self.select_invoices(query)
    }

    async fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        let tables = self.read_tables("items")?;
        let mut rows: Vec<Item> = query.apply(&tables.items).cloned().collect();
        rows.sort_by_key(|i| i.id);
        Ok(rows)
    }

    async fn lock(&self, tx: &mut InMemoryTransaction) -> Result<(), StoreError> {
        if !tx.is_active() {
            return Err(StoreError::no_transaction("lock"));
        }
        if tx.holds_invoice_lock() {
            return Ok(());
        }

        let relation = Relation::of::<Invoice>();
        let mode = LockMode::AccessExclusive;
        debug!(%relation, %mode, "waiting for table lock");
        let guard = self.invoice_table_lock.clone().write_owned().await;
        tx.invoice_lock = Some(guard);
        info!(%relation, %mode, blocks_reads = mode.blocks_reads(), "table lock granted");
        Ok(())
    }
}
