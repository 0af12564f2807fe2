//! Table lock modes and relation names.
//!
//! Locks are whole-relation and transaction scoped: they are released when
//! the holding transaction commits or rolls back, never explicitly.
//!
//! ## Deadlocks
//!
//! Locking is one table per call. Code that needs several tables in one
//! critical section must lock all of them up front, in the same order
//! everywhere; nothing here enforces that.

use invoicer_invoicing::Table;

use crate::store::StoreError;

/// Postgres table lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    /// Conflicts with every other mode, plain `SELECT`s included.
    #[default]
    AccessExclusive,
}

impl LockMode {
    pub fn as_sql(self) -> &'static str {
        match self {
            LockMode::AccessShare => "ACCESS SHARE",
            LockMode::RowShare => "ROW SHARE",
            LockMode::RowExclusive => "ROW EXCLUSIVE",
            LockMode::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockMode::Share => "SHARE",
            LockMode::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }

    /// Whether holding this mode blocks plain reads from other transactions.
    pub fn blocks_reads(self) -> bool {
        self == LockMode::AccessExclusive
    }
}

impl core::fmt::Display for LockMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A relation name, optionally schema-qualified (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relation {
    parts: Vec<String>,
}

impl Relation {
    /// Relation named by a record type's schema metadata.
    pub fn of<T: Table>() -> Self {
        Self {
            parts: vec![T::TABLE.to_string()],
        }
    }

    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let parts: Vec<String> = name.split('.').map(str::to_string).collect();
        if parts.len() > 2 {
            return Err(StoreError::invalid_relation(name, "too many name parts"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(StoreError::invalid_relation(name, "empty name part"));
        }
        if parts.iter().any(|p| p.contains('\0')) {
            return Err(StoreError::invalid_relation(name, "contains NUL"));
        }
        Ok(Self { parts })
    }

    /// Name as a quoted SQL identifier, safe to splice into a statement.
    pub fn quoted(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("\"{}\"", p.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl core::fmt::Display for Relation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.parts.join("."))
    }
}

/// `LOCK TABLE <relation> IN <mode> MODE`
pub fn lock_statement(relation: &Relation, mode: LockMode) -> String {
    format!("LOCK TABLE {} IN {} MODE", relation.quoted(), mode.as_sql())
}
