//! Invoice and line-item records as they live in the relational store.
//!
//! The filter layer never mutates these; they are created and updated by the
//! billing workflows that own the tables.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use invoicer_core::{DomainError, DomainResult, ValueObject};

use crate::status::InvoiceStatus;

invoicer_core::uuid_newtype!(
    /// Invoice identifier.
    InvoiceId
);

invoicer_core::uuid_newtype!(
    /// Line-item identifier.
    ItemId
);

/// Schema metadata: where a record type lives in the store.
pub trait Table {
    /// Default relation name.
    const TABLE: &'static str;
    /// Column list in select order.
    const COLUMNS: &'static [&'static str];
}

/// VAT identifier as stored on an invoice.
///
/// Only the column constraint is enforced here (at most
/// [`VatId::MAX_LEN`] characters); format rules are country specific and
/// live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VatId(String);

impl VatId {
    pub const MAX_LEN: usize = 14;

    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        let len = value.chars().count();
        if len > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "vat id must be at most {} characters (got {len})",
                Self::MAX_LEN
            )));
        }
        Ok(Self(value))
    }

    /// Parse a stored column value. Blank columns mean "no VAT id".
    pub fn from_column(value: &str) -> DomainResult<Option<Self>> {
        if value.is_empty() {
            Ok(None)
        } else {
            Self::new(value).map(Some)
        }
    }

    /// Column value for an optional VAT id.
    pub fn to_column(value: Option<&VatId>) -> &str {
        value.map(VatId::as_str).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for VatId {}

impl TryFrom<String> for VatId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VatId> for String {
    fn from(value: VatId) -> Self {
        value.0
    }
}

impl core::fmt::Display for VatId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invoice record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub number: String,
    pub status: InvoiceStatus,
    pub date_issue: NaiveDate,
    pub date_due: NaiveDate,
    pub customer_vat_id: Option<VatId>,
    pub supplier_vat_id: Option<VatId>,
}

impl Table for Invoice {
    const TABLE: &'static str = "invoicing_invoice";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "number",
        "status",
        "date_issue",
        "date_due",
        "customer_vat_id",
        "supplier_vat_id",
    ];
}

/// Invoice line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub invoice_id: InvoiceId,
    pub title: String,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: i64,
    /// Category label; `None` when the line was never tagged.
    pub tag: Option<String>,
}

impl Table for Item {
    const TABLE: &'static str = "invoicing_item";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "invoice_id",
        "title",
        "quantity",
        "unit_price",
        "tag",
    ];
}
