use core::str::FromStr;

use serde::{Deserialize, Serialize};

use invoicer_core::DomainError;

/// Invoice status lifecycle.
///
/// Stored as the upper-case code (`"PAID"`, `"SENT"`, ...). The same enum is
/// used by the record schema and by every status predicate, so a filter can
/// never name a status the table cannot hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Returned,
    Canceled,
    Paid,
    Credited,
    Uncollectible,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 7] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Returned,
        InvoiceStatus::Canceled,
        InvoiceStatus::Paid,
        InvoiceStatus::Credited,
        InvoiceStatus::Uncollectible,
    ];

    /// Statuses that take an invoice out of collections regardless of its due date.
    pub const SETTLED: [InvoiceStatus; 2] = [InvoiceStatus::Paid, InvoiceStatus::Canceled];

    /// Statuses that make an invoice no longer count as issued.
    pub const VOID: [InvoiceStatus; 2] = [InvoiceStatus::Returned, InvoiceStatus::Canceled];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Returned => "RETURNED",
            InvoiceStatus::Canceled => "CANCELED",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Credited => "CREDITED",
            InvoiceStatus::Uncollectible => "UNCOLLECTIBLE",
        }
    }

    pub fn is_settled(self) -> bool {
        Self::SETTLED.contains(&self)
    }

    pub fn is_void(self) -> bool {
        Self::VOID.contains(&self)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::unknown_code("invoice status", s))
    }
}
