//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two VAT
/// identifiers with the same characters are the same VAT identifier, two
/// cutoffs at the same instant are the same cutoff. To "modify" one, build a
/// new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct VatId(String);
///
/// impl ValueObject for VatId {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
