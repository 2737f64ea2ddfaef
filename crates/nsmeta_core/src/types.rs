//! Core type definitions.

use std::fmt;

/// Identifier of a transaction, doubling as its write pointer.
///
/// Ids are handed out from one monotonically increasing counter shared
/// with commit pointers, so "committed after this transaction began" is a
/// plain comparison. Row versions are tagged with the id of the
/// transaction that wrote them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Writer id of versions restored from a table log. Visible to every
    /// transaction.
    pub const BASE: TransactionId = TransactionId(0);

    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for [`TransactionId::BASE`].
    #[must_use]
    pub const fn is_base(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}
