//! Transactional key-value tables.
//!
//! A [`VersionedTable`] is shared infrastructure owned by a
//! [`TableProvider`]. Transactions never touch it directly: each attempt
//! wraps it in a [`TxTable`], which buffers writes, overlays them on the
//! attempt's snapshot and installs them at commit.

mod cache;
mod handle;
pub mod log;
mod provider;
mod versioned;

pub use cache::TableCache;
pub use handle::TxTable;
pub use provider::{DirTableProvider, InMemoryTableProvider, TableProvider};
pub use versioned::VersionedTable;

use crate::error::CoreResult;
use crate::key::CompositeKey;
use std::sync::Arc;

/// Key-value operations available inside a transaction.
///
/// None of these commit on their own: writes become visible to other
/// transactions only when the enclosing transaction commits.
pub trait KeyValueTable: Send + Sync {
    /// Inserts or replaces the value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidOperation`] outside a transaction.
    fn write(&self, key: &CompositeKey, value: &[u8]) -> CoreResult<()>;

    /// Returns the value at exactly `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidOperation`] outside a transaction.
    fn read_first(&self, key: &CompositeKey) -> CoreResult<Option<Vec<u8>>>;

    /// Returns every entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidOperation`] outside a transaction.
    fn scan(&self, prefix: &CompositeKey) -> CoreResult<Vec<(CompositeKey, Vec<u8>)>>;

    /// Removes every entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidOperation`] outside a transaction.
    fn delete_all(&self, prefix: &CompositeKey) -> CoreResult<()>;
}

impl<T: KeyValueTable + ?Sized> KeyValueTable for Arc<T> {
    fn write(&self, key: &CompositeKey, value: &[u8]) -> CoreResult<()> {
        (**self).write(key, value)
    }

    fn read_first(&self, key: &CompositeKey) -> CoreResult<Option<Vec<u8>>> {
        (**self).read_first(key)
    }

    fn scan(&self, prefix: &CompositeKey) -> CoreResult<Vec<(CompositeKey, Vec<u8>)>> {
        (**self).scan(prefix)
    }

    fn delete_all(&self, prefix: &CompositeKey) -> CoreResult<()> {
        (**self).delete_all(prefix)
    }
}

/// Conflict-detection id of a row: table name, a zero byte, then the key.
pub(crate) fn change_id(table: &str, key: &[u8]) -> Vec<u8> {
    let mut id = Vec::with_capacity(table.len() + 1 + key.len());
    id.extend_from_slice(table.as_bytes());
    id.push(0);
    id.extend_from_slice(key);
    id
}
