//! Typed namespace records over a key-value table.

use crate::codec::{Codec, JsonCodec};
use crate::error::{CoreError, CoreResult};
use crate::key::CompositeKey;
use crate::namespace::meta::{NamespaceId, NamespaceMeta};
use crate::table::KeyValueTable;
use std::fmt;
use std::sync::Arc;

/// Type segment of every namespace row key.
pub const NAMESPACE_TYPE: &str = "namespace";

/// CRUD over namespace records stored at `("namespace", name)`.
///
/// Runs inside whatever transaction the table is bound to and never
/// commits on its own.
pub struct NamespaceMetadataStore<T> {
    table: T,
    codec: Arc<dyn Codec<NamespaceMeta>>,
}

impl<T: KeyValueTable> NamespaceMetadataStore<T> {
    /// Creates a store writing records with `codec`.
    pub fn new(table: T, codec: Arc<dyn Codec<NamespaceMeta>>) -> Self {
        Self { table, codec }
    }

    /// Creates a store writing JSON records.
    pub fn with_json(table: T) -> Self {
        Self::new(table, Arc::new(JsonCodec))
    }

    /// Returns the underlying table.
    pub fn table(&self) -> &T {
        &self.table
    }

    fn key(name: &str) -> CompositeKey {
        CompositeKey::builder()
            .add_str(NAMESPACE_TYPE)
            .add_str(name)
            .build()
    }

    /// Writes `meta` under its name, replacing any existing record.
    ///
    /// # Errors
    ///
    /// Returns codec or table failures.
    pub fn create(&self, meta: &NamespaceMeta) -> CoreResult<()> {
        let value = self.codec.encode(meta)?;
        self.table.write(&Self::key(&meta.name), &value)
    }

    /// Reads the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns codec or table failures.
    pub fn get(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>> {
        self.table
            .read_first(&Self::key(id.as_str()))?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    /// Removes the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns table failures.
    pub fn delete(&self, id: &NamespaceId) -> CoreResult<()> {
        self.table.delete_all(&Self::key(id.as_str()))
    }

    /// Checks if a record exists for `id`.
    ///
    /// # Errors
    ///
    /// Returns codec or table failures.
    pub fn exists(&self, id: &NamespaceId) -> CoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Returns every record, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns codec or table failures, including a row whose key does not
    /// match the name inside its record.
    pub fn list(&self) -> CoreResult<Vec<NamespaceMeta>> {
        let rows = self.table.scan(&CompositeKey::prefix_for(NAMESPACE_TYPE))?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let mut segments = key.splitter();
            segments.skip()?;
            let name = segments.next_string()?;
            if !segments.is_empty() {
                return Err(CoreError::codec(format!("unexpected namespace row key {key}")));
            }
            let meta = self.codec.decode(&value)?;
            if meta.name != name {
                return Err(CoreError::codec(format!(
                    "row {key} holds record for `{}`",
                    meta.name
                )));
            }
            out.push(meta);
        }
        Ok(out)
    }
}

impl<T> fmt::Debug for NamespaceMetadataStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceMetadataStore")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
