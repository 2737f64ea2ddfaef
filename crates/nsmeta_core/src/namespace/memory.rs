//! In-memory namespace store for tests.

use crate::error::CoreResult;
use crate::namespace::meta::{NamespaceId, NamespaceMeta};
use crate::namespace::store::NamespaceStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// [`NamespaceStore`] over a plain ordered map.
///
/// Same results as [`crate::DefaultNamespaceStore`], with each operation
/// made atomic by a single lock instead of a transaction.
#[derive(Debug, Default)]
pub struct InMemoryNamespaceStore {
    records: RwLock<BTreeMap<String, NamespaceMeta>>,
}

impl InMemoryNamespaceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Checks if the store holds no namespace.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl NamespaceStore for InMemoryNamespaceStore {
    fn create_namespace(&self, meta: &NamespaceMeta) -> CoreResult<Option<NamespaceMeta>> {
        let id = meta.id()?;
        let mut records = self.records.write();
        if let Some(existing) = records.get(id.as_str()) {
            return Ok(Some(existing.clone()));
        }
        records.insert(id.as_str().to_string(), meta.clone());
        Ok(None)
    }

    fn update_namespace(&self, meta: &NamespaceMeta) -> CoreResult<()> {
        let id = meta.id()?;
        if let Some(record) = self.records.write().get_mut(id.as_str()) {
            *record = meta.clone();
        }
        Ok(())
    }

    fn get_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>> {
        Ok(self.records.read().get(id.as_str()).cloned())
    }

    fn delete_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>> {
        Ok(self.records.write().remove(id.as_str()))
    }

    fn list_namespaces(&self) -> CoreResult<Vec<NamespaceMeta>> {
        Ok(self.records.read().values().cloned().collect())
    }
}
