//! Namespace store facade.

use crate::config::StoreConfig;
use crate::error::CoreResult;
use crate::namespace::mds::NamespaceMetadataStore;
use crate::namespace::meta::{NamespaceId, NamespaceMeta};
use crate::table::{DirTableProvider, InMemoryTableProvider, TableCache, TableProvider, TxTable};
use crate::tx::{
    Bound, Interrupt, RetryPolicy, RetryingExecutor, TransactionExecutorFactory,
    TransactionManager,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Namespace lifecycle operations.
///
/// Every call is atomic and blocks until it commits or fails.
pub trait NamespaceStore: Send + Sync {
    /// Creates `meta` unless a namespace with that name exists.
    ///
    /// Returns `None` if the namespace was created, or the existing record
    /// if it was already there, in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Validation`] for an invalid name, before
    /// any transaction starts.
    fn create_namespace(&self, meta: &NamespaceMeta) -> CoreResult<Option<NamespaceMeta>>;

    /// Replaces the record of an existing namespace. Does nothing if the
    /// namespace does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Validation`] for an invalid name.
    fn update_namespace(&self, meta: &NamespaceMeta) -> CoreResult<()>;

    /// Returns the record of `id`.
    ///
    /// # Errors
    ///
    /// Returns storage, codec or transaction failures.
    fn get_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>>;

    /// Deletes `id` and returns its record, or `None` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns storage, codec or transaction failures.
    fn delete_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>>;

    /// Returns every namespace, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns storage, codec or transaction failures.
    fn list_namespaces(&self) -> CoreResult<Vec<NamespaceMeta>>;

    /// Checks if `id` exists.
    ///
    /// # Errors
    ///
    /// Same as [`NamespaceStore::get_namespace`].
    fn exists(&self, id: &NamespaceId) -> CoreResult<bool> {
        Ok(self.get_namespace(id)?.is_some())
    }
}

type BoundStore = NamespaceMetadataStore<Arc<TxTable>>;

/// Namespace store running each operation as a retried transaction over a
/// shared table.
///
/// # Example
///
/// ```rust
/// use nsmeta_core::{DefaultNamespaceStore, NamespaceMeta, NamespaceStore, StoreConfig};
///
/// let store = DefaultNamespaceStore::in_memory(StoreConfig::default());
/// assert!(store.create_namespace(&NamespaceMeta::new("foo1")).unwrap().is_none());
/// assert_eq!(store.list_namespaces().unwrap().len(), 1);
/// ```
pub struct DefaultNamespaceStore {
    executor: RetryingExecutor<BoundStore>,
    cache: Arc<TableCache>,
    manager: Arc<TransactionManager>,
    config: StoreConfig,
}

impl DefaultNamespaceStore {
    /// Creates a store whose table lives in memory.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::with_provider(
            config,
            Arc::new(InMemoryTableProvider::new()),
            Arc::new(TransactionManager::new()),
        )
    }

    /// Opens a store persisted under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::StoreLocked`] if another store has the
    /// directory open, or an I/O error.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        let provider = DirTableProvider::open(path.as_ref(), config.sync_on_commit)?;
        info!(path = %path.as_ref().display(), "opened namespace store");
        Ok(Self::with_provider(
            config,
            Arc::new(provider),
            Arc::new(TransactionManager::new()),
        ))
    }

    /// Creates a store over shared infrastructure, retrying per
    /// `config.retry`.
    pub fn with_provider(
        config: StoreConfig,
        provider: Arc<dyn TableProvider>,
        manager: Arc<TransactionManager>,
    ) -> Self {
        let policy = Arc::new(config.retry);
        Self::with_policy(config, provider, manager, policy)
    }

    /// Creates a store over shared infrastructure with a custom retry
    /// policy.
    pub fn with_policy(
        config: StoreConfig,
        provider: Arc<dyn TableProvider>,
        manager: Arc<TransactionManager>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        let cache = Arc::new(TableCache::new(
            provider,
            config.table_name.clone(),
            config.table_cache_ttl,
        ));
        let codec = config.value_format.codec::<NamespaceMeta>();
        let factory = TransactionExecutorFactory::new(Arc::clone(&manager), policy);

        let tables = Arc::clone(&cache);
        let executor = factory.create(move || {
            let handle = Arc::new(TxTable::new(tables.get()?));
            let store = NamespaceMetadataStore::new(Arc::clone(&handle), Arc::clone(&codec));
            Ok(Bound::new(store).with_participant(handle))
        });

        Self {
            executor,
            cache,
            manager,
            config,
        }
    }

    /// Returns the handle that interrupts the retry sleeps of operations
    /// running when it is raised.
    #[must_use]
    pub fn interrupt_handle(&self) -> Interrupt {
        self.executor.interrupt_handle()
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl NamespaceStore for DefaultNamespaceStore {
    fn create_namespace(&self, meta: &NamespaceMeta) -> CoreResult<Option<NamespaceMeta>> {
        let id = meta.id()?;
        let existing = self.executor.execute(|mds| match mds.get(&id)? {
            Some(existing) => Ok(Some(existing)),
            None => {
                mds.create(meta)?;
                Ok(None)
            }
        })?;

        match existing {
            None => info!(namespace = %id, "namespace created"),
            Some(_) => debug!(namespace = %id, "namespace already exists"),
        }
        Ok(existing)
    }

    fn update_namespace(&self, meta: &NamespaceMeta) -> CoreResult<()> {
        let id = meta.id()?;
        let updated = self.executor.execute(|mds| {
            if mds.exists(&id)? {
                mds.create(meta)?;
                Ok(true)
            } else {
                Ok(false)
            }
        })?;

        if !updated {
            debug!(namespace = %id, "update ignored, namespace does not exist");
        }
        Ok(())
    }

    fn get_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>> {
        self.executor.execute(|mds| mds.get(id))
    }

    fn delete_namespace(&self, id: &NamespaceId) -> CoreResult<Option<NamespaceMeta>> {
        let existing = self.executor.execute(|mds| {
            let existing = mds.get(id)?;
            if existing.is_some() {
                mds.delete(id)?;
            }
            Ok(existing)
        })?;

        if existing.is_some() {
            info!(namespace = %id, "namespace deleted");
        }
        Ok(existing)
    }

    fn list_namespaces(&self) -> CoreResult<Vec<NamespaceMeta>> {
        self.executor.execute(|mds| mds.list())
    }
}

impl fmt::Debug for DefaultNamespaceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultNamespaceStore")
            .field("table", &self.cache.name())
            .field("retry", &self.config.retry)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
