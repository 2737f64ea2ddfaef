//! Test fixtures and store helpers.
//!
//! Provides stores with automatic cleanup and a few populated scenarios.

use nsmeta_core::{
    Bound, CoreResult, DefaultNamespaceStore, NamespaceMeta, NamespaceStore, NoRetry,
    RetryConfig, RetryingExecutor, StoreConfig, TransactionManager, TxTable, VersionedTable,
};
use nsmeta_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration tuned for tests: retries without the production delay.
pub fn test_config() -> StoreConfig {
    StoreConfig::new()
        .retry(RetryConfig::new().delay(Duration::from_millis(1)))
        .sync_on_commit(false)
}

/// A namespace store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: DefaultNamespaceStore,
    config: StoreConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates an in-memory store with `config`.
    pub fn memory_with(config: StoreConfig) -> Self {
        Self {
            store: DefaultNamespaceStore::in_memory(config.clone()),
            config,
            temp_dir: None,
        }
    }

    /// Creates a directory-backed store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = test_config();
        let store = DefaultNamespaceStore::open(temp_dir.path().join("store"), config.clone())
            .expect("Failed to open file store");
        Self {
            store,
            config,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes and reopens a file-based store, keeping its directory.
    ///
    /// # Panics
    ///
    /// Panics for an in-memory store.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file stores can be reopened");
        let Self {
            store,
            config,
            temp_dir,
        } = self;
        drop(store);
        let store =
            DefaultNamespaceStore::open(&path, config.clone()).expect("Failed to reopen store");
        Self {
            store,
            config,
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = DefaultNamespaceStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use nsmeta_core::{NamespaceMeta, NamespaceStore};
/// use nsmeta_testkit::with_temp_store;
///
/// with_temp_store(|store| {
///     assert!(store.create_namespace(&NamespaceMeta::new("ns")).unwrap().is_none());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&DefaultNamespaceStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary directory-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&DefaultNamespaceStore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

/// A persistent table over an in-memory log that can be reopened.
pub struct TestTable {
    /// The table instance.
    pub table: Arc<VersionedTable>,
    manager: Arc<TransactionManager>,
    backend: InMemoryBackend,
}

impl TestTable {
    /// Creates an empty persistent table called `name`.
    pub fn new(name: &str) -> Self {
        let backend = InMemoryBackend::new();
        let table = VersionedTable::open(name, Box::new(backend.clone()), false)
            .expect("Failed to open table");
        Self {
            table: Arc::new(table),
            manager: Arc::new(TransactionManager::new()),
            backend,
        }
    }

    /// Runs `body` in one transaction against the table, without retry.
    pub fn execute<R, F>(&self, body: F) -> CoreResult<R>
    where
        F: Fn(&Arc<TxTable>) -> CoreResult<R>,
    {
        let table = Arc::clone(&self.table);
        let executor = RetryingExecutor::new(Arc::clone(&self.manager), Arc::new(NoRetry), move || {
            let handle = Arc::new(TxTable::new(Arc::clone(&table)));
            Ok(Bound::new(Arc::clone(&handle)).with_participant(handle))
        });
        executor.execute(body)
    }

    /// Returns the raw log bytes.
    pub fn log_bytes(&self) -> Vec<u8> {
        self.backend.data()
    }

    /// Replays the log into a new table instance with a fresh manager.
    pub fn reopen(self) -> Self {
        let name = self.table.name().to_string();
        let backend = self.backend;
        let table = VersionedTable::open(name, Box::new(backend.clone()), false)
            .expect("Failed to reopen table");
        Self {
            table: Arc::new(table),
            manager: Arc::new(TransactionManager::new()),
            backend,
        }
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store holding `count` namespaces named `ns_0000`,
    /// `ns_0001`, ...
    pub fn populated_store(count: usize) -> TestStore {
        let test_store = TestStore::memory();
        for i in 0..count {
            let meta = NamespaceMeta::builder(format!("ns_{i:04}"))
                .description(format!("namespace {i}"))
                .build();
            test_store
                .create_namespace(&meta)
                .expect("Failed to create namespace");
        }
        test_store
    }
}
