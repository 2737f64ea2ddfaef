//! Memoized table lookup with expiration.

use crate::error::{CoreError, CoreResult};
use crate::table::{TableProvider, VersionedTable};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Caches one named table obtained from a [`TableProvider`].
///
/// The table is fetched on first use and again once `ttl` has passed since
/// the last fetch. Fetching happens under a lock, so concurrent callers
/// that find the cache empty wait for a single provider call. Failures are
/// returned to the caller and never cached.
pub struct TableCache {
    provider: Arc<dyn TableProvider>,
    name: String,
    ttl: Duration,
    slot: Mutex<Option<(Arc<VersionedTable>, Instant)>>,
}

impl TableCache {
    /// Creates an empty cache for table `name`.
    pub fn new(provider: Arc<dyn TableProvider>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            provider,
            name: name.into(),
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Returns the table, fetching it if the cache is empty or stale.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Initialization`] wrapping the provider failure.
    pub fn get(&self) -> CoreResult<Arc<VersionedTable>> {
        let mut slot = self.slot.lock();
        if let Some((table, refreshed_at)) = slot.as_ref() {
            if refreshed_at.elapsed() < self.ttl {
                return Ok(Arc::clone(table));
            }
        }

        let table = self
            .provider
            .get_or_create(&self.name)
            .map_err(|e| CoreError::initialization(&self.name, e))?;
        debug!(table = %self.name, "table cache refreshed");
        *slot = Some((Arc::clone(&table), Instant::now()));
        Ok(table)
    }

    /// Drops the cached table so the next access fetches it again.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    /// Returns the cached table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for TableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("cached", &self.slot.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::table::InMemoryTableProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    /// Slow provider that counts calls and can fail the first few.
    #[derive(Debug, Default)]
    struct CountingProvider {
        inner: InMemoryTableProvider,
        calls: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl TableProvider for CountingProvider {
        fn get_or_create(&self, name: &str) -> CoreResult<Arc<VersionedTable>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CoreError::StoreLocked);
            }
            self.inner.get_or_create(name)
        }
    }

    #[test]
    fn concurrent_first_access_fetches_once() {
        let provider = Arc::new(CountingProvider::default());
        let cache = Arc::new(TableCache::new(
            provider.clone(),
            "namespaces",
            Duration::from_secs(300),
        ));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get().unwrap()
                })
            })
            .collect();
        let tables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(tables.iter().all(|t| Arc::ptr_eq(t, &tables[0])));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.inner.creations(), 1);
    }

    #[test]
    fn stale_entry_is_refreshed() {
        let provider = Arc::new(CountingProvider::default());
        let cache = TableCache::new(provider.clone(), "t", Duration::ZERO);
        let a = cache.get().unwrap();
        let b = cache.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.inner.creations(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let provider = Arc::new(CountingProvider {
            failures_left: AtomicUsize::new(1),
            ..CountingProvider::default()
        });
        let cache = TableCache::new(provider.clone(), "t", Duration::from_secs(60));

        let err = cache.get().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Initialization);
        cache.get().unwrap();
        cache.get().unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_forces_refetch() {
        let provider = Arc::new(CountingProvider::default());
        let cache = TableCache::new(provider.clone(), "t", Duration::from_secs(60));
        cache.get().unwrap();
        cache.invalidate();
        cache.get().unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
