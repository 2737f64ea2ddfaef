//! Stress tests for the namespace store.
//!
//! These runs drive a store through many operations, sequentially and from
//! several threads at once.

use nsmeta_core::{NamespaceId, NamespaceMeta, NamespaceStore};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome counts and timing of one stress run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressTestResult {
    /// Calls that returned `Ok`.
    pub successful_ops: usize,
    /// Calls that returned an error.
    pub failed_ops: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl StressTestResult {
    /// Collects the counters of a finished run.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            successful_ops: successful,
            failed_ops: failed,
            duration,
        }
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn total_ops(&self) -> usize {
        self.successful_ops + self.failed_ops
    }

    /// Returns calls per second, or zero for an instantaneous run.
    #[must_use]
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops() as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a one-line summary labelled `name`.
    pub fn print_summary(&self, name: &str) {
        println!("{}: {}", name, self);
    }
}

impl fmt::Display for StressTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ops ({} failed) in {:?}, {:.0} ops/sec",
            self.total_ops(),
            self.failed_ops,
            self.duration,
            self.ops_per_second()
        )
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Length of the generated descriptions.
    pub description_len: usize,
    /// Number of distinct namespace names.
    pub namespace_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            description_len: 64,
            namespace_count: 100,
        }
    }
}

fn name_for(index: usize) -> String {
    format!("stress_{index:05}")
}

fn meta_for(index: usize, config: &StressConfig) -> NamespaceMeta {
    NamespaceMeta::builder(name_for(index))
        .description("d".repeat(config.description_len))
        .build()
}

fn record(result: bool, successful: &AtomicUsize, failed: &AtomicUsize) {
    if result {
        successful.fetch_add(1, Ordering::Relaxed);
    } else {
        failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run a sequential create stress test.
///
/// Names repeat once `operations` exceeds `namespace_count`; creating an
/// existing name still counts as a successful call.
pub fn stress_sequential_creates(
    store: &dyn NamespaceStore,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let meta = meta_for(i % config.namespace_count, config);
        match store.create_namespace(&meta) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed create/get/update/delete stress test.
pub fn stress_mixed_operations(
    store: &dyn NamespaceStore,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let index = i % config.namespace_count;
        let result = match i % 4 {
            0 => store.create_namespace(&meta_for(index, config)).map(|_| ()),
            1 => NamespaceId::new(name_for(index))
                .and_then(|id| store.get_namespace(&id))
                .map(|_| ()),
            2 => store.update_namespace(&meta_for(index, config)),
            _ => NamespaceId::new(name_for(index))
                .and_then(|id| store.delete_namespace(&id))
                .map(|_| ()),
        };

        match result {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent create stress test.
///
/// All threads start together and create the same names, so most creates
/// race with another thread.
pub fn stress_concurrent_creates<S>(store: Arc<S>, config: &StressConfig) -> StressTestResult
where
    S: NamespaceStore + 'static,
{
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(config.threads));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let barrier = Arc::clone(&barrier);
            let config = config.clone();

            thread::spawn(move || {
                barrier.wait();
                for i in 0..ops_per_thread {
                    let meta = meta_for(i % config.namespace_count, &config);
                    record(store.create_namespace(&meta).is_ok(), &successful, &failed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a concurrent read stress test against a populated store.
pub fn stress_concurrent_reads<S>(store: Arc<S>, config: &StressConfig) -> StressTestResult
where
    S: NamespaceStore + 'static,
{
    for i in 0..config.namespace_count {
        let _ = store.create_namespace(&meta_for(i, config));
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let namespace_count = config.namespace_count;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let index = (t * ops_per_thread + i) % namespace_count;
                    let found = NamespaceId::new(name_for(index))
                        .and_then(|id| store.get_namespace(&id))
                        .map(|meta| meta.is_some())
                        .unwrap_or(false);
                    record(found, &successful, &failed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
