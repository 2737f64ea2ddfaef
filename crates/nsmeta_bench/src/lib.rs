//! Benchmark utilities.

use nsmeta_core::{NamespaceMeta, NamespaceStore};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random alphanumeric description of the specified length.
pub fn random_description(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate namespace records named `bench_000000`, `bench_000001`, ...
pub fn generate_metas(count: usize, description_len: usize) -> Vec<NamespaceMeta> {
    (0..count)
        .map(|i| {
            NamespaceMeta::builder(format!("bench_{i:06}"))
                .description(random_description(description_len))
                .root_directory(format!("/data/bench_{i:06}"))
                .build()
        })
        .collect()
}

/// Creates every record in `metas`, panicking on failure.
pub fn populate(store: &dyn NamespaceStore, metas: &[NamespaceMeta]) {
    for meta in metas {
        store
            .create_namespace(meta)
            .expect("Failed to populate store");
    }
}
