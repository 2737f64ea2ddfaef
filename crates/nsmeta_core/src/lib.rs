//! # nsmeta core
//!
//! Transactional namespace metadata store.
//!
//! This crate provides:
//! - Order-preserving composite keys
//! - Optimistic transactions with write-write conflict detection
//! - A retrying executor that reruns a closure when its commit conflicts
//! - Multi-version key-value tables, in memory or backed by a table log
//! - The namespace store facade and an in-memory test double
//!
//! ## Example
//!
//! ```rust
//! use nsmeta_core::{DefaultNamespaceStore, NamespaceId, NamespaceMeta, NamespaceStore, StoreConfig};
//!
//! let store = DefaultNamespaceStore::in_memory(StoreConfig::default());
//! store.create_namespace(&NamespaceMeta::builder("foo1").description("first").build())?;
//! store.create_namespace(&NamespaceMeta::new("foo2"))?;
//!
//! let removed = store.delete_namespace(&NamespaceId::new("foo2")?)?;
//! assert_eq!(removed.map(|m| m.name), Some("foo2".to_string()));
//! assert_eq!(store.list_namespaces()?.len(), 1);
//! # Ok::<(), nsmeta_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod error;
mod key;
pub mod namespace;
pub mod table;
pub mod tx;
mod types;

pub use codec::{CborCodec, Codec, JsonCodec};
pub use config::{StoreConfig, ValueFormat};
pub use error::{CoreError, CoreResult, FailureKind};
pub use key::{CompositeKey, KeyBuilder, KeySegment, KeySplitter};
pub use namespace::{
    DefaultNamespaceStore, InMemoryNamespaceStore, NamespaceConfig, NamespaceId, NamespaceMeta,
    NamespaceMetaBuilder, NamespaceMetadataStore, NamespaceStore,
};
pub use table::{
    DirTableProvider, InMemoryTableProvider, KeyValueTable, TableCache, TableProvider, TxTable,
    VersionedTable,
};
pub use tx::{
    Bound, ExponentialBackoff, Interrupt, InterruptWatch, NoRetry, PruneHorizon, RetryConfig, RetryPolicy,
    RetryingExecutor, Transaction, TransactionAware, TransactionExecutorFactory, TransactionManager,
    TransactionState, TransactionStats,
};
pub use types::TransactionId;
