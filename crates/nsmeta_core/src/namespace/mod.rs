//! Namespace metadata: records, the typed table layer and the store facade.

mod mds;
mod memory;
mod meta;
mod store;

pub use mds::{NamespaceMetadataStore, NAMESPACE_TYPE};
pub use memory::InMemoryNamespaceStore;
pub use meta::{NamespaceConfig, NamespaceId, NamespaceMeta, NamespaceMetaBuilder};
pub use store::{DefaultNamespaceStore, NamespaceStore};
