//! Property-based test generators using proptest.
//!
//! Provides strategies for namespace records and for sequences of store
//! operations.

use nsmeta_core::{CoreResult, NamespaceConfig, NamespaceId, NamespaceMeta, NamespaceStore};
use proptest::prelude::*;

/// Strategy for generating valid namespace names.
pub fn namespace_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_]{1,16}").expect("Invalid regex")
}

/// Strategy for names drawn from a small pool, so generated operations
/// collide often.
pub fn pooled_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alpha", "beta", "gamma", "delta", "ns_1", "ns_2"])
        .prop_map(|name| name.to_string())
}

/// Strategy for generating names that fail validation.
pub fn invalid_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        prop::string::string_regex("[a-z]{0,4}[ /.\\-:][a-z]{0,4}").expect("Invalid regex"),
    ]
}

/// Strategy for generating namespace config overrides.
pub fn namespace_config_strategy() -> impl Strategy<Value = NamespaceConfig> {
    let value = || prop::option::of("[a-z/_]{1,12}");
    (value(), value(), value(), value()).prop_map(|(queue, root, hbase, hive)| NamespaceConfig {
        scheduler_queue_name: queue,
        root_directory: root,
        hbase_namespace: hbase,
        hive_database: hive,
    })
}

/// Strategy for generating a namespace record with the given name strategy.
pub fn namespace_meta_with<S>(names: S) -> impl Strategy<Value = NamespaceMeta>
where
    S: Strategy<Value = String>,
{
    (names, ".{0,32}", namespace_config_strategy()).prop_map(|(name, description, config)| {
        NamespaceMeta::builder(name)
            .description(description)
            .config(config)
            .build()
    })
}

/// Strategy for generating valid namespace records.
pub fn namespace_meta_strategy() -> impl Strategy<Value = NamespaceMeta> {
    namespace_meta_with(namespace_name_strategy())
}

/// One call against a [`NamespaceStore`].
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// `create_namespace`.
    Create(NamespaceMeta),
    /// `update_namespace`.
    Update(NamespaceMeta),
    /// `get_namespace`.
    Get(String),
    /// `delete_namespace`.
    Delete(String),
    /// `list_namespaces`.
    List,
}

/// Observable result of a [`StoreOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// A single optional record.
    Record(Option<NamespaceMeta>),
    /// No value.
    Unit,
    /// A list of records.
    Records(Vec<NamespaceMeta>),
}

impl StoreOp {
    /// Applies the operation to `store`.
    pub fn apply(&self, store: &dyn NamespaceStore) -> CoreResult<OpOutcome> {
        Ok(match self {
            Self::Create(meta) => OpOutcome::Record(store.create_namespace(meta)?),
            Self::Update(meta) => {
                store.update_namespace(meta)?;
                OpOutcome::Unit
            }
            Self::Get(name) => {
                let id = NamespaceId::new(name.as_str())?;
                OpOutcome::Record(store.get_namespace(&id)?)
            }
            Self::Delete(name) => {
                let id = NamespaceId::new(name.as_str())?;
                OpOutcome::Record(store.delete_namespace(&id)?)
            }
            Self::List => OpOutcome::Records(store.list_namespaces()?),
        })
    }
}

/// Strategy for generating store operations over a small name pool.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    let meta = || namespace_meta_with(pooled_name_strategy());
    prop_oneof![
        3 => meta().prop_map(StoreOp::Create),
        2 => meta().prop_map(StoreOp::Update),
        2 => pooled_name_strategy().prop_map(StoreOp::Get),
        2 => pooled_name_strategy().prop_map(StoreOp::Delete),
        1 => Just(StoreOp::List),
    ]
}

/// Strategy for generating a sequence of store operations.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::test_runner::TestRunner;
    use proptest::strategy::ValueTree;

    #[test]
    fn generated_names_are_valid() {
        let mut runner = TestRunner::default();
        for _ in 0..100 {
            let name = namespace_name_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(NamespaceId::new(name).is_ok());
        }
    }

    #[test]
    fn generated_invalid_names_are_rejected() {
        let mut runner = TestRunner::default();
        for _ in 0..100 {
            let name = invalid_name_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(NamespaceId::new(name).is_err());
        }
    }

    #[test]
    fn generated_records_have_valid_ids() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let meta = namespace_meta_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(meta.id().is_ok());
        }
    }
}
