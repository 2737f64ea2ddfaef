//! Namespace records.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated namespace identifier.
///
/// Non-empty, ASCII letters, digits and underscore only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Validates and wraps `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if `name` is empty or contains a
    /// character outside `[A-Za-z0-9_]`.
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::validation("namespace name must not be empty"));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(CoreError::validation(format!(
                "namespace name `{name}` contains invalid character {bad:?}"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NamespaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for NamespaceId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::new(value)
    }
}

/// Per-namespace overrides. Absent fields fall back to platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceConfig {
    /// Scheduler queue for programs in the namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_queue_name: Option<String>,
    /// Filesystem root for the namespace's data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_directory: Option<String>,
    /// Backing HBase namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hbase_namespace: Option<String>,
    /// Backing Hive database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hive_database: Option<String>,
}

impl NamespaceConfig {
    /// Checks if no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Metadata describing a namespace.
///
/// `name` is the identity: two records with the same name describe the
/// same namespace. Updates replace the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMeta {
    /// Unique name, fixed at creation.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Overrides.
    #[serde(default)]
    pub config: NamespaceConfig,
}

impl NamespaceMeta {
    /// Creates a record with an empty description and no overrides.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            config: NamespaceConfig::default(),
        }
    }

    /// Starts building a record.
    pub fn builder(name: impl Into<String>) -> NamespaceMetaBuilder {
        NamespaceMetaBuilder {
            meta: Self::new(name),
        }
    }

    /// Returns the validated id of this record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the name is not a valid id.
    pub fn id(&self) -> CoreResult<NamespaceId> {
        NamespaceId::new(self.name.as_str())
    }
}

/// Builder for [`NamespaceMeta`].
#[derive(Debug, Clone)]
pub struct NamespaceMetaBuilder {
    meta: NamespaceMeta,
}

impl NamespaceMetaBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.meta.description = description.into();
        self
    }

    /// Sets the scheduler queue override.
    #[must_use]
    pub fn scheduler_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.meta.config.scheduler_queue_name = Some(queue.into());
        self
    }

    /// Sets the root directory override.
    #[must_use]
    pub fn root_directory(mut self, dir: impl Into<String>) -> Self {
        self.meta.config.root_directory = Some(dir.into());
        self
    }

    /// Sets the HBase namespace override.
    #[must_use]
    pub fn hbase_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.meta.config.hbase_namespace = Some(namespace.into());
        self
    }

    /// Sets the Hive database override.
    #[must_use]
    pub fn hive_database(mut self, database: impl Into<String>) -> Self {
        self.meta.config.hive_database = Some(database.into());
        self
    }

    /// Replaces the whole config.
    #[must_use]
    pub fn config(mut self, config: NamespaceConfig) -> Self {
        self.meta.config = config;
        self
    }

    /// Finishes the record.
    #[must_use]
    pub fn build(self) -> NamespaceMeta {
        self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for name in ["default", "foo1", "my_ns", "A"] {
            assert_eq!(NamespaceId::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn invalid_ids() {
        for name in ["", "foo-bar", "a b", "ns/1", "naïve"] {
            let err = NamespaceId::new(name).unwrap_err();
            assert!(matches!(err, CoreError::Validation { .. }), "{name}");
        }
    }

    #[test]
    fn builder_sets_fields() {
        let meta = NamespaceMeta::builder("foo")
            .description("test namespace")
            .scheduler_queue_name("q1")
            .hive_database("foo_db")
            .build();
        assert_eq!(meta.name, "foo");
        assert_eq!(meta.description, "test namespace");
        assert_eq!(meta.config.scheduler_queue_name.as_deref(), Some("q1"));
        assert_eq!(meta.config.hive_database.as_deref(), Some("foo_db"));
        assert!(meta.config.root_directory.is_none());
        assert!(!meta.config.is_empty());
    }

    #[test]
    fn json_form_uses_camel_case_and_omits_absent_overrides() {
        let meta = NamespaceMeta::builder("foo")
            .scheduler_queue_name("q1")
            .build();
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "foo",
                "description": "",
                "config": { "schedulerQueueName": "q1" }
            })
        );
    }

    #[test]
    fn missing_optional_fields_decode_to_defaults() {
        let meta: NamespaceMeta = serde_json::from_str(r#"{"name":"bar"}"#).unwrap();
        assert_eq!(meta, NamespaceMeta::new("bar"));
    }
}
