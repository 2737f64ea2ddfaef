//! Store configuration.

use crate::codec::{CborCodec, Codec, JsonCodec};
use crate::tx::RetryConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Byte format of stored records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueFormat {
    /// JSON text.
    #[default]
    Json,
    /// CBOR.
    Cbor,
}

impl ValueFormat {
    /// Returns the codec for this format.
    #[must_use]
    pub fn codec<T>(self) -> Arc<dyn Codec<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Cbor => Arc::new(CborCodec),
        }
    }
}

/// Configuration for a namespace store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name of the table holding namespace records.
    pub table_name: String,

    /// Retry policy for conflicting transactions.
    pub retry: RetryConfig,

    /// How long a looked-up table is reused before it is fetched again.
    pub table_cache_ttl: Duration,

    /// Whether to flush the table log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Byte format of stored records.
    pub value_format: ValueFormat,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_name: "namespaces".to_string(),
            retry: RetryConfig::default(),
            table_cache_ttl: Duration::from_secs(5 * 60),
            sync_on_commit: true,
            value_format: ValueFormat::Json,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table name.
    #[must_use]
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how long the table lookup is cached.
    #[must_use]
    pub fn table_cache_ttl(mut self, ttl: Duration) -> Self {
        self.table_cache_ttl = ttl;
        self
    }

    /// Sets whether to flush the table log on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the record format.
    #[must_use]
    pub fn value_format(mut self, format: ValueFormat) -> Self {
        self.value_format = format;
        self
    }
}
