//! # nsmeta testkit
//!
//! Test utilities for the namespace metadata store.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust
//! use nsmeta_core::{NamespaceMeta, NamespaceStore};
//! use nsmeta_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     store.create_namespace(&NamespaceMeta::new("ns")).unwrap();
//!     assert_eq!(store.list_namespaces().unwrap().len(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
