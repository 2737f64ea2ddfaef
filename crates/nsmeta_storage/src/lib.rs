//! # nsmeta storage
//!
//! Append-only byte stores that back nsmeta table logs.
//!
//! A backend knows nothing about tables, keys or transactions. It stores
//! opaque bytes at increasing offsets; the table log in `nsmeta_core` owns
//! the frame format written on top of it.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral tables and tests
//! - [`FileBackend`] - one file per table on the local file system
//!
//! ## Example
//!
//! ```rust
//! use nsmeta_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
