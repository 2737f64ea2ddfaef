//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Table logs are written as a sequence of frames through this trait and
/// replayed from offset zero when a table is opened.
///
/// # Invariants
///
/// - `append` returns the offset where the data starts
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `flush` returns, appended data survives process termination
/// - implementors are `Send + Sync` so a table can be shared across threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending appends to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes, which is the next append offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store back to `new_size` bytes.
    ///
    /// Used to drop a torn frame left at the tail by an interrupted append.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Corrupted(format!("store of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }
}
