//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use std::sync::Arc;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Started and not yet finished.
    Active,
    /// Committed; its writes are visible to transactions that start later.
    Committed,
    /// Aborted after its participants rolled back.
    Aborted,
    /// Aborted, but a participant failed to roll back. Its writes stay
    /// invisible to every later snapshot.
    Invalidated,
}

/// A transaction handle and its read snapshot.
///
/// The snapshot is fixed at [`crate::TransactionManager::begin`]: writes by
/// transactions that were still running (or invalid) at that point, and
/// by transactions started later, are not visible.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    read_pointer: TransactionId,
    /// Sorted ids whose writes this snapshot must skip.
    excluded: Arc<[TransactionId]>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        read_pointer: TransactionId,
        mut excluded: Vec<TransactionId>,
    ) -> Self {
        excluded.sort_unstable();
        Self {
            id,
            read_pointer,
            excluded: excluded.into(),
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction id, which is also its write pointer.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the highest writer id this snapshot may observe.
    #[must_use]
    pub fn read_pointer(&self) -> TransactionId {
        self.read_pointer
    }

    /// Returns the writer ids hidden from this snapshot.
    #[must_use]
    pub fn excluded(&self) -> &[TransactionId] {
        &self.excluded
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction can still do work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true if a version written by `writer` is part of this
    /// transaction's snapshot.
    #[must_use]
    pub fn is_visible(&self, writer: TransactionId) -> bool {
        if writer.is_base() || writer == self.id {
            return true;
        }
        writer <= self.read_pointer && self.excluded.binary_search(&writer).is_err()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = TransactionState::Aborted;
    }

    pub(crate) fn mark_invalidated(&mut self) {
        self.state = TransactionState::Invalidated;
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(CoreError::invalid_operation(format!(
                "transaction {} already committed",
                self.id
            ))),
            TransactionState::Aborted | TransactionState::Invalidated => Err(
                CoreError::invalid_operation(format!("transaction {} already aborted", self.id)),
            ),
        }
    }
}
