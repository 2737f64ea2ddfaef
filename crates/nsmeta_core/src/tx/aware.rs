//! Participant contract for resources enlisted in a transaction.

use crate::error::CoreResult;
use crate::tx::manager::PruneHorizon;
use crate::tx::state::Transaction;

/// A resource whose writes commit or roll back with a transaction.
///
/// The executor drives every participant through the same sequence:
///
/// 1. [`start_tx`](TransactionAware::start_tx) once the transaction begins
/// 2. the transaction body runs, buffering writes in the participant
/// 3. [`tx_changes`](TransactionAware::tx_changes) for conflict detection
/// 4. [`commit_tx`](TransactionAware::commit_tx) to persist and install,
///    only after the manager reserved the change set
/// 5. [`post_tx_commit`](TransactionAware::post_tx_commit) after the
///    manager accepted the commit
///
/// On any failure after step 1 [`rollback_tx`](TransactionAware::rollback_tx)
/// is called instead of the remaining steps. Once the transaction is
/// finished either way, [`reclaim`](TransactionAware::reclaim) lets the
/// participant drop versions no snapshot needs.
pub trait TransactionAware: Send + Sync {
    /// Name used in log messages.
    fn participant_name(&self) -> &str;

    /// Attaches the participant to `tx`.
    ///
    /// # Errors
    ///
    /// Fails if the participant is already attached to a transaction.
    fn start_tx(&self, tx: &Transaction) -> CoreResult<()>;

    /// Returns ids of the rows changed so far.
    fn tx_changes(&self) -> Vec<Vec<u8>>;

    /// Persists and installs buffered writes.
    ///
    /// # Errors
    ///
    /// Returns the storage failure; the caller rolls back.
    fn commit_tx(&self) -> CoreResult<()>;

    /// Called after the transaction committed.
    fn post_tx_commit(&self);

    /// Discards buffered writes and undoes any installed by `commit_tx`.
    ///
    /// # Errors
    ///
    /// A failure here means writes may remain installed; the transaction
    /// is then invalidated.
    fn rollback_tx(&self) -> CoreResult<()>;

    /// Drops state made obsolete by `horizon`. Does nothing by default.
    fn reclaim(&self, horizon: &PruneHorizon) {
        let _ = horizon;
    }
}
