//! Optimistic-concurrency transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::tx::state::Transaction;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Opaque identifier of one changed row, as reported by a participant.
pub type ChangeId = Vec<u8>;

/// Counters describing what the manager has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Transactions started.
    pub started: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions aborted, including invalidated ones.
    pub aborted: u64,
    /// Commit attempts rejected because of a write-write conflict.
    pub conflicts: u64,
    /// Transactions invalidated after a failed rollback.
    pub invalidated: u64,
}

/// Which versions a table may discard, as of one moment.
///
/// A writer is settled when every running and future transaction sees its
/// versions: it committed before the oldest running transaction began.
/// Versions of invalidated writers are dead and visible to nobody.
/// Writers that started after the horizon was taken are neither.
#[derive(Debug, Clone)]
pub struct PruneHorizon {
    bound: TransactionId,
    unsettled: HashSet<TransactionId>,
    invalid: HashSet<TransactionId>,
}

impl PruneHorizon {
    /// Checks if every current and future snapshot sees `writer`.
    #[must_use]
    pub fn is_settled(&self, writer: TransactionId) -> bool {
        writer == TransactionId::BASE
            || (writer < self.bound
                && !self.unsettled.contains(&writer)
                && !self.invalid.contains(&writer))
    }

    /// Checks if `writer` was invalidated, so no snapshot sees it.
    #[must_use]
    pub fn is_dead(&self, writer: TransactionId) -> bool {
        self.invalid.contains(&writer)
    }
}

/// Coordinates transactions without holding locks on data.
///
/// Writers never block each other. Each participant buffers its writes
/// and reports the rows it changed. [`TransactionManager::can_commit`]
/// rejects the transaction if any of those rows was changed by a
/// transaction that committed after this one began, or is reserved by a
/// transaction that passed `can_commit` and has not finished. Passing
/// `can_commit` is the commit decision: the change set stays reserved
/// until `commit`, `abort` or `invalidate`, so participants may persist
/// their writes before `commit` without racing a rival. The loser is
/// rolled back before it writes anything and its caller decides whether
/// to retry.
///
/// Ids and commit pointers come from one counter under a single mutex, so
/// "committed after `tx` began" means "commit pointer greater than
/// `tx.id()`".
pub struct TransactionManager {
    state: Mutex<ManagerState>,
}

#[derive(Debug)]
struct ManagerState {
    next_pointer: u64,
    in_progress: BTreeSet<TransactionId>,
    invalid: BTreeSet<TransactionId>,
    /// Change sets reported by `can_commit`, waiting for `commit`.
    committing: HashMap<TransactionId, HashSet<ChangeId>>,
    /// Change sets of committed transactions keyed by commit pointer.
    committed: BTreeMap<u64, HashSet<ChangeId>>,
    /// Commit pointers of writers not yet visible to every running
    /// transaction.
    recent: BTreeMap<TransactionId, u64>,
    stats: TransactionStats,
}

impl ManagerState {
    fn allocate(&mut self) -> u64 {
        let pointer = self.next_pointer;
        self.next_pointer += 1;
        pointer
    }

    /// Counts overlaps with transactions committed since `tx` began and
    /// with change sets reserved by other transactions.
    fn conflicts(&self, tx: &Transaction, changes: &HashSet<ChangeId>) -> usize {
        if changes.is_empty() {
            return 0;
        }
        let committed: usize = self
            .committed
            .range(tx.id().as_u64() + 1..)
            .map(|(_, committed)| committed.intersection(changes).count())
            .sum();
        let reserved: usize = self
            .committing
            .iter()
            .filter(|(id, _)| **id != tx.id())
            .map(|(_, reserved)| reserved.intersection(changes).count())
            .sum();
        committed + reserved
    }

    fn ensure_in_progress(&self, tx: &Transaction) -> CoreResult<()> {
        tx.ensure_active()?;
        if self.in_progress.contains(&tx.id()) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "transaction {} is not in progress",
                tx.id()
            )))
        }
    }

    fn finish(&mut self, id: TransactionId) {
        self.in_progress.remove(&id);
        self.committing.remove(&id);
        self.prune();
    }

    /// Drops change sets that no running transaction can conflict with,
    /// and forgets writers that every running transaction sees.
    fn prune(&mut self) {
        match self.in_progress.first() {
            Some(oldest) => {
                let oldest = oldest.as_u64();
                let keep = self.committed.split_off(&oldest);
                self.committed = keep;
                self.recent.retain(|_, pointer| *pointer >= oldest);
            }
            None => {
                self.committed.clear();
                self.recent.clear();
            }
        }
    }
}

impl TransactionManager {
    /// Creates a manager with no history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                next_pointer: 1,
                in_progress: BTreeSet::new(),
                invalid: BTreeSet::new(),
                committing: HashMap::new(),
                committed: BTreeMap::new(),
                recent: BTreeMap::new(),
                stats: TransactionStats::default(),
            }),
        }
    }

    /// Starts a transaction and fixes its snapshot.
    pub fn begin(&self) -> Transaction {
        let mut state = self.state.lock();
        let id = TransactionId::new(state.allocate());
        let excluded = state
            .in_progress
            .iter()
            .chain(state.invalid.iter())
            .copied()
            .collect();
        state.in_progress.insert(id);
        state.stats.started += 1;

        Transaction::new(id, TransactionId::new(id.as_u64() - 1), excluded)
    }

    /// Checks `changes` for conflicts and reserves them for `tx`.
    ///
    /// Once this returns `Ok`, no other transaction can pass `can_commit`
    /// with an overlapping change set until `tx` finishes, and
    /// [`TransactionManager::commit`] cannot fail with a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Conflict`] on overlap, or
    /// [`CoreError::InvalidOperation`] if `tx` is not running.
    pub fn can_commit(&self, tx: &Transaction, changes: HashSet<ChangeId>) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.ensure_in_progress(tx)?;

        let conflicts = state.conflicts(tx, &changes);
        if conflicts > 0 {
            state.stats.conflicts += 1;
            debug!(txid = %tx.id(), conflicts, "conflict detected before commit");
            return Err(CoreError::Conflict {
                txid: tx.id(),
                conflicts,
            });
        }

        state.committing.insert(tx.id(), changes);
        Ok(())
    }

    /// Commits `tx`, publishing the change set reserved by
    /// [`TransactionManager::can_commit`], and returns the commit pointer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `tx` is not running.
    pub fn commit(&self, tx: &mut Transaction) -> CoreResult<TransactionId> {
        let mut state = self.state.lock();
        state.ensure_in_progress(tx)?;

        let changes = state.committing.remove(&tx.id()).unwrap_or_default();
        let pointer = state.allocate();
        if !changes.is_empty() {
            state.committed.insert(pointer, changes);
        }
        state.recent.insert(tx.id(), pointer);
        state.stats.committed += 1;
        state.finish(tx.id());
        tx.mark_committed();

        Ok(TransactionId::new(pointer))
    }

    /// Aborts `tx` after its participants rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `tx` already finished.
    pub fn abort(&self, tx: &mut Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        tx.ensure_active()?;
        state.stats.aborted += 1;
        state.finish(tx.id());
        tx.mark_aborted();
        Ok(())
    }

    /// Aborts `tx` and hides its writes from every later snapshot.
    ///
    /// Used when a participant could not roll back, so versions written by
    /// `tx` may still be present in a table.
    pub fn invalidate(&self, tx: &mut Transaction) {
        let mut state = self.state.lock();
        state.invalid.insert(tx.id());
        state.stats.aborted += 1;
        state.stats.invalidated += 1;
        state.finish(tx.id());
        tx.mark_invalidated();
    }

    /// Forgets invalidated transactions.
    ///
    /// Call once no table holds versions written by `ids` any more, for
    /// example after a [`PruneHorizon`] pass dropped them. Returns how
    /// many ids were removed.
    pub fn truncate_invalid(&self, ids: &[TransactionId]) -> usize {
        let mut state = self.state.lock();
        let before = state.invalid.len();
        for id in ids {
            state.invalid.remove(id);
        }
        let removed = before - state.invalid.len();
        if removed > 0 {
            debug!(removed, remaining = state.invalid.len(), "truncated invalid list");
        }
        removed
    }

    /// Returns the invalidated transaction ids.
    #[must_use]
    pub fn invalid_ids(&self) -> Vec<TransactionId> {
        self.state.lock().invalid.iter().copied().collect()
    }

    /// Captures which writers are settled right now.
    #[must_use]
    pub fn prune_horizon(&self) -> PruneHorizon {
        let state = self.state.lock();
        PruneHorizon {
            bound: TransactionId::new(state.next_pointer),
            unsettled: state
                .in_progress
                .iter()
                .chain(state.recent.keys())
                .copied()
                .collect(),
            invalid: state.invalid.iter().copied().collect(),
        }
    }

    /// Returns the number of running transactions.
    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        self.state.lock().in_progress.len()
    }

    /// Returns the number of invalidated transactions.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.state.lock().invalid.len()
    }

    /// Returns the number of committed change sets still retained for
    /// conflict detection.
    #[must_use]
    pub fn retained_change_sets(&self) -> usize {
        self.state.lock().committed.len()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> TransactionStats {
        self.state.lock().stats
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionManager")
            .field("next_pointer", &state.next_pointer)
            .field("in_progress", &state.in_progress.len())
            .field("invalid", &state.invalid.len())
            .field("recent", &state.recent.len())
            .finish_non_exhaustive()
    }
}
