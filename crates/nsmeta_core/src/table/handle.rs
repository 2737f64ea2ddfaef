//! Per-attempt transactional handle over a shared table.

use crate::error::{CoreError, CoreResult};
use crate::key::CompositeKey;
use crate::table::{change_id, KeyValueTable, VersionedTable};
use crate::tx::{PruneHorizon, Transaction, TransactionAware};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Transaction-aware view of a [`VersionedTable`].
///
/// Writes and deletes are buffered until [`TransactionAware::commit_tx`];
/// reads see the buffer laid over the transaction's snapshot. A handle
/// serves one transaction at a time and is normally created fresh for each
/// attempt.
pub struct TxTable {
    table: Arc<VersionedTable>,
    state: Mutex<HandleState>,
}

#[derive(Default)]
struct HandleState {
    tx: Option<Transaction>,
    /// `None` values are pending deletes.
    buffer: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    installed: bool,
    persisted: bool,
}

impl HandleState {
    fn active(&self) -> CoreResult<&Transaction> {
        self.tx
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("no transaction in progress"))
    }

    fn pending_under<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Option<Vec<u8>>)> + 'a {
        self.buffer
            .range(prefix.to_vec()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
    }
}

impl TxTable {
    /// Wraps `table`.
    pub fn new(table: Arc<VersionedTable>) -> Self {
        Self {
            table,
            state: Mutex::new(HandleState::default()),
        }
    }

    /// Returns the underlying table.
    #[must_use]
    pub fn table(&self) -> &Arc<VersionedTable> {
        &self.table
    }

    /// Returns the number of buffered writes and deletes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

impl KeyValueTable for TxTable {
    fn write(&self, key: &CompositeKey, value: &[u8]) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.active()?;
        state
            .buffer
            .insert(key.as_bytes().to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn read_first(&self, key: &CompositeKey) -> CoreResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        let tx = state.active()?;
        if let Some(pending) = state.buffer.get(key.as_bytes()) {
            return Ok(pending.clone());
        }
        Ok(self.table.get(tx, key.as_bytes()))
    }

    fn scan(&self, prefix: &CompositeKey) -> CoreResult<Vec<(CompositeKey, Vec<u8>)>> {
        let state = self.state.lock();
        let tx = state.active()?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.table.scan(tx, prefix.as_bytes()).into_iter().collect();
        for (key, pending) in state.pending_under(prefix.as_bytes()) {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(key, value)| (CompositeKey::from_bytes(key), value))
            .collect())
    }

    fn delete_all(&self, prefix: &CompositeKey) -> CoreResult<()> {
        let mut state = self.state.lock();
        let tx = state.active()?;
        let mut doomed: Vec<Vec<u8>> = self
            .table
            .scan(tx, prefix.as_bytes())
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        doomed.extend(state.pending_under(prefix.as_bytes()).map(|(k, _)| k.clone()));
        for key in doomed {
            state.buffer.insert(key, None);
        }
        Ok(())
    }
}

impl TransactionAware for TxTable {
    fn participant_name(&self) -> &str {
        self.table.name()
    }

    fn start_tx(&self, tx: &Transaction) -> CoreResult<()> {
        let mut state = self.state.lock();
        if let Some(current) = &state.tx {
            return Err(CoreError::invalid_operation(format!(
                "table `{}` already attached to {}",
                self.table.name(),
                current.id()
            )));
        }
        *state = HandleState {
            tx: Some(tx.clone()),
            ..HandleState::default()
        };
        Ok(())
    }

    fn tx_changes(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        state
            .buffer
            .keys()
            .map(|key| change_id(self.table.name(), key))
            .collect()
    }

    fn commit_tx(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let txid = state.active()?.id();
        let writes: Vec<_> = state
            .buffer
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let installed = !writes.is_empty();
        state.persisted = self.table.install(txid, writes)?;
        state.installed = installed;
        Ok(())
    }

    fn post_tx_commit(&self) {
        *self.state.lock() = HandleState::default();
    }

    fn rollback_tx(&self) -> CoreResult<()> {
        let finished = std::mem::take(&mut *self.state.lock());
        if let Some(tx) = finished.tx.filter(|_| finished.installed) {
            self.table.revert(tx.id(), finished.persisted);
        }
        Ok(())
    }

    fn reclaim(&self, horizon: &PruneHorizon) {
        self.table.prune(horizon);
    }
}

impl fmt::Debug for TxTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TxTable")
            .field("table", &self.table.name())
            .field("tx", &state.tx.as_ref().map(Transaction::id))
            .field("pending", &state.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TransactionManager;
    use nsmeta_storage::InMemoryBackend;
    use std::collections::HashSet;

    fn key(name: &str) -> CompositeKey {
        CompositeKey::builder().add_str("ns").add_str(name).build()
    }

    fn run<R>(
        tm: &TransactionManager,
        table: &Arc<VersionedTable>,
        body: impl FnOnce(&TxTable) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let handle = TxTable::new(Arc::clone(table));
        let mut tx = tm.begin();
        handle.start_tx(&tx)?;
        let out = body(&handle)?;
        let changes: HashSet<_> = handle.tx_changes().into_iter().collect();
        tm.can_commit(&tx, changes)?;
        handle.commit_tx()?;
        tm.commit(&mut tx)?;
        handle.post_tx_commit();
        Ok(out)
    }

    #[test]
    fn operations_require_a_transaction() {
        let handle = TxTable::new(Arc::new(VersionedTable::in_memory("t")));
        let err = handle.write(&key("a"), b"1").unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(handle.read_first(&key("a")).is_err());
        assert!(handle.scan(&key("a")).is_err());
        assert!(handle.delete_all(&key("a")).is_err());
    }

    #[test]
    fn reads_overlay_buffer_on_snapshot() {
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::in_memory("t"));
        run(&tm, &table, |h| {
            h.write(&key("a"), b"1")?;
            h.write(&key("b"), b"2")
        })
        .unwrap();

        run(&tm, &table, |h| {
            h.write(&key("c"), b"3")?;
            h.delete_all(&key("a"))?;
            assert_eq!(h.read_first(&key("a"))?, None);
            assert_eq!(h.read_first(&key("c"))?, Some(b"3".to_vec()));
            let names: Vec<_> = h
                .scan(&CompositeKey::prefix_for("ns"))?
                .into_iter()
                .map(|(_, v)| v)
                .collect();
            assert_eq!(names, vec![b"2".to_vec(), b"3".to_vec()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_all_covers_prefix() {
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::in_memory("t"));
        run(&tm, &table, |h| {
            h.write(&key("a"), b"1")?;
            h.write(&key("b"), b"2")
        })
        .unwrap();
        run(&tm, &table, |h| h.delete_all(&CompositeKey::prefix_for("ns"))).unwrap();

        let remaining = run(&tm, &table, |h| h.scan(&CompositeKey::prefix_for("ns"))).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn buffered_writes_invisible_to_others_until_commit() {
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::in_memory("t"));
        let writer = TxTable::new(Arc::clone(&table));
        let tx = tm.begin();
        writer.start_tx(&tx).unwrap();
        writer.write(&key("a"), b"1").unwrap();

        let seen = run(&tm, &table, |h| h.read_first(&key("a"))).unwrap();
        assert_eq!(seen, None);
        assert_eq!(writer.pending(), 1);
    }

    #[test]
    fn rollback_reverts_installed_writes() {
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::in_memory("t"));
        let handle = TxTable::new(Arc::clone(&table));
        let mut tx = tm.begin();
        handle.start_tx(&tx).unwrap();
        handle.write(&key("a"), b"1").unwrap();
        handle.commit_tx().unwrap();
        assert_eq!(table.key_count(), 1);

        handle.rollback_tx().unwrap();
        tm.abort(&mut tx).unwrap();
        assert_eq!(table.key_count(), 0);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn change_ids_are_scoped_by_table() {
        let tm = TransactionManager::new();
        let handle = TxTable::new(Arc::new(VersionedTable::in_memory("t")));
        let tx = tm.begin();
        handle.start_tx(&tx).unwrap();
        handle.write(&key("a"), b"1").unwrap();
        let changes = handle.tx_changes();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].starts_with(b"t\0"));
        assert!(handle.start_tx(&tx).is_err());
    }

    #[test]
    fn rejected_writer_persists_nothing() {
        let backend = InMemoryBackend::new();
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::open("t", Box::new(backend.clone()), true).unwrap());

        let winner = TxTable::new(Arc::clone(&table));
        let loser = TxTable::new(Arc::clone(&table));
        let mut winner_tx = tm.begin();
        let loser_tx = tm.begin();
        winner.start_tx(&winner_tx).unwrap();
        loser.start_tx(&loser_tx).unwrap();
        winner.write(&key("a"), b"winner").unwrap();
        loser.write(&key("a"), b"loser").unwrap();

        tm.can_commit(&winner_tx, winner.tx_changes().into_iter().collect())
            .unwrap();
        let err = tm
            .can_commit(&loser_tx, loser.tx_changes().into_iter().collect())
            .unwrap_err();
        assert!(err.is_conflict());

        winner.commit_tx().unwrap();
        tm.commit(&mut winner_tx).unwrap();

        // Stop without rolling the loser back, as a crash would.
        drop((winner, loser, table));

        let reopened = VersionedTable::open("t", Box::new(backend), true).unwrap();
        let reader = TransactionManager::new().begin();
        assert_eq!(
            reopened.get(&reader, key("a").as_bytes()),
            Some(b"winner".to_vec())
        );
        assert_eq!(reopened.log_frames(), 1);
    }

    #[test]
    fn reclaim_prunes_superseded_versions() {
        let tm = TransactionManager::new();
        let table = Arc::new(VersionedTable::in_memory("t"));
        for i in 0..50 {
            let handle = TxTable::new(Arc::clone(&table));
            let mut tx = tm.begin();
            handle.start_tx(&tx).unwrap();
            handle.write(&key("a"), format!("{i}").as_bytes()).unwrap();
            tm.can_commit(&tx, handle.tx_changes().into_iter().collect())
                .unwrap();
            handle.commit_tx().unwrap();
            tm.commit(&mut tx).unwrap();
            handle.post_tx_commit();
            handle.reclaim(&tm.prune_horizon());
        }
        assert_eq!(table.version_count(), 1);
    }
}
