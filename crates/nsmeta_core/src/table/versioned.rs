//! Shared multi-version table.

use crate::error::CoreResult;
use crate::table::log::{Frame, RowWrite, TableLog};
use crate::tx::{PruneHorizon, Transaction};
use crate::types::TransactionId;
use nsmeta_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound::{Included, Unbounded};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct RowVersion {
    writer: TransactionId,
    /// `None` marks a delete.
    value: Option<Vec<u8>>,
}

#[derive(Default)]
struct Rows {
    map: BTreeMap<Vec<u8>, Vec<RowVersion>>,
    /// Keys that may hold versions a prune pass can drop.
    dirty: BTreeSet<Vec<u8>>,
}

struct LogWriter {
    log: TableLog,
    /// Rollback frames that could not be written yet, oldest first.
    unwritten_rollbacks: Vec<TransactionId>,
}

impl LogWriter {
    fn write_rollbacks(&mut self) -> CoreResult<()> {
        while let Some(&txid) = self.unwritten_rollbacks.first() {
            self.log.append(&Frame::Rollback { txid })?;
            self.unwritten_rollbacks.remove(0);
        }
        Ok(())
    }

    /// Appends `frame` after any pending rollback frames.
    fn append(&mut self, frame: &Frame) -> CoreResult<()> {
        self.write_rollbacks()?;
        self.log.append(frame)?;
        Ok(())
    }
}

/// A table holding the versions of every row that some snapshot may
/// still read.
///
/// Versions are appended in install order and tagged with the writing
/// transaction. A read returns the newest version visible to the reader's
/// snapshot; versions of transactions that were still running when the
/// reader began are skipped, which gives each transaction a stable view.
/// [`VersionedTable::prune`] drops versions hidden behind a newer one
/// that every snapshot sees.
///
/// A persistent table appends one commit frame per installing transaction
/// to its [`TableLog`] before the versions become readable, and a
/// rollback frame if those versions are later reverted.
pub struct VersionedTable {
    name: String,
    rows: RwLock<Rows>,
    log: Option<Mutex<LogWriter>>,
}

impl VersionedTable {
    /// Creates an empty table that lives only in memory.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(Rows::default()),
            log: None,
        }
    }

    /// Opens a table persisted in `backend`, replaying its log.
    ///
    /// Replayed rows become base versions visible to every transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LogCorruption`] if the log is damaged
    /// before its last frame, or storage failures.
    pub fn open(
        name: impl Into<String>,
        backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        let name = name.into();
        let mut log = TableLog::new(backend, sync_on_commit);
        let commits = log.replay()?;

        let mut map = BTreeMap::new();
        for writes in commits {
            for (key, value) in writes {
                match value {
                    Some(value) => {
                        map.insert(
                            key,
                            vec![RowVersion {
                                writer: TransactionId::BASE,
                                value: Some(value),
                            }],
                        );
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
        }
        debug!(
            table = %name,
            frames = log.frame_count(),
            rows = map.len(),
            "table log replayed"
        );

        Ok(Self {
            name,
            rows: RwLock::new(Rows {
                map,
                dirty: BTreeSet::new(),
            }),
            log: Some(Mutex::new(LogWriter {
                log,
                unwritten_rollbacks: Vec::new(),
            })),
        })
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks if the table writes a log.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.log.is_some()
    }

    /// Returns the value at `key` as seen by `tx`.
    #[must_use]
    pub fn get(&self, tx: &Transaction, key: &[u8]) -> Option<Vec<u8>> {
        let rows = self.rows.read();
        rows.map
            .get(key)
            .and_then(|versions| visible(tx, versions))
            .cloned()
    }

    /// Returns the live entries under `prefix` as seen by `tx`, in key
    /// order.
    #[must_use]
    pub fn scan(&self, tx: &Transaction, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let rows = self.rows.read();
        rows.map
            .range::<[u8], _>((Included(prefix), Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, versions)| visible(tx, versions).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    /// Returns the number of keys with at least one version.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.rows.read().map.len()
    }

    /// Returns the number of versions held across all keys.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.rows.read().map.values().map(Vec::len).sum()
    }

    /// Returns the number of frames in the log, or zero for an in-memory
    /// table.
    #[must_use]
    pub fn log_frames(&self) -> usize {
        self.log
            .as_ref()
            .map_or(0, |writer| writer.lock().log.frame_count())
    }

    /// Returns the number of reverted transactions whose rollback frame is
    /// not in the log yet.
    #[must_use]
    pub fn unwritten_rollbacks(&self) -> usize {
        self.log
            .as_ref()
            .map_or(0, |writer| writer.lock().unwritten_rollbacks.len())
    }

    /// Returns one commit frame holding the newest settled value of every
    /// row, tagged [`TransactionId::BASE`].
    ///
    /// Replaying this frame alone rebuilds a table opened from a full log.
    pub(crate) fn base_frame(&self) -> Frame {
        let rows = self.rows.read();
        let writes = rows
            .map
            .iter()
            .filter_map(|(key, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|v| v.writer.is_base())
                    .and_then(|v| v.value.clone())
                    .map(|value| (key.clone(), Some(value)))
            })
            .collect();
        Frame::Commit {
            txid: TransactionId::BASE,
            writes,
        }
    }

    /// Logs and installs the writes of `txid`.
    ///
    /// Returns true if a commit frame was written.
    pub(crate) fn install(&self, txid: TransactionId, writes: Vec<RowWrite>) -> CoreResult<bool> {
        if writes.is_empty() {
            return Ok(false);
        }

        let persisted = match &self.log {
            Some(writer) => {
                writer.lock().append(&Frame::Commit {
                    txid,
                    writes: writes.clone(),
                })?;
                true
            }
            None => false,
        };

        let mut rows = self.rows.write();
        for (key, value) in writes {
            rows.dirty.insert(key.clone());
            rows.map.entry(key).or_default().push(RowVersion {
                writer: txid,
                value,
            });
        }
        Ok(persisted)
    }

    /// Removes every version written by `txid`.
    ///
    /// If the writes were logged, a rollback frame cancels them in the log.
    /// When that frame cannot be written it is kept and written ahead of
    /// the next frame this table appends; the versions are gone from
    /// memory either way.
    pub(crate) fn revert(&self, txid: TransactionId, persisted: bool) {
        {
            let mut rows = self.rows.write();
            rows.map.retain(|_, versions| {
                versions.retain(|v| v.writer != txid);
                !versions.is_empty()
            });
        }

        if persisted {
            if let Some(writer) = &self.log {
                let mut writer = writer.lock();
                writer.unwritten_rollbacks.push(txid);
                if let Err(e) = writer.write_rollbacks() {
                    warn!(
                        table = %self.name,
                        %txid,
                        pending = writer.unwritten_rollbacks.len(),
                        error = %e,
                        "rollback frame not written, will retry on next append"
                    );
                }
            }
        }
        debug!(table = %self.name, %txid, "reverted installed writes");
    }

    /// Drops versions that no snapshot can read any more.
    ///
    /// For each key touched since the last pass, versions older than the
    /// newest settled one are dropped, as are versions of invalidated
    /// writers. A key whose only remaining version is a settled delete is
    /// removed. Returns the number of versions dropped.
    pub fn prune(&self, horizon: &PruneHorizon) -> usize {
        let mut rows = self.rows.write();
        let Rows { map, dirty } = &mut *rows;
        let mut dropped = 0;

        dirty.retain(|key| {
            let Some(versions) = map.get_mut(key) else {
                return false;
            };
            let before = versions.len();
            let still_dirty = prune_versions(versions, horizon);
            dropped += before - versions.len();
            if versions.is_empty() {
                map.remove(key);
            }
            still_dirty
        });

        if dropped > 0 {
            debug!(table = %self.name, dropped, pending = dirty.len(), "pruned versions");
        }
        dropped
    }
}

/// Prunes one key's versions. Returns true while some version is not
/// settled.
fn prune_versions(versions: &mut Vec<RowVersion>, horizon: &PruneHorizon) -> bool {
    versions.retain(|v| !horizon.is_dead(v.writer));

    if let Some(newest) = versions.iter().rposition(|v| horizon.is_settled(v.writer)) {
        let mut index = 0;
        versions.retain(|v| {
            let keep = index >= newest || !horizon.is_settled(v.writer);
            index += 1;
            keep
        });
    }

    if versions
        .first()
        .is_some_and(|v| v.value.is_none() && horizon.is_settled(v.writer))
    {
        versions.remove(0);
    }

    match versions.as_slice() {
        [] => false,
        [only] => !horizon.is_settled(only.writer),
        _ => true,
    }
}

fn visible<'a>(tx: &Transaction, versions: &'a [RowVersion]) -> Option<&'a Vec<u8>> {
    versions
        .iter()
        .rev()
        .find(|v| tx.is_visible(v.writer))
        .and_then(|v| v.value.as_ref())
}

impl fmt::Debug for VersionedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedTable")
            .field("name", &self.name)
            .field("keys", &self.key_count())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}
