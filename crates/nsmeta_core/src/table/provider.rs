//! Table providers.
//!
//! ```text
//! store_dir/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ namespaces.tbl    # Log of the "namespaces" table
//! ├─ <name>.tbl
//! └─ <name>.tbl.compact  # Rewritten log, present only during compaction
//! ```

use crate::error::{CoreError, CoreResult};
use crate::table::log::{Frame, TableLog};
use crate::table::VersionedTable;
use fs2::FileExt;
use nsmeta_storage::FileBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

const LOCK_FILE: &str = "LOCK";
const TABLE_EXTENSION: &str = "tbl";
const COMPACT_SUFFIX: &str = "compact";

/// Logs with fewer frames are never rewritten.
pub const COMPACT_MIN_FRAMES: usize = 64;

/// Source of shared tables, looked up by name.
pub trait TableProvider: Send + Sync + fmt::Debug {
    /// Returns the table called `name`, creating it on first use.
    ///
    /// Concurrent first calls for the same name create the table once and
    /// all receive that instance.
    ///
    /// # Errors
    ///
    /// Returns a validation failure for a bad name, or the failure that
    /// prevented opening the table.
    fn get_or_create(&self, name: &str) -> CoreResult<Arc<VersionedTable>>;
}

fn validate_table_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        && name != "."
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(CoreError::validation(format!("invalid table name `{name}`")))
    }
}

/// Keeps tables in memory for the lifetime of the provider.
#[derive(Debug, Default)]
pub struct InMemoryTableProvider {
    tables: Mutex<HashMap<String, Arc<VersionedTable>>>,
    creations: AtomicUsize,
}

impl InMemoryTableProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many tables were created.
    #[must_use]
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

impl TableProvider for InMemoryTableProvider {
    fn get_or_create(&self, name: &str) -> CoreResult<Arc<VersionedTable>> {
        validate_table_name(name)?;
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(VersionedTable::in_memory(name));
        tables.insert(name.to_string(), Arc::clone(&table));
        self.creations.fetch_add(1, Ordering::SeqCst);
        info!(table = name, "created in-memory table");
        Ok(table)
    }
}

/// Persists each table as a log file in a directory.
///
/// The directory holds an exclusive `LOCK` file for as long as the
/// provider lives, so a second provider on the same directory fails with
/// [`CoreError::StoreLocked`].
pub struct DirTableProvider {
    dir: PathBuf,
    _lock_file: File,
    sync_on_commit: bool,
    tables: Mutex<HashMap<String, Arc<VersionedTable>>>,
    creations: AtomicUsize,
}

impl DirTableProvider {
    /// Opens or creates the store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreLocked`] if another provider holds the
    /// lock, or an I/O error.
    pub fn open(dir: impl AsRef<Path>, sync_on_commit: bool) -> CoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            dir,
            _lock_file: lock_file,
            sync_on_commit,
            tables: Mutex::new(HashMap::new()),
            creations: AtomicUsize::new(0),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the log file path of table `name`.
    #[must_use]
    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{TABLE_EXTENSION}"))
    }

    /// Returns how many tables were opened.
    #[must_use]
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}

impl DirTableProvider {
    fn open_table(&self, name: &str, path: &Path) -> CoreResult<VersionedTable> {
        let backend = FileBackend::open(path)?;
        VersionedTable::open(name, Box::new(backend), self.sync_on_commit)
    }

    /// Replaces the log at `path` with `frame`, which holds the live rows.
    ///
    /// The new log is written beside the old one, synced, and renamed over
    /// it, so a crash leaves either the old or the new log in place.
    fn compact(&self, name: &str, path: &Path, frame: &Frame) -> CoreResult<()> {
        let temp = self
            .dir
            .join(format!("{name}.{TABLE_EXTENSION}.{COMPACT_SUFFIX}"));
        match fs::remove_file(&temp) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        {
            let mut log = TableLog::new(Box::new(FileBackend::open(&temp)?), true);
            log.append(frame)?;
        }
        fs::rename(&temp, path)?;
        sync_directory(&self.dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}

impl TableProvider for DirTableProvider {
    fn get_or_create(&self, name: &str) -> CoreResult<Arc<VersionedTable>> {
        validate_table_name(name)?;
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        let path = self.table_path(name);
        let mut table = self.open_table(name, &path)?;
        let frames = table.log_frames();
        if frames >= COMPACT_MIN_FRAMES && frames > 2 * table.key_count() {
            let frame = table.base_frame();
            drop(table);
            self.compact(name, &path, &frame)?;
            table = self.open_table(name, &path)?;
            info!(
                table = name,
                frames_before = frames,
                rows = table.key_count(),
                "compacted table log"
            );
        }

        let table = Arc::new(table);
        tables.insert(name.to_string(), Arc::clone(&table));
        self.creations.fetch_add(1, Ordering::SeqCst);
        info!(table = name, path = %path.display(), "opened table");
        Ok(table)
    }
}

impl fmt::Debug for DirTableProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirTableProvider")
            .field("dir", &self.dir)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("tables", &self.tables.lock().len())
            .finish()
    }
}
