//! Journaled, size-bounded LRU store on the filesystem.
//!
//! Each entry has a fixed number of value slots stored as `<name>.<index>`
//! files, where `<name>` is the SHA-256 of the caller's key. Every state
//! change is appended to a journal (see [`journal`]) before or after the
//! corresponding file operation, so a crash at any point leaves a journal that
//! replays to a consistent index:
//!
//! - an edit writes `<name>.<index>.tmp` files and is preceded by a DIRTY
//!   record; a DIRTY without a matching CLEAN/REMOVE on replay means the edit
//!   never finished and its files are deleted
//! - a commit renames the dirty files over the clean ones and then appends a
//!   CLEAN record carrying the expiry timestamp and value lengths
//!
//! Bookkeeping is serialized by one internal mutex; value I/O through an
//! [`Editor`] or [`Snapshot`] happens outside it.

mod editor;
mod entry;
mod journal;
mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub use editor::Editor;
pub use entry::disk_key;
pub use snapshot::Snapshot;

use crate::current_timestamp_millis;
use crate::error::{DiskCacheError, DiskResult, IoOperation};
use entry::Entry;
use journal::{
    read_journal, write_header, Record, JOURNAL_FILE, JOURNAL_FILE_BACKUP, JOURNAL_FILE_TEMP,
    REDUNDANT_OP_COMPACT_THRESHOLD,
};

struct DiskInner {
    directory: PathBuf,
    app_version: u32,
    value_count: usize,
    entries: LruCache<String, Entry>,
    size: u64,
    max_size: u64,
    /// `None` once the store is closed
    journal: Option<BufWriter<File>>,
    redundant_op_count: usize,
    next_editor_id: u64,
}

fn delete_if_exists(path: &Path) -> DiskResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DiskCacheError::io_error(
            path.to_path_buf(),
            IoOperation::Delete,
            e,
        )),
    }
}

fn rename(from: &Path, to: &Path) -> DiskResult<()> {
    fs::rename(from, to).map_err(|e| DiskCacheError::io_error(from.to_path_buf(), IoOperation::Move, e))
}

/// Move every written dirty file over its clean file, tracking the store size.
fn publish_values(
    directory: &Path,
    entry: &mut Entry,
    value_count: usize,
    size: &mut u64,
) -> DiskResult<()> {
    for index in 0..value_count {
        let dirty = entry.dirty_file(directory, index);
        if !dirty.exists() {
            continue;
        }
        let clean = entry.clean_file(directory, index);
        rename(&dirty, &clean)?;
        let new_length = fs::metadata(&clean)
            .map_err(|e| DiskCacheError::io_error(clean.clone(), IoOperation::Read, e))?
            .len();
        *size = size.saturating_sub(entry.lengths[index]) + new_length;
        entry.lengths[index] = new_length;
    }
    Ok(())
}

/// Delete every dirty file of `entry`, reporting the first failure.
fn discard_values(directory: &Path, entry: &Entry, value_count: usize) -> DiskResult<()> {
    let mut first_error = None;
    for index in 0..value_count {
        if let Err(e) = delete_if_exists(&entry.dirty_file(directory, index)) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn open_journal_writer(path: &Path) -> DiskResult<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DiskCacheError::io_error(path.to_path_buf(), IoOperation::Write, e))?;
    Ok(BufWriter::new(file))
}

impl DiskInner {
    fn journal_path(&self) -> PathBuf {
        self.directory.join(JOURNAL_FILE)
    }

    fn check_not_closed(&self) -> DiskResult<()> {
        if self.journal.is_none() {
            return Err(DiskCacheError::Closed);
        }
        Ok(())
    }

    fn write_record(&mut self, record: &Record, flush: bool) -> DiskResult<()> {
        let path = self.directory.join(JOURNAL_FILE);
        let writer = self.journal.as_mut().ok_or(DiskCacheError::Closed)?;
        writeln!(writer, "{}", record)
            .and_then(|_| if flush { writer.flush() } else { Ok(()) })
            .map_err(|e| DiskCacheError::io_error(path, IoOperation::Write, e))
    }

    fn journal_rebuild_required(&self) -> bool {
        self.redundant_op_count >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant_op_count >= self.entries.len()
    }

    /// Apply one replayed record to the index. Every record promotes its
    /// entry so replay restores access order.
    fn apply(&mut self, record: Record) {
        match record {
            Record::Remove { name } => {
                self.entries.pop(&name);
            }
            Record::Read { name } => {
                self.entries.get(&name);
            }
            Record::Dirty { name } => {
                let editor_id = self.next_editor_id;
                self.entry_or_insert(name).current_editor = Some(editor_id);
            }
            Record::Clean {
                name,
                expiry_timestamp,
                lengths,
            } => {
                let entry = self.entry_or_insert(name);
                entry.readable = true;
                entry.current_editor = None;
                entry.lengths = lengths;
                entry.expiry_timestamp = expiry_timestamp;
            }
        }
    }

    fn entry_or_insert(&mut self, name: String) -> &mut Entry {
        let value_count = self.value_count;
        self.entries
            .get_or_insert_mut(name.clone(), || Entry::new(name, value_count))
    }

    /// Compute the initial size and delete files of edits interrupted by a
    /// crash.
    fn process_replayed_entries(&mut self) -> DiskResult<()> {
        delete_if_exists(&self.directory.join(JOURNAL_FILE_TEMP))?;

        let interrupted: Vec<Entry> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.current_editor.is_some())
            .map(|(_, entry)| entry.clone())
            .collect();
        for entry in interrupted {
            for index in 0..self.value_count {
                delete_if_exists(&entry.clean_file(&self.directory, index))?;
                delete_if_exists(&entry.dirty_file(&self.directory, index))?;
            }
            self.entries.pop(&entry.name);
            debug!(name = %entry.name, "Dropped entry left dirty by an interrupted edit");
        }

        self.size = self.entries.iter().map(|(_, entry)| entry.total_length()).sum();
        Ok(())
    }

    /// Rewrite the journal from the in-memory index, dropping redundant
    /// records. Replaces the live journal atomically via a backup rename.
    fn rebuild_journal(&mut self) -> DiskResult<()> {
        if let Some(mut writer) = self.journal.take() {
            let _ = writer.flush();
        }

        let temp_path = self.directory.join(JOURNAL_FILE_TEMP);
        let journal_path = self.journal_path();
        let backup_path = self.directory.join(JOURNAL_FILE_BACKUP);

        {
            let file = File::create(&temp_path)
                .map_err(|e| DiskCacheError::io_error(temp_path.clone(), IoOperation::Write, e))?;
            let mut writer = BufWriter::new(file);
            let io_result = (|| -> std::io::Result<()> {
                write_header(&mut writer, self.app_version, self.value_count)?;
                // least recently used first so replay restores the same order
                for (_, entry) in self.entries.iter().rev() {
                    let record = if entry.current_editor.is_some() {
                        Record::Dirty {
                            name: entry.name.clone(),
                        }
                    } else {
                        Record::Clean {
                            name: entry.name.clone(),
                            expiry_timestamp: entry.expiry_timestamp,
                            lengths: entry.lengths.clone(),
                        }
                    };
                    writeln!(writer, "{}", record)?;
                }
                writer.flush()?;
                writer.get_ref().sync_all()
            })();
            io_result
                .map_err(|e| DiskCacheError::io_error(temp_path.clone(), IoOperation::Write, e))?;
        }

        if journal_path.exists() {
            rename(&journal_path, &backup_path)?;
        }
        rename(&temp_path, &journal_path)?;
        delete_if_exists(&backup_path)?;

        self.journal = Some(open_journal_writer(&journal_path)?);
        self.redundant_op_count = 0;
        debug!(
            directory = %self.directory.display(),
            entries = self.entries.len(),
            "Rebuilt disk cache journal"
        );
        Ok(())
    }

    fn remove_entry(&mut self, name: &str) -> DiskResult<bool> {
        let entry = match self.entries.peek(name) {
            Some(entry) if entry.current_editor.is_none() => entry.clone(),
            _ => return Ok(false),
        };

        for index in 0..self.value_count {
            delete_if_exists(&entry.clean_file(&self.directory, index))?;
        }
        self.size = self.size.saturating_sub(entry.total_length());
        self.entries.pop(name);
        self.redundant_op_count += 1;
        self.write_record(
            &Record::Remove {
                name: name.to_string(),
            },
            false,
        )?;
        Ok(true)
    }

    /// Best-effort removal of an entry whose files are in an unknown state.
    fn discard_entry(&mut self, name: &str) {
        let entry = match self.entries.pop(name) {
            Some(entry) => entry,
            None => return,
        };
        for index in 0..self.value_count {
            let clean = entry.clean_file(&self.directory, index);
            if let Err(e) = delete_if_exists(&clean) {
                warn!(path = %clean.display(), error = %e, "Failed to delete disk entry file");
            }
        }
        self.size = self.size.saturating_sub(entry.total_length());
        self.redundant_op_count += 1;
        let record = Record::Remove {
            name: name.to_string(),
        };
        if let Err(e) = self.write_record(&record, true) {
            warn!(name, error = %e, "Failed to journal dropped disk entry");
        }
    }

    /// Evict least recently used entries not being edited until under the
    /// bound.
    fn trim_to_size(&mut self) -> DiskResult<()> {
        while self.size > self.max_size {
            let victim = self
                .entries
                .iter()
                .rev()
                .find(|(_, entry)| entry.current_editor.is_none())
                .map(|(name, _)| name.clone());
            match victim {
                Some(name) => {
                    self.remove_entry(&name)?;
                    debug!(name = %name, size = self.size, max_size = self.max_size, "Evicted disk entry");
                }
                None => break,
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) -> DiskResult<()> {
        self.trim_to_size()?;
        if self.journal_rebuild_required() {
            self.rebuild_journal()?;
        }
        Ok(())
    }
}

/// Journaled LRU store rooted at a dedicated directory.
pub struct DiskLruCache {
    directory: PathBuf,
    app_version: u32,
    value_count: usize,
    inner: Mutex<DiskInner>,
}

impl DiskLruCache {
    /// Open the store in `directory`, creating it if needed.
    ///
    /// An existing journal is replayed; a journal that is corrupt or was
    /// written with a different `app_version`/`value_count` is discarded
    /// along with every file in the directory.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or the journal cannot
    /// be read or written
    pub fn open(
        directory: impl AsRef<Path>,
        app_version: u32,
        value_count: usize,
        max_size: u64,
    ) -> DiskResult<Self> {
        if max_size == 0 {
            return Err(DiskCacheError::invalid_argument("max_size", "must be positive"));
        }
        if value_count == 0 {
            return Err(DiskCacheError::invalid_argument(
                "value_count",
                "must be positive",
            ));
        }

        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .map_err(|e| DiskCacheError::directory_creation_failed(directory.clone(), e))?;

        let journal_path = directory.join(JOURNAL_FILE);
        let backup_path = directory.join(JOURNAL_FILE_BACKUP);
        if backup_path.exists() {
            if journal_path.exists() {
                delete_if_exists(&backup_path)?;
            } else {
                rename(&backup_path, &journal_path)?;
            }
        }

        let mut inner = DiskInner {
            directory: directory.clone(),
            app_version,
            value_count,
            entries: LruCache::unbounded(),
            size: 0,
            max_size,
            journal: None,
            redundant_op_count: 0,
            next_editor_id: 0,
        };

        if journal_path.exists() {
            match read_journal(&journal_path, app_version, value_count) {
                Ok(parsed) => {
                    let record_count = parsed.records.len();
                    for record in parsed.records {
                        inner.apply(record);
                    }
                    inner.redundant_op_count = record_count.saturating_sub(inner.entries.len());
                    inner.process_replayed_entries()?;
                    if parsed.truncated {
                        inner.rebuild_journal()?;
                    } else {
                        inner.journal = Some(open_journal_writer(&journal_path)?);
                    }
                    debug!(
                        directory = %directory.display(),
                        entries = inner.entries.len(),
                        size = inner.size,
                        "Opened disk cache"
                    );
                    return Ok(Self::from_inner(inner));
                }
                Err(e) if e.is_corrupt_journal() => {
                    warn!(
                        directory = %directory.display(),
                        error = %e,
                        "Disk cache journal is corrupt, removing"
                    );
                    fs::remove_dir_all(&directory).map_err(|e| {
                        DiskCacheError::io_error(directory.clone(), IoOperation::Delete, e)
                    })?;
                    fs::create_dir_all(&directory).map_err(|e| {
                        DiskCacheError::directory_creation_failed(directory.clone(), e)
                    })?;
                    inner.entries.clear();
                    inner.next_editor_id = 0;
                }
                Err(e) => return Err(e),
            }
        }

        inner.rebuild_journal()?;
        debug!(directory = %directory.display(), "Created disk cache");
        Ok(Self::from_inner(inner))
    }

    fn from_inner(mut inner: DiskInner) -> Self {
        // editor ids handed out during replay are placeholders only
        inner.next_editor_id += 1;
        Self {
            directory: inner.directory.clone(),
            app_version: inner.app_version,
            value_count: inner.value_count,
            inner: Mutex::new(inner),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn app_version(&self) -> u32 {
        self.app_version
    }

    pub fn value_count(&self) -> usize {
        self.value_count
    }

    pub(crate) fn dirty_path(&self, name: &str, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}.tmp", name, index))
    }

    /// Snapshot of the entry for `key`.
    ///
    /// Returns `None` if the entry does not exist, has never been committed,
    /// is being edited, has expired (the entry is removed), or one of its
    /// files has disappeared.
    pub fn get(&self, key: &str) -> DiskResult<Option<Snapshot>> {
        let name = disk_key(key);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.check_not_closed()?;

        let (readable, editing, expired) = match inner.entries.peek(&name) {
            Some(entry) => (
                entry.readable,
                entry.current_editor.is_some(),
                entry.expiry_timestamp < current_timestamp_millis(),
            ),
            None => return Ok(None),
        };
        if !readable || editing {
            return Ok(None);
        }
        if expired {
            debug!(key, "Disk entry expired, removing");
            inner.remove_entry(&name)?;
            inner.cleanup()?;
            return Ok(None);
        }

        let entry = match inner.entries.get(&name) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };

        let mut files = Vec::with_capacity(inner.value_count);
        for index in 0..inner.value_count {
            let path = entry.clean_file(&inner.directory, index);
            match File::open(&path) {
                Ok(file) => files.push(file),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(key, path = %path.display(), "Disk entry file missing");
                    return Ok(None);
                }
                Err(e) => return Err(DiskCacheError::io_error(path, IoOperation::Read, e)),
            }
        }

        inner.redundant_op_count += 1;
        inner.write_record(&Record::Read { name }, false)?;
        if inner.journal_rebuild_required() {
            inner.rebuild_journal()?;
        }

        Ok(Some(Snapshot::new(
            key.to_string(),
            files,
            entry.lengths,
            entry.expiry_timestamp,
        )))
    }

    /// Exclusive editor for `key`, or `None` if another edit is in flight.
    pub fn edit(&self, key: &str) -> DiskResult<Option<Editor<'_>>> {
        let name = disk_key(key);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.check_not_closed()?;

        let editor_id = inner.next_editor_id;
        {
            let entry = inner.entry_or_insert(name.clone());
            if entry.current_editor.is_some() {
                return Ok(None);
            }
            entry.current_editor = Some(editor_id);
        }
        inner.next_editor_id += 1;

        // DIRTY must be durable before any dirty file can exist
        if let Err(e) = inner.write_record(&Record::Dirty { name: name.clone() }, true) {
            let readable = match inner.entries.get_mut(&name) {
                Some(entry) => {
                    entry.current_editor = None;
                    entry.readable
                }
                None => true,
            };
            if !readable {
                inner.entries.pop(&name);
            }
            return Err(e);
        }

        Ok(Some(Editor::new(self, key.to_string(), name, editor_id)))
    }

    pub(crate) fn complete_edit(
        &self,
        key: &str,
        name: &str,
        editor_id: u64,
        written: &[bool],
        expiry_timestamp: i64,
        success: bool,
    ) -> DiskResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // close() already discarded this store's dirty files, and the
        // directory may now belong to a reopened store
        if inner.journal.is_none() {
            return Err(DiskCacheError::Closed);
        }

        let current_editor = inner.entries.peek(name).and_then(|entry| entry.current_editor);
        if current_editor != Some(editor_id) {
            if current_editor.is_none() {
                for index in 0..inner.value_count {
                    let _ = delete_if_exists(&self.dirty_path(name, index));
                }
            }
            return Err(DiskCacheError::StaleEditor {
                key: key.to_string(),
            });
        }

        let directory = inner.directory.clone();
        let value_count = inner.value_count;
        let mut success = success;
        let mut missing = None;

        let entry = inner
            .entries
            .peek_mut(name)
            .ok_or_else(|| DiskCacheError::StaleEditor {
                key: key.to_string(),
            })?;

        if success && !entry.readable {
            missing = (0..value_count).find(|&index| {
                !written.get(index).copied().unwrap_or(false)
                    || !entry.dirty_file(&directory, index).exists()
            });
            if missing.is_some() {
                success = false;
            }
        }

        let mut size = inner.size;
        let finished = if success {
            publish_values(&directory, entry, value_count, &mut size)
        } else {
            discard_values(&directory, entry, value_count)
        };

        entry.current_editor = None;
        if let Err(e) = finished {
            let _ = discard_values(&directory, entry, value_count);
            inner.size = size;
            // some slots may hold the new value and some the old one
            inner.discard_entry(name);
            warn!(key, error = %e, "Failed to finish disk edit, entry dropped");
            return Err(e);
        }

        let record = if entry.readable || success {
            entry.readable = true;
            if success {
                entry.expiry_timestamp = expiry_timestamp;
            }
            Some(Record::Clean {
                name: name.to_string(),
                expiry_timestamp: entry.expiry_timestamp,
                lengths: entry.lengths.clone(),
            })
        } else {
            None
        };

        inner.size = size;
        inner.redundant_op_count += 1;
        let record = match record {
            Some(record) => {
                if success {
                    inner.entries.promote(name);
                }
                record
            }
            None => {
                inner.entries.pop(name);
                Record::Remove {
                    name: name.to_string(),
                }
            }
        };
        inner.write_record(&record, true)?;

        if inner.size > inner.max_size || inner.journal_rebuild_required() {
            inner.cleanup()?;
        }

        match missing {
            Some(index) => Err(DiskCacheError::MissingValue {
                key: key.to_string(),
                index,
            }),
            None => Ok(()),
        }
    }

    /// Expiry stored with the committed entry for `key`
    pub fn get_expiry_timestamp(&self, key: &str) -> DiskResult<Option<i64>> {
        let inner = self.inner.lock();
        inner.check_not_closed()?;
        Ok(inner
            .entries
            .peek(&disk_key(key))
            .filter(|entry| entry.readable)
            .map(|entry| entry.expiry_timestamp))
    }

    /// Remove the entry for `key`. Entries being edited cannot be removed.
    pub fn remove(&self, key: &str) -> DiskResult<bool> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.check_not_closed()?;
        let removed = inner.remove_entry(&disk_key(key))?;
        if removed && inner.journal_rebuild_required() {
            inner.rebuild_journal()?;
        }
        Ok(removed)
    }

    /// Bytes currently used by committed values
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn max_size(&self) -> u64 {
        self.inner.lock().max_size
    }

    /// Number of indexed entries, including ones mid-edit
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change the bound, evicting immediately if now over it.
    pub fn set_max_size(&self, max_size: u64) -> DiskResult<()> {
        let mut guard = self.inner.lock();
        guard.max_size = max_size;
        if guard.journal.is_some() {
            guard.trim_to_size()?;
        }
        Ok(())
    }

    /// Trim and force buffered journal records to disk.
    pub fn flush(&self) -> DiskResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.check_not_closed()?;
        inner.trim_to_size()?;
        let path = inner.journal_path();
        if let Some(writer) = inner.journal.as_mut() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_data())
                .map_err(|e| DiskCacheError::io_error(path, IoOperation::Sync, e))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().journal.is_none()
    }

    /// Abort in-flight edits, trim, and close the journal. Idempotent.
    pub fn close(&self) -> DiskResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.journal.is_none() {
            return Ok(());
        }

        let editing: Vec<Entry> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.current_editor.is_some())
            .map(|(_, entry)| entry.clone())
            .collect();
        for entry in editing {
            for index in 0..inner.value_count {
                delete_if_exists(&entry.dirty_file(&inner.directory, index))?;
            }
            let record = if entry.readable {
                if let Some(live) = inner.entries.peek_mut(&entry.name) {
                    live.current_editor = None;
                }
                Record::Clean {
                    name: entry.name.clone(),
                    expiry_timestamp: entry.expiry_timestamp,
                    lengths: entry.lengths.clone(),
                }
            } else {
                inner.entries.pop(&entry.name);
                Record::Remove {
                    name: entry.name.clone(),
                }
            };
            inner.write_record(&record, false)?;
        }

        inner.trim_to_size()?;
        let path = inner.journal_path();
        if let Some(mut writer) = inner.journal.take() {
            writer
                .flush()
                .map_err(|e| DiskCacheError::io_error(path, IoOperation::Write, e))?;
        }
        debug!(directory = %inner.directory.display(), "Closed disk cache");
        Ok(())
    }

    /// Close the store and delete its directory with everything in it.
    pub fn delete(&self) -> DiskResult<()> {
        self.close()?;
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(DiskCacheError::io_error(
                    self.directory.clone(),
                    IoOperation::Delete,
                    e,
                ))
            }
        }
        let mut guard = self.inner.lock();
        guard.entries.clear();
        guard.size = 0;
        debug!(directory = %self.directory.display(), "Deleted disk cache");
        Ok(())
    }
}

impl std::fmt::Debug for DiskLruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DiskLruCache")
            .field("directory", &self.directory)
            .field("size", &inner.size)
            .field("max_size", &inner.max_size)
            .field("entries", &inner.entries.len())
            .field("closed", &inner.journal.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    const FAR_FUTURE: i64 = i64::MAX - 1;

    fn open(dir: &TempDir, max_size: u64) -> DiskLruCache {
        DiskLruCache::open(dir.path().join("cache"), 1, 1, max_size).unwrap()
    }

    fn put(cache: &DiskLruCache, key: &str, value: &[u8], expiry: i64) {
        let mut editor = cache.edit(key).unwrap().expect("editor");
        editor.set(0, value).unwrap();
        editor.set_entry_expiry_timestamp(expiry);
        editor.commit().unwrap();
    }

    fn read(cache: &DiskLruCache, key: &str) -> Option<Vec<u8>> {
        cache
            .get(key)
            .unwrap()
            .map(|mut snapshot| snapshot.read_value(0).unwrap())
    }

    fn journal_lines(dir: &TempDir) -> Vec<String> {
        fs::read_to_string(dir.path().join("cache").join(JOURNAL_FILE))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_empty_store_writes_header() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        assert!(cache.is_empty());
        assert_eq!(
            journal_lines(&dir),
            vec!["pixcache.disklru", "1", "1", "1", ""]
        );
    }

    #[test]
    fn test_commit_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        put(&cache, "http://x/a.png", b"hello", FAR_FUTURE);

        let mut snapshot = cache.get("http://x/a.png").unwrap().unwrap();
        assert_eq!(snapshot.key(), "http://x/a.png");
        assert_eq!(snapshot.length(0), Some(5));
        assert_eq!(snapshot.expiry_timestamp(), FAR_FUTURE);
        let mut content = String::new();
        snapshot
            .input_stream(0)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");
        assert_eq!(cache.size(), 5);
    }

    #[test]
    fn test_uncommitted_entry_is_invisible() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.set(0, b"partial").unwrap();
        assert!(cache.get("k").unwrap().is_none());
        editor.commit().unwrap();
        assert_eq!(read(&cache, "k"), Some(b"partial".to_vec()));
    }

    #[test]
    fn test_second_editor_is_refused() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let first = cache.edit("k").unwrap();
        assert!(first.is_some());
        assert!(cache.edit("k").unwrap().is_none());
        drop(first);
        assert!(cache.edit("k").unwrap().is_some());
    }

    #[test]
    fn test_abort_keeps_previous_value() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        put(&cache, "k", b"first", FAR_FUTURE);

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.set(0, b"second").unwrap();
        editor.abort().unwrap();

        assert_eq!(read(&cache, "k"), Some(b"first".to_vec()));
        assert_eq!(cache.size(), 5);
    }

    #[test]
    fn test_abort_of_new_entry_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.set(0, b"data").unwrap();
        editor.abort().unwrap();

        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty());
        assert!(!dir.path().join("cache").join(format!("{}.0", disk_key("k"))).exists());
        assert!(!dir.path().join("cache").join(format!("{}.0.tmp", disk_key("k"))).exists());
    }

    #[test]
    fn test_commit_without_value_fails() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let editor = cache.edit("k").unwrap().unwrap();
        let err = editor.commit().unwrap_err();
        assert!(matches!(err, DiskCacheError::MissingValue { index: 0, .. }));
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_index() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let mut editor = cache.edit("k").unwrap().unwrap();
        assert!(matches!(
            editor.new_output_stream(1),
            Err(DiskCacheError::InvalidIndex { index: 1, value_count: 1 })
        ));
    }

    #[test]
    fn test_expired_entry_is_removed_on_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        put(&cache, "k", b"stale", 1);
        assert_eq!(cache.get_expiry_timestamp("k").unwrap(), Some(1));
        assert!(cache.get("k").unwrap().is_none());
        assert_eq!(cache.get_expiry_timestamp("k").unwrap(), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 10);
        put(&cache, "a", b"aaaa", FAR_FUTURE);
        put(&cache, "b", b"bbbb", FAR_FUTURE);
        // reading a makes b the eldest
        assert!(read(&cache, "a").is_some());
        put(&cache, "c", b"cccc", FAR_FUTURE);

        assert!(read(&cache, "b").is_none());
        assert!(read(&cache, "a").is_some());
        assert!(read(&cache, "c").is_some());
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn test_set_max_size_trims() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 100);
        put(&cache, "a", b"aaaa", FAR_FUTURE);
        put(&cache, "b", b"bbbb", FAR_FUTURE);
        cache.set_max_size(4).unwrap();
        assert_eq!(cache.max_size(), 4);
        assert!(read(&cache, "a").is_none());
        assert!(read(&cache, "b").is_some());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 100);
        put(&cache, "a", b"aaaa", FAR_FUTURE);
        assert!(cache.remove("a").unwrap());
        assert!(!cache.remove("a").unwrap());
        assert!(read(&cache, "a").is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_reopen_restores_entries_and_expiry() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1024);
            put(&cache, "k", b"persisted", 4_102_444_800_000);
            cache.close().unwrap();
        }
        let cache = open(&dir, 1024);
        assert_eq!(cache.get_expiry_timestamp("k").unwrap(), Some(4_102_444_800_000));
        assert_eq!(read(&cache, "k"), Some(b"persisted".to_vec()));
        assert_eq!(cache.size(), 9);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        cache.close().unwrap();
        assert!(cache.is_closed());
        assert!(matches!(cache.get("k"), Err(DiskCacheError::Closed)));
        assert!(matches!(cache.edit("k"), Err(DiskCacheError::Closed)));
        assert!(matches!(cache.remove("k"), Err(DiskCacheError::Closed)));
        assert!(matches!(cache.flush(), Err(DiskCacheError::Closed)));
        assert!(cache.close().is_ok());
    }

    #[test]
    fn test_close_aborts_in_flight_editor() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.set(0, b"data").unwrap();
        cache.close().unwrap();
        assert!(matches!(editor.commit(), Err(DiskCacheError::Closed)));

        let reopened = open(&dir, 1024);
        assert!(reopened.get("k").unwrap().is_none());
    }

    #[test]
    fn test_editor_of_deleted_store_spares_reopened_store() {
        let dir = TempDir::new().unwrap();
        let first = open(&dir, 1024);
        let mut stale = first.edit("k").unwrap().unwrap();
        stale.set(0, b"old").unwrap();
        first.delete().unwrap();

        let second = open(&dir, 1024);
        let mut editor = second.edit("k").unwrap().unwrap();
        editor.set(0, b"new").unwrap();
        drop(stale);
        editor.commit().unwrap();
        assert_eq!(read(&second, "k"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_failed_publish_releases_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        // a directory in the clean file's place makes the rename fail
        let clean = dir.path().join("cache").join(format!("{}.0", disk_key("k")));
        fs::create_dir(&clean).unwrap();

        let mut editor = cache.edit("k").unwrap().unwrap();
        editor.set(0, b"data").unwrap();
        assert!(matches!(
            editor.commit(),
            Err(DiskCacheError::Io {
                operation: IoOperation::Move,
                ..
            })
        ));
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        assert!(!dir.path().join("cache").join(format!("{}.0.tmp", disk_key("k"))).exists());

        fs::remove_dir(&clean).unwrap();
        put(&cache, "k", b"again", FAR_FUTURE);
        assert_eq!(read(&cache, "k"), Some(b"again".to_vec()));
        cache.close().unwrap();

        let reopened = open(&dir, 1024);
        assert_eq!(read(&reopened, "k"), Some(b"again".to_vec()));
    }

    #[test]
    fn test_delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        put(&cache, "k", b"data", FAR_FUTURE);
        cache.delete().unwrap();
        assert!(cache.is_closed());
        assert!(!dir.path().join("cache").exists());
    }

    #[test]
    fn test_journal_is_compacted() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024);
        put(&cache, "k", b"data", FAR_FUTURE);
        for _ in 0..(REDUNDANT_OP_COMPACT_THRESHOLD + 10) {
            assert!(cache.get("k").unwrap().is_some());
        }
        cache.flush().unwrap();
        assert!(journal_lines(&dir).len() < 20);
        assert_eq!(read(&cache, "k"), Some(b"data".to_vec()));
    }
}
