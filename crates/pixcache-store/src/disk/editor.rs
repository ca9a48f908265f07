//! Exclusive writer for one disk entry

use std::fs::File;
use std::io::Write;

use tracing::warn;

use super::DiskLruCache;
use crate::error::{DiskCacheError, DiskResult, IoOperation};

/// Exclusive editor for a single entry.
///
/// Values are written to dirty files and only become visible on
/// [`Editor::commit`]. An editor dropped without committing is aborted.
pub struct Editor<'a> {
    cache: &'a DiskLruCache,
    key: String,
    name: String,
    editor_id: u64,
    written: Vec<bool>,
    expiry_timestamp: i64,
    done: bool,
}

impl<'a> Editor<'a> {
    pub(crate) fn new(cache: &'a DiskLruCache, key: String, name: String, editor_id: u64) -> Self {
        Self {
            cache,
            key,
            name,
            editor_id,
            written: vec![false; cache.value_count()],
            expiry_timestamp: i64::MAX,
            done: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Open a fresh writable sink for slot `index`, truncating anything
    /// written to it earlier in this edit.
    pub fn new_output_stream(&mut self, index: usize) -> DiskResult<File> {
        let value_count = self.written.len();
        if index >= value_count {
            return Err(DiskCacheError::InvalidIndex { index, value_count });
        }
        if self.cache.is_closed() {
            return Err(DiskCacheError::Closed);
        }

        let path = self.cache.dirty_path(&self.name, index);
        let file = File::create(&path)
            .map_err(|e| DiskCacheError::io_error(path.clone(), IoOperation::Write, e))?;
        self.written[index] = true;
        Ok(file)
    }

    /// Write `value` as the whole content of slot `index`.
    pub fn set(&mut self, index: usize, value: &[u8]) -> DiskResult<()> {
        let path = self.cache.dirty_path(&self.name, index);
        let mut file = self.new_output_stream(index)?;
        file.write_all(value)
            .and_then(|_| file.flush())
            .map_err(|e| DiskCacheError::io_error(path, IoOperation::Write, e))
    }

    /// Expiry persisted alongside the entry when it is committed
    pub fn set_entry_expiry_timestamp(&mut self, expiry_timestamp: i64) {
        self.expiry_timestamp = expiry_timestamp;
    }

    /// Publish the written values and make the entry visible to readers.
    pub fn commit(mut self) -> DiskResult<()> {
        self.done = true;
        self.cache.complete_edit(
            &self.key,
            &self.name,
            self.editor_id,
            &self.written,
            self.expiry_timestamp,
            true,
        )
    }

    /// Discard everything written by this editor.
    pub fn abort(mut self) -> DiskResult<()> {
        self.done = true;
        self.cache.complete_edit(
            &self.key,
            &self.name,
            self.editor_id,
            &self.written,
            self.expiry_timestamp,
            false,
        )
    }
}

impl Drop for Editor<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.cache.complete_edit(
            &self.key,
            &self.name,
            self.editor_id,
            &self.written,
            self.expiry_timestamp,
            false,
        ) {
            warn!(key = %self.key, error = %e, "Failed to abort abandoned editor");
        }
    }
}

impl std::fmt::Debug for Editor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("editor_id", &self.editor_id)
            .field("written", &self.written)
            .finish()
    }
}
