//! Read-only view of a committed entry

use std::fs::File;
use std::io::Read;

/// Open handles to every value slot of an entry as of the moment it was read.
///
/// Files stay readable even if the entry is later replaced or evicted. The
/// handles are closed when the snapshot is dropped.
#[derive(Debug)]
pub struct Snapshot {
    key: String,
    files: Vec<Option<File>>,
    lengths: Vec<u64>,
    expiry_timestamp: i64,
}

impl Snapshot {
    pub(crate) fn new(
        key: String,
        files: Vec<File>,
        lengths: Vec<u64>,
        expiry_timestamp: i64,
    ) -> Self {
        Self {
            key,
            files: files.into_iter().map(Some).collect(),
            lengths,
            expiry_timestamp,
        }
    }

    /// Key this snapshot was read for
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Borrow the stream for `index`, if it has not been taken
    pub fn input_stream(&mut self, index: usize) -> Option<&mut File> {
        self.files.get_mut(index).and_then(Option::as_mut)
    }

    /// Move the stream for `index` out of the snapshot
    pub fn take_input_stream(&mut self, index: usize) -> Option<File> {
        self.files.get_mut(index).and_then(Option::take)
    }

    /// Read the remainder of the stream for `index` into memory
    pub fn read_value(&mut self, index: usize) -> std::io::Result<Vec<u8>> {
        let capacity = self.length(index).unwrap_or(0) as usize;
        let file = self.input_stream(index).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no stream at index {}", index),
            )
        })?;
        let mut buffer = Vec::with_capacity(capacity);
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Committed byte length of the value at `index`
    pub fn length(&self, index: usize) -> Option<u64> {
        self.lengths.get(index).copied()
    }

    pub fn expiry_timestamp(&self) -> i64 {
        self.expiry_timestamp
    }
}
