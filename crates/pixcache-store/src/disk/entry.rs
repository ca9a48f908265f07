//! In-memory index record for one disk entry

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Map an arbitrary caller key (usually a URI) to the name used for the
/// entry's files and journal records.
pub fn disk_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) name: String,
    /// Length of each clean value file
    pub(crate) lengths: Vec<u64>,
    /// True once the entry has been committed at least once
    pub(crate) readable: bool,
    /// Id of the editor currently writing this entry
    pub(crate) current_editor: Option<u64>,
    pub(crate) expiry_timestamp: i64,
}

impl Entry {
    pub(crate) fn new(name: String, value_count: usize) -> Self {
        Self {
            name,
            lengths: vec![0; value_count],
            readable: false,
            current_editor: None,
            expiry_timestamp: i64::MAX,
        }
    }

    pub(crate) fn clean_file(&self, directory: &Path, index: usize) -> PathBuf {
        directory.join(format!("{}.{}", self.name, index))
    }

    pub(crate) fn dirty_file(&self, directory: &Path, index: usize) -> PathBuf {
        directory.join(format!("{}.{}.tmp", self.name, index))
    }

    pub(crate) fn total_length(&self) -> u64 {
        self.lengths.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_key_is_stable_hex() {
        let a = disk_key("http://x/img.png");
        let b = disk_key("http://x/img.png");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, disk_key("http://x/other.png"));
    }

    #[test]
    fn test_file_names() {
        let entry = Entry::new("abc".to_string(), 2);
        let dir = Path::new("/cache");
        assert_eq!(entry.clean_file(dir, 1), PathBuf::from("/cache/abc.1"));
        assert_eq!(entry.dirty_file(dir, 0), PathBuf::from("/cache/abc.0.tmp"));
        assert_eq!(entry.total_length(), 0);
    }
}
