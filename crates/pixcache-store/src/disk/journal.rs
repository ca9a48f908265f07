//! Journal records, header validation and replay parsing.
//!
//! The journal is an append-only text log. Its header is five lines:
//!
//! ```text
//! pixcache.disklru
//! 1
//! <app version>
//! <value count>
//! <blank>
//! ```
//!
//! followed by one record per line:
//!
//! - `DIRTY <name>`: an editor was handed out. Must be followed by a CLEAN or
//!   REMOVE for the same name, otherwise the entry's files are stale.
//! - `CLEAN <name> <expiry> <len>...`: an edit was published.
//! - `REMOVE <name>`: the entry was deleted.
//! - `READ <name>`: the entry was read; only affects recency on replay.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{DiskCacheError, DiskResult, IoOperation};

pub(crate) const JOURNAL_FILE: &str = "journal";
pub(crate) const JOURNAL_FILE_TEMP: &str = "journal.tmp";
pub(crate) const JOURNAL_FILE_BACKUP: &str = "journal.bkp";
pub(crate) const MAGIC: &str = "pixcache.disklru";
pub(crate) const VERSION: &str = "1";

/// Compaction threshold for records that no longer describe live state
pub(crate) const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Dirty {
        name: String,
    },
    Clean {
        name: String,
        expiry_timestamp: i64,
        lengths: Vec<u64>,
    },
    Remove {
        name: String,
    },
    Read {
        name: String,
    },
}

impl Record {
    fn parse(line: &str, value_count: usize) -> Result<Self, String> {
        let mut parts = line.split(' ');
        let kind = parts.next().unwrap_or_default();
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(format!("missing entry name: {:?}", line)),
        };

        let record = match kind {
            "DIRTY" => Record::Dirty { name },
            "REMOVE" => Record::Remove { name },
            "READ" => Record::Read { name },
            "CLEAN" => {
                let expiry_timestamp = parts
                    .next()
                    .and_then(|t| t.parse::<i64>().ok())
                    .ok_or_else(|| format!("bad expiry timestamp: {:?}", line))?;
                let lengths = parts
                    .map(|l| l.parse::<u64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| format!("bad value lengths: {:?}", line))?;
                if lengths.len() != value_count {
                    return Err(format!(
                        "expected {} value lengths, found {}: {:?}",
                        value_count,
                        lengths.len(),
                        line
                    ));
                }
                return Ok(Record::Clean {
                    name,
                    expiry_timestamp,
                    lengths,
                });
            }
            _ => return Err(format!("unexpected journal line: {:?}", line)),
        };

        if parts.next().is_some() {
            return Err(format!("trailing data in journal line: {:?}", line));
        }
        Ok(record)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Dirty { name } => write!(f, "DIRTY {}", name),
            Record::Remove { name } => write!(f, "REMOVE {}", name),
            Record::Read { name } => write!(f, "READ {}", name),
            Record::Clean {
                name,
                expiry_timestamp,
                lengths,
            } => {
                write!(f, "CLEAN {} {}", name, expiry_timestamp)?;
                for length in lengths {
                    write!(f, " {}", length)?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of reading a journal file
#[derive(Debug)]
pub(crate) struct ParsedJournal {
    pub(crate) records: Vec<Record>,
    /// The final line had no terminating newline and was dropped
    pub(crate) truncated: bool,
}

pub(crate) fn write_header<W: Write>(
    writer: &mut W,
    app_version: u32,
    value_count: usize,
) -> std::io::Result<()> {
    writeln!(writer, "{}", MAGIC)?;
    writeln!(writer, "{}", VERSION)?;
    writeln!(writer, "{}", app_version)?;
    writeln!(writer, "{}", value_count)?;
    writeln!(writer)
}

/// Read and validate a journal, returning its records in file order.
pub(crate) fn read_journal(
    path: &Path,
    app_version: u32,
    value_count: usize,
) -> DiskResult<ParsedJournal> {
    let bytes = fs::read(path)
        .map_err(|e| DiskCacheError::io_error(path.to_path_buf(), IoOperation::Read, e))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| DiskCacheError::corrupt_journal(path.to_path_buf(), "journal is not UTF-8"))?;

    let mut lines: Vec<&str> = content.split('\n').collect();
    // split leaves a trailing fragment; empty means the file ended cleanly
    let tail = lines.pop().unwrap_or_default();
    let truncated = !tail.is_empty();

    let expected_header = [
        MAGIC.to_string(),
        VERSION.to_string(),
        app_version.to_string(),
        value_count.to_string(),
        String::new(),
    ];
    if lines.len() < expected_header.len() {
        return Err(DiskCacheError::corrupt_journal(
            path.to_path_buf(),
            "journal header is incomplete",
        ));
    }
    for (found, expected) in lines.iter().zip(expected_header.iter()) {
        if *found != expected.as_str() {
            return Err(DiskCacheError::corrupt_journal(
                path.to_path_buf(),
                format!(
                    "unexpected journal header: expected {:?}, found {:?}",
                    expected, found
                ),
            ));
        }
    }

    let records = lines[expected_header.len()..]
        .iter()
        .map(|line| Record::parse(line, value_count))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|message| DiskCacheError::corrupt_journal(path.to_path_buf(), message))?;

    Ok(ParsedJournal { records, truncated })
}
