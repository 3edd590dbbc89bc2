//! Batch-mode idempotency ledger.
//!
//! Batch runs over many files can crash partway; the ledger makes a rerun
//! cheap. It is an append-only JSONL file at `.axle/batch.jsonl` under the
//! batch root, one entry per successfully processed file:
//!
//! ```json
//! {"file":"notes/a.md","hash":"…","timestamp":"2025-11-02T09:14:03Z"}
//! ```
//!
//! The hash is `SHA-256(task ‖ 0x00 ‖ file-bytes)`, so an entry matches
//! only while both the task prompt and the file contents are unchanged;
//! edit either and the file is processed again. This is the only persisted
//! state in the library, and the graph scheduler never consults it.

use crate::Result;
use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory and file the ledger lives in, relative to the batch root.
const LEDGER_DIR: &str = ".axle";
const LEDGER_FILE: &str = "batch.jsonl";

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// File path as given to [`BatchLedger::record`]
    pub file: String,
    /// `hex(SHA-256(task ‖ 0x00 ‖ file-bytes))`
    pub hash: String,
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
}

/// Hash binding a task prompt to one file's exact contents.
pub fn task_file_hash(task: &str, file_bytes: &[u8]) -> String {
    let mut context = digest::Context::new(&digest::SHA256);
    context.update(task.as_bytes());
    context.update(&[0u8]);
    context.update(file_bytes);
    hex::encode(context.finish().as_ref())
}

/// Append-only idempotency ledger for batch runs.
#[derive(Debug)]
pub struct BatchLedger {
    path: PathBuf,
    seen: HashSet<(String, String)>,
}

impl BatchLedger {
    /// Open (or create) the ledger under `root/.axle/batch.jsonl`,
    /// loading existing entries.
    ///
    /// Unparseable lines are skipped rather than failing the whole run; a
    /// torn final line from a crash must not poison the ledger.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let dir = root.as_ref().join(LEDGER_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(LEDGER_FILE);

        let mut seen = HashSet::new();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<LedgerEntry>(line) {
                    seen.insert((entry.file, entry.hash));
                }
            }
        }

        Ok(Self { path, seen })
    }

    /// True when `(file, hash)` was recorded by an earlier run, meaning
    /// the file can be skipped.
    pub fn contains(&self, file: &str, hash: &str) -> bool {
        self.seen
            .contains(&(file.to_string(), hash.to_string()))
    }

    /// Convenience: hash `file_bytes` under `task` and check the ledger.
    pub fn is_processed(&self, task: &str, file: &str, file_bytes: &[u8]) -> bool {
        self.contains(file, &task_file_hash(task, file_bytes))
    }

    /// Record a successfully processed file. The entry is flushed to disk
    /// before this returns.
    pub fn record(&mut self, file: impl Into<String>, hash: impl Into<String>) -> Result<()> {
        let entry = LedgerEntry {
            file: file.into(),
            hash: hash.into(),
            timestamp: Utc::now(),
        };

        let mut handle = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(handle, "{}", serde_json::to_string(&entry)?)?;
        handle.flush()?;

        self.seen.insert((entry.file, entry.hash));
        Ok(())
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// The ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_depends_on_task_and_contents() {
        let base = task_file_hash("summarize", b"hello");
        assert_eq!(base, task_file_hash("summarize", b"hello"));
        assert_ne!(base, task_file_hash("translate", b"hello"));
        assert_ne!(base, task_file_hash("summarize", b"hello!"));
    }

    #[test]
    fn test_separator_prevents_boundary_collisions() {
        // task="ab", file="c" must not hash like task="a", file="bc".
        assert_ne!(task_file_hash("ab", b"c"), task_file_hash("a", b"bc"));
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let hash = task_file_hash("task", b"contents");

        let mut ledger = BatchLedger::open(dir.path()).unwrap();
        assert!(ledger.is_empty());
        ledger.record("f1.md", &hash).unwrap();
        assert!(ledger.contains("f1.md", &hash));

        // A second open sees the persisted entry.
        let reloaded = BatchLedger::open(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.is_processed("task", "f1.md", b"contents"));
        assert!(!reloaded.is_processed("task", "f1.md", b"changed"));
        assert!(!reloaded.is_processed("task", "f2.md", b"contents"));
    }

    #[test]
    fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let hash = task_file_hash("task", b"x");

        let mut ledger = BatchLedger::open(dir.path()).unwrap();
        ledger.record("good.md", &hash).unwrap();

        // Simulate a crash mid-append.
        let mut handle = std::fs::OpenOptions::new()
            .append(true)
            .open(ledger.path())
            .unwrap();
        write!(handle, "{{\"file\":\"torn").unwrap();
        drop(handle);

        let reloaded = BatchLedger::open(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("good.md", &hash));
    }
}
