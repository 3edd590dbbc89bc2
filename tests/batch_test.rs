//! Batch-resume behavior of the idempotency ledger.

use axle::{task_file_hash, BatchLedger};

const TASK: &str = "Summarize each file into one paragraph.";

struct Corpus {
    files: Vec<(&'static str, Vec<u8>)>,
}

impl Corpus {
    fn new() -> Self {
        Self {
            files: vec![
                ("f1.md", b"alpha contents".to_vec()),
                ("f2.md", b"beta contents".to_vec()),
                ("f3.md", b"gamma contents".to_vec()),
            ],
        }
    }

    fn pending<'a>(&'a self, ledger: &'a BatchLedger) -> Vec<&'a str> {
        self.files
            .iter()
            .filter(|(name, bytes)| !ledger.is_processed(TASK, name, bytes))
            .map(|(name, _)| *name)
            .collect()
    }
}

#[test]
fn test_resume_skips_completed_files() {
    // S6: first run succeeds on f1 and f2, then crashes before f3.
    let dir = tempfile::tempdir().unwrap();
    let corpus = Corpus::new();

    {
        let mut ledger = BatchLedger::open(dir.path()).unwrap();
        assert_eq!(corpus.pending(&ledger), vec!["f1.md", "f2.md", "f3.md"]);

        for (name, bytes) in corpus.files.iter().take(2) {
            ledger.record(*name, task_file_hash(TASK, bytes)).unwrap();
        }
        // Crash here: f3 never recorded.
    }

    // Second run with identical task and contents attempts only f3.
    let ledger = BatchLedger::open(dir.path()).unwrap();
    assert_eq!(corpus.pending(&ledger), vec!["f3.md"]);
}

#[test]
fn test_changed_contents_reprocess_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut corpus = Corpus::new();

    {
        let mut ledger = BatchLedger::open(dir.path()).unwrap();
        for (name, bytes) in &corpus.files {
            ledger.record(*name, task_file_hash(TASK, bytes)).unwrap();
        }
    }

    // f1 is edited between runs; only f1 is pending again.
    corpus.files[0].1 = b"alpha contents, revised".to_vec();
    let ledger = BatchLedger::open(dir.path()).unwrap();
    assert_eq!(corpus.pending(&ledger), vec!["f1.md"]);
}

#[test]
fn test_changed_task_reprocesses_everything() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = Corpus::new();

    {
        let mut ledger = BatchLedger::open(dir.path()).unwrap();
        for (name, bytes) in &corpus.files {
            ledger.record(*name, task_file_hash(TASK, bytes)).unwrap();
        }
    }

    let ledger = BatchLedger::open(dir.path()).unwrap();
    assert!(corpus.pending(&ledger).is_empty());

    let retasked: Vec<&str> = corpus
        .files
        .iter()
        .filter(|(name, bytes)| !ledger.is_processed("Translate instead.", name, bytes))
        .map(|(name, _)| *name)
        .collect();
    assert_eq!(retasked, vec!["f1.md", "f2.md", "f3.md"]);
}
