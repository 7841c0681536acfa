//! # comprehensive storage tests
//!
//! why: verify all storage scenarios work correctly
//! relations: tests raft-storage crate
//! what: persistence, crash recovery, round-trip fidelity, corruption, edge cases

use chrono::{TimeZone, Utc};
use raft_core::LogEntry;
use raft_storage::{FileStorage, InMemoryStorage, Storage};
use std::fs;
use std::io;
use tempfile::tempdir;

fn sample_entries() -> Vec<LogEntry> {
    vec![
        LogEntry::with_timestamp(0, "noop", Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()),
        LogEntry::with_timestamp(1, "SET a 1", Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 1).unwrap()),
        LogEntry::with_timestamp(
            2,
            "operation with | pipes, commas and \"quotes\"",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 2).unwrap(),
        ),
    ]
}

// =============================================================================
// SECTION 1: IN-MEMORY STORAGE TESTS
// =============================================================================

mod in_memory {
    use super::*;

    #[test]
    fn new_storage_has_empty_log() {
        let storage = InMemoryStorage::new();
        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn append_in_batches_preserves_order() {
        let mut storage = InMemoryStorage::new();
        let entries = sample_entries();

        storage.append_entries(&entries[..1]).unwrap();
        storage.append_entries(&entries[1..]).unwrap();

        assert_eq!(storage.load_log().unwrap(), entries);
    }

    #[test]
    fn append_empty_entries() {
        let mut storage = InMemoryStorage::new();

        storage.append_entries(&[]).unwrap();

        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn seeded_storage_returns_seed() {
        let storage = InMemoryStorage::with_entries(sample_entries());
        assert_eq!(storage.load_log().unwrap(), sample_entries());
    }

    #[test]
    fn clear_removes_everything() {
        let mut storage = InMemoryStorage::with_entries(sample_entries());

        storage.clear().unwrap();

        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn sample_entries_are_stable() {
        assert_eq!(sample_entries(), sample_entries());
    }

    #[test]
    fn truncate_keeps_prefix() {
        let mut storage = InMemoryStorage::with_entries(sample_entries());

        storage.truncate_log_from(1).unwrap();

        assert_eq!(storage.load_log().unwrap(), sample_entries()[..1].to_vec());
    }

    #[test]
    fn usable_as_trait_object() {
        let mut storage: Box<dyn Storage> = Box::new(InMemoryStorage::new());
        storage.append_entries(&sample_entries()).unwrap();
        assert_eq!(storage.load_log().unwrap().len(), 3);
    }
}

// =============================================================================
// SECTION 2: FILE STORAGE TESTS
// =============================================================================

mod file_storage {
    use super::*;

    #[test]
    fn new_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let storage = FileStorage::new(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(storage.dir(), nested.as_path());
    }

    #[test]
    fn round_trip_preserves_entries_and_timestamps() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        let entries = sample_entries();

        storage.append_entries(&entries).unwrap();

        assert_eq!(storage.load_log().unwrap(), entries);
    }

    #[test]
    fn appends_accumulate_across_calls() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        let entries = sample_entries();

        for entry in &entries {
            storage.append_entries(std::slice::from_ref(entry)).unwrap();
        }

        assert_eq!(storage.load_log().unwrap(), entries);
    }

    #[test]
    fn append_empty_does_not_create_file() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.append_entries(&[]).unwrap();

        assert!(!dir.path().join("log.jsonl").exists());
        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn one_line_per_entry() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.append_entries(&sample_entries()).unwrap();

        let contents = fs::read_to_string(dir.path().join("log.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.append_entries(&sample_entries()[..1]).unwrap();

        let path = dir.path().join("log.jsonl");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("\n   \n");
        fs::write(&path, contents).unwrap();

        assert_eq!(storage.load_log().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_line_is_invalid_data() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.append_entries(&sample_entries()[..1]).unwrap();

        let path = dir.path().join("log.jsonl");
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("0 | noop | 2024-01-01T12:00:00Z\n");
        fs::write(&path, contents).unwrap();

        let err = storage.load_log().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn truncate_rewrites_file() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        let entries = sample_entries();
        storage.append_entries(&entries).unwrap();

        storage.truncate_log_from(1).unwrap();

        assert_eq!(storage.load_log().unwrap(), entries[..1].to_vec());
        let contents = fs::read_to_string(dir.path().join("log.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(!dir.path().join("log.jsonl.tmp").exists());
    }

    #[test]
    fn truncate_then_append_continues_from_prefix() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        let entries = sample_entries();
        storage.append_entries(&entries).unwrap();

        storage.truncate_log_from(0).unwrap();
        storage.append_entries(&entries[2..]).unwrap();

        assert_eq!(storage.load_log().unwrap(), entries[2..].to_vec());
    }

    #[test]
    fn truncate_past_end_is_noop() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.append_entries(&sample_entries()).unwrap();

        storage.truncate_log_from(10).unwrap();
        assert_eq!(storage.load_log().unwrap().len(), 3);

        let mut empty = FileStorage::new(dir.path().join("fresh")).unwrap();
        empty.truncate_log_from(0).unwrap();
        assert!(empty.load_log().unwrap().is_empty());
    }

    #[test]
    fn clear_then_reload_is_empty() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.append_entries(&sample_entries()).unwrap();

        storage.clear().unwrap();

        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn clear_without_file_is_ok() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        assert!(storage.clear().is_ok());
    }
}

// =============================================================================
// SECTION 3: CRASH RECOVERY
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn restart_sees_every_session() {
        let dir = tempdir().unwrap();
        let entries = sample_entries();

        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.append_entries(&entries[..2]).unwrap();
        }
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.append_entries(&entries[2..]).unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.load_log().unwrap(), entries);
    }

    #[test]
    fn separate_directories_are_isolated() {
        let dir = tempdir().unwrap();
        let mut a = FileStorage::new(dir.path().join("node-1")).unwrap();
        let b = FileStorage::new(dir.path().join("node-2")).unwrap();

        a.append_entries(&sample_entries()).unwrap();

        assert_eq!(a.load_log().unwrap().len(), 3);
        assert!(b.load_log().unwrap().is_empty());
    }
}
