//! # raft-storage
//!
//! why: provide durable persistence for the replicated log using standard rust fs apis
//! relations: written by raft-runtime when a leader appends, read once when a node is constructed
//! what: Storage trait, FileStorage (json lines) implementation, InMemoryStorage for testing

use parking_lot::Mutex;
use raft_core::LogEntry;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// trait for durable storage of the raft log
///
/// this abstraction allows the same node code to work with:
/// - real filesystem (native)
/// - in-memory (testing)
pub trait Storage: Send {
    /// append entries to the log, in order
    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()>;

    /// load all log entries (for crash recovery); empty when nothing was persisted
    fn load_log(&self) -> io::Result<Vec<LogEntry>>;

    /// drop every entry at position `from` and beyond (log overwritten by a leader)
    fn truncate_log_from(&mut self, from: usize) -> io::Result<()>;

    /// clear all persisted state
    fn clear(&mut self) -> io::Result<()>;
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores the log in `<dir>/log.jsonl`, one json-encoded entry per line.
/// appends never rewrite earlier lines.
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// get the path to the log file
    fn log_path(&self) -> PathBuf {
        self.dir.join("log.jsonl")
    }
}

impl Storage for FileStorage {
    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }

        // one write per batch so a crash leaves at most a torn last line
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        file.write_all(&buf)?;
        file.sync_all()?;

        tracing::trace!(path = %self.log_path().display(), count = entries.len(), "appended log entries");
        Ok(())
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut log = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}:{}: {}", path.display(), number + 1, e),
                )
            })?;
            log.push(entry);
        }

        Ok(log)
    }

    fn truncate_log_from(&mut self, from: usize) -> io::Result<()> {
        let mut log = self.load_log()?;
        if from >= log.len() {
            return Ok(());
        }
        log.truncate(from);

        let mut buf = Vec::new();
        for entry in &log {
            serde_json::to_writer(&mut buf, entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }

        // rewrite via rename so a crash keeps either the old or the new log
        let temp_path = self.dir.join("log.jsonl.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.log_path())?;

        tracing::trace!(path = %self.log_path().display(), kept = from, "truncated log");
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        match fs::remove_file(self.log_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// clones share the same entries, so a test can keep a handle while a node
/// owns another. no persistence across process restarts.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    log: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// create a storage that already holds `entries`
    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            log: Arc::new(Mutex::new(entries)),
        }
    }
}

impl Storage for InMemoryStorage {
    fn append_entries(&mut self, entries: &[LogEntry]) -> io::Result<()> {
        self.log.lock().extend(entries.iter().cloned());
        Ok(())
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        Ok(self.log.lock().clone())
    }

    fn truncate_log_from(&mut self, from: usize) -> io::Result<()> {
        self.log.lock().truncate(from);
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.log.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_storage_appends_and_loads_log() {
        let mut storage = InMemoryStorage::new();

        let entries = vec![LogEntry::new(0, "a"), LogEntry::new(1, "b")];
        storage.append_entries(&entries).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log, entries);
    }

    #[test]
    fn in_memory_clones_share_entries() {
        let handle = InMemoryStorage::new();
        let mut owned = handle.clone();

        owned.append_entries(&[LogEntry::new(0, "a")]).unwrap();

        assert_eq!(handle.load_log().unwrap().len(), 1);
    }

    #[test]
    fn file_storage_appends_and_loads_log() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let entries = vec![
            LogEntry::new(0, "set key1 value1"),
            LogEntry::new(1, "set key2 value2"),
        ];
        storage.append_entries(&entries).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log, entries);
    }

    #[test]
    fn file_storage_survives_restart() {
        let dir = tempdir().unwrap();
        let entries = vec![LogEntry::new(0, "command")];

        // first "session"
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.append_entries(&entries).unwrap();
        }

        // "restart" - new storage instance
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            assert_eq!(storage.load_log().unwrap(), entries);
        }
    }

    #[test]
    fn file_storage_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("fresh")).unwrap();
        assert!(storage.load_log().unwrap().is_empty());
    }
}
