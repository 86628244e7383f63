//! Stable-storage hook for the persistent role state.
//!
//! The consensus core is an in-memory variant; durability is a hook point.
//! The peer calls `save_meta` after every `current_term`/`voted_for`
//! mutation and `save_log` after every log mutation, while still holding
//! the state lock and before the triggering RPC is answered. Deployments
//! that need crash recovery install [`FilePersister`]; everything else runs
//! with [`NullPersister`].

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::message::{Command, LogEntry};
use crate::types::{PeerId, Term};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The state that must survive a crash: current term, vote record, log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HardState<C> {
    pub current_term: Term,
    pub voted_for: Option<PeerId>,
    pub log: Vec<LogEntry<C>>,
}

impl<C> Default for HardState<C> {
    fn default() -> Self {
        Self {
            current_term: Term::default(),
            voted_for: None,
            log: Vec::new(),
        }
    }
}

/// Sink for the persistent role state.
///
/// Implementations must be durable before returning — answering an RPC
/// before its state change is persisted breaks crash-recovery safety.
pub trait Persister<C>: Send + Sync {
    fn save_meta(&self, term: Term, voted_for: Option<PeerId>) -> Result<(), PersistError>;

    fn save_log(&self, log: &[LogEntry<C>]) -> Result<(), PersistError>;

    /// Restore previously saved state, if any.
    fn load(&self) -> Result<Option<HardState<C>>, PersistError>;
}

/// The in-memory reference variant: nothing is persisted.
pub struct NullPersister;

impl<C> Persister<C> for NullPersister {
    fn save_meta(&self, _term: Term, _voted_for: Option<PeerId>) -> Result<(), PersistError> {
        Ok(())
    }

    fn save_log(&self, _log: &[LogEntry<C>]) -> Result<(), PersistError> {
        Ok(())
    }

    fn load(&self) -> Result<Option<HardState<C>>, PersistError> {
        Ok(None)
    }
}

/// Keeps the saved state in memory. Only useful in tests, where it lets
/// assertions see exactly what would have reached disk.
pub struct MemoryPersister<C> {
    saved: Mutex<HardState<C>>,
}

impl<C: Command> Default for MemoryPersister<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Command> MemoryPersister<C> {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(HardState::default()),
        }
    }

    pub fn saved(&self) -> HardState<C> {
        self.saved.lock().clone()
    }
}

impl<C: Command> Persister<C> for MemoryPersister<C> {
    fn save_meta(&self, term: Term, voted_for: Option<PeerId>) -> Result<(), PersistError> {
        let mut saved = self.saved.lock();
        saved.current_term = term;
        saved.voted_for = voted_for;
        Ok(())
    }

    fn save_log(&self, log: &[LogEntry<C>]) -> Result<(), PersistError> {
        self.saved.lock().log = log.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Option<HardState<C>>, PersistError> {
        Ok(Some(self.saved.lock().clone()))
    }
}

#[derive(Serialize, Deserialize)]
struct Meta {
    current_term: Term,
    voted_for: Option<PeerId>,
}

/// Disk-backed persister. State lives in two files inside `dir`:
///   meta.json  — current term and voted_for, written atomically via rename
///   log.jsonl  — one JSON object per log entry, one entry per line
///
/// The log file is rewritten in full on every save; the hook hands over the
/// whole log, so there is no incremental path.
pub struct FilePersister {
    dir: PathBuf,
}

impl FilePersister {
    /// Open (or create) storage rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, PersistError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.jsonl")
    }

    /// Write `bytes` to `path` atomically: temp file → fsync → rename →
    /// fsync dir, so a crash never leaves a torn file behind.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl<C: Command> Persister<C> for FilePersister {
    fn save_meta(&self, term: Term, voted_for: Option<PeerId>) -> Result<(), PersistError> {
        let meta = Meta {
            current_term: term,
            voted_for,
        };
        self.write_atomic(&self.meta_path(), &serde_json::to_vec(&meta)?)
    }

    fn save_log(&self, log: &[LogEntry<C>]) -> Result<(), PersistError> {
        let mut bytes = Vec::new();
        for entry in log {
            serde_json::to_writer(&mut bytes, entry)?;
            bytes.push(b'\n');
        }
        self.write_atomic(&self.log_path(), &bytes)
    }

    fn load(&self) -> Result<Option<HardState<C>>, PersistError> {
        let meta_path = self.meta_path();
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta: Meta = serde_json::from_slice(&fs::read(&meta_path)?)?;

        let mut log = Vec::new();
        let log_path = self.log_path();
        if log_path.exists() {
            for line in fs::read_to_string(&log_path)?.lines() {
                if line.is_empty() {
                    continue;
                }
                log.push(serde_json::from_str(line)?);
            }
        }

        Ok(Some(HardState {
            current_term: meta.current_term,
            voted_for: meta.voted_for,
            log,
        }))
    }
}
