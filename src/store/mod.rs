//! Backing Store
//!
//! The single physical store behind a stack: a sled database either at a file-system location
//! or in a temporary, ephemeral directory. Contexts never hold the handle directly; the
//! persisting context resolves it through the stack's `StoreSlot` on every fetch and save.

pub mod persistence;
pub mod provision;

pub use persistence::{ApplyOutcome, StoreHandle};
pub use provision::{destroy_store, open_store, provision_store};

use crate::error::StoreError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const IN_MEMORY_DISPLAY: &str = ":memory:";
const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Where a store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            StoreLocation::File(path) => Some(path),
            StoreLocation::InMemory => None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, StoreLocation::InMemory)
    }

    /// Path used in error reports
    pub fn display_path(&self) -> PathBuf {
        match self {
            StoreLocation::File(path) => path.clone(),
            StoreLocation::InMemory => PathBuf::from(IN_MEMORY_DISPLAY),
        }
    }
}

/// Journal side files that may sit next to a file-backed store
pub fn side_files(location: &Path) -> Vec<PathBuf> {
    SIDE_FILE_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut name = location.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Log-structured writes flushed in the background between saves
    #[default]
    WriteAheadLog,
    /// Compact on-disk layout, flushed only by explicit saves
    Synchronous,
}

impl JournalMode {
    pub(crate) fn sled_mode(self) -> sled::Mode {
        match self {
            JournalMode::WriteAheadLog => sled::Mode::HighThroughput,
            JournalMode::Synchronous => sled::Mode::LowSpace,
        }
    }

    pub(crate) fn flush_every_ms(self) -> Option<u64> {
        match self {
            JournalMode::WriteAheadLog => Some(500),
            JournalMode::Synchronous => None,
        }
    }
}

/// Options applied when a store is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    #[serde(default = "default_true")]
    pub automatic_migration: bool,

    #[serde(default = "default_true")]
    pub infer_mapping: bool,

    #[serde(default)]
    pub journal: JournalMode,
}

fn default_true() -> bool {
    true
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            automatic_migration: true,
            infer_mapping: true,
            journal: JournalMode::default(),
        }
    }
}

/// The stack's exclusively owned store handle, swapped wholesale on reset
#[derive(Default)]
pub(crate) struct StoreSlot {
    handle: RwLock<Option<StoreHandle>>,
}

impl StoreSlot {
    pub(crate) fn new(handle: StoreHandle) -> Self {
        Self {
            handle: RwLock::new(Some(handle)),
        }
    }

    pub(crate) fn get(&self) -> Result<StoreHandle, StoreError> {
        self.handle.read().clone().ok_or(StoreError::StoreUnavailable)
    }

    pub(crate) fn take(&self) -> Option<StoreHandle> {
        self.handle.write().take()
    }

    pub(crate) fn install(&self, handle: StoreHandle) {
        *self.handle.write() = Some(handle);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.handle.read().is_some()
    }
}
