//! Durable client-side slot for the draft id.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::warn;

use crate::store::DraftId;

/// One string under a fixed key: read at startup, written once on creation.
pub trait DraftIdStorage: Send + Sync {
    fn read(&self) -> Option<DraftId>;
    fn write(&self, id: &DraftId) -> io::Result<()>;
}

/// Keeps the id in a file so a restart rehydrates the same draft.
#[derive(Debug, Clone)]
pub struct FileIdStorage {
    path: PathBuf,
}

impl FileIdStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DraftIdStorage for FileIdStorage {
    fn read(&self) -> Option<DraftId> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => DraftId::new(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read stored draft id");
                None
            }
        }
    }

    // Write-then-rename so a crash never leaves a half-written id behind.
    fn write(&self, id: &DraftId) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(id.as_str().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Non-durable storage for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryIdStorage {
    slot: Mutex<Option<DraftId>>,
}

impl MemoryIdStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: DraftId) -> Self {
        Self {
            slot: Mutex::new(Some(id)),
        }
    }
}

impl DraftIdStorage for MemoryIdStorage {
    fn read(&self) -> Option<DraftId> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn write(&self, id: &DraftId) -> io::Result<()> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(id.clone());
        Ok(())
    }
}
