use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use wmar_core::{HistoryEntry, PersistedState, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Dir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists; create if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Dir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically replace `path` by writing a sibling temp file then renaming.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

/// State and history as pretty JSON files.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state_path: PathBuf,
    history_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(state_path: impl Into<PathBuf>, history_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            history_path: history_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            engine_debug!("No file at {:?}", path);
            return None;
        }
        Err(err) => {
            engine_warn!("Failed to read {:?}: {}", path, err);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            engine_warn!("Ignoring unparsable {:?}: {}", path, err);
            None
        }
    }
}

fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    what: &'static str,
) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value).map_err(|err| StoreError::Encode {
        what,
        message: err.to_string(),
    })?;
    write_atomic(path, &content).map_err(|err| StoreError::Write {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

impl StateStore for JsonFileStore {
    fn load_state(&self) -> Option<PersistedState> {
        read_json(&self.state_path)
    }

    fn save_state(&self, state: &PersistedState) -> Result<(), StoreError> {
        write_json(&self.state_path, state, "state")
    }

    fn load_history(&self) -> Vec<HistoryEntry> {
        read_json(&self.history_path).unwrap_or_default()
    }

    fn save_history(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        write_json(&self.history_path, entries, "history")
    }
}
