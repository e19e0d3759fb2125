use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use engine_logging::{engine_debug, engine_info, engine_warn};
use serde::{Deserialize, Serialize};

use crate::{ObservedStatus, StatusCategory};

/// Annotation added to a report when nothing changed since the last successful run.
pub const NO_CHANGE_NOTE: &str = "No change since yesterday.";

/// Number of history entries retained.
pub const HISTORY_LIMIT: usize = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(rename = "status")]
    pub category: StatusCategory,
    #[serde(rename = "keyLine")]
    pub key_line: String,
    #[serde(rename = "ts")]
    pub observed_at_epoch_millis: i64,
}

impl From<&ObservedStatus> for PersistedState {
    fn from(status: &ObservedStatus) -> Self {
        Self {
            category: status.category,
            key_line: status.key_line.clone(),
            observed_at_epoch_millis: status.observed_at_epoch_millis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "ts")]
    pub observed_at_epoch_millis: i64,
    #[serde(rename = "status")]
    pub category: StatusCategory,
    #[serde(rename = "keyLine")]
    pub key_line: String,
}

impl From<&ObservedStatus> for HistoryEntry {
    fn from(status: &ObservedStatus) -> Self {
        Self {
            observed_at_epoch_millis: status.observed_at_epoch_millis,
            category: status.category,
            key_line: status.key_line.clone(),
        }
    }
}

/// Bounded audit trail; the oldest entries are evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    /// Rebuild a log from stored entries, keeping only the most recent `limit`.
    pub fn from_entries(entries: Vec<HistoryEntry>, limit: usize) -> Self {
        let mut log = Self::new(limit);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },
    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },
}

/// Durable storage for the last observed state and the history log.
///
/// Loads never fail: absence or corruption reads as "nothing stored".
pub trait StateStore: Send + Sync {
    fn load_state(&self) -> Option<PersistedState>;
    fn save_state(&self, state: &PersistedState) -> Result<(), StoreError>;
    fn load_history(&self) -> Vec<HistoryEntry>;
    fn save_history(&self, entries: &[HistoryEntry]) -> Result<(), StoreError>;
}

/// In-memory store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> Option<PersistedState> {
        self.state.lock().map(|s| s.clone()).unwrap_or(None)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl StateStore for MemoryStore {
    fn load_state(&self) -> Option<PersistedState> {
        self.state()
    }

    fn save_state(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state.clone());
        }
        Ok(())
    }

    fn load_history(&self) -> Vec<HistoryEntry> {
        self.history()
    }

    fn save_history(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.history.lock() {
            *slot = entries.to_vec();
        }
        Ok(())
    }
}

/// Compares observations against the last successful run and records new ones.
#[derive(Clone)]
pub struct ChangeTracker {
    store: Arc<dyn StateStore>,
    history_limit: usize,
}

impl ChangeTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            history_limit: HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn load_previous(&self) -> Option<PersistedState> {
        let previous = self.store.load_state();
        match &previous {
            Some(state) => engine_debug!("Previous state: {} ({})", state.category, state.key_line),
            None => engine_debug!("No previous state"),
        }
        previous
    }

    /// `Some(NO_CHANGE_NOTE)` iff category and key line are byte-equal to the previous run.
    pub fn compare(
        current: &ObservedStatus,
        previous: Option<&PersistedState>,
    ) -> Option<&'static str> {
        match previous {
            Some(prev) if prev.category == current.category && prev.key_line == current.key_line => {
                Some(NO_CHANGE_NOTE)
            }
            _ => None,
        }
    }

    /// Persist `current` as the new state and append it to the history log.
    ///
    /// Only call this after a successful run.
    pub fn commit(&self, current: &ObservedStatus) -> Result<(), StoreError> {
        self.store.save_state(&PersistedState::from(current))?;

        let mut history = HistoryLog::from_entries(self.store.load_history(), self.history_limit);
        history.push(HistoryEntry::from(current));
        if let Err(err) = self.store.save_history(&history.to_vec()) {
            engine_warn!("Failed to save history: {}", err);
        }
        engine_info!(
            "Recorded status {} (history {} / {})",
            current.category,
            history.len(),
            history.limit()
        );
        Ok(())
    }
}
