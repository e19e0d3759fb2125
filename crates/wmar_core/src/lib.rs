//! WMAR core: pure domain types, status classification and change tracking.
mod credentials;
mod report;
mod status;
mod steps;
mod tracker;

pub use credentials::{format_ssn, Credentials, CredentialsError};
pub use report::{Notifier, NotifyError, Report};
pub use status::{classify, Classification, ObservedStatus, StatusCategory, KEY_LINE_FALLBACK_CHARS};
pub use steps::StepRecord;
pub use tracker::{
    ChangeTracker, HistoryEntry, HistoryLog, MemoryStore, PersistedState, StateStore, StoreError,
    HISTORY_LIMIT, NO_CHANGE_NOTE,
};
