//! Wiring for the `wmar` binary: environment configuration and notifiers.
pub mod config;
pub mod notify;

pub use config::{AppConfig, ConfigError};
pub use notify::{notify_config_failure, LogNotifier, OutboxNotifier};
