//! Hand-off points for finished reports.
use std::path::PathBuf;

use chrono::Utc;
use engine_logging::engine_info;
use serde::Serialize;
use wmar_core::{Notifier, NotifyError, Report, StepRecord};
use wmar_engine::persist::write_atomic;
use wmar_engine::DEFAULT_SUBJECT;

/// Writes each report to the log; used when no outbox is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, report: &Report) -> Result<(), NotifyError> {
        engine_info!("REPORT :: {}\n{}", report.subject, report.body);
        for attachment in &report.attachments {
            engine_info!("REPORT attachment: {}", attachment.display());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxMessage<'a> {
    subject: &'a str,
    body: &'a str,
    attachments: Vec<String>,
}

/// Drops `<epoch millis>.json` files into a directory for an external mailer.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Notifier for OutboxNotifier {
    fn send(&self, report: &Report) -> Result<(), NotifyError> {
        let message = OutboxMessage {
            subject: &report.subject,
            body: &report.body,
            attachments: report
                .attachments
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        };
        let content = serde_json::to_string_pretty(&message)
            .map_err(|err| NotifyError(format!("encoding report: {err}")))?;

        let path = self
            .dir
            .join(format!("{}.json", Utc::now().timestamp_millis()));
        write_atomic(&path, &content)
            .map_err(|err| NotifyError(format!("writing {}: {err}", path.display())))?;
        engine_info!("Report queued at {}", path.display());
        Ok(())
    }
}

/// Failure report for a run whose configuration could not be read.
///
/// Only `MAIL_SUBJECT` and `OUTBOX_DIR` are consulted, so a bad value
/// anywhere else still reaches the operator.
pub fn notify_config_failure<F>(lookup: F, message: &str) -> Result<(), NotifyError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let subject = get("MAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
    let report = Report::failure(&subject, &StepRecord::new(), message);
    match get("OUTBOX_DIR") {
        Some(dir) => OutboxNotifier::new(dir).send(&report),
        None => LogNotifier.send(&report),
    }
}
