use std::path::PathBuf;

use crate::{ObservedStatus, StepRecord};

/// Message handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl Report {
    /// Body: status, optional change note, key line (or heading), then the raw text.
    pub fn success(
        subject: &str,
        status: &ObservedStatus,
        change_note: Option<&str>,
        heading: &str,
    ) -> Self {
        let mut lines = vec![format!("Status: {}", status.category)];
        if let Some(note) = change_note {
            lines.push(note.to_string());
        }
        if !status.key_line.is_empty() {
            lines.push(String::new());
            lines.push(status.key_line.clone());
        } else if !heading.is_empty() {
            lines.push(String::new());
            lines.push(heading.to_string());
        }
        lines.push(format!("\n---\nRaw:\n{}", status.raw_text));

        Self {
            subject: subject.to_string(),
            body: lines.join("\n"),
            attachments: Vec::new(),
        }
    }

    pub fn failure(subject: &str, steps: &StepRecord, error: &str) -> Self {
        let mut body = String::from("[FAIL]\n");
        if !steps.is_empty() {
            body.push_str(&format!("Steps: {steps}\n"));
        }
        body.push_str(error);
        Self {
            subject: subject.to_string(),
            body,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, path: PathBuf) -> Self {
        self.attachments.push(path);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound channel for reports (mail, outbox, log).
pub trait Notifier: Send + Sync {
    fn send(&self, report: &Report) -> Result<(), NotifyError>;
}
