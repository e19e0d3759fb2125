//! One scheduled check: engines in order, change tracking, one report.
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use engine_logging::{engine_error, engine_info, engine_warn};
use wmar_core::{
    ChangeTracker, Credentials, Notifier, ObservedStatus, PersistedState, Report, StepRecord,
};

use crate::diagnostics::DiagnosticSink;
use crate::navigator::{ExtractedPage, FlowError, FlowNavigator, FlowOutcome};
use crate::page::{BrowserEngine, BrowserError, Page, PageLauncher};

pub const DEFAULT_SUBJECT: &str = "WMAR — amended return (daily)";

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Constant across runs so notifications thread together.
    pub subject: String,
    /// Tried in order; each gets one attempt.
    pub engines: Vec<BrowserEngine>,
    pub result_screenshot: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            engines: vec![BrowserEngine::Chromium, BrowserEngine::Firefox],
            result_screenshot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Reported {
        engine: BrowserEngine,
        status: ObservedStatus,
        change_note: Option<&'static str>,
        steps: StepRecord,
    },
    /// Submission disabled; nothing was classified or sent.
    StoppedAfterFill {
        engine: BrowserEngine,
        steps: StepRecord,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all browser engines failed; last error: {source}")]
pub struct MonitorError {
    pub steps: StepRecord,
    pub source: FlowError,
}

pub struct Monitor {
    settings: MonitorSettings,
    launcher: Arc<dyn PageLauncher>,
    navigator: FlowNavigator,
    tracker: Option<ChangeTracker>,
    notifier: Arc<dyn Notifier>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        launcher: Arc<dyn PageLauncher>,
        navigator: FlowNavigator,
        notifier: Arc<dyn Notifier>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            settings,
            launcher,
            navigator,
            tracker: None,
            notifier,
            diagnostics,
        }
    }

    /// Enable change tracking against persisted state.
    pub fn with_tracker(mut self, tracker: ChangeTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub async fn run(&self, creds: &Credentials) -> Result<RunOutcome, MonitorError> {
        // Read before any attempt so a failed run leaves it untouched.
        let previous = self.tracker.as_ref().and_then(ChangeTracker::load_previous);

        let mut last: Option<(StepRecord, FlowError)> = None;
        for &engine in &self.settings.engines {
            engine_info!("Starting run with {}", engine);
            let mut steps = StepRecord::new();
            steps.push(format!("engine:{engine}"));

            let page = match self.launcher.launch(engine).await {
                Ok(page) => page,
                Err(err) => {
                    engine_warn!("{} unavailable: {}", engine, err);
                    steps.push(format!("failed: {err}"));
                    last = Some((steps, FlowError::Browser(err)));
                    continue;
                }
            };

            let result = self.navigator.run(page.as_ref(), creds, &mut steps).await;
            let screenshot = match &result {
                Ok(FlowOutcome::Extracted(_)) if self.settings.result_screenshot => {
                    self.result_screenshot(page.as_ref()).await
                }
                _ => None,
            };
            if let Err(err) = page.close().await {
                engine_warn!("closing {} page: {}", engine, err);
            }

            match result {
                Ok(FlowOutcome::Extracted(extracted)) => {
                    let (status, change_note) =
                        self.record(&extracted, previous.as_ref(), screenshot);
                    return Ok(RunOutcome::Reported {
                        engine,
                        status,
                        change_note,
                        steps,
                    });
                }
                Ok(FlowOutcome::StoppedAfterFill) => {
                    engine_info!("Form filled, submission disabled; no report sent");
                    return Ok(RunOutcome::StoppedAfterFill { engine, steps });
                }
                Err(err) => {
                    engine_warn!("{} run failed: {}", engine, err);
                    last = Some((steps, err));
                }
            }
        }

        let (steps, source) = last.unwrap_or_else(|| {
            (
                StepRecord::new(),
                FlowError::Browser(BrowserError::Session(
                    "no browser engines configured".to_string(),
                )),
            )
        });
        engine_error!("All engines failed: {}", source);
        let report = Report::failure(&self.settings.subject, &steps, &source.to_string());
        self.notify(&report);
        Err(MonitorError { steps, source })
    }

    async fn result_screenshot(&self, page: &dyn Page) -> Option<PathBuf> {
        let tag = format!("result-{}", Utc::now().timestamp_millis());
        self.diagnostics.screenshot(page, &tag).await
    }

    fn record(
        &self,
        extracted: &ExtractedPage,
        previous: Option<&PersistedState>,
        screenshot: Option<PathBuf>,
    ) -> (ObservedStatus, Option<&'static str>) {
        let status =
            ObservedStatus::from_text(extracted.text.as_str(), Utc::now().timestamp_millis());
        engine_info!("Status: {} :: {}", status.category, status.key_line);

        let change_note = match &self.tracker {
            Some(tracker) => {
                let note = ChangeTracker::compare(&status, previous);
                if let Err(err) = tracker.commit(&status) {
                    engine_warn!("Could not persist state: {}", err);
                }
                note
            }
            None => None,
        };

        let mut report = Report::success(
            &self.settings.subject,
            &status,
            change_note,
            &extracted.heading,
        );
        if let Some(path) = screenshot {
            report = report.with_attachment(path);
        }
        self.notify(&report);
        (status, change_note)
    }

    fn notify(&self, report: &Report) {
        match self.notifier.send(report) {
            Ok(()) => engine_info!("Report sent: {}", report.subject),
            Err(err) => engine_warn!("{}", err),
        }
    }
}
