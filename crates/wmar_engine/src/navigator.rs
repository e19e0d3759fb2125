//! Drives Landing -> Credentials -> (YearSelect) -> Result.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_debug, engine_info, engine_warn};
use wmar_core::{Credentials, StepRecord};

use crate::diagnostics::DiagnosticSink;
use crate::filler::{credential_fields, FieldFiller, FillError, FillTimeouts};
use crate::locator::{ContextPredicate, DocumentLocator};
use crate::page::{BrowserError, LoadState, Page, Pattern, Query, RenderContext, Role};
use crate::wait::{pause, poll_until};

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub entry_url: String,
    pub shared_secrets_url: String,
    /// Name of the landing-page link that leads into the workflow.
    pub landing_link: Pattern,
    pub year_select_marker: String,
    pub service_unavailable_marker: String,
    pub result_marker: String,
    pub tax_year: u16,
    /// When false, stop once the credentials form is filled.
    pub submit: bool,
    pub verify_delay: Duration,
    pub pause_before_year: Duration,
    pub pause_after_year: Duration,
    pub slow_flow: Duration,
    pub form_attempts: u32,
    pub first_form_timeout: Duration,
    pub retry_form_timeout: Duration,
    pub load_timeout: Duration,
    pub year_context_timeout: Duration,
    pub heading_timeout: Duration,
    pub result_timeout: Duration,
    pub poll_interval: Duration,
    pub fill: FillTimeouts,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            entry_url: "https://sa.www4.irs.gov/wmar/".to_string(),
            shared_secrets_url: "https://sa.www4.irs.gov/wmar/sharedSecrets".to_string(),
            landing_link: Pattern::ci("Where.s My Amended Return"),
            year_select_marker: "/selectTaxYear".to_string(),
            service_unavailable_marker: "/serviceUnavailable".to_string(),
            result_marker: "/wmar/returnStatus".to_string(),
            tax_year: 2023,
            submit: true,
            verify_delay: Duration::ZERO,
            pause_before_year: Duration::ZERO,
            pause_after_year: Duration::ZERO,
            slow_flow: Duration::ZERO,
            form_attempts: 3,
            first_form_timeout: Duration::from_millis(4000),
            retry_form_timeout: Duration::from_millis(8000),
            load_timeout: Duration::from_secs(30),
            year_context_timeout: Duration::from_secs(10),
            heading_timeout: Duration::from_secs(10),
            result_timeout: Duration::from_secs(70),
            poll_interval: DocumentLocator::DEFAULT_POLL_INTERVAL,
            fill: FillTimeouts::default(),
        }
    }
}

/// Active states. The terminal states are the two sides of [`FlowNavigator::run`]'s
/// result: `Ok` is Done, `Err` is Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Landing,
    Credentials,
    YearSelect,
    Result,
}

/// Text read from the terminal result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub url: String,
    pub heading: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Extracted(ExtractedPage),
    /// Submission disabled; the form was filled and left as is.
    StoppedAfterFill,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("could not find form after {attempts} attempts")]
    FormNotFound { attempts: u32 },
    #[error("form found but not filled: {0}")]
    Fill(FillError),
    #[error("could not submit the form: {0}")]
    Submit(BrowserError),
    #[error("could not select tax year {year}")]
    YearNotSelected { year: u16 },
    #[error("result page not reached within {timeout:?} (last url: {last_url})")]
    ResultNotReached { timeout: Duration, last_url: String },
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

enum Transition {
    Next(FlowState),
    Finish(FlowOutcome),
}

pub struct FlowNavigator {
    settings: FlowSettings,
    locator: DocumentLocator,
    filler: FieldFiller,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl FlowNavigator {
    pub fn new(settings: FlowSettings, diagnostics: Arc<dyn DiagnosticSink>) -> Self {
        let locator = DocumentLocator::new(settings.poll_interval);
        let filler = FieldFiller::standard(&settings.fill);
        Self {
            settings,
            locator,
            filler,
            diagnostics,
        }
    }

    pub fn with_filler(mut self, filler: FieldFiller) -> Self {
        self.filler = filler;
        self
    }

    /// Run the flow to a terminal state. On failure a diagnostic snapshot is
    /// captured and the triggering error is returned.
    pub async fn run(
        &self,
        page: &dyn Page,
        creds: &Credentials,
        steps: &mut StepRecord,
    ) -> Result<FlowOutcome, FlowError> {
        match self.drive(page, creds, steps).await {
            Ok(outcome) => {
                engine_info!("SUCCESS :: {}", steps);
                Ok(outcome)
            }
            Err(err) => {
                engine_warn!("FAILED :: {} ({})", err, steps);
                steps.push(format!("failed: {err}"));
                let tag = format!("failure-{}", Utc::now().timestamp_millis());
                self.diagnostics.capture(page, &tag).await;
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        page: &dyn Page,
        creds: &Credentials,
        steps: &mut StepRecord,
    ) -> Result<FlowOutcome, FlowError> {
        let mut state = FlowState::Landing;
        loop {
            engine_debug!("flow state {:?}", state);
            let transition = match state {
                FlowState::Landing => {
                    self.landing(page, steps).await?;
                    Transition::Next(FlowState::Credentials)
                }
                FlowState::Credentials => {
                    if !self.credentials(page, creds, steps).await? {
                        Transition::Finish(FlowOutcome::StoppedAfterFill)
                    } else if self.url_contains(page, &self.settings.year_select_marker).await {
                        Transition::Next(FlowState::YearSelect)
                    } else {
                        Transition::Next(FlowState::Result)
                    }
                }
                FlowState::YearSelect => {
                    self.year_select(page, steps).await?;
                    Transition::Next(FlowState::Result)
                }
                FlowState::Result => {
                    Transition::Finish(FlowOutcome::Extracted(self.result(page, steps).await?))
                }
            };
            match transition {
                Transition::Next(next) => state = next,
                Transition::Finish(outcome) => return Ok(outcome),
            }
        }
    }

    async fn step(&self, page: &dyn Page, steps: &mut StepRecord, step: impl Into<String>) {
        let step = step.into();
        let url = page.current_url().await.unwrap_or_default();
        engine_info!("STEP: {} URL: {}", step, url);
        steps.push(step);
    }

    async fn url_contains(&self, page: &dyn Page, marker: &str) -> bool {
        page.current_url()
            .await
            .map(|url| url.contains(marker))
            .unwrap_or(false)
    }

    async fn landing(&self, page: &dyn Page, steps: &mut StepRecord) -> Result<(), FlowError> {
        self.step(page, steps, "goto:/wmar").await;
        page.goto(&self.settings.entry_url, LoadState::NetworkIdle)
            .await?;
        pause(self.settings.slow_flow).await;

        // Some entry points already land on the workflow.
        let link = Query::role(Role::Link, Some(self.settings.landing_link.clone()));
        if page.is_visible(RenderContext::Top, &link).await.unwrap_or(false) {
            self.step(page, steps, "follow-landing-link").await;
            match page.click(RenderContext::Top, &link, false).await {
                Ok(()) => {
                    if let Err(err) = page
                        .wait_for_load(LoadState::NetworkIdle, self.settings.load_timeout)
                        .await
                    {
                        engine_warn!("landing link load: {}", err);
                    }
                }
                Err(err) => engine_warn!("landing link click failed: {}", err),
            }
        }
        Ok(())
    }

    /// Returns false when submission is disabled and the flow stops after filling.
    async fn credentials(
        &self,
        page: &dyn Page,
        creds: &Credentials,
        steps: &mut StepRecord,
    ) -> Result<bool, FlowError> {
        let fields = credential_fields(creds);
        let form = ContextPredicate::at_least(Query::InputLike, 3);
        let attempts = self.settings.form_attempts;
        let mut fill_failure = None;

        for attempt in 1..=attempts {
            self.step(
                page,
                steps,
                format!("goto:/wmar/sharedSecrets (attempt {attempt})"),
            )
            .await;
            // Retries usually follow a slow render, so later attempts wait longer.
            let (wait, timeout) = if attempt == 1 {
                (LoadState::DomContentLoaded, self.settings.first_form_timeout)
            } else {
                (LoadState::NetworkIdle, self.settings.retry_form_timeout)
            };
            if let Err(err) = page.goto(&self.settings.shared_secrets_url, wait).await {
                engine_warn!("attempt {}: navigation failed: {}", attempt, err);
                self.diagnostics
                    .capture(page, &format!("noform-a{attempt}"))
                    .await;
                continue;
            }
            pause(self.settings.slow_flow).await;

            let Some(ctx) = self.locator.locate(page, &form, timeout).await else {
                self.diagnostics
                    .capture(page, &format!("noform-a{attempt}"))
                    .await;
                continue;
            };

            self.step(page, steps, format!("fill-form ({ctx})")).await;
            if let Err(err) = self.filler.fill(page, ctx, &fields).await {
                engine_warn!("attempt {}: {}", attempt, err);
                self.diagnostics
                    .capture(page, &format!("nofill-a{attempt}"))
                    .await;
                fill_failure = Some(err);
                continue;
            }

            pause(self.settings.verify_delay).await;
            if !self.settings.submit {
                self.step(page, steps, "stop-after-fill").await;
                return Ok(false);
            }

            self.step(page, steps, "submit").await;
            self.submit(page, ctx).await?;
            pause(self.settings.slow_flow).await;
            pause(self.settings.pause_before_year).await;
            if let Err(err) = page
                .wait_for_load(LoadState::DomContentLoaded, self.settings.load_timeout)
                .await
            {
                engine_warn!("post-submit load: {}", err);
            }
            self.recover_service_unavailable(page, steps).await;
            return Ok(true);
        }

        self.diagnostics.capture(page, "noform-final").await;
        Err(match fill_failure {
            Some(err) => FlowError::Fill(err),
            None => FlowError::FormNotFound { attempts },
        })
    }

    async fn submit(&self, page: &dyn Page, ctx: RenderContext) -> Result<(), FlowError> {
        let button = Query::role(Role::Button, Some(Pattern::ci("submit")));
        if page.is_visible(ctx, &button).await.unwrap_or(false) {
            match page.click(ctx, &button, false).await {
                Ok(()) => return Ok(()),
                Err(err) => engine_warn!("submit button click failed: {}", err),
            }
        }
        page.click(ctx, &Query::SubmitControl, true)
            .await
            .map_err(FlowError::Submit)
    }

    /// One "go back" click when the service-unavailable page shows up.
    async fn recover_service_unavailable(&self, page: &dyn Page, steps: &mut StepRecord) {
        if !self
            .url_contains(page, &self.settings.service_unavailable_marker)
            .await
        {
            return;
        }
        self.step(page, steps, "serviceUnavailable:retry once").await;

        let back = Query::role(
            Role::Button,
            Some(Pattern::ci("Go back to Amended Return")),
        );
        let Some(ctx) = self
            .locator
            .scan_once(page, &ContextPredicate::exists(back.clone()))
            .await
        else {
            engine_warn!("service unavailable without a go-back control");
            return;
        };
        if !page.is_visible(ctx, &back).await.unwrap_or(false) {
            return;
        }
        if let Err(err) = page.click(ctx, &back, false).await {
            engine_warn!("go-back click failed: {}", err);
            return;
        }
        if let Err(err) = page
            .wait_for_load(LoadState::DomContentLoaded, self.settings.load_timeout)
            .await
        {
            engine_warn!("go-back load: {}", err);
        }
        engine_info!(
            "after go-back: {}",
            page.current_url().await.unwrap_or_default()
        );
    }

    async fn year_select(&self, page: &dyn Page, steps: &mut StepRecord) -> Result<(), FlowError> {
        self.step(page, steps, "year-select").await;
        let year = self.settings.tax_year;
        let continue_button = Query::role(Role::Button, Some(Pattern::ci("^continue$")));
        let region = ContextPredicate::exists(continue_button.clone())
            .and_exists(Query::role(Role::Radio, None));

        let ctx = match self
            .locator
            .locate(page, &region, self.settings.year_context_timeout)
            .await
        {
            Some(ctx) => ctx,
            None => {
                engine_warn!("year selection region not located; using top document");
                RenderContext::Top
            }
        };

        match self.select_year(page, ctx, year).await {
            Some(method) => self.step(page, steps, format!("year:{year} via {method}")).await,
            None => return Err(FlowError::YearNotSelected { year }),
        }

        if page.is_visible(ctx, &continue_button).await.unwrap_or(false)
            && page.click(ctx, &continue_button, false).await.is_ok()
        {
            engine_debug!("continue clicked");
        } else {
            let fallback = Query::role(Role::Button, Some(Pattern::contains("Continue")));
            page.click(ctx, &fallback, true).await?;
        }
        pause(self.settings.pause_after_year).await;
        Ok(())
    }

    /// Tries label text, then the named choice control, then raw DOM.
    async fn select_year(&self, page: &dyn Page, ctx: RenderContext, year: u16) -> Option<&'static str> {
        let year_text = year.to_string();

        let label = Query::text(Pattern::exact(format!("^{year_text}$")));
        if page.is_visible(ctx, &label).await.unwrap_or(false)
            && page.click(ctx, &label, false).await.is_ok()
        {
            return Some("label");
        }

        let radio = Query::role(Role::Radio, Some(Pattern::contains(&year_text)));
        if page.is_visible(ctx, &radio).await.unwrap_or(false) {
            if let Err(err) = page.click(ctx, &radio, false).await {
                engine_debug!("radio click: {}", err);
            }
            if let Err(err) = page.check(ctx, &radio).await {
                engine_debug!("radio check: {}", err);
            }
            return Some("radio");
        }

        match page
            .force_select_choice(ctx, &Pattern::contains(&year_text))
            .await
        {
            Ok(true) => Some("dom"),
            Ok(false) => None,
            Err(err) => {
                engine_warn!("last-resort year selection failed: {}", err);
                None
            }
        }
    }

    async fn result(
        &self,
        page: &dyn Page,
        steps: &mut StepRecord,
    ) -> Result<ExtractedPage, FlowError> {
        self.step(page, steps, "wait:/wmar/returnStatus").await;
        let marker = self.settings.result_marker.as_str();
        let reached = poll_until(
            self.settings.result_timeout,
            self.settings.poll_interval,
            move || async move {
                page.current_url()
                    .await
                    .map(|url| url.contains(marker))
                    .unwrap_or(false)
            },
        )
        .await;
        if !reached {
            return Err(FlowError::ResultNotReached {
                timeout: self.settings.result_timeout,
                last_url: page.current_url().await.unwrap_or_default(),
            });
        }

        let ctx = self
            .locator
            .locate(
                page,
                &ContextPredicate::exists(Query::Heading),
                self.settings.heading_timeout,
            )
            .await
            .unwrap_or(RenderContext::Top);

        let heading = read_text(page, ctx, &Query::Heading).await;
        let mut text = read_text(page, ctx, &Query::Main).await;
        if text.is_empty() {
            text = read_text(page, ctx, &Query::Body).await;
        }
        self.step(page, steps, format!("result ({ctx})")).await;

        Ok(ExtractedPage {
            url: page.current_url().await.unwrap_or_default(),
            heading,
            text,
        })
    }
}

async fn read_text(page: &dyn Page, ctx: RenderContext, query: &Query) -> String {
    match page.inner_text(ctx, query).await {
        Ok(Some(text)) => text.trim().to_string(),
        Ok(None) => String::new(),
        Err(err) => {
            engine_debug!("reading {} failed: {}", query, err);
            String::new()
        }
    }
}
