mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use common::{
    credentials_form, result_page, year_selection, Element, FakePage, Screen, Site, ENTRY_URL,
    RESULT_URL, SECRETS_URL, UNAVAILABLE_URL, YEAR_URL,
};
use pretty_assertions::assert_eq;
use wmar_core::{Credentials, StepRecord};
use wmar_engine::{
    BrowserError, DiagnosticSink, FieldFiller, FieldValue, FillStrategy, FlowError, FlowNavigator,
    FlowOutcome, FlowSettings, NoDiagnostics, Page, RenderContext,
};

const PENDING: &str = "Your amended return has not yet been processed.";

#[derive(Default)]
struct RecordingDiagnostics {
    tags: Mutex<Vec<String>>,
}

impl RecordingDiagnostics {
    fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DiagnosticSink for RecordingDiagnostics {
    async fn capture(&self, _page: &dyn Page, tag: &str) -> Vec<PathBuf> {
        self.tags.lock().unwrap().push(tag.to_string());
        Vec::new()
    }

    async fn screenshot(&self, _page: &dyn Page, tag: &str) -> Option<PathBuf> {
        self.tags.lock().unwrap().push(tag.to_string());
        None
    }
}

/// A strategy that never manages to fill anything.
struct Refuses;

#[async_trait::async_trait]
impl FillStrategy for Refuses {
    fn name(&self) -> &'static str {
        "refuses"
    }

    async fn attempt(
        &self,
        _page: &dyn Page,
        _ctx: RenderContext,
        _fields: &[FieldValue],
    ) -> Result<(), BrowserError> {
        Err(BrowserError::Command("field is read-only".to_string()))
    }
}

fn creds() -> Credentials {
    Credentials::new("123-45-6789", "01/02/1980", "12345").unwrap()
}

fn navigator(settings: FlowSettings) -> FlowNavigator {
    FlowNavigator::new(settings, Arc::new(NoDiagnostics))
}

async fn run(page: &FakePage, settings: FlowSettings) -> (Result<FlowOutcome, FlowError>, StepRecord) {
    let mut steps = StepRecord::new();
    let outcome = navigator(settings).run(page, &creds(), &mut steps).await;
    (outcome, steps)
}

fn extracted(outcome: Result<FlowOutcome, FlowError>) -> wmar_engine::ExtractedPage {
    match outcome {
        Ok(FlowOutcome::Extracted(page)) => page,
        other => panic!("expected extracted page, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn full_flow_reaches_the_result_page() {
    let page = FakePage::new(Site::standard(PENDING));
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    let result = extracted(outcome);
    assert_eq!(result.url, RESULT_URL);
    assert_eq!(result.heading, "Where's My Amended Return?");
    assert_eq!(result.text, PENDING);

    let recorded = steps.steps().to_vec();
    assert_eq!(recorded[0], "goto:/wmar");
    assert!(recorded.contains(&"follow-landing-link".to_string()));
    assert!(recorded.contains(&"submit".to_string()));
    assert!(recorded.contains(&"year:2023 via label".to_string()));
    assert_eq!(recorded.last().map(String::as_str), Some("result (top)"));
    assert_eq!(page.typed().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn form_rendered_in_an_embedded_document_is_used() {
    let framed_form = Screen::framed(vec![
        Element::input("Social Security number", "ssn"),
        Element::input("Date of birth", "dob"),
        Element::input("Zip or Postal code", "zip"),
        Element::button("Submit").navigates_to(RESULT_URL),
    ]);
    let site = Site::new()
        .screen(SECRETS_URL, framed_form)
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert_eq!(extracted(outcome).text, PENDING);
    assert!(steps
        .steps()
        .contains(&"fill-form (frame[0])".to_string()));
}

#[tokio::test(start_paused = true)]
async fn missing_form_is_retried_with_a_fresh_navigation() {
    let site = Site::new()
        .screen(SECRETS_URL, Screen::blank())
        .screen(SECRETS_URL, credentials_form(RESULT_URL))
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert!(matches!(outcome, Ok(FlowOutcome::Extracted(_))));
    assert_eq!(page.visits(SECRETS_URL), 2);
    assert!(steps
        .steps()
        .contains(&"goto:/wmar/sharedSecrets (attempt 2)".to_string()));
}

#[tokio::test(start_paused = true)]
async fn form_never_found_fails_after_every_attempt() {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let navigator = FlowNavigator::new(FlowSettings::default(), diagnostics.clone());
    let page = FakePage::new(Site::new());
    let mut steps = StepRecord::new();

    let err = navigator.run(&page, &creds(), &mut steps).await.unwrap_err();

    assert_eq!(err, FlowError::FormNotFound { attempts: 3 });
    assert_eq!(page.visits(SECRETS_URL), 3);
    let tags = diagnostics.tags();
    assert_eq!(&tags[..4], &["noform-a1", "noform-a2", "noform-a3", "noform-final"]);
    assert!(tags[4].starts_with("failure-"));
    assert!(steps.last().is_some_and(|s| s.starts_with("failed: ")));
}

#[tokio::test(start_paused = true)]
async fn form_found_but_never_filled_reports_the_fill_failure() {
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let navigator = FlowNavigator::new(FlowSettings::default(), diagnostics.clone())
        .with_filler(FieldFiller::new(vec![Box::new(Refuses)]));
    let page = FakePage::new(Site::new().screen(SECRETS_URL, credentials_form(RESULT_URL)));
    let mut steps = StepRecord::new();

    let err = navigator.run(&page, &creds(), &mut steps).await.unwrap_err();

    match &err {
        FlowError::Fill(fill) => assert_eq!(fill.attempted(), vec!["refuses"]),
        other => panic!("expected a fill failure, got {other:?}"),
    }
    assert!(err.to_string().starts_with("form found but not filled"));
    assert_eq!(page.visits(SECRETS_URL), 3);
    assert_eq!(
        &diagnostics.tags()[..4],
        &["nofill-a1", "nofill-a2", "nofill-a3", "noform-final"]
    );
    assert!(page.typed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn submit_disabled_stops_after_filling() {
    let page = FakePage::new(Site::standard(PENDING));
    let settings = FlowSettings {
        submit: false,
        ..FlowSettings::default()
    };
    let (outcome, steps) = run(&page, settings).await;

    assert_eq!(outcome, Ok(FlowOutcome::StoppedAfterFill));
    assert_eq!(page.typed().len(), 3);
    assert_eq!(page.visits(YEAR_URL), 0);
    assert_eq!(steps.last(), Some("stop-after-fill"));
}

#[tokio::test(start_paused = true)]
async fn service_unavailable_goes_back_once_and_continues() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(UNAVAILABLE_URL))
        .screen(
            UNAVAILABLE_URL,
            Screen::top(vec![
                Element::text("The service is unavailable."),
                Element::button("Go back to Amended Return").navigates_to(YEAR_URL),
            ]),
        )
        .screen(YEAR_URL, year_selection(RESULT_URL))
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert_eq!(extracted(outcome).url, RESULT_URL);
    assert!(steps
        .steps()
        .contains(&"serviceUnavailable:retry once".to_string()));
    assert_eq!(page.visits(UNAVAILABLE_URL), 1);
}

#[tokio::test(start_paused = true)]
async fn hidden_year_choices_are_selected_through_the_dom() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(YEAR_URL))
        .screen(
            YEAR_URL,
            Screen::top(vec![
                Element::radio("2022").hidden(),
                Element::radio("2023").hidden(),
                Element::button("Continue").navigates_to(RESULT_URL),
            ]),
        )
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert!(outcome.is_ok());
    assert!(steps.steps().contains(&"year:2023 via dom".to_string()));
}

#[tokio::test(start_paused = true)]
async fn year_page_without_choices_fails() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(YEAR_URL))
        .screen(
            YEAR_URL,
            Screen::top(vec![Element::button("Continue").navigates_to(RESULT_URL)]),
        );
    let page = FakePage::new(site);
    let (outcome, _) = run(&page, FlowSettings::default()).await;

    assert_eq!(outcome, Err(FlowError::YearNotSelected { year: 2023 }));
}

#[tokio::test(start_paused = true)]
async fn hidden_continue_is_clicked_whatever_its_case() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(YEAR_URL))
        .screen(
            YEAR_URL,
            Screen::top(vec![
                Element::radio("2023"),
                Element::button("CONTINUE to status")
                    .hidden()
                    .navigates_to(RESULT_URL),
            ]),
        )
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert_eq!(extracted(outcome).url, RESULT_URL);
    assert!(steps.steps().contains(&"year:2023 via label".to_string()));
}

#[tokio::test(start_paused = true)]
async fn result_page_that_never_arrives_times_out() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(YEAR_URL))
        .screen(YEAR_URL, year_selection("https://sa.www4.irs.gov/wmar/limbo"));
    let page = FakePage::new(site);
    let (outcome, _) = run(&page, FlowSettings::default()).await;

    match outcome {
        Err(FlowError::ResultNotReached { last_url, .. }) => {
            assert_eq!(last_url, "https://sa.www4.irs.gov/wmar/limbo");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn result_without_main_region_reads_the_body() {
    let site = Site::new()
        .screen(SECRETS_URL, credentials_form(RESULT_URL))
        .screen(
            RESULT_URL,
            Screen::top(vec![Element::heading("Return Status"), Element::text(PENDING)]),
        );
    let page = FakePage::new(site);
    let (outcome, _) = run(&page, FlowSettings::default()).await;

    let result = extracted(outcome);
    assert_eq!(result.heading, "Return Status");
    assert_eq!(result.text, format!("Return Status\n{PENDING}"));
}

#[tokio::test(start_paused = true)]
async fn landing_page_without_link_goes_straight_to_the_form() {
    let site = Site::new()
        .screen(ENTRY_URL, Screen::top(vec![Element::heading("Welcome")]))
        .screen(SECRETS_URL, credentials_form(RESULT_URL))
        .screen(RESULT_URL, result_page(PENDING));
    let page = FakePage::new(site);
    let (outcome, steps) = run(&page, FlowSettings::default()).await;

    assert!(outcome.is_ok());
    assert!(!steps.steps().contains(&"follow-landing-link".to_string()));
    assert_eq!(&page.navigations()[..2], &[ENTRY_URL, SECRETS_URL]);
}
