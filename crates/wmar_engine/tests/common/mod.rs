#![allow(dead_code)]
//! Scriptable in-memory `Page` for flow tests.
//!
//! A `Site` maps URLs to the screens served on successive visits. Each screen
//! is a top document plus embedded documents that may attach after a delay.
//! Tests run on paused tokio time, so delays cost nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use wmar_engine::{
    BrowserEngine, BrowserError, LoadState, Page, PageLauncher, Pattern, Query, RenderContext,
    Role,
};

pub const ENTRY_URL: &str = "https://sa.www4.irs.gov/wmar/";
pub const SECRETS_URL: &str = "https://sa.www4.irs.gov/wmar/sharedSecrets";
pub const YEAR_URL: &str = "https://sa.www4.irs.gov/wmar/selectTaxYear";
pub const UNAVAILABLE_URL: &str = "https://sa.www4.irs.gov/wmar/serviceUnavailable";
pub const RESULT_URL: &str = "https://sa.www4.irs.gov/wmar/returnStatus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Input,
    Button,
    Submit,
    Link,
    Radio,
    Heading,
    Main,
    Text,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub kind: Kind,
    pub label: Option<String>,
    pub attrs: String,
    pub text: String,
    pub visible: bool,
    pub navigates_to: Option<String>,
    pub rejects_typing: bool,
    pub value: String,
    pub checked: bool,
}

impl Element {
    fn new(kind: Kind, text: &str) -> Self {
        Self {
            kind,
            label: None,
            attrs: String::new(),
            text: text.to_string(),
            visible: true,
            navigates_to: None,
            rejects_typing: false,
            value: String::new(),
            checked: false,
        }
    }

    /// Input with a visible label and `name`/`id` text.
    pub fn input(label: &str, attrs: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            attrs: attrs.to_string(),
            ..Self::new(Kind::Input, "")
        }
    }

    /// Input without any label.
    pub fn bare_input(attrs: &str) -> Self {
        Self {
            attrs: attrs.to_string(),
            ..Self::new(Kind::Input, "")
        }
    }

    pub fn button(name: &str) -> Self {
        Self::new(Kind::Button, name)
    }

    pub fn submit() -> Self {
        Self::new(Kind::Submit, "")
    }

    pub fn link(name: &str) -> Self {
        Self::new(Kind::Link, name)
    }

    pub fn radio(label: &str) -> Self {
        Self::new(Kind::Radio, label)
    }

    pub fn heading(text: &str) -> Self {
        Self::new(Kind::Heading, text)
    }

    pub fn main(text: &str) -> Self {
        Self::new(Kind::Main, text)
    }

    pub fn text(text: &str) -> Self {
        Self::new(Kind::Text, text)
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn navigates_to(mut self, url: &str) -> Self {
        self.navigates_to = Some(url.to_string());
        self
    }

    /// Native typing fails; raw DOM assignment still works.
    pub fn rejects_typing(mut self) -> Self {
        self.rejects_typing = true;
        self
    }

    fn matches(&self, query: &Query) -> bool {
        match query {
            Query::Label { pattern } => {
                self.kind == Kind::Input
                    && self.label.as_deref().is_some_and(|l| pattern.is_match(l))
            }
            Query::Attribute { needles } => {
                let attrs = self.attrs.to_lowercase();
                self.kind == Kind::Input
                    && needles.iter().any(|n| attrs.contains(&n.to_lowercase()))
            }
            Query::Role { role, name } => {
                let kind_ok = match role {
                    Role::Button => matches!(self.kind, Kind::Button | Kind::Submit),
                    Role::Radio => self.kind == Kind::Radio,
                    Role::Link => self.kind == Kind::Link,
                };
                kind_ok && name.as_ref().map_or(true, |p| p.is_match(&self.text))
            }
            Query::Text { pattern } => {
                matches!(self.kind, Kind::Text | Kind::Radio | Kind::Heading | Kind::Link)
                    && pattern.is_match(&self.text)
            }
            Query::InputLike => self.kind == Kind::Input,
            Query::SubmitControl => self.kind == Kind::Submit,
            Query::Heading => self.kind == Kind::Heading,
            Query::Main => self.kind == Kind::Main,
            Query::Body => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub elements: Vec<Element>,
    pub attach_after: Duration,
}

impl Document {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            attach_after: Duration::ZERO,
        }
    }

    pub fn attached_after(mut self, delay: Duration) -> Self {
        self.attach_after = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Screen {
    pub top: Vec<Element>,
    pub frames: Vec<Document>,
}

impl Screen {
    pub fn top(elements: Vec<Element>) -> Self {
        Self {
            top: elements,
            frames: Vec::new(),
        }
    }

    /// Empty top document with the content in one embedded document.
    pub fn framed(elements: Vec<Element>) -> Self {
        Self::top(Vec::new()).with_frame(Document::new(elements))
    }

    pub fn blank() -> Self {
        Self::top(Vec::new())
    }

    pub fn with_frame(mut self, frame: Document) -> Self {
        self.frames.push(frame);
        self
    }
}

/// Screens served per URL; visit N gets screen N (the last one repeats).
#[derive(Debug, Clone, Default)]
pub struct Site {
    screens: HashMap<String, Vec<Screen>>,
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(mut self, url: &str, screen: Screen) -> Self {
        self.screens.entry(url.to_string()).or_default().push(screen);
        self
    }

    fn serve(&self, url: &str, visit: usize) -> Screen {
        self.screens
            .get(url)
            .and_then(|screens| screens.get(visit).or_else(|| screens.last()))
            .cloned()
            .unwrap_or_else(Screen::blank)
    }

    /// The standard happy path: landing, form, year selection, result.
    pub fn standard(result_text: &str) -> Self {
        Site::new()
            .screen(
                ENTRY_URL,
                Screen::top(vec![
                    Element::link("Where's My Amended Return?").navigates_to(SECRETS_URL)
                ]),
            )
            .screen(SECRETS_URL, credentials_form(YEAR_URL))
            .screen(YEAR_URL, year_selection(RESULT_URL))
            .screen(RESULT_URL, result_page(result_text))
    }
}

pub fn credentials_form(next: &str) -> Screen {
    Screen::top(vec![
        Element::input("Social Security number", "ssn"),
        Element::input("Date of birth", "dob"),
        Element::input("Zip or Postal code", "zip"),
        Element::button("Submit").navigates_to(next),
    ])
}

pub fn year_selection(next: &str) -> Screen {
    Screen::top(vec![
        Element::radio("2022"),
        Element::radio("2023"),
        Element::button("Continue").navigates_to(next),
    ])
}

pub fn result_page(text: &str) -> Screen {
    Screen::top(vec![
        Element::heading("Where's My Amended Return?"),
        Element::main(text),
    ])
}

#[derive(Debug)]
struct Loaded {
    top: Vec<Element>,
    frames: Vec<(Instant, Vec<Element>)>,
}

#[derive(Debug)]
struct State {
    url: String,
    loaded: Loaded,
    visits: HashMap<String, usize>,
    navigations: Vec<String>,
    typed: Vec<(String, String)>,
    raw_values: Vec<(usize, String)>,
    clicks: Vec<String>,
    closed: bool,
}

/// Cheap to clone; clones share one tab.
#[derive(Debug, Clone)]
pub struct FakePage {
    site: Arc<Site>,
    state: Arc<Mutex<State>>,
}

impl FakePage {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            state: Arc::new(Mutex::new(State {
                url: "about:blank".to_string(),
                loaded: Loaded {
                    top: Vec::new(),
                    frames: Vec::new(),
                },
                visits: HashMap::new(),
                navigations: Vec::new(),
                typed: Vec::new(),
                raw_values: Vec::new(),
                clicks: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Serve `screen` as the current document without navigating.
    pub fn showing(screen: Screen) -> Self {
        let page = Self::new(Site::new());
        page.state().loaded = load(screen);
        page
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake page state poisoned")
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn visits(&self, url: &str) -> usize {
        self.state().visits.get(url).copied().unwrap_or(0)
    }

    /// `(attrs, value)` for each natively typed field, in order.
    pub fn typed(&self) -> Vec<(String, String)> {
        self.state().typed.clone()
    }

    /// `(ordinal, value)` for each raw DOM assignment, in order.
    pub fn raw_values(&self) -> Vec<(usize, String)> {
        self.state().raw_values.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    pub fn checked(&self) -> Vec<String> {
        self.state()
            .loaded
            .top
            .iter()
            .filter(|e| e.checked)
            .map(|e| e.text.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn navigate(&self, url: &str) {
        let mut state = self.state();
        let visit = state.visits.get(url).copied().unwrap_or(0);
        state.visits.insert(url.to_string(), visit + 1);
        state.navigations.push(url.to_string());
        state.url = url.to_string();
        state.loaded = load(self.site.serve(url, visit));
    }

    fn with_elements<T>(
        &self,
        ctx: RenderContext,
        f: impl FnOnce(&mut Vec<Element>) -> Result<T, BrowserError>,
    ) -> Result<T, BrowserError> {
        let mut state = self.state();
        match ctx {
            RenderContext::Top => f(&mut state.loaded.top),
            RenderContext::Frame(index) => {
                let now = Instant::now();
                let frame = state
                    .loaded
                    .frames
                    .iter_mut()
                    .filter(|(attach_at, _)| *attach_at <= now)
                    .nth(usize::from(index))
                    .ok_or_else(|| BrowserError::Command(format!("{ctx} detached")))?;
                f(&mut frame.1)
            }
        }
    }

    fn first_match(
        &self,
        ctx: RenderContext,
        query: &Query,
    ) -> Result<Option<Element>, BrowserError> {
        self.with_elements(ctx, |elements| {
            Ok(elements.iter().find(|e| e.matches(query)).cloned())
        })
    }
}

fn load(screen: Screen) -> Loaded {
    let now = Instant::now();
    Loaded {
        top: screen.top,
        frames: screen
            .frames
            .into_iter()
            .map(|doc| (now + doc.attach_after, doc.elements))
            .collect(),
    }
}

fn no_match(query: &Query) -> BrowserError {
    BrowserError::NoMatch(query.to_string())
}

#[async_trait::async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _wait: LoadState) -> Result<(), BrowserError> {
        self.navigate(url);
        Ok(())
    }

    async fn wait_for_load(&self, _state: LoadState, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.state().url.clone())
    }

    async fn contexts(&self) -> Result<Vec<RenderContext>, BrowserError> {
        let now = Instant::now();
        let state = self.state();
        let attached = state
            .loaded
            .frames
            .iter()
            .filter(|(attach_at, _)| *attach_at <= now)
            .count();
        let mut contexts = vec![RenderContext::Top];
        contexts.extend((0..attached).map(|i| RenderContext::Frame(i as u16)));
        Ok(contexts)
    }

    async fn count(&self, ctx: RenderContext, query: &Query) -> Result<usize, BrowserError> {
        self.with_elements(ctx, |elements| {
            Ok(elements.iter().filter(|e| e.matches(query)).count())
        })
    }

    async fn is_visible(&self, ctx: RenderContext, query: &Query) -> Result<bool, BrowserError> {
        Ok(self.first_match(ctx, query)?.is_some_and(|e| e.visible))
    }

    async fn fill(&self, ctx: RenderContext, query: &Query, value: &str) -> Result<(), BrowserError> {
        let attrs = self.with_elements(ctx, |elements| {
            let element = elements
                .iter_mut()
                .find(|e| e.matches(query))
                .ok_or_else(|| no_match(query))?;
            if element.rejects_typing || !element.visible {
                return Err(BrowserError::Command(format!("{query} is not editable")));
            }
            element.value = value.to_string();
            Ok(element.attrs.clone())
        })?;
        self.state().typed.push((attrs, value.to_string()));
        Ok(())
    }

    async fn click(&self, ctx: RenderContext, query: &Query, force: bool) -> Result<(), BrowserError> {
        let target = self.with_elements(ctx, |elements| {
            let element = elements
                .iter_mut()
                .find(|e| e.matches(query))
                .ok_or_else(|| no_match(query))?;
            if !element.visible && !force {
                return Err(BrowserError::Command(format!("{query} is not visible")));
            }
            if element.kind == Kind::Radio {
                element.checked = true;
            }
            Ok(element.navigates_to.clone())
        })?;
        self.state().clicks.push(query.to_string());
        if let Some(url) = target {
            self.navigate(&url);
        }
        Ok(())
    }

    async fn check(&self, ctx: RenderContext, query: &Query) -> Result<(), BrowserError> {
        self.with_elements(ctx, |elements| {
            let element = elements
                .iter_mut()
                .find(|e| e.matches(query))
                .ok_or_else(|| no_match(query))?;
            element.checked = true;
            Ok(())
        })
    }

    async fn inner_text(
        &self,
        ctx: RenderContext,
        query: &Query,
    ) -> Result<Option<String>, BrowserError> {
        if *query == Query::Body {
            return self.with_elements(ctx, |elements| {
                let text: Vec<&str> = elements.iter().map(|e| e.text.as_str()).collect();
                Ok(Some(text.join("\n")))
            });
        }
        Ok(self.first_match(ctx, query)?.map(|e| e.text))
    }

    async fn set_value_raw(
        &self,
        ctx: RenderContext,
        query: &Query,
        index: usize,
        value: &str,
    ) -> Result<(), BrowserError> {
        self.with_elements(ctx, |elements| {
            let element = elements
                .iter_mut()
                .filter(|e| e.matches(query))
                .nth(index)
                .ok_or_else(|| no_match(query))?;
            element.value = value.to_string();
            Ok(())
        })?;
        self.state().raw_values.push((index, value.to_string()));
        Ok(())
    }

    async fn force_select_choice(
        &self,
        ctx: RenderContext,
        label: &Pattern,
    ) -> Result<bool, BrowserError> {
        self.with_elements(ctx, |elements| {
            let position = elements
                .iter()
                .filter(|e| e.kind == Kind::Radio)
                .position(|e| label.is_match(&e.text));
            let target = elements
                .iter_mut()
                .filter(|e| e.kind == Kind::Radio)
                .nth(position.unwrap_or(0));
            match target {
                Some(radio) => {
                    radio.checked = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let state = self.state();
        let inputs = state
            .loaded
            .top
            .iter()
            .filter(|e| e.kind == Kind::Input)
            .map(|e| format!("<input name=\"{}\">", e.attrs))
            .collect::<String>();
        Ok(format!("<html><body><form>{inputs}</form></body></html>"))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        Ok(b"\x89PNG".to_vec())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.state().closed = true;
        Ok(())
    }
}

/// Hands out prepared pages per engine; engines without one fail to launch.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    pages: HashMap<BrowserEngine, FakePage>,
    launched: Mutex<Vec<BrowserEngine>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, engine: BrowserEngine, page: FakePage) -> Self {
        self.pages.insert(engine, page);
        self
    }

    pub fn launched(&self) -> Vec<BrowserEngine> {
        self.launched.lock().expect("launcher poisoned").clone()
    }
}

#[async_trait::async_trait]
impl PageLauncher for FakeLauncher {
    async fn launch(&self, engine: BrowserEngine) -> Result<Box<dyn Page>, BrowserError> {
        self.launched.lock().expect("launcher poisoned").push(engine);
        match self.pages.get(&engine) {
            Some(page) => Ok(Box::new(page.clone())),
            None => Err(BrowserError::DriverUnavailable {
                url: format!("fake://{engine}"),
                message: "no page prepared".to_string(),
            }),
        }
    }
}
