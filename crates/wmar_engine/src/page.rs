use std::fmt;
use std::time::Duration;

use regex::RegexBuilder;
use serde::Serialize;

/// Handle to one document scope of the current page.
///
/// Only valid until the next navigation; resolve a fresh one per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderContext {
    Top,
    /// Embedded document, by attachment order.
    Frame(u16),
}

impl fmt::Display for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderContext::Top => write!(f, "top"),
            RenderContext::Frame(index) => write!(f, "frame[{index}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    DomContentLoaded,
    /// Loaded and no new network resources for a short quiet window.
    NetworkIdle,
}

/// Regex source shared by the browser (JS `RegExp`) and in-process matching.
///
/// Keep sources to the common subset of both dialects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pattern {
    pub source: String,
    pub case_insensitive: bool,
}

impl Pattern {
    pub fn ci(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            case_insensitive: true,
        }
    }

    pub fn exact(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            case_insensitive: false,
        }
    }

    /// Case-insensitive match of `text` anywhere.
    pub fn contains(text: &str) -> Self {
        Self::ci(regex::escape(text))
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        RegexBuilder::new(&self.source)
            .case_insensitive(self.case_insensitive)
            .build()
            .map(|re| re.is_match(haystack))
            .unwrap_or(false)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)?;
        if self.case_insensitive {
            write!(f, "i")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Button,
    Radio,
    Link,
}

/// Declarative element query, evaluated inside one render context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    /// Form control whose associated label text matches.
    Label { pattern: Pattern },
    /// Form control whose name, id or aria-label contains any needle (case-insensitive).
    Attribute { needles: Vec<String> },
    /// Element with an ARIA role, optionally filtered by accessible name.
    Role { role: Role, name: Option<Pattern> },
    /// Innermost element whose normalized text matches.
    Text { pattern: Pattern },
    /// Fillable controls inside `<main>`, or the whole document without one.
    InputLike,
    /// `button[type=submit]` or `input[type=submit]`.
    SubmitControl,
    Heading,
    Main,
    Body,
}

impl Query {
    pub fn label(pattern: Pattern) -> Self {
        Query::Label { pattern }
    }

    pub fn attribute<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Attribute {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn role(role: Role, name: Option<Pattern>) -> Self {
        Query::Role { role, name }
    }

    pub fn text(pattern: Pattern) -> Self {
        Query::Text { pattern }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Label { pattern } => write!(f, "label {pattern}"),
            Query::Attribute { needles } => write!(f, "attribute [{}]", needles.join(", ")),
            Query::Role { role, name: Some(name) } => write!(f, "{role:?} named {name}"),
            Query::Role { role, name: None } => write!(f, "{role:?}"),
            Query::Text { pattern } => write!(f, "text {pattern}"),
            Query::InputLike => write!(f, "input-like"),
            Query::SubmitControl => write!(f, "submit control"),
            Query::Heading => write!(f, "heading"),
            Query::Main => write!(f, "main"),
            Query::Body => write!(f, "body"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("webdriver unavailable at {url}: {message}")]
    DriverUnavailable { url: String, message: String },
    #[error("failed to start browser session: {0}")]
    Session(String),
    #[error("browser command failed: {0}")]
    Command(String),
    #[error("no element matches {0}")]
    NoMatch(String),
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },
    #[error("unexpected script result: {0}")]
    Script(String),
}

/// One browser tab. Every call is a suspension point; calls never overlap.
#[async_trait::async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, wait: LoadState) -> Result<(), BrowserError>;

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Top document first, then embedded documents in attachment order.
    async fn contexts(&self) -> Result<Vec<RenderContext>, BrowserError>;

    async fn count(&self, ctx: RenderContext, query: &Query) -> Result<usize, BrowserError>;

    /// Whether the first match exists and is rendered.
    async fn is_visible(&self, ctx: RenderContext, query: &Query) -> Result<bool, BrowserError>;

    /// Replace the first match's value as a user would type it.
    async fn fill(&self, ctx: RenderContext, query: &Query, value: &str) -> Result<(), BrowserError>;

    /// Click the first match; `force` skips actionability and clicks through script.
    async fn click(&self, ctx: RenderContext, query: &Query, force: bool) -> Result<(), BrowserError>;

    /// Force the first match into the checked state.
    async fn check(&self, ctx: RenderContext, query: &Query) -> Result<(), BrowserError>;

    async fn inner_text(
        &self,
        ctx: RenderContext,
        query: &Query,
    ) -> Result<Option<String>, BrowserError>;

    /// Assign the `index`-th match's value directly in the DOM and raise
    /// input, change and blur notifications.
    async fn set_value_raw(
        &self,
        ctx: RenderContext,
        query: &Query,
        index: usize,
        value: &str,
    ) -> Result<(), BrowserError>;

    /// Mark the choice control labelled by `label` (or the first choice
    /// control on the page) as selected and raise change notifications.
    async fn force_select_choice(
        &self,
        ctx: RenderContext,
        label: &Pattern,
    ) -> Result<bool, BrowserError>;

    /// Serialized top document.
    async fn content(&self) -> Result<String, BrowserError>;

    /// PNG of the viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserEngine {
    Chromium,
    Firefox,
}

impl fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserEngine::Chromium => write!(f, "chromium"),
            BrowserEngine::Firefox => write!(f, "firefox"),
        }
    }
}

impl std::str::FromStr for BrowserEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
            "firefox" => Ok(BrowserEngine::Firefox),
            other => Err(format!("unsupported browser engine: {other}")),
        }
    }
}

/// Opens one fresh page per run attempt.
#[async_trait::async_trait]
pub trait PageLauncher: Send + Sync {
    async fn launch(&self, engine: BrowserEngine) -> Result<Box<dyn Page>, BrowserError>;
}
