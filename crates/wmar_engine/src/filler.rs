//! Layered form filling: accessible labels, then attribute heuristics,
//! then raw ordinal assignment.
use std::fmt;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use wmar_core::Credentials;

use crate::page::{BrowserError, Page, Pattern, Query, RenderContext};
use crate::wait::poll_until;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalField {
    Ssn,
    DateOfBirth,
    Zip,
}

impl LogicalField {
    pub fn name(self) -> &'static str {
        match self {
            LogicalField::Ssn => "ssn",
            LogicalField::DateOfBirth => "date-of-birth",
            LogicalField::Zip => "zip",
        }
    }

    pub fn label_pattern(self) -> Pattern {
        match self {
            LogicalField::Ssn => Pattern::ci("Social Security number"),
            LogicalField::DateOfBirth => Pattern::ci("Date of birth"),
            LogicalField::Zip => Pattern::ci("Zip or Postal code"),
        }
    }

    pub fn attribute_needles(self) -> &'static [&'static str] {
        match self {
            LogicalField::Ssn => &["ssn", "social"],
            LogicalField::DateOfBirth => &["dob", "date of birth", "birth"],
            LogicalField::Zip => &["zip", "postal"],
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub field: LogicalField,
    pub value: String,
}

impl FieldValue {
    pub fn new(field: LogicalField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

// Values are secrets.
impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldValue")
            .field("field", &self.field)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// The three shared-secret fields, in on-page order.
pub fn credential_fields(creds: &Credentials) -> Vec<FieldValue> {
    vec![
        FieldValue::new(LogicalField::Ssn, creds.ssn()),
        FieldValue::new(LogicalField::DateOfBirth, creds.date_of_birth()),
        FieldValue::new(LogicalField::Zip, creds.zip()),
    ]
}

#[async_trait::async_trait]
pub trait FillStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        page: &dyn Page,
        ctx: RenderContext,
        fields: &[FieldValue],
    ) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone)]
pub struct FillTimeouts {
    pub label_visibility: Duration,
    pub attribute: Duration,
    pub ordinal: Duration,
    pub poll_interval: Duration,
}

impl Default for FillTimeouts {
    fn default() -> Self {
        Self {
            label_visibility: Duration::from_millis(2000),
            attribute: Duration::from_millis(1500),
            ordinal: Duration::from_millis(1500),
            poll_interval: Duration::from_millis(150),
        }
    }
}

/// Fills by accessible label; all fields must be visible before any is filled.
#[derive(Debug, Clone)]
pub struct LabelStrategy {
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl LabelStrategy {
    pub fn new(visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            visibility_timeout,
            poll_interval,
        }
    }
}

#[async_trait::async_trait]
impl FillStrategy for LabelStrategy {
    fn name(&self) -> &'static str {
        "label"
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        ctx: RenderContext,
        fields: &[FieldValue],
    ) -> Result<(), BrowserError> {
        let queries: Vec<Query> = fields
            .iter()
            .map(|f| Query::label(f.field.label_pattern()))
            .collect();
        let queries = &queries;

        let all_visible = poll_until(self.visibility_timeout, self.poll_interval, move || async move {
            for query in queries {
                if !page.is_visible(ctx, query).await.unwrap_or(false) {
                    return false;
                }
            }
            true
        })
        .await;
        if !all_visible {
            return Err(BrowserError::Timeout {
                what: "all labelled fields to become visible".to_string(),
                timeout: self.visibility_timeout,
            });
        }

        for (field, query) in fields.iter().zip(queries) {
            page.fill(ctx, query, &field.value).await?;
        }
        Ok(())
    }
}

/// Fills the first control whose name, id or aria-label mentions the field.
#[derive(Debug, Clone)]
pub struct AttributeStrategy {
    timeout: Duration,
    poll_interval: Duration,
}

impl AttributeStrategy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

#[async_trait::async_trait]
impl FillStrategy for AttributeStrategy {
    fn name(&self) -> &'static str {
        "attribute"
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        ctx: RenderContext,
        fields: &[FieldValue],
    ) -> Result<(), BrowserError> {
        let queries: Vec<Query> = fields
            .iter()
            .map(|f| Query::attribute(f.field.attribute_needles().iter().copied()))
            .collect();
        let queries = &queries;

        let all_present = poll_until(self.timeout, self.poll_interval, move || async move {
            for query in queries {
                if page.count(ctx, query).await.unwrap_or(0) == 0 {
                    return false;
                }
            }
            true
        })
        .await;
        if !all_present {
            return Err(BrowserError::Timeout {
                what: "attribute-matched fields".to_string(),
                timeout: self.timeout,
            });
        }

        for (field, query) in fields.iter().zip(queries) {
            page.fill(ctx, query, &field.value).await?;
        }
        Ok(())
    }
}

/// Assigns values by document position among input-like controls.
#[derive(Debug, Clone)]
pub struct OrdinalStrategy {
    timeout: Duration,
    poll_interval: Duration,
}

impl OrdinalStrategy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }
}

#[async_trait::async_trait]
impl FillStrategy for OrdinalStrategy {
    fn name(&self) -> &'static str {
        "ordinal"
    }

    async fn attempt(
        &self,
        page: &dyn Page,
        ctx: RenderContext,
        fields: &[FieldValue],
    ) -> Result<(), BrowserError> {
        let needed = fields.len();
        let enough = poll_until(self.timeout, self.poll_interval, move || async move {
            page.count(ctx, &Query::InputLike).await.unwrap_or(0) >= needed
        })
        .await;
        if !enough {
            return Err(BrowserError::Timeout {
                what: format!("at least {needed} input-like controls"),
                timeout: self.timeout,
            });
        }

        for (index, field) in fields.iter().enumerate() {
            page.set_value_raw(ctx, &Query::InputLike, index, &field.value)
                .await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub error: BrowserError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all fill strategies failed{}", render_failures(.failures))]
pub struct FillError {
    pub failures: Vec<StrategyFailure>,
}

fn render_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("; {}: {}", f.strategy, f.error))
        .collect()
}

impl FillError {
    pub fn attempted(&self) -> Vec<&'static str> {
        self.failures.iter().map(|f| f.strategy).collect()
    }
}

/// Ordered list of strategies; the first success wins.
pub struct FieldFiller {
    strategies: Vec<Box<dyn FillStrategy>>,
}

impl FieldFiller {
    pub fn new(strategies: Vec<Box<dyn FillStrategy>>) -> Self {
        Self { strategies }
    }

    /// label -> attribute -> ordinal.
    pub fn standard(timeouts: &FillTimeouts) -> Self {
        Self::new(vec![
            Box::new(LabelStrategy::new(
                timeouts.label_visibility,
                timeouts.poll_interval,
            )),
            Box::new(AttributeStrategy::new(
                timeouts.attribute,
                timeouts.poll_interval,
            )),
            Box::new(OrdinalStrategy::new(timeouts.ordinal, timeouts.poll_interval)),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Returns the name of the strategy that filled the form.
    pub async fn fill(
        &self,
        page: &dyn Page,
        ctx: RenderContext,
        fields: &[FieldValue],
    ) -> Result<&'static str, FillError> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            engine_debug!("fill strategy {} on {}", strategy.name(), ctx);
            match strategy.attempt(page, ctx, fields).await {
                Ok(()) => {
                    engine_info!("filled {} fields via {}", fields.len(), strategy.name());
                    return Ok(strategy.name());
                }
                Err(error) => {
                    engine_warn!("fill strategy {} failed: {}", strategy.name(), error);
                    failures.push(StrategyFailure {
                        strategy: strategy.name(),
                        error,
                    });
                }
            }
        }
        Err(FillError { failures })
    }
}
