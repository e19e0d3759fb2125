//! WMAR engine: browser sessions, document location, form filling and the
//! resilient flow that ends on the return status page.
pub mod diagnostics;
pub mod filler;
pub mod locator;
pub mod monitor;
pub mod navigator;
pub mod page;
pub mod persist;
mod scripts;
mod wait;
pub mod webdriver;

pub use diagnostics::{count_form_inputs, DiagnosticSink, FileDiagnostics, NoDiagnostics};
pub use filler::{
    credential_fields, AttributeStrategy, FieldFiller, FieldValue, FillError, FillStrategy,
    FillTimeouts, LabelStrategy, LogicalField, OrdinalStrategy, StrategyFailure,
};
pub use locator::{Condition, ContextPredicate, DocumentLocator};
pub use monitor::{Monitor, MonitorError, MonitorSettings, RunOutcome, DEFAULT_SUBJECT};
pub use navigator::{ExtractedPage, FlowError, FlowNavigator, FlowOutcome, FlowSettings, FlowState};
pub use page::{
    BrowserEngine, BrowserError, LoadState, Page, PageLauncher, Pattern, Query, RenderContext, Role,
};
pub use persist::{JsonFileStore, PersistError};
pub use webdriver::{DriverSettings, WebDriverLauncher, WebDriverPage};
