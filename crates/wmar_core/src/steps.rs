use std::fmt;

/// Ordered, append-only trail of the steps taken through the flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepRecord {
    steps: Vec<String>,
}

impl StepRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn last(&self) -> Option<&str> {
        self.steps.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.steps.join(" > "))
    }
}
