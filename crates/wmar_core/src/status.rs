use std::fmt;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Characters of normalized text used as the key line when no status sentence is found.
pub const KEY_LINE_FALLBACK_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCategory {
    Received,
    Adjusted,
    Completed,
    NotFound,
    Unknown,
}

impl StatusCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCategory::Received => "received",
            StatusCategory::Adjusted => "adjusted",
            StatusCategory::Completed => "completed",
            StatusCategory::NotFound => "not-found",
            StatusCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: StatusCategory,
    pub key_line: String,
}

/// One observation of the result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStatus {
    pub category: StatusCategory,
    pub key_line: String,
    pub raw_text: String,
    pub observed_at_epoch_millis: i64,
}

impl ObservedStatus {
    pub fn from_text(raw_text: impl Into<String>, observed_at_epoch_millis: i64) -> Self {
        let raw_text = raw_text.into();
        let Classification { category, key_line } = classify(&raw_text);
        Self {
            category,
            key_line,
            raw_text,
            observed_at_epoch_millis,
        }
    }
}

struct Patterns {
    trailing_space: Regex,
    blank_runs: Regex,
    key_line: Regex,
    ordered: Vec<(Regex, StatusCategory)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let ci = |source: &str| {
            RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .expect("static status pattern")
        };
        Patterns {
            trailing_space: Regex::new(r"\s+\n").expect("static whitespace pattern"),
            blank_runs: Regex::new(r"\n{2,}").expect("static blank-line pattern"),
            key_line: ci(r"Your amended return [^\n.]+\."),
            // Order matters: first match wins.
            ordered: vec![
                (ci("not yet been processed"), StatusCategory::Received),
                (ci("adjusted"), StatusCategory::Adjusted),
                (ci("completed"), StatusCategory::Completed),
                (ci("does not match our records"), StatusCategory::NotFound),
            ],
        }
    })
}

/// Collapse trailing whitespace before line breaks and runs of blank lines.
pub(crate) fn normalize(text: &str) -> String {
    let p = patterns();
    let text = p.trailing_space.replace_all(text, "\n");
    p.blank_runs.replace_all(&text, "\n\n").into_owned()
}

/// Map result-page text to a status category and its representative sentence.
///
/// Total and deterministic: every input yields exactly one category.
pub fn classify(raw_text: &str) -> Classification {
    let p = patterns();
    let text = normalize(raw_text);

    let key_line = match p.key_line.find(&text) {
        Some(m) => m.as_str().trim().to_string(),
        None => text
            .chars()
            .take(KEY_LINE_FALLBACK_CHARS)
            .collect::<String>()
            .trim()
            .to_string(),
    };

    let category = p
        .ordered
        .iter()
        .find(|(pattern, _)| pattern.is_match(&text))
        .map(|(_, category)| *category)
        .unwrap_or(StatusCategory::Unknown);

    Classification { category, key_line }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_blank_runs() {
        assert_eq!(normalize("a  \n\n\n\nb"), "a\nb");
        assert_eq!(normalize("a\n\n\n\nb"), "a\nb");
        assert_eq!(normalize("a\nb"), "a\nb");
    }
}
