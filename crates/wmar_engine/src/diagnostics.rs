//! Best-effort diagnostic artifacts. Nothing here ever fails the run.
use std::fs;
use std::path::{Path, PathBuf};

use engine_logging::{engine_info, engine_warn};
use scraper::{Html, Selector};

use crate::page::Page;

#[async_trait::async_trait]
pub trait DiagnosticSink: Send + Sync {
    /// Dump page source and screenshot under `tag`; returns the files written.
    async fn capture(&self, page: &dyn Page, tag: &str) -> Vec<PathBuf>;

    async fn screenshot(&self, page: &dyn Page, tag: &str) -> Option<PathBuf>;
}

/// Discards every capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiagnostics;

#[async_trait::async_trait]
impl DiagnosticSink for NoDiagnostics {
    async fn capture(&self, _page: &dyn Page, _tag: &str) -> Vec<PathBuf> {
        Vec::new()
    }

    async fn screenshot(&self, _page: &dyn Page, _tag: &str) -> Option<PathBuf> {
        None
    }
}

/// Writes `wmar-<tag>.html` / `wmar-<tag>.png` into a directory.
#[derive(Debug, Clone)]
pub struct FileDiagnostics {
    dir: PathBuf,
}

impl FileDiagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, tag: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("wmar-{tag}.{extension}"))
    }
}

#[async_trait::async_trait]
impl DiagnosticSink for FileDiagnostics {
    async fn capture(&self, page: &dyn Page, tag: &str) -> Vec<PathBuf> {
        let mut written = Vec::new();

        match page.content().await {
            Ok(html) => {
                engine_info!(
                    "[{}] top-document form inputs in dump: {}",
                    tag,
                    count_form_inputs(&html)
                );
                let path = self.path_for(tag, "html");
                if write_artifact(&path, html.as_bytes()) {
                    written.push(path);
                }
            }
            Err(err) => engine_warn!("[{}] page content unavailable: {}", tag, err),
        }

        match page.contexts().await {
            Ok(contexts) => engine_info!(
                "[{}] embedded documents: {}",
                tag,
                contexts.len().saturating_sub(1)
            ),
            Err(err) => engine_warn!("[{}] frame enumeration failed: {}", tag, err),
        }

        if let Some(path) = self.screenshot(page, tag).await {
            written.push(path);
        }
        written
    }

    async fn screenshot(&self, page: &dyn Page, tag: &str) -> Option<PathBuf> {
        let png = match page.screenshot().await {
            Ok(png) => png,
            Err(err) => {
                engine_warn!("[{}] screenshot failed: {}", tag, err);
                return None;
            }
        };
        let path = self.path_for(tag, "png");
        write_artifact(&path, &png).then_some(path)
    }
}

/// Inputs inside `<main>` or a `<form>` of the serialized top document.
pub fn count_form_inputs(html: &str) -> usize {
    let doc = Html::parse_document(html);
    match Selector::parse("main input, form input") {
        Ok(selector) => doc.select(&selector).count(),
        Err(_) => 0,
    }
}

fn write_artifact(path: &Path, bytes: &[u8]) -> bool {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = fs::create_dir_all(parent) {
                engine_warn!("Could not create artifact dir {:?}: {}", parent, err);
                return false;
            }
        }
    }
    match fs::write(path, bytes) {
        Ok(()) => {
            engine_info!("Wrote diagnostic artifact {:?}", path);
            true
        }
        Err(err) => {
            engine_warn!("Could not write diagnostic artifact {:?}: {}", path, err);
            false
        }
    }
}
