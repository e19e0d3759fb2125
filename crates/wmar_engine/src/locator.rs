use std::fmt;
use std::time::Duration;

use engine_logging::{engine_debug, engine_trace};

use crate::page::{Page, Query, RenderContext};
use crate::wait::poll_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub query: Query,
    pub at_least: usize,
}

/// Side-effect-free test over one context's current DOM.
///
/// Holds when every condition holds. Query failures count as "does not hold".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPredicate {
    conditions: Vec<Condition>,
}

impl ContextPredicate {
    pub fn at_least(query: Query, at_least: usize) -> Self {
        Self::default().and_at_least(query, at_least)
    }

    pub fn exists(query: Query) -> Self {
        Self::at_least(query, 1)
    }

    pub fn and_at_least(mut self, query: Query, at_least: usize) -> Self {
        self.conditions.push(Condition { query, at_least });
        self
    }

    pub fn and_exists(self, query: Query) -> Self {
        self.and_at_least(query, 1)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub async fn holds(&self, page: &dyn Page, ctx: RenderContext) -> bool {
        for condition in &self.conditions {
            match page.count(ctx, &condition.query).await {
                Ok(found) if found >= condition.at_least => {}
                Ok(_) => return false,
                Err(err) => {
                    engine_trace!("predicate probe on {} failed: {}", ctx, err);
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Display for ContextPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|c| format!(">={} {}", c.at_least, c.query))
            .collect();
        write!(f, "{}", parts.join(" and "))
    }
}

/// Finds which render context currently hosts a UI region.
#[derive(Debug, Clone)]
pub struct DocumentLocator {
    poll_interval: Duration,
}

impl Default for DocumentLocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POLL_INTERVAL)
    }
}

impl DocumentLocator {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Poll every context until `predicate` holds for one, or `timeout` elapses.
    ///
    /// Contexts are re-enumerated on each pass; the top document wins ties,
    /// then embedded documents in attachment order. `None` is not an error.
    pub async fn locate(
        &self,
        page: &dyn Page,
        predicate: &ContextPredicate,
        timeout: Duration,
    ) -> Option<RenderContext> {
        let found = poll_for(timeout, self.poll_interval, move || {
            self.scan_once(page, predicate)
        })
        .await;
        match found {
            Some(ctx) => engine_debug!("located [{}] in {}", predicate, ctx),
            None => engine_debug!("[{}] not located within {:?}", predicate, timeout),
        }
        found
    }

    /// One ordered pass over the currently attached contexts.
    pub async fn scan_once(
        &self,
        page: &dyn Page,
        predicate: &ContextPredicate,
    ) -> Option<RenderContext> {
        let contexts = match page.contexts().await {
            Ok(contexts) => contexts,
            Err(err) => {
                engine_trace!("context enumeration failed: {}", err);
                return None;
            }
        };
        for ctx in contexts {
            if predicate.holds(page, ctx).await {
                return Some(ctx);
            }
        }
        None
    }
}
