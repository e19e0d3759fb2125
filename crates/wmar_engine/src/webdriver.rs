//! `Page` over WebDriver (chromedriver / geckodriver) via fantoccini.
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, NewSessionError};
use fantoccini::wd::Capabilities;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::page::{
    BrowserEngine, BrowserError, LoadState, Page, PageLauncher, Pattern, Query, RenderContext,
};
use crate::scripts;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119 Safari/537.36";

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub chrome_url: String,
    pub firefox_url: String,
    pub headless: bool,
    pub window: (u32, u32),
    pub user_agent: String,
    pub locale: String,
    /// Bound for load-state waits issued by `goto`.
    pub load_timeout: Duration,
    pub poll_interval: Duration,
    /// Quiet period that counts as network idle.
    pub idle_window: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            chrome_url: "http://localhost:9515".to_string(),
            firefox_url: "http://localhost:4444".to_string(),
            headless: true,
            window: (1280, 900),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            locale: "en-US".to_string(),
            load_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(100),
            idle_window: Duration::from_millis(500),
        }
    }
}

impl DriverSettings {
    pub fn driver_url(&self, engine: BrowserEngine) -> &str {
        match engine {
            BrowserEngine::Chromium => &self.chrome_url,
            BrowserEngine::Firefox => &self.firefox_url,
        }
    }
}

/// Session capabilities for `engine`.
pub fn capabilities(engine: BrowserEngine, settings: &DriverSettings) -> Capabilities {
    let mut caps = Capabilities::new();
    caps.insert("acceptInsecureCerts".to_string(), json!(true));
    // Load waits are ours; the driver returns once the DOM is parsed.
    caps.insert("pageLoadStrategy".to_string(), json!("eager"));

    let (width, height) = settings.window;
    match engine {
        BrowserEngine::Chromium => {
            let mut args = vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                format!("--lang={}", settings.locale),
                format!("--user-agent={}", settings.user_agent),
                format!("--window-size={width},{height}"),
            ];
            if settings.headless {
                args.push("--headless=new".to_string());
                args.push("--disable-gpu".to_string());
                args.push("--no-sandbox".to_string());
                args.push("--disable-dev-shm-usage".to_string());
            }
            caps.insert("browserName".to_string(), json!("chrome"));
            caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        }
        BrowserEngine::Firefox => {
            let mut args = vec![format!("--width={width}"), format!("--height={height}")];
            if settings.headless {
                args.push("-headless".to_string());
            }
            caps.insert("browserName".to_string(), json!("firefox"));
            caps.insert(
                "moz:firefoxOptions".to_string(),
                json!({
                    "args": args,
                    "prefs": {
                        "intl.accept_languages": settings.locale,
                        "general.useragent.override": settings.user_agent,
                    }
                }),
            );
        }
    }
    caps
}

impl From<CmdError> for BrowserError {
    fn from(err: CmdError) -> Self {
        BrowserError::Command(err.to_string())
    }
}

impl From<NewSessionError> for BrowserError {
    fn from(err: NewSessionError) -> Self {
        BrowserError::Session(err.to_string())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, BrowserError> {
    serde_json::to_value(value).map_err(|err| BrowserError::Script(err.to_string()))
}

fn expect_bool(value: Value) -> Result<bool, BrowserError> {
    value
        .as_bool()
        .ok_or_else(|| BrowserError::Script(format!("expected boolean, got {value}")))
}

/// Fail fast with a readable error when no driver listens at `base_url`.
pub async fn probe_driver(base_url: &str) -> Result<(), BrowserError> {
    let unavailable = |message: String| BrowserError::DriverUnavailable {
        url: base_url.to_string(),
        message,
    };
    let status_url = url::Url::parse(base_url)
        .and_then(|base| base.join("status"))
        .map_err(|err| unavailable(err.to_string()))?;

    let response = reqwest::get(status_url)
        .await
        .map_err(|err| unavailable(err.to_string()))?;
    if !response.status().is_success() {
        return Err(unavailable(format!("status {}", response.status())));
    }
    Ok(())
}

pub struct WebDriverPage {
    client: Client,
    engine: BrowserEngine,
    settings: DriverSettings,
    // Frame switching and the command after it must not interleave.
    scope: Mutex<()>,
}

impl WebDriverPage {
    pub async fn connect(
        engine: BrowserEngine,
        settings: &DriverSettings,
    ) -> Result<Self, BrowserError> {
        let url = settings.driver_url(engine);
        probe_driver(url).await?;
        engine_info!("Connecting to {} WebDriver at {}", engine, url);

        let client = ClientBuilder::rustls()
            .capabilities(capabilities(engine, settings))
            .connect(url)
            .await?;

        let (width, height) = settings.window;
        if let Err(err) = client.set_window_size(width, height).await {
            engine_debug!("Could not set window size: {}", err);
        }

        Ok(Self {
            client,
            engine,
            settings: settings.clone(),
            scope: Mutex::new(()),
        })
    }

    /// Caller must hold `scope`.
    async fn enter(&self, ctx: RenderContext) -> Result<(), BrowserError> {
        self.client.enter_frame(None).await?;
        if let RenderContext::Frame(index) = ctx {
            self.client.enter_frame(Some(index)).await?;
        }
        Ok(())
    }

    /// Caller must hold `scope`.
    async fn run_in(
        &self,
        ctx: RenderContext,
        body: &str,
        args: Vec<Value>,
    ) -> Result<Value, BrowserError> {
        self.enter(ctx).await?;
        Ok(self
            .client
            .execute(&scripts::with_prelude(body), args)
            .await?)
    }

    async fn exec(
        &self,
        ctx: RenderContext,
        body: &str,
        args: Vec<Value>,
    ) -> Result<Value, BrowserError> {
        let _guard = self.scope.lock().await;
        self.run_in(ctx, body, args).await
    }

    /// Resolve the `index`-th match to a native element handle. Caller must hold `scope`.
    async fn mark(
        &self,
        ctx: RenderContext,
        query: &Query,
        index: usize,
    ) -> Result<Element, BrowserError> {
        let marked = self
            .run_in(ctx, scripts::MARK, vec![encode(query)?, json!(index)])
            .await?;
        if !expect_bool(marked)? {
            return Err(BrowserError::NoMatch(query.to_string()));
        }
        Ok(self.client.find(Locator::Css(scripts::MARK_SELECTOR)).await?)
    }

    async fn mask_automation(&self) {
        if let Err(err) = self.exec(RenderContext::Top, scripts::MASK_AUTOMATION, vec![]).await {
            engine_debug!("automation mask not applied: {}", err);
        }
    }

    async fn await_ready(&self, state: LoadState, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        let mut quiet_since: Option<(u64, Instant)> = None;
        loop {
            // Probes fail while a navigation is in flight; keep polling.
            if let Some((ready_state, resources)) = self.ready_probe().await {
                let ready = match state {
                    LoadState::DomContentLoaded => {
                        ready_state == "interactive" || ready_state == "complete"
                    }
                    LoadState::NetworkIdle => ready_state == "complete",
                };
                if ready && state != LoadState::NetworkIdle {
                    return Ok(());
                }
                if ready {
                    match quiet_since {
                        Some((count, since)) if count == resources => {
                            if since.elapsed() >= self.settings.idle_window {
                                return Ok(());
                            }
                        }
                        _ => quiet_since = Some((resources, Instant::now())),
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("{state:?}"),
                    timeout,
                });
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ready_probe(&self) -> Option<(String, u64)> {
        let value = self
            .exec(RenderContext::Top, scripts::READY_PROBE, vec![])
            .await
            .ok()?;
        let state = value.get(0)?.as_str()?.to_string();
        let resources = value.get(1)?.as_u64()?;
        Some((state, resources))
    }
}

#[async_trait::async_trait]
impl Page for WebDriverPage {
    async fn goto(&self, url: &str, wait: LoadState) -> Result<(), BrowserError> {
        engine_info!("Navigating to {} ({:?})", url, wait);
        {
            let _guard = self.scope.lock().await;
            self.client.goto(url).await?;
        }
        self.wait_for_load(wait, self.settings.load_timeout).await
    }

    async fn wait_for_load(&self, state: LoadState, timeout: Duration) -> Result<(), BrowserError> {
        self.await_ready(state, timeout).await?;
        // Waits follow navigations; mask the fresh document.
        self.mask_automation().await;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn contexts(&self) -> Result<Vec<RenderContext>, BrowserError> {
        let frames = self
            .exec(RenderContext::Top, scripts::FRAME_COUNT, vec![])
            .await?
            .as_u64()
            .unwrap_or(0);
        let frames = u16::try_from(frames).unwrap_or(u16::MAX);
        let mut contexts = Vec::with_capacity(usize::from(frames) + 1);
        contexts.push(RenderContext::Top);
        contexts.extend((0..frames).map(RenderContext::Frame));
        Ok(contexts)
    }

    async fn count(&self, ctx: RenderContext, query: &Query) -> Result<usize, BrowserError> {
        let value = self.exec(ctx, scripts::COUNT, vec![encode(query)?]).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| BrowserError::Script(format!("expected count, got {value}")))
    }

    async fn is_visible(&self, ctx: RenderContext, query: &Query) -> Result<bool, BrowserError> {
        expect_bool(self.exec(ctx, scripts::IS_VISIBLE, vec![encode(query)?]).await?)
    }

    async fn fill(&self, ctx: RenderContext, query: &Query, value: &str) -> Result<(), BrowserError> {
        let _guard = self.scope.lock().await;
        let element = self.mark(ctx, query, 0).await?;
        element.clear().await?;
        element.send_keys(value).await?;
        Ok(())
    }

    async fn click(&self, ctx: RenderContext, query: &Query, force: bool) -> Result<(), BrowserError> {
        if force {
            let clicked = self.exec(ctx, scripts::FORCE_CLICK, vec![encode(query)?]).await?;
            return if expect_bool(clicked)? {
                Ok(())
            } else {
                Err(BrowserError::NoMatch(query.to_string()))
            };
        }
        let _guard = self.scope.lock().await;
        let element = self.mark(ctx, query, 0).await?;
        element.click().await?;
        Ok(())
    }

    async fn check(&self, ctx: RenderContext, query: &Query) -> Result<(), BrowserError> {
        let checked = self.exec(ctx, scripts::CHECK, vec![encode(query)?]).await?;
        if expect_bool(checked)? {
            Ok(())
        } else {
            Err(BrowserError::NoMatch(query.to_string()))
        }
    }

    async fn inner_text(
        &self,
        ctx: RenderContext,
        query: &Query,
    ) -> Result<Option<String>, BrowserError> {
        let value = self.exec(ctx, scripts::INNER_TEXT, vec![encode(query)?]).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn set_value_raw(
        &self,
        ctx: RenderContext,
        query: &Query,
        index: usize,
        value: &str,
    ) -> Result<(), BrowserError> {
        let assigned = self
            .exec(
                ctx,
                scripts::SET_VALUE,
                vec![encode(query)?, json!(index), json!(value)],
            )
            .await?;
        if expect_bool(assigned)? {
            Ok(())
        } else {
            Err(BrowserError::NoMatch(format!("{query} #{index}")))
        }
    }

    async fn force_select_choice(
        &self,
        ctx: RenderContext,
        label: &Pattern,
    ) -> Result<bool, BrowserError> {
        expect_bool(
            self.exec(ctx, scripts::FORCE_SELECT, vec![encode(label)?])
                .await?,
        )
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let _guard = self.scope.lock().await;
        self.enter(RenderContext::Top).await?;
        Ok(self.client.source().await?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let _guard = self.scope.lock().await;
        self.enter(RenderContext::Top).await?;
        Ok(self.client.screenshot().await?)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        engine_info!("Closing {} session", self.engine);
        if let Err(err) = self.client.clone().close().await {
            engine_warn!("Closing {} session failed: {}", self.engine, err);
            return Err(err.into());
        }
        Ok(())
    }
}

/// Launches pages against the configured WebDriver endpoints.
#[derive(Debug, Clone, Default)]
pub struct WebDriverLauncher {
    settings: DriverSettings,
}

impl WebDriverLauncher {
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl PageLauncher for WebDriverLauncher {
    async fn launch(&self, engine: BrowserEngine) -> Result<Box<dyn Page>, BrowserError> {
        let page = WebDriverPage::connect(engine, &self.settings).await?;
        Ok(Box::new(page))
    }
}
