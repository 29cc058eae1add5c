//! Browser engine implementation using Playwright
//!
//! Wraps the Playwright bindings behind the engine traits so the scenario
//! lifecycle never touches Playwright types directly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use playwright::api as pw;
// Import RecordVideo manually if not exported in api prelude
use playwright::api::browser_type::RecordVideo;
use playwright::Playwright;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use super::trace::TraceRecorder;
use crate::driver::traits::{
    Browser, BrowserContext, BrowserEngine, BrowserKind, ContextOptions, LaunchOptions, Page,
    PageEvent, TraceOptions,
};
use crate::error::LifecycleError;

/// Browser engine backed by a Playwright driver process
pub struct PlaywrightEngine {
    playwright: Arc<Playwright>,
}

impl PlaywrightEngine {
    /// Start the Playwright driver
    pub async fn initialize() -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;
        Ok(Self {
            playwright: Arc::new(playwright),
        })
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    async fn launch(&self, kind: BrowserKind, options: &LaunchOptions) -> Result<Arc<dyn Browser>> {
        let browser_type = match kind {
            BrowserKind::Chromium => self.playwright.chromium(),
            BrowserKind::Firefox => self.playwright.firefox(),
            BrowserKind::Webkit => self.playwright.webkit(),
        };

        // The bindings have no request routing: Chromium gets the denylist as
        // host resolver rules, Firefox as hosts resolved to loopback.
        let mut args = options.args.clone();
        let mut prefs = options.firefox_user_prefs.clone();
        let resolver_blocking = !options.blocked_hosts.is_empty()
            && match kind {
                BrowserKind::Chromium => {
                    args.push(host_resolver_rules(&options.blocked_hosts));
                    true
                }
                BrowserKind::Firefox => {
                    prefs.push(firefox_local_domains(&options.blocked_hosts));
                    true
                }
                BrowserKind::Webkit => false,
            };

        let mut launcher = browser_type.launcher().headless(options.headless);
        if !args.is_empty() {
            launcher = launcher.args(&args);
        }
        if kind == BrowserKind::Firefox && !prefs.is_empty() {
            let prefs: serde_json::Map<String, serde_json::Value> = prefs.into_iter().collect();
            launcher = launcher.firefox_user_prefs(prefs);
        }

        log::info!("Launching local {} browser", kind);
        let browser = launcher
            .launch()
            .await
            .with_context(|| format!("Failed to launch {}", kind))?;

        Ok(Arc::new(PlaywrightBrowser {
            browser,
            resolver_blocking,
        }))
    }

    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Browser>> {
        log::info!("Connecting to remote browser");
        let browser = self
            .playwright
            .chromium()
            .connect_over_cdp_builder(endpoint)
            .connect_over_cdp()
            .await
            .context("Failed to connect to remote browser")?;

        Ok(Arc::new(PlaywrightBrowser {
            browser,
            resolver_blocking: false,
        }))
    }
}

/// `--host-resolver-rules` argument mapping every host to an unresolvable name
fn host_resolver_rules(hosts: &[String]) -> String {
    let rules: Vec<String> = hosts
        .iter()
        .map(|host| format!("MAP {} ~NOTFOUND", host))
        .collect();
    format!("--host-resolver-rules={}", rules.join(", "))
}

/// Firefox pref resolving every host to loopback, so requests to them fail
fn firefox_local_domains(hosts: &[String]) -> (String, serde_json::Value) {
    (
        "network.dns.localDomains".to_string(),
        serde_json::Value::String(hosts.join(",")),
    )
}

struct PlaywrightBrowser {
    browser: pw::Browser,
    resolver_blocking: bool,
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>> {
        let mut builder = self
            .browser
            .context_builder()
            .user_agent(&options.user_agent)
            .accept_downloads(options.accept_downloads);

        if let Some(ref dir) = options.record_video_dir {
            std::fs::create_dir_all(dir)?;
            builder = builder.record_video(RecordVideo { dir, size: None });
        }

        let context = builder.build().await?;

        Ok(Box::new(PlaywrightContext {
            context,
            viewport: options.viewport,
            resolver_blocking: self.resolver_blocking,
            trace: Arc::new(TraceRecorder::default()),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

struct PlaywrightContext {
    context: pw::BrowserContext,
    viewport: crate::driver::traits::Viewport,
    resolver_blocking: bool,
    trace: Arc<TraceRecorder>,
}

#[async_trait]
impl BrowserContext for PlaywrightContext {
    async fn start_tracing(&self, options: TraceOptions) -> Result<()> {
        self.trace.start(options).await;
        Ok(())
    }

    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                // Final frame of every open page goes into the archive
                for page in self.context.pages().unwrap_or_default() {
                    self.trace.capture(&page).await;
                }
                self.trace.write(path).await
            }
            None => {
                self.trace.discard().await;
                Ok(())
            }
        }
    }

    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let page = self.context.new_page().await?;
        page.set_viewport_size(pw::Viewport {
            width: self.viewport.width as i32,
            height: self.viewport.height as i32,
        })
        .await?;

        let (sender, _) = broadcast::channel(256);
        let listener = spawn_event_listener(&page, sender.clone(), self.trace.clone())?;

        Ok(Box::new(PlaywrightPage {
            page,
            events: sender,
            listener: Mutex::new(Some(listener)),
            resolver_blocking: self.resolver_blocking,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.context.close().await?;
        Ok(())
    }
}

/// Stream items are wrapped in a `Result` by the broadcast-backed bindings
trait EventItem {
    fn into_event(self) -> Option<pw::page::Event>;
}

impl EventItem for pw::page::Event {
    fn into_event(self) -> Option<pw::page::Event> {
        Some(self)
    }
}

impl<E> EventItem for std::result::Result<pw::page::Event, E> {
    fn into_event(self) -> Option<pw::page::Event> {
        self.ok()
    }
}

fn translate(event: pw::page::Event) -> Option<PageEvent> {
    match event {
        pw::page::Event::Console(msg) => Some(PageEvent::Console {
            kind: msg.r#type().unwrap_or_default(),
            text: msg.text().unwrap_or_default(),
        }),
        pw::page::Event::Response(resp) => Some(PageEvent::Response {
            url: resp.url().unwrap_or_default(),
            status: resp.status().map(|s| s as u16).unwrap_or_default(),
        }),
        _ => None,
    }
}

fn spawn_event_listener(
    page: &pw::Page,
    sender: broadcast::Sender<PageEvent>,
    trace: Arc<TraceRecorder>,
) -> Result<JoinHandle<()>> {
    let mut stream = page.subscribe_event()?;
    Ok(tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let Some(event) = item.into_event().and_then(translate) else {
                continue;
            };
            trace.record_event(&event).await;
            // No receivers is fine, the scenario may not listen
            let _ = sender.send(event);
        }
    }))
}

struct PlaywrightPage {
    page: pw::Page,
    events: broadcast::Sender<PageEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
    resolver_blocking: bool,
}

#[async_trait]
impl Page for PlaywrightPage {
    fn subscribe(&self) -> Result<broadcast::Receiver<PageEvent>> {
        Ok(self.events.subscribe())
    }

    async fn block_requests(&self, pattern: &Regex) -> Result<()> {
        if !self.resolver_blocking {
            anyhow::bail!("request interception is not available for this browser");
        }
        log::debug!("Request denylist enforced at launch: {}", pattern);
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let bytes = self
            .page
            .screenshot_builder()
            .r#type(pw::ScreenshotType::Png)
            .full_page(full_page)
            .screenshot()
            .await?;
        Ok(bytes)
    }

    async fn evaluate_message(&self, message: &str) -> Result<String> {
        let reply: String = self
            .page
            .evaluate("_ => {}", message.to_string())
            .await?;
        Ok(reply)
    }

    async fn close(&self) -> Result<()> {
        let listener = self.listener.lock().await.take();
        let Some(listener) = listener else {
            return Err(LifecycleError::AlreadyClosed("page").into());
        };
        listener.abort();
        self.page.close(None).await?;
        Ok(())
    }
}
