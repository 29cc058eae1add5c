//! Acquisition and release of per-scenario browser resources

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::context::{AttachmentLog, AttachmentSink, ScenarioContext, ScenarioMeta};
use super::state::{ScenarioPhase, ScenarioState};
use super::target::{denylist_pattern, BrowserStrategy, ScenarioBrowser};
use crate::driver::{Browser, BrowserContext, Page, PageEvent, TraceOptions};
use crate::error::LifecycleError;
use crate::utils::{filesystem_timestamp, slugify};

/// Message understood by the grid's page instrumentation
pub const GRID_DETAILS_MESSAGE: &str = r#"lambdatest_action: {"action":"getTestDetails"}"#;

/// Run-level settings the lifecycle needs for every scenario
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub run_id: String,
    pub output_root: PathBuf,
    pub traces_dir: PathBuf,
    pub record_video: bool,
    /// Print every page response, colorized by status class
    pub verbose_responses: bool,
}

impl LifecycleSettings {
    /// `<output_root>/<runId>/recordings/<slug>`
    pub fn recording_dir(&self, slug: &str) -> PathBuf {
        self.output_root
            .join(&self.run_id)
            .join("recordings")
            .join(slug)
    }
}

/// Test metadata the grid assigned to a scenario
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridDetails {
    pub build_id: Option<String>,
    pub test_id: Option<String>,
}

impl GridDetails {
    /// Parse the grid reply, `{"data": {"build_id": .., "test_id": ..}}`
    pub fn parse(raw: &str) -> Result<Self, LifecycleError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let data = value
            .get("data")
            .ok_or_else(|| LifecycleError::GridMetadata("reply has no data".to_string()))?;
        let field = |name: &str| {
            data.get(name).and_then(|v| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        };
        Ok(Self {
            build_id: field("build_id"),
            test_id: field("test_id"),
        })
    }
}

/// Resources acquired so far, closed again if a later stage fails
struct Partial {
    browser: ScenarioBrowser,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Box<dyn Page>>,
}

impl Partial {
    async fn abandon(self) {
        if let Some(page) = self.page {
            let _ = page.close().await;
        }
        if let Some(context) = self.context {
            let _ = context.close().await;
        }
        self.browser.release().await;
    }
}

/// Open an isolated context and page for one scenario.
///
/// Any failure here is fatal to the scenario; resources opened before the
/// failing stage are closed again.
pub async fn acquire_scenario_context(
    strategy: &dyn BrowserStrategy,
    shared: Option<Arc<dyn Browser>>,
    meta: ScenarioMeta,
    settings: &LifecycleSettings,
    sink: Arc<dyn AttachmentSink>,
) -> Result<ScenarioContext> {
    let slug = slugify(&meta.name);
    let start_time = Utc::now();
    let debug = meta.has_tag("debug");
    let ignored = meta.has_tag("ignore");

    let video_dir = settings
        .record_video
        .then(|| settings.recording_dir(&slug));
    let options = strategy.context_options(video_dir);

    let browser = strategy.browser_for(shared, &meta).await?;
    let mut partial = Partial {
        browser,
        context: None,
        page: None,
    };

    if let Err(e) = open_page(strategy, &mut partial, &options).await {
        partial.abandon().await;
        return Err(e);
    }

    let attachments = AttachmentLog::new(&meta.name, sink);
    let (listener, grid) = match wire_page(strategy, &partial, &attachments, settings).await {
        Ok(wired) => wired,
        Err(e) => {
            partial.abandon().await;
            return Err(e);
        }
    };

    let mut state = ScenarioState::new(&meta.name);
    state.advance(ScenarioPhase::Running)?;

    log::debug!("Scenario '{}' acquired ({})", meta.name, strategy.target());

    Ok(ScenarioContext {
        slug,
        start_time,
        debug,
        ignored,
        video_dir: options.record_video_dir,
        grid_test_id: grid.as_ref().and_then(|g| g.test_id.clone()),
        grid_build_id: grid.and_then(|g| g.build_id),
        meta,
        state,
        steps: Vec::new(),
        attachments,
        browser: Some(partial.browser),
        context: partial.context,
        page: partial.page,
        listener: Some(listener),
    })
}

async fn open_page(
    strategy: &dyn BrowserStrategy,
    partial: &mut Partial,
    options: &crate::driver::ContextOptions,
) -> Result<()> {
    let context = partial
        .browser
        .handle
        .new_context(options)
        .await
        .map_err(|e| LifecycleError::acquisition("browser context", e))?;
    let context = partial.context.insert(context);

    // Tracing runs before the page is first used
    context
        .start_tracing(TraceOptions {
            screenshots: true,
            snapshots: true,
        })
        .await
        .map_err(|e| LifecycleError::acquisition("tracing", e))?;

    let page = context
        .new_page()
        .await
        .map_err(|e| LifecycleError::acquisition("page", e))?;
    partial.page = Some(page);

    log::trace!("Context opened for target {}", strategy.target());
    Ok(())
}

async fn wire_page(
    strategy: &dyn BrowserStrategy,
    partial: &Partial,
    attachments: &AttachmentLog,
    settings: &LifecycleSettings,
) -> Result<(PageListener, Option<GridDetails>)> {
    let page = partial
        .page
        .as_deref()
        .ok_or(LifecycleError::AlreadyClosed("page"))?;

    let pattern = denylist_pattern()?;
    let events = page
        .subscribe()
        .map_err(|e| LifecycleError::acquisition("page events", e))?;
    let listener = spawn_page_listener(events, attachments.clone(), settings.verbose_responses);

    let mut grid = None;
    if strategy.blocks_requests() {
        if let Err(e) = page.block_requests(&pattern).await {
            listener.abort();
            return Err(LifecycleError::acquisition("request interceptor", e).into());
        }
    }
    if strategy.reads_grid_metadata() {
        grid = match page.evaluate_message(GRID_DETAILS_MESSAGE).await {
            Ok(raw) => match GridDetails::parse(&raw) {
                Ok(details) => Some(details),
                Err(e) => {
                    log::warn!("Ignoring grid test details: {}", e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Grid test details unavailable: {}", e);
                None
            }
        };
    }

    Ok((listener, grid))
}

/// Console/response listener of one page
///
/// `flush` stops it after every event already delivered to the page's channel
/// has been handled; `abort` drops whatever is still queued.
pub(crate) struct PageListener {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PageListener {
    pub(crate) async fn flush(self) {
        let Self { stop, task } = self;
        let _ = stop.send(());
        if let Err(e) = task.await {
            log::debug!("Page listener ended abnormally: {}", e);
        }
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

/// Forward `log`-level console messages as attachments and, when verbose,
/// print every response
fn spawn_page_listener(
    mut events: broadcast::Receiver<PageEvent>,
    attachments: AttachmentLog,
    verbose_responses: bool,
) -> PageListener {
    let (stop, mut stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => handle_page_event(event, &attachments, verbose_responses).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Dropped {} page events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stopped => {
                    loop {
                        match events.try_recv() {
                            Ok(event) => handle_page_event(event, &attachments, verbose_responses).await,
                            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                                log::warn!("Dropped {} page events", skipped);
                            }
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
    });
    PageListener { stop, task }
}

async fn handle_page_event(event: PageEvent, attachments: &AttachmentLog, verbose_responses: bool) {
    match event {
        PageEvent::Console { kind, text } if kind == "log" => {
            attachments.attach_console(&text).await;
        }
        PageEvent::Response { url, status } if verbose_responses => {
            print_response(&url, status);
        }
        _ => {}
    }
}

fn print_response(url: &str, status: u16) {
    match status {
        200..=299 => println!("{}", url.cyan()),
        300..=399 => println!("{}", url.yellow()),
        _ => eprintln!("{}", url.red()),
    }
}

/// `<traces_dir>/<slug>-<timestamp>trace.zip`
pub fn trace_path(traces_dir: &Path, ctx: &ScenarioContext) -> PathBuf {
    traces_dir.join(format!(
        "{}-{}trace.zip",
        ctx.slug,
        filesystem_timestamp(&ctx.start_time)
    ))
}

/// Stop tracing; the archive is only kept when `persist` is set.
///
/// Returns the archive path when one was written.
pub async fn finish_trace(
    ctx: &ScenarioContext,
    traces_dir: &Path,
    persist: bool,
) -> Option<PathBuf> {
    let context = ctx.context.as_deref()?;
    if persist {
        let path = trace_path(traces_dir, ctx);
        match context.stop_tracing(Some(&path)).await {
            Ok(()) => Some(path),
            Err(e) => {
                log::error!("Failed to save trace for '{}': {}", ctx.meta.name, e);
                None
            }
        }
    } else {
        if let Err(e) = context.stop_tracing(None).await {
            log::debug!("Trace discard failed for '{}': {}", ctx.meta.name, e);
        }
        None
    }
}

/// Close the page, then the context, then a scenario-owned browser.
///
/// Safe to call any number of times; teardown errors are only logged.
pub async fn release_scenario_context(ctx: &mut ScenarioContext) {
    if let Some(listener) = ctx.listener.take() {
        listener.abort();
    }
    if let Some(page) = ctx.page.take() {
        if let Err(e) = page.close().await {
            log::debug!("Page of '{}' already closed: {}", ctx.meta.name, e);
        }
    }
    if let Some(context) = ctx.context.take() {
        if let Err(e) = context.close().await {
            log::debug!("Context of '{}' already closed: {}", ctx.meta.name, e);
        }
    }
    if let Some(browser) = ctx.browser.take() {
        browser.release().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_dir() {
        let settings = LifecycleSettings {
            run_id: "run-1".to_string(),
            output_root: PathBuf::from("temp"),
            traces_dir: PathBuf::from("traces"),
            record_video: true,
            verbose_responses: false,
        };
        assert_eq!(
            settings.recording_dir("Login-succeeds"),
            PathBuf::from("temp/run-1/recordings/Login-succeeds")
        );
    }

    #[test]
    fn test_grid_details_parse() {
        let details = GridDetails::parse(r#"{"data":{"build_id":12345,"test_id":"T-9"}}"#).unwrap();
        assert_eq!(details.build_id.as_deref(), Some("12345"));
        assert_eq!(details.test_id.as_deref(), Some("T-9"));

        let details = GridDetails::parse(r#"{"data":{"build_id":"B1"}}"#).unwrap();
        assert_eq!(details.test_id, None);

        assert!(GridDetails::parse(r#"{"status":"error"}"#).is_err());
        assert!(GridDetails::parse("not json").is_err());
    }
}
