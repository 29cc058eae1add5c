//! In-memory browser engine
//!
//! Records every call instead of driving a browser. Used by the test suite
//! and by runners that want to check their hook wiring without Playwright.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::traits::{
    Browser, BrowserContext, BrowserEngine, BrowserKind, ContextOptions, LaunchOptions, Page,
    PageEvent, TraceOptions,
};
use crate::error::LifecycleError;

/// Tiny PNG returned for every screenshot
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Everything the engine has been asked to do
#[derive(Debug, Default, Clone)]
pub struct EngineLog {
    pub launches: Vec<(BrowserKind, LaunchOptions)>,
    pub connections: Vec<String>,
    pub contexts: Vec<ContextOptions>,
    pub pages_opened: usize,
    pub blocked_patterns: Vec<String>,
    pub traces_started: usize,
    pub traces_written: Vec<PathBuf>,
    pub traces_discarded: usize,
    pub evaluations: Vec<String>,
    pub screenshots: usize,
    pub browsers_closed: usize,
    pub contexts_closed: usize,
    pub pages_closed: usize,
}

#[derive(Default)]
struct Shared {
    log: Mutex<EngineLog>,
    pages: Mutex<Vec<broadcast::Sender<PageEvent>>>,
    grid_reply: Mutex<Option<String>>,
    fail_new_context: AtomicBool,
}

impl Shared {
    fn log(&self) -> MutexGuard<'_, EngineLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Browser engine that keeps everything in memory
#[derive(Clone, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply returned by every page evaluation
    pub fn with_grid_reply(self, reply: impl Into<String>) -> Self {
        *self
            .shared
            .grid_reply
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reply.into());
        self
    }

    /// Make every following `new_context` call fail
    pub fn fail_new_context(&self, fail: bool) {
        self.shared.fail_new_context.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the calls recorded so far
    pub fn log(&self) -> EngineLog {
        self.shared.log().clone()
    }

    /// Deliver an event to every page opened so far
    pub fn emit(&self, event: PageEvent) {
        let pages = self.shared.pages.lock().unwrap_or_else(|e| e.into_inner());
        for sender in pages.iter() {
            let _ = sender.send(event.clone());
        }
    }
}

#[async_trait]
impl BrowserEngine for MemoryEngine {
    async fn launch(&self, kind: BrowserKind, options: &LaunchOptions) -> Result<Arc<dyn Browser>> {
        self.shared.log().launches.push((kind, options.clone()));
        Ok(Arc::new(MemoryBrowser::new(self.shared.clone())))
    }

    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Browser>> {
        self.shared.log().connections.push(endpoint.to_string());
        Ok(Arc::new(MemoryBrowser::new(self.shared.clone())))
    }
}

struct MemoryBrowser {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryBrowser {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Browser for MemoryBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("browser").into());
        }
        if self.shared.fail_new_context.load(Ordering::SeqCst) {
            anyhow::bail!("context creation refused");
        }
        self.shared.log().contexts.push(options.clone());
        Ok(Box::new(MemoryContext {
            shared: self.shared.clone(),
            tracing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("browser").into());
        }
        self.shared.log().browsers_closed += 1;
        Ok(())
    }
}

struct MemoryContext {
    shared: Arc<Shared>,
    tracing: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for MemoryContext {
    async fn start_tracing(&self, _options: TraceOptions) -> Result<()> {
        self.tracing.store(true, Ordering::SeqCst);
        self.shared.log().traces_started += 1;
        Ok(())
    }

    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()> {
        if !self.tracing.swap(false, Ordering::SeqCst) {
            anyhow::bail!("tracing was not started");
        }
        match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, b"memory-trace")?;
                self.shared.log().traces_written.push(path.to_path_buf());
            }
            None => self.shared.log().traces_discarded += 1,
        }
        Ok(())
    }

    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("context").into());
        }
        let (sender, _) = broadcast::channel(64);
        self.shared
            .pages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender.clone());
        self.shared.log().pages_opened += 1;
        Ok(Box::new(MemoryPage {
            shared: self.shared.clone(),
            events: sender,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("context").into());
        }
        self.shared.log().contexts_closed += 1;
        Ok(())
    }
}

struct MemoryPage {
    shared: Arc<Shared>,
    events: broadcast::Sender<PageEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl Page for MemoryPage {
    fn subscribe(&self) -> Result<broadcast::Receiver<PageEvent>> {
        Ok(self.events.subscribe())
    }

    async fn block_requests(&self, pattern: &Regex) -> Result<()> {
        self.shared
            .log()
            .blocked_patterns
            .push(pattern.as_str().to_string());
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("page").into());
        }
        self.shared.log().screenshots += 1;
        Ok(PLACEHOLDER_PNG.to_vec())
    }

    async fn evaluate_message(&self, message: &str) -> Result<String> {
        self.shared.log().evaluations.push(message.to_string());
        let reply = self
            .shared
            .grid_reply
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        reply.ok_or_else(|| anyhow::anyhow!("no reply configured for page evaluation"))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyClosed("page").into());
        }
        self.shared.log().pages_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Viewport;

    fn options() -> ContextOptions {
        ContextOptions {
            user_agent: "test".to_string(),
            accept_downloads: true,
            record_video_dir: None,
            viewport: Viewport {
                width: 1200,
                height: 800,
            },
        }
    }

    #[tokio::test]
    async fn test_double_close_errors() {
        let engine = MemoryEngine::new();
        let browser = engine
            .launch(BrowserKind::Chromium, &LaunchOptions::default())
            .await
            .unwrap();
        let context = browser.new_context(&options()).await.unwrap();
        let page = context.new_page().await.unwrap();

        assert!(page.close().await.is_ok());
        assert!(page.close().await.is_err());
        assert!(context.close().await.is_ok());
        assert!(context.close().await.is_err());
        assert!(browser.close().await.is_ok());
        assert!(browser.close().await.is_err());

        let log = engine.log();
        assert_eq!(log.pages_closed, 1);
        assert_eq!(log.contexts_closed, 1);
        assert_eq!(log.browsers_closed, 1);
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let engine = MemoryEngine::new();
        let browser = engine.connect("wss://grid").await.unwrap();
        let context = browser.new_context(&options()).await.unwrap();
        let page = context.new_page().await.unwrap();
        let mut events = page.subscribe().unwrap();

        engine.emit(PageEvent::Console {
            kind: "log".to_string(),
            text: "hello".to_string(),
        });

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            PageEvent::Console {
                kind: "log".to_string(),
                text: "hello".to_string()
            }
        );
        assert_eq!(engine.log().connections, vec!["wss://grid".to_string()]);
    }
}
