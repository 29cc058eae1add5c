use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Local browser engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chromium => write!(f, "chromium"),
            Self::Firefox => write!(f, "firefox"),
            Self::Webkit => write!(f, "webkit"),
        }
    }
}

/// Options used to launch a local browser
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Extra command line arguments (Chromium)
    pub args: Vec<String>,
    /// User preferences (Firefox)
    pub firefox_user_prefs: Vec<(String, serde_json::Value)>,
    /// Hosts the browser must never reach
    pub blocked_hosts: Vec<String>,
}

/// Viewport size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Options for a new isolated browser context
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub user_agent: String,
    pub accept_downloads: bool,
    /// Directory for video recordings, `None` disables recording
    pub record_video_dir: Option<PathBuf>,
    pub viewport: Viewport,
}

/// What a trace captures while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    pub screenshots: bool,
    pub snapshots: bool,
}

/// Events emitted by a page while it is open
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Console { kind: String, text: String },
    Response { url: String, status: u16 },
}

/// Platform-agnostic browser automation engine
///
/// Launches local browsers or connects to remote ones. Everything the
/// scenario lifecycle needs from a browser goes through these traits so the
/// lifecycle can run against Playwright or the in-memory engine alike.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Launch a local browser of the given kind
    async fn launch(&self, kind: BrowserKind, options: &LaunchOptions) -> Result<Arc<dyn Browser>>;

    /// Connect to a browser that is already running behind `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Browser>>;
}

/// A running browser process or remote browser connection
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a new isolated context
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>>;

    /// Close the browser. Errors if it was closed before.
    async fn close(&self) -> Result<()>;
}

/// An isolated browser session (cookies, storage, tracing)
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn start_tracing(&self, options: TraceOptions) -> Result<()>;

    /// Stop tracing, writing the archive to `path` when given and discarding
    /// it otherwise
    async fn stop_tracing(&self, path: Option<&Path>) -> Result<()>;

    async fn new_page(&self) -> Result<Box<dyn Page>>;

    /// Close the context. Errors if it was closed before.
    async fn close(&self) -> Result<()>;
}

/// A single tab inside a context
#[async_trait]
pub trait Page: Send + Sync {
    /// Subscribe to console and response events
    fn subscribe(&self) -> Result<broadcast::Receiver<PageEvent>>;

    /// Abort every request whose URL matches `pattern`
    async fn block_requests(&self, pattern: &Regex) -> Result<()>;

    /// Capture a PNG screenshot
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Send `message` through the page evaluation channel and return the
    /// raw reply. Remote grids intercept these messages.
    async fn evaluate_message(&self, message: &str) -> Result<String>;

    /// Close the page. Errors if it was closed before.
    async fn close(&self) -> Result<()>;
}
