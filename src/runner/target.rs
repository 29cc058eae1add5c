//! Execution target selection
//!
//! A run either drives a local browser engine that lives for the whole run,
//! or opens a fresh remote grid connection for every scenario. Both sides
//! sit behind [`BrowserStrategy`] so the lifecycle never branches on the
//! target name.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use super::context::ScenarioMeta;
use crate::driver::{Browser, BrowserEngine, BrowserKind, ContextOptions, LaunchOptions, Viewport};
use crate::error::LifecycleError;
use crate::utils::{Config, GridCredentials};

/// Fixed user agent for every scenario context
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Analytics and font hosts blocked on local runs
pub const DOMAIN_DENYLIST: &[&str] = &[
    "www.google.com.ar",
    "www.googletagmanager.com",
    "www.google-analytics.com",
    "www.fonts.gstatic.com",
    "www.googleadservices.com",
    "www.googleoptimize.com",
    "fonts.googleapis.com",
];

/// Regex matching any https URL on a denylisted host
pub fn denylist_pattern() -> Result<Regex> {
    let alternatives: Vec<String> = DOMAIN_DENYLIST
        .iter()
        .map(|domain| format!("^https://{}.*", regex::escape(domain)))
        .collect();
    Ok(Regex::new(&alternatives.join("|"))?)
}

/// Where browsers for this run come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionTarget {
    Local(BrowserKind),
    RemoteGrid,
}

impl Default for ExecutionTarget {
    fn default() -> Self {
        Self::Local(BrowserKind::Chromium)
    }
}

impl ExecutionTarget {
    /// Parse a target name. Unknown names fall back to Chromium.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "firefox" => Self::Local(BrowserKind::Firefox),
            "webkit" => Self::Local(BrowserKind::Webkit),
            "lt" | "remote-grid" | "remote" => Self::RemoteGrid,
            _ => Self::Local(BrowserKind::Chromium),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteGrid)
    }

    pub fn viewport(&self) -> Viewport {
        match self {
            Self::RemoteGrid => Viewport {
                width: 1920,
                height: 1080,
            },
            Self::Local(_) => Viewport {
                width: 1200,
                height: 800,
            },
        }
    }
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(kind) => write!(f, "{}", kind),
            Self::RemoteGrid => write!(f, "remote-grid"),
        }
    }
}

/// Browser handed to one scenario
pub struct ScenarioBrowser {
    pub handle: Arc<dyn Browser>,
    /// Owned handles are closed when the scenario ends
    owned: bool,
}

impl ScenarioBrowser {
    pub fn shared(handle: Arc<dyn Browser>) -> Self {
        Self {
            handle,
            owned: false,
        }
    }

    pub fn owned(handle: Arc<dyn Browser>) -> Self {
        Self {
            handle,
            owned: true,
        }
    }

    /// Close the browser if the scenario owns it. Errors are swallowed.
    pub async fn release(&self) {
        if !self.owned {
            return;
        }
        if let Err(e) = self.handle.close().await {
            log::debug!("Scenario browser already closed: {}", e);
        }
    }
}

/// Acquire/release contract shared by local and remote targets
#[async_trait]
pub trait BrowserStrategy: Send + Sync {
    fn target(&self) -> ExecutionTarget;

    /// Launch the browser shared by every scenario of the run, if the target
    /// has one
    async fn start_run(&self) -> Result<Option<Arc<dyn Browser>>>;

    /// Browser for one scenario
    async fn browser_for(
        &self,
        shared: Option<Arc<dyn Browser>>,
        meta: &ScenarioMeta,
    ) -> Result<ScenarioBrowser>;

    /// Context options for one scenario; `video_dir` is only honored where
    /// recording is supported
    fn context_options(&self, video_dir: Option<PathBuf>) -> ContextOptions;

    /// Whether pages get the denylist interceptor
    fn blocks_requests(&self) -> bool;

    /// Whether pages are asked for grid-assigned test metadata
    fn reads_grid_metadata(&self) -> bool;
}

/// Pick the strategy matching the configured target
pub fn strategy_for(config: &Config, engine: Arc<dyn BrowserEngine>) -> Result<Box<dyn BrowserStrategy>> {
    match config.target {
        ExecutionTarget::Local(kind) => Ok(Box::new(LocalStrategy {
            engine,
            kind,
            headless: config.headless,
        })),
        ExecutionTarget::RemoteGrid => {
            let credentials = config.grid_credentials.clone().ok_or_else(|| {
                LifecycleError::Configuration(
                    "remote grid requires LT_USERNAME and LT_ACCESS_KEY".to_string(),
                )
            })?;
            Ok(Box::new(RemoteGridStrategy {
                engine,
                endpoint: config.grid_endpoint.clone(),
                build_name: config.build_name.clone(),
                credentials,
            }))
        }
    }
}

/// One local browser process for the whole run
pub struct LocalStrategy {
    engine: Arc<dyn BrowserEngine>,
    kind: BrowserKind,
    headless: bool,
}

impl LocalStrategy {
    /// Launch options: fake media devices so permission prompts never block
    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.headless,
            args: vec![
                "--use-fake-ui-for-media-stream".to_string(),
                "--use-fake-device-for-media-stream".to_string(),
            ],
            firefox_user_prefs: vec![
                ("media.navigator.streams.fake".to_string(), json!(true)),
                ("media.navigator.permission.disabled".to_string(), json!(true)),
            ],
            blocked_hosts: DOMAIN_DENYLIST.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[async_trait]
impl BrowserStrategy for LocalStrategy {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::Local(self.kind)
    }

    async fn start_run(&self) -> Result<Option<Arc<dyn Browser>>> {
        if !self.blocks_requests() {
            log::warn!("Request denylist is not enforced on {}", self.kind);
        }
        let browser = self
            .engine
            .launch(self.kind, &self.launch_options())
            .await
            .map_err(|e| LifecycleError::acquisition("browser", e))?;
        Ok(Some(browser))
    }

    async fn browser_for(
        &self,
        shared: Option<Arc<dyn Browser>>,
        _meta: &ScenarioMeta,
    ) -> Result<ScenarioBrowser> {
        let handle = shared.ok_or(LifecycleError::NoBrowser)?;
        Ok(ScenarioBrowser::shared(handle))
    }

    fn context_options(&self, video_dir: Option<PathBuf>) -> ContextOptions {
        ContextOptions {
            user_agent: USER_AGENT.to_string(),
            accept_downloads: true,
            record_video_dir: video_dir,
            viewport: self.target().viewport(),
        }
    }

    /// WebKit has no launch-time resolver hook, so its pages are not blocked
    fn blocks_requests(&self) -> bool {
        self.kind != BrowserKind::Webkit
    }

    fn reads_grid_metadata(&self) -> bool {
        false
    }
}

/// A fresh grid connection per scenario
pub struct RemoteGridStrategy {
    engine: Arc<dyn BrowserEngine>,
    endpoint: String,
    build_name: String,
    credentials: GridCredentials,
}

impl RemoteGridStrategy {
    /// Capability payload announcing the scenario to the grid
    pub fn capabilities(&self, scenario_name: &str) -> serde_json::Value {
        json!({
            "browserName": "Chrome",
            "browserVersion": "latest",
            "LT:Options": {
                "platform": "Windows 11",
                "build": self.build_name,
                "name": scenario_name,
                "user": self.credentials.username,
                "accessKey": self.credentials.access_key,
                "network": true,
                "video": true,
                "console": true,
                "tunnel": false
            }
        })
    }

    /// Endpoint with the capabilities URL-encoded into the query string
    pub fn connect_url(&self, scenario_name: &str) -> Result<String> {
        let capabilities = self.capabilities(scenario_name).to_string();
        let url = reqwest::Url::parse_with_params(&self.endpoint, &[("capabilities", capabilities)])
            .with_context(|| format!("Invalid grid endpoint: {}", self.endpoint))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl BrowserStrategy for RemoteGridStrategy {
    fn target(&self) -> ExecutionTarget {
        ExecutionTarget::RemoteGrid
    }

    async fn start_run(&self) -> Result<Option<Arc<dyn Browser>>> {
        Ok(None)
    }

    async fn browser_for(
        &self,
        _shared: Option<Arc<dyn Browser>>,
        meta: &ScenarioMeta,
    ) -> Result<ScenarioBrowser> {
        let url = self.connect_url(&meta.name)?;
        let handle = self
            .engine
            .connect(&url)
            .await
            .map_err(|e| LifecycleError::acquisition("grid connection", e))?;
        Ok(ScenarioBrowser::owned(handle))
    }

    fn context_options(&self, _video_dir: Option<PathBuf>) -> ContextOptions {
        // The grid records its own video
        ContextOptions {
            user_agent: USER_AGENT.to_string(),
            accept_downloads: true,
            record_video_dir: None,
            viewport: ExecutionTarget::RemoteGrid.viewport(),
        }
    }

    fn blocks_requests(&self) -> bool {
        false
    }

    fn reads_grid_metadata(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryEngine;

    fn grid_config() -> Config {
        Config {
            target: ExecutionTarget::RemoteGrid,
            grid_credentials: Some(GridCredentials {
                username: "alice".to_string(),
                access_key: "secret".to_string(),
            }),
            ..Config::default()
        }
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!(ExecutionTarget::parse("firefox"), ExecutionTarget::Local(BrowserKind::Firefox));
        assert_eq!(ExecutionTarget::parse("webkit"), ExecutionTarget::Local(BrowserKind::Webkit));
        assert_eq!(ExecutionTarget::parse("LT"), ExecutionTarget::RemoteGrid);
        assert_eq!(ExecutionTarget::parse("remote-grid"), ExecutionTarget::RemoteGrid);
        assert_eq!(ExecutionTarget::parse("edge"), ExecutionTarget::Local(BrowserKind::Chromium));
    }

    #[test]
    fn test_denylist_pattern() {
        let pattern = denylist_pattern().unwrap();
        assert!(pattern.is_match("https://www.googletagmanager.com/gtm.js"));
        assert!(pattern.is_match("https://fonts.googleapis.com/css?family=Roboto"));
        assert!(!pattern.is_match("https://example.com/app.js"));
        // Dots are literal
        assert!(!pattern.is_match("https://fontsXgoogleapis.com/"));
    }

    #[test]
    fn test_grid_connect_url_encodes_capabilities() {
        let strategy = RemoteGridStrategy {
            engine: Arc::new(MemoryEngine::new()),
            endpoint: "wss://grid.example/playwright".to_string(),
            build_name: "Test Build".to_string(),
            credentials: GridCredentials {
                username: "alice".to_string(),
                access_key: "secret".to_string(),
            },
        };
        let url = reqwest::Url::parse(&strategy.connect_url("Login fails").unwrap()).unwrap();
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "capabilities");

        let caps: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(caps["LT:Options"]["name"], "Login fails");
        assert_eq!(caps["LT:Options"]["build"], "Test Build");
        assert_eq!(caps["LT:Options"]["user"], "alice");
        assert_eq!(caps["LT:Options"]["platform"], "Windows 11");
    }

    #[test]
    fn test_viewport_and_video_per_target() {
        let engine: Arc<dyn BrowserEngine> = Arc::new(MemoryEngine::new());
        let local = strategy_for(&Config::default(), engine.clone()).unwrap();
        let options = local.context_options(Some(PathBuf::from("videos")));
        assert_eq!(options.viewport, Viewport { width: 1200, height: 800 });
        assert_eq!(options.record_video_dir, Some(PathBuf::from("videos")));
        assert!(local.blocks_requests());

        let remote = strategy_for(&grid_config(), engine).unwrap();
        let options = remote.context_options(Some(PathBuf::from("videos")));
        assert_eq!(options.viewport, Viewport { width: 1920, height: 1080 });
        assert_eq!(options.record_video_dir, None);
        assert!(!remote.blocks_requests());
        assert!(remote.reads_grid_metadata());
    }

    #[test]
    fn test_denylist_per_local_browser() {
        let engine: Arc<dyn BrowserEngine> = Arc::new(MemoryEngine::new());
        for (name, blocks) in [("chromium", true), ("firefox", true), ("webkit", false)] {
            let config = Config {
                target: ExecutionTarget::parse(name),
                ..Config::default()
            };
            let strategy = strategy_for(&config, engine.clone()).unwrap();
            assert_eq!(strategy.blocks_requests(), blocks, "{}", name);
        }
    }

    #[test]
    fn test_remote_without_credentials_is_rejected() {
        let config = Config {
            target: ExecutionTarget::RemoteGrid,
            ..Config::default()
        };
        let result = strategy_for(&config, Arc::new(MemoryEngine::new()));
        assert!(result.is_err());
    }
}
