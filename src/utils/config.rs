use std::path::PathBuf;
use std::time::Duration;

use crate::error::LifecycleError;
use crate::runner::target::ExecutionTarget;

/// Default endpoint of the remote execution grid
pub const DEFAULT_GRID_ENDPOINT: &str = "wss://cdp.lambdatest.com/playwright";

/// Default dashboard host for grid builds and tests
pub const DEFAULT_DASHBOARD_BASE: &str = "https://automation.lambdatest.com";

/// Credentials for the remote execution grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridCredentials {
    pub username: String,
    pub access_key: String,
}

/// Run configuration, sourced from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Where browsers come from (local engine or remote grid)
    pub target: ExecutionTarget,

    /// Externally supplied run identifier
    pub run_id: Option<String>,

    /// Grid username/access key (remote grid only)
    pub grid_credentials: Option<GridCredentials>,

    /// Websocket endpoint of the remote grid
    pub grid_endpoint: String,

    /// Base URL of the grid dashboard
    pub dashboard_base: String,

    /// Interactive debugging: no step timeout, verbose response logging
    pub debug: bool,

    /// Record a video of every local scenario
    pub record_video: bool,

    /// Launch local browsers headless
    pub headless: bool,

    /// Build name reported to the grid and written to the report
    pub build_name: String,

    /// Directory for trace archives of non-passed scenarios
    pub traces_dir: PathBuf,

    /// Root for per-run output (`<root>/<runId>/...`)
    pub output_root: PathBuf,

    /// Step timeout ceiling; `None` disables it
    pub step_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: ExecutionTarget::default(),
            run_id: None,
            grid_credentials: None,
            grid_endpoint: DEFAULT_GRID_ENDPOINT.to_string(),
            dashboard_base: DEFAULT_DASHBOARD_BASE.to_string(),
            debug: false,
            record_video: false,
            headless: true,
            build_name: "Test Build".to_string(),
            traces_dir: PathBuf::from("traces"),
            output_root: PathBuf::from("temp"),
            step_timeout: Some(Duration::from_secs(10 * 60)),
        }
    }
}

impl Config {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).map_or(false, |v| !v.is_empty());
        let mut config = Self::default();

        if let Some(target) = lookup("BROWSER") {
            config.target = ExecutionTarget::parse(&target);
        }
        config.run_id = lookup("RUN_ID").filter(|v| !v.is_empty());

        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let (Some(username), Some(access_key)) = (non_empty("LT_USERNAME"), non_empty("LT_ACCESS_KEY")) {
            config.grid_credentials = Some(GridCredentials {
                username,
                access_key,
            });
        }
        if let Some(endpoint) = lookup("LT_ENDPOINT") {
            config.grid_endpoint = endpoint;
        }

        config.debug = set("PWDEBUG");
        config.record_video = set("PWVIDEO");
        if let Some(headless) = lookup("HEADLESS") {
            config.headless = headless == "true" || headless == "1";
        }
        if config.debug {
            config.step_timeout = None;
        }

        config
    }

    /// Check that the selected target has what it needs
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.target.is_remote() && self.grid_credentials.is_none() {
            return Err(LifecycleError::Configuration(
                "remote grid requires LT_USERNAME and LT_ACCESS_KEY".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding everything a run writes besides traces
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.output_root.join(run_id)
    }
}
