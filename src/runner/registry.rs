use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::driver::Browser;
use crate::report::types::{RunReport, ScenarioRecord};
use crate::utils::Config;

/// Process-wide state of one test run
///
/// Holds the run id, the browser shared by local scenarios and the report
/// accumulating scenario records. Safe to share between workers.
pub struct RunRegistry {
    run_id: String,
    traces_dir: PathBuf,
    browser: Mutex<Option<Arc<dyn Browser>>>,
    report: Mutex<RunReport>,
}

impl RunRegistry {
    /// Resolve the run id (configured or freshly generated) and make sure
    /// the traces directory exists
    pub async fn initialize(config: &Config) -> Result<Self> {
        let run_id = config
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        std::fs::create_dir_all(&config.traces_dir).with_context(|| {
            format!(
                "Failed to create traces directory {}",
                config.traces_dir.display()
            )
        })?;

        log::info!("Run {} initialized", run_id);

        Ok(Self {
            run_id,
            traces_dir: config.traces_dir.clone(),
            browser: Mutex::new(None),
            report: Mutex::new(RunReport::new(&config.build_name)),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn traces_dir(&self) -> &Path {
        &self.traces_dir
    }

    pub async fn set_browser(&self, browser: Arc<dyn Browser>) {
        *self.browser.lock().await = Some(browser);
    }

    /// The shared browser, if one is open
    pub async fn browser(&self) -> Option<Arc<dyn Browser>> {
        self.browser.lock().await.clone()
    }

    pub async fn append(&self, record: ScenarioRecord) {
        self.report.lock().await.scenarios.push(record);
    }

    /// Remember the grid build id; the latest one wins
    pub async fn note_build_id(&self, build_id: &str) {
        self.report.lock().await.build_id = Some(build_id.to_string());
    }

    pub async fn set_report_url(&self, url: Option<String>) {
        self.report.lock().await.url = url;
    }

    /// Copy of the report as it stands
    pub async fn report(&self) -> RunReport {
        self.report.lock().await.clone()
    }

    pub async fn scenario_count(&self) -> usize {
        self.report.lock().await.scenarios.len()
    }

    /// Close the shared browser if it is still open. Safe to call when no
    /// browser was ever opened, and more than once.
    pub async fn shutdown(&self) {
        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            if let Err(e) = browser.close().await {
                log::debug!("Shared browser already closed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryEngine;
    use crate::driver::{BrowserEngine, BrowserKind, LaunchOptions};

    fn config(dir: &Path, run_id: Option<&str>) -> Config {
        Config {
            run_id: run_id.map(|s| s.to_string()),
            traces_dir: dir.join("traces"),
            output_root: dir.join("temp"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_run_id_override_and_fallback() {
        let dir = tempfile::tempdir().unwrap();

        let registry = RunRegistry::initialize(&config(dir.path(), Some("nightly-7")))
            .await
            .unwrap();
        assert_eq!(registry.run_id(), "nightly-7");
        assert!(dir.path().join("traces").is_dir());

        let first = RunRegistry::initialize(&config(dir.path(), None)).await.unwrap();
        let second = RunRegistry::initialize(&config(dir.path(), None)).await.unwrap();
        assert!(Uuid::parse_str(first.run_id()).is_ok());
        assert_ne!(first.run_id(), second.run_id());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RunRegistry::initialize(&config(dir.path(), None)).await.unwrap();

        // Never opened
        registry.shutdown().await;

        let engine = MemoryEngine::new();
        let browser = engine
            .launch(BrowserKind::Chromium, &LaunchOptions::default())
            .await
            .unwrap();
        registry.set_browser(browser).await;
        registry.shutdown().await;
        registry.shutdown().await;

        assert_eq!(engine.log().browsers_closed, 1);
        assert!(registry.browser().await.is_none());
    }
}
