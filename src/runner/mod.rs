pub mod context;
pub mod events;
pub mod lifecycle;
pub mod recorder;
pub mod registry;
pub mod state;
pub mod target;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub use context::{Attachment, AttachmentSink, Attachments, LogSink, ScenarioContext, ScenarioMeta};
pub use events::*;
pub use recorder::ScenarioOutcome;
pub use state::*;
pub use target::ExecutionTarget;

use crate::driver::BrowserEngine;
use crate::report::{json, Dashboard, RunReport, ScenarioRecord};
use crate::utils::Config;
use lifecycle::LifecycleSettings;
use registry::RunRegistry;
use target::BrowserStrategy;

/// Scenario lifecycle hooks for a BDD runner
///
/// The runner calls [`Orchestrator::run_start`] once, then for every
/// scenario [`scenario_start`](Orchestrator::scenario_start), any number of
/// [`step_complete`](Orchestrator::step_complete) and
/// [`scenario_end`](Orchestrator::scenario_end), and finally
/// [`run_end`](Orchestrator::run_end) once.
///
/// Scenario state lives in the [`ScenarioContext`] returned by
/// `scenario_start`, so scenarios may run concurrently on separate workers
/// sharing one orchestrator.
pub struct Orchestrator {
    config: Config,
    registry: RunRegistry,
    strategy: Box<dyn BrowserStrategy>,
    settings: LifecycleSettings,
    dashboard: Dashboard,
    sink: Arc<dyn AttachmentSink>,
    events: EventEmitter,
}

impl Orchestrator {
    /// Run-start hook: resolve the run id, prepare the traces directory and
    /// launch the shared browser when the target has one
    pub async fn run_start(
        config: Config,
        engine: Arc<dyn BrowserEngine>,
        sink: Arc<dyn AttachmentSink>,
    ) -> Result<Self> {
        Self::run_start_with_events(config, engine, sink, EventEmitter::default()).await
    }

    /// Like [`run_start`](Self::run_start), publishing on `events` so
    /// subscribers taken beforehand also see `RunStarted`
    pub async fn run_start_with_events(
        config: Config,
        engine: Arc<dyn BrowserEngine>,
        sink: Arc<dyn AttachmentSink>,
        events: EventEmitter,
    ) -> Result<Self> {
        config.validate()?;
        let registry = RunRegistry::initialize(&config).await?;
        let strategy = target::strategy_for(&config, engine)?;

        if let Some(browser) = strategy.start_run().await? {
            registry.set_browser(browser).await;
        }

        let settings = LifecycleSettings {
            run_id: registry.run_id().to_string(),
            output_root: config.output_root.clone(),
            traces_dir: config.traces_dir.clone(),
            record_video: config.record_video,
            verbose_responses: config.debug,
        };

        let orchestrator = Self {
            dashboard: Dashboard::new(&config.dashboard_base),
            config,
            registry,
            strategy,
            settings,
            sink,
            events,
        };
        orchestrator.events.emit(LifecycleEvent::RunStarted {
            run_id: orchestrator.run_id().to_string(),
            target: orchestrator.strategy.target().to_string(),
        });
        Ok(orchestrator)
    }

    pub fn run_id(&self) -> &str {
        self.registry.run_id()
    }

    pub fn target(&self) -> ExecutionTarget {
        self.strategy.target()
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Per-step timeout ceiling, `None` while debugging
    pub fn step_timeout(&self) -> Option<Duration> {
        self.config.step_timeout
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Scenario-start hook: open a fresh context and page for the scenario.
    ///
    /// An error here aborts the scenario. Check
    /// [`ScenarioContext::ignored`] to see whether the steps must be skipped.
    pub async fn scenario_start(&self, meta: ScenarioMeta) -> Result<ScenarioContext> {
        let name = meta.name.clone();
        let shared = self.registry.browser().await;
        let acquired = lifecycle::acquire_scenario_context(
            self.strategy.as_ref(),
            shared,
            meta,
            &self.settings,
            self.sink.clone(),
        )
        .await;

        let ctx = match acquired {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!("Scenario '{}' aborted: {:#}", name, e);
                self.events.emit(LifecycleEvent::ScenarioAborted {
                    name,
                    error: format!("{:#}", e),
                });
                return Err(e);
            }
        };

        if let Some(ref build_id) = ctx.grid_build_id {
            self.registry.note_build_id(build_id).await;
        }
        self.events.emit(LifecycleEvent::ScenarioStarted {
            name: ctx.meta.name.clone(),
            ignored: ctx.ignored,
        });
        Ok(ctx)
    }

    /// Step-complete hook: every status is recorded, in order
    pub fn step_complete(
        &self,
        ctx: &mut ScenarioContext,
        name: &str,
        status: StepStatus,
    ) -> Result<()> {
        recorder::record_step(ctx, name, status)?;
        self.events.emit(LifecycleEvent::StepFinished {
            scenario: ctx.meta.name.clone(),
            name: name.to_string(),
            status,
        });
        Ok(())
    }

    /// Scenario-end hook: record the outcome, then release the scenario's
    /// resources whether recording worked or not
    pub async fn scenario_end(
        &self,
        ctx: &mut ScenarioContext,
        outcome: ScenarioOutcome,
    ) -> Result<ScenarioRecord> {
        let finalized =
            recorder::finalize_scenario(ctx, &outcome, &self.registry, &self.dashboard).await;
        lifecycle::release_scenario_context(ctx).await;

        let (record, evidence) = finalized?;
        self.events.emit(LifecycleEvent::ScenarioFinished {
            name: ctx.meta.name.clone(),
            status: outcome.status,
            duration_ms: outcome.duration.map(|d| d.as_millis() as u64),
            trace_path: evidence
                .trace_path
                .map(|p| p.display().to_string()),
        });
        Ok(record)
    }

    /// Release a scenario's resources without recording it. Safe to call
    /// any number of times, also after `scenario_end`.
    pub async fn release(&self, ctx: &mut ScenarioContext) {
        lifecycle::release_scenario_context(ctx).await;
    }

    /// Run-end hook: resolve the dashboard link, persist the report and
    /// close the shared browser. A failed write is logged and does not stop
    /// the browser from being closed.
    pub async fn run_end(&self) -> Result<RunReport> {
        let build_id = self.registry.report().await.build_id;
        self.registry
            .set_report_url(self.dashboard.build_url(build_id.as_deref()))
            .await;

        let report = self.registry.report().await;
        let path = json::report_path(&self.config.output_root, self.run_id());
        let saved = match json::save(&report, &path) {
            Ok(()) => {
                log::info!("Report saved to {}", path.display());
                Some(path.display().to_string())
            }
            Err(e) => {
                log::error!("Failed to save report: {:#}", e);
                None
            }
        };

        self.registry.shutdown().await;

        self.events.emit(LifecycleEvent::RunFinished {
            summary: report.summary(),
            report_path: saved,
        });
        Ok(report)
    }
}

/// Run one step body under the step timeout.
///
/// Errors and timeouts become a `failed` status; nothing is retried.
pub async fn run_step<F>(timeout: Option<Duration>, step: F) -> StepStatus
where
    F: Future<Output = Result<()>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, step).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Step timed out after {:?}", limit);
                return StepStatus::Failed;
            }
        },
        None => step.await,
    };
    match result {
        Ok(()) => StepStatus::Passed,
        Err(e) => {
            log::debug!("Step failed: {:#}", e);
            StepStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_step_statuses() {
        assert_eq!(run_step(None, async { Ok(()) }).await, StepStatus::Passed);
        assert_eq!(
            run_step(None, async { anyhow::bail!("element not found") }).await,
            StepStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_step_timeout_fails() {
        let status = run_step(Some(Duration::from_secs(600)), async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;
        assert_eq!(status, StepStatus::Failed);
    }
}
