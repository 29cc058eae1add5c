//! Scenario outcome recording
//!
//! Steps accumulate on the scenario's own context while it runs. When the
//! scenario ends, failure evidence is captured, a [`ScenarioRecord`] is
//! appended to the run report and the accumulators are cleared.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;
use std::time::Duration;

use super::context::{Attachment, ScenarioContext};
use super::lifecycle::finish_trace;
use super::registry::RunRegistry;
use super::state::{ScenarioPhase, StepRecord, StepStatus};
use crate::error::LifecycleError;
use crate::report::{Dashboard, ScenarioRecord};

/// Final result of a scenario, as reported by the BDD runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub status: StepStatus,
    pub duration: Option<Duration>,
}

impl ScenarioOutcome {
    pub fn new(status: StepStatus, duration: Option<Duration>) -> Self {
        Self { status, duration }
    }

    /// `Status: <status>. Duration:<secs>s`
    pub fn status_note(&self) -> String {
        let seconds = self.duration.map(|d| d.as_secs()).unwrap_or(0);
        format!("Status: {}. Duration:{}s", self.status, seconds)
    }
}

/// Append a completed step to the in-flight scenario
pub fn record_step(
    ctx: &mut ScenarioContext,
    name: &str,
    status: StepStatus,
) -> Result<(), LifecycleError> {
    ctx.state
        .expect(ScenarioPhase::Running, ScenarioPhase::Running)?;
    ctx.steps.push(StepRecord::new(name, status));
    Ok(())
}

/// Evidence captured for a non-passed scenario
#[derive(Debug, Default)]
pub struct FailureEvidence {
    pub image_string: Option<String>,
    pub trace_path: Option<std::path::PathBuf>,
}

/// Screenshot first, then stop tracing and persist the archive
async fn capture_failure_evidence(ctx: &ScenarioContext, traces_dir: &Path) -> FailureEvidence {
    let mut evidence = FailureEvidence::default();

    if let Some(page) = ctx.page() {
        match page.screenshot(true).await {
            Ok(image) => {
                let encoded = STANDARD.encode(&image);
                ctx.attach("screenshot", Attachment::png(encoded.clone()))
                    .await;
                evidence.image_string = Some(encoded);
            }
            Err(e) => log::warn!("Failure screenshot of '{}' failed: {}", ctx.meta.name, e),
        }
    }

    evidence.trace_path = finish_trace(ctx, traces_dir, true).await;
    evidence
}

/// Finalize the scenario: attach the status note, capture evidence for
/// non-passed outcomes, append the record to the report and reset the
/// scenario's accumulators.
///
/// Walks the scenario through FINALIZING, RECORDED and RESET; fails without
/// side effects if the scenario is not RUNNING.
pub async fn finalize_scenario(
    ctx: &mut ScenarioContext,
    outcome: &ScenarioOutcome,
    registry: &RunRegistry,
    dashboard: &Dashboard,
) -> Result<(ScenarioRecord, FailureEvidence), LifecycleError> {
    ctx.state.advance(ScenarioPhase::Finalizing)?;

    // Console lines from the last step are still queued on the page channel
    if let Some(listener) = ctx.listener.take() {
        listener.flush().await;
    }

    ctx.attach("status", Attachment::text(outcome.status_note()))
        .await;

    let evidence = if outcome.status.is_passed() {
        finish_trace(ctx, registry.traces_dir(), false).await;
        FailureEvidence::default()
    } else {
        capture_failure_evidence(ctx, registry.traces_dir()).await
    };

    let record = ScenarioRecord {
        status: outcome.status,
        name: ctx.meta.composite_name(),
        attachments: ctx.attachments().await,
        step_log: ctx.steps.clone(),
        image_string: evidence.image_string.clone(),
        url: dashboard.scenario_url(ctx.grid_test_id.as_deref()),
    };
    registry.append(record.clone()).await;
    ctx.state.advance(ScenarioPhase::Recorded)?;

    ctx.steps.clear();
    ctx.attachments.drain().await;
    ctx.state.advance(ScenarioPhase::Reset)?;

    Ok((record, evidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_note() {
        let outcome = ScenarioOutcome::new(StepStatus::Failed, Some(Duration::from_millis(2500)));
        assert_eq!(outcome.status_note(), "Status: failed. Duration:2s");

        let outcome = ScenarioOutcome::new(StepStatus::Passed, None);
        assert_eq!(outcome.status_note(), "Status: passed. Duration:0s");
    }
}
