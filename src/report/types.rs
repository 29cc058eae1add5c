use serde::{Deserialize, Serialize};

use crate::runner::context::Attachments;
use crate::runner::state::{StepRecord, StepStatus};

/// Final record of one scenario, immutable once appended to the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRecord {
    pub status: StepStatus,
    /// `<feature> | <scenario>`
    pub name: String,
    pub attachments: Attachments,
    pub step_log: Vec<StepRecord>,
    /// Base64 PNG of the page at the end of a non-passed scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Everything a run produced, persisted as JSON at run end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub build_name: String,
    pub scenarios: Vec<ScenarioRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl RunReport {
    pub fn new(build_name: &str) -> Self {
        Self {
            build_name: build_name.to_string(),
            scenarios: Vec::new(),
            build_id: None,
            url: None,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total_scenarios: self.scenarios.len() as u32,
            ..ReportSummary::default()
        };
        for scenario in &self.scenarios {
            summary.total_steps += scenario.step_log.len() as u32;
            match scenario.status {
                StepStatus::Passed => summary.passed += 1,
                StepStatus::Failed => summary.failed += 1,
                _ => summary.other += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_scenarios: u32,
    pub total_steps: u32,
    pub passed: u32,
    pub failed: u32,
    /// Skipped, pending, undefined or ambiguous
    pub other: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::context::Attachment;
    use pretty_assertions::assert_eq;

    fn scenario(status: StepStatus, steps: usize) -> ScenarioRecord {
        ScenarioRecord {
            status,
            name: "Auth | Login".to_string(),
            attachments: Attachments::default(),
            step_log: (0..steps)
                .map(|i| StepRecord::new(format!("step {}", i), StepStatus::Passed))
                .collect(),
            image_string: None,
            url: None,
        }
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let report = RunReport::new("Test Build");
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({ "buildName": "Test Build", "scenarios": [] })
        );
    }

    #[test]
    fn test_scenario_json_shape() {
        let mut record = scenario(StepStatus::Failed, 1);
        record.image_string = Some("iVBORw0K".to_string());
        record
            .attachments
            .insert("status", Attachment::text("Status: failed. Duration:2s"));

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "status": "failed",
                "name": "Auth | Login",
                "attachments": { "status": "Status: failed. Duration:2s" },
                "stepLog": [{ "name": "step 0", "status": "passed" }],
                "imageString": "iVBORw0K"
            })
        );
    }

    #[test]
    fn test_report_reads_back() {
        let mut report = RunReport::new("Test Build");
        report.scenarios.push(scenario(StepStatus::Passed, 3));
        report.build_id = Some("B1".to_string());

        let json = serde_json::to_string(&report).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_summary_counts() {
        let mut report = RunReport::new("Test Build");
        report.scenarios.push(scenario(StepStatus::Passed, 3));
        report.scenarios.push(scenario(StepStatus::Failed, 2));
        report.scenarios.push(scenario(StepStatus::Skipped, 0));

        let summary = report.summary();
        assert_eq!(summary.total_scenarios, 3);
        assert_eq!(summary.total_steps, 5);
        assert_eq!((summary.passed, summary.failed, summary.other), (1, 1, 1));
    }
}
