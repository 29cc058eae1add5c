pub mod dashboard;
pub mod json;
pub mod types;

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub use dashboard::Dashboard;
pub use types::{ReportSummary, RunReport, ScenarioRecord};

use crate::runner::state::StepStatus;

/// Print a summary of a persisted run report
pub fn print_summary(report_path: &Path) -> Result<()> {
    let report = json::load(report_path)?;
    let summary = report.summary();

    println!("\n{} {}", "■".blue().bold(), report.build_name.white().bold());
    if let Some(ref url) = report.url {
        println!("  Dashboard: {}", url.cyan());
    }
    println!("  Total scenarios: {}", summary.total_scenarios);
    println!("  Total steps: {}", summary.total_steps);
    println!(
        "  {} passed, {} failed, {} other",
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.other.to_string().yellow()
    );

    for scenario in &report.scenarios {
        let status = match scenario.status {
            StepStatus::Passed => "PASSED".green().bold(),
            StepStatus::Failed => "FAILED".red().bold(),
            other => other.to_string().to_uppercase().yellow().bold(),
        };
        println!("  [{}] {}", status, scenario.name);
        for step in &scenario.step_log {
            if !step.status.is_passed() {
                println!("      {} {} ({})", "✗".red(), step.name, step.status);
            }
        }
    }
    Ok(())
}
