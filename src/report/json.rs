use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::types::RunReport;

/// `<output_root>/<runId>/report.json`
pub fn report_path(output_root: &Path, run_id: &str) -> PathBuf {
    output_root.join(run_id).join("report.json")
}

/// Write the run report as pretty JSON, creating parent directories
pub fn save(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Read a report written by [`save`]
pub fn load(path: &Path) -> Result<RunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = report_path(dir.path(), "run-42");
        assert!(path.ends_with("run-42/report.json"));

        let report = RunReport::new("Test Build");
        save(&report, &path).unwrap();
        assert_eq!(load(&path).unwrap(), report);
    }

    #[test]
    fn test_save_into_file_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let result = save(&RunReport::new("Test Build"), &blocker.join("report.json"));
        assert!(result.is_err());
    }
}
