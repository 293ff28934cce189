//! Preflight checks.
//!
//! Verifies everything a run needs without starting a container or creating
//! a directory.

use super::Outputtable;
use crate::config::{HarnessSettings, RunConfig};
use crate::error::ContainerError;
use serde::Serialize;
use std::path::Path;

/// One preflight item.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreflightCheck {
    /// What was checked.
    pub name: String,
    /// Whether it holds.
    pub ok: bool,
    /// Explanation.
    pub detail: String,
}

impl PreflightCheck {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Result of all preflight checks, in a fixed order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreflightReport {
    /// Base directory checked.
    pub base_directory: String,
    /// Individual checks.
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    /// Returns true if every check holds.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.ok)
    }
}

impl Outputtable for PreflightReport {
    fn human_format(&self) -> String {
        let mut lines = vec![format!("Base: {}", self.base_directory)];
        for check in &self.checks {
            let mark = if check.ok { "ok" } else { "FAIL" };
            lines.push(format!("[{mark}] {}: {}", check.name, check.detail));
        }
        lines.join("\n")
    }
}

/// Runs the preflight checks. `daemon_version` is only called once the local
/// checks are done.
pub fn preflight<F>(config: &RunConfig, settings: &HarnessSettings, daemon_version: F) -> PreflightReport
where
    F: FnOnce() -> Result<String, ContainerError>,
{
    let mut checks = Vec::new();

    checks.push(match settings.validate() {
        Ok(()) => PreflightCheck::pass("settings", format!("image {}", settings.image)),
        Err(err) => PreflightCheck::fail("settings", err.to_string()),
    });

    for path in [&config.fuzzing_server_config, &config.fuzzing_client_config] {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned());
        checks.push(if path.is_file() {
            PreflightCheck::pass(&name, path.display().to_string())
        } else {
            PreflightCheck::fail(&name, format!("{} not exists", path.display()))
        });
    }

    checks.push(report_directory_check(&config.report_directory));

    checks.push(match daemon_version() {
        Ok(version) => PreflightCheck::pass("docker", format!("daemon {version}")),
        Err(err) => PreflightCheck::fail("docker", err.to_string()),
    });

    PreflightReport {
        base_directory: config.base_directory.display().to_string(),
        checks,
    }
}

/// The report directory must be a directory, or creatable below its nearest
/// existing ancestor.
fn report_directory_check(path: &Path) -> PreflightCheck {
    const NAME: &str = "report directory";
    if path.is_dir() {
        return PreflightCheck::pass(NAME, format!("{} exists", path.display()));
    }
    if path.exists() {
        return PreflightCheck::fail(NAME, format!("{} is not a directory", path.display()));
    }
    let mut ancestor = path.parent();
    while let Some(dir) = ancestor {
        if dir.as_os_str().is_empty() || dir.is_dir() {
            return PreflightCheck::pass(NAME, format!("{} will be created", path.display()));
        }
        if dir.exists() {
            return PreflightCheck::fail(
                NAME,
                format!("{} blocks {}", dir.display(), path.display()),
            );
        }
        ancestor = dir.parent();
    }
    PreflightCheck::pass(NAME, format!("{} will be created", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::write_file;
    use tempfile::tempdir;

    #[test]
    fn reports_each_missing_piece_without_side_effects() {
        let temp = tempdir().expect("temp dir");
        write_file(&temp.path().join("fuzzingserver.json"), "{}");
        let config = RunConfig::from_base_directory(temp.path());

        let report = preflight(&config, &HarnessSettings::default(), || {
            Err(ContainerError::Runtime("daemon unreachable".into()))
        });
        let by_name: Vec<(&str, bool)> = report
            .checks
            .iter()
            .map(|check| (check.name.as_str(), check.ok))
            .collect();
        assert_eq!(
            by_name,
            vec![
                ("settings", true),
                ("fuzzingserver.json", true),
                ("fuzzingclient.json", false),
                ("report directory", true),
                ("docker", false),
            ]
        );
        assert!(!report.passed());
        assert!(!config.report_directory.exists());
        assert!(report.human_format().contains("[FAIL] docker"));
    }

    #[test]
    fn all_checks_pass() {
        let temp = tempdir().expect("temp dir");
        write_file(&temp.path().join("fuzzingserver.json"), "{}");
        write_file(&temp.path().join("fuzzingclient.json"), "{}");
        let config = RunConfig::from_base_directory(temp.path());
        let report = preflight(&config, &HarnessSettings::default(), || Ok("27.0".into()));
        assert!(report.passed(), "{}", report.human_format());
    }

    #[test]
    fn file_blocking_report_directory_fails() {
        let temp = tempdir().expect("temp dir");
        write_file(&temp.path().join("target"), "x");
        let check = report_directory_check(&temp.path().join("target/reports"));
        assert!(!check.ok);
    }
}
