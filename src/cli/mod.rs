//! Command-line surfaces.
//!
//! Everything the `wsconform` binary prints goes through [`Outputtable`], so
//! each report has one human rendering and one JSON rendering.

pub mod check;

use crate::error::ConformanceRunFailed;
use crate::report::BehaviorCounts;
use crate::role::Role;
use crate::run::{RunAllOutcome, ScenarioReport};
use serde::Serialize;
use std::path::PathBuf;

/// A report with human and JSON renderings.
pub trait Outputtable: Serialize {
    /// Plain-text rendering.
    fn human_format(&self) -> String;

    /// Pretty JSON rendering.
    fn json_format(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Picks a rendering.
    fn render(&self, json: bool) -> String {
        if json {
            self.json_format()
        } else {
            self.human_format()
        }
    }
}

/// Printable outcome of one scenario.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScenarioOutput {
    /// Role that ran.
    pub role: Role,
    /// Whether the scenario completed.
    pub completed: bool,
    /// HTML overview, when completed.
    pub report_index: Option<PathBuf>,
    /// Mirror directory, when completed.
    pub mirror_directory: Option<PathBuf>,
    /// Container exit status, when known.
    pub container_exit: Option<i64>,
    /// Verdict totals, when the index was readable.
    pub totals: Option<BehaviorCounts>,
    /// Failed case ids across agents.
    pub failed_cases: Vec<String>,
    /// Failure message, when not completed.
    pub error: Option<String>,
    /// Partial report, when not completed.
    pub partial_report: Option<PathBuf>,
}

impl ScenarioOutput {
    /// Builds the output for one scenario result.
    #[must_use]
    pub fn from_result(result: &Result<ScenarioReport, ConformanceRunFailed>) -> Self {
        match result {
            Ok(report) => Self {
                role: report.role,
                completed: true,
                report_index: Some(report.report_index.clone()),
                mirror_directory: Some(report.mirror_directory.clone()),
                container_exit: report.container_exit,
                totals: report.summary.as_ref().map(crate::ReportSummary::totals),
                failed_cases: report
                    .summary
                    .iter()
                    .flat_map(|summary| &summary.agents)
                    .flat_map(|agent| {
                        agent
                            .failed_cases
                            .iter()
                            .map(move |case| format!("{}:{case}", agent.agent))
                    })
                    .collect(),
                error: None,
                partial_report: None,
            },
            Err(failure) => Self {
                role: failure.role,
                completed: false,
                report_index: None,
                mirror_directory: None,
                container_exit: None,
                totals: None,
                failed_cases: Vec::new(),
                error: Some(failure.to_string()),
                partial_report: failure.partial_report.clone(),
            },
        }
    }

    /// Completed with no failed case.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.completed && self.totals.is_none_or(|totals| totals.failed == 0)
    }
}

/// Printable outcome of a harness invocation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunOutput {
    /// One entry per scenario run.
    pub scenarios: Vec<ScenarioOutput>,
}

impl RunOutput {
    /// Output for a single scenario.
    #[must_use]
    pub fn single(result: &Result<ScenarioReport, ConformanceRunFailed>) -> Self {
        Self {
            scenarios: vec![ScenarioOutput::from_result(result)],
        }
    }

    /// Output for both scenarios.
    #[must_use]
    pub fn all(outcome: &RunAllOutcome) -> Self {
        Self {
            scenarios: vec![
                ScenarioOutput::from_result(&outcome.client),
                ScenarioOutput::from_result(&outcome.server),
            ],
        }
    }

    /// Every scenario completed with no failed case.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioOutput::passed)
    }
}

impl Outputtable for RunOutput {
    fn human_format(&self) -> String {
        let mut lines = Vec::new();
        for scenario in &self.scenarios {
            let status = if scenario.passed() { "PASS" } else { "FAIL" };
            lines.push(format!("Scenario: {} [{status}]", scenario.role));
            if let Some(index) = &scenario.report_index {
                lines.push(format!("  Report: {}", index.display()));
            }
            if let Some(mirror) = &scenario.mirror_directory {
                lines.push(format!("  Mirror: {}", mirror.display()));
            }
            if let Some(totals) = &scenario.totals {
                lines.push(format!(
                    "  Cases: {} (ok {}, non-strict {}, informational {}, unimplemented {}, failed {}, other {})",
                    totals.total(),
                    totals.ok,
                    totals.non_strict,
                    totals.informational,
                    totals.unimplemented,
                    totals.failed,
                    totals.other
                ));
            }
            for case in &scenario.failed_cases {
                lines.push(format!("  failed: {case}"));
            }
            if let Some(error) = &scenario.error {
                lines.push(format!("  Error: {error}"));
            }
            if let Some(partial) = &scenario.partial_report {
                lines.push(format!("  Partial report: {}", partial.display()));
            }
        }
        lines.join("\n")
    }
}
