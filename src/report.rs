//! Verdict tallies from the reference tool's `index.json`.
//!
//! The reference tool decides every case itself and records the verdicts in
//! `index.json` next to the HTML overview:
//!
//! ```json
//! { "agent": { "1.1.1": { "behavior": "OK", "behaviorClose": "OK",
//!   "duration": 2, "remoteCloseCode": 1000, "reportfile": "agent_case_1_1_1.json" } } }
//! ```
//!
//! Reading it is best-effort; a missing or malformed index yields no summary.

use crate::tracing_compat::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// File name of the verdict index.
pub const REPORT_INDEX_JSON: &str = "index.json";

/// Verdict of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// `OK`.
    Ok,
    /// `NON-STRICT`.
    NonStrict,
    /// `INFORMATIONAL`.
    Informational,
    /// `UNIMPLEMENTED`.
    Unimplemented,
    /// `FAILED`.
    Failed,
    /// Anything else.
    Other,
}

impl Behavior {
    /// Maps the reference tool's label.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "OK" => Self::Ok,
            "NON-STRICT" => Self::NonStrict,
            "INFORMATIONAL" => Self::Informational,
            "UNIMPLEMENTED" => Self::Unimplemented,
            "FAILED" => Self::Failed,
            _ => Self::Other,
        }
    }
}

/// Number of cases per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BehaviorCounts {
    /// `OK` cases.
    pub ok: usize,
    /// `NON-STRICT` cases.
    pub non_strict: usize,
    /// `INFORMATIONAL` cases.
    pub informational: usize,
    /// `UNIMPLEMENTED` cases.
    pub unimplemented: usize,
    /// `FAILED` cases.
    pub failed: usize,
    /// Unrecognized verdicts.
    pub other: usize,
}

impl BehaviorCounts {
    fn record(&mut self, behavior: Behavior) {
        let slot = match behavior {
            Behavior::Ok => &mut self.ok,
            Behavior::NonStrict => &mut self.non_strict,
            Behavior::Informational => &mut self.informational,
            Behavior::Unimplemented => &mut self.unimplemented,
            Behavior::Failed => &mut self.failed,
            Behavior::Other => &mut self.other,
        };
        *slot += 1;
    }

    fn merge(&mut self, other: &Self) {
        self.ok += other.ok;
        self.non_strict += other.non_strict;
        self.informational += other.informational;
        self.unimplemented += other.unimplemented;
        self.failed += other.failed;
        self.other += other.other;
    }

    /// Cases counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.ok + self.non_strict + self.informational + self.unimplemented + self.failed + self.other
    }
}

/// Tally for one tested agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    /// Agent name as the reference tool reports it.
    pub agent: String,
    /// Verdict counts.
    pub counts: BehaviorCounts,
    /// Ids of `FAILED` cases, sorted.
    pub failed_cases: Vec<String>,
}

/// Tally for a whole report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// One entry per agent, sorted by name.
    pub agents: Vec<AgentSummary>,
}

#[derive(Debug, Deserialize)]
struct CaseEntry {
    behavior: String,
}

impl ReportSummary {
    /// Parses `index.json` text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let index: BTreeMap<String, BTreeMap<String, CaseEntry>> = serde_json::from_str(text)?;
        let agents = index
            .into_iter()
            .map(|(agent, cases)| {
                let mut counts = BehaviorCounts::default();
                let mut failed_cases = Vec::new();
                for (case, entry) in cases {
                    let behavior = Behavior::parse(&entry.behavior);
                    if behavior == Behavior::Failed {
                        failed_cases.push(case);
                    }
                    counts.record(behavior);
                }
                AgentSummary {
                    agent,
                    counts,
                    failed_cases,
                }
            })
            .collect();
        Ok(Self { agents })
    }

    /// Reads `index.json` from a role report directory.
    ///
    /// Returns `None` if the file is absent or unreadable.
    #[must_use]
    pub fn load(role_directory: &Path) -> Option<Self> {
        let path = role_directory.join(REPORT_INDEX_JSON);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no verdict index");
                return None;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "verdict index unreadable");
                return None;
            }
        };
        match Self::parse(&text) {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "verdict index malformed");
                None
            }
        }
    }

    /// Counts across all agents.
    #[must_use]
    pub fn totals(&self) -> BehaviorCounts {
        let mut totals = BehaviorCounts::default();
        for agent in &self.agents {
            totals.merge(&agent.counts);
        }
        totals
    }

    /// Returns true if no case failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.agents.iter().all(|agent| agent.counts.failed == 0)
    }
}
