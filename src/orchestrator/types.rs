//! Structured results of scan and fix runs.

use std::collections::BTreeMap;

use crate::exec::Target;
use crate::fix::{CheckError, Fix, Severity, Stage};
use crate::platform::OsFamily;

/// Result of scanning one fix.
#[derive(Clone, Debug)]
pub struct Finding {
    /// The fix that was scanned.
    pub fix: Fix,
    /// Whether the problem is present.
    pub problem: bool,
    /// Probe error, kept for logging. An errored probe reports no problem.
    pub error: Option<String>,
}

impl Finding {
    /// Builds a finding from a probe result, failing open on error.
    #[must_use]
    pub fn from_scan(fix: Fix, result: Result<bool, CheckError>) -> Self {
        match result {
            Ok(problem) => Self {
                fix,
                problem,
                error: None,
            },
            Err(err) => Self {
                fix,
                problem: false,
                error: Some(err.to_string()),
            },
        }
    }

    /// Fix identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.fix.id()
    }

    /// Fix severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.fix.severity()
    }

    /// `true` when the fix has no automated remedy.
    #[must_use]
    pub const fn is_manual(&self) -> bool {
        !self.fix.has_remedy()
    }
}

/// Findings of one scan, in applicability order.
#[derive(Clone, Debug)]
pub struct ScanReport {
    /// Stage that was scanned.
    pub stage: Stage,
    /// Operating system the fixes were filtered for.
    pub os: Option<OsFamily>,
    /// Where probes ran.
    pub target: Target,
    /// Configuration findings first, then one finding per applicable fix.
    pub findings: Vec<Finding>,
}

impl ScanReport {
    /// Findings whose problem is present.
    pub fn problems(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|finding| finding.problem)
    }

    /// Problem findings grouped by severity, most serious first.
    #[must_use]
    pub fn by_severity(&self) -> BTreeMap<Severity, Vec<&Finding>> {
        let mut grouped: BTreeMap<Severity, Vec<&Finding>> = BTreeMap::new();
        for finding in self.problems() {
            grouped.entry(finding.severity()).or_default().push(finding);
        }
        grouped
    }

    /// `true` when any critical problem is present.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.problems()
            .any(|finding| finding.severity() == Severity::Critical)
    }

    /// `false` when the caller should report a non-zero outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.has_critical()
    }
}

/// What happened to one problem finding during a fix run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixOutcome {
    /// Fix identifier.
    pub id: String,
    /// Fix severity.
    pub severity: Severity,
    /// `true` when the remedy reported success.
    pub resolved: bool,
    /// Manual instructions, present for manual-only fixes.
    pub manual: Option<String>,
    /// Remedy error, if the remedy failed with one.
    pub error: Option<String>,
    /// Manual instructions to follow when an attempted remedy failed.
    pub fallback: Option<String>,
}

impl FixOutcome {
    /// `true` when a remedy ran and did not succeed.
    #[must_use]
    pub const fn failed(&self) -> bool {
        !self.resolved && self.manual.is_none()
    }
}

/// Outcomes of one fix run, in applicability order.
#[derive(Clone, Debug)]
pub struct FixReport {
    /// The scan that selected what to fix.
    pub scan: ScanReport,
    /// One outcome per problem finding.
    pub outcomes: Vec<FixOutcome>,
}

impl FixReport {
    /// Number of resolved problems.
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.resolved).count()
    }

    /// Number of remedies that ran and failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.failed()).count()
    }

    /// Number of problems left for the operator.
    #[must_use]
    pub fn manual(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.manual.is_some())
            .count()
    }

    /// `true` when no critical problem was left unresolved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.resolved || outcome.severity != Severity::Critical)
    }
}
