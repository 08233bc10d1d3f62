//! Plain-text rendering of run results for the terminal.

use crate::fix::Severity;
use crate::orchestrator::{Finding, FixOutcome, FixReport, ScanReport};
use crate::plugin::{LoadReport, PluginSource, PluginSummary};
use crate::provision::{ProvisionOutcome, ResourceOrigin};

fn finding_line(finding: &Finding) -> Vec<String> {
    let mut lines = vec![format!(
        "  {} {}",
        finding.id(),
        finding.fix.description()
    )];
    if finding.is_manual()
        && let Some(manual) = finding.fix.manual_fix()
    {
        lines.push(format!("      manual: {manual}"));
    }
    lines
}

/// Renders problem findings grouped by severity, most serious first.
#[must_use]
pub fn render_scan(report: &ScanReport) -> String {
    let os = report
        .os
        .map_or_else(|| String::from("unknown"), |family| family.to_string());
    let mut lines = vec![format!(
        "Scan of {} on {} (os: {os})",
        report.stage, report.target
    )];

    let grouped = report.by_severity();
    if grouped.is_empty() {
        lines.push(format!(
            "No problems found in {} checks.",
            report.findings.len()
        ));
        return lines.join("\n");
    }
    for (severity, findings) in &grouped {
        lines.push(format!("{severity} ({}):", findings.len()));
        lines.extend(findings.iter().flat_map(|finding| finding_line(finding)));
    }
    let count = |severity: Severity| grouped.get(&severity).map_or(0, Vec::len);
    lines.push(format!(
        "{} problems: {} critical, {} warning, {} info.",
        report.problems().count(),
        count(Severity::Critical),
        count(Severity::Warning),
        count(Severity::Info)
    ));
    lines.join("\n")
}

fn outcome_lines(outcome: &FixOutcome) -> Vec<String> {
    if let Some(manual) = &outcome.manual {
        return vec![format!("  manual    {}: {manual}", outcome.id)];
    }
    if outcome.resolved {
        return vec![format!("  resolved  {}", outcome.id)];
    }
    let failed = match &outcome.error {
        Some(error) => format!("  failed    {}: {error}", outcome.id),
        None => format!("  failed    {}", outcome.id),
    };
    let mut lines = vec![failed];
    if let Some(fallback) = &outcome.fallback {
        lines.push(format!("            by hand: {fallback}"));
    }
    lines
}

/// Renders one line per attempted problem, with manual instructions under
/// failed remedies, and a summary.
#[must_use]
pub fn render_fix(report: &FixReport) -> String {
    let mut lines = vec![format!(
        "Fix of {} on {}",
        report.scan.stage, report.scan.target
    )];
    if report.outcomes.is_empty() {
        lines.push(String::from("Nothing to fix."));
        return lines.join("\n");
    }
    lines.extend(report.outcomes.iter().flat_map(outcome_lines));
    lines.push(format!(
        "{} resolved, {} failed, {} need manual action.",
        report.resolved(),
        report.failed(),
        report.manual()
    ));
    lines.join("\n")
}

/// Renders the handles of a provisioning run.
#[must_use]
pub fn render_provision(environment: &str, outcome: &ProvisionOutcome) -> String {
    let mut lines = vec![format!("Provisioned {environment}:")];
    for handle in &outcome.handles {
        let origin = match handle.origin {
            ResourceOrigin::Created => "created",
            ResourceOrigin::Discovered => "reused",
        };
        let address = handle
            .address
            .as_deref()
            .map(|value| format!(" {value}"))
            .unwrap_or_default();
        lines.push(format!(
            "  {:<18} {:<8} {}{address}",
            handle.role.as_str(),
            origin,
            handle.id
        ));
    }
    for role in &outcome.skipped {
        lines.push(format!("  {:<18} skipped", role.as_str()));
    }
    lines.push(format!(
        "{} created, {} reused.",
        outcome.created(),
        outcome.reused()
    ));
    match (&outcome.readiness_error, outcome.public_ip) {
        (Some(err), _) => lines.push(format!("Host not ready: {err}")),
        (None, Some(address)) if outcome.ready => lines.push(format!("Host ready at {address}.")),
        (None, _) if outcome.ready => lines.push(String::from("Host ready.")),
        (None, _) => lines.push(String::from("Host not ready.")),
    }
    lines.join("\n")
}

/// Renders the registered plugins as a table.
#[must_use]
pub fn render_plugins(plugins: &[PluginSummary]) -> String {
    let mut lines = vec![format!(
        "{:<10} {:<12} {:<8} {:<5} source",
        "category", "id", "version", "fixes"
    )];
    for plugin in plugins {
        let source = match &plugin.source {
            PluginSource::Builtin => String::from("builtin"),
            PluginSource::External { package } => format!("external:{package}"),
        };
        lines.push(format!(
            "{:<10} {:<12} {:<8} {:<5} {source}",
            plugin.category.as_str(),
            plugin.id,
            plugin.version,
            plugin.fix_count
        ));
    }
    lines.join("\n")
}

/// Renders trust warnings and per-package failures of an external load.
/// Returns an empty string for a clean load.
#[must_use]
pub fn render_load(report: &LoadReport) -> String {
    let mut lines: Vec<String> = report
        .warnings
        .iter()
        .map(|warning| format!("warning: {warning}"))
        .collect();
    lines.extend(
        report
            .errors
            .iter()
            .map(|failure| format!("error: plugin {}: {}", failure.package, failure.error)),
    );
    lines.join("\n")
}
