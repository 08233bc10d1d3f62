//! BDD step definitions for scan and fix runs.

use driftfix::exec::ExecError;
use driftfix::fix::{CommandProbe, Fix, Stage};
use driftfix::test_support::{ErrorRemedy, StaticProbe, StaticRemedy};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{RunError, ScanFixContext, addon, build_fix};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn problem_fix(id: &str, remedy: Option<StaticRemedy>) -> Fix {
    let builder = Fix::builder(id, Stage::Dev)
        .probe(StaticProbe::new(true))
        .manual_fix(format!("repair {id} by hand"));
    build_fix(match remedy {
        Some(value) => builder.remedy(value),
        None => builder.remedy(ErrorRemedy),
    })
}

#[given("a staging fix \"{id}\" without an OS constraint")]
fn staging_fix(mut scan_fix_context: ScanFixContext, id: String) -> ScanFixContext {
    let fix = build_fix(
        Fix::builder(id.trim(), Stage::Staging)
            .probe(StaticProbe::new(true))
            .manual_fix("check the staging host"),
    );
    scan_fix_context.plugins.push(addon("staging-app", vec![fix]));
    scan_fix_context
}

#[given("a fix \"{id}\" probing \"{command}\" which cannot be started")]
fn unstartable_probe(
    mut scan_fix_context: ScanFixContext,
    id: String,
    command: String,
) -> ScanFixContext {
    scan_fix_context.executor.set_error(
        command.trim(),
        ExecError::Spawn {
            program: String::from("sh"),
            message: String::from("command not found"),
        },
    );
    let fix = build_fix(
        Fix::builder(id.trim(), Stage::Dev)
            .probe(CommandProbe::new(command.trim()))
            .manual_fix("install the tool"),
    );
    scan_fix_context.plugins.push(addon("tools", vec![fix]));
    scan_fix_context
}

#[given("three problem fixes where the second remedy fails")]
fn three_problem_fixes(mut scan_fix_context: ScanFixContext) -> ScanFixContext {
    let fixes = vec![
        problem_fix("batch.first", Some(StaticRemedy::new(true))),
        problem_fix("batch.second", None),
        problem_fix("batch.third", Some(StaticRemedy::new(true))),
    ];
    scan_fix_context.plugins.push(addon("batch", fixes));
    scan_fix_context
}

#[given("an unhealthy fix \"{id}\" that repairs itself")]
fn self_repairing_fix(mut scan_fix_context: ScanFixContext, id: String) -> ScanFixContext {
    let flag = scan_fix_context.flag.clone();
    let fix = build_fix(
        Fix::builder(id.trim(), Stage::Dev)
            .probe(flag.clone())
            .remedy(flag)
            .manual_fix("flip the flag"),
    );
    scan_fix_context.plugins.push(addon("flags", vec![fix]));
    scan_fix_context
}

#[when("I scan stage \"{stage}\" on \"{os}\"")]
fn scan_stage(
    mut scan_fix_context: ScanFixContext,
    stage: String,
    os: String,
) -> Result<ScanFixContext, StepError> {
    scan_fix_context.scan(&stage, &os)?;
    Ok(scan_fix_context)
}

#[when("I fix stage \"{stage}\" on \"{os}\"")]
fn fix_stage(
    mut scan_fix_context: ScanFixContext,
    stage: String,
    os: String,
) -> Result<ScanFixContext, StepError> {
    scan_fix_context.fix(&stage, &os)?;
    Ok(scan_fix_context)
}

#[then("the finding \"{id}\" is reported")]
fn finding_reported(scan_fix_context: &ScanFixContext, id: String) -> Result<(), StepError> {
    let Some(report) = scan_fix_context.scans.last() else {
        return Err(StepError::Assertion(String::from("no scan ran")));
    };
    if report.findings.iter().any(|finding| finding.id() == id.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} in {:?}",
            report.findings
        )))
    }
}

#[then("no findings are reported")]
fn no_findings(scan_fix_context: &ScanFixContext) -> Result<(), StepError> {
    match scan_fix_context.scans.last() {
        Some(report) if report.findings.is_empty() => Ok(()),
        Some(report) => Err(StepError::Assertion(format!(
            "expected no findings, got {:?}",
            report.findings
        ))),
        None => Err(StepError::Assertion(String::from("no scan ran"))),
    }
}

#[then("the finding \"{id}\" reports no problem")]
fn finding_has_no_problem(scan_fix_context: &ScanFixContext, id: String) -> Result<(), StepError> {
    let finding = scan_fix_context
        .scans
        .last()
        .and_then(|report| report.findings.iter().find(|finding| finding.id() == id.trim()))
        .ok_or_else(|| StepError::Assertion(format!("missing finding {id}")))?;
    if finding.problem {
        return Err(StepError::Assertion(String::from(
            "errored probe should report no problem",
        )));
    }
    if finding.error.is_none() {
        return Err(StepError::Assertion(String::from(
            "probe error should be kept for logging",
        )));
    }
    Ok(())
}

#[then("the scan succeeds")]
fn scan_succeeds(scan_fix_context: &ScanFixContext) -> Result<(), StepError> {
    match scan_fix_context.scans.last() {
        Some(report) if report.is_success() => Ok(()),
        other => Err(StepError::Assertion(format!("unexpected report: {other:?}"))),
    }
}

#[then("the fix report has {count:u32} outcomes")]
fn outcome_count(scan_fix_context: &ScanFixContext, count: u32) -> Result<(), StepError> {
    let actual = scan_fix_context
        .fixes
        .last()
        .map_or(0, |report| report.outcomes.len());
    if actual == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} outcomes, got {actual}"
        )))
    }
}

fn outcome_resolved(scan_fix_context: &ScanFixContext, position: u32) -> Result<bool, StepError> {
    scan_fix_context
        .fixes
        .last()
        .and_then(|report| report.outcomes.get((position as usize).saturating_sub(1)))
        .map(|outcome| outcome.resolved)
        .ok_or_else(|| StepError::Assertion(format!("missing outcome {position}")))
}

#[then("outcome {position:u32} is resolved")]
fn outcome_is_resolved(scan_fix_context: &ScanFixContext, position: u32) -> Result<(), StepError> {
    if outcome_resolved(scan_fix_context, position)? {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("outcome {position} should be resolved")))
    }
}

#[then("outcome {position:u32} is unresolved")]
fn outcome_is_unresolved(
    scan_fix_context: &ScanFixContext,
    position: u32,
) -> Result<(), StepError> {
    if outcome_resolved(scan_fix_context, position)? {
        Err(StepError::Assertion(format!("outcome {position} should be unresolved")))
    } else {
        Ok(())
    }
}

#[then("the last fix run had nothing to do")]
fn nothing_to_do(scan_fix_context: &ScanFixContext) -> Result<(), StepError> {
    match scan_fix_context.fixes.as_slice() {
        [.., first, last] if first.resolved() == 1 && last.outcomes.is_empty() => Ok(()),
        runs => Err(StepError::Assertion(format!(
            "expected a resolving run followed by an empty one, got {runs:?}"
        ))),
    }
}

#[then("the fix was applied once")]
fn applied_once(scan_fix_context: &ScanFixContext) -> Result<(), StepError> {
    let repairs = scan_fix_context.flag.repairs();
    if repairs == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("expected one repair, got {repairs}")))
    }
}
