//! BDD scenarios for scan and fix runs.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ScanFixContext, scan_fix_context};

#[scenario(
    path = "tests/features/scan_fix.feature",
    name = "A staging fix applies to staging hosts only"
)]
fn scenario_stage_applicability(scan_fix_context: ScanFixContext) {
    drop(scan_fix_context);
}

#[scenario(
    path = "tests/features/scan_fix.feature",
    name = "A probe whose command is missing reports no problem"
)]
fn scenario_fail_open(scan_fix_context: ScanFixContext) {
    drop(scan_fix_context);
}

#[scenario(
    path = "tests/features/scan_fix.feature",
    name = "One failing remedy does not stop the batch"
)]
fn scenario_partial_failure(scan_fix_context: ScanFixContext) {
    drop(scan_fix_context);
}

#[scenario(
    path = "tests/features/scan_fix.feature",
    name = "Fixing twice converges"
)]
fn scenario_idempotent_fix(scan_fix_context: ScanFixContext) {
    drop(scan_fix_context);
}
