//! BDD scenarios for provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContext, provision_context};

#[scenario(
    path = "tests/features/provision.feature",
    name = "A second run reuses every resource"
)]
fn scenario_reuse(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "A failed step cleans up what the run created"
)]
fn scenario_cleanup(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Resources from an earlier run survive a failure"
)]
fn scenario_keep_earlier_resources(provision_context: ProvisionContext) {
    drop(provision_context);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "A readiness timeout keeps the instance"
)]
fn scenario_readiness_timeout(provision_context: ProvisionContext) {
    drop(provision_context);
}
