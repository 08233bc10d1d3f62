//! BDD step definitions for provisioning.

use driftfix::provision::{InstanceState, ProjectIdentity, ProvisionError, ResourceRole};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ProvisionContext, role_named};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an empty cloud for project \"{project}\" environment \"{environment}\"")]
fn empty_cloud(
    mut provision_context: ProvisionContext,
    project: String,
    environment: String,
) -> ProvisionContext {
    provision_context.request.identity = ProjectIdentity::new(project.trim(), environment.trim());
    provision_context
}

#[given("the network already exists")]
fn network_exists(provision_context: ProvisionContext) -> ProvisionContext {
    let tags = provision_context
        .request
        .identity
        .tags_for(ResourceRole::Network);
    provision_context
        .cloud
        .seed(ResourceRole::Network, tags.as_slice());
    provision_context
}

#[given("creating the \"{role}\" fails")]
fn creation_fails(provision_context: ProvisionContext, role: String) -> ProvisionContext {
    provision_context.cloud.fail_create_on(role_named(&role));
    provision_context
}

#[given("the instance never starts")]
fn instance_never_starts(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
        .cloud
        .set_instance_state(InstanceState::Starting);
    provision_context
}

#[when("I provision the environment")]
fn provision(mut provision_context: ProvisionContext) -> Result<ProvisionContext, StepError> {
    provision_context.provision()?;
    Ok(provision_context)
}

#[then("{count:u32} network was created")]
fn networks_created(provision_context: &ProvisionContext, count: u32) -> Result<(), StepError> {
    let created = provision_context.cloud.create_count(ResourceRole::Network);
    if created == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} network creations, got {created}"
        )))
    }
}

#[then("the last run created nothing")]
fn last_run_created_nothing(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let run = provision_context.last();
    match &run.result {
        Ok(outcome) if run.created() == 0 && outcome.created() == 0 => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a pure reuse run, created {}: {other:?}",
            run.created()
        ))),
    }
}

#[then("the host is ready")]
fn host_ready(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match &provision_context.last().result {
        Ok(outcome) if outcome.ready && outcome.public_ip.is_some() => Ok(()),
        other => Err(StepError::Assertion(format!("expected a ready host: {other:?}"))),
    }
}

#[then("provisioning fails at \"{role}\"")]
fn provisioning_fails(provision_context: &ProvisionContext, role: String) -> Result<(), StepError> {
    let expected = role_named(&role);
    match &provision_context.last().result {
        Err(ProvisionError::Step { role: failed, .. }) if *failed == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure at {expected}: {other:?}"
        ))),
    }
}

#[then("no resource is left behind")]
fn nothing_left(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let present = provision_context.cloud.roles_present();
    if !present.is_empty() {
        return Err(StepError::Assertion(format!("left behind: {present:?}")));
    }
    match &provision_context.last().result {
        Err(ProvisionError::Step { cleanup, .. })
            if cleanup.failed.is_empty() && !cleanup.deleted.is_empty() =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!("unexpected cleanup: {other:?}"))),
    }
}

#[then("only the network is left")]
fn only_network_left(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let present = provision_context.cloud.roles_present();
    if present == vec![ResourceRole::Network] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only the seeded network, got {present:?}"
        )))
    }
}

#[then("the host is not ready")]
fn host_not_ready(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match &provision_context.last().result {
        Ok(outcome) if !outcome.ready && outcome.readiness_error.is_some() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a readiness failure: {other:?}"
        ))),
    }
}

#[then("the \"{role}\" step was skipped")]
fn step_skipped(provision_context: &ProvisionContext, role: String) -> Result<(), StepError> {
    let expected = role_named(&role);
    match &provision_context.last().result {
        Ok(outcome) if outcome.skipped.contains(&expected) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected} to be skipped: {other:?}"
        ))),
    }
}

#[then("nothing was deleted")]
fn nothing_deleted(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let deleted = provision_context.cloud.deleted_ids();
    if deleted.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected deletions: {deleted:?}")))
    }
}
