//! Shared fixtures for provisioning scenarios.

use std::sync::Arc;
use std::time::Duration;

use driftfix::provision::{
    ProjectIdentity, ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner,
    ReadinessPolicy, ResourceRole,
};
use driftfix::test_support::{FixedReachability, MemoryCloud, ScriptedExecutor};
use rstest::fixture;
use tokio::runtime::Runtime;

const ROLES: [ResourceRole; 13] = [
    ResourceRole::Network,
    ResourceRole::PublicSubnet,
    ResourceRole::PrivateSubnet,
    ResourceRole::InternetGateway,
    ResourceRole::RouteTable,
    ResourceRole::SecurityGroup,
    ResourceRole::KeyPair,
    ResourceRole::Instance,
    ResourceRole::ElasticIp,
    ResourceRole::Database,
    ResourceRole::ObjectStorage,
    ResourceRole::ContainerRegistry,
    ResourceRole::MailDomain,
];

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub cloud: MemoryCloud,
    pub executor: ScriptedExecutor,
    pub request: ProvisionRequest,
    pub runs: Vec<RunRecord>,
}

#[derive(Clone, Debug)]
pub struct RunRecord {
    pub creates_before: usize,
    pub creates_after: usize,
    pub result: Result<ProvisionOutcome, ProvisionError>,
}

impl RunRecord {
    pub const fn created(&self) -> usize {
        self.creates_after.saturating_sub(self.creates_before)
    }
}

#[fixture]
pub fn provision_context() -> ProvisionContext {
    let executor = ScriptedExecutor::new();
    executor.set_status("true", 0);
    ProvisionContext {
        cloud: MemoryCloud::new(),
        executor,
        request: ProvisionRequest::new(ProjectIdentity::new("shop", "production")),
        runs: Vec::new(),
    }
}

pub fn role_named(name: &str) -> ResourceRole {
    ROLES
        .into_iter()
        .find(|role| role.as_str() == name.trim())
        .unwrap_or_else(|| panic!("unknown resource role {name}"))
}

impl ProvisionContext {
    pub fn provision(&mut self) -> std::io::Result<()> {
        let provisioner = Provisioner::new(
            self.cloud.clone(),
            FixedReachability(true),
            Arc::new(self.executor.clone()),
            ReadinessPolicy {
                timeout: Duration::from_millis(80),
                poll_interval: Duration::from_millis(5),
                probe_command: String::from("true"),
            },
        );
        let creates_before = self.cloud.total_creates();
        let result = Runtime::new()?.block_on(provisioner.provision(&self.request));
        self.runs.push(RunRecord {
            creates_before,
            creates_after: self.cloud.total_creates(),
            result,
        });
        Ok(())
    }

    pub fn last(&self) -> &RunRecord {
        self.runs
            .last()
            .unwrap_or_else(|| panic!("scenario should have provisioned"))
    }
}
