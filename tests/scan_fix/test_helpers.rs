//! Shared fixtures for scan and fix scenarios.

use std::sync::Arc;

use driftfix::environment::{EnvironmentFile, ProjectContext};
use driftfix::fix::{Fix, FixBuilder, Stage};
use driftfix::orchestrator::{FixReport, ScanFixOrchestrator, ScanReport};
use driftfix::platform::OsFamily;
use driftfix::plugin::{
    Constructor, InstanceError, PluginCategory, PluginDescriptor, PluginRegistry,
};
use driftfix::secrets::MemorySecretStore;
use driftfix::test_support::{HealthFlag, ScriptedExecutor};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Runtime;

#[derive(Clone, Debug)]
pub struct ScanFixContext {
    pub plugins: Vec<PluginDescriptor>,
    pub executor: ScriptedExecutor,
    pub flag: HealthFlag,
    pub scans: Vec<ScanReport>,
    pub fixes: Vec<FixReport>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid scenario input: {0}")]
    Input(String),
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("registration failed: {0}")]
    Registry(String),
    #[error("run failed: {0}")]
    Run(String),
}

#[fixture]
pub fn scan_fix_context() -> ScanFixContext {
    ScanFixContext {
        plugins: Vec::new(),
        executor: ScriptedExecutor::new(),
        flag: HealthFlag::unhealthy(),
        scans: Vec::new(),
        fixes: Vec::new(),
    }
}

/// Wraps fixes in an add-on plugin that always loads.
pub fn addon(id: &str, fixes: Vec<Fix>) -> PluginDescriptor {
    PluginDescriptor::builder(
        PluginCategory::Addon,
        id,
        Constructor::config_and_secrets(|_, _| Err(InstanceError::new("not constructed in tests"))),
    )
    .fixes(fixes)
    .build()
}

pub fn build_fix(builder: FixBuilder) -> Fix {
    builder
        .build()
        .unwrap_or_else(|err| panic!("scenario fix should build: {err}"))
}

fn target(stage: &str, os: &str) -> Result<(Stage, OsFamily), RunError> {
    let parsed_stage = stage
        .trim()
        .parse::<Stage>()
        .map_err(|err| RunError::Input(err.to_string()))?;
    let parsed_os = os
        .trim()
        .parse::<OsFamily>()
        .map_err(|err| RunError::Input(err.to_string()))?;
    Ok((parsed_stage, parsed_os))
}

impl ScanFixContext {
    fn registry(&self) -> Result<PluginRegistry, RunError> {
        let mut registry = PluginRegistry::new();
        for plugin in &self.plugins {
            registry
                .register(plugin.clone())
                .map_err(|err| RunError::Registry(err.to_string()))?;
        }
        Ok(registry)
    }

    pub fn scan(&mut self, stage: &str, os: &str) -> Result<(), RunError> {
        let (run_stage, run_os) = target(stage, os)?;
        let registry = self.registry()?;
        let environments = EnvironmentFile::default();
        let secrets = MemorySecretStore::new();
        let orchestrator = ScanFixOrchestrator::new(
            &registry,
            &environments,
            Arc::new(self.executor.clone()),
            &secrets,
            ProjectContext::new("shop", "/srv/shop"),
        );
        let report = Runtime::new()?
            .block_on(orchestrator.scan(run_stage, Some(run_os)))
            .map_err(|err| RunError::Run(err.to_string()))?;
        self.scans.push(report);
        Ok(())
    }

    pub fn fix(&mut self, stage: &str, os: &str) -> Result<(), RunError> {
        let (run_stage, run_os) = target(stage, os)?;
        let registry = self.registry()?;
        let environments = EnvironmentFile::default();
        let secrets = MemorySecretStore::new();
        let orchestrator = ScanFixOrchestrator::new(
            &registry,
            &environments,
            Arc::new(self.executor.clone()),
            &secrets,
            ProjectContext::new("shop", "/srv/shop"),
        );
        let report = Runtime::new()?
            .block_on(orchestrator.fix(run_stage, Some(run_os)))
            .map_err(|err| RunError::Run(err.to_string()))?;
        self.fixes.push(report);
        Ok(())
    }
}
