//! Core library for the driftfix scan/fix reconciliation engine.
//!
//! Plugins contribute fixes: a probe that detects a problem on a deployment
//! target and an optional remedy that repairs it. The orchestrator selects
//! the fixes that apply to a stage and operating system, scans them
//! concurrently and applies remedies in order. Cloud fixes run through an
//! idempotent find-or-create provisioner with a Scaleway implementation.

pub mod config;
pub mod environment;
pub mod exec;
pub mod fix;
pub mod orchestrator;
pub mod platform;
pub mod plugin;
pub mod provision;
pub mod report;
pub mod scaleway;
pub mod secrets;
pub mod test_support;

pub use config::{ConfigError, EngineConfig, ScalewayConfig};
pub use environment::{EnvironmentConfig, EnvironmentFile, EnvironmentSource, ProjectContext};
pub use exec::{ProcessCommandRunner, RemoteExecutor, ShellExecutor, SshConfig, Target};
pub use fix::{Fix, Severity, Stage};
pub use orchestrator::{FixReport, OrchestratorError, ScanFixOrchestrator, ScanReport};
pub use plugin::{DirManifestSource, PluginRegistry};
pub use provision::{ProvisionOutcome, Provisioner};
pub use scaleway::ScalewayProvider;
pub use secrets::{EnvSecretStore, SecretStore};
