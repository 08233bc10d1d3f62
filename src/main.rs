//! Binary entry point for the driftfix CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use driftfix::config::ConfigError;
use driftfix::environment::EnvironmentError;
use driftfix::platform::OsFamily;
use driftfix::plugin::{LoadReport, RegistryError};
use driftfix::report::{render_fix, render_load, render_plugins, render_provision, render_scan};
use driftfix::{
    DirManifestSource, EngineConfig, EnvSecretStore, SecretStore, EnvironmentFile, OrchestratorError,
    PluginRegistry, ProcessCommandRunner, ProjectContext, RemoteExecutor, ScanFixOrchestrator,
    ShellExecutor, SshConfig, Stage,
};

use cli::{Cli, ProvisionCommand, StageArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),
    #[error("plugin registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error(transparent)]
    Run(#[from] OrchestratorError),
}

/// Everything a command needs, loaded once per invocation.
struct Engine {
    config: EngineConfig,
    environments: EnvironmentFile,
    registry: PluginRegistry,
    secrets: Arc<EnvSecretStore>,
    executor: Arc<dyn RemoteExecutor>,
    project: ProjectContext,
}

impl Engine {
    fn load() -> Result<(Self, LoadReport), CliError> {
        let config = EngineConfig::load_without_cli_args()?;
        config.validate()?;

        let working_dir = std::env::current_dir()
            .map_err(|err| ConfigError::MissingField(format!("working directory: {err}")))?;
        let cwd = Utf8PathBuf::from_path_buf(working_dir).map_err(|path| {
            ConfigError::MissingField(format!("working directory is not UTF-8: {}", path.display()))
        })?;
        let root = config.project_root_or(cwd);
        let name = config
            .project_name
            .clone()
            .or_else(|| root.file_name().map(str::to_owned))
            .unwrap_or_else(|| String::from("project"));

        let environments = EnvironmentFile::load(&root.join(&config.environments_file))?;
        let mut registry = PluginRegistry::with_builtins()?;
        let load = registry.load_external(
            &DirManifestSource::new(root.join(&config.plugin_dir)),
            &config.external_plugin_names(),
            &config.trusted_plugin_names(),
        );

        let ssh = SshConfig::load_without_cli_args()?;
        ssh.validate()?;
        let secrets = Arc::new(EnvSecretStore::new(config.secret_prefix.clone()));
        let executor: Arc<dyn RemoteExecutor> = Arc::new(ShellExecutor::new(
            ProcessCommandRunner::new(config.command_timeout()),
            ssh,
            Arc::clone(&secrets) as Arc<dyn SecretStore>,
        ));
        debug!(project = %name, root = %root, "engine loaded");

        Ok((
            Self {
                config,
                environments,
                registry,
                secrets,
                executor,
                project: ProjectContext::new(name, root),
            },
            load,
        ))
    }

    fn orchestrator(&self, concurrency: Option<usize>) -> ScanFixOrchestrator<'_> {
        ScanFixOrchestrator::new(
            &self.registry,
            &self.environments,
            Arc::clone(&self.executor),
            self.secrets.as_ref(),
            self.project.clone(),
        )
        .with_concurrency(concurrency.unwrap_or(self.config.scan_concurrency))
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let (engine, load) = Engine::load()?;
    let warnings = render_load(&load);
    if !warnings.is_empty() {
        writeln!(io::stderr(), "{warnings}").ok();
    }

    match cli {
        Cli::Scan(args) => scan(&engine, &args).await,
        Cli::Fix(args) => fix(&engine, &args).await,
        Cli::Provision(command) => provision(&engine, &command).await,
        Cli::Plugins => {
            writeln!(io::stdout(), "{}", render_plugins(&engine.registry.list())).ok();
            Ok(0)
        }
    }
}

fn parse_stage_args(args: &StageArgs) -> Result<(Stage, Option<OsFamily>), CliError> {
    let stage = args
        .stage
        .parse::<Stage>()
        .map_err(|err| CliError::Argument(err.to_string()))?;
    let os = args
        .os
        .as_deref()
        .map(str::parse::<OsFamily>)
        .transpose()
        .map_err(|err| CliError::Argument(err.to_string()))?;
    Ok((stage, os))
}

const fn exit_code(success: bool) -> i32 {
    if success { 0 } else { 1 }
}

async fn scan(engine: &Engine, args: &StageArgs) -> Result<i32, CliError> {
    let (stage, os) = parse_stage_args(args)?;
    let report = engine.orchestrator(args.concurrency).scan(stage, os).await?;
    writeln!(io::stdout(), "{}", render_scan(&report)).ok();
    Ok(exit_code(report.is_success()))
}

async fn fix(engine: &Engine, args: &StageArgs) -> Result<i32, CliError> {
    let (stage, os) = parse_stage_args(args)?;
    let report = engine.orchestrator(args.concurrency).fix(stage, os).await?;
    writeln!(io::stdout(), "{}", render_fix(&report)).ok();
    Ok(exit_code(report.is_success()))
}

async fn provision(engine: &Engine, command: &ProvisionCommand) -> Result<i32, CliError> {
    let outcome = engine
        .orchestrator(None)
        .provision(&command.environment)
        .await?;
    writeln!(
        io::stdout(),
        "{}",
        render_provision(&command.environment, &outcome)
    )
    .ok();
    Ok(exit_code(outcome.ready))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
