//! Command-line interface definitions for the `driftfix` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `driftfix` binary.
#[derive(Debug, Parser)]
#[command(
    name = "driftfix",
    about = "Scan deployment targets for drift and apply fixes",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Report problems without changing anything.
    #[command(name = "scan", about = "Report problems without changing anything")]
    Scan(StageArgs),
    /// Scan, then apply the remedy of every problem found.
    #[command(name = "fix", about = "Scan, then apply the remedy of every problem found")]
    Fix(StageArgs),
    /// Find or create the cloud resources of an environment.
    #[command(
        name = "provision",
        about = "Find or create the cloud resources of an environment"
    )]
    Provision(ProvisionCommand),
    /// List registered plugins.
    #[command(name = "plugins", about = "List registered plugins")]
    Plugins,
}

/// Arguments shared by `scan` and `fix`.
#[derive(Debug, Args)]
pub(crate) struct StageArgs {
    /// Deployment stage to check.
    #[arg(
        long,
        value_name = "STAGE",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub(crate) stage: String,
    /// Operating system of the target, skipping detection.
    #[arg(
        long,
        value_name = "OS",
        value_parser = ["ubuntu", "debian", "fedora", "macos", "windows"]
    )]
    pub(crate) os: Option<String>,
    /// Maximum number of probes in flight. Overrides `scan_concurrency`.
    #[arg(long, value_name = "N")]
    pub(crate) concurrency: Option<usize>,
}

/// Arguments for the `driftfix provision` subcommand.
#[derive(Debug, Args)]
pub(crate) struct ProvisionCommand {
    /// Environment to provision, as named in the environments file.
    #[arg(value_name = "ENVIRONMENT")]
    pub(crate) environment: String,
}
