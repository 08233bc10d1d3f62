//! Platform-specific command resolution.
//!
//! Fixes talk about logical dependencies ("a container runtime", "version
//! control") and this module turns them into the concrete command lines for a
//! given operating system family. Parsers for the output of common probing
//! utilities live in [`parse`], and target OS detection in [`detect`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

mod detect;
mod parse;

pub use detect::detect_os;
pub use parse::{
    ServiceState, ToolVersion, parse_os_release, parse_service_state, parse_uname, parse_version,
};

/// Operating system families the engine knows how to drive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Ubuntu and derivatives (apt).
    Ubuntu,
    /// Debian (apt).
    Debian,
    /// Fedora and RHEL-like systems (dnf).
    Fedora,
    /// macOS (Homebrew).
    #[serde(alias = "darwin", alias = "mac", alias = "osx")]
    Macos,
    /// Windows (winget).
    #[serde(alias = "win")]
    Windows,
}

impl OsFamily {
    /// Every supported family in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Ubuntu,
        Self::Debian,
        Self::Fedora,
        Self::Macos,
        Self::Windows,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Fedora => "fedora",
            Self::Macos => "macos",
            Self::Windows => "windows",
        }
    }

    /// Returns `true` for Linux distributions managed through systemd.
    #[must_use]
    pub const fn is_linux(self) -> bool {
        matches!(self, Self::Ubuntu | Self::Debian | Self::Fedora)
    }

    /// Family of the machine running the engine, when it can be inferred at
    /// compile time.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Self::Macos)
        } else if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when an OS name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown operating system: {name}")]
pub struct UnknownOsError {
    /// Name that failed to parse.
    pub name: String,
}

impl FromStr for OsFamily {
    type Err = UnknownOsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ubuntu" => Ok(Self::Ubuntu),
            "debian" => Ok(Self::Debian),
            "fedora" | "rhel" | "centos" => Ok(Self::Fedora),
            "macos" | "darwin" | "mac" | "osx" => Ok(Self::Macos),
            "windows" | "win" => Ok(Self::Windows),
            _ => Err(UnknownOsError {
                name: value.to_owned(),
            }),
        }
    }
}

/// Language runtimes with built-in install recipes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Runtime {
    /// Node.js LTS.
    Node,
    /// Python 3.
    Python,
}

/// Logical dependency a fix can ask for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Dependency {
    /// The system package manager (apt, dnf, brew, winget).
    PackageManager,
    /// Git.
    VersionControl,
    /// Docker CLI and engine binaries.
    ContainerRuntime,
    /// The running Docker daemon.
    ContainerDaemon,
    /// A language runtime.
    LanguageRuntime(Runtime),
}

impl fmt::Display for Dependency {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PackageManager => "package manager",
            Self::VersionControl => "git",
            Self::ContainerRuntime => "docker",
            Self::ContainerDaemon => "docker daemon",
            Self::LanguageRuntime(Runtime::Node) => "node",
            Self::LanguageRuntime(Runtime::Python) => "python",
        };
        formatter.write_str(label)
    }
}

/// Concrete commands for a dependency on one OS family.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformCommand {
    /// Command exiting zero when the dependency is satisfied.
    pub check: String,
    /// Command that installs the dependency, when automation is possible.
    pub install: Option<String>,
    /// Command that starts the dependency after installation.
    pub start: Option<String>,
    /// Instructions shown when automation is impossible or fails.
    pub manual_fix: String,
}

impl PlatformCommand {
    fn new(check: &str, install: Option<&str>, manual_fix: impl Into<String>) -> Self {
        Self {
            check: check.to_owned(),
            install: install.map(str::to_owned),
            start: None,
            manual_fix: manual_fix.into(),
        }
    }

    fn with_start(mut self, start: &str) -> Self {
        self.start = Some(start.to_owned());
        self
    }
}

/// Resolves the concrete commands for `dependency` on `os`.
#[must_use]
pub fn resolve(dependency: Dependency, os: OsFamily) -> PlatformCommand {
    match dependency {
        Dependency::PackageManager => package_manager(os),
        Dependency::VersionControl => version_control(os),
        Dependency::ContainerRuntime => container_runtime(os),
        Dependency::ContainerDaemon => container_daemon(os),
        Dependency::LanguageRuntime(runtime) => language_runtime(runtime, os),
    }
}

fn package_install(os: OsFamily, package: &str) -> String {
    match os {
        OsFamily::Ubuntu | OsFamily::Debian => {
            format!("sudo apt-get update && sudo apt-get install -y {package}")
        }
        OsFamily::Fedora => format!("sudo dnf install -y {package}"),
        OsFamily::Macos => format!("brew install {package}"),
        OsFamily::Windows => format!("winget install -e --id {package}"),
    }
}

fn package_manager(os: OsFamily) -> PlatformCommand {
    match os {
        OsFamily::Ubuntu | OsFamily::Debian => PlatformCommand::new(
            "command -v apt-get",
            None,
            "apt-get ships with the base system; reinstall the apt package",
        ),
        OsFamily::Fedora => PlatformCommand::new(
            "command -v dnf",
            None,
            "dnf ships with the base system; reinstall the dnf package",
        ),
        OsFamily::Macos => PlatformCommand::new(
            "command -v brew",
            Some(
                "NONINTERACTIVE=1 /bin/bash -c \"$(curl -fsSL \
                 https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)\"",
            ),
            "Install Homebrew from https://brew.sh",
        ),
        OsFamily::Windows => PlatformCommand::new(
            "winget --version",
            None,
            "Install App Installer from the Microsoft Store to get winget",
        ),
    }
}

fn version_control(os: OsFamily) -> PlatformCommand {
    let install = if os == OsFamily::Windows {
        package_install(os, "Git.Git")
    } else {
        package_install(os, "git")
    };
    PlatformCommand::new(
        "git --version",
        Some(&install),
        format!("Install git manually: {install}"),
    )
}

fn container_runtime(os: OsFamily) -> PlatformCommand {
    match os {
        OsFamily::Ubuntu | OsFamily::Debian | OsFamily::Fedora => PlatformCommand::new(
            "docker --version",
            Some("curl -fsSL https://get.docker.com | sudo sh"),
            "Install Docker Engine: https://docs.docker.com/engine/install/",
        )
        .with_start("sudo systemctl enable --now docker"),
        OsFamily::Macos => PlatformCommand::new(
            "docker --version",
            Some("brew install --cask docker"),
            "Install Docker Desktop: https://docs.docker.com/desktop/install/mac-install/",
        )
        .with_start("open -a Docker"),
        OsFamily::Windows => PlatformCommand::new(
            "docker --version",
            Some("winget install -e --id Docker.DockerDesktop"),
            "Install Docker Desktop: https://docs.docker.com/desktop/install/windows-install/",
        ),
    }
}

fn container_daemon(os: OsFamily) -> PlatformCommand {
    if os.is_linux() {
        PlatformCommand::new(
            "systemctl is-active docker",
            Some("sudo systemctl enable --now docker"),
            "Start the daemon with `sudo systemctl enable --now docker`",
        )
    } else {
        let start = if os == OsFamily::Macos {
            Some("open -a Docker")
        } else {
            None
        };
        PlatformCommand::new("docker info", start, "Start Docker Desktop")
    }
}

fn language_runtime(runtime: Runtime, os: OsFamily) -> PlatformCommand {
    match runtime {
        Runtime::Node => {
            let install = match os {
                OsFamily::Ubuntu | OsFamily::Debian => String::from(
                    "curl -fsSL https://deb.nodesource.com/setup_lts.x | sudo -E bash - \
                     && sudo apt-get install -y nodejs",
                ),
                OsFamily::Windows => package_install(os, "OpenJS.NodeJS.LTS"),
                OsFamily::Macos => package_install(os, "node"),
                OsFamily::Fedora => package_install(os, "nodejs"),
            };
            PlatformCommand::new(
                "node --version",
                Some(&install),
                "Install Node.js LTS from https://nodejs.org",
            )
        }
        Runtime::Python => {
            let install = match os {
                OsFamily::Windows => package_install(os, "Python.Python.3.12"),
                OsFamily::Macos => package_install(os, "python"),
                OsFamily::Ubuntu | OsFamily::Debian | OsFamily::Fedora => {
                    package_install(os, "python3")
                }
            };
            PlatformCommand::new(
                "python3 --version",
                Some(&install),
                "Install Python 3 from https://www.python.org/downloads/",
            )
        }
    }
}
