//! Parsers for the output of probing utilities.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::OsFamily;

static VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").ok());

/// Semantic-ish version extracted from `--version` output.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ToolVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component; zero when absent.
    pub patch: u64,
}

impl ToolVersion {
    /// Builds a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Extracts the first `major.minor[.patch]` triple from tool output such as
/// `Docker version 24.0.7, build afdd53b` or `v20.11.1`.
#[must_use]
pub fn parse_version(output: &str) -> Option<ToolVersion> {
    let captures = VERSION.as_ref()?.captures(output)?;
    let component = |index: usize| -> Option<u64> {
        captures
            .get(index)
            .and_then(|value| value.as_str().parse().ok())
    };
    Some(ToolVersion::new(
        component(1)?,
        component(2)?,
        component(3).unwrap_or(0),
    ))
}

fn os_release_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let (name, value) = line.trim().split_once('=')?;
        (name == key).then(|| value.trim().trim_matches('"').trim_matches('\''))
    })
}

fn family_from_id(id: &str) -> Option<OsFamily> {
    match id.to_ascii_lowercase().as_str() {
        "ubuntu" => Some(OsFamily::Ubuntu),
        "debian" => Some(OsFamily::Debian),
        "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Some(OsFamily::Fedora),
        _ => None,
    }
}

/// Maps `/etc/os-release` content to an OS family, falling back to `ID_LIKE`
/// for derivatives.
#[must_use]
pub fn parse_os_release(content: &str) -> Option<OsFamily> {
    if let Some(family) = os_release_value(content, "ID").and_then(family_from_id) {
        return Some(family);
    }
    os_release_value(content, "ID_LIKE")?
        .split_whitespace()
        .find_map(family_from_id)
}

/// Maps `uname -s` output to an OS family. Linux yields `None` because the
/// distribution needs `/etc/os-release`.
#[must_use]
pub fn parse_uname(output: &str) -> Option<OsFamily> {
    let kernel = output.trim();
    if kernel.eq_ignore_ascii_case("darwin") {
        return Some(OsFamily::Macos);
    }
    let upper = kernel.to_ascii_uppercase();
    if ["MINGW", "MSYS", "CYGWIN", "WINDOWS_NT"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
    {
        return Some(OsFamily::Windows);
    }
    None
}

/// State reported by `systemctl is-active`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceState {
    /// The unit is running.
    Active,
    /// The unit is stopped.
    Inactive,
    /// The unit is starting.
    Activating,
    /// The unit failed.
    Failed,
    /// Any other answer, kept verbatim.
    Unknown(String),
}

impl ServiceState {
    /// Returns `true` for [`ServiceState::Active`].
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Parses the first line of `systemctl is-active <unit>` output.
#[must_use]
pub fn parse_service_state(output: &str) -> ServiceState {
    let state = output.lines().next().unwrap_or_default().trim();
    match state {
        "active" | "reloading" => ServiceState::Active,
        "inactive" | "deactivating" => ServiceState::Inactive,
        "activating" => ServiceState::Activating,
        "failed" => ServiceState::Failed,
        other => ServiceState::Unknown(other.to_owned()),
    }
}
