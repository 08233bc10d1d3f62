//! Thin wrapper over the `scw` CLI with JSON output.

use std::ffi::OsString;

use serde::Deserialize;

use crate::exec::{CommandOutput, CommandRunner};
use crate::provision::{ProviderError, TagSet};

/// Public address as reported by instance listings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ScwAddress {
    pub(super) address: String,
}

/// Fields shared by every `scw` resource listing this crate reads.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub(super) struct ScwResource {
    #[serde(default)]
    pub(super) id: String,
    #[serde(default, alias = "Name")]
    pub(super) name: String,
    #[serde(default)]
    pub(super) tags: Vec<String>,
    #[serde(default)]
    pub(super) address: Option<String>,
    #[serde(default)]
    pub(super) public_ip: Option<ScwAddress>,
    #[serde(default)]
    pub(super) gateway_id: Option<String>,
    #[serde(default)]
    pub(super) private_network_id: Option<String>,
}

impl ScwResource {
    /// Identifier, falling back to the name for resources keyed by name.
    pub(super) fn identifier(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    /// Public address, wherever the listing put it.
    pub(super) fn public_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or_else(|| self.public_ip.as_ref().map(|ip| ip.address.as_str()))
    }
}

/// Argument vector builder for `scw` invocations.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct ScwArgs(Vec<OsString>);

impl ScwArgs {
    pub(super) fn command(path: &[&str], verb: &str) -> Self {
        let mut args = Self::default();
        for part in path {
            args.0.push(OsString::from(*part));
        }
        args.0.push(OsString::from(verb));
        args
    }

    pub(super) fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.0.push(value.into());
        self
    }

    pub(super) fn pair(self, key: &str, value: &str) -> Self {
        self.arg(format!("{key}={value}"))
    }

    pub(super) fn tags(mut self, tags: &TagSet) -> Self {
        for (index, tag) in tags.as_slice().iter().enumerate() {
            self.0.push(OsString::from(format!("tags.{index}={tag}")));
        }
        self
    }

    pub(super) fn json(self) -> Self {
        self.arg("-o").arg("json")
    }

    pub(super) fn into_vec(self) -> Vec<OsString> {
        self.0
    }
}

/// Runs `scw` through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub(super) struct ScwCli<R> {
    bin: String,
    runner: R,
}

fn parse_error(resource: &str, err: &serde_json::Error) -> ProviderError {
    ProviderError::Parse {
        resource: resource.to_owned(),
        message: err.to_string(),
    }
}

impl<R: CommandRunner> ScwCli<R> {
    pub(super) const fn new(bin: String, runner: R) -> Self {
        Self { bin, runner }
    }

    fn check_output(&self, output: CommandOutput, resource: &str) -> Result<String, ProviderError> {
        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(ProviderError::CommandFailure {
            program: self.bin.clone(),
            status_text: output.status_text(),
            stderr: format!("{resource}: {}", output.stderr.trim()),
        })
    }

    /// Runs a command and returns its stdout.
    pub(super) async fn run(&self, args: ScwArgs, resource: &str) -> Result<String, ProviderError> {
        let argv = args.into_vec();
        let output = self.runner.run(&self.bin, &argv).await?;
        self.check_output(output, resource)
    }

    /// Runs a `list` command and parses the JSON array it prints. `scw`
    /// prints `null` or nothing for empty listings.
    pub(super) async fn list(
        &self,
        args: ScwArgs,
        resource: &str,
    ) -> Result<Vec<ScwResource>, ProviderError> {
        let stdout = self.run(args.json(), resource).await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Option<Vec<ScwResource>>>(&stdout)
            .map(Option::unwrap_or_default)
            .map_err(|err| parse_error(resource, &err))
    }

    /// Runs a `create` command and parses the resource it prints.
    pub(super) async fn create(
        &self,
        args: ScwArgs,
        resource: &str,
    ) -> Result<ScwResource, ProviderError> {
        let stdout = self.run(args.json(), resource).await?;
        parse_created(&stdout, resource)
    }
}

/// Parses `create` output. Some commands wrap the resource in a single-key
/// object (`{"ip": {...}}`), so the first nested object carrying an `id` is
/// accepted too.
pub(super) fn parse_created(stdout: &str, resource: &str) -> Result<ScwResource, ProviderError> {
    let value: serde_json::Value =
        serde_json::from_str(stdout).map_err(|err| parse_error(resource, &err))?;
    let object = if value.get("id").is_some() {
        value
    } else {
        let nested = value.as_object().and_then(|map| {
            map.values()
                .find(|candidate| candidate.get("id").is_some())
                .cloned()
        });
        nested.unwrap_or(value)
    };
    serde_json::from_value(object).map_err(|err| parse_error(resource, &err))
}
