//! Read-only access to named secrets.
//!
//! The engine never decrypts anything itself; it asks a [`SecretStore`] for a
//! value by name. Private keys handed to the SSH client are written to a
//! temporary file with owner-only permissions that disappears when the
//! [`KeyFile`] guard drops.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::exec::ExecError;

/// Secret value whose `Debug` output never reveals the content.
#[derive(Clone, Eq, PartialEq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a raw secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("SecretValue(<redacted>)")
    }
}

/// Read-only secret lookup.
pub trait SecretStore: Send + Sync {
    /// Returns the secret called `name`, if present.
    fn get(&self, name: &str) -> Option<SecretValue>;

    /// Returns `true` when a non-empty secret called `name` exists.
    fn contains(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|value| !value.expose().trim().is_empty())
    }
}

/// Secret store reading upper-cased names from process environment variables.
///
/// A secret named `scaleway.secret_key` with prefix `DRIFTFIX_SECRET_` is read
/// from `DRIFTFIX_SECRET_SCALEWAY_SECRET_KEY`.
#[derive(Clone, Debug)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    /// Creates a store that prepends `prefix` to every lookup.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `name`.
    #[must_use]
    pub fn variable_for(&self, name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<SecretValue> {
        std::env::var(self.variable_for(name))
            .ok()
            .map(SecretValue::new)
    }
}

/// In-memory secret store for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct MemorySecretStore {
    values: BTreeMap<String, SecretValue>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Adds or replaces a secret, returning the store for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a secret.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), SecretValue::new(value));
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Option<SecretValue> {
        self.values.get(name).cloned()
    }
}

/// Private key written to a restricted temporary file.
///
/// The file is deleted when the guard drops.
#[derive(Debug)]
pub struct KeyFile {
    file: NamedTempFile,
}

impl KeyFile {
    /// Writes `secret` to a fresh temporary file readable only by the owner.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::KeyMaterial`] when the file cannot be created,
    /// written, or restricted.
    pub fn materialise(secret: &SecretValue) -> Result<Self, ExecError> {
        let mut file = tempfile::Builder::new()
            .prefix("driftfix-key-")
            .tempfile()
            .map_err(key_error)?;

        restrict_permissions(file.path())?;

        let mut content = secret.expose().to_owned();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        file.write_all(content.as_bytes()).map_err(key_error)?;
        file.flush().map_err(key_error)?;

        Ok(Self { file })
    }

    /// Location of the key on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

fn key_error(err: std::io::Error) -> ExecError {
    ExecError::KeyMaterial {
        message: err.to_string(),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ExecError> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(key_error)
}

#[cfg(not(unix))]
const fn restrict_permissions(_path: &Path) -> Result<(), ExecError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("scaleway.secret_key", "DRIFTFIX_SECRET_SCALEWAY_SECRET_KEY")]
    #[case("deploy-key", "DRIFTFIX_SECRET_DEPLOY_KEY")]
    fn env_store_maps_names_to_variables(#[case] name: &str, #[case] expected: &str) {
        let store = EnvSecretStore::new("DRIFTFIX_SECRET_");
        assert_eq!(store.variable_for(name), expected);
    }

    #[test]
    fn debug_output_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert!(!format!("{value:?}").contains("hunter2"));
    }

    #[rstest]
    #[case("token", true)]
    #[case("blank", false)]
    #[case("absent", false)]
    fn contains_requires_non_empty_value(#[case] name: &str, #[case] expected: bool) {
        let store = MemorySecretStore::new()
            .with("token", "abc")
            .with("blank", "  ");
        assert_eq!(store.contains(name), expected);
    }

    #[test]
    fn key_file_is_removed_on_drop() {
        let key = KeyFile::materialise(&SecretValue::new("-----BEGIN KEY-----"))
            .unwrap_or_else(|err| panic!("materialise key: {err}"));
        let path = key.path().to_path_buf();
        let content = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read key file: {err}"));
        assert_eq!(content, "-----BEGIN KEY-----\n");
        drop(key);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;
        let key = KeyFile::materialise(&SecretValue::new("material"))
            .unwrap_or_else(|err| panic!("materialise key: {err}"));
        let mode = std::fs::metadata(key.path())
            .unwrap_or_else(|err| panic!("stat key file: {err}"))
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
