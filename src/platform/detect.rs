//! Operating system detection on a target.

use tracing::debug;

use super::{OsFamily, parse_os_release, parse_uname};
use crate::exec::{ExecError, RemoteExecutor, Target};

/// Detects the OS family of `target`.
///
/// Runs `uname -s` first; Linux kernels are then refined with
/// `/etc/os-release`. Returns `Ok(None)` when the family is not one the engine
/// supports.
///
/// # Errors
///
/// Returns [`ExecError`] when a probe cannot be executed at all.
pub async fn detect_os(
    executor: &dyn RemoteExecutor,
    target: &Target,
) -> Result<Option<OsFamily>, ExecError> {
    let uname = executor.execute(target, "uname -s").await?;
    if !uname.is_success() {
        debug!(%target, status = %uname.status_text(), "uname unavailable");
        return Ok(if matches!(target, Target::Local) {
            OsFamily::host()
        } else {
            None
        });
    }

    if let Some(family) = parse_uname(&uname.stdout) {
        return Ok(Some(family));
    }

    let release = executor.execute(target, "cat /etc/os-release").await?;
    if !release.is_success() {
        debug!(%target, "os-release unavailable");
        return Ok(None);
    }
    Ok(parse_os_release(&release.stdout))
}
