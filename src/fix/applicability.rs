//! Narrowing the fix catalog to a target.

use super::{Fix, Stage};
use crate::platform::OsFamily;

/// Returns the fixes whose stage equals `stage` and whose OS constraint admits
/// `os`, in catalog order.
///
/// When `os` is `None` only unconstrained fixes survive.
#[must_use]
pub fn applicable(catalog: &[Fix], stage: Stage, os: Option<OsFamily>) -> Vec<Fix> {
    catalog
        .iter()
        .filter(|fix| fix.applies_to(stage, os))
        .cloned()
        .collect()
}
