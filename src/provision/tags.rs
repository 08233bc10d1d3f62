//! Tag triples that identify managed cloud resources.
//!
//! Cloud tags are the only durable memory of a provisioning run: every
//! resource carries the project identity, the managed-by marker and its role,
//! so the next run can rediscover it.

use super::plan::ResourceRole;

/// Marker applied to every resource the engine creates.
pub const MANAGED_BY_TAG: &str = "driftfix-managed-by=driftfix";

const PROJECT_TAG_PREFIX: &str = "driftfix-project=";
const ENVIRONMENT_TAG_PREFIX: &str = "driftfix-env=";
const ROLE_TAG_PREFIX: &str = "driftfix-role=";

/// Project and environment a resource belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectIdentity {
    project: String,
    environment: String,
}

impl ProjectIdentity {
    /// Creates an identity, normalising both parts to lowercase slugs.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            project: non_empty_slug(project, "project"),
            environment: non_empty_slug(environment, "default"),
        }
    }

    /// Project slug.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Environment slug.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Tags identifying the resource playing `role`.
    #[must_use]
    pub fn tags_for(&self, role: ResourceRole) -> TagSet {
        TagSet(vec![
            format!("{PROJECT_TAG_PREFIX}{}", self.project),
            format!("{ENVIRONMENT_TAG_PREFIX}{}", self.environment),
            String::from(MANAGED_BY_TAG),
            format!("{ROLE_TAG_PREFIX}{}", role.as_str()),
        ])
    }

    /// Deterministic resource name, used where the provider cannot filter by
    /// tag (for example bucket names).
    #[must_use]
    pub fn resource_name(&self, role: ResourceRole) -> String {
        format!(
            "driftfix-{}-{}-{}",
            self.project,
            self.environment,
            role.as_str()
        )
    }
}

/// Ordered set of `key=value` tags.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Tags as string slices.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Comma-separated form accepted by list filters.
    #[must_use]
    pub fn joined(&self) -> String {
        self.0.join(",")
    }

    /// Returns `true` when every tag in the set is present in `tags`.
    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        self.0.iter().all(|tag| tags.contains(tag))
    }
}

fn non_empty_slug(value: &str, fallback: &str) -> String {
    let slug = slugify(value);
    if slug.is_empty() {
        fallback.to_owned()
    } else {
        slug
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_owned()
}
