//! Compute instances through the Scaleway Instances HTTP API.
//!
//! Instances are created stopped, attached to the public subnet, then
//! powered on. Listing, deletion and attachments go through `scw`; image
//! resolution, creation and state polling use the API directly.

use std::future::Future;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use scaleway_rs::{
    ScalewayApiError, ScalewayImage, ScalewayInstance, ScalewayListInstanceImagesBuilder,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ScalewayProvider, api_error, resources};
use crate::exec::CommandRunner;
use crate::provision::{
    InstanceState, InstanceStatus, ProviderError, ResourceHandle, ResourceRole, ResourceSpec,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Serialize)]
struct CreateServerRequest {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: ScalewayInstance,
}

/// Keeps images matching the architecture that are ready to boot.
pub(super) fn filter_images(images: Vec<ScalewayImage>, architecture: &str) -> Vec<ScalewayImage> {
    images
        .into_iter()
        .filter(|image| image.arch == architecture)
        .filter(|image| image.state == "available")
        .collect()
}

/// Picks the newest candidate.
pub(super) fn select_image_id(
    mut candidates: Vec<ScalewayImage>,
    label: &str,
    architecture: &str,
) -> Result<String, ProviderError> {
    candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
    candidates
        .into_iter()
        .next()
        .map(|image| image.id)
        .ok_or_else(|| ProviderError::Provider {
            message: format!("image '{label}' (arch {architecture}) not found"),
        })
}

/// Project images win over public ones; public images are only consulted
/// when the project has none under the label.
pub(super) async fn resolve_image_with<FutA, FutB, FetchA, FetchB>(
    label: &str,
    architecture: &str,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ProviderError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ProviderError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ProviderError>>,
{
    let project_images = project_fetch().await?;
    let primary = if project_images.is_empty() {
        public_fetch().await?
    } else {
        project_images
    };
    select_image_id(filter_images(primary, architecture), label, architecture)
}

fn is_instance_type_error(api_err: &ScalewayApiError, instance_type: &str) -> bool {
    matches!(api_err.resource.as_deref(), Some("commercial_type"))
        || api_err
            .resource_id
            .as_deref()
            .is_some_and(|id| id == instance_type)
        || (api_err.etype == "invalid_arguments"
            && api_err.message.to_ascii_lowercase().contains("commercial_type"))
}

/// Maps a Scaleway server to the provider-neutral status.
pub(super) fn status_of(server: &ScalewayInstance) -> InstanceStatus {
    InstanceStatus {
        state: InstanceState::from_provider(&server.state),
        public_ip: server
            .public_ip
            .as_ref()
            .and_then(|ip| ip.address.parse::<IpAddr>().ok()),
    }
}

impl<R: CommandRunner> ScalewayProvider<R> {
    async fn resolve_image_id(&self) -> Result<String, ProviderError> {
        let config = &self.config;
        resolve_image_with(
            &config.default_image,
            &config.default_architecture,
            || async move {
                let mut scoped =
                    ScalewayListInstanceImagesBuilder::new(self.api.clone(), &config.default_zone)
                        .public(true)
                        .project(&config.default_project_id)
                        .name(&config.default_image)
                        .arch(&config.default_architecture);
                if let Some(org) = &config.default_organization_id {
                    scoped = scoped.organization(org);
                }
                scoped.run_async().await.map_err(api_error)
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &config.default_zone)
                    .public(true)
                    .name(&config.default_image)
                    .arch(&config.default_architecture)
                    .run_async()
                    .await
                    .map_err(api_error)
            },
        )
        .await
    }

    async fn post_server(
        &self,
        spec: &ResourceSpec,
        image_id: String,
    ) -> Result<ScalewayInstance, ProviderError> {
        let config = &self.config;
        let url = format!(
            "{SCALEWAY_INSTANCE_API_BASE}/zones/{}/servers",
            config.default_zone
        );
        let payload = CreateServerRequest {
            name: spec.name.clone(),
            commercial_type: config.default_instance_type.clone(),
            image: image_id,
            project: config.default_project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: spec.tags.as_slice().to_vec(),
            stopped: true,
            security_group: spec
                .dependency(ResourceRole::SecurityGroup)
                .map(|handle| handle.id.clone()),
            organization: config.default_organization_id.clone(),
        };

        let provider_error = |err: reqwest::Error| ProviderError::Provider {
            message: err.to_string(),
        };
        let response = HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(provider_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(provider_error)?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| ProviderError::Parse {
                    resource: String::from("server"),
                    message: err.to_string(),
                })?;
            return Ok(parsed.server);
        }

        if let Ok(api_err) = serde_json::from_slice::<ScalewayApiError>(&body)
            && is_instance_type_error(&api_err, &config.default_instance_type)
        {
            return Err(ProviderError::Provider {
                message: format!(
                    "instance type '{}' not available in zone {}",
                    config.default_instance_type, config.default_zone
                ),
            });
        }
        Err(ProviderError::Provider {
            message: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn power_on_if_needed(&self, server: &ScalewayInstance) -> Result<(), ProviderError> {
        if server.state == "running" {
            return Ok(());
        }
        if server.allowed_actions.iter().any(|action| action == "poweron") {
            self.api
                .perform_instance_action_async(&self.config.default_zone, &server.id, "poweron")
                .await
                .map_err(api_error)?;
            return Ok(());
        }
        Err(ProviderError::Provider {
            message: format!(
                "instance {} in state {} cannot be powered on",
                server.id, server.state
            ),
        })
    }

    /// Creates, attaches and boots the instance described by `spec`.
    pub(super) async fn create_instance(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceHandle, ProviderError> {
        let subnet = spec.require(ResourceRole::PublicSubnet)?.id.clone();
        spec.require(ResourceRole::SecurityGroup)?;
        let image_id = self.resolve_image_id().await?;
        debug!(image = %image_id, name = %spec.name, "creating instance");
        let server = self.post_server(spec, image_id).await?;
        let handle = ResourceHandle::created(ResourceRole::Instance, "instance.server", &server.id);

        if let Err(err) = self.boot(&server, &subnet).await {
            // The provisioner only compensates handles it was given back.
            if let Err(cleanup) = self.remove(&handle).await {
                warn!(
                    instance = %server.id,
                    error = %cleanup,
                    "failed to delete half-created instance"
                );
            }
            return Err(err);
        }
        Ok(handle)
    }

    async fn boot(&self, server: &ScalewayInstance, subnet: &str) -> Result<(), ProviderError> {
        self.cli
            .run(
                resources::private_nic_args(&server.id, subnet, &self.config),
                "private-nic create",
            )
            .await?;
        self.power_on_if_needed(server).await
    }

    /// Current state and public address of the instance behind `handle`.
    pub(super) async fn fetch_status(
        &self,
        handle: &ResourceHandle,
    ) -> Result<InstanceStatus, ProviderError> {
        let mut servers = self
            .api
            .list_instances(&self.config.default_zone)
            .servers(&handle.id)
            .per_page(1)
            .run_async()
            .await
            .map_err(api_error)?;
        Ok(servers.pop().map_or_else(
            || InstanceStatus {
                state: InstanceState::Other(String::from("missing")),
                public_ip: None,
            },
            |server| status_of(&server),
        ))
    }
}
