//! How each resource role maps onto `scw` subcommands.

use super::cli::{ScwArgs, ScwResource};
use crate::config::ScalewayConfig;
use crate::provision::{ProviderError, ResourceHandle, ResourceRole, ResourceSpec};

/// Where a product lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Scope {
    Zone,
    Region,
    Global,
}

/// How an existing resource is recognised.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Lookup {
    /// Carries the identity tags.
    Tags,
    /// Untaggable; matched by deterministic name, filtered server side.
    Name,
    /// Untaggable and unfilterable; listed and matched by name locally.
    ListedName,
    /// Matched by the requested domain name.
    Domain,
    /// Gateway attachment, matched by the gateway and subnet it joins.
    Attachment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) struct RoleCommand {
    pub(super) path: &'static [&'static str],
    pub(super) scope: Scope,
    pub(super) lookup: Lookup,
    pub(super) project_scoped: bool,
}

const VPC: &[&str] = &["vpc", "vpc"];
const PRIVATE_NETWORK: &[&str] = &["vpc", "private-network"];
const GATEWAY: &[&str] = &["vpc-gw", "gateway"];
const GATEWAY_NETWORK: &[&str] = &["vpc-gw", "gateway-network"];
const SECURITY_GROUP: &[&str] = &["instance", "security-group"];
const SSH_KEY: &[&str] = &["iam", "ssh-key"];
const SERVER: &[&str] = &["instance", "server"];
const FLEXIBLE_IP: &[&str] = &["instance", "ip"];
const DATABASE: &[&str] = &["rdb", "instance"];
const BUCKET: &[&str] = &["object", "bucket"];
const REGISTRY: &[&str] = &["registry", "namespace"];
const MAIL_DOMAIN: &[&str] = &["tem", "domain"];

impl RoleCommand {
    const fn new(
        path: &'static [&'static str],
        scope: Scope,
        lookup: Lookup,
        project_scoped: bool,
    ) -> Self {
        Self {
            path,
            scope,
            lookup,
            project_scoped,
        }
    }

    pub(super) const fn for_role(role: ResourceRole) -> Self {
        match role {
            ResourceRole::Network => Self::new(VPC, Scope::Region, Lookup::Tags, true),
            ResourceRole::PublicSubnet | ResourceRole::PrivateSubnet => {
                Self::new(PRIVATE_NETWORK, Scope::Region, Lookup::Tags, true)
            }
            ResourceRole::InternetGateway => Self::new(GATEWAY, Scope::Zone, Lookup::Tags, true),
            ResourceRole::RouteTable => {
                Self::new(GATEWAY_NETWORK, Scope::Zone, Lookup::Attachment, false)
            }
            ResourceRole::SecurityGroup => {
                Self::new(SECURITY_GROUP, Scope::Zone, Lookup::Tags, true)
            }
            ResourceRole::KeyPair => Self::new(SSH_KEY, Scope::Global, Lookup::Name, true),
            ResourceRole::Instance => Self::new(SERVER, Scope::Zone, Lookup::Tags, true),
            ResourceRole::ElasticIp => Self::new(FLEXIBLE_IP, Scope::Zone, Lookup::Tags, true),
            ResourceRole::Database => Self::new(DATABASE, Scope::Region, Lookup::Tags, true),
            ResourceRole::ObjectStorage => {
                Self::new(BUCKET, Scope::Region, Lookup::ListedName, false)
            }
            ResourceRole::ContainerRegistry => {
                Self::new(REGISTRY, Scope::Region, Lookup::Name, true)
            }
            ResourceRole::MailDomain => Self::new(MAIL_DOMAIN, Scope::Region, Lookup::Domain, true),
        }
    }

    /// Handle kind, for example `vpc.private-network`.
    pub(super) fn kind(&self) -> String {
        self.path.join(".")
    }

    fn scoped(&self, args: ScwArgs, config: &ScalewayConfig) -> ScwArgs {
        match self.scope {
            Scope::Zone => args.pair("zone", &config.default_zone),
            Scope::Region => args.pair("region", &config.default_region),
            Scope::Global => args,
        }
    }

    fn project(&self, args: ScwArgs, config: &ScalewayConfig) -> ScwArgs {
        if self.project_scoped {
            args.pair("project-id", &config.default_project_id)
        } else {
            args
        }
    }
}

fn require_domain(spec: &ResourceSpec) -> Result<&str, ProviderError> {
    spec.domain.as_deref().ok_or_else(|| ProviderError::Provider {
        message: String::from("mail domain requested without provision.mail_domain"),
    })
}

/// Arguments listing candidates for `spec`.
pub(super) fn list_args(
    command: &RoleCommand,
    spec: &ResourceSpec,
    config: &ScalewayConfig,
) -> Result<ScwArgs, ProviderError> {
    let base = command.scoped(
        command.project(ScwArgs::command(command.path, "list"), config),
        config,
    );
    Ok(match command.lookup {
        Lookup::Tags => base.tags(&spec.tags),
        Lookup::Name => base.pair("name", &spec.name),
        Lookup::ListedName => base,
        Lookup::Domain => base.pair("domain-name", require_domain(spec)?),
        Lookup::Attachment => base
            .pair(
                "gateway-id",
                &spec.require(ResourceRole::InternetGateway)?.id,
            )
            .pair(
                "private-network-id",
                &spec.require(ResourceRole::PublicSubnet)?.id,
            ),
    })
}

/// Returns `true` when a listed resource is the one `spec` describes.
pub(super) fn matches(command: &RoleCommand, spec: &ResourceSpec, resource: &ScwResource) -> bool {
    match command.lookup {
        Lookup::Tags => spec.tags.matches(&resource.tags),
        Lookup::Name | Lookup::ListedName => resource.name == spec.name,
        Lookup::Domain => spec.domain.as_deref() == Some(resource.name.as_str()),
        Lookup::Attachment => {
            let joins = |role: ResourceRole, actual: Option<&String>| {
                spec.dependency(role)
                    .is_some_and(|handle| actual.is_some_and(|id| *id == handle.id))
            };
            joins(ResourceRole::InternetGateway, resource.gateway_id.as_ref())
                && joins(ResourceRole::PublicSubnet, resource.private_network_id.as_ref())
        }
    }
}

/// Arguments creating the resource `spec` describes. Instances are created
/// through the HTTP API instead.
pub(super) fn create_args(
    command: &RoleCommand,
    spec: &ResourceSpec,
    config: &ScalewayConfig,
) -> Result<ScwArgs, ProviderError> {
    let base = ScwArgs::command(command.path, "create");
    let args = match spec.role {
        ResourceRole::Network => base.pair("name", &spec.name).tags(&spec.tags),
        ResourceRole::InternetGateway => base
            .pair("name", &spec.name)
            .pair("type", "VPC-GW-S")
            .tags(&spec.tags),
        ResourceRole::ElasticIp => base.tags(&spec.tags),
        ResourceRole::PublicSubnet | ResourceRole::PrivateSubnet => base
            .pair("name", &spec.name)
            .pair("vpc-id", &spec.require(ResourceRole::Network)?.id)
            .tags(&spec.tags),
        ResourceRole::RouteTable => base
            .pair(
                "gateway-id",
                &spec.require(ResourceRole::InternetGateway)?.id,
            )
            .pair(
                "private-network-id",
                &spec.require(ResourceRole::PublicSubnet)?.id,
            )
            .pair("enable-masquerade", "true")
            .pair("ipam-config.push-default-route", "true"),
        ResourceRole::SecurityGroup => base
            .pair("name", &spec.name)
            .pair("inbound-default-policy", "drop")
            .pair("outbound-default-policy", "accept")
            .pair("stateful", "true")
            .tags(&spec.tags),
        ResourceRole::KeyPair => {
            let key = spec.public_key.as_deref().ok_or_else(|| ProviderError::Provider {
                message: String::from("no SSH public key configured; set provision.ssh_public_key"),
            })?;
            base.pair("name", &spec.name).pair("public-key", key)
        }
        ResourceRole::Database => base
            .pair("name", &spec.name)
            .pair("engine", "PostgreSQL-16")
            .pair("node-type", "DB-DEV-S")
            .pair("user-name", "driftfix")
            .pair("generate-password", "true")
            .pair(
                "init-endpoints.0.private-network.private-network-id",
                &spec.require(ResourceRole::PrivateSubnet)?.id,
            )
            .pair("init-endpoints.0.private-network.enable-ipam", "true")
            .tags(&spec.tags),
        ResourceRole::ObjectStorage => base.arg(spec.name.clone()),
        ResourceRole::ContainerRegistry => base
            .pair("name", &spec.name)
            .pair("is-public", "false"),
        ResourceRole::MailDomain => base
            .pair("domain-name", require_domain(spec)?)
            .pair("accept-tos", "true"),
        ResourceRole::Instance => return Err(ProviderError::Unsupported { role: spec.role }),
    };
    Ok(command.scoped(command.project(args, config), config))
}

/// Arguments deleting `handle`.
pub(super) fn delete_args(
    command: &RoleCommand,
    handle: &ResourceHandle,
    config: &ScalewayConfig,
) -> ScwArgs {
    let verb = if handle.role == ResourceRole::MailDomain {
        "revoke"
    } else {
        "delete"
    };
    let base = ScwArgs::command(command.path, verb).arg(handle.id.clone());
    let args = match handle.role {
        ResourceRole::Instance => base
            .pair("with-ip", "true")
            .pair("with-volumes", "all")
            .pair("force-shutdown", "true"),
        ResourceRole::InternetGateway => base.pair("cleanup-dhcp", "true"),
        ResourceRole::Network
        | ResourceRole::PublicSubnet
        | ResourceRole::PrivateSubnet
        | ResourceRole::RouteTable
        | ResourceRole::SecurityGroup
        | ResourceRole::KeyPair
        | ResourceRole::ElasticIp
        | ResourceRole::Database
        | ResourceRole::ObjectStorage
        | ResourceRole::ContainerRegistry
        | ResourceRole::MailDomain => base,
    };
    command.scoped(args, config)
}

/// Rules opening `ports` on a freshly created security group.
pub(super) fn ingress_rule_args(
    group_id: &str,
    ports: &[u16],
    config: &ScalewayConfig,
) -> Vec<ScwArgs> {
    ports
        .iter()
        .map(|port| {
            ScwArgs::command(&["instance", "security-group"], "create-rule")
                .pair("security-group-id", group_id)
                .pair("protocol", "TCP")
                .pair("direction", "inbound")
                .pair("action", "accept")
                .pair("ip-range", "0.0.0.0/0")
                .pair("dest-port-from", &port.to_string())
                .pair("zone", &config.default_zone)
        })
        .collect()
}

/// Attaches a flexible IP to the instance it was created for.
pub(super) fn attach_ip_args(ip_id: &str, instance_id: &str, config: &ScalewayConfig) -> ScwArgs {
    ScwArgs::command(&["instance", "ip"], "attach")
        .arg(ip_id.to_owned())
        .pair("server-id", instance_id)
        .pair("zone", &config.default_zone)
}

/// Attaches an instance to a private network.
pub(super) fn private_nic_args(
    instance_id: &str,
    network_id: &str,
    config: &ScalewayConfig,
) -> ScwArgs {
    ScwArgs::command(&["instance", "private-nic"], "create")
        .pair("server-id", instance_id)
        .pair("private-network-id", network_id)
        .pair("zone", &config.default_zone)
}
