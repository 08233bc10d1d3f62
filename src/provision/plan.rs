//! Provisioning plans: resource roles and their partial order.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

/// Part a cloud resource plays in the target topology.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceRole {
    /// Virtual network.
    Network,
    /// Subnet reachable from the internet.
    PublicSubnet,
    /// Subnet for private services.
    PrivateSubnet,
    /// Gateway between the network and the internet.
    InternetGateway,
    /// Route from the public subnet through the gateway.
    RouteTable,
    /// Firewall rules for the instance.
    SecurityGroup,
    /// SSH public key registered with the provider.
    KeyPair,
    /// Compute instance.
    Instance,
    /// Static public address attached to the instance.
    ElasticIp,
    /// Managed database.
    Database,
    /// Object storage bucket.
    ObjectStorage,
    /// Container registry namespace.
    ContainerRegistry,
    /// Verified mail sending domain.
    MailDomain,
}

impl ResourceRole {
    /// Tag value and name suffix for the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::PublicSubnet => "public-subnet",
            Self::PrivateSubnet => "private-subnet",
            Self::InternetGateway => "internet-gateway",
            Self::RouteTable => "route-table",
            Self::SecurityGroup => "security-group",
            Self::KeyPair => "key-pair",
            Self::Instance => "instance",
            Self::ElasticIp => "elastic-ip",
            Self::Database => "database",
            Self::ObjectStorage => "object-storage",
            Self::ContainerRegistry => "container-registry",
            Self::MailDomain => "mail-domain",
        }
    }

    /// Roles that must exist before this one in the canonical plan.
    #[must_use]
    pub fn prerequisites(self) -> Vec<Self> {
        match self {
            Self::Network
            | Self::KeyPair
            | Self::ObjectStorage
            | Self::ContainerRegistry
            | Self::MailDomain => Vec::new(),
            Self::PublicSubnet
            | Self::PrivateSubnet
            | Self::InternetGateway
            | Self::SecurityGroup => vec![Self::Network],
            Self::RouteTable => vec![Self::PublicSubnet, Self::InternetGateway],
            Self::Instance => vec![Self::PublicSubnet, Self::SecurityGroup, Self::KeyPair],
            Self::ElasticIp => vec![Self::Instance],
            Self::Database => vec![Self::PrivateSubnet],
        }
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Optional parts of the target topology.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    /// Provision a managed database in the private subnet.
    pub database: bool,
    /// Provision an object storage bucket.
    pub object_storage: bool,
    /// Provision a container registry namespace.
    pub container_registry: bool,
    /// Domain to register for transactional mail.
    pub mail_domain: Option<String>,
    /// TCP ports opened by the security group.
    pub ingress_ports: Vec<u16>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            database: false,
            object_storage: false,
            container_registry: false,
            mail_domain: None,
            ingress_ports: vec![22, 80, 443],
        }
    }
}

/// One node of a plan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanStep {
    /// Role the step provisions.
    pub role: ResourceRole,
    /// Roles that must be handled earlier.
    pub requires: Vec<ResourceRole>,
}

impl PlanStep {
    /// Creates a step with the canonical prerequisites of `role`.
    #[must_use]
    pub fn canonical(role: ResourceRole) -> Self {
        Self {
            role,
            requires: role.prerequisites(),
        }
    }
}

/// Errors raised when a plan violates its own ordering.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlanError {
    /// Raised when a role appears twice.
    #[error("{role} appears more than once in the plan")]
    DuplicateStep {
        /// Repeated role.
        role: ResourceRole,
    },
    /// Raised when a step requires a role the plan never provisions.
    #[error("{role} requires {requires}, which is not part of the plan")]
    MissingDependency {
        /// Dependent role.
        role: ResourceRole,
        /// Absent prerequisite.
        requires: ResourceRole,
    },
    /// Raised when a step precedes one of its prerequisites.
    #[error("{role} is scheduled before its prerequisite {requires}")]
    OutOfOrder {
        /// Dependent role.
        role: ResourceRole,
        /// Prerequisite scheduled later.
        requires: ResourceRole,
    },
}

/// Validated, ordered list of provisioning steps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningPlan {
    steps: Vec<PlanStep>,
}

impl ProvisioningPlan {
    /// Builds a plan from explicit steps, checking that each prerequisite is
    /// present and scheduled earlier.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the order is invalid.
    pub fn new(steps: Vec<PlanStep>) -> Result<Self, PlanError> {
        let planned: BTreeSet<ResourceRole> = steps.iter().map(|step| step.role).collect();
        let mut seen = BTreeSet::new();
        for step in &steps {
            for requires in &step.requires {
                if !planned.contains(requires) {
                    return Err(PlanError::MissingDependency {
                        role: step.role,
                        requires: *requires,
                    });
                }
                if !seen.contains(requires) {
                    return Err(PlanError::OutOfOrder {
                        role: step.role,
                        requires: *requires,
                    });
                }
            }
            if !seen.insert(step.role) {
                return Err(PlanError::DuplicateStep { role: step.role });
            }
        }
        Ok(Self { steps })
    }

    /// Canonical plan for `topology`: network, subnets, gateway, route table,
    /// security group, key pair, instance, elastic IP, then the optional
    /// managed services.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] only if the canonical order is inconsistent.
    pub fn for_topology(topology: &Topology) -> Result<Self, PlanError> {
        let mut roles = vec![
            ResourceRole::Network,
            ResourceRole::PublicSubnet,
            ResourceRole::PrivateSubnet,
            ResourceRole::InternetGateway,
            ResourceRole::RouteTable,
            ResourceRole::SecurityGroup,
            ResourceRole::KeyPair,
            ResourceRole::Instance,
            ResourceRole::ElasticIp,
        ];
        if topology.database {
            roles.push(ResourceRole::Database);
        }
        if topology.object_storage {
            roles.push(ResourceRole::ObjectStorage);
        }
        if topology.container_registry {
            roles.push(ResourceRole::ContainerRegistry);
        }
        if topology.mail_domain.is_some() {
            roles.push(ResourceRole::MailDomain);
        }
        Self::new(roles.into_iter().map(PlanStep::canonical).collect())
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Roles in execution order.
    #[must_use]
    pub fn roles(&self) -> Vec<ResourceRole> {
        self.steps.iter().map(|step| step.role).collect()
    }
}
