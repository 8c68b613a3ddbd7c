//! Infrastructure artifacts produced by the compiler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use range_spec::{floating_ip_resource, host_resource};
use range_spec::{Host, HostJob, Network, SecurityRule, Tier};

/// Logical name of the shared router.
pub const ROUTER_NAME: &str = "router:main";

/// What an artifact creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A network together with its subnet.
    Network { network: Network },
    /// A security group with its rules.
    SecurityGroup { group: String, rules: Vec<SecurityRule> },
    /// The shared router and one interface per linked network.
    Router { links: Vec<String> },
    /// A compute instance, booted from `snapshot` when one is recorded.
    Compute {
        host: Host,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
    /// A floating IP associated with a host.
    FloatingIp { host: String },
}

/// One unit of infrastructure work with a logical name and tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub tier: Tier,
    #[serde(flatten)]
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn network(network: &Network) -> Self {
        Self {
            name: format!("network:{}", network.name),
            tier: Tier::Network,
            kind: ArtifactKind::Network {
                network: network.clone(),
            },
        }
    }

    pub fn security_group(group: &str, rules: &[SecurityRule]) -> Self {
        Self {
            name: format!("secgroup:{}", group),
            tier: Tier::SecurityGroup,
            kind: ArtifactKind::SecurityGroup {
                group: group.to_string(),
                rules: rules.to_vec(),
            },
        }
    }

    pub fn router(links: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: ROUTER_NAME.to_string(),
            tier: Tier::Router,
            kind: ArtifactKind::Router {
                links: links.into_iter().collect(),
            },
        }
    }

    pub fn compute(host: &Host) -> Self {
        Self {
            name: host_resource(&host.name),
            tier: Tier::Compute,
            kind: ArtifactKind::Compute {
                host: host.clone(),
                snapshot: None,
            },
        }
    }

    pub fn floating_ip(host: &str) -> Self {
        Self {
            name: floating_ip_resource(host),
            tier: Tier::FloatingIp,
            kind: ArtifactKind::FloatingIp {
                host: host.to_string(),
            },
        }
    }

    /// Terraform-safe address derived from the logical name.
    pub fn address(&self) -> String {
        terraform_address(&self.name)
    }
}

/// Map a logical name (`network:lan-a`) to a Terraform identifier (`network_lan_a`).
pub fn terraform_address(logical: &str) -> String {
    logical
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Everything compiled from one topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledEnvironment {
    /// Artifacts in dependency order.
    pub artifacts: Vec<Artifact>,
    /// One job per host, in host order.
    pub jobs: Vec<HostJob>,
}

impl CompiledEnvironment {
    /// Artifacts belonging to any of `tiers`, order preserved.
    pub fn artifacts_in(&self, tiers: &[Tier]) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .filter(|a| tiers.contains(&a.tier))
            .cloned()
            .collect()
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Boot every host that has a snapshot (keyed by host name) from it.
    pub fn with_snapshot_images(mut self, snapshots: &BTreeMap<String, String>) -> Self {
        for artifact in &mut self.artifacts {
            if let ArtifactKind::Compute { host, snapshot } = &mut artifact.kind {
                if let Some(image) = snapshots.get(&host.name) {
                    *snapshot = Some(image.clone());
                }
            }
        }
        self
    }

    /// The compute and floating IP artifacts of one host.
    pub fn host_artifacts(&self, host: &str) -> Vec<Artifact> {
        let names = [host_resource(host), floating_ip_resource(host)];
        self.artifacts
            .iter()
            .filter(|a| names.contains(&a.name))
            .cloned()
            .collect()
    }
}
