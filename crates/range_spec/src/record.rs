//! The persisted environment record.
//!
//! The record is the orchestrator's only memory between invocations. A
//! resource exists as far as the orchestrator is concerned exactly when its
//! entry carries a handle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environments::EnvironmentType;
use crate::jobs::ConfigPhase;

/// Current record format version.
pub const SCHEMA_VERSION: u32 = 1;

/// Logical resource name of a host's compute instance.
pub fn host_resource(host: &str) -> String {
    format!("host:{}", host)
}

/// Logical resource name of a host's floating IP.
pub fn floating_ip_resource(host: &str) -> String {
    format!("fip:{}", host)
}

/// Lifecycle stage of an environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Absent,
    NetworkDeployed,
    HostsConfigured,
    VulnerabilitiesInjected,
    DataGenerated,
    TornDown,
}

impl Stage {
    /// Position in the provisioning order. `Absent` and `TornDown` both mean
    /// no live resources.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Absent | Stage::TornDown => 0,
            Stage::NetworkDeployed => 1,
            Stage::HostsConfigured => 2,
            Stage::VulnerabilitiesInjected => 3,
            Stage::DataGenerated => 4,
        }
    }

    /// Whether this stage is `other` or later.
    pub fn has_reached(&self, other: Stage) -> bool {
        self.rank() >= other.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Absent => "absent",
            Stage::NetworkDeployed => "network_deployed",
            Stage::HostsConfigured => "hosts_configured",
            Stage::VulnerabilitiesInjected => "vulnerabilities_injected",
            Stage::DataGenerated => "data_generated",
            Stage::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependency tier of a resource. Created in ascending order, destroyed in
/// descending order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Network,
    SecurityGroup,
    Router,
    Compute,
    FloatingIp,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Network,
        Tier::SecurityGroup,
        Tier::Router,
        Tier::Compute,
        Tier::FloatingIp,
    ];

    /// Tiers deployed by `deploy_network`.
    pub const NETWORK_TIERS: [Tier; 3] = [Tier::Network, Tier::SecurityGroup, Tier::Router];

    /// Tiers deployed by `setup`.
    pub const HOST_TIERS: [Tier; 2] = [Tier::Compute, Tier::FloatingIp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Network => "network",
            Tier::SecurityGroup => "security_group",
            Tier::Router => "router",
            Tier::Compute => "compute",
            Tier::FloatingIp => "floating_ip",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Created,
    Failed,
    DeleteFailed,
}

/// What the orchestrator knows about one logical resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceRecord {
    pub fn exists(&self) -> bool {
        self.handle.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Configuring,
    Configured,
    Failed,
}

/// Persisted state of one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub schema_version: u32,
    pub revision: u64,
    pub environment_type: EnvironmentType,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resource_handles: BTreeMap<String, ResourceRecord>,
    #[serde(default)]
    pub host_config_status: BTreeMap<String, BTreeMap<ConfigPhase, JobStatus>>,
    #[serde(default)]
    pub snapshots: BTreeMap<String, String>,
}

impl EnvironmentRecord {
    pub fn new(environment_type: EnvironmentType) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision: 0,
            environment_type,
            stage: Stage::Absent,
            updated_at: Utc::now(),
            resource_handles: BTreeMap::new(),
            host_config_status: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        }
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resource_handles.get(name)
    }

    pub fn handle(&self, name: &str) -> Option<&str> {
        self.resource(name).and_then(|r| r.handle.as_deref())
    }

    pub fn address(&self, name: &str) -> Option<&str> {
        self.resource(name).and_then(|r| r.address.as_deref())
    }

    pub fn has_handle(&self, name: &str) -> bool {
        self.handle(name).is_some()
    }

    /// Number of resources that exist.
    pub fn handle_count(&self) -> usize {
        self.resource_handles.values().filter(|r| r.exists()).count()
    }

    /// Whether any resource still exists.
    pub fn has_live_resources(&self) -> bool {
        self.handle_count() > 0
    }

    pub fn record_created(
        &mut self,
        name: impl Into<String>,
        tier: Tier,
        handle: impl Into<String>,
        address: Option<String>,
    ) {
        self.resource_handles.insert(
            name.into(),
            ResourceRecord {
                tier,
                handle: Some(handle.into()),
                address,
                status: ResourceStatus::Created,
                error: None,
            },
        );
    }

    /// A failed creation leaves no handle.
    pub fn record_failed(&mut self, name: impl Into<String>, tier: Tier, error: impl Into<String>) {
        self.resource_handles.insert(
            name.into(),
            ResourceRecord {
                tier,
                handle: None,
                address: None,
                status: ResourceStatus::Failed,
                error: Some(error.into()),
            },
        );
    }

    /// A failed deletion keeps the handle so the next teardown retries it.
    pub fn record_delete_failed(&mut self, name: &str, error: impl Into<String>) {
        if let Some(resource) = self.resource_handles.get_mut(name) {
            resource.status = ResourceStatus::DeleteFailed;
            resource.error = Some(error.into());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        self.resource_handles.remove(name)
    }

    /// Drop a deleted resource and everything that depended on it.
    ///
    /// A deleted network-tier resource leaves no stage reached; a deleted
    /// compute or floating IP lowers the stage to `NetworkDeployed`. A
    /// deleted compute instance also loses its configuration progress and
    /// snapshot.
    pub fn record_deleted(&mut self, name: &str) -> Option<ResourceRecord> {
        let removed = self.resource_handles.remove(name)?;
        match removed.tier {
            Tier::Network | Tier::SecurityGroup | Tier::Router => self.lower_to(Stage::Absent),
            Tier::Compute => {
                if let Some(host) = name.strip_prefix("host:") {
                    self.forget_host(host);
                }
                self.lower_to(Stage::NetworkDeployed);
            }
            Tier::FloatingIp => self.lower_to(Stage::NetworkDeployed),
        }
        Some(removed)
    }

    /// Forget configuration progress and the snapshot of one host.
    pub fn forget_host(&mut self, host: &str) {
        self.host_config_status.remove(host);
        self.snapshots.remove(host);
    }

    /// Existing resources, highest tier first; names break ties in reverse.
    pub fn teardown_order(&self) -> Vec<(String, ResourceRecord)> {
        let mut live: Vec<_> = self
            .resource_handles
            .iter()
            .filter(|(_, r)| r.exists())
            .map(|(n, r)| (n.clone(), r.clone()))
            .collect();
        live.sort_by(|(an, a), (bn, b)| b.tier.cmp(&a.tier).then_with(|| bn.cmp(an)));
        live
    }

    /// Drop entries of failed creations (no handle, nothing to delete).
    pub fn prune_failed(&mut self) {
        self.resource_handles.retain(|_, r| r.exists());
    }

    pub fn job_status(&self, host: &str, phase: ConfigPhase) -> JobStatus {
        self.host_config_status
            .get(host)
            .and_then(|phases| phases.get(&phase))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_job_status(&mut self, host: &str, phase: ConfigPhase, status: JobStatus) {
        self.host_config_status
            .entry(host.to_string())
            .or_default()
            .insert(phase, status);
    }

    /// Move forward to `stage`; never moves backwards.
    pub fn advance_to(&mut self, stage: Stage) {
        if stage.rank() > self.stage.rank() {
            self.stage = stage;
        }
    }

    /// Move back to `stage`; never moves forwards.
    pub fn lower_to(&mut self, stage: Stage) {
        if stage.rank() < self.stage.rank() {
            self.stage = stage;
        }
    }

    /// Forget configuration progress and snapshots once nothing is left.
    pub fn mark_torn_down(&mut self) {
        self.stage = Stage::TornDown;
        self.host_config_status.clear();
        self.snapshots.clear();
    }

    /// Called by the store before every save.
    pub fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::DataGenerated.has_reached(Stage::NetworkDeployed));
        assert!(Stage::NetworkDeployed.has_reached(Stage::NetworkDeployed));
        assert!(!Stage::Absent.has_reached(Stage::NetworkDeployed));
        assert!(!Stage::TornDown.has_reached(Stage::NetworkDeployed));
        assert!(Stage::TornDown.has_reached(Stage::Absent));
    }

    #[test]
    fn test_advance_never_regresses() {
        let mut record = EnvironmentRecord::new(EnvironmentType::Star);
        record.advance_to(Stage::HostsConfigured);
        record.advance_to(Stage::NetworkDeployed);
        assert_eq!(record.stage, Stage::HostsConfigured);

        record.stage = Stage::TornDown;
        record.advance_to(Stage::NetworkDeployed);
        assert_eq!(record.stage, Stage::NetworkDeployed);
    }

    #[test]
    fn test_failed_creation_has_no_handle() {
        let mut record = EnvironmentRecord::new(EnvironmentType::Ring);
        record.record_created("network:lan", Tier::Network, "net-1", None);
        record.record_failed("host:web", Tier::Compute, "quota exceeded");

        assert_eq!(record.handle_count(), 1);
        assert!(!record.has_handle("host:web"));
        assert_eq!(record.resource("host:web").unwrap().status, ResourceStatus::Failed);
    }

    #[test]
    fn test_teardown_order_is_reverse_tier() {
        let mut record = EnvironmentRecord::new(EnvironmentType::Star);
        record.record_created("network:a", Tier::Network, "n-a", None);
        record.record_created("host:h", Tier::Compute, "s-h", None);
        record.record_created("router:main", Tier::Router, "r", None);
        record.record_created("fip:h", Tier::FloatingIp, "f", None);
        record.record_created("secgroup:g", Tier::SecurityGroup, "g", None);

        let order: Vec<_> = record.teardown_order().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            order,
            vec!["fip:h", "host:h", "router:main", "secgroup:g", "network:a"]
        );
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = EnvironmentRecord::new(EnvironmentType::Enterprise);
        record.set_job_status("manage_host", ConfigPhase::Base, JobStatus::Configured);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["environment_type"], "enterprise");
        assert_eq!(json["stage"], "absent");
        assert_eq!(json["host_config_status"]["manage_host"]["base"], "configured");

        let back: EnvironmentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_deleting_a_host_forgets_its_progress() {
        let mut record = EnvironmentRecord::new(EnvironmentType::Star);
        record.record_created("network:lan", Tier::Network, "net-1", None);
        record.record_created("host:web_1", Tier::Compute, "srv-1", None);
        record.record_created("host:web_2", Tier::Compute, "srv-2", None);
        for host in ["web_1", "web_2"] {
            record.set_job_status(host, ConfigPhase::Base, JobStatus::Configured);
            record.snapshots.insert(host.to_string(), format!("img-{}", host));
        }
        record.advance_to(Stage::DataGenerated);

        record.record_deleted("host:web_1");
        assert_eq!(record.stage, Stage::NetworkDeployed);
        assert_eq!(record.job_status("web_1", ConfigPhase::Base), JobStatus::Pending);
        assert!(!record.snapshots.contains_key("web_1"));
        assert_eq!(record.job_status("web_2", ConfigPhase::Base), JobStatus::Configured);

        record.record_deleted("network:lan");
        assert_eq!(record.stage, Stage::Absent);
        assert!(!record.stage.has_reached(Stage::NetworkDeployed));
        assert!(record.record_deleted("network:lan").is_none());
    }
}
