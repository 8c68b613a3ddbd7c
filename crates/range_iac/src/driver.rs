//! Provisioning driver: tiered, idempotent apply and best-effort destroy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use range_runner::Interrupt;
use range_spec::{EnvironmentRecord, ResourceRecord, Tier};

use crate::artifact::Artifact;
use crate::error::{IacError, IacResult, ResourceFailure};
use crate::provisioner::{ProvisionedResource, Provisioner};

/// Outcome of a successful `apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Logical names created by this call.
    pub created: Vec<String>,
    /// Logical names that already had a handle.
    pub skipped: Vec<String>,
}

/// Outcome of a successful `destroy`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    pub deleted: Vec<String>,
}

/// Drives a [`Provisioner`] over compiled artifacts and keeps the
/// environment record in step with what the substrate confirmed.
pub struct ProvisioningDriver {
    provisioner: Arc<dyn Provisioner>,
    timeout: Duration,
    interrupt: Interrupt,
}

impl ProvisioningDriver {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            provisioner,
            timeout: Duration::from_secs(900),
            interrupt: Interrupt::new(),
        }
    }

    /// Budget for each create or delete call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Create every artifact that has no handle yet.
    ///
    /// Tiers run in ascending order. Within a tier every artifact is
    /// attempted; if any failed, later tiers are not started and the
    /// failures are returned together. The record holds every outcome
    /// either way.
    pub async fn apply(&self, artifacts: &[Artifact], record: &mut EnvironmentRecord) -> IacResult<ApplyReport> {
        let mut report = ApplyReport::default();

        for tier in Tier::ALL {
            let in_tier: Vec<&Artifact> = artifacts.iter().filter(|a| a.tier == tier).collect();
            if in_tier.is_empty() {
                continue;
            }
            debug!("Applying {} tier ({} artifacts)", tier, in_tier.len());

            let mut failures = Vec::new();
            for artifact in in_tier {
                if record.has_handle(&artifact.name) {
                    debug!("{} already exists, skipping", artifact.name);
                    report.skipped.push(artifact.name.clone());
                    continue;
                }
                if self.interrupt.is_triggered() {
                    warn!("Interrupted before creating {}", artifact.name);
                    return Err(IacError::Interrupted);
                }

                info!("Creating {}", artifact.name);
                match self.create(artifact).await {
                    Ok(created) => {
                        record.record_created(&artifact.name, tier, created.handle, created.address);
                        report.created.push(artifact.name.clone());
                    }
                    Err(e) => {
                        error!("Failed to create {}: {}", artifact.name, e);
                        record.record_failed(&artifact.name, tier, e.to_string());
                        failures.push(ResourceFailure {
                            name: artifact.name.clone(),
                            detail: e.to_string(),
                            timed_out: e.is_timeout(),
                        });
                    }
                }
            }

            if !failures.is_empty() {
                warn!("{} tier failed, later tiers not attempted", tier);
                return Err(IacError::ApplyFailed { failures });
            }
        }

        info!(
            "Apply complete: {} created, {} already present",
            report.created.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Delete every recorded resource, highest tier first.
    ///
    /// Deleted entries leave the record and lower its stage; failed
    /// deletions stay with status `delete_failed` and are reported together
    /// after every delete has been attempted.
    pub async fn destroy(&self, record: &mut EnvironmentRecord) -> IacResult<DestroyReport> {
        record.prune_failed();

        let mut report = DestroyReport::default();
        let mut failures = Vec::new();

        for (name, resource) in record.teardown_order() {
            if self.interrupt.is_triggered() {
                warn!("Interrupted before deleting {}", name);
                return Err(IacError::Interrupted);
            }

            info!("Deleting {}", name);
            match self.delete(&name, &resource).await {
                Ok(()) => {
                    record.record_deleted(&name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    error!("Failed to delete {}: {}", name, e);
                    record.record_delete_failed(&name, e.to_string());
                    failures.push(ResourceFailure {
                        name,
                        detail: e.to_string(),
                        timed_out: e.is_timeout(),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!("Destroyed {} resources", report.deleted.len());
            Ok(report)
        } else {
            Err(IacError::TeardownFailed { failures })
        }
    }

    /// Delete and recreate `artifacts`, keeping whatever the record knows
    /// about the hosts they belong to.
    ///
    /// Existing handles are deleted highest tier first; a failed delete
    /// stops the replacement before anything is created.
    pub async fn replace(&self, artifacts: &[Artifact], record: &mut EnvironmentRecord) -> IacResult<ApplyReport> {
        let mut existing: Vec<(String, ResourceRecord)> = artifacts
            .iter()
            .filter_map(|a| record.resource(&a.name).filter(|r| r.exists()).map(|r| (a.name.clone(), r.clone())))
            .collect();
        existing.sort_by(|(_, a), (_, b)| b.tier.cmp(&a.tier));

        for (name, resource) in existing {
            if self.interrupt.is_triggered() {
                warn!("Interrupted before deleting {}", name);
                return Err(IacError::Interrupted);
            }
            info!("Replacing {}", name);
            if let Err(e) = self.delete(&name, &resource).await {
                error!("Failed to delete {}: {}", name, e);
                record.record_delete_failed(&name, e.to_string());
                return Err(IacError::TeardownFailed {
                    failures: vec![ResourceFailure {
                        name,
                        detail: e.to_string(),
                        timed_out: e.is_timeout(),
                    }],
                });
            }
            record.remove(&name);
        }

        self.apply(artifacts, record).await
    }

    async fn create(&self, artifact: &Artifact) -> IacResult<ProvisionedResource> {
        tokio::time::timeout(self.timeout, self.provisioner.create(artifact))
            .await
            .map_err(|_| IacError::Timeout {
                resource: artifact.name.clone(),
                seconds: self.timeout.as_secs(),
            })?
    }

    async fn delete(&self, name: &str, resource: &ResourceRecord) -> IacResult<()> {
        tokio::time::timeout(self.timeout, self.provisioner.delete(name, resource))
            .await
            .map_err(|_| IacError::Timeout {
                resource: name.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }
}
