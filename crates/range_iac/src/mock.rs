//! Recording test doubles for the provisioner and cloud API seams.
//!
//! These are exported so the lifecycle controller can be exercised end to
//! end without Terraform or an OpenStack endpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use range_spec::ResourceRecord;

use crate::artifact::{Artifact, ArtifactKind};
use crate::cloud::{CloudApi, FlavorSpec, ImageSpec, Quota};
use crate::error::{CloudError, CloudResult, IacError, IacResult};
use crate::provisioner::{ProvisionedResource, Provisioner};

/// Provisioner that hands out generated handles and records every call.
///
/// Compute instances report their fixed IP or a generated address, floating
/// IPs a generated public address.
#[derive(Clone, Default)]
pub struct MockProvisioner {
    next_handle: Arc<AtomicUsize>,
    fail_create: Arc<RwLock<BTreeSet<String>>>,
    fail_delete: Arc<RwLock<BTreeSet<String>>>,
    hang: Arc<RwLock<BTreeSet<String>>>,
    addresses: Arc<RwLock<BTreeMap<String, String>>>,
    create_calls: Arc<RwLock<Vec<String>>>,
    delete_calls: Arc<RwLock<Vec<String>>>,
    created: Arc<RwLock<Vec<String>>>,
    deleted: Arc<RwLock<Vec<String>>>,
    artifacts: Arc<RwLock<BTreeMap<String, Artifact>>>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail creation of the named artifact.
    pub fn fail_on_create(self, name: impl Into<String>) -> Self {
        self.fail_create.write().insert(name.into());
        self
    }

    /// Fail deletion of the named resource.
    pub fn fail_on_delete(self, name: impl Into<String>) -> Self {
        self.fail_delete.write().insert(name.into());
        self
    }

    /// Never complete calls for the named resource.
    pub fn hang_on(self, name: impl Into<String>) -> Self {
        self.hang.write().insert(name.into());
        self
    }

    /// Report `address` when the named artifact is created.
    pub fn with_address(self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.write().insert(name.into(), address.into());
        self
    }

    /// Clear any configured failure or hang for `name`.
    pub fn heal(&self, name: &str) {
        self.fail_create.write().remove(name);
        self.fail_delete.write().remove(name);
        self.hang.write().remove(name);
    }

    /// Every create call, in order.
    pub fn create_attempts(&self) -> Vec<String> {
        self.create_calls.read().clone()
    }

    /// Every delete call, in order.
    pub fn delete_attempts(&self) -> Vec<String> {
        self.delete_calls.read().clone()
    }

    /// Successful creations.
    pub fn created(&self) -> Vec<String> {
        self.created.read().clone()
    }

    /// The artifact last passed to `create` under `name`.
    pub fn artifact(&self, name: &str) -> Option<Artifact> {
        self.artifacts.read().get(name).cloned()
    }

    /// Successful deletions.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.read().clone()
    }

    pub fn clear_calls(&self) {
        self.create_calls.write().clear();
        self.delete_calls.write().clear();
        self.created.write().clear();
        self.deleted.write().clear();
    }

    async fn maybe_hang(&self, name: &str) {
        if self.hang.read().contains(name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn create(&self, artifact: &Artifact) -> IacResult<ProvisionedResource> {
        self.create_calls.write().push(artifact.name.clone());
        self.artifacts.write().insert(artifact.name.clone(), artifact.clone());
        self.maybe_hang(&artifact.name).await;

        if self.fail_create.read().contains(&artifact.name) {
            return Err(IacError::Provisioning {
                resource: artifact.name.clone(),
                detail: "simulated create failure".to_string(),
            });
        }

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        let address = self.addresses.read().get(&artifact.name).cloned().or_else(|| match &artifact.kind {
            ArtifactKind::Compute { host, .. } => Some(
                host.fixed_ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| format!("192.0.2.{}", id % 250 + 1)),
            ),
            ArtifactKind::FloatingIp { .. } => Some(format!("203.0.113.{}", id % 250 + 1)),
            _ => None,
        });

        self.created.write().push(artifact.name.clone());
        Ok(ProvisionedResource {
            handle: format!("mock-{}", id),
            address,
        })
    }

    async fn delete(&self, name: &str, _resource: &ResourceRecord) -> IacResult<()> {
        self.delete_calls.write().push(name.to_string());
        self.maybe_hang(name).await;

        if self.fail_delete.read().contains(name) {
            return Err(IacError::Provisioning {
                resource: name.to_string(),
                detail: "simulated delete failure".to_string(),
            });
        }
        self.deleted.write().push(name.to_string());
        Ok(())
    }
}

/// Cloud API double that records calls as `"<operation> <argument>"`.
#[derive(Clone, Default)]
pub struct MockCloud {
    calls: Arc<RwLock<Vec<String>>>,
    missing_images: Arc<RwLock<BTreeSet<String>>>,
    existing: Arc<RwLock<BTreeSet<String>>>,
    errored_servers: Arc<RwLock<BTreeSet<String>>>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// `find_image` reports the named image as not found.
    pub fn without_image(self, name: impl Into<String>) -> Self {
        self.missing_images.write().insert(name.into());
        self
    }

    /// Creating the named object reports already-exists.
    pub fn with_existing(self, name: impl Into<String>) -> Self {
        self.existing.write().insert(name.into());
        self
    }

    /// Report `server` in `ERROR` state.
    pub fn set_server_error(&self, server: impl Into<String>) {
        self.errored_servers.write().insert(server.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().clone()
    }

    /// Calls of one operation, arguments only.
    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{} ", operation);
        self.calls
            .read()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    fn record(&self, operation: &str, argument: &str) {
        self.calls.write().push(format!("{} {}", operation, argument));
    }

    fn create(&self, operation: &str, name: &str) -> CloudResult<String> {
        self.record(operation, name);
        if self.existing.read().contains(name) {
            Err(CloudError::AlreadyExists(name.to_string()))
        } else {
            Ok(format!("{}-{}", operation, name))
        }
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn create_project(&self, name: &str) -> CloudResult<String> {
        self.create("create_project", name)
    }

    async fn set_quota(&self, project: &str, _quota: &Quota) -> CloudResult<()> {
        self.record("set_quota", project);
        Ok(())
    }

    async fn add_role(&self, project: &str, user: &str, role: &str) -> CloudResult<()> {
        self.record("add_role", &format!("{}:{}:{}", project, user, role));
        Ok(())
    }

    async fn rename_network(&self, current: &str, new_name: &str) -> CloudResult<()> {
        self.record("rename_network", &format!("{}->{}", current, new_name));
        Ok(())
    }

    async fn import_keypair(&self, name: &str, _public_key: &Path) -> CloudResult<String> {
        self.create("import_keypair", name)
    }

    async fn find_image(&self, name: &str) -> CloudResult<String> {
        self.record("find_image", name);
        if self.missing_images.read().contains(name) {
            Err(CloudError::NotFound(name.to_string()))
        } else {
            Ok(format!("image-{}", name))
        }
    }

    async fn create_image(&self, image: &ImageSpec) -> CloudResult<String> {
        self.create("create_image", &image.name)
    }

    async fn create_flavor(&self, flavor: &FlavorSpec) -> CloudResult<String> {
        self.create("create_flavor", &flavor.name)
    }

    async fn snapshot_server(&self, server: &str, image_name: &str) -> CloudResult<String> {
        self.record("snapshot_server", server);
        Ok(format!("snap-{}", image_name))
    }

    async fn server_status(&self, server: &str) -> CloudResult<String> {
        self.record("server_status", server);
        if self.errored_servers.read().contains(server) {
            Ok("ERROR".to_string())
        } else {
            Ok("ACTIVE".to_string())
        }
    }

    async fn rebuild_server(&self, server: &str, image: &str) -> CloudResult<()> {
        self.record("rebuild_server", &format!("{}:{}", server, image));
        Ok(())
    }
}
