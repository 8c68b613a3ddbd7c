//! # range_iac
//!
//! Artifact compilation and infrastructure provisioning for the range
//! orchestrator.
//!
//! A validated topology is compiled into tiered artifacts (networks,
//! security groups, the router, compute instances, floating IPs). The
//! provisioning driver walks those tiers through a [`Provisioner`], records
//! every confirmed handle in the environment record, and destroys them again
//! in reverse order.
//!
//! ## Features
//!
//! - Deterministic artifact compilation with per-host configuration jobs
//! - Terraform JSON rendering for OpenStack and Docker substrates
//! - Idempotent, tier-ordered `apply` and best-effort `destroy`
//! - Cloud API seam for keypairs, images, flavors, quotas and snapshots
//! - Recording test doubles for both seams
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use range_iac::{ArtifactCompiler, MockProvisioner, ProvisioningDriver};
//! use range_spec::{EnvironmentRecord, EnvironmentType, Scale};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = EnvironmentType::Star.topology(&Scale::default())?;
//! let compiled = ArtifactCompiler::compile(&topology)?;
//!
//! let driver = ProvisioningDriver::new(Arc::new(MockProvisioner::new()));
//! let mut record = EnvironmentRecord::new(EnvironmentType::Star);
//! driver.apply(&compiled.artifacts, &mut record).await?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod cloud;
pub mod compiler;
pub mod driver;
pub mod error;
pub mod mock;
pub mod provider;
pub mod provisioner;
pub mod terraform;

pub use artifact::{
    floating_ip_resource, host_resource, terraform_address, Artifact, ArtifactKind, CompiledEnvironment,
    ROUTER_NAME,
};
pub use cloud::{
    bootstrap, classify_error, preflight, BootstrapPlan, CloudApi, FlavorSpec, ImageSpec, KeypairSpec,
    OpenStackCli, Quota, StepOutcome,
};
pub use compiler::ArtifactCompiler;
pub use driver::{ApplyReport, DestroyReport, ProvisioningDriver};
pub use error::{CloudError, CloudResult, IacError, IacResult, ResourceFailure};
pub use mock::{MockCloud, MockProvisioner};
pub use provider::Substrate;
pub use provisioner::{ProvisionedResource, Provisioner, TerraformProvisioner};
pub use terraform::{
    RenderSettings, TerraformRenderer, TerraformResult, TerraformRunner, PROVIDERS_FILE, ROUTER_CLOUD_NAME,
};
