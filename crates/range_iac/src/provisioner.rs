//! The infrastructure provisioner seam and its Terraform implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use range_spec::ResourceRecord;

use crate::artifact::{terraform_address, Artifact};
use crate::error::{IacError, IacResult};
use crate::terraform::{resource_addresses, TerraformRenderer, TerraformRunner, PROVIDERS_FILE};

/// What the substrate reports for a created resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResource {
    pub handle: String,
    pub address: Option<String>,
}

/// Creates and deletes single artifacts.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the artifact and return its handle.
    async fn create(&self, artifact: &Artifact) -> IacResult<ProvisionedResource>;

    /// Delete a previously created resource by logical name.
    async fn delete(&self, name: &str, resource: &ResourceRecord) -> IacResult<()>;
}

/// Provisioner driving Terraform in one working directory per environment.
pub struct TerraformProvisioner {
    terraform: TerraformRunner,
    renderer: TerraformRenderer,
    working_dir: PathBuf,
    initialized: OnceCell<()>,
}

impl TerraformProvisioner {
    pub fn new(terraform: TerraformRunner, renderer: TerraformRenderer, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform,
            renderer,
            working_dir: working_dir.into(),
            initialized: OnceCell::new(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Write the provider file and run `terraform init` once per process.
    async fn ensure_initialized(&self) -> IacResult<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.terraform.ensure_available().await?;
                std::fs::create_dir_all(&self.working_dir)?;
                let providers = serde_json::to_string_pretty(&self.renderer.render_providers())?;
                std::fs::write(self.working_dir.join(PROVIDERS_FILE), providers)?;

                let result = self.terraform.init(&self.working_dir).await?;
                if !result.success {
                    return Err(IacError::Provisioning {
                        resource: "terraform init".to_string(),
                        detail: result.summary,
                    });
                }
                info!("Initialized Terraform in {:?}", self.working_dir);
                Ok(())
            })
            .await?;
        Ok(())
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.working_dir.join(TerraformRenderer::file_name(name))
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn create(&self, artifact: &Artifact) -> IacResult<ProvisionedResource> {
        self.ensure_initialized().await?;

        let document = self.renderer.render(artifact);
        let path = self.document_path(&artifact.name);
        std::fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        debug!("Wrote {:?}", path);

        let result = self
            .terraform
            .apply(&self.working_dir, &resource_addresses(&document))
            .await?;
        if !result.success {
            return Err(IacError::Provisioning {
                resource: artifact.name.clone(),
                detail: result.summary,
            });
        }

        let address = artifact.address();
        let outputs = self.terraform.output(&self.working_dir).await?;
        let handle = outputs
            .get(&format!("{}_id", address))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| IacError::Provisioning {
                resource: artifact.name.clone(),
                detail: "apply succeeded but no identifier was reported".to_string(),
            })?;
        let ip = outputs
            .get(&format!("{}_address", address))
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);

        Ok(ProvisionedResource {
            handle: handle.to_string(),
            address: ip,
        })
    }

    async fn delete(&self, name: &str, _resource: &ResourceRecord) -> IacResult<()> {
        let path = self.document_path(name);
        if !path.exists() {
            return Err(IacError::Provisioning {
                resource: name.to_string(),
                detail: format!(
                    "no Terraform document {} in {:?}",
                    terraform_address(name),
                    self.working_dir
                ),
            });
        }
        self.ensure_initialized().await?;

        let document: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let result = self
            .terraform
            .destroy(&self.working_dir, &resource_addresses(&document))
            .await?;
        if !result.success {
            return Err(IacError::Provisioning {
                resource: name.to_string(),
                detail: result.summary,
            });
        }

        std::fs::remove_file(&path)?;
        Ok(())
    }
}
