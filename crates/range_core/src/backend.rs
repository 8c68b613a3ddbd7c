//! External collaborators the controller drives, and how they are built
//! from settings.

use std::sync::Arc;

use tracing::debug;

use range_ansible::{AnsibleRunner, ConfigRunner};
use range_iac::{
    CloudApi, OpenStackCli, Provisioner, RenderSettings, TerraformProvisioner, TerraformRenderer,
    TerraformRunner,
};
use range_runner::{CommandRunner, ContainerImage};
use range_spec::EnvironmentType;

use crate::config::RangeConfig;

/// Hands out the provisioner for one environment.
pub trait ProvisionerFactory: Send + Sync {
    fn provisioner(&self, environment: EnvironmentType) -> Arc<dyn Provisioner>;
}

/// The same provisioner for every environment.
pub struct SharedProvisioner(pub Arc<dyn Provisioner>);

impl ProvisionerFactory for SharedProvisioner {
    fn provisioner(&self, _environment: EnvironmentType) -> Arc<dyn Provisioner> {
        self.0.clone()
    }
}

/// Terraform provisioner with one working directory per environment.
pub struct TerraformFactory {
    runner: Arc<dyn CommandRunner>,
    config: RangeConfig,
}

impl TerraformFactory {
    pub fn new(runner: Arc<dyn CommandRunner>, config: RangeConfig) -> Self {
        Self { runner, config }
    }
}

impl ProvisionerFactory for TerraformFactory {
    fn provisioner(&self, environment: EnvironmentType) -> Arc<dyn Provisioner> {
        let settings = &self.config.terraform;
        let mut terraform = TerraformRunner::new(self.runner.clone())
            .with_binary(&settings.binary)
            .with_timeout(self.config.timeouts.provision_seconds);
        if let Some(image) = &settings.image {
            terraform = terraform.with_image(ContainerImage::parse(image));
        }
        if let Some(var_file) = &settings.var_file {
            terraform = terraform.with_var_file(var_file);
        }

        let renderer = terraform_renderer(&self.config);
        let dir = self.config.terraform_dir(environment);
        debug!("Terraform working directory for {}: {:?}", environment, dir);
        Arc::new(TerraformProvisioner::new(terraform, renderer, dir))
    }
}

/// Renderer for the configured substrate.
pub fn terraform_renderer(config: &RangeConfig) -> TerraformRenderer {
    TerraformRenderer::new(
        config.substrate,
        RenderSettings {
            external_network: config.terraform.external_network.clone(),
            key_pair: config.terraform.key_pair.clone(),
            cloud: config.openstack.cloud.clone(),
        },
    )
}

/// Everything the lifecycle controller calls out to.
#[derive(Clone)]
pub struct Backend {
    pub provisioners: Arc<dyn ProvisionerFactory>,
    pub config_runner: Arc<dyn ConfigRunner>,
    /// Absent on substrates without a cloud API.
    pub cloud: Option<Arc<dyn CloudApi>>,
}

impl Backend {
    /// Real collaborators on top of a command runner.
    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &RangeConfig) -> Self {
        let ansible = &config.ansible;
        let mut config_runner = AnsibleRunner::new(runner.clone(), &ansible.playbook_dir)
            .with_binary(&ansible.binary)
            .with_remote_user(&ansible.remote_user)
            .with_jump_user(&ansible.jump_user);
        if let Some(key) = &ansible.private_key {
            config_runner = config_runner.with_private_key(key);
        }

        let cloud: Option<Arc<dyn CloudApi>> = if config.substrate.has_cloud_api() {
            let mut cli = OpenStackCli::new(runner.clone())
                .with_binary(&config.openstack.binary)
                .with_timeout(config.timeouts.cloud_seconds);
            if let Some(cloud) = &config.openstack.cloud {
                cli = cli.with_cloud(cloud);
            }
            Some(Arc::new(cli))
        } else {
            None
        };

        Self {
            provisioners: Arc::new(TerraformFactory::new(runner, config.clone())),
            config_runner: Arc::new(config_runner),
            cloud,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use range_iac::Substrate;
    use range_runner::MockRunner;

    #[test]
    fn test_docker_has_no_cloud_api() {
        let config = RangeConfig {
            substrate: Substrate::Docker,
            ..Default::default()
        };
        let backend = Backend::from_config(Arc::new(MockRunner::new()), &config);
        assert!(backend.cloud.is_none());

        let backend = Backend::from_config(Arc::new(MockRunner::new()), &RangeConfig::default());
        assert!(backend.cloud.is_some());
    }
}
