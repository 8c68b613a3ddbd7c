//! Settings file (`range.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use range_iac::{FlavorSpec, ImageSpec, KeypairSpec, Quota, Substrate};
use range_runner::ContainerRuntime;
use range_spec::EnvironmentType;

use crate::error::{CoreError, CoreResult};

/// Default settings file name.
pub const CONFIG_FILE: &str = "range.toml";

/// Orchestrator settings. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RangeConfig {
    /// Root for records, Terraform working directories and logs
    pub state_dir: PathBuf,
    pub substrate: Substrate,
    /// Concurrent host configuration runs
    pub workers: usize,
    pub timeouts: TimeoutSettings,
    pub terraform: TerraformSettings,
    pub openstack: OpenStackSettings,
    pub ansible: AnsibleSettings,
    pub snapshots: SnapshotSettings,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".range"),
            substrate: Substrate::OpenStack,
            workers: 4,
            timeouts: TimeoutSettings::default(),
            terraform: TerraformSettings::default(),
            openstack: OpenStackSettings::default(),
            ansible: AnsibleSettings::default(),
            snapshots: SnapshotSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Per resource create/delete
    pub provision_seconds: u64,
    /// Per host and phase
    pub configure_seconds: u64,
    /// Per cloud API call
    pub cloud_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            provision_seconds: 900,
            configure_seconds: 1800,
            cloud_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerraformSettings {
    pub binary: String,
    /// Run Terraform inside this image instead of a local binary
    pub image: Option<String>,
    /// Starts the image
    pub container_runtime: ContainerRuntime,
    /// Credentials passed with `-var-file`
    pub var_file: Option<PathBuf>,
    pub external_network: String,
    pub key_pair: String,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: "terraform".to_string(),
            image: None,
            container_runtime: ContainerRuntime::Docker,
            var_file: None,
            external_network: "external".to_string(),
            key_pair: "range_key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenStackSettings {
    pub binary: String,
    /// Named cloud from `clouds.yaml`
    pub cloud: Option<String>,
    /// Public key imported as the range keypair
    pub public_key: Option<PathBuf>,
    pub project: String,
    pub user: String,
    pub role: String,
    pub quota: Quota,
    pub flavors: Vec<FlavorSpec>,
    pub images: Vec<ImageSpec>,
    /// `[current, new]` network names
    pub network_renames: Vec<(String, String)>,
}

impl Default for OpenStackSettings {
    fn default() -> Self {
        Self {
            binary: "openstack".to_string(),
            cloud: None,
            public_key: None,
            project: "range".to_string(),
            user: "admin".to_string(),
            role: "member".to_string(),
            quota: Quota::default(),
            flavors: vec![FlavorSpec {
                name: "m1.small".to_string(),
                vcpus: 1,
                ram_mb: 2048,
                disk_gb: 20,
            }],
            images: Vec::new(),
            network_renames: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnsibleSettings {
    pub binary: String,
    pub playbook_dir: PathBuf,
    pub private_key: Option<PathBuf>,
    pub remote_user: String,
    pub jump_user: String,
    /// Attempts for the attacker tooling install; the host is restored from
    /// its snapshot between attempts when it has one
    pub attacker_install_attempts: usize,
}

impl Default for AnsibleSettings {
    fn default() -> Self {
        Self {
            binary: "ansible-playbook".to_string(),
            playbook_dir: PathBuf::from("ansible"),
            private_key: None,
            remote_user: "ubuntu".to_string(),
            jump_user: "ubuntu".to_string(),
            attacker_install_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Snapshot every host after a successful `compile`
    pub after_compile: bool,
    /// Rebuild snapshotted hosts from their snapshot on `setup`
    pub restore_on_setup: bool,
    pub prefix: String,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            after_compile: false,
            restore_on_setup: true,
            prefix: "range".to_string(),
        }
    }
}

impl RangeConfig {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::Settings(format!("{} not found", path.display())));
        }
        let content = fs::read_to_string(path)?;
        let config: RangeConfig = toml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded settings from {:?}", path);
        Ok(config)
    }

    /// Load `path` if given, else `range.toml` in the working directory if
    /// present, else defaults.
    pub fn discover(path: Option<&Path>) -> CoreResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(Path::new(CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.workers == 0 {
            return Err(CoreError::Settings("workers must be at least 1".to_string()));
        }
        let timeouts = &self.timeouts;
        if timeouts.provision_seconds == 0 || timeouts.configure_seconds == 0 || timeouts.cloud_seconds == 0 {
            return Err(CoreError::Settings("timeouts must be positive".to_string()));
        }
        if self.ansible.attacker_install_attempts == 0 {
            return Err(CoreError::Settings(
                "ansible.attacker_install_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn records_dir(&self) -> PathBuf {
        self.state_dir.join("records")
    }

    pub fn terraform_dir(&self, environment: EnvironmentType) -> PathBuf {
        self.state_dir.join("terraform").join(environment.as_str())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Keypair to import, when a public key is configured.
    pub fn keypair(&self) -> Option<KeypairSpec> {
        self.openstack.public_key.as_ref().map(|key| KeypairSpec {
            name: self.terraform.key_pair.clone(),
            public_key: key.clone(),
        })
    }
}
