//! Cloud API seam: project, image, flavor, keypair and snapshot operations
//! that Terraform does not cover.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use range_runner::{CommandRunner, CommandSpec, RunConfig};

use crate::error::{CloudError, CloudResult, IacError, IacResult};

/// Project quota limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub instances: u32,
    pub cores: u32,
    pub ram_mb: u32,
    pub networks: u32,
    pub subnets: u32,
    pub ports: u32,
    pub routers: u32,
    pub floating_ips: u32,
    pub security_groups: u32,
    pub security_group_rules: u32,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            instances: 100,
            cores: 200,
            ram_mb: 409_600,
            networks: 100,
            subnets: 100,
            ports: 500,
            routers: 10,
            floating_ips: 20,
            security_groups: 100,
            security_group_rules: 1000,
        }
    }
}

/// Flavor to create during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorSpec {
    pub name: String,
    pub vcpus: u32,
    pub ram_mb: u32,
    pub disk_gb: u32,
}

/// Image to upload during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub file: PathBuf,
    #[serde(default = "default_disk_format")]
    pub disk_format: String,
}

fn default_disk_format() -> String {
    "qcow2".to_string()
}

/// Operations on the cloud API. Each returns an identifier or a
/// classified [`CloudError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn create_project(&self, name: &str) -> CloudResult<String>;

    async fn set_quota(&self, project: &str, quota: &Quota) -> CloudResult<()>;

    async fn add_role(&self, project: &str, user: &str, role: &str) -> CloudResult<()>;

    async fn rename_network(&self, current: &str, new_name: &str) -> CloudResult<()>;

    async fn import_keypair(&self, name: &str, public_key: &Path) -> CloudResult<String>;

    async fn find_image(&self, name: &str) -> CloudResult<String>;

    async fn create_image(&self, image: &ImageSpec) -> CloudResult<String>;

    async fn create_flavor(&self, flavor: &FlavorSpec) -> CloudResult<String>;

    async fn snapshot_server(&self, server: &str, image_name: &str) -> CloudResult<String>;

    /// Server status as reported by the cloud, e.g. `ACTIVE` or `ERROR`.
    async fn server_status(&self, server: &str) -> CloudResult<String>;

    /// Rebuild a server in place from `image` and wait for it.
    async fn rebuild_server(&self, server: &str, image: &str) -> CloudResult<()>;
}

static ALREADY_EXISTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)already exists|conflict|\b409\b").expect("already-exists pattern"));
static QUOTA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)quota exceeded|over ?limit|\b413\b").expect("quota pattern"));
static NOT_FOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)not found|could not find|no \w+ with a name or id|\b404\b").expect("not-found pattern")
});

/// Classify a failed CLI call from its stderr.
pub fn classify_error(stderr: &str) -> CloudError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("unknown error")
        .trim()
        .to_string();

    if ALREADY_EXISTS_RE.is_match(stderr) {
        CloudError::AlreadyExists(message)
    } else if QUOTA_RE.is_match(stderr) {
        CloudError::QuotaExceeded(message)
    } else if NOT_FOUND_RE.is_match(stderr) {
        CloudError::NotFound(message)
    } else {
        CloudError::Other(message)
    }
}

/// [`CloudApi`] backed by the `openstack` command line client.
pub struct OpenStackCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    cloud: Option<String>,
    timeout_seconds: u64,
}

impl OpenStackCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "openstack".to_string(),
            cloud: None,
            timeout_seconds: 120,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Named cloud from `clouds.yaml`.
    pub fn with_cloud(mut self, cloud: impl Into<String>) -> Self {
        self.cloud = Some(cloud.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Run a command that prints JSON.
    async fn json(&self, args: &[&str]) -> CloudResult<Value> {
        let mut full: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        full.extend(["-f".to_string(), "json".to_string()]);
        let stdout = self.run(full).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| CloudError::Other(format!("unexpected output from {}: {}", args.join(" "), e)))
    }

    /// Run a command without output.
    async fn plain(&self, args: &[&str]) -> CloudResult<()> {
        self.run(args.iter().map(|s| s.to_string()).collect()).await?;
        Ok(())
    }

    async fn run(&self, args: Vec<String>) -> CloudResult<String> {
        let mut spec = CommandSpec::new(&self.binary);
        if let Some(cloud) = &self.cloud {
            spec = spec.arg("--os-cloud").arg(cloud);
        }
        spec = spec.args(args);

        let result = self
            .runner
            .run(&spec, &RunConfig::default().timeout(self.timeout_seconds))
            .await
            .map_err(|e| CloudError::Other(e.to_string()))?;

        if result.success() {
            Ok(result.stdout)
        } else {
            Err(classify_error(&result.stderr))
        }
    }
}

fn id_of(value: &Value) -> CloudResult<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CloudError::Other("response has no id".to_string()))
}

#[async_trait]
impl CloudApi for OpenStackCli {
    async fn create_project(&self, name: &str) -> CloudResult<String> {
        id_of(&self.json(&["project", "create", name]).await?)
    }

    async fn set_quota(&self, project: &str, quota: &Quota) -> CloudResult<()> {
        let values = [
            ("--instances", quota.instances),
            ("--cores", quota.cores),
            ("--ram", quota.ram_mb),
            ("--networks", quota.networks),
            ("--subnets", quota.subnets),
            ("--ports", quota.ports),
            ("--routers", quota.routers),
            ("--floating-ips", quota.floating_ips),
            ("--secgroups", quota.security_groups),
            ("--secgroup-rules", quota.security_group_rules),
        ];
        let rendered: Vec<String> = values.iter().map(|(_, v)| v.to_string()).collect();
        let mut args = vec!["quota", "set"];
        for ((flag, _), value) in values.iter().zip(&rendered) {
            args.push(flag);
            args.push(value);
        }
        args.push(project);
        self.plain(&args).await
    }

    async fn add_role(&self, project: &str, user: &str, role: &str) -> CloudResult<()> {
        self.plain(&["role", "add", "--project", project, "--user", user, role])
            .await
    }

    async fn rename_network(&self, current: &str, new_name: &str) -> CloudResult<()> {
        self.plain(&["network", "set", "--name", new_name, current]).await
    }

    async fn import_keypair(&self, name: &str, public_key: &Path) -> CloudResult<String> {
        let key = public_key.to_string_lossy();
        let created = self
            .json(&["keypair", "create", "--public-key", &key, name])
            .await?;
        Ok(created
            .get("fingerprint")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string())
    }

    async fn find_image(&self, name: &str) -> CloudResult<String> {
        id_of(&self.json(&["image", "show", name]).await?)
    }

    async fn create_image(&self, image: &ImageSpec) -> CloudResult<String> {
        let file = image.file.to_string_lossy();
        id_of(
            &self
                .json(&[
                    "image",
                    "create",
                    "--disk-format",
                    &image.disk_format,
                    "--container-format",
                    "bare",
                    "--file",
                    &file,
                    &image.name,
                ])
                .await?,
        )
    }

    async fn create_flavor(&self, flavor: &FlavorSpec) -> CloudResult<String> {
        let vcpus = flavor.vcpus.to_string();
        let ram = flavor.ram_mb.to_string();
        let disk = flavor.disk_gb.to_string();
        id_of(
            &self
                .json(&[
                    "flavor", "create", "--vcpus", &vcpus, "--ram", &ram, "--disk", &disk,
                    &flavor.name,
                ])
                .await?,
        )
    }

    async fn snapshot_server(&self, server: &str, image_name: &str) -> CloudResult<String> {
        id_of(
            &self
                .json(&["server", "image", "create", "--wait", "--name", image_name, server])
                .await?,
        )
    }

    async fn server_status(&self, server: &str) -> CloudResult<String> {
        self.json(&["server", "show", server])
            .await?
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CloudError::Other(format!("server {} has no status", server)))
    }

    async fn rebuild_server(&self, server: &str, image: &str) -> CloudResult<()> {
        self.json(&["server", "rebuild", "--wait", "--image", image, server])
            .await
            .map(|_| ())
    }
}

/// Keypair the range hosts are created with.
#[derive(Debug, Clone)]
pub struct KeypairSpec {
    pub name: String,
    pub public_key: PathBuf,
}

/// Check the cloud before creating networks: import the keypair (an existing
/// one is fine) and make sure every referenced image exists.
pub async fn preflight(api: &dyn CloudApi, keypair: Option<&KeypairSpec>, images: &[String]) -> IacResult<()> {
    if let Some(keypair) = keypair {
        match api.import_keypair(&keypair.name, &keypair.public_key).await {
            Ok(_) => info!("Imported keypair {}", keypair.name),
            Err(e) if e.is_already_exists() => info!("Keypair {} already present", keypair.name),
            Err(e) => return Err(e.into()),
        }
    }

    let mut missing = Vec::new();
    for image in images {
        match api.find_image(image).await {
            Ok(_) => {}
            Err(CloudError::NotFound(_)) => missing.push(image.clone()),
            Err(e) => return Err(e.into()),
        }
    }
    if !missing.is_empty() {
        return Err(IacError::Cloud(CloudError::NotFound(format!(
            "image(s) {}",
            missing.join(", ")
        ))));
    }
    Ok(())
}

/// Everything `bootstrap` creates for a fresh project.
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    pub project: String,
    pub user: String,
    pub role: String,
    pub quota: Quota,
    pub flavors: Vec<FlavorSpec>,
    pub images: Vec<ImageSpec>,
    pub keypair: Option<KeypairSpec>,
    /// `(current, new)` network renames, e.g. the provider's public network
    pub network_renames: Vec<(String, String)>,
}

/// Outcome of one bootstrap step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Created(String),
    AlreadyPresent,
}

/// Run every bootstrap step in order. Already-existing objects count as
/// success; the first other error stops the run.
pub async fn bootstrap(api: &dyn CloudApi, plan: &BootstrapPlan) -> IacResult<Vec<(String, StepOutcome)>> {
    let mut steps = Vec::new();

    let project = tolerate_existing(api.create_project(&plan.project).await)?;
    steps.push((format!("project {}", plan.project), project));

    api.set_quota(&plan.project, &plan.quota).await?;
    steps.push(("quota".to_string(), StepOutcome::Created(plan.project.clone())));

    let role = tolerate_existing(
        api.add_role(&plan.project, &plan.user, &plan.role)
            .await
            .map(|_| plan.role.clone()),
    )?;
    steps.push((format!("role {} for {}", plan.role, plan.user), role));

    for (current, new_name) in &plan.network_renames {
        match api.rename_network(current, new_name).await {
            Ok(()) => steps.push((
                format!("network {} -> {}", current, new_name),
                StepOutcome::Created(new_name.clone()),
            )),
            Err(CloudError::NotFound(_)) => {
                warn!("Network {} not found, assuming already renamed", current);
                steps.push((format!("network {}", new_name), StepOutcome::AlreadyPresent));
            }
            Err(e) => return Err(e.into()),
        }
    }

    for flavor in &plan.flavors {
        let outcome = tolerate_existing(api.create_flavor(flavor).await)?;
        steps.push((format!("flavor {}", flavor.name), outcome));
    }

    for image in &plan.images {
        let outcome = match api.find_image(&image.name).await {
            Ok(_) => StepOutcome::AlreadyPresent,
            Err(CloudError::NotFound(_)) => tolerate_existing(api.create_image(image).await)?,
            Err(e) => return Err(e.into()),
        };
        steps.push((format!("image {}", image.name), outcome));
    }

    if let Some(keypair) = &plan.keypair {
        let outcome = tolerate_existing(api.import_keypair(&keypair.name, &keypair.public_key).await)?;
        steps.push((format!("keypair {}", keypair.name), outcome));
    }

    Ok(steps)
}

fn tolerate_existing(result: CloudResult<String>) -> IacResult<StepOutcome> {
    match result {
        Ok(id) => Ok(StepOutcome::Created(id)),
        Err(e) if e.is_already_exists() => Ok(StepOutcome::AlreadyPresent),
        Err(e) => Err(e.into()),
    }
}
