//! Terraform rendering and execution.
//!
//! Each artifact renders to its own `<address>.tf.json` document in the
//! environment's working directory. Documents refer to resources of other
//! artifacts by cloud name, so one artifact can be created or destroyed with
//! `-target` without touching the others. Floating IPs are the exception:
//! they refer to their instance's resource, which is always destroyed later.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use range_runner::{CommandRunner, CommandSpec, ContainerImage, RunConfig};
use range_spec::{Host, Network, SecurityRule};

use crate::artifact::{host_resource, terraform_address, Artifact, ArtifactKind};
use crate::error::{IacError, IacResult};
use crate::provider::Substrate;

/// File holding the provider and variable declarations.
pub const PROVIDERS_FILE: &str = "providers.tf.json";

/// Cloud name of the shared router.
pub const ROUTER_CLOUD_NAME: &str = "range_main_router";

/// Credential variables a `-var-file` may set. Unset values fall back to the
/// provider's environment variables.
const OPENSTACK_VARIABLES: [(&str, &str); 5] = [
    ("openstack_user_name", "user_name"),
    ("openstack_tenant_name", "tenant_name"),
    ("openstack_password", "password"),
    ("openstack_auth_url", "auth_url"),
    ("openstack_region", "region"),
];

/// Settings shared by every rendered document.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// External network providing router gateway and floating IPs
    pub external_network: String,
    /// Keypair injected into compute instances
    pub key_pair: String,
    /// Named cloud from `clouds.yaml`
    pub cloud: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            external_network: "external".to_string(),
            key_pair: "range_key".to_string(),
            cloud: None,
        }
    }
}

/// Renders artifacts into Terraform JSON for one substrate.
#[derive(Debug, Clone)]
pub struct TerraformRenderer {
    substrate: Substrate,
    settings: RenderSettings,
}

impl TerraformRenderer {
    pub fn new(substrate: Substrate, settings: RenderSettings) -> Self {
        Self {
            substrate,
            settings,
        }
    }

    pub fn substrate(&self) -> Substrate {
        self.substrate
    }

    /// File name of an artifact's document.
    pub fn file_name(artifact_name: &str) -> String {
        format!("{}.tf.json", terraform_address(artifact_name))
    }

    /// Provider requirements and configuration.
    pub fn render_providers(&self) -> Value {
        let name = self.substrate.provider_name();
        let mut doc = json!({
            "terraform": {
                "required_providers": {
                    name: {
                        "source": self.substrate.provider_source(),
                        "version": self.substrate.provider_version(),
                    }
                }
            }
        });

        let provider = match self.substrate {
            Substrate::OpenStack => {
                let mut config = Map::new();
                let mut variables = Map::new();
                for (variable, attribute) in OPENSTACK_VARIABLES {
                    variables.insert(
                        variable.to_string(),
                        json!({ "type": "string", "default": null }),
                    );
                    config.insert(attribute.to_string(), json!(format!("${{var.{}}}", variable)));
                }
                if let Some(cloud) = &self.settings.cloud {
                    config.insert("cloud".to_string(), json!(cloud));
                }
                doc["variable"] = Value::Object(variables);
                Value::Object(config)
            }
            Substrate::Docker => json!({}),
        };
        doc["provider"] = json!({ name: provider });
        doc
    }

    /// Render one artifact.
    pub fn render(&self, artifact: &Artifact) -> Value {
        let address = artifact.address();
        match (&self.substrate, &artifact.kind) {
            (Substrate::OpenStack, ArtifactKind::Network { network }) => {
                openstack_network(&address, network)
            }
            (Substrate::OpenStack, ArtifactKind::SecurityGroup { group, rules }) => {
                openstack_security_group(&address, group, rules)
            }
            (Substrate::OpenStack, ArtifactKind::Router { links }) => {
                self.openstack_router(&address, links)
            }
            (Substrate::OpenStack, ArtifactKind::Compute { host, snapshot }) => {
                self.openstack_instance(&address, host, snapshot.as_deref())
            }
            (Substrate::OpenStack, ArtifactKind::FloatingIp { host }) => {
                self.openstack_floating_ip(&address, host)
            }
            (Substrate::Docker, ArtifactKind::Network { network }) => {
                docker_network(&address, network)
            }
            (Substrate::Docker, ArtifactKind::Compute { host, .. }) => docker_container(&address, host),
            (Substrate::Docker, kind) => docker_record(&address, kind),
        }
    }

    /// Render to the exact bytes written to disk.
    pub fn render_string(&self, artifact: &Artifact) -> IacResult<String> {
        Ok(serde_json::to_string_pretty(&self.render(artifact))?)
    }

    fn openstack_router(&self, address: &str, links: &[String]) -> Value {
        let router_ref = format!("${{openstack_networking_router_v2.{}.id}}", address);
        let mut subnets = Map::new();
        let mut interfaces = Map::new();
        for link in links {
            let subnet = format!("{}_{}", address, terraform_address(link));
            subnets.insert(subnet.clone(), json!({ "name": format!("{}_subnet", link) }));
            interfaces.insert(
                subnet.clone(),
                json!({
                    "router_id": router_ref,
                    "subnet_id": format!("${{data.openstack_networking_subnet_v2.{}.id}}", subnet),
                }),
            );
        }

        json!({
            "data": {
                "openstack_networking_network_v2": {
                    format!("{}_external", address): { "name": self.settings.external_network }
                },
                "openstack_networking_subnet_v2": subnets,
            },
            "resource": {
                "openstack_networking_router_v2": {
                    address: {
                        "name": ROUTER_CLOUD_NAME,
                        "admin_state_up": true,
                        "external_network_id": format!(
                            "${{data.openstack_networking_network_v2.{}_external.id}}",
                            address
                        ),
                    }
                },
                "openstack_networking_router_interface_v2": interfaces,
            },
            "output": outputs(
                address,
                &router_ref,
                None,
            ),
        })
    }

    fn openstack_instance(&self, address: &str, host: &Host, snapshot: Option<&str>) -> Value {
        let mut network = Map::new();
        network.insert("name".to_string(), json!(host.network_ref));
        if let Some(ip) = host.fixed_ip {
            network.insert("fixed_ip_v4".to_string(), json!(ip.to_string()));
        }

        let mut instance = json!({
            "name": host.name,
            "flavor_name": host.flavor,
            "key_pair": self.settings.key_pair,
            "security_groups": host.security_groups,
            "network": [Value::Object(network)],
        });
        match snapshot {
            Some(image_id) => instance["image_id"] = json!(image_id),
            None => instance["image_name"] = json!(host.image),
        }

        json!({
            "resource": {
                "openstack_compute_instance_v2": { address: instance }
            },
            "output": outputs(
                address,
                &format!("${{openstack_compute_instance_v2.{}.id}}", address),
                Some(&format!("${{openstack_compute_instance_v2.{}.access_ip_v4}}", address)),
            ),
        })
    }

    fn openstack_floating_ip(&self, address: &str, host: &str) -> Value {
        let instance = terraform_address(&host_resource(host));
        json!({
            "resource": {
                "openstack_networking_floatingip_v2": {
                    address: { "pool": self.settings.external_network }
                },
                "openstack_compute_floatingip_associate_v2": {
                    format!("{}_association", address): {
                        "floating_ip": format!("${{openstack_networking_floatingip_v2.{}.address}}", address),
                        "instance_id": format!("${{openstack_compute_instance_v2.{}.id}}", instance),
                    }
                }
            },
            "output": outputs(
                address,
                &format!("${{openstack_networking_floatingip_v2.{}.id}}", address),
                Some(&format!("${{openstack_networking_floatingip_v2.{}.address}}", address)),
            ),
        })
    }
}

fn outputs(address: &str, id: &str, ip: Option<&str>) -> Value {
    let mut out = Map::new();
    out.insert(format!("{}_id", address), json!({ "value": id }));
    if let Some(ip) = ip {
        out.insert(format!("{}_address", address), json!({ "value": ip }));
    }
    Value::Object(out)
}

fn openstack_network(address: &str, network: &Network) -> Value {
    let network_ref = format!("${{openstack_networking_network_v2.{}.id}}", address);
    json!({
        "resource": {
            "openstack_networking_network_v2": {
                address: { "name": network.name, "admin_state_up": true }
            },
            "openstack_networking_subnet_v2": {
                format!("{}_subnet", address): {
                    "name": network.subnet_name(),
                    "network_id": network_ref,
                    "cidr": network.cidr.to_string(),
                    "ip_version": network.ip_version,
                    "enable_dhcp": true,
                    "dns_nameservers": network.dns_servers.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                }
            }
        },
        "output": outputs(address, &network_ref, None),
    })
}

fn openstack_security_group(address: &str, group: &str, rules: &[SecurityRule]) -> Value {
    let group_ref = format!("${{openstack_networking_secgroup_v2.{}.id}}", address);
    let mut rule_resources = Map::new();
    for (i, rule) in rules.iter().enumerate() {
        let mut body = Map::new();
        body.insert("direction".into(), json!(rule.direction.as_str()));
        body.insert("ethertype".into(), json!(rule.ethertype.as_str()));
        body.insert("remote_ip_prefix".into(), json!(rule.remote_cidr.to_string()));
        body.insert("security_group_id".into(), json!(group_ref));
        if let Some(protocol) = rule.protocol {
            body.insert("protocol".into(), json!(protocol.as_str()));
        }
        if let Some(range) = rule.port_range {
            body.insert("port_range_min".into(), json!(range.min));
            body.insert("port_range_max".into(), json!(range.max));
        }
        rule_resources.insert(format!("{}_rule_{}", address, i), Value::Object(body));
    }

    let mut resources = Map::new();
    resources.insert(
        "openstack_networking_secgroup_v2".into(),
        json!({ address: { "name": group, "description": format!("range security group {}", group) } }),
    );
    if !rule_resources.is_empty() {
        resources.insert(
            "openstack_networking_secgroup_rule_v2".into(),
            Value::Object(rule_resources),
        );
    }

    json!({
        "resource": resources,
        "output": outputs(address, &group_ref, None),
    })
}

fn docker_network(address: &str, network: &Network) -> Value {
    json!({
        "resource": {
            "docker_network": {
                address: {
                    "name": network.name,
                    "ipam_config": [{ "subnet": network.cidr.to_string() }],
                }
            }
        },
        "output": outputs(
            address,
            &format!("${{docker_network.{}.id}}", address),
            None,
        ),
    })
}

fn docker_container(address: &str, host: &Host) -> Value {
    let mut attachment = Map::new();
    attachment.insert("name".into(), json!(host.network_ref));
    if let Some(ip) = host.fixed_ip {
        attachment.insert("ipv4_address".into(), json!(ip.to_string()));
    }

    json!({
        "resource": {
            "docker_container": {
                address: {
                    "name": host.name,
                    "image": host.image.to_lowercase(),
                    "hostname": host.name,
                    "command": ["sleep", "infinity"],
                    "networks_advanced": [Value::Object(attachment)],
                    "labels": [{ "label": "range.role", "value": host.role.as_str() }],
                }
            }
        },
        "output": outputs(
            address,
            &format!("${{docker_container.{}.id}}", address),
            Some(&format!("${{docker_container.{}.network_data[0].ip_address}}", address)),
        ),
    })
}

/// Container engines have no security groups, router or floating IPs;
/// these are kept as plain records so the lifecycle stays uniform.
fn docker_record(address: &str, kind: &ArtifactKind) -> Value {
    json!({
        "resource": {
            "terraform_data": {
                address: { "input": kind }
            }
        },
        "output": outputs(
            address,
            &format!("${{terraform_data.{}.id}}", address),
            None,
        ),
    })
}

/// Result of a Terraform operation.
#[derive(Debug)]
pub struct TerraformResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i64,
    /// Most relevant error line when the command failed
    pub summary: String,
}

/// Terraform runner on top of a [`CommandRunner`].
pub struct TerraformRunner {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    image: Option<ContainerImage>,
    var_file: Option<PathBuf>,
    timeout_seconds: u64,
}

impl TerraformRunner {
    /// Create a new Terraform runner.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "terraform".to_string(),
            image: None,
            var_file: None,
            timeout_seconds: 600,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run Terraform inside this image.
    pub fn with_image(mut self, image: ContainerImage) -> Self {
        self.image = Some(image);
        self
    }

    /// Credentials file passed to apply and destroy.
    pub fn with_var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_file = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Check that the binary (or the container runtime) can be used.
    pub async fn ensure_available(&self) -> IacResult<()> {
        if self.image.is_some() {
            return Ok(());
        }
        if self.runner.is_available(&self.binary).await? {
            Ok(())
        } else {
            Err(IacError::TerraformNotAvailable(self.binary.clone()))
        }
    }

    /// Run terraform init.
    pub async fn init(&self, working_dir: &Path) -> IacResult<TerraformResult> {
        info!("Running terraform init in {:?}", working_dir);
        self.run_command(working_dir, vec!["init".into(), "-input=false".into(), "-no-color".into()])
            .await
    }

    /// Apply only the given resource addresses.
    pub async fn apply(&self, working_dir: &Path, targets: &[String]) -> IacResult<TerraformResult> {
        debug!("Running terraform apply for {:?}", targets);
        let mut args = vec![
            "apply".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(self.var_file_arg());
        args.extend(targets.iter().map(|t| format!("-target={}", t)));
        self.run_command(working_dir, args).await
    }

    /// Destroy only the given resource addresses.
    pub async fn destroy(&self, working_dir: &Path, targets: &[String]) -> IacResult<TerraformResult> {
        debug!("Running terraform destroy for {:?}", targets);
        let mut args = vec![
            "destroy".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(self.var_file_arg());
        args.extend(targets.iter().map(|t| format!("-target={}", t)));
        self.run_command(working_dir, args).await
    }

    /// Read `terraform output -json` as name to value.
    pub async fn output(&self, working_dir: &Path) -> IacResult<BTreeMap<String, Value>> {
        let result = self
            .run_command(working_dir, vec!["output".into(), "-json".into(), "-no-color".into()])
            .await?;
        if !result.success {
            return Err(IacError::Provisioning {
                resource: "terraform output".to_string(),
                detail: result.summary,
            });
        }
        let raw: BTreeMap<String, Value> = serde_json::from_str(result.output.trim())?;
        Ok(raw
            .into_iter()
            .map(|(name, entry)| (name, entry.get("value").cloned().unwrap_or(Value::Null)))
            .collect())
    }

    fn var_file_arg(&self) -> Option<String> {
        self.var_file
            .as_ref()
            .map(|path| format!("-var-file={}", path.display()))
    }

    /// Run arbitrary terraform command.
    async fn run_command(&self, working_dir: &Path, args: Vec<String>) -> IacResult<TerraformResult> {
        let mut spec = CommandSpec::new(&self.binary)
            .args(args)
            .workdir(working_dir)
            .env("TF_IN_AUTOMATION", "1");
        if let Some(image) = &self.image {
            spec = spec.in_container(image.clone());
        }

        let run_config = RunConfig::default().timeout(self.timeout_seconds);
        let result = self.runner.run(&spec, &run_config).await?;

        Ok(TerraformResult {
            success: result.success(),
            summary: result.error_summary(),
            output: if result.success() {
                result.stdout
            } else {
                result.combined_output()
            },
            exit_code: result.exit_code,
        })
    }
}

/// Resource addresses (`type.name`) declared in a rendered document.
pub fn resource_addresses(document: &Value) -> Vec<String> {
    let mut addresses = Vec::new();
    if let Some(resources) = document.get("resource").and_then(Value::as_object) {
        for (kind, instances) in resources {
            if let Some(instances) = instances.as_object() {
                addresses.extend(instances.keys().map(|name| format!("{}.{}", kind, name)));
            }
        }
    }
    addresses
}
