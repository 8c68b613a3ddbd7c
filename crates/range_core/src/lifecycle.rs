//! Lifecycle controller: sequences the drivers per command and keeps the
//! environment record persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use range_ansible::{ConfigResult, ConfigurationDriver, ConfigurationError, HostReset};
use range_iac::{
    bootstrap, preflight, ArtifactCompiler, ArtifactKind, BootstrapPlan, CloudApi, CompiledEnvironment, IacError,
    ProvisioningDriver, ResourceFailure, StepOutcome,
};
use range_runner::Interrupt;
use range_spec::{
    floating_ip_resource, host_resource, ConfigPhase, EnvironmentRecord, EnvironmentType, HostRole, JobStatus,
    Scale, Stage, Tier, Topology, TopologyReader,
};

use crate::backend::Backend;
use crate::config::RangeConfig;
use crate::error::{CoreError, CoreResult};
use crate::store::RecordStore;

/// Lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    DeployNetwork,
    Setup,
    Compile,
    Teardown,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::DeployNetwork => "deploy_network",
            Command::Setup => "setup",
            Command::Compile => "compile",
            Command::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to run a command against.
#[derive(Debug, Clone)]
pub struct EnvRequest {
    pub environment: EnvironmentType,
    pub scale: Scale,
    /// Topology file used instead of the generated layout
    pub topology_file: Option<PathBuf>,
    pub skip_network: bool,
    pub skip_host: bool,
    /// Overrides the configured worker count
    pub workers: Option<usize>,
}

impl EnvRequest {
    pub fn new(environment: EnvironmentType) -> Self {
        Self {
            environment,
            scale: Scale::default(),
            topology_file: None,
            skip_network: false,
            skip_host: false,
            workers: None,
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_topology_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.topology_file = Some(path.into());
        self
    }

    pub fn skip_network(mut self, skip: bool) -> Self {
        self.skip_network = skip;
        self
    }

    pub fn skip_host(mut self, skip: bool) -> Self {
        self.skip_host = skip;
        self
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// The topology this request describes, validated.
    pub fn topology(&self) -> CoreResult<Topology> {
        match &self.topology_file {
            Some(path) => Ok(TopologyReader::read_file(path)?),
            None => Ok(self.environment.topology(&self.scale)?),
        }
    }
}

/// Summary of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub run_id: Uuid,
    pub environment: EnvironmentType,
    pub command: Command,
    pub stage: Stage,
    /// Live resources after the command
    pub handles: usize,
    pub created: usize,
    pub deleted: usize,
    pub configured: usize,
    pub snapshots: usize,
    /// Hosts brought back from their snapshot
    pub restored: usize,
}

#[derive(Default)]
struct Tally {
    created: usize,
    deleted: usize,
    configured: usize,
    snapshots: usize,
    restored: usize,
}

/// Drives one environment at a time through its stages.
pub struct LifecycleController {
    config: RangeConfig,
    store: RecordStore,
    backend: Backend,
    interrupt: Interrupt,
}

impl LifecycleController {
    pub fn new(config: RangeConfig, store: RecordStore, backend: Backend) -> Self {
        Self {
            config,
            store,
            backend,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Run a lifecycle command.
    ///
    /// Preconditions and topology validation happen before any external
    /// call. The record is saved after every completed step and once more
    /// at the end, whether the command succeeded or not.
    pub async fn execute(&self, command: Command, request: &EnvRequest) -> CoreResult<CommandReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("command", run = %run_id, env = %request.environment, command = %command);
        self.execute_inner(run_id, command, request).instrument(span).await
    }

    async fn execute_inner(&self, run_id: Uuid, command: Command, request: &EnvRequest) -> CoreResult<CommandReport> {
        let environment = request.environment;
        let _lock = self.store.lock(environment)?;
        let mut record = self.store.load_or_new(environment)?;

        check_preconditions(command, request, &record)?;
        let compiled = match command {
            Command::Teardown => None,
            _ => Some(ArtifactCompiler::compile(&request.topology()?)?),
        };

        info!("Running {} on {} (stage {})", command, environment, record.stage);
        let mut tally = Tally::default();
        let result = match &compiled {
            Some(compiled) => {
                self.run_command(command, request, compiled, &mut record, &mut tally)
                    .await
            }
            None => self.teardown(environment, &mut record, &mut tally).await,
        };

        if let Err(save_error) = self.store.save(&mut record) {
            return match result {
                Ok(()) => Err(save_error),
                Err(e) => {
                    warn!("Could not save record after failure: {}", save_error);
                    Err(e)
                }
            };
        }
        result?;

        info!("{} finished, {} is {}", command, environment, record.stage);
        Ok(CommandReport {
            run_id,
            environment,
            command,
            stage: record.stage,
            handles: record.handle_count(),
            created: tally.created,
            deleted: tally.deleted,
            configured: tally.configured,
            snapshots: tally.snapshots,
            restored: tally.restored,
        })
    }

    async fn run_command(
        &self,
        command: Command,
        request: &EnvRequest,
        compiled: &CompiledEnvironment,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let environment = request.environment;
        match command {
            Command::DeployNetwork => self.deploy_network(environment, compiled, record, tally).await,
            Command::Setup => {
                if request.skip_host {
                    warn!("setup --skip_host leaves {} unchanged", environment);
                    return Ok(());
                }
                self.deploy_hosts(environment, compiled, record, tally).await?;
                if self.config.snapshots.restore_on_setup && !record.snapshots.is_empty() {
                    self.store.save(record)?;
                    self.restore(environment, compiled, record, tally).await?;
                }
                Ok(())
            }
            Command::Compile => {
                if !request.skip_network {
                    self.deploy_network(environment, compiled, record, tally).await?;
                    self.store.save(record)?;
                }
                if !request.skip_host {
                    self.deploy_hosts(environment, compiled, record, tally).await?;
                    self.store.save(record)?;
                }
                for phase in ConfigPhase::ALL {
                    self.configure(request, compiled, phase, record, tally).await?;
                    self.store.save(record)?;
                }
                if self.config.snapshots.after_compile {
                    self.snapshot(environment, compiled, record, tally).await?;
                }
                Ok(())
            }
            Command::Teardown => self.teardown(environment, record, tally).await,
        }
    }

    fn provisioning_driver(&self, environment: EnvironmentType) -> ProvisioningDriver {
        ProvisioningDriver::new(self.backend.provisioners.provisioner(environment))
            .with_timeout(Duration::from_secs(self.config.timeouts.provision_seconds))
            .with_interrupt(self.interrupt.clone())
    }

    async fn deploy_network(
        &self,
        environment: EnvironmentType,
        compiled: &CompiledEnvironment,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        if let Some(cloud) = &self.backend.cloud {
            let keypair = self.config.keypair();
            preflight(cloud.as_ref(), keypair.as_ref(), &referenced_images(compiled)).await?;
        }

        let report = self
            .provisioning_driver(environment)
            .apply(&compiled.artifacts_in(&Tier::NETWORK_TIERS), record)
            .await?;
        tally.created += report.created.len();
        record.advance_to(Stage::NetworkDeployed);
        Ok(())
    }

    async fn deploy_hosts(
        &self,
        environment: EnvironmentType,
        compiled: &CompiledEnvironment,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let compiled = compiled.clone().with_snapshot_images(&record.snapshots);
        let report = self
            .provisioning_driver(environment)
            .apply(&compiled.artifacts_in(&Tier::HOST_TIERS), record)
            .await?;
        tally.created += report.created.len();
        record.advance_to(Stage::HostsConfigured);
        Ok(())
    }

    /// Bring every snapshotted host back to its snapshot. Hosts the cloud
    /// reports in error are deleted and recreated from the snapshot instead.
    async fn restore(
        &self,
        environment: EnvironmentType,
        compiled: &CompiledEnvironment,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let Some(cloud) = &self.backend.cloud else {
            warn!("Restoring snapshots needs a cloud API, {} has none", self.config.substrate);
            return Ok(());
        };

        let compiled = compiled.clone().with_snapshot_images(&record.snapshots);
        let driver = self.provisioning_driver(environment);
        let mut failures = Vec::new();

        for job in &compiled.jobs {
            let Some(image) = record.snapshots.get(&job.host).cloned() else {
                continue;
            };
            let Some(server) = record.handle(&host_resource(&job.host)).map(str::to_string) else {
                continue;
            };
            if self.interrupt.is_triggered() {
                warn!("Interrupted before restoring {}", job.host);
                return Err(IacError::Interrupted.into());
            }

            let restored = match cloud.server_status(&server).await {
                Ok(status) if status.eq_ignore_ascii_case("error") => {
                    warn!("{} is in error state, recreating it from {}", job.host, image);
                    driver
                        .replace(&compiled.host_artifacts(&job.host), record)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
                Ok(_) => cloud
                    .rebuild_server(&server, &image)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match restored {
                Ok(()) => {
                    info!("Restored {} from {}", job.host, image);
                    for phase in ConfigPhase::ALL {
                        record.set_job_status(&job.host, phase, JobStatus::Configured);
                    }
                    tally.restored += 1;
                }
                Err(detail) => failures.push(ResourceFailure {
                    name: format!("restore:{}", job.host),
                    detail,
                    timed_out: false,
                }),
            }
        }

        if !failures.is_empty() {
            return Err(IacError::ApplyFailed { failures }.into());
        }
        // snapshots are only taken after a complete compile
        if compiled.jobs.iter().all(|job| record.snapshots.contains_key(&job.host)) {
            record.advance_to(Stage::DataGenerated);
        }
        Ok(())
    }

    async fn configure(
        &self,
        request: &EnvRequest,
        compiled: &CompiledEnvironment,
        phase: ConfigPhase,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let jump_host = compiled
            .jobs
            .iter()
            .find(|job| job.role == HostRole::Management)
            .and_then(|job| record.address(&floating_ip_resource(&job.host)))
            .map(str::to_string);

        let mut driver = ConfigurationDriver::new(self.backend.config_runner.clone())
            .with_workers(request.workers.unwrap_or(self.config.workers))
            .with_timeout(Duration::from_secs(self.config.timeouts.configure_seconds))
            .with_jump_host(jump_host)
            .with_interrupt(self.interrupt.clone())
            .with_retry_attempts(self.config.ansible.attacker_install_attempts);
        if let Some(cloud) = &self.backend.cloud {
            driver = driver.with_host_reset(Arc::new(SnapshotReset::new(cloud.clone(), record)));
        }

        let report = driver.configure(&compiled.jobs, phase, record).await?;
        tally.configured += report.configured.len();
        record.advance_to(stage_after(phase));
        Ok(())
    }

    /// Snapshot every host that has no snapshot yet.
    async fn snapshot(
        &self,
        environment: EnvironmentType,
        compiled: &CompiledEnvironment,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let Some(cloud) = &self.backend.cloud else {
            warn!("Snapshots need a cloud API, {} has none", self.config.substrate);
            return Ok(());
        };

        let mut failures = Vec::new();
        for job in &compiled.jobs {
            if record.snapshots.contains_key(&job.host) {
                continue;
            }
            let Some(server) = record.handle(&host_resource(&job.host)).map(str::to_string) else {
                continue;
            };

            let image = format!("{}_{}_{}", self.config.snapshots.prefix, environment, job.host);
            match cloud.snapshot_server(&server, &image).await {
                Ok(id) => {
                    info!("Snapshot of {} is {}", job.host, id);
                    record.snapshots.insert(job.host.clone(), id);
                    tally.snapshots += 1;
                }
                Err(e) => failures.push(ResourceFailure {
                    name: format!("snapshot:{}", job.host),
                    detail: e.to_string(),
                    timed_out: false,
                }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IacError::ApplyFailed { failures }.into())
        }
    }

    async fn teardown(
        &self,
        environment: EnvironmentType,
        record: &mut EnvironmentRecord,
        tally: &mut Tally,
    ) -> CoreResult<()> {
        let report = self.provisioning_driver(environment).destroy(record).await?;
        tally.deleted += report.deleted.len();
        record.mark_torn_down();
        Ok(())
    }

    /// The persisted record, if any.
    pub fn status(&self, environment: EnvironmentType) -> CoreResult<Option<EnvironmentRecord>> {
        self.store.load(environment)
    }

    /// Compile without touching anything external.
    pub fn plan(&self, request: &EnvRequest) -> CoreResult<CompiledEnvironment> {
        Ok(ArtifactCompiler::compile(&request.topology()?)?)
    }

    /// Prepare the cloud project: quota, role, flavors, images, keypair.
    pub async fn bootstrap(&self) -> CoreResult<Vec<(String, StepOutcome)>> {
        let cloud = self.backend.cloud.as_ref().ok_or_else(|| {
            CoreError::precondition(format!("the {} substrate has no cloud API", self.config.substrate))
        })?;

        let settings = &self.config.openstack;
        let plan = BootstrapPlan {
            project: settings.project.clone(),
            user: settings.user.clone(),
            role: settings.role.clone(),
            quota: settings.quota.clone(),
            flavors: settings.flavors.clone(),
            images: settings.images.clone(),
            keypair: self.config.keypair(),
            network_renames: settings.network_renames.clone(),
        };
        Ok(bootstrap(cloud.as_ref(), &plan).await?)
    }
}

/// Resets a host by rebuilding it from its recorded snapshot.
struct SnapshotReset {
    cloud: Arc<dyn CloudApi>,
    /// host -> (server handle, snapshot image)
    targets: BTreeMap<String, (String, String)>,
}

impl SnapshotReset {
    fn new(cloud: Arc<dyn CloudApi>, record: &EnvironmentRecord) -> Self {
        let targets = record
            .snapshots
            .iter()
            .filter_map(|(host, image)| {
                record
                    .handle(&host_resource(host))
                    .map(|server| (host.clone(), (server.to_string(), image.clone())))
            })
            .collect();
        Self { cloud, targets }
    }
}

#[async_trait]
impl HostReset for SnapshotReset {
    async fn reset(&self, host: &str) -> ConfigResult<()> {
        let reset_error = |detail: String| ConfigurationError::Reset {
            host: host.to_string(),
            detail,
        };
        let (server, image) = self
            .targets
            .get(host)
            .ok_or_else(|| reset_error("no snapshot recorded".to_string()))?;

        info!("Restoring {} from {} before retrying", host, image);
        self.cloud
            .rebuild_server(server, image)
            .await
            .map_err(|e| reset_error(e.to_string()))
    }
}

fn check_preconditions(command: Command, request: &EnvRequest, record: &EnvironmentRecord) -> CoreResult<()> {
    let require = |stage: Stage, flag: &str| {
        if record.stage.has_reached(stage) {
            Ok(())
        } else {
            Err(CoreError::precondition(format!(
                "{} requires the {} environment to be at least {}, it is {}",
                flag, request.environment, stage, record.stage
            )))
        }
    };

    match command {
        Command::DeployNetwork | Command::Teardown => {
            if request.skip_network || request.skip_host {
                warn!("Skip flags have no effect on {}", command);
            }
            Ok(())
        }
        Command::Setup => {
            require(Stage::NetworkDeployed, "setup")?;
            if request.skip_host {
                require(Stage::HostsConfigured, "--skip_host")?;
            }
            Ok(())
        }
        Command::Compile => {
            if request.skip_network {
                require(Stage::NetworkDeployed, "--skip_network")?;
            }
            if request.skip_host {
                require(Stage::HostsConfigured, "--skip_host")?;
            }
            Ok(())
        }
    }
}

fn stage_after(phase: ConfigPhase) -> Stage {
    match phase {
        ConfigPhase::Base => Stage::HostsConfigured,
        ConfigPhase::Vulnerabilities => Stage::VulnerabilitiesInjected,
        ConfigPhase::Data => Stage::DataGenerated,
    }
}

fn referenced_images(compiled: &CompiledEnvironment) -> Vec<String> {
    compiled
        .artifacts
        .iter()
        .filter_map(|a| match &a.kind {
            ArtifactKind::Compute { host, .. } => Some(host.image.clone()),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_flags_need_recorded_stage() {
        let record = EnvironmentRecord::new(EnvironmentType::Star);
        let request = EnvRequest::new(EnvironmentType::Star).skip_network(true);
        assert!(matches!(
            check_preconditions(Command::Compile, &request, &record),
            Err(CoreError::Precondition(_))
        ));
        assert!(check_preconditions(Command::DeployNetwork, &request, &record).is_ok());

        let mut deployed = record.clone();
        deployed.advance_to(Stage::NetworkDeployed);
        assert!(check_preconditions(Command::Compile, &request, &deployed).is_ok());
        assert!(check_preconditions(
            Command::Compile,
            &request.clone().skip_host(true),
            &deployed
        )
        .is_err());
    }

    #[test]
    fn test_setup_needs_network() {
        let record = EnvironmentRecord::new(EnvironmentType::Ring);
        let request = EnvRequest::new(EnvironmentType::Ring);
        assert!(check_preconditions(Command::Setup, &request, &record).is_err());
        assert!(check_preconditions(Command::Teardown, &request, &record).is_ok());
    }

    #[test]
    fn test_referenced_images_are_distinct() {
        let topology = EnvironmentType::Star.topology(&Scale::default()).unwrap();
        let compiled = ArtifactCompiler::compile(&topology).unwrap();
        assert_eq!(referenced_images(&compiled), vec!["Kali", "Ubuntu20"]);
    }
}
