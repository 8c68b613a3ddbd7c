//! Integration tests for the lifecycle controller.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use range_ansible::{ActionOutcome, ConfigResult, ConfigRunner, MockConfigRunner, RunContext};
use range_core::{
    Backend, Command, CoreError, EnvRequest, ErrorKind, LifecycleController, RangeConfig, RecordStore,
    SharedProvisioner,
};
use range_iac::{ArtifactKind, MockCloud, MockProvisioner, Substrate};
use range_runner::Interrupt;
use range_spec::{
    ConfigAction, ConfigPhase, EnvironmentType, HostRole, JobStatus, ResourceStatus, Scale, Stage, Tier, Topology,
};
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    provisioner: Arc<MockProvisioner>,
    runner: Arc<MockConfigRunner>,
    cloud: Arc<MockCloud>,
    controller: LifecycleController,
}

fn config_in(dir: &Path) -> RangeConfig {
    RangeConfig {
        state_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn harness_with(provisioner: MockProvisioner, cloud: MockCloud, config: impl FnOnce(&mut RangeConfig)) -> Harness {
    let temp = TempDir::new().unwrap();
    let mut settings = config_in(temp.path());
    config(&mut settings);

    let provisioner = Arc::new(provisioner);
    let runner = Arc::new(MockConfigRunner::new());
    let cloud = Arc::new(cloud);
    let backend = Backend {
        provisioners: Arc::new(SharedProvisioner(provisioner.clone())),
        config_runner: runner.clone(),
        cloud: Some(cloud.clone()),
    };
    let controller = LifecycleController::new(settings.clone(), RecordStore::new(settings.records_dir()), backend);

    Harness {
        _temp: temp,
        provisioner,
        runner,
        cloud,
        controller,
    }
}

fn harness() -> Harness {
    harness_with(MockProvisioner::new(), MockCloud::new(), |_| {})
}

/// A controller on the same state and provisioner with another runner.
fn with_runner(h: &Harness, runner: Arc<dyn ConfigRunner>, interrupt: Interrupt) -> LifecycleController {
    LifecycleController::new(
        h.controller.config().clone(),
        h.controller.store().clone(),
        Backend {
            provisioners: Arc::new(SharedProvisioner(h.provisioner.clone())),
            config_runner: runner,
            cloud: Some(h.cloud.clone()),
        },
    )
    .with_interrupt(interrupt)
}

/// Runner that raises the interrupt during its first run.
struct InterruptingRunner {
    inner: MockConfigRunner,
    interrupt: Interrupt,
}

#[async_trait]
impl ConfigRunner for InterruptingRunner {
    async fn run(&self, address: &str, actions: &[ConfigAction], context: &RunContext) -> ConfigResult<Vec<ActionOutcome>> {
        self.interrupt.trigger();
        self.inner.run(address, actions, context).await
    }
}

/// 1 management, 3 webservers, 2 databases, 1 attacker; each role in its own
/// network and no floating IPs.
fn scenario_topology() -> Topology {
    let scale = Scale::default()
        .with(HostRole::Webserver, 3)
        .with(HostRole::Database, 2)
        .with(HostRole::Employee, 0);
    let mut topology = EnvironmentType::Star.topology(&scale).unwrap();
    for host in &mut topology.hosts {
        host.floating_ip = false;
    }
    topology
}

#[tokio::test]
async fn test_deploy_network_then_setup_scenario() {
    let h = harness();
    let topology = scenario_topology();
    let path = h.controller.config().state_dir.join("scenario.yaml");
    fs::write(&path, topology.to_yaml().unwrap()).unwrap();
    let request = EnvRequest::new(EnvironmentType::Star).with_topology_file(&path);

    let deployed = h.controller.execute(Command::DeployNetwork, &request).await.unwrap();
    assert_eq!(deployed.stage, Stage::NetworkDeployed);

    let report = h.controller.execute(Command::Setup, &request).await.unwrap();
    assert_eq!(report.stage, Stage::HostsConfigured);
    assert_eq!(topology.networks.len(), 4);
    assert_eq!(topology.hosts.len(), 7);
    assert_eq!(
        report.handles,
        topology.networks.len() + topology.hosts.len() + 1 + topology.security_rules.len()
    );

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_eq!(record.stage, Stage::HostsConfigured);
    assert_eq!(record.handle_count(), report.handles);
    assert_eq!(h.runner.call_count(), 0);
}

#[tokio::test]
async fn test_generated_layout_counts_floating_ips() {
    let h = harness();
    let scale = Scale::default()
        .with(HostRole::Webserver, 3)
        .with(HostRole::Database, 2)
        .with(HostRole::Employee, 0);
    let request = EnvRequest::new(EnvironmentType::Star).with_scale(scale);
    let topology = request.topology().unwrap();
    let floating = topology.hosts.iter().filter(|host| host.floating_ip).count();
    assert!(floating >= 1);

    h.controller.execute(Command::DeployNetwork, &request).await.unwrap();
    let report = h.controller.execute(Command::Setup, &request).await.unwrap();

    assert_eq!(
        report.handles,
        topology.networks.len() + topology.security_rules.len() + 1 + topology.hosts.len() + floating
    );
}

#[tokio::test]
async fn test_skip_network_on_fresh_environment() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Star).skip_network(true);

    let err = h.controller.execute(Command::Compile, &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(h.provisioner.create_attempts().is_empty());
    assert_eq!(h.cloud.call_count(), 0);
    assert_eq!(h.runner.call_count(), 0);
    assert!(h.controller.status(EnvironmentType::Star).unwrap().is_none());
}

#[tokio::test]
async fn test_setup_before_network_is_rejected() {
    let h = harness();
    let err = h
        .controller
        .execute(Command::Setup, &EnvRequest::new(EnvironmentType::Ring))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
    assert!(h.provisioner.create_attempts().is_empty());
}

#[tokio::test]
async fn test_compile_runs_every_phase() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Dumbbell);

    let report = h.controller.execute(Command::Compile, &request).await.unwrap();
    assert_eq!(report.stage, Stage::DataGenerated);

    let record = h.controller.status(EnvironmentType::Dumbbell).unwrap().unwrap();
    let topology = request.topology().unwrap();
    for host in &topology.hosts {
        for phase in ConfigPhase::ALL {
            assert_eq!(record.job_status(&host.name, phase), JobStatus::Configured);
        }
    }

    // the management host's floating address is the jump host
    let calls = h.runner.calls();
    assert!(calls.iter().all(|c| c.jump_host.as_deref().map_or(false, |j| j.starts_with("203.0.113."))));
    // base before vulnerabilities before data
    let first_vuln = calls.iter().position(|c| c.actions.contains(&"sudo_baron".to_string()));
    let last_base = calls.iter().rposition(|c| c.actions.contains(&"check_host_up".to_string()));
    assert!(last_base < first_vuln);
}

#[tokio::test]
async fn test_compile_resumes_from_record() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::Compile, &request).await.unwrap();

    h.provisioner.clear_calls();
    h.runner.clear_calls();
    let again = h
        .controller
        .execute(Command::Compile, &request.clone().skip_network(true).skip_host(true))
        .await
        .unwrap();

    assert_eq!(again.created, 0);
    assert_eq!(again.configured, 0);
    assert!(h.provisioner.create_attempts().is_empty());
    assert_eq!(h.runner.call_count(), 0);
}

#[tokio::test]
async fn test_configuration_failure_stops_later_phases() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::Setup, &request).await.unwrap_err();
    h.controller.execute(Command::DeployNetwork, &request).await.unwrap();
    h.controller.execute(Command::Setup, &request).await.unwrap();

    let failing = Arc::new(MockConfigRunner::new().fail_host("database_1"));
    let controller = LifecycleController::new(
        h.controller.config().clone(),
        h.controller.store().clone(),
        Backend {
            provisioners: Arc::new(SharedProvisioner(h.provisioner.clone())),
            config_runner: failing.clone(),
            cloud: Some(h.cloud.clone()),
        },
    );

    let err = controller
        .execute(Command::Compile, &request.clone().skip_network(true).skip_host(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let record = controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_eq!(record.stage, Stage::HostsConfigured);
    assert_eq!(record.job_status("database_1", ConfigPhase::Base), JobStatus::Failed);
    assert_eq!(record.job_status("webserver_1", ConfigPhase::Base), JobStatus::Configured);
    assert!(failing.calls().iter().all(|c| c.actions.contains(&"install_base_packages".to_string())
        || c.actions.contains(&"install_attacker_tools".to_string())));
}

#[tokio::test]
async fn test_missing_image_fails_before_provisioning() {
    let h = harness_with(MockProvisioner::new(), MockCloud::new().without_image("Kali"), |_| {});

    let err = h
        .controller
        .execute(Command::DeployNetwork, &EnvRequest::new(EnvironmentType::Enterprise))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(h.provisioner.create_attempts().is_empty());
}

#[tokio::test]
async fn test_invalid_topology_file_is_rejected() {
    let h = harness();
    let mut topology = scenario_topology();
    // webserver_1 and webserver_2 share a network
    for host in &mut topology.hosts[2..4] {
        host.fixed_ip = Some("10.0.1.10".parse().unwrap());
    }

    let path = h.controller.config().state_dir.join("broken.yaml");
    fs::write(&path, topology.to_yaml().unwrap()).unwrap();

    let err = h
        .controller
        .execute(
            Command::DeployNetwork,
            &EnvRequest::new(EnvironmentType::Star).with_topology_file(&path),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTopology);
    assert_eq!(h.cloud.call_count(), 0);
    assert!(h.provisioner.create_attempts().is_empty());
}

#[tokio::test]
async fn test_teardown_retries_failed_deletes() {
    let h = harness_with(
        MockProvisioner::new().fail_on_delete("network:manage_network"),
        MockCloud::new(),
        |_| {},
    );
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::DeployNetwork, &request).await.unwrap();
    h.controller.execute(Command::Setup, &request).await.unwrap();

    let err = h.controller.execute(Command::Teardown, &request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_eq!(record.stage, Stage::Absent);
    assert_eq!(record.handle_count(), 1);
    assert_eq!(
        record.resource("network:manage_network").map(|r| r.status),
        Some(ResourceStatus::DeleteFailed)
    );
    // with a network gone, skipping network deployment is refused
    let err = h
        .controller
        .execute(Command::Compile, &request.clone().skip_network(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    h.provisioner.heal("network:manage_network");
    h.provisioner.clear_calls();
    let report = h.controller.execute(Command::Teardown, &request).await.unwrap();
    assert_eq!(report.stage, Stage::TornDown);
    assert_eq!(report.handles, 0);
    assert_eq!(h.provisioner.delete_attempts(), vec!["network:manage_network"]);
}

#[tokio::test]
async fn test_held_lock_rejects_second_command() {
    let h = harness();
    let _held = h.controller.store().lock(EnvironmentType::Ring).unwrap();

    let err = h
        .controller
        .execute(Command::DeployNetwork, &EnvRequest::new(EnvironmentType::Ring))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(h.provisioner.create_attempts().is_empty());

    // other environments are unaffected
    h.controller
        .execute(Command::DeployNetwork, &EnvRequest::new(EnvironmentType::Star))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_snapshots_after_compile() {
    let h = harness_with(MockProvisioner::new(), MockCloud::new(), |c| {
        c.snapshots.after_compile = true;
    });
    let request = EnvRequest::new(EnvironmentType::Star);

    let report = h.controller.execute(Command::Compile, &request).await.unwrap();
    let topology = request.topology().unwrap();
    assert_eq!(report.snapshots, topology.hosts.len());

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_eq!(
        record.snapshots.get("manage_host").map(String::as_str),
        Some("snap-range_star_manage_host")
    );

    h.controller.execute(Command::Teardown, &request).await.unwrap();
    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert!(record.snapshots.is_empty());
}

#[tokio::test]
async fn test_plan_and_bootstrap() {
    let h = harness_with(MockProvisioner::new(), MockCloud::new().with_existing("range"), |c| {
        c.substrate = Substrate::OpenStack;
    });

    let compiled = h.controller.plan(&EnvRequest::new(EnvironmentType::Ring)).unwrap();
    assert!(!compiled.artifacts.is_empty());
    assert!(h.provisioner.create_attempts().is_empty());

    let steps = h.controller.bootstrap().await.unwrap();
    assert_eq!(steps[0].1, range_iac::StepOutcome::AlreadyPresent);
    assert!(h.cloud.calls().contains(&"create_flavor m1.small".to_string()));
}

#[tokio::test]
async fn test_compile_after_partial_teardown_reconfigures_hosts() {
    let h = harness_with(
        MockProvisioner::new().fail_on_delete("network:manage_network"),
        MockCloud::new(),
        |c| c.snapshots.after_compile = true,
    );
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::Compile, &request).await.unwrap();
    h.controller.execute(Command::Teardown, &request).await.unwrap_err();

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert!(!record.stage.has_reached(Stage::NetworkDeployed));
    assert!(record.host_config_status.is_empty());
    assert!(record.snapshots.is_empty());
    assert!(record.resource_handles.values().all(|r| r.tier == Tier::Network));

    h.runner.clear_calls();
    let report = h.controller.execute(Command::Compile, &request).await.unwrap();
    assert_eq!(report.stage, Stage::DataGenerated);

    let topology = request.topology().unwrap();
    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    for host in &topology.hosts {
        assert!(h.runner.calls().iter().any(|c| c.host == host.name), "{} not configured", host.name);
        assert_eq!(record.job_status(&host.name, ConfigPhase::Data), JobStatus::Configured);
    }
}

#[tokio::test]
async fn test_interrupted_compile_persists_and_resumes() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Star).with_workers(Some(1));
    let interrupt = Interrupt::new();
    let runner = Arc::new(InterruptingRunner {
        inner: MockConfigRunner::new(),
        interrupt: interrupt.clone(),
    });

    let err = with_runner(&h, runner.clone(), interrupt)
        .execute(Command::Compile, &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let topology = request.topology().unwrap();
    let compiled = h.controller.plan(&request).unwrap();
    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_eq!(record.handle_count(), compiled.artifacts.len());
    assert_eq!(record.stage, Stage::HostsConfigured);
    assert_eq!(runner.inner.call_count(), 1);

    let first = runner.inner.calls()[0].host.clone();
    assert_eq!(record.job_status(&first, ConfigPhase::Base), JobStatus::Configured);
    for host in topology.hosts.iter().filter(|host| host.name != first) {
        assert_eq!(record.job_status(&host.name, ConfigPhase::Base), JobStatus::Pending);
    }

    h.provisioner.clear_calls();
    let resume = request.clone().skip_network(true).skip_host(true);
    let report = h.controller.execute(Command::Compile, &resume).await.unwrap();
    assert_eq!(report.stage, Stage::DataGenerated);
    assert_eq!(report.created, 0);
    assert!(h.provisioner.create_attempts().is_empty());
    let base_runs = h
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.host == first)
        .filter(|c| {
            c.actions
                .iter()
                .any(|a| matches!(a.as_str(), "check_host_up" | "install_base_packages" | "install_attacker_tools"))
        })
        .count();
    assert_eq!(base_runs, 0);
}

#[tokio::test]
async fn test_setup_restores_hosts_from_snapshots() {
    let h = harness_with(MockProvisioner::new(), MockCloud::new(), |c| {
        c.snapshots.after_compile = true;
    });
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::Compile, &request).await.unwrap();

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    let broken = record.handle("host:webserver_1").unwrap().to_string();
    h.cloud.set_server_error(&broken);
    h.provisioner.clear_calls();

    let report = h.controller.execute(Command::Setup, &request).await.unwrap();
    let topology = request.topology().unwrap();
    assert_eq!(report.restored, topology.hosts.len());
    assert_eq!(report.stage, Stage::DataGenerated);

    // healthy hosts are rebuilt in place, the broken one is recreated
    let rebuilt = h.cloud.calls_of("rebuild_server");
    assert_eq!(rebuilt.len(), topology.hosts.len() - 1);
    assert!(rebuilt.iter().all(|call| !call.starts_with(&format!("{}:", broken))));
    assert_eq!(h.provisioner.delete_attempts(), vec!["host:webserver_1"]);
    match h.provisioner.artifact("host:webserver_1").map(|a| a.kind) {
        Some(ArtifactKind::Compute { snapshot, .. }) => {
            assert_eq!(snapshot.as_deref(), Some("snap-range_star_webserver_1"))
        }
        other => panic!("unexpected artifact: {other:?}"),
    }

    let record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    assert_ne!(record.handle("host:webserver_1"), Some(broken.as_str()));
    assert_eq!(
        record.snapshots.get("webserver_1").map(String::as_str),
        Some("snap-range_star_webserver_1")
    );
}

#[tokio::test]
async fn test_setup_skip_host_changes_nothing() {
    let h = harness();
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::DeployNetwork, &request).await.unwrap();
    h.controller.execute(Command::Setup, &request).await.unwrap();
    h.provisioner.clear_calls();

    let report = h
        .controller
        .execute(Command::Setup, &request.clone().skip_host(true))
        .await
        .unwrap();
    assert_eq!(report.stage, Stage::HostsConfigured);
    assert_eq!(report.created, 0);
    assert!(h.provisioner.create_attempts().is_empty());
}

#[tokio::test]
async fn test_attacker_install_retried_from_snapshot() {
    let h = harness_with(MockProvisioner::new(), MockCloud::new(), |c| {
        c.snapshots.after_compile = true;
        c.ansible.attacker_install_attempts = 2;
    });
    let request = EnvRequest::new(EnvironmentType::Star);
    h.controller.execute(Command::Compile, &request).await.unwrap();

    // forget the attacker's base phase so the next compile runs it again
    let mut record = h.controller.status(EnvironmentType::Star).unwrap().unwrap();
    record.set_job_status("attacker_host", ConfigPhase::Base, JobStatus::Pending);
    h.controller.store().save(&mut record).unwrap();
    let attacker = record.handle("host:attacker_host").unwrap().to_string();

    let flaky = Arc::new(MockConfigRunner::new().fail_host_times("attacker_host", 1));
    let report = with_runner(&h, flaky.clone(), Interrupt::new())
        .execute(Command::Compile, &request.clone().skip_network(true).skip_host(true))
        .await
        .unwrap();

    assert_eq!(report.stage, Stage::DataGenerated);
    assert_eq!(flaky.calls().iter().filter(|c| c.host == "attacker_host").count(), 2);
    assert_eq!(
        h.cloud.calls_of("rebuild_server"),
        vec![format!("{}:snap-range_star_attacker_host", attacker)]
    );
}
