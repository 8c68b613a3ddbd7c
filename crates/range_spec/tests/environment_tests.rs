//! Integration tests for environment layouts and their configuration jobs.

use range_spec::{
    ConfigPhase, EnvironmentType, HostJob, HostRole, Scale, TopologyReader, TopologyValidator,
};

#[test]
fn test_generated_topologies_survive_yaml() {
    for env in EnvironmentType::ALL {
        let topology = env.topology(&Scale::default()).unwrap();
        let yaml = topology.to_yaml().unwrap();
        let reread = TopologyReader::from_yaml(&yaml).unwrap();
        assert_eq!(reread, topology, "{}", env);
    }
}

#[test]
fn test_generated_topologies_have_no_warnings() {
    let scale = Scale::parse_all(["webserver=4", "database=3", "employee=5"]).unwrap();
    for env in EnvironmentType::ALL {
        let topology = env.topology(&scale).unwrap();
        let result = TopologyValidator::validate(&topology);
        assert!(result.valid);
        assert!(result.warnings.is_empty(), "{}: {:?}", env, result.warnings);
    }
}

#[test]
fn test_non_management_hosts_admit_management_ssh() {
    let topology = EnvironmentType::Enterprise.topology(&Scale::default()).unwrap();
    for host in topology.hosts.iter().filter(|h| h.role != HostRole::Management) {
        assert!(
            host.security_groups.iter().any(|g| g == "talk_to_manage"),
            "{} lacks talk_to_manage",
            host.name
        );
    }
}

#[test]
fn test_jobs_follow_host_order() {
    let topology = EnvironmentType::Dumbbell.topology(&Scale::default()).unwrap();
    let jobs: Vec<_> = topology.hosts.iter().map(HostJob::for_host).collect();

    let names: Vec<_> = jobs.iter().map(|j| j.host.as_str()).collect();
    let hosts: Vec<_> = topology.hosts.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, hosts);

    let data_jobs = jobs
        .iter()
        .filter(|j| !j.actions(ConfigPhase::Data).is_empty())
        .count();
    // one database and two employees by default
    assert_eq!(data_jobs, 3);
}
