//! Host-configuration jobs: which playbooks run on which host, per phase.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{Host, HostRole};

/// Password given to users created on range hosts.
pub const DEFAULT_USER_PASSWORD: &str = "range";

/// Service user created on webservers.
pub const WEBSERVER_USER: &str = "tomcat";

/// Configuration phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPhase {
    Base,
    Vulnerabilities,
    Data,
}

impl ConfigPhase {
    pub const ALL: [ConfigPhase; 3] = [
        ConfigPhase::Base,
        ConfigPhase::Vulnerabilities,
        ConfigPhase::Data,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigPhase::Base => "base",
            ConfigPhase::Vulnerabilities => "vulnerabilities",
            ConfigPhase::Data => "data",
        }
    }
}

impl fmt::Display for ConfigPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named configuration action, backed by a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigAction {
    CheckHostUp,
    InstallBasePackages,
    InstallAttackerTools,
    CreateUser { user: String, password: String },
    StrutsRce,
    NetcatShell,
    WriteablePasswd,
    SshPasswordLogin,
    SudoBaron,
    GenerateData { dataset: String, user: String },
}

impl ConfigAction {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigAction::CheckHostUp => "check_host_up",
            ConfigAction::InstallBasePackages => "install_base_packages",
            ConfigAction::InstallAttackerTools => "install_attacker_tools",
            ConfigAction::CreateUser { .. } => "create_user",
            ConfigAction::StrutsRce => "struts_rce",
            ConfigAction::NetcatShell => "netcat_shell",
            ConfigAction::WriteablePasswd => "writeable_passwd",
            ConfigAction::SshPasswordLogin => "ssh_password_login",
            ConfigAction::SudoBaron => "sudo_baron",
            ConfigAction::GenerateData { .. } => "generate_data",
        }
    }

    /// Actions that may be attempted again after the host is reset.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfigAction::InstallAttackerTools)
    }

    /// Playbook path relative to the playbook directory.
    pub fn playbook(&self) -> &'static str {
        match self {
            ConfigAction::CheckHostUp => "deployment_instance/check_if_host_up/check_if_host_up.yml",
            ConfigAction::InstallBasePackages => {
                "deployment_instance/install_base_packages/install_base_packages.yml"
            }
            ConfigAction::InstallAttackerTools => "caldera/install_attacker/install_attacker.yml",
            ConfigAction::CreateUser { .. } => "common/createUser/createUser.yml",
            ConfigAction::StrutsRce => "vulnerabilities/apacheStruts/setupStruts.yml",
            ConfigAction::NetcatShell => "vulnerabilities/NetcatShell.yml",
            ConfigAction::WriteablePasswd => {
                "vulnerabilities/privledge_escalation/writeablePasswd/writeablePasswd.yml"
            }
            ConfigAction::SshPasswordLogin => "vulnerabilities/SSHEnablePasswordLogin.yml",
            ConfigAction::SudoBaron => "vulnerabilities/privledge_escalation/sudobaron/sudobaron.yml",
            ConfigAction::GenerateData { .. } => "goals/data/addData.yml",
        }
    }

    /// Extra variables passed to the playbook for `host`.
    pub fn extra_vars(&self, host: &str) -> BTreeMap<String, Value> {
        let mut vars = BTreeMap::from([("host".to_string(), json!(host))]);
        match self {
            ConfigAction::CreateUser { user, password } => {
                vars.insert("user".into(), json!(user));
                vars.insert("password".into(), json!(password));
                vars.insert("group".into(), json!("admin"));
            }
            ConfigAction::GenerateData { dataset, user } => {
                vars.insert("host_user".into(), json!(user));
                vars.insert("dataset".into(), json!(dataset));
                vars.insert("dst_path".into(), json!(format!("~/data_{}.json", dataset)));
            }
            _ => {}
        }
        vars
    }

    fn create_user(user: impl Into<String>) -> Self {
        ConfigAction::CreateUser {
            user: user.into(),
            password: DEFAULT_USER_PASSWORD.to_string(),
        }
    }
}

/// Everything the configuration driver needs to configure one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostJob {
    pub host: String,
    pub role: HostRole,
    pub fixed_ip: Option<IpAddr>,
    pub phases: BTreeMap<ConfigPhase, Vec<ConfigAction>>,
}

impl HostJob {
    /// Select the actions for a host from its role.
    pub fn for_host(host: &Host) -> Self {
        let user = format!("{}_user", host.name);
        let (base, vulnerabilities, data) = match host.role {
            HostRole::Management => (vec![ConfigAction::InstallBasePackages], vec![], vec![]),
            HostRole::Attacker => (vec![ConfigAction::InstallAttackerTools], vec![], vec![]),
            HostRole::Webserver => (
                vec![
                    ConfigAction::CheckHostUp,
                    ConfigAction::InstallBasePackages,
                    ConfigAction::create_user(WEBSERVER_USER),
                ],
                vec![ConfigAction::StrutsRce, ConfigAction::NetcatShell],
                vec![],
            ),
            HostRole::Database => (
                vec![
                    ConfigAction::CheckHostUp,
                    ConfigAction::InstallBasePackages,
                    ConfigAction::create_user(user.clone()),
                ],
                vec![ConfigAction::WriteablePasswd],
                vec![ConfigAction::GenerateData {
                    dataset: "customer_records".to_string(),
                    user,
                }],
            ),
            HostRole::Employee => (
                vec![
                    ConfigAction::CheckHostUp,
                    ConfigAction::InstallBasePackages,
                    ConfigAction::create_user(user.clone()),
                ],
                vec![ConfigAction::SshPasswordLogin, ConfigAction::SudoBaron],
                vec![ConfigAction::GenerateData {
                    dataset: "employee_credentials".to_string(),
                    user,
                }],
            ),
        };

        Self {
            host: host.name.clone(),
            role: host.role,
            fixed_ip: host.fixed_ip,
            phases: BTreeMap::from([
                (ConfigPhase::Base, base),
                (ConfigPhase::Vulnerabilities, vulnerabilities),
                (ConfigPhase::Data, data),
            ]),
        }
    }

    /// Whether any action of `phase` may be retried.
    pub fn is_retryable(&self, phase: ConfigPhase) -> bool {
        self.actions(phase).iter().any(ConfigAction::is_retryable)
    }

    /// Actions for a phase; empty when the role has none.
    pub fn actions(&self, phase: ConfigPhase) -> &[ConfigAction] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, role: HostRole) -> Host {
        Host::new(name, role, "lan", "Ubuntu20", "m1.small")
    }

    #[test]
    fn test_webserver_job() {
        let job = HostJob::for_host(&host("webserver_1", HostRole::Webserver));
        let base: Vec<_> = job.actions(ConfigPhase::Base).iter().map(|a| a.name()).collect();

        assert_eq!(base, vec!["check_host_up", "install_base_packages", "create_user"]);
        assert_eq!(
            job.actions(ConfigPhase::Base)[2].extra_vars("webserver_1")["user"],
            json!("tomcat")
        );
        assert_eq!(job.actions(ConfigPhase::Vulnerabilities).len(), 2);
        assert!(job.actions(ConfigPhase::Data).is_empty());
    }

    #[test]
    fn test_data_action_vars() {
        let job = HostJob::for_host(&host("database_1", HostRole::Database));
        let data = &job.actions(ConfigPhase::Data)[0];
        let vars = data.extra_vars("database_1");

        assert_eq!(data.playbook(), "goals/data/addData.yml");
        assert_eq!(vars["host"], json!("database_1"));
        assert_eq!(vars["host_user"], json!("database_1_user"));
        assert_eq!(vars["dst_path"], json!("~/data_customer_records.json"));
    }

    #[test]
    fn test_infrastructure_roles_only_have_base_actions() {
        for role in [HostRole::Management, HostRole::Attacker] {
            let job = HostJob::for_host(&host("h", role));
            assert_eq!(job.actions(ConfigPhase::Base).len(), 1);
            assert!(job.actions(ConfigPhase::Vulnerabilities).is_empty());
            assert!(job.actions(ConfigPhase::Data).is_empty());
        }
    }

    #[test]
    fn test_only_attacker_install_is_retryable() {
        let attacker = HostJob::for_host(&host("attacker_host", HostRole::Attacker));
        let webserver = HostJob::for_host(&host("webserver_1", HostRole::Webserver));

        assert!(attacker.is_retryable(ConfigPhase::Base));
        assert!(!attacker.is_retryable(ConfigPhase::Data));
        assert!(!webserver.is_retryable(ConfigPhase::Base));
    }
}
