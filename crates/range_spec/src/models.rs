//! Data models for topology specifications.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{InvalidTopologyError, SpecError};
use crate::validator::TopologyValidator;

/// Role of a host in the range. Selects its configuration actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Management,
    Attacker,
    Webserver,
    Database,
    Employee,
}

impl HostRole {
    pub const ALL: [HostRole; 5] = [
        HostRole::Management,
        HostRole::Attacker,
        HostRole::Webserver,
        HostRole::Database,
        HostRole::Employee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Management => "management",
            HostRole::Attacker => "attacker",
            HostRole::Webserver => "webserver",
            HostRole::Database => "database",
            HostRole::Employee => "employee",
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostRole {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "management" | "manage" => Ok(HostRole::Management),
            "attacker" => Ok(HostRole::Attacker),
            "webserver" | "webservers" => Ok(HostRole::Webserver),
            "database" | "databases" => Ok(HostRole::Database),
            "employee" | "employees" => Ok(HostRole::Employee),
            other => Err(SpecError::InvalidScale(format!("unknown role '{}'", other))),
        }
    }
}

/// An isolated network with one subnet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub cidr: IpNet,
    #[serde(default = "default_ip_version")]
    pub ip_version: u8,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
}

fn default_ip_version() -> u8 {
    4
}

impl Network {
    pub fn new(name: impl Into<String>, cidr: IpNet) -> Self {
        Self {
            name: name.into(),
            ip_version: ip_version_of(&cidr),
            cidr,
            dns_servers: Vec::new(),
        }
    }

    pub fn with_dns(mut self, servers: impl IntoIterator<Item = IpAddr>) -> Self {
        self.dns_servers.extend(servers);
        self
    }

    /// Name of the subnet created alongside the network.
    pub fn subnet_name(&self) -> String {
        format!("{}_subnet", self.name)
    }
}

/// A compute instance attached to one network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub role: HostRole,
    #[serde(rename = "network")]
    pub network_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<IpAddr>,
    pub image: String,
    pub flavor: String,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub floating_ip: bool,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        role: HostRole,
        network: impl Into<String>,
        image: impl Into<String>,
        flavor: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            network_ref: network.into(),
            fixed_ip: None,
            image: image.into(),
            flavor: flavor.into(),
            security_groups: Vec::new(),
            floating_ip: false,
        }
    }

    pub fn fixed_ip(mut self, ip: IpAddr) -> Self {
        self.fixed_ip = Some(ip);
        self
    }

    pub fn security_group(mut self, group: impl Into<String>) -> Self {
        self.security_groups.push(group.into());
        self
    }

    pub fn floating_ip(mut self) -> Self {
        self.floating_ip = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EtherType {
    IPv4,
    IPv6,
}

impl EtherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EtherType::IPv4 => "IPv4",
            EtherType::IPv6 => "IPv6",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// Inclusive port range. Bounds are wide so out-of-range input is reported,
/// not rejected by the parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub min: u32,
    pub max: u32,
}

impl PortRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn single(port: u32) -> Self {
        Self::new(port, port)
    }

    pub fn is_valid(&self) -> bool {
        (1..=65535).contains(&self.min) && (1..=65535).contains(&self.max) && self.min <= self.max
    }
}

/// One firewall rule of a security group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityRule {
    pub direction: Direction,
    pub ethertype: EtherType,
    /// `None` means any protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    /// `None` means any port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range: Option<PortRange>,
    pub remote_cidr: IpNet,
}

impl SecurityRule {
    /// Admit all traffic from `remote_cidr`.
    pub fn allow_all_from(remote_cidr: IpNet) -> Self {
        Self {
            direction: Direction::Ingress,
            ethertype: ethertype_of(&remote_cidr),
            protocol: None,
            port_range: None,
            remote_cidr,
        }
    }

    /// Admit TCP on one port from `remote_cidr`.
    pub fn allow_tcp_from(port: u32, remote_cidr: IpNet) -> Self {
        Self {
            direction: Direction::Ingress,
            ethertype: ethertype_of(&remote_cidr),
            protocol: Some(Protocol::Tcp),
            port_range: Some(PortRange::single(port)),
            remote_cidr,
        }
    }
}

pub(crate) fn ip_version_of(cidr: &IpNet) -> u8 {
    match cidr {
        IpNet::V4(_) => 4,
        IpNet::V6(_) => 6,
    }
}

pub(crate) fn cidrs_overlap(a: &IpNet, b: &IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn ethertype_of(cidr: &IpNet) -> EtherType {
    match cidr {
        IpNet::V4(_) => EtherType::IPv4,
        IpNet::V6(_) => EtherType::IPv6,
    }
}

/// Declared shape of an environment before any resource exists.
///
/// Values handed out by [`TopologyBuilder::build`], the environment
/// variants and the YAML reader have passed [`TopologyValidator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    pub networks: Vec<Network>,
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub security_rules: BTreeMap<String, Vec<SecurityRule>>,
    #[serde(default)]
    pub router_links: BTreeSet<String>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Validate, returning the topology unchanged on success.
    pub fn validated(self) -> Result<Self, InvalidTopologyError> {
        TopologyValidator::validate(&self).into_result()?;
        Ok(self)
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn security_groups(&self) -> impl Iterator<Item = &str> {
        self.security_rules.keys().map(String::as_str)
    }

    /// Hosts of one role, in declaration order.
    pub fn hosts_with_role(&self, role: HostRole) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(move |h| h.role == role)
    }

    /// The host used as SSH jump host for configuration.
    pub fn management_host(&self) -> Option<&Host> {
        self.hosts_with_role(HostRole::Management).next()
    }

    pub fn to_yaml(&self) -> Result<String, SpecError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Incremental topology construction with validation at the end.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
}

impl TopologyBuilder {
    pub fn network(mut self, network: Network) -> Self {
        self.topology.networks.push(network);
        self
    }

    pub fn host(mut self, host: Host) -> Self {
        self.topology.hosts.push(host);
        self
    }

    /// Declare a security group with its rules.
    pub fn security_group(
        mut self,
        name: impl Into<String>,
        rules: impl IntoIterator<Item = SecurityRule>,
    ) -> Self {
        self.topology
            .security_rules
            .entry(name.into())
            .or_default()
            .extend(rules);
        self
    }

    pub fn router_link(mut self, network: impl Into<String>) -> Self {
        self.topology.router_links.insert(network.into());
        self
    }

    /// Finish construction; reports every violation at once.
    pub fn build(self) -> Result<Topology, InvalidTopologyError> {
        self.topology.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range_bounds() {
        assert!(PortRange::single(22).is_valid());
        assert!(PortRange::new(1, 65535).is_valid());
        assert!(!PortRange::new(0, 10).is_valid());
        assert!(!PortRange::new(80, 70000).is_valid());
        assert!(!PortRange::new(443, 80).is_valid());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("webservers".parse::<HostRole>().unwrap(), HostRole::Webserver);
        assert_eq!("Database".parse::<HostRole>().unwrap(), HostRole::Database);
        assert!("printer".parse::<HostRole>().is_err());
    }

    #[test]
    fn test_network_ip_version_follows_cidr() {
        let v4 = Network::new("lan", "10.0.0.0/24".parse().unwrap());
        let v6 = Network::new("lan6", "fd00::/64".parse().unwrap());
        assert_eq!(v4.ip_version, 4);
        assert_eq!(v6.ip_version, 6);
        assert_eq!(v4.subnet_name(), "lan_subnet");
    }

    #[test]
    fn test_rule_yaml_defaults_to_any() {
        let yaml = "direction: ingress\nethertype: IPv4\nremote_cidr: 0.0.0.0/0\n";
        let rule: SecurityRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.protocol, None);
        assert_eq!(rule.port_range, None);
    }
}
