//! Environment types: pure functions from a [`Scale`] to a [`Topology`].
//!
//! Every variant shares the management and attacker networks; they differ in
//! how the webserver, database and employee hosts are laid out.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

use crate::error::{SpecError, SpecResult};
use crate::models::{Host, HostRole, Network, SecurityRule, Topology, TopologyBuilder};

pub const MANAGE_NETWORK: &str = "manage_network";
pub const MANAGE_HOST: &str = "manage_host";
pub const ATTACKER_NETWORK: &str = "attacker_network";
pub const ATTACKER_HOST: &str = "attacker_host";

pub const TALK_TO_MANAGE: &str = "talk_to_manage";
pub const MANAGE_FREEDOM: &str = "manage_freedom";
pub const ATTACKER_FREEDOM: &str = "attacker_freedom";

pub const DEFAULT_IMAGE: &str = "Ubuntu20";
pub const ATTACKER_IMAGE: &str = "Kali";
pub const DEFAULT_FLAVOR: &str = "m1.small";

const MANAGE_CIDR: [u8; 3] = [192, 168, 198];
const ATTACKER_CIDR: [u8; 3] = [192, 168, 199];
const INFRA_HOST_OCTET: u8 = 14;
const FIRST_HOST_OCTET: u8 = 10;
const LAST_HOST_OCTET: u8 = 250;
const MAX_RING_SEGMENTS: usize = 200;
const DNS_SERVERS: [Ipv4Addr; 2] = [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)];

/// Closed set of environment shapes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Star,
    Dumbbell,
    Ring,
    Enterprise,
}

impl EnvironmentType {
    pub const ALL: [EnvironmentType; 4] = [
        EnvironmentType::Star,
        EnvironmentType::Dumbbell,
        EnvironmentType::Ring,
        EnvironmentType::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Star => "star",
            EnvironmentType::Dumbbell => "dumbbell",
            EnvironmentType::Ring => "ring",
            EnvironmentType::Enterprise => "enterprise",
        }
    }

    /// Build the topology for this shape.
    pub fn topology(&self, scale: &Scale) -> SpecResult<Topology> {
        scale.check()?;
        let builder = match self {
            EnvironmentType::Star => star(scale),
            EnvironmentType::Dumbbell => dumbbell(scale),
            EnvironmentType::Ring => ring(scale),
            EnvironmentType::Enterprise => enterprise(scale)?,
        };
        Ok(builder.build()?)
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvironmentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| SpecError::UnknownEnvironment(s.to_string()))
    }
}

/// Host counts per role plus the ring segment count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    counts: BTreeMap<HostRole, usize>,
    pub ring_segments: usize,
}

impl Default for Scale {
    fn default() -> Self {
        let counts = BTreeMap::from([
            (HostRole::Management, 1),
            (HostRole::Attacker, 1),
            (HostRole::Webserver, 2),
            (HostRole::Database, 1),
            (HostRole::Employee, 2),
        ]);
        Self {
            counts,
            ring_segments: 4,
        }
    }
}

impl Scale {
    pub fn with(mut self, role: HostRole, count: usize) -> Self {
        self.counts.insert(role, count);
        self
    }

    pub fn segments(mut self, segments: usize) -> Self {
        self.ring_segments = segments;
        self
    }

    pub fn count(&self, role: HostRole) -> usize {
        self.counts.get(&role).copied().unwrap_or(0)
    }

    /// Apply one `role=count` (or `segments=N`) override.
    pub fn apply(mut self, entry: &str) -> SpecResult<Self> {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| SpecError::InvalidScale(format!("expected role=count, got '{}'", entry)))?;
        let count: usize = value
            .trim()
            .parse()
            .map_err(|_| SpecError::InvalidScale(format!("'{}' is not a count", value)))?;

        if key.trim() == "segments" {
            return Ok(self.segments(count));
        }
        let role: HostRole = key.parse()?;
        self.counts.insert(role, count);
        Ok(self)
    }

    /// Parse a list of overrides on top of the defaults.
    pub fn parse_all<I, S>(entries: I) -> SpecResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entries
            .into_iter()
            .try_fold(Scale::default(), |scale, entry| scale.apply(entry.as_ref()))
    }

    fn check(&self) -> SpecResult<()> {
        for role in [HostRole::Management, HostRole::Attacker] {
            if self.count(role) != 1 {
                return Err(SpecError::InvalidScale(format!(
                    "exactly one {} host is required, got {}",
                    role,
                    self.count(role)
                )));
            }
        }
        if self.ring_segments == 0 || self.ring_segments > MAX_RING_SEGMENTS {
            return Err(SpecError::InvalidScale(format!(
                "ring segments must be between 1 and {}, got {}",
                MAX_RING_SEGMENTS, self.ring_segments
            )));
        }
        Ok(())
    }
}

fn cidr(octets: [u8; 3]) -> IpNet {
    let addr = Ipv4Addr::new(octets[0], octets[1], octets[2], 0);
    // A /24 prefix is always accepted.
    IpNet::V4(Ipv4Net::new(addr, 24).unwrap_or_default())
}

fn lan_cidr(third_octet: u8) -> IpNet {
    cidr([10, 0, third_octet])
}

fn host_ip(octets: [u8; 3], last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], last))
}

fn network(name: &str, cidr: IpNet) -> Network {
    Network::new(name, cidr).with_dns(DNS_SERVERS.map(IpAddr::V4))
}

/// A role host; its network is assigned by the layout.
fn role_host(role: HostRole, index: usize) -> Host {
    Host::new(
        format!("{}_{}", role, index + 1),
        role,
        "",
        DEFAULT_IMAGE,
        DEFAULT_FLAVOR,
    )
    .security_group(TALK_TO_MANAGE)
}

/// Management and attacker networks, their hosts and shared groups.
fn infrastructure() -> TopologyBuilder {
    let manage_cidr = cidr(MANAGE_CIDR);
    let anywhere: IpNet = IpNet::V4(Ipv4Net::default());

    Topology::builder()
        .network(network(MANAGE_NETWORK, manage_cidr))
        .network(network(ATTACKER_NETWORK, cidr(ATTACKER_CIDR)))
        .security_group(TALK_TO_MANAGE, [SecurityRule::allow_tcp_from(22, manage_cidr)])
        .security_group(MANAGE_FREEDOM, [SecurityRule::allow_all_from(anywhere)])
        .security_group(ATTACKER_FREEDOM, [SecurityRule::allow_all_from(anywhere)])
        .host(
            Host::new(
                MANAGE_HOST,
                HostRole::Management,
                MANAGE_NETWORK,
                DEFAULT_IMAGE,
                DEFAULT_FLAVOR,
            )
            .fixed_ip(host_ip(MANAGE_CIDR, INFRA_HOST_OCTET))
            .security_group(MANAGE_FREEDOM)
            .floating_ip(),
        )
        .host(
            Host::new(
                ATTACKER_HOST,
                HostRole::Attacker,
                ATTACKER_NETWORK,
                ATTACKER_IMAGE,
                DEFAULT_FLAVOR,
            )
            .fixed_ip(host_ip(ATTACKER_CIDR, INFRA_HOST_OCTET))
            .security_group(ATTACKER_FREEDOM)
            .security_group(TALK_TO_MANAGE),
        )
        .router_link(MANAGE_NETWORK)
        .router_link(ATTACKER_NETWORK)
}

/// A LAN for a group of hosts with its own security group. Skipped when empty.
fn lan(
    builder: TopologyBuilder,
    name: &str,
    third_octet: u8,
    open: bool,
    hosts: Vec<Host>,
) -> TopologyBuilder {
    if hosts.is_empty() {
        return builder;
    }
    let cidr = lan_cidr(third_octet);
    let network_name = format!("{}_network", name);
    let (group, rule) = if open {
        (
            format!("{}_open", name),
            SecurityRule::allow_all_from(IpNet::V4(Ipv4Net::default())),
        )
    } else {
        (format!("{}_local", name), SecurityRule::allow_all_from(cidr))
    };

    let mut builder = builder
        .network(network(&network_name, cidr))
        .security_group(group.clone(), [rule])
        .router_link(network_name.clone());
    for mut host in hosts {
        host.network_ref = network_name.clone();
        builder = builder.host(host.security_group(group.clone()));
    }
    builder
}

fn hosts_of(scale: &Scale, role: HostRole) -> Vec<Host> {
    (0..scale.count(role))
        .map(|i| role_host(role, i))
        .collect()
}

fn star(scale: &Scale) -> TopologyBuilder {
    let builder = infrastructure();
    let builder = lan(builder, "webserver", 1, true, hosts_of(scale, HostRole::Webserver));
    let builder = lan(builder, "database", 2, false, hosts_of(scale, HostRole::Database));
    lan(builder, "employee", 3, false, hosts_of(scale, HostRole::Employee))
}

fn dumbbell(scale: &Scale) -> TopologyBuilder {
    let builder = infrastructure();
    let builder = lan(builder, "left", 1, true, hosts_of(scale, HostRole::Webserver));
    let mut right = hosts_of(scale, HostRole::Database);
    right.extend(hosts_of(scale, HostRole::Employee));
    lan(builder, "right", 2, false, right)
}

fn ring(scale: &Scale) -> TopologyBuilder {
    let segments = scale.ring_segments;
    let segment_cidr = |i: usize| lan_cidr((i + 1) as u8);
    let mut builder = infrastructure();

    for i in 0..segments {
        let name = format!("ring_{}", i);
        let network_name = format!("{}_network", name);
        let mut neighbours = vec![i, (i + segments - 1) % segments, (i + 1) % segments];
        neighbours.sort_unstable();
        neighbours.dedup();

        builder = builder
            .network(network(&network_name, segment_cidr(i)))
            .security_group(
                name,
                neighbours
                    .into_iter()
                    .map(|n| SecurityRule::allow_all_from(segment_cidr(n))),
            )
            .router_link(network_name);
    }

    let placed = [HostRole::Webserver, HostRole::Database, HostRole::Employee]
        .into_iter()
        .flat_map(|role| hosts_of(scale, role));
    for (i, mut host) in placed.enumerate() {
        let segment = i % segments;
        host.network_ref = format!("ring_{}_network", segment);
        builder = builder.host(host.security_group(format!("ring_{}", segment)));
    }
    builder
}

fn enterprise(scale: &Scale) -> SpecResult<TopologyBuilder> {
    let databases = hosts_of(scale, HostRole::Database);
    let (branch_three, branch_four): (Vec<_>, Vec<_>) = databases
        .into_iter()
        .enumerate()
        .partition(|(i, _)| i % 2 == 0);

    let branches = [
        ("branch_one", 1u8, true, hosts_of(scale, HostRole::Webserver)),
        ("branch_two", 2, false, hosts_of(scale, HostRole::Employee)),
        ("branch_three", 3, false, branch_three.into_iter().map(|(_, h)| h).collect()),
        ("branch_four", 4, false, branch_four.into_iter().map(|(_, h)| h).collect()),
    ];

    let mut builder = infrastructure();
    for (name, octet, open, hosts) in branches {
        let mut addressed = Vec::with_capacity(hosts.len());
        for (i, host) in hosts.into_iter().enumerate() {
            let last = usize::from(FIRST_HOST_OCTET) + i;
            if last > usize::from(LAST_HOST_OCTET) {
                return Err(SpecError::AddressExhausted {
                    network: format!("{}_network", name),
                    host: host.name,
                });
            }
            addressed.push(host.fixed_ip(host_ip([10, 0, octet], last as u8)));
        }
        builder = lan(builder, name, octet, open, addressed);
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_builds_with_defaults() {
        for env in EnvironmentType::ALL {
            let topology = env.topology(&Scale::default()).unwrap();
            let manage = topology.management_host().unwrap();
            assert_eq!(manage.fixed_ip, Some("192.168.198.14".parse().unwrap()));
            assert!(manage.floating_ip);
            assert_eq!(
                topology.host(ATTACKER_HOST).unwrap().fixed_ip,
                Some("192.168.199.14".parse().unwrap())
            );
            assert_eq!(topology.hosts.len(), 7, "{}", env);
        }
    }

    #[test]
    fn test_star_skips_empty_groups() {
        let scale = Scale::default()
            .with(HostRole::Webserver, 3)
            .with(HostRole::Database, 2)
            .with(HostRole::Employee, 0);
        let topology = EnvironmentType::Star.topology(&scale).unwrap();

        let names: Vec<_> = topology.networks.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            vec![MANAGE_NETWORK, ATTACKER_NETWORK, "webserver_network", "database_network"]
        );
        assert_eq!(topology.router_links.len(), 4);
        assert!(topology.security_rules.contains_key("webserver_open"));
        assert!(topology.security_rules.contains_key("database_local"));
    }

    #[test]
    fn test_dumbbell_right_lan_holds_databases_and_employees() {
        let topology = EnvironmentType::Dumbbell.topology(&Scale::default()).unwrap();
        let right: Vec<_> = topology
            .hosts
            .iter()
            .filter(|h| h.network_ref == "right_network")
            .map(|h| h.role)
            .collect();
        assert_eq!(
            right,
            vec![HostRole::Database, HostRole::Employee, HostRole::Employee]
        );
    }

    #[test]
    fn test_ring_neighbour_rules() {
        let topology = EnvironmentType::Ring
            .topology(&Scale::default().segments(4))
            .unwrap();
        let rules = &topology.security_rules["ring_0"];
        let remotes: Vec<_> = rules.iter().map(|r| r.remote_cidr.to_string()).collect();
        assert_eq!(remotes, vec!["10.0.1.0/24", "10.0.2.0/24", "10.0.4.0/24"]);

        // Hosts placed round-robin over the segments.
        let first = topology.host("webserver_1").unwrap();
        let second = topology.host("webserver_2").unwrap();
        assert_eq!(first.network_ref, "ring_0_network");
        assert_eq!(second.network_ref, "ring_1_network");
    }

    #[test]
    fn test_single_segment_ring_admits_itself_once() {
        let topology = EnvironmentType::Ring
            .topology(&Scale::default().segments(1))
            .unwrap();
        assert_eq!(topology.security_rules["ring_0"].len(), 1);
    }

    #[test]
    fn test_enterprise_branches() {
        let scale = Scale::default().with(HostRole::Database, 3);
        let topology = EnvironmentType::Enterprise.topology(&scale).unwrap();

        let branch_one = topology.network("branch_one_network").unwrap();
        assert_eq!(branch_one.cidr.to_string(), "10.0.1.0/24");
        assert_eq!(
            topology.host("database_2").unwrap().network_ref,
            "branch_four_network"
        );
        assert_eq!(
            topology.host("database_3").unwrap().fixed_ip,
            Some("10.0.3.11".parse().unwrap())
        );
    }

    #[test]
    fn test_scale_parsing() {
        let scale = Scale::parse_all(["webserver=3", "databases=2", "segments=6"]).unwrap();
        assert_eq!(scale.count(HostRole::Webserver), 3);
        assert_eq!(scale.count(HostRole::Database), 2);
        assert_eq!(scale.ring_segments, 6);

        assert!(Scale::parse_all(["webserver"]).is_err());
        assert!(Scale::parse_all(["webserver=many"]).is_err());

        let err = EnvironmentType::Star
            .topology(&Scale::default().with(HostRole::Management, 2))
            .unwrap_err();
        assert!(matches!(err, SpecError::InvalidScale(_)));
    }

    #[test]
    fn test_environment_type_parse() {
        assert_eq!("Ring".parse::<EnvironmentType>().unwrap(), EnvironmentType::Ring);
        assert!("mesh".parse::<EnvironmentType>().is_err());
    }
}
