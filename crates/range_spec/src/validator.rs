//! Topology validation.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{InvalidTopologyError, TopologyViolation};
use crate::models::{cidrs_overlap, ip_version_of, Topology};

/// Names become Terraform addresses and cloud resource names.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,62}$").expect("name pattern"));

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<TopologyViolation>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, violation: TopologyViolation) {
        self.valid = false;
        self.errors.push(violation);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn into_result(self) -> Result<(), InvalidTopologyError> {
        if self.valid {
            Ok(())
        } else {
            Err(InvalidTopologyError {
                violations: self.errors,
            })
        }
    }
}

/// Validator for topology specifications.
pub struct TopologyValidator;

impl TopologyValidator {
    /// Check every invariant and collect all violations.
    pub fn validate(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.merge(Self::validate_names(topology));
        result.merge(Self::validate_networks(topology));
        result.merge(Self::validate_hosts(topology));
        result.merge(Self::validate_rules(topology));
        result.merge(Self::validate_router_links(topology));

        result
    }

    pub fn validate_names(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();

        let named = topology
            .networks
            .iter()
            .map(|n| ("network", &n.name))
            .chain(topology.hosts.iter().map(|h| ("host", &h.name)))
            .chain(topology.security_rules.keys().map(|g| ("security group", g)));

        for (kind, name) in named {
            if !NAME_RE.is_match(name) {
                result.add_error(TopologyViolation::InvalidName {
                    kind,
                    name: name.clone(),
                });
            }
        }

        result
    }

    /// Unique names, matching IP versions, non-overlapping CIDRs.
    pub fn validate_networks(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut seen = BTreeSet::new();

        for (i, network) in topology.networks.iter().enumerate() {
            if !seen.insert(network.name.as_str()) {
                result.add_error(TopologyViolation::DuplicateNetwork(network.name.clone()));
            }

            if network.ip_version != ip_version_of(&network.cidr) {
                result.add_error(TopologyViolation::IpVersionMismatch {
                    network: network.name.clone(),
                    ip_version: network.ip_version,
                    cidr: network.cidr,
                });
            }

            for other in &topology.networks[..i] {
                if cidrs_overlap(&network.cidr, &other.cidr) {
                    result.add_error(TopologyViolation::CidrOverlap {
                        network: network.name.clone(),
                        other: other.name.clone(),
                    });
                }
            }

            if network.dns_servers.is_empty() {
                result.add_warning(format!("Network '{}' has no DNS servers", network.name));
            }
        }

        result
    }

    /// Host references resolve and fixed IPs are in range and unique.
    pub fn validate_hosts(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut seen = BTreeSet::new();
        let mut fixed: BTreeMap<(&str, IpAddr), &str> = BTreeMap::new();

        for host in &topology.hosts {
            if !seen.insert(host.name.as_str()) {
                result.add_error(TopologyViolation::DuplicateHost(host.name.clone()));
            }

            for group in &host.security_groups {
                if !topology.security_rules.contains_key(group) {
                    result.add_error(TopologyViolation::UnknownSecurityGroup {
                        host: host.name.clone(),
                        group: group.clone(),
                    });
                }
            }

            let Some(network) = topology.network(&host.network_ref) else {
                result.add_error(TopologyViolation::UnknownNetwork {
                    host: host.name.clone(),
                    network: host.network_ref.clone(),
                });
                continue;
            };

            if let Some(ip) = host.fixed_ip {
                if !network.cidr.contains(&ip) {
                    result.add_error(TopologyViolation::FixedIpOutsideCidr {
                        host: host.name.clone(),
                        ip,
                        cidr: network.cidr,
                    });
                } else if let Some(first) = fixed.insert((network.name.as_str(), ip), &host.name) {
                    result.add_error(TopologyViolation::DuplicateFixedIp {
                        network: network.name.clone(),
                        ip,
                        hosts: (first.to_string(), host.name.clone()),
                    });
                }
            }
        }

        result
    }

    /// Port bounds lie in 1-65535 with min <= max.
    pub fn validate_rules(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();

        for (group, rules) in &topology.security_rules {
            for range in rules.iter().filter_map(|r| r.port_range) {
                if !range.is_valid() {
                    result.add_error(TopologyViolation::InvalidPortRange {
                        group: group.clone(),
                        min: range.min,
                        max: range.max,
                    });
                }
            }
        }

        result
    }

    pub fn validate_router_links(topology: &Topology) -> ValidationResult {
        let mut result = ValidationResult::new();

        for link in &topology.router_links {
            if topology.network(link).is_none() {
                result.add_error(TopologyViolation::UnknownRouterLink(link.clone()));
            }
        }

        result
    }
}
