//! Error types for topology loading and validation.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;
use thiserror::Error;

/// Result type alias for spec operations.
pub type SpecResult<T> = Result<T, SpecError>;

/// Errors that can occur while building or loading topologies.
#[derive(Error, Debug)]
pub enum SpecError {
    #[error(transparent)]
    InvalidTopology(#[from] InvalidTopologyError),

    #[error("Topology file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid topology file {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },

    #[error("Invalid scale: {0}")]
    InvalidScale(String),

    #[error("Unknown environment type: {0}")]
    UnknownEnvironment(String),

    #[error("Address space exhausted in {network} for host {host}")]
    AddressExhausted { network: String, host: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single broken topology invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyViolation {
    InvalidName { kind: &'static str, name: String },
    DuplicateNetwork(String),
    DuplicateHost(String),
    IpVersionMismatch { network: String, ip_version: u8, cidr: IpNet },
    CidrOverlap { network: String, other: String },
    UnknownNetwork { host: String, network: String },
    UnknownSecurityGroup { host: String, group: String },
    FixedIpOutsideCidr { host: String, ip: IpAddr, cidr: IpNet },
    DuplicateFixedIp { network: String, ip: IpAddr, hosts: (String, String) },
    InvalidPortRange { group: String, min: u32, max: u32 },
    UnknownRouterLink(String),
}

impl fmt::Display for TopologyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { kind, name } => write!(f, "invalid {} name '{}'", kind, name),
            Self::DuplicateNetwork(name) => write!(f, "network '{}' is declared twice", name),
            Self::DuplicateHost(name) => write!(f, "host '{}' is declared twice", name),
            Self::IpVersionMismatch {
                network,
                ip_version,
                cidr,
            } => write!(
                f,
                "network '{}' declares ip_version {} but its CIDR is {}",
                network, ip_version, cidr
            ),
            Self::CidrOverlap { network, other } => {
                write!(f, "network '{}' overlaps network '{}'", network, other)
            }
            Self::UnknownNetwork { host, network } => write!(
                f,
                "host '{}' references undeclared network '{}'",
                host, network
            ),
            Self::UnknownSecurityGroup { host, group } => write!(
                f,
                "host '{}' references undeclared security group '{}'",
                host, group
            ),
            Self::FixedIpOutsideCidr { host, ip, cidr } => {
                write!(f, "fixed IP {} of host '{}' is outside {}", ip, host, cidr)
            }
            Self::DuplicateFixedIp { network, ip, hosts } => write!(
                f,
                "hosts '{}' and '{}' share fixed IP {} in network '{}'",
                hosts.0, hosts.1, ip, network
            ),
            Self::InvalidPortRange { group, min, max } => write!(
                f,
                "security group '{}' has invalid port range {}-{}",
                group, min, max
            ),
            Self::UnknownRouterLink(network) => {
                write!(f, "router link names undeclared network '{}'", network)
            }
        }
    }
}

/// Every invariant violation found in one topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct InvalidTopologyError {
    pub violations: Vec<TopologyViolation>,
}

impl fmt::Display for InvalidTopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid topology ({} violation(s))", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}
