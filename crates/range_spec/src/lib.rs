//! # range_spec
//!
//! Topology specification and environment state models for the range
//! orchestrator.
//!
//! ## Features
//!
//! - **Topology**: networks, hosts, security rules and router links as data
//! - **Validation**: every broken invariant reported in one error
//! - **Environment types**: star, dumbbell, ring and enterprise layouts
//! - **Jobs**: per-host configuration actions for each phase
//! - **Records**: the persisted environment record and its stages
//!
//! ## Example
//!
//! ```rust
//! use range_spec::{EnvironmentType, HostJob, Scale};
//!
//! let topology = EnvironmentType::Star.topology(&Scale::default()).unwrap();
//! let jobs: Vec<HostJob> = topology.hosts.iter().map(HostJob::for_host).collect();
//! assert_eq!(jobs.len(), topology.hosts.len());
//! ```

pub mod environments;
pub mod error;
pub mod jobs;
pub mod models;
pub mod reader;
pub mod record;
pub mod validator;

pub use environments::{EnvironmentType, Scale};
pub use error::{InvalidTopologyError, SpecError, SpecResult, TopologyViolation};
pub use jobs::{ConfigAction, ConfigPhase, HostJob};
pub use models::*;
pub use reader::TopologyReader;
pub use record::{
    floating_ip_resource, host_resource, EnvironmentRecord, JobStatus, ResourceRecord, ResourceStatus, Stage, Tier,
};
pub use validator::{TopologyValidator, ValidationResult};
