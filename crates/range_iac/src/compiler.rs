//! Topology to artifact compilation.

use tracing::debug;

use range_spec::{HostJob, Topology, TopologyValidator};

use crate::artifact::{Artifact, CompiledEnvironment};
use crate::error::{IacError, IacResult};

/// Compiles a topology into ordered artifacts and host jobs.
///
/// Output order: networks, security groups, the router, compute instances,
/// floating IPs. Within a tier, declaration order is kept (security groups
/// are ordered by name). Compilation performs no I/O.
pub struct ArtifactCompiler;

impl ArtifactCompiler {
    pub fn compile(topology: &Topology) -> IacResult<CompiledEnvironment> {
        TopologyValidator::validate(topology)
            .into_result()
            .map_err(IacError::Compilation)?;

        let mut artifacts = Vec::new();

        artifacts.extend(topology.networks.iter().map(Artifact::network));
        artifacts.extend(
            topology
                .security_rules
                .iter()
                .map(|(group, rules)| Artifact::security_group(group, rules)),
        );
        artifacts.push(Artifact::router(
            topology
                .networks
                .iter()
                .filter(|n| topology.router_links.contains(&n.name))
                .map(|n| n.name.clone()),
        ));
        artifacts.extend(topology.hosts.iter().map(Artifact::compute));
        artifacts.extend(
            topology
                .hosts
                .iter()
                .filter(|h| h.floating_ip)
                .map(|h| Artifact::floating_ip(&h.name)),
        );

        let jobs = topology.hosts.iter().map(HostJob::for_host).collect();

        debug!("Compiled {} artifacts", artifacts.len());
        Ok(CompiledEnvironment { artifacts, jobs })
    }
}
