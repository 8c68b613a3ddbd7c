//! Topology file reading.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{SpecError, SpecResult};
use crate::models::Topology;
use crate::validator::TopologyValidator;

/// Reader for YAML topology files.
pub struct TopologyReader;

impl TopologyReader {
    /// Read and validate a topology file.
    pub fn read_file(path: impl AsRef<Path>) -> SpecResult<Topology> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SpecError::NotFound(path.to_path_buf()));
        }
        debug!("Reading topology from {:?}", path);

        let content = fs::read_to_string(path)?;
        let topology: Topology =
            serde_yaml::from_str(&content).map_err(|e| SpecError::InvalidFormat {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Self::check(topology)
    }

    /// Parse and validate a topology from YAML text.
    pub fn from_yaml(content: &str) -> SpecResult<Topology> {
        let topology: Topology = serde_yaml::from_str(content)?;
        Self::check(topology)
    }

    fn check(topology: Topology) -> SpecResult<Topology> {
        let result = TopologyValidator::validate(&topology);
        for warning in &result.warnings {
            warn!("{}", warning);
        }
        result.into_result()?;
        Ok(topology)
    }
}
