//! Substrates a range can be deployed on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where resources are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Substrate {
    #[default]
    OpenStack,
    /// Local containers standing in for instances; no cloud API
    Docker,
}

impl Substrate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Substrate::OpenStack => "openstack",
            Substrate::Docker => "docker",
        }
    }

    /// Terraform provider local name.
    pub fn provider_name(&self) -> &'static str {
        self.as_str()
    }

    /// Registry source of the Terraform provider.
    pub fn provider_source(&self) -> &'static str {
        match self {
            Substrate::OpenStack => "terraform-provider-openstack/openstack",
            Substrate::Docker => "kreuzwerker/docker",
        }
    }

    pub fn provider_version(&self) -> &'static str {
        match self {
            Substrate::OpenStack => "~> 1.53",
            Substrate::Docker => "~> 3.0",
        }
    }

    /// Whether keypairs, images and snapshots can be managed.
    pub fn has_cloud_api(&self) -> bool {
        matches!(self, Substrate::OpenStack)
    }
}

impl fmt::Display for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substrate_from_settings() {
        #[derive(Deserialize)]
        struct Wrapper {
            substrate: Substrate,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"substrate": "docker"}"#).unwrap();
        assert_eq!(parsed.substrate, Substrate::Docker);
        assert!(!parsed.substrate.has_cloud_api());
        assert!(Substrate::default().has_cloud_api());
    }
}
