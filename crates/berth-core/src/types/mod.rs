//! Shared core types used across configuration, registry and platforms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment target categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformType {
    /// Managed cloud services (ECS, RDS, S3 and friends).
    #[serde(alias = "aws")]
    ManagedCloud,
    /// Local container runtime (docker or podman).
    Container,
    /// Plain OS processes.
    #[serde(alias = "posix")]
    Process,
    /// Services managed elsewhere that we only reference.
    External,
    /// In-memory platform for tests.
    Mock,
}

impl PlatformType {
    pub const ALL: [PlatformType; 5] = [
        PlatformType::ManagedCloud,
        PlatformType::Container,
        PlatformType::Process,
        PlatformType::External,
        PlatformType::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::ManagedCloud => "managed-cloud",
            PlatformType::Container => "container",
            PlatformType::Process => "process",
            PlatformType::External => "external",
            PlatformType::Mock => "mock",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "managed-cloud" | "aws" => Ok(PlatformType::ManagedCloud),
            "container" => Ok(PlatformType::Container),
            "process" | "posix" => Ok(PlatformType::Process),
            "external" => Ok(PlatformType::External),
            "mock" => Ok(PlatformType::Mock),
            other => Err(format!(
                "unknown platform type '{other}' (expected one of: managed-cloud, container, process, external, mock)"
            )),
        }
    }
}

/// Kind of workload a service represents. Handler lookup is keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Frontend,
    Backend,
    Database,
    Graph,
    Inference,
    Proxy,
    Filesystem,
    Worker,
    Generic,
}

impl ServiceType {
    pub const ALL: [ServiceType; 9] = [
        ServiceType::Frontend,
        ServiceType::Backend,
        ServiceType::Database,
        ServiceType::Graph,
        ServiceType::Inference,
        ServiceType::Proxy,
        ServiceType::Filesystem,
        ServiceType::Worker,
        ServiceType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Frontend => "frontend",
            ServiceType::Backend => "backend",
            ServiceType::Database => "database",
            ServiceType::Graph => "graph",
            ServiceType::Inference => "inference",
            ServiceType::Proxy => "proxy",
            ServiceType::Filesystem => "filesystem",
            ServiceType::Worker => "worker",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown service type '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_type_serialization() {
        let json = serde_json::to_string(&PlatformType::ManagedCloud)
            .expect("PlatformType serialization should succeed");
        assert_eq!(json, "\"managed-cloud\"");

        let legacy: PlatformType =
            serde_json::from_str("\"posix\"").expect("legacy alias should parse");
        assert_eq!(legacy, PlatformType::Process);
    }

    #[test]
    fn test_platform_type_from_str() {
        assert_eq!("aws".parse::<PlatformType>(), Ok(PlatformType::ManagedCloud));
        assert_eq!(" Container ".parse::<PlatformType>(), Ok(PlatformType::Container));
        assert!("kubernetes".parse::<PlatformType>().is_err());
    }

    #[test]
    fn test_service_type_round_trips_through_str() {
        for service_type in ServiceType::ALL {
            assert_eq!(service_type.as_str().parse::<ServiceType>(), Ok(service_type));
        }
        assert!("mainframe".parse::<ServiceType>().is_err());
    }
}
