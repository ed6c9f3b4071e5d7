//! Graph database.

use crate::requirements::{
    NetworkRequirement, ResourceRequirement, ServiceRequirements, StorageRequirement,
};

use super::{Service, ServiceBase};

pub const GRAPH_HTTP_PORT: u16 = 7474;
pub const GRAPH_BOLT_PORT: u16 = 7687;

#[derive(Debug, Clone)]
pub struct GraphService {
    base: ServiceBase,
}

impl GraphService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }
}

impl Service for GraphService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        let mut requirements = ServiceRequirements {
            storage: vec![StorageRequirement {
                persistent: Some(true),
                size: Some("5Gi".to_string()),
                mount_path: Some("/data".to_string()),
                backup: Some(true),
            }],
            network: Some(NetworkRequirement {
                ports: vec![GRAPH_HTTP_PORT, GRAPH_BOLT_PORT],
                protocol: Some("tcp".to_string()),
                needs_load_balancer: Some(false),
                health_check_path: Some("/".to_string()),
                health_check_port: Some(GRAPH_HTTP_PORT),
                health_check_interval: Some(30),
            }),
            resources: Some(ResourceRequirement {
                memory: Some("2Gi".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        requirements
            .annotations
            .insert("command/supports-backup".to_string(), "true".to_string());
        requirements
    }

    fn default_image(&self) -> Option<&'static str> {
        Some("neo4j:5")
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServiceConfig;
    use crate::service::test_support::service_with;
    use crate::types::{PlatformType, ServiceType};

    #[test]
    fn test_graph_exposes_both_ports() {
        let service = service_with(
            "graph",
            PlatformType::Container,
            ServiceConfig::on(PlatformType::Container).of_type(ServiceType::Graph),
        );
        assert_eq!(service.requirements().ports(), &[7474, 7687]);
        assert_eq!(service.port(), Some(7474));
    }
}
