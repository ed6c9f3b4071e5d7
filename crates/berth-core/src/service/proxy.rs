//! Reverse proxy in front of the web services.

use crate::requirements::{NetworkRequirement, ServiceRequirements};

use super::{Service, ServiceBase};

pub const PROXY_PORT: u16 = 8080;
pub const PROXY_ADMIN_PORT: u16 = 9901;

#[derive(Debug, Clone)]
pub struct ProxyService {
    base: ServiceBase,
}

impl ProxyService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }
}

impl Service for ProxyService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        ServiceRequirements {
            network: Some(NetworkRequirement {
                ports: vec![PROXY_PORT, PROXY_ADMIN_PORT],
                protocol: Some("http".to_string()),
                needs_load_balancer: Some(true),
                health_check_path: Some("/ready".to_string()),
                health_check_port: Some(PROXY_ADMIN_PORT),
                health_check_interval: Some(15),
            }),
            ..Default::default()
        }
    }

    fn default_image(&self) -> Option<&'static str> {
        Some("envoyproxy/envoy:v1.30-latest")
    }
}
