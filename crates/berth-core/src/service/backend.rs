//! Backend API server.

use crate::requirements::{BuildRequirement, ServiceRequirements, presets};

use super::{Service, ServiceBase};

pub const BACKEND_PORT: u16 = 4000;

#[derive(Debug, Clone)]
pub struct BackendService {
    base: ServiceBase,
}

impl BackendService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }
}

impl Service for BackendService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        let mut requirements = presets::stateless_api(BACKEND_PORT);
        if let Some(network) = requirements.network.as_mut() {
            network.health_check_path = Some("/api/health".to_string());
        }
        requirements.build = Some(BuildRequirement {
            dockerfile: Some("Dockerfile".to_string()),
            build_context: Some(".".to_string()),
            ..Default::default()
        });
        requirements
            .environment
            .insert("PORT".to_string(), BACKEND_PORT.to_string());
        for command in ["publish", "update", "test"] {
            requirements
                .annotations
                .insert(format!("command/supports-{command}"), "true".to_string());
        }
        requirements
    }
}
