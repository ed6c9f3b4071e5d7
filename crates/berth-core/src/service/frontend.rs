//! Frontend asset server.

use crate::requirements::{BuildRequirement, ServiceRequirements, presets};

use super::{Service, ServiceBase};

pub const FRONTEND_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct FrontendService {
    base: ServiceBase,
}

impl FrontendService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }
}

impl Service for FrontendService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        let mut requirements = presets::static_site(FRONTEND_PORT);
        requirements.build = Some(BuildRequirement {
            dockerfile: Some("Dockerfile".to_string()),
            build_context: Some(".".to_string()),
            ..Default::default()
        });
        for command in ["publish", "update", "test"] {
            requirements
                .annotations
                .insert(format!("command/supports-{command}"), "true".to_string());
        }
        requirements
    }
}
