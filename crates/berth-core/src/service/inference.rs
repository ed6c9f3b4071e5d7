//! Inference gateway fronting model providers.

use crate::requirements::{ResourceRequirement, ServiceRequirements, presets};

use super::{Service, ServiceBase};

pub const INFERENCE_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct InferenceService {
    base: ServiceBase,
}

impl InferenceService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }
}

impl Service for InferenceService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        let mut requirements = presets::stateless_api(INFERENCE_PORT);
        requirements.resources = Some(ResourceRequirement {
            cpu: Some("2".to_string()),
            memory: Some("4Gi".to_string()),
            replicas: Some(1),
        });
        requirements
    }
}
