//! Fallback for services without a specialised kind.
//!
//! Everything comes from the declared requirements and annotations, which is
//! what lets new services be added without touching the factory.

use crate::requirements::{ServiceRequirements, presets};

use super::{Service, ServiceBase};

#[derive(Debug, Clone)]
pub struct GenericService {
    base: ServiceBase,
    baseline: ServiceRequirements,
}

impl GenericService {
    pub fn new(base: ServiceBase) -> Self {
        Self {
            base,
            baseline: ServiceRequirements::default(),
        }
    }

    /// Background worker: no ports, small resource footprint.
    pub fn worker(base: ServiceBase) -> Self {
        Self {
            base,
            baseline: presets::worker(),
        }
    }
}

impl Service for GenericService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        self.baseline.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServiceConfig;
    use crate::service::test_support::service_with;
    use crate::types::{PlatformType, ServiceType};

    #[test]
    fn test_generic_uses_only_declared_values() {
        let mut config = ServiceConfig::on(PlatformType::Process)
            .with_annotation("command/supports-exec", "true");
        config.command = Some("./run-worker.sh".to_string());
        let service = service_with("mcp", PlatformType::Process, config);

        assert_eq!(service.service_type(), ServiceType::Generic);
        assert!(service.port().is_none());
        assert!(service.image().is_none());
        assert!(service.supports("exec"));
        assert_eq!(service.command_line(), Some("./run-worker.sh"));
    }

    #[test]
    fn test_worker_gets_resource_baseline() {
        let service = service_with(
            "jobs",
            PlatformType::Process,
            ServiceConfig::on(PlatformType::Process).of_type(ServiceType::Worker),
        );
        let resources = service.requirements().resources.expect("worker resources");
        assert_eq!(resources.memory.as_deref(), Some("256Mi"));
        assert!(service.port().is_none());
    }
}
