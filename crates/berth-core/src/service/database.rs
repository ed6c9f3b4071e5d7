//! Primary relational datastore.

use crate::requirements::{ServiceRequirements, presets};

use super::{Service, ServiceBase};

pub const DATABASE_PORT: u16 = 5432;

#[derive(Debug, Clone)]
pub struct DatabaseService {
    base: ServiceBase,
}

impl DatabaseService {
    pub fn new(base: ServiceBase) -> Self {
        Self { base }
    }

    pub fn database_name(&self) -> String {
        self.config()
            .environment
            .get("POSTGRES_DB")
            .cloned()
            .unwrap_or_else(|| format!("{}_{}", self.project(), self.environment()).replace('-', "_"))
    }
}

impl Service for DatabaseService {
    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn default_requirements(&self) -> ServiceRequirements {
        let mut requirements = presets::database(DATABASE_PORT, "10Gi");
        if let Some(storage) = requirements.storage.first_mut() {
            storage.mount_path = Some("/var/lib/postgresql/data".to_string());
        }
        requirements
            .environment
            .insert("POSTGRES_DB".to_string(), self.database_name());
        requirements
            .annotations
            .insert("command/supports-backup".to_string(), "true".to_string());
        requirements
            .annotations
            .insert("command/supports-restore".to_string(), "true".to_string());
        requirements
    }

    fn default_image(&self) -> Option<&'static str> {
        Some("postgres:16-alpine")
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServiceConfig;
    use crate::service::test_support::service_with;
    use crate::types::{PlatformType, ServiceType};

    #[test]
    fn test_database_defaults() {
        let service = service_with(
            "database",
            PlatformType::Container,
            ServiceConfig::on(PlatformType::Container).of_type(ServiceType::Database),
        );
        assert_eq!(service.port(), Some(5432));
        assert_eq!(service.image().as_deref(), Some("postgres:16-alpine"));
        assert_eq!(service.environment_variables()["POSTGRES_DB"], "acme_test");
        assert!(service.supports("backup"));
        assert!(service.supports("restore"));
        let requirements = service.requirements();
        assert_eq!(
            requirements.storage[0].mount_path.as_deref(),
            Some("/var/lib/postgresql/data")
        );
    }
}
