//! Builds the service kind matching a resolved config.

use std::sync::Arc;

use tracing::debug;

use crate::config::{EnvironmentConfig, ServiceConfig};
use crate::context::AppContext;
use crate::types::{PlatformType, ServiceType};

use super::{
    BackendService, DatabaseService, FrontendService, GenericService, GraphService,
    InferenceService, ProxyService, Service, ServiceBase,
};

pub struct ServiceFactory;

impl ServiceFactory {
    /// Dispatch is on the declared service type, never on the name. Configs
    /// that omit a type were normalised when the environment was loaded.
    pub fn create(
        name: &str,
        platform: PlatformType,
        app: &AppContext,
        environment: &EnvironmentConfig,
        config: &ServiceConfig,
    ) -> Arc<dyn Service> {
        let service_type = config.service_type();
        debug!(
            "Creating {} service '{}' on {}",
            service_type, name, platform
        );
        let base = ServiceBase {
            name: name.to_string(),
            service_type,
            platform,
            environment: environment.name().to_string(),
            project: environment.project().to_string(),
            config: config.clone(),
            app: app.clone(),
        };

        match service_type {
            ServiceType::Frontend => Arc::new(FrontendService::new(base)),
            ServiceType::Backend => Arc::new(BackendService::new(base)),
            ServiceType::Database => Arc::new(DatabaseService::new(base)),
            ServiceType::Graph => Arc::new(GraphService::new(base)),
            ServiceType::Inference => Arc::new(InferenceService::new(base)),
            ServiceType::Proxy => Arc::new(ProxyService::new(base)),
            ServiceType::Worker => Arc::new(GenericService::worker(base)),
            ServiceType::Filesystem | ServiceType::Generic => Arc::new(GenericService::new(base)),
        }
    }
}
