//! Service contract and the concrete service kinds.
//!
//! A service is built fresh for each command from its resolved config.
//! Constructors do no I/O; anything that touches the outside world happens
//! in platform handlers.

pub mod backend;
pub mod database;
pub mod factory;
pub mod frontend;
pub mod generic;
pub mod graph;
pub mod inference;
pub mod proxy;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::capabilities::extract_command_capabilities;
use crate::config::ServiceConfig;
use crate::context::AppContext;
use crate::requirements::{ServiceRequirements, merge_requirements};
use crate::types::{PlatformType, ServiceType};

pub use backend::BackendService;
pub use database::DatabaseService;
pub use factory::ServiceFactory;
pub use frontend::FrontendService;
pub use generic::GenericService;
pub use graph::GraphService;
pub use inference::InferenceService;
pub use proxy::ProxyService;

/// State every service kind carries.
#[derive(Debug, Clone)]
pub struct ServiceBase {
    pub name: String,
    pub service_type: ServiceType,
    pub platform: PlatformType,
    pub environment: String,
    pub project: String,
    pub config: ServiceConfig,
    pub app: AppContext,
}

pub trait Service: Send + Sync + fmt::Debug {
    fn base(&self) -> &ServiceBase;

    /// Requirements this kind of service has unless its config overrides them.
    fn default_requirements(&self) -> ServiceRequirements {
        ServiceRequirements::default()
    }

    fn default_image(&self) -> Option<&'static str> {
        None
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn service_type(&self) -> ServiceType {
        self.base().service_type
    }

    fn platform(&self) -> PlatformType {
        self.base().platform
    }

    fn environment(&self) -> &str {
        &self.base().environment
    }

    fn project(&self) -> &str {
        &self.base().project
    }

    fn config(&self) -> &ServiceConfig {
        &self.base().config
    }

    fn project_root(&self) -> &Path {
        self.base().app.project_root()
    }

    /// Defaults, then declared requirements, then top-level config maps.
    ///
    /// Declared ports replace the default ports instead of adding to them.
    fn requirements(&self) -> ServiceRequirements {
        let config = self.config();
        let mut defaults = self.default_requirements();
        let overrides_ports = config.port.is_some() || !config.requirements.ports().is_empty();
        if overrides_ports && let Some(network) = defaults.network.as_mut() {
            network.ports.clear();
            network.health_check_port = None;
        }

        let mut top_level = ServiceRequirements {
            environment: config.environment.clone(),
            annotations: config.annotations.clone(),
            ..Default::default()
        };
        if let Some(port) = config.port
            && config.requirements.ports().is_empty()
        {
            top_level.network = Some(crate::requirements::NetworkRequirement {
                ports: vec![port],
                ..Default::default()
            });
        }

        merge_requirements([&defaults, &config.requirements, &top_level])
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.requirements().annotations
    }

    fn capabilities(&self) -> BTreeSet<String> {
        extract_command_capabilities(&self.annotations())
    }

    fn supports(&self, command: &str) -> bool {
        self.capabilities().contains(command)
    }

    fn port(&self) -> Option<u16> {
        self.config()
            .port
            .or_else(|| self.requirements().ports().first().copied())
    }

    fn health_check_path(&self) -> Option<String> {
        self.config()
            .health_check
            .clone()
            .or_else(|| self.requirements().health_check_path().map(str::to_string))
    }

    fn image(&self) -> Option<String> {
        self.config()
            .image
            .clone()
            .or_else(|| self.default_image().map(str::to_string))
    }

    fn environment_variables(&self) -> BTreeMap<String, String> {
        self.requirements().environment
    }

    /// Where the service answers requests, if known.
    fn endpoint(&self) -> Option<String> {
        self.config()
            .url
            .clone()
            .or_else(|| self.port().map(|port| format!("http://localhost:{port}")))
    }

    fn command_line(&self) -> Option<&str> {
        self.config().command.as_deref()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::Arc;

    use serde_json::{Map, Value};

    use super::*;
    use crate::config::EnvironmentConfig;
    use crate::handler::HandlerContext;

    pub fn app() -> AppContext {
        AppContext::new(PathBuf::from("/srv/app"), PathBuf::from("/tmp/berth-state"))
    }

    pub fn environment() -> EnvironmentConfig {
        EnvironmentConfig {
            name: Some("test".to_string()),
            project: Some("acme".to_string()),
            ..Default::default()
        }
    }

    pub fn service_with(
        name: &str,
        platform: PlatformType,
        config: ServiceConfig,
    ) -> Arc<dyn Service> {
        ServiceFactory::create(name, platform, &app(), &environment(), &config)
    }

    pub fn service(name: &str, service_type: ServiceType) -> Arc<dyn Service> {
        service_with(
            name,
            PlatformType::Mock,
            ServiceConfig::on(PlatformType::Mock).of_type(service_type),
        )
    }

    pub fn context(service: Arc<dyn Service>) -> HandlerContext {
        HandlerContext {
            command: "check".to_string(),
            platform: service.platform(),
            resource_name: format!("acme-{}-test", service.name()),
            service,
            options: Value::Object(Map::new()),
            extensions: Map::new(),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::requirements::NetworkRequirement;

    #[test]
    fn test_config_port_replaces_default_port() {
        let config = ServiceConfig {
            port: Some(4100),
            ..ServiceConfig::on(PlatformType::Container).of_type(ServiceType::Backend)
        };
        let service = service_with("backend", PlatformType::Container, config);

        assert_eq!(service.port(), Some(4100));
        assert_eq!(service.requirements().ports(), &[4100]);
        assert_eq!(service.endpoint().as_deref(), Some("http://localhost:4100"));
    }

    #[test]
    fn test_declared_ports_replace_defaults() {
        let mut config = ServiceConfig::on(PlatformType::Container).of_type(ServiceType::Graph);
        config.requirements.network = Some(NetworkRequirement {
            ports: vec![17687],
            ..Default::default()
        });
        let service = service_with("graph", PlatformType::Container, config);
        assert_eq!(service.requirements().ports(), &[17687]);
    }

    #[test]
    fn test_top_level_environment_wins() {
        let mut config = ServiceConfig::on(PlatformType::Process).of_type(ServiceType::Backend);
        config
            .requirements
            .environment
            .insert("LOG_LEVEL".into(), "info".into());
        config.environment.insert("LOG_LEVEL".into(), "debug".into());
        let service = service_with("backend", PlatformType::Process, config);
        assert_eq!(service.environment_variables()["LOG_LEVEL"], "debug");
    }

    #[test]
    fn test_capabilities_come_from_merged_annotations() {
        let config = ServiceConfig::on(PlatformType::Mock)
            .of_type(ServiceType::Generic)
            .with_annotation("command/supports-watch", "false");
        let service = service_with("worker", PlatformType::Mock, config);
        assert!(!service.supports("watch"));
        assert!(service.supports("start"));
    }

    #[test]
    fn test_url_endpoint_takes_precedence() {
        let config = ServiceConfig {
            url: Some("https://api.example.com".into()),
            port: Some(443),
            ..ServiceConfig::on(PlatformType::External)
        };
        let service = service_with("api", PlatformType::External, config);
        assert_eq!(service.endpoint().as_deref(), Some("https://api.example.com"));
    }
}
