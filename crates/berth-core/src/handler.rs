//! Handler descriptors and the values that flow in and out of a handler.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OrchestratorError, Result};
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

/// Platform-specific values merged into a handler's context.
pub type Extensions = Map<String, Value>;

pub type HandlerFuture = BoxFuture<'static, Result<HandlerOutput>>;

pub type HandlerFn = Arc<dyn Fn(HandlerContext) -> HandlerFuture + Send + Sync>;

/// Registry key for a command on a service type: `"<command>-<serviceType>"`.
pub fn handler_key(command: &str, service_type: ServiceType) -> String {
    format!("{command}-{service_type}")
}

#[derive(Clone)]
pub struct HandlerDescriptor {
    pub command: String,
    pub platform: PlatformType,
    pub service_type: ServiceType,
    pub handler: HandlerFn,
    /// Whether the platform must discover live resource identifiers before
    /// the handler runs.
    pub requires_discovery: bool,
}

impl HandlerDescriptor {
    pub fn new<F, Fut>(
        command: impl Into<String>,
        platform: PlatformType,
        service_type: ServiceType,
        handler: F,
    ) -> Self
    where
        F: Fn(HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput>> + Send + 'static,
    {
        Self {
            command: command.into(),
            platform,
            service_type,
            handler: Arc::new(move |ctx| -> HandlerFuture { Box::pin(handler(ctx)) }),
            requires_discovery: false,
        }
    }

    /// Register the same handler for several service types at once.
    pub fn for_types<F, Fut>(
        command: &str,
        platform: PlatformType,
        service_types: &[ServiceType],
        handler: F,
    ) -> Vec<Self>
    where
        F: Fn(HandlerContext) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutput>> + Send + 'static,
    {
        service_types
            .iter()
            .map(|service_type| Self::new(command, platform, *service_type, handler.clone()))
            .collect()
    }

    pub fn with_discovery(mut self) -> Self {
        self.requires_discovery = true;
        self
    }

    pub fn key(&self) -> String {
        handler_key(&self.command, self.service_type)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("command", &self.command)
            .field("platform", &self.platform)
            .field("service_type", &self.service_type)
            .field("requires_discovery", &self.requires_discovery)
            .finish_non_exhaustive()
    }
}

/// Everything a handler receives for one invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub command: String,
    pub platform: PlatformType,
    pub service: Arc<dyn Service>,
    /// `<prefix>-<service>-<environment>` as computed by the platform.
    pub resource_name: String,
    /// Validated command options as a JSON object.
    pub options: Value,
    pub extensions: Extensions,
    pub dry_run: bool,
}

impl HandlerContext {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    pub fn option_bool(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).and_then(Value::as_str)
    }

    /// Error for a failed underlying call, tagged with this invocation.
    pub fn failure(&self, message: impl Into<String>) -> OrchestratorError {
        OrchestratorError::external(
            self.service.name(),
            self.platform,
            self.command.as_str(),
            message,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl HealthReport {
    pub fn healthy(status: impl Into<String>) -> Self {
        Self {
            healthy: true,
            status: status.into(),
            details: Map::new(),
        }
    }

    pub fn unhealthy(status: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status: status.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Identifiers of the platform resources backing a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub platform: Option<PlatformType>,
    pub identifiers: BTreeMap<String, String>,
}

impl ResourceInfo {
    pub fn new(platform: PlatformType) -> Self {
        Self {
            platform: Some(platform),
            identifiers: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.identifiers.insert(key.to_string(), value.into());
        self
    }
}

/// What a handler reports back to the platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    pub health: Option<HealthReport>,
    pub resources: Option<ResourceInfo>,
    pub endpoint: Option<String>,
}

impl HandlerOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Success follows the health verdict.
    pub fn from_health(health: HealthReport) -> Self {
        let mut output = if health.healthy {
            Self::ok()
        } else {
            Self::failed(format!("service is {}", health.status))
        };
        output.health = Some(health);
        output
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceInfo) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_key_format() {
        assert_eq!(handler_key("check", ServiceType::Database), "check-database");
    }

    #[test]
    fn test_for_types_builds_one_descriptor_per_type() {
        let descriptors = HandlerDescriptor::for_types(
            "start",
            PlatformType::Mock,
            &[ServiceType::Backend, ServiceType::Frontend],
            |_ctx| async { Ok(HandlerOutput::ok()) },
        );
        let keys: Vec<_> = descriptors.iter().map(|d| d.key()).collect();
        assert_eq!(keys, vec!["start-backend", "start-frontend"]);
        assert!(descriptors.iter().all(|d| !d.requires_discovery));
    }

    #[test]
    fn test_output_from_unhealthy_report_fails() {
        let output = HandlerOutput::from_health(HealthReport::unhealthy("unreachable"));
        assert!(!output.success);
        assert_eq!(output.error.as_deref(), Some("service is unreachable"));
        assert!(output.health.is_some());
    }
}
