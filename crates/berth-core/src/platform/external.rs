//! Services run by someone else. We can only look at them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{OrchestratorError, Result};
use crate::handler::{
    Extensions, HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport, ResourceInfo,
};
use crate::health::{DEFAULT_HEALTH_TIMEOUT, health_url, http_health_check};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

use super::{PlatformProvider, PlatformStrategy, extension};

const PLATFORM: PlatformType = PlatformType::External;

#[derive(Debug, Clone)]
pub struct ExternalOptions {
    timeout: Duration,
}

impl Default for ExternalOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }
}

impl ExternalOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PlatformProvider for ExternalOptions {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let timeout = self.timeout;
        ["check", "watch"]
            .into_iter()
            .flat_map(|command| {
                HandlerDescriptor::for_types(command, PLATFORM, &ServiceType::ALL, move |ctx| {
                    check(timeout, ctx)
                })
            })
            .collect()
    }

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy> {
        Arc::new(ExternalPlatform { registry })
    }
}

#[derive(Debug)]
pub struct ExternalPlatform {
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl PlatformStrategy for ExternalPlatform {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Validates the configured URL up front so a typo is reported as such
    /// rather than as an unreachable host.
    async fn build_handler_context_extensions(
        &self,
        service: &dyn Service,
        _requires_discovery: bool,
    ) -> Result<Extensions> {
        let mut extensions = Extensions::new();
        if let Some(raw) = service.config().url.as_deref() {
            let url = Url::parse(raw).map_err(|e| {
                OrchestratorError::configuration(
                    format!("Service '{}' has an invalid url '{raw}': {e}", service.name()),
                    "Use an absolute URL such as \"https://api.example.com\"",
                )
            })?;
            extension(&mut extensions, "url", url.as_str());
        }
        Ok(extensions)
    }
}

async fn check(timeout: Duration, ctx: HandlerContext) -> Result<HandlerOutput> {
    let Some(base) = ctx.extension_str("url").map(str::to_string) else {
        return Ok(HandlerOutput::from_health(HealthReport::healthy("configured"))
            .with_metadata("note", "no url configured; nothing to probe"));
    };
    let url = health_url(&base, ctx.service.health_check_path().as_deref());
    let report = http_health_check(&url, timeout).await;
    Ok(HandlerOutput::from_health(report)
        .with_endpoint(base.as_str())
        .with_resources(ResourceInfo::new(PLATFORM).with("url", base)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::platform::PlatformSet;
    use crate::service::test_support::service_with;

    fn platform() -> PlatformSet {
        PlatformSet::builder()
            .with(ExternalOptions::default().with_timeout(Duration::from_secs(2)))
            .expect("external registers")
            .build()
    }

    #[tokio::test]
    async fn test_without_url_is_configured() {
        let set = platform();
        let service = service_with("search", PLATFORM, ServiceConfig::on(PLATFORM));
        let result = set
            .get(PLATFORM)
            .expect("external")
            .execute("check", service, &json!({}))
            .await;
        assert!(result.success);
        assert_eq!(result.health.expect("health").status, "configured");
    }

    #[tokio::test]
    async fn test_unreachable_url_is_unhealthy() {
        let set = platform();
        let config = ServiceConfig {
            url: Some("http://127.0.0.1:9".into()),
            ..ServiceConfig::on(PLATFORM).of_type(ServiceType::Database)
        };
        let service = service_with("database", PLATFORM, config);
        let result = set
            .get(PLATFORM)
            .expect("external")
            .execute("check", service, &json!({}))
            .await;
        assert!(!result.success);
        assert!(!result.health.expect("health").healthy);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_probe() {
        let set = platform();
        let config = ServiceConfig {
            url: Some("not a url".into()),
            ..ServiceConfig::on(PLATFORM)
        };
        let service = service_with("api", PLATFORM, config);
        let result = set
            .get(PLATFORM)
            .expect("external")
            .execute("check", service, &json!({}))
            .await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("invalid url"));
    }

    #[tokio::test]
    async fn test_logs_are_unavailable() {
        let set = platform();
        let service = service_with("api", PLATFORM, ServiceConfig::on(PLATFORM));
        let logs = set
            .get(PLATFORM)
            .expect("external")
            .collect_logs(service.as_ref(), &Default::default())
            .await;
        assert!(logs.is_none());
    }
}
