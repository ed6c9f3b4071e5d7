//! Platform strategies: one per deployment target.
//!
//! A platform owns a partition of the shared [`HandlerRegistry`] and turns a
//! `(command, service)` pair into a [`CommandResult`]. Lifecycle work itself
//! lives in the registered handlers; the strategy only supplies context
//! (credentials, discovered resource ids, paths) and catches failures at the
//! dispatch boundary.
//!
//! Construction is two-phase. Every [`PlatformProvider`] first contributes its
//! handlers to one registry, then the registry is frozen behind an `Arc` and
//! each provider is turned into its strategy.

pub mod cloud;
pub mod container;
pub mod external;
pub mod mock;
pub mod process;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::commands::CommandResult;
use crate::config::EnvironmentConfig;
use crate::context::AppContext;
use crate::error::{OrchestratorError, Result};
use crate::handler::{Extensions, HandlerContext, HandlerDescriptor, handler_key};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

pub use cloud::{CloudOptions, CloudPlatform, ConfigDiscovery, ResourceDiscovery};
pub use container::{ContainerOptions, ContainerPlatform};
pub use external::{ExternalOptions, ExternalPlatform};
pub use mock::{MockOptions, MockPlatform, MockState};
pub use process::{ProcessOptions, ProcessPlatform};

/// One log line attributed to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub platform: PlatformType,
    pub level: String,
    pub message: String,
}

impl LogEntry {
    /// Parse a line that may start with an RFC 3339 timestamp, as written by
    /// `docker logs --timestamps` and by most structured loggers.
    pub fn parse_line(
        service: &str,
        platform: PlatformType,
        line: &str,
        fallback: DateTime<Utc>,
    ) -> Self {
        let (timestamp, message) = match line.split_once(' ') {
            Some((head, rest)) => match DateTime::parse_from_rfc3339(head) {
                Ok(ts) => (ts.with_timezone(&Utc), rest),
                Err(_) => (fallback, line),
            },
            None => (fallback, line),
        };
        Self {
            timestamp,
            service: service.to_string(),
            platform,
            level: detect_level(message).to_string(),
            message: message.to_string(),
        }
    }
}

fn detect_level(message: &str) -> &'static str {
    let upper = message.to_ascii_uppercase();
    if upper.contains("ERROR") || upper.contains("FATAL") || upper.contains("PANIC") {
        "error"
    } else if upper.contains("WARN") {
        "warn"
    } else if upper.contains("DEBUG") || upper.contains("TRACE") {
        "debug"
    } else {
        "info"
    }
}

/// Severity rank used for level filtering.
pub fn level_rank(level: &str) -> u8 {
    match level {
        "trace" | "debug" => 0,
        "info" => 1,
        "warn" | "warning" => 2,
        "error" | "fatal" => 3,
        _ => 1,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep the newest `tail` entries after merging.
    pub tail: Option<usize>,
    pub since: Option<DateTime<Utc>>,
    /// Minimum level.
    pub level: Option<String>,
}

/// Last known state of a deployed service, used for cheap liveness guesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub entity: String,
    pub platform: PlatformType,
    pub environment: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the user has to do to fix it, distinct from the raw failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_action: Option<String>,
}

impl CredentialCheck {
    pub fn valid() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn invalid(error: impl Into<String>, requires_action: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            requires_action: Some(requires_action.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.valid {
            return Ok(());
        }
        Err(OrchestratorError::Credential {
            message: self.error.unwrap_or_else(|| "invalid credentials".to_string()),
            requires_action: self.requires_action,
        })
    }
}

#[async_trait]
pub trait PlatformStrategy: Send + Sync + fmt::Debug {
    fn platform_type(&self) -> PlatformType;

    fn platform_name(&self) -> &'static str {
        self.platform_type().as_str()
    }

    /// The shared registry this platform dispatches through.
    fn registry(&self) -> &HandlerRegistry;

    /// Values merged into every handler context on this platform.
    ///
    /// Fails rather than returning a partial map.
    async fn build_handler_context_extensions(
        &self,
        service: &dyn Service,
        requires_discovery: bool,
    ) -> Result<Extensions>;

    /// `None` means the platform cannot produce logs at all.
    async fn collect_logs(
        &self,
        _service: &dyn Service,
        _options: &LogOptions,
    ) -> Option<Vec<LogEntry>> {
        None
    }

    /// `<project>-<service>-<environment>`.
    fn resource_name(&self, service: &dyn Service) -> String {
        format!(
            "{}-{}-{}",
            service.project(),
            service.name(),
            service.environment()
        )
    }

    fn determine_service_type(&self, service: &dyn Service) -> ServiceType {
        service.service_type()
    }

    async fn validate_credentials(&self, _environment: &EnvironmentConfig) -> CredentialCheck {
        CredentialCheck::valid()
    }

    /// Fast best guess at whether the service is already up. No side effects.
    async fn quick_check_running(&self, _state: &ServiceState) -> bool {
        false
    }

    /// Run `command` for `service` through the registry.
    ///
    /// Never fails: a missing handler or a failing handler both come back as a
    /// result with `success == false`.
    async fn execute(
        &self,
        command: &str,
        service: Arc<dyn Service>,
        options: &Value,
    ) -> CommandResult {
        execute_registered(self, command, service, options).await
    }
}

async fn execute_registered<P>(
    platform: &P,
    command: &str,
    service: Arc<dyn Service>,
    options: &Value,
) -> CommandResult
where
    P: PlatformStrategy + ?Sized,
{
    let started = Instant::now();
    let platform_type = platform.platform_type();
    let service_type = platform.determine_service_type(service.as_ref());
    let key = handler_key(command, service_type);

    let Some(descriptor) = platform.registry().get_descriptor(platform_type, &key) else {
        debug!("No handler {} on {}", key, platform_type);
        return CommandResult::failure(
            service.as_ref(),
            format!(
                "Command '{command}' is not supported for {service_type} services on platform {}",
                platform.platform_name()
            ),
        )
        .with_duration(started.elapsed());
    };
    let handler = Arc::clone(&descriptor.handler);
    let requires_discovery = descriptor.requires_discovery;

    let wrap = |e: OrchestratorError| match e {
        OrchestratorError::ExternalOperation { .. } => e.to_string(),
        other => OrchestratorError::external(
            service.name(),
            platform_type,
            command,
            other.to_string(),
        )
        .to_string(),
    };

    let extensions = match platform
        .build_handler_context_extensions(service.as_ref(), requires_discovery)
        .await
    {
        Ok(extensions) => extensions,
        Err(e) => {
            warn!("Could not prepare {} for '{}': {}", command, service.name(), e);
            return CommandResult::failure(service.as_ref(), wrap(e))
                .with_duration(started.elapsed());
        }
    };

    let context = HandlerContext {
        command: command.to_string(),
        platform: platform_type,
        resource_name: platform.resource_name(service.as_ref()),
        service: Arc::clone(&service),
        options: options.clone(),
        extensions,
        dry_run: service.base().app.dry_run(),
    };

    debug!("Dispatching {} for '{}' on {}", key, service.name(), platform_type);
    let result = match handler(context).await {
        Ok(output) => CommandResult::from_output(service.as_ref(), output),
        Err(e) => {
            warn!("{} failed for '{}': {}", command, service.name(), e);
            CommandResult::failure(service.as_ref(), wrap(e))
        }
    };
    result.with_duration(started.elapsed())
}

/// Contributes handlers to the shared registry, then becomes a strategy.
pub trait PlatformProvider {
    fn platform_type(&self) -> PlatformType;

    fn handlers(&self) -> Vec<HandlerDescriptor>;

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy>;
}

/// Every platform available to one invocation, sharing one registry.
#[derive(Debug, Clone)]
pub struct PlatformSet {
    registry: Arc<HandlerRegistry>,
    platforms: BTreeMap<PlatformType, Arc<dyn PlatformStrategy>>,
}

impl PlatformSet {
    pub fn builder() -> PlatformSetBuilder {
        PlatformSetBuilder::default()
    }

    /// The five built-in platforms configured from `environment`.
    pub fn with_defaults(environment: &EnvironmentConfig, app: &AppContext) -> Result<Self> {
        PlatformSet::builder()
            .with(CloudOptions::from_environment(environment))?
            .with(ContainerOptions::default())?
            .with(ProcessOptions::new(app.state_dir().to_path_buf()))?
            .with(ExternalOptions::default())?
            .with(MockOptions::default())
            .map(PlatformSetBuilder::build)
    }

    pub fn get(&self, platform: PlatformType) -> Option<&Arc<dyn PlatformStrategy>> {
        self.platforms.get(&platform)
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn platform_types(&self) -> Vec<PlatformType> {
        self.platforms.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PlatformStrategy>> {
        self.platforms.values()
    }
}

#[derive(Default)]
pub struct PlatformSetBuilder {
    registry: HandlerRegistry,
    providers: Vec<Box<dyn PlatformProvider>>,
}

impl PlatformSetBuilder {
    /// Add a platform. Its handlers are registered strictly: a key collision
    /// inside one platform is a construction error.
    pub fn with<P: PlatformProvider + 'static>(mut self, provider: P) -> Result<Self> {
        let platform = provider.platform_type();
        self.registry
            .try_register_handlers(platform, provider.handlers())?;
        self.providers.push(Box::new(provider));
        Ok(self)
    }

    /// Replace or add a single handler after the built-ins, last write wins.
    pub fn override_handler(mut self, descriptor: HandlerDescriptor) -> Self {
        self.registry.register_handler(descriptor.platform, descriptor);
        self
    }

    pub fn build(self) -> PlatformSet {
        let registry = Arc::new(self.registry);
        let platforms = self
            .providers
            .into_iter()
            .map(|provider| {
                let strategy = provider.into_strategy(Arc::clone(&registry));
                (strategy.platform_type(), strategy)
            })
            .collect();
        PlatformSet {
            registry,
            platforms,
        }
    }
}

/// Serialize `value` into an extension map entry.
pub(crate) fn extension(map: &mut Extensions, key: &str, value: impl Into<Value>) {
    map.insert(key.to_string(), value.into());
}

/// Shell-style rendering of a command for dry-run metadata.
pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map of `KEY=VALUE` strings, as passed to `docker run -e`.
pub(crate) fn env_pairs(environment: &BTreeMap<String, String>) -> Vec<String> {
    environment.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerOutput;
    use crate::service::test_support::service;

    fn mock_set() -> PlatformSet {
        PlatformSet::builder()
            .with(MockOptions::default())
            .expect("mock registers")
            .build()
    }

    #[test]
    fn test_parse_line_with_timestamp() {
        let fallback = Utc::now();
        let entry = LogEntry::parse_line(
            "backend",
            PlatformType::Container,
            "2024-05-01T10:00:00.123Z ERROR connection refused",
            fallback,
        );
        assert_eq!(entry.timestamp.to_rfc3339(), "2024-05-01T10:00:00.123+00:00");
        assert_eq!(entry.level, "error");
        assert_eq!(entry.message, "ERROR connection refused");

        let plain = LogEntry::parse_line("backend", PlatformType::Process, "listening", fallback);
        assert_eq!(plain.timestamp, fallback);
        assert_eq!(plain.level, "info");
    }

    #[test]
    fn test_resource_name_is_stable() {
        let set = mock_set();
        let platform = set.get(PlatformType::Mock).expect("mock platform");
        let backend = service("backend", ServiceType::Backend);
        let first = platform.resource_name(backend.as_ref());
        assert_eq!(first, "acme-backend-test");
        assert_eq!(first, platform.resource_name(backend.as_ref()));
    }

    #[tokio::test]
    async fn test_missing_handler_is_a_failed_result() {
        let set = PlatformSet::builder()
            .with(ExternalOptions::default())
            .expect("external registers")
            .build();
        let platform = set.get(PlatformType::External).expect("external platform");
        let database = service("database", ServiceType::Database);

        let result = platform
            .execute("provision", database, &Value::Object(serde_json::Map::new()))
            .await;
        assert!(!result.success);
        let error = result.error.expect("error message");
        assert!(error.contains("not supported"), "{error}");
        assert!(error.contains("database"), "{error}");
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let set = PlatformSet::builder()
            .with(MockOptions::default())
            .expect("mock registers")
            .override_handler(HandlerDescriptor::new(
                "check",
                PlatformType::Mock,
                ServiceType::Backend,
                |_ctx| async {
                    Err(OrchestratorError::Io(std::io::Error::other("socket closed")))
                },
            ))
            .build();
        let platform = set.get(PlatformType::Mock).expect("mock platform");

        let result = platform
            .execute("check", service("backend", ServiceType::Backend), &Value::Null)
            .await;
        assert!(!result.success);
        let error = result.error.expect("error message");
        assert!(error.contains("check failed for service 'backend'"), "{error}");
        assert!(error.contains("socket closed"), "{error}");
    }

    #[tokio::test]
    async fn test_override_replaces_builtin_handler() {
        let set = PlatformSet::builder()
            .with(MockOptions::default())
            .expect("mock registers")
            .override_handler(HandlerDescriptor::new(
                "check",
                PlatformType::Mock,
                ServiceType::Backend,
                |_ctx| async { Ok(HandlerOutput::ok().with_metadata("source", "override")) },
            ))
            .build();
        let platform = set.get(PlatformType::Mock).expect("mock platform");
        let result = platform
            .execute("check", service("backend", ServiceType::Backend), &Value::Null)
            .await;
        assert!(result.success);
        assert_eq!(result.metadata["source"], "override");
    }

    #[test]
    fn test_duplicate_provider_is_rejected() {
        let err = PlatformSet::builder()
            .with(MockOptions::default())
            .expect("first registers")
            .with(MockOptions::default())
            .err()
            .expect("second collides");
        assert!(matches!(err, OrchestratorError::DuplicateHandler { .. }));
    }

    #[test]
    fn test_credential_check_into_result() {
        assert!(CredentialCheck::valid().into_result().is_ok());
        let err = CredentialCheck::invalid("no profile", "run aws configure")
            .into_result()
            .expect_err("invalid");
        assert_eq!(err.requires_action(), Some("run aws configure"));
    }
}
