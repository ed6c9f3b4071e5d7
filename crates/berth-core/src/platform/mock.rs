//! In-memory platform for tests and dry runs of the dispatch path.
//!
//! Behaviour can be steered per service through annotations:
//! `mock/fail-<command>: "true"` makes that command fail and
//! `mock/health: "unhealthy"` makes `check` report an unhealthy service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::handler::{
    Extensions, HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport, ResourceInfo,
};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

use super::{LogEntry, LogOptions, PlatformProvider, PlatformStrategy, ServiceState, extension};

const PLATFORM: PlatformType = PlatformType::Mock;

pub const FAIL_PREFIX: &str = "mock/fail-";
pub const HEALTH_ANNOTATION: &str = "mock/health";

/// Commands the mock platform answers for every service type.
pub const MOCK_COMMANDS: [&str; 13] = [
    "start",
    "stop",
    "restart",
    "check",
    "watch",
    "provision",
    "configure",
    "publish",
    "update",
    "backup",
    "restore",
    "test",
    "exec",
];

#[derive(Debug, Default)]
struct MockRecord {
    running: bool,
    invocations: Vec<String>,
    logs: Vec<LogEntry>,
}

/// Shared handle on the mock platform's state, keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<HashMap<String, MockRecord>>>,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, MockRecord>> {
        // A panicking test must not poison the state for the others.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self, resource: &str) -> bool {
        self.lock().get(resource).is_some_and(|r| r.running)
    }

    pub fn set_running(&self, resource: &str, running: bool) {
        self.lock().entry(resource.to_string()).or_default().running = running;
    }

    /// Commands executed against `resource`, oldest first.
    pub fn invocations(&self, resource: &str) -> Vec<String> {
        self.lock()
            .get(resource)
            .map(|r| r.invocations.clone())
            .unwrap_or_default()
    }

    fn record(&self, resource: &str, service: &str, command: &str, message: String) {
        let mut state = self.lock();
        let record = state.entry(resource.to_string()).or_default();
        record.invocations.push(command.to_string());
        record.logs.push(LogEntry {
            timestamp: Utc::now(),
            service: service.to_string(),
            platform: PLATFORM,
            level: "info".to_string(),
            message,
        });
    }

    fn logs(&self, resource: &str) -> Vec<LogEntry> {
        self.lock()
            .get(resource)
            .map(|r| r.logs.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    state: MockState,
}

impl MockOptions {
    pub fn with_state(state: MockState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &MockState {
        &self.state
    }
}

impl PlatformProvider for MockOptions {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        MOCK_COMMANDS
            .iter()
            .flat_map(|command| {
                let state = self.state.clone();
                HandlerDescriptor::for_types(command, PLATFORM, &ServiceType::ALL, move |ctx| {
                    handle(state.clone(), ctx)
                })
            })
            .collect()
    }

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy> {
        Arc::new(MockPlatform {
            state: self.state,
            registry,
        })
    }
}

#[derive(Debug)]
pub struct MockPlatform {
    state: MockState,
    registry: Arc<HandlerRegistry>,
}

impl MockPlatform {
    pub fn state(&self) -> &MockState {
        &self.state
    }
}

#[async_trait]
impl PlatformStrategy for MockPlatform {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn build_handler_context_extensions(
        &self,
        service: &dyn Service,
        requires_discovery: bool,
    ) -> Result<Extensions> {
        let mut extensions = Extensions::new();
        if requires_discovery {
            extension(&mut extensions, "mockId", format!("mock-{}", service.name()));
        }
        Ok(extensions)
    }

    async fn collect_logs(
        &self,
        service: &dyn Service,
        _options: &LogOptions,
    ) -> Option<Vec<LogEntry>> {
        Some(self.state.logs(&self.resource_name(service)))
    }

    async fn quick_check_running(&self, state: &ServiceState) -> bool {
        state
            .resource_id
            .as_deref()
            .is_some_and(|resource| self.state.is_running(resource))
    }
}

async fn handle(state: MockState, ctx: HandlerContext) -> Result<HandlerOutput> {
    let service = ctx.service.as_ref();
    let annotations = service.annotations();
    let command = ctx.command.as_str();
    state.record(
        &ctx.resource_name,
        service.name(),
        command,
        format!("{command} {}", service.name()),
    );

    let injected = annotations
        .get(&format!("{FAIL_PREFIX}{command}"))
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    if injected {
        return Ok(HandlerOutput::failed(format!(
            "mock failure injected for {command}"
        )));
    }

    let resources = ResourceInfo::new(PLATFORM).with("id", ctx.resource_name.as_str());
    let output = match command {
        "start" => {
            state.set_running(&ctx.resource_name, true);
            HandlerOutput::ok()
        }
        "stop" => {
            state.set_running(&ctx.resource_name, false);
            HandlerOutput::ok()
        }
        "restart" => {
            state.set_running(&ctx.resource_name, true);
            HandlerOutput::ok().with_metadata("restarted", true)
        }
        "check" | "watch" => {
            let unhealthy = annotations
                .get(HEALTH_ANNOTATION)
                .is_some_and(|v| v.eq_ignore_ascii_case("unhealthy"));
            let report = if unhealthy {
                HealthReport::unhealthy("unhealthy")
            } else {
                HealthReport::healthy("healthy")
            };
            HandlerOutput::from_health(
                report.with_detail("running", state.is_running(&ctx.resource_name)),
            )
        }
        "exec" => HandlerOutput::ok()
            .with_metadata("exitCode", 0)
            .with_metadata("stdout", ctx.option_str("command").unwrap_or_default()),
        _ => HandlerOutput::ok(),
    };

    let mut output = output.with_resources(resources);
    if ctx.dry_run {
        output = output.with_metadata("dryRun", true);
    }
    if let Some(endpoint) = service.endpoint() {
        output = output.with_endpoint(endpoint);
    }
    Ok(output)
}
