//! Per-service results and the command envelope handed to output formatters.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::handler::{HandlerOutput, HealthReport, ResourceInfo};
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

/// Outcome of one command on one entity (usually a service).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub entity: String,
    pub platform: PlatformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn new(entity: impl Into<String>, platform: PlatformType, success: bool) -> Self {
        Self {
            entity: entity.into(),
            platform,
            service_type: None,
            success,
            error: None,
            metadata: Map::new(),
            health: None,
            resources: None,
            endpoint: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(service: &dyn Service) -> Self {
        Self {
            service_type: Some(service.service_type()),
            ..Self::new(service.name(), service.platform(), true)
        }
    }

    pub fn failure(service: &dyn Service, error: impl Into<String>) -> Self {
        Self {
            service_type: Some(service.service_type()),
            error: Some(error.into()),
            ..Self::new(service.name(), service.platform(), false)
        }
    }

    pub fn from_output(service: &dyn Service, output: HandlerOutput) -> Self {
        Self {
            entity: service.name().to_string(),
            platform: service.platform(),
            service_type: Some(service.service_type()),
            success: output.success,
            error: output.error,
            metadata: output.metadata,
            health: output.health,
            resources: output.resources,
            endpoint: output.endpoint,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub warnings: usize,
}

impl ResultSummary {
    fn derive(results: &[CommandResult], warnings: usize) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub user: String,
    pub working_directory: String,
    pub dry_run: bool,
}

impl ExecutionContext {
    /// Current user from `USER`/`USERNAME`.
    pub fn current(working_directory: &Path, dry_run: bool) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            user,
            working_directory: working_directory.display().to_string(),
            dry_run,
        }
    }
}

/// The envelope every command produces.
///
/// `summary` is derived from the results when the envelope is built, so
/// `succeeded + failed == total` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResults {
    command: String,
    environment: String,
    timestamp: DateTime<Utc>,
    /// Milliseconds.
    duration: u64,
    results: Vec<CommandResult>,
    summary: ResultSummary,
    execution_context: ExecutionContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl CommandResults {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration)
    }

    pub fn results(&self) -> &[CommandResult] {
        &self.results
    }

    pub fn summary(&self) -> ResultSummary {
        self.summary
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.execution_context
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.results.iter().all(|r| r.success)
    }
}

/// Append-only accumulator owned by one command invocation.
#[derive(Debug)]
pub struct ResultAggregator {
    command: String,
    environment: String,
    started_at: DateTime<Utc>,
    started: Instant,
    execution_context: ExecutionContext,
    results: Vec<CommandResult>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ResultAggregator {
    pub fn new(
        command: impl Into<String>,
        environment: impl Into<String>,
        execution_context: ExecutionContext,
    ) -> Self {
        Self {
            command: command.into(),
            environment: environment.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            execution_context,
            results: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: CommandResult) {
        self.results.push(result);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn results(&self) -> &[CommandResult] {
        &self.results
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.results.iter().any(|r| !r.success)
    }

    pub fn is_success(&self) -> bool {
        !self.has_errors()
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn to_results(&self) -> CommandResults {
        CommandResults {
            command: self.command.clone(),
            environment: self.environment.clone(),
            timestamp: self.started_at,
            duration: self.duration().as_millis() as u64,
            summary: ResultSummary::derive(&self.results, self.warnings.len()),
            results: self.results.clone(),
            execution_context: self.execution_context.clone(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        }
    }

    pub fn into_results(self) -> CommandResults {
        let duration = self.duration().as_millis() as u64;
        CommandResults {
            summary: ResultSummary::derive(&self.results, self.warnings.len()),
            command: self.command,
            environment: self.environment,
            timestamp: self.started_at,
            duration,
            results: self.results,
            execution_context: self.execution_context,
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self.to_results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new(
            "check",
            "staging",
            ExecutionContext {
                user: "ci".into(),
                working_directory: "/srv/app".into(),
                dry_run: false,
            },
        )
    }

    #[test]
    fn test_summary_is_derived_from_results() {
        let mut agg = aggregator();
        agg.add_result(CommandResult::new("backend", PlatformType::Container, true));
        agg.add_result(CommandResult::new("database", PlatformType::External, false));
        agg.add_warning("skipped worker");

        let results = agg.to_results();
        let summary = results.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded + summary.failed, summary.total);
        assert_eq!(summary.warnings, 1);
        assert!(agg.has_errors());
        assert!(!results.is_success());
    }

    #[test]
    fn test_global_error_fails_command() {
        let mut agg = aggregator();
        agg.add_result(CommandResult::new("backend", PlatformType::Mock, true));
        assert!(agg.is_success());
        agg.add_error("credentials expired");
        assert!(!agg.is_success());
    }

    #[test]
    fn test_envelope_uses_camel_case_keys() {
        let mut agg = aggregator();
        let mut result = CommandResult::new("backend", PlatformType::Container, false);
        result.error = Some("boom".into());
        agg.add_result(result);

        let json = agg.to_json().expect("serializes");
        for key in [
            "command",
            "environment",
            "timestamp",
            "duration",
            "results",
            "summary",
            "executionContext",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("errors").is_none());
        assert_eq!(json["executionContext"]["workingDirectory"], "/srv/app");
        assert_eq!(json["executionContext"]["dryRun"], false);
        assert_eq!(json["results"][0]["entity"], "backend");
        assert_eq!(json["results"][0]["platform"], "container");
        assert_eq!(json["results"][0]["error"], "boom");
        assert_eq!(json["summary"]["failed"], 1);
    }

    #[test]
    fn test_envelope_round_trips() {
        let mut agg = aggregator();
        agg.add_result(CommandResult::new("backend", PlatformType::Process, true));
        let results = agg.into_results();
        let text = serde_json::to_string(&results).expect("serializes");
        let back: CommandResults = serde_json::from_str(&text).expect("parses");
        assert_eq!(back, results);
    }
}
