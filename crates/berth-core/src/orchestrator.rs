//! Entry point frontends call to run a command by name.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::commands::{AnyCommand, CommandCatalog, CommandResults};
use crate::config::EnvironmentConfig;
use crate::context::AppContext;
use crate::error::{OrchestratorError, Result};
use crate::platform::PlatformSet;
use crate::resolver::{
    ALL_SERVICES, ServicePlatformInfo, resolve_selector, resolve_service_deployments,
};

/// Environment used when a command is run without `--environment`.
pub const ENVIRONMENT_ENV: &str = "BERTH_ENV";

#[derive(Debug, Clone)]
pub struct Orchestrator {
    app: AppContext,
    catalog: Arc<CommandCatalog>,
    /// Fixed platform set; built per environment when absent.
    platforms: Option<Arc<PlatformSet>>,
}

impl Orchestrator {
    /// Orchestrator with the built-in commands.
    pub fn new(app: AppContext) -> Result<Self> {
        Ok(Self {
            app,
            catalog: Arc::new(CommandCatalog::builtin()?),
            platforms: None,
        })
    }

    /// Orchestrator rooted at the current directory.
    pub fn with_defaults() -> Result<Self> {
        Self::new(AppContext::with_defaults()?)
    }

    /// Use `platforms` for every command instead of the default set.
    pub fn with_platforms(mut self, platforms: Arc<PlatformSet>) -> Self {
        self.platforms = Some(platforms);
        self
    }

    pub fn with_catalog(mut self, catalog: CommandCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn app(&self) -> &AppContext {
        &self.app
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Run the command called `name` with raw, unvalidated options.
    pub async fn run(&self, name: &str, raw: Value) -> Result<CommandResults> {
        let Some(command) = self.catalog.get(name) else {
            return Err(OrchestratorError::configuration(
                format!("Unknown command '{name}'"),
                format!("Available commands: {}", self.catalog.names().join(", ")),
            ));
        };
        self.run_command(command.as_ref(), raw).await
    }

    pub async fn run_command(&self, command: &dyn AnyCommand, raw: Value) -> Result<CommandResults> {
        let name = command.info().name;
        info!("Running {}", name);
        let results = command.run(self, raw).await?;
        debug!(
            "{} finished in {:?}: {:?}",
            name,
            results.duration(),
            results.summary()
        );
        Ok(results)
    }

    /// Load `environment`, or the one named by `BERTH_ENV`.
    pub fn load_environment(&self, environment: Option<&str>) -> Result<EnvironmentConfig> {
        let name = match environment {
            Some(name) => name.to_string(),
            None => std::env::var(ENVIRONMENT_ENV).map_err(|_| {
                let available = self
                    .app
                    .config_store()
                    .available_environments()
                    .unwrap_or_default();
                OrchestratorError::configuration(
                    "No environment selected",
                    if available.is_empty() {
                        format!("Pass --environment <name> or set {ENVIRONMENT_ENV}")
                    } else {
                        format!(
                            "Pass --environment <name> or set {ENVIRONMENT_ENV} (available: {})",
                            available.join(", ")
                        )
                    },
                )
            })?,
        };
        self.app.config_store().load(&name)
    }

    /// Expand `selector` (default `"all"`) and resolve each service's platform.
    pub fn resolve_services(
        &self,
        environment: &EnvironmentConfig,
        selector: Option<&str>,
    ) -> Vec<ServicePlatformInfo> {
        let names = resolve_selector(selector.unwrap_or(ALL_SERVICES), environment);
        resolve_service_deployments(&names, environment)
    }

    pub fn platforms_for(
        &self,
        environment: &EnvironmentConfig,
        app: &AppContext,
    ) -> Result<Arc<PlatformSet>> {
        match &self.platforms {
            Some(platforms) => Ok(Arc::clone(platforms)),
            None => Ok(Arc::new(PlatformSet::with_defaults(environment, app)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::platform::{MockOptions, MockState};

    fn project(environment: &str, content: &str) -> TempDir {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("environments");
        std::fs::create_dir_all(&dir).expect("environments dir");
        std::fs::write(dir.join(environment), content).expect("write env");
        temp
    }

    fn orchestrator(temp: &TempDir, state: &MockState) -> Orchestrator {
        let platforms = PlatformSet::builder()
            .with(MockOptions::with_state(state.clone()))
            .expect("mock registers")
            .build();
        let app = AppContext::new(temp.path().to_path_buf(), temp.path().join("state"));
        Orchestrator::new(app)
            .expect("builtins")
            .with_platforms(Arc::new(platforms))
    }

    const DEV: &str = r#"{
        "platform": { "default": "mock" },
        "services": {
            "api": { "type": "backend", "port": 4000 },
            "db": { "type": "database" }
        }
    }"#;

    #[tokio::test]
    async fn test_run_start_on_mock_platform() {
        let temp = project("dev.json", DEV);
        let state = MockState::default();
        let results = orchestrator(&temp, &state)
            .run("start", json!({ "environment": "dev" }))
            .await
            .expect("runs");
        assert_eq!(results.command(), "start");
        assert_eq!(results.environment(), "dev");
        assert_eq!(results.summary().total, 2);
        assert!(results.is_success());
        assert!(state.is_running("berth-api-dev"));
    }

    #[tokio::test]
    async fn test_service_selector_limits_dispatch() {
        let temp = project("dev.json", DEV);
        let state = MockState::default();
        let results = orchestrator(&temp, &state)
            .run("stop", json!({ "environment": "dev", "service": "db" }))
            .await
            .expect("runs");
        assert_eq!(results.results().len(), 1);
        assert_eq!(results.results()[0].entity, "db");
    }

    #[tokio::test]
    async fn test_unknown_command_lists_available() {
        let temp = project("dev.json", DEV);
        let err = orchestrator(&temp, &MockState::default())
            .run("deploy", json!({}))
            .await
            .expect_err("unknown");
        match err {
            OrchestratorError::Configuration { suggestion, .. } => {
                assert!(suggestion.contains("start"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_environment_file() {
        let temp = project("dev.json", DEV);
        let err = orchestrator(&temp, &MockState::default())
            .run("check", json!({ "environment": "prod" }))
            .await
            .expect_err("no prod");
        assert!(err.to_string().contains("'prod'"));
    }

    #[tokio::test]
    async fn test_invalid_options_never_reach_handler() {
        let temp = project("dev.json", DEV);
        let state = MockState::default();
        let err = orchestrator(&temp, &state)
            .run("start", json!({ "environment": "dev", "output": "xml" }))
            .await
            .expect_err("rejected");
        assert!(matches!(err, OrchestratorError::Validation { .. }));
        assert!(state.invocations("berth-api-dev").is_empty());
    }

    #[tokio::test]
    async fn test_list_reports_capabilities() {
        let temp = project("dev.json", DEV);
        let results = orchestrator(&temp, &MockState::default())
            .run("list", json!({ "environment": "dev" }))
            .await
            .expect("runs");
        let db = results
            .results()
            .iter()
            .find(|r| r.entity == "db")
            .expect("db listed");
        let capabilities = db.metadata["capabilities"].as_array().expect("array");
        assert!(capabilities.iter().any(|c| c == "backup"));
        let api = results
            .results()
            .iter()
            .find(|r| r.entity == "api")
            .expect("api listed");
        assert_eq!(api.endpoint.as_deref(), Some("http://localhost:4000"));
    }

    #[tokio::test]
    async fn test_credentials_per_platform() {
        let temp = project("dev.json", DEV);
        let results = orchestrator(&temp, &MockState::default())
            .run("credentials", json!({ "environment": "dev" }))
            .await
            .expect("runs");
        assert_eq!(results.results().len(), 1);
        assert_eq!(results.results()[0].entity, "mock");
        assert!(results.results()[0].service_type.is_none());
        assert!(results.is_success());
    }
}
