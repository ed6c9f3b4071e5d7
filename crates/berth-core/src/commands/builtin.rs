//! The commands `berth` ships with.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::platform::{LogOptions, level_rank};
use crate::resolver::{
    ALL_SERVICES, ServicePlatformInfo, get_services_by_platform, get_services_in_environment,
    resolve_service_deployments,
};

use super::definition::{
    AnyCommand, ArgDef, ArgKind, ArgSpec, CommandContext, CommandDefinition, CommandInfo,
    CommandOptions, CommonOptions, Schema,
};
use super::dispatch::{DispatchPolicy, aggregator_for, build_service, dispatch_services};
use super::logs::aggregate_logs;
use super::results::{CommandResult, CommandResults};

const DEFAULT_LOG_TAIL: usize = 100;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "warning", "error"];

/// Options for commands that fold over services through platform handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleOptions {
    #[serde(flatten)]
    pub common: CommonOptions,
    /// Stop after the first failed service.
    pub bail: bool,
    /// `start` even if the service already runs.
    pub force: bool,
    /// `check`/`watch` also probe the health endpoint.
    pub deep: bool,
    /// Image tag for `publish`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Archive path for `backup` and `restore`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl CommandOptions for LifecycleOptions {
    fn common(&self) -> &CommonOptions {
        &self.common
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreOptions {
    #[serde(flatten)]
    pub lifecycle: LifecycleOptions,
}

impl CommandOptions for RestoreOptions {
    fn common(&self) -> &CommonOptions {
        &self.lifecycle.common
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.lifecycle.file.as_deref() {
            Some(file) if !file.trim().is_empty() => Ok(()),
            _ => Err("restore needs --file <backup>".into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecOptions {
    #[serde(flatten)]
    pub common: CommonOptions,
    pub command: String,
}

impl CommandOptions for ExecOptions {
    fn common(&self) -> &CommonOptions {
        &self.common
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("a command to run is required".into());
        }
        match self.common.service.as_deref().map(str::trim) {
            None | Some("") => Err("exec needs --service <name>".into()),
            Some(s) if s.eq_ignore_ascii_case(ALL_SERVICES) || s.contains(',') => {
                Err("exec runs in exactly one service".into())
            }
            Some(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogsOptions {
    #[serde(flatten)]
    pub common: CommonOptions,
    pub tail: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            common: CommonOptions::default(),
            tail: DEFAULT_LOG_TAIL,
            since: None,
            level: None,
        }
    }
}

impl LogsOptions {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            tail: Some(self.tail),
            since: self.since,
            level: self.level.as_deref().map(str::to_ascii_lowercase),
        }
    }
}

impl CommandOptions for LogsOptions {
    fn common(&self) -> &CommonOptions {
        &self.common
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.tail == 0 {
            return Err("tail must be at least 1".into());
        }
        if let Some(level) = self.level.as_deref()
            && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
        {
            return Err(format!(
                "unknown log level '{level}' (expected debug, info, warn or error)"
            ));
        }
        Ok(())
    }
}

/// Every command by name.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    commands: BTreeMap<String, Arc<dyn AnyCommand>>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in command set.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for command in builtin_commands()? {
            catalog.register(command);
        }
        Ok(catalog)
    }

    /// Add a command, replacing any command with the same name.
    pub fn register(&mut self, command: Arc<dyn AnyCommand>) -> Option<Arc<dyn AnyCommand>> {
        let name = command.info().name;
        let displaced = self.commands.insert(name.clone(), command);
        if displaced.is_some() {
            debug!("Command '{}' replaced", name);
        }
        displaced
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnyCommand>> {
        self.commands.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn infos(&self) -> Vec<CommandInfo> {
        self.commands.values().map(|c| c.info()).collect()
    }
}

fn builtin_commands() -> Result<Vec<Arc<dyn AnyCommand>>> {
    let bail = || ArgDef::new("bail", ArgKind::Flag, "Stop after the first failed service").short('b');
    let deep = || ArgDef::new("deep", ArgKind::Flag, "Also probe the health endpoint");

    Ok(vec![
        lifecycle(
            "start",
            "Start services on their platforms",
            vec![
                bail(),
                ArgDef::new("force", ArgKind::Flag, "Start even if already running").short('f'),
            ],
            "berth start -e staging -s backend,frontend",
        )?,
        lifecycle("stop", "Stop running services", vec![bail()], "berth stop -e dev")?,
        lifecycle("restart", "Restart services", vec![bail()], "berth restart -s api")?,
        lifecycle(
            "check",
            "Report service health",
            vec![bail(), deep()],
            "berth check -e prod -o json",
        )?,
        lifecycle(
            "provision",
            "Create the infrastructure services need",
            vec![bail()],
            "berth provision -e staging --dry-run",
        )?,
        lifecycle(
            "publish",
            "Build and publish service artifacts",
            vec![
                bail(),
                ArgDef::new("tag", ArgKind::String, "Image tag").default_value("latest"),
            ],
            "berth publish -s backend --tag v1.4.0",
        )?,
        lifecycle(
            "update",
            "Roll services forward to their latest artifact",
            vec![bail()],
            "berth update -e prod -s backend",
        )?,
        lifecycle(
            "backup",
            "Back up service data",
            vec![bail(), ArgDef::new("file", ArgKind::String, "Archive to write")],
            "berth backup -s database --file db.sql",
        )?,
        Arc::new(
            CommandDefinition::<RestoreOptions>::builder()
                .name("restore")
                .description("Restore service data from a backup")
                .schema(Schema::new())
                .arg_spec(
                    ArgSpec::common()
                        .flag(bail())
                        .flag(ArgDef::new("file", ArgKind::String, "Archive to restore")),
                )
                .example("berth restore -s database --file db.sql")
                .handler(|ctx, services, options: RestoreOptions| {
                    run_lifecycle(ctx, services, options.lifecycle)
                })
                .build()?,
        ),
        lifecycle("test", "Run service test suites", vec![bail()], "berth test -s backend")?,
        lifecycle(
            "watch",
            "Snapshot of service status",
            vec![deep()],
            "berth watch -e staging",
        )?,
        lifecycle(
            "configure",
            "Apply configuration to services",
            vec![bail()],
            "berth configure -e dev",
        )?,
        Arc::new(
            CommandDefinition::<ExecOptions>::builder()
                .name("exec")
                .description("Run a command inside one service")
                .schema(Schema::new())
                .arg_spec(ArgSpec::common().positional("command"))
                .example("berth exec -s backend -- ls /app")
                .handler(run_exec)
                .build()?,
        ),
        Arc::new(
            CommandDefinition::<LogsOptions>::builder()
                .name("logs")
                .description("Show merged logs across services")
                .schema(Schema::new())
                .arg_spec(
                    ArgSpec::common()
                        .flag(
                            ArgDef::new("tail", ArgKind::Number, "Newest entries to keep")
                                .short('n')
                                .default_value(DEFAULT_LOG_TAIL.to_string()),
                        )
                        .flag(ArgDef::new("since", ArgKind::String, "RFC 3339 start time"))
                        .flag(ArgDef::new("level", ArgKind::String, "Minimum level")),
                )
                .example("berth logs -s backend,worker --level warn")
                .handler(run_logs)
                .build()?,
        ),
        Arc::new(
            CommandDefinition::<CommonOptions>::builder()
                .name("list")
                .description("List the services of an environment")
                .schema(Schema::new())
                .arg_spec(ArgSpec::common())
                .requires_services(false)
                .example("berth list -e staging -o table")
                .handler(run_list)
                .build()?,
        ),
        Arc::new(
            CommandDefinition::<CommonOptions>::builder()
                .name("credentials")
                .description("Verify credentials for every platform an environment uses")
                .schema(Schema::new())
                .arg_spec(ArgSpec::common())
                .requires_services(false)
                .example("berth credentials -e prod")
                .handler(run_credentials)
                .build()?,
        ),
    ])
}

fn lifecycle(
    name: &str,
    description: &str,
    flags: Vec<ArgDef>,
    example: &str,
) -> Result<Arc<dyn AnyCommand>> {
    let arg_spec = flags.into_iter().fold(ArgSpec::common(), ArgSpec::flag);
    let definition = CommandDefinition::<LifecycleOptions>::builder()
        .name(name)
        .description(description)
        .schema(Schema::new())
        .arg_spec(arg_spec)
        .example(example)
        .handler(run_lifecycle)
        .build()?;
    Ok(Arc::new(definition))
}

fn handler_options<O: Serialize>(command: &str, options: &O) -> Result<Value> {
    serde_json::to_value(options).map_err(|e| OrchestratorError::validation(command, e.to_string()))
}

async fn run_lifecycle(
    ctx: CommandContext,
    services: Vec<ServicePlatformInfo>,
    options: LifecycleOptions,
) -> Result<CommandResults> {
    let raw = handler_options(&ctx.command, &options)?;
    let policy = DispatchPolicy::bail(options.bail).with_force(options.force);
    let command = ctx.command.clone();
    let mut aggregator = dispatch_services(&ctx, &services, &command, &raw, policy).await;
    if services.is_empty() {
        aggregator.add_warning(format!(
            "No services matched in environment '{}'",
            ctx.environment.name()
        ));
    }
    Ok(aggregator.into_results())
}

async fn run_exec(
    ctx: CommandContext,
    services: Vec<ServicePlatformInfo>,
    options: ExecOptions,
) -> Result<CommandResults> {
    let raw = handler_options(&ctx.command, &options)?;
    let mut aggregator =
        dispatch_services(&ctx, &services, "exec", &raw, DispatchPolicy::default()).await;
    if services.is_empty() {
        aggregator.add_error(format!(
            "Service '{}' is not defined in environment '{}'",
            options.common.service.as_deref().unwrap_or_default(),
            ctx.environment.name()
        ));
    }
    Ok(aggregator.into_results())
}

async fn run_logs(
    ctx: CommandContext,
    services: Vec<ServicePlatformInfo>,
    options: LogsOptions,
) -> Result<CommandResults> {
    let log_options = options.log_options();
    let logs = aggregate_logs(&ctx, &services, &log_options).await;

    let mut aggregator = aggregator_for(&ctx);
    for info in &services {
        if logs.unavailable.contains(&info.name) {
            aggregator.add_warning(format!(
                "Logs for {} are not available on platform {}",
                info.name, info.platform
            ));
            continue;
        }
        let entries: Vec<_> = logs
            .entries
            .iter()
            .filter(|entry| entry.service == info.name)
            .collect();
        let errors = entries
            .iter()
            .filter(|entry| level_rank(&entry.level) >= level_rank("error"))
            .count();
        let service = build_service(&ctx, info);
        aggregator.add_result(
            CommandResult::succeeded(service.as_ref())
                .with_metadata("count", entries.len())
                .with_metadata("errors", errors)
                .with_metadata("logs", json!(entries)),
        );
    }
    Ok(aggregator.into_results())
}

async fn run_list(
    ctx: CommandContext,
    _services: Vec<ServicePlatformInfo>,
    _options: CommonOptions,
) -> Result<CommandResults> {
    let names = get_services_in_environment(&ctx.environment);
    let resolved = resolve_service_deployments(&names, &ctx.environment);

    let mut aggregator = aggregator_for(&ctx);
    for name in &names {
        if !resolved.iter().any(|info| &info.name == name) {
            aggregator.add_warning(format!("{name} has no platform configured"));
        }
    }
    for info in &resolved {
        let service = build_service(&ctx, info);
        let mut result = CommandResult::succeeded(service.as_ref())
            .with_metadata("capabilities", json!(service.capabilities()));
        if let Some(image) = service.image() {
            result = result.with_metadata("image", image);
        }
        result.endpoint = service.endpoint();
        aggregator.add_result(result);
    }
    Ok(aggregator.into_results())
}

async fn run_credentials(
    ctx: CommandContext,
    _services: Vec<ServicePlatformInfo>,
    _options: CommonOptions,
) -> Result<CommandResults> {
    let grouped = get_services_by_platform(&ctx.environment);
    let mut aggregator = aggregator_for(&ctx);
    if grouped.is_empty() {
        aggregator.add_warning(format!(
            "No services with a platform in environment '{}'",
            ctx.environment.name()
        ));
    }

    for (platform_type, services) in grouped {
        let entity = platform_type.as_str();
        let Some(platform) = ctx.platforms.get(platform_type) else {
            let mut result = CommandResult::new(entity, platform_type, false);
            result.error = Some(format!("Platform {platform_type} is not available"));
            aggregator.add_result(result);
            continue;
        };
        let check = platform.validate_credentials(&ctx.environment).await;
        if !check.valid {
            warn!(
                "Credentials for {} are not valid: {}",
                entity,
                check.error.as_deref().unwrap_or("unknown error")
            );
        }
        let mut result = CommandResult::new(entity, platform_type, check.valid)
            .with_metadata("services", json!(services));
        if let Some(action) = check.requires_action {
            result = result.with_metadata("requiresAction", action);
        }
        result.error = check.error;
        aggregator.add_result(result);
    }
    Ok(aggregator.into_results())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_every_builtin() {
        let catalog = CommandCatalog::builtin().expect("builtins build");
        assert_eq!(
            catalog.names(),
            vec![
                "backup",
                "check",
                "configure",
                "credentials",
                "exec",
                "list",
                "logs",
                "provision",
                "publish",
                "restart",
                "restore",
                "start",
                "stop",
                "test",
                "update",
                "watch",
            ]
        );
        let list = catalog.get("list").expect("list").info();
        assert!(!list.requires_services);
        assert!(list.requires_environment);
    }

    #[test]
    fn test_lifecycle_options_flatten_common() {
        let options = Schema::<LifecycleOptions>::new()
            .parse(
                "publish",
                json!({ "environment": "prod", "service": "api", "bail": true, "tag": "v2" }),
            )
            .expect("valid");
        assert!(options.bail);
        assert_eq!(options.tag.as_deref(), Some("v2"));
        assert_eq!(options.common.service.as_deref(), Some("api"));

        let raw = handler_options("publish", &options).expect("serializes");
        assert_eq!(raw["tag"], "v2");
        assert_eq!(raw["environment"], "prod");
    }

    #[test]
    fn test_restore_requires_file() {
        let schema = Schema::<RestoreOptions>::new();
        assert!(schema.parse("restore", json!({})).is_err());
        let options = schema
            .parse("restore", json!({ "file": "db.sql" }))
            .expect("valid");
        assert_eq!(options.lifecycle.file.as_deref(), Some("db.sql"));
    }

    #[test]
    fn test_exec_targets_one_service() {
        let schema = Schema::<ExecOptions>::new();
        assert!(schema.parse("exec", json!({ "command": "ls" })).is_err());
        assert!(
            schema
                .parse("exec", json!({ "command": "ls", "service": "all" }))
                .is_err()
        );
        assert!(
            schema
                .parse("exec", json!({ "command": "ls", "service": "a,b" }))
                .is_err()
        );
        assert!(
            schema
                .parse("exec", json!({ "command": "ls", "service": "api" }))
                .is_ok()
        );
    }

    #[test]
    fn test_logs_options_defaults_and_levels() {
        let schema = Schema::<LogsOptions>::new();
        let options = schema.parse("logs", Value::Null).expect("defaults");
        assert_eq!(options.tail, DEFAULT_LOG_TAIL);
        assert!(schema.parse("logs", json!({ "level": "loud" })).is_err());
        assert!(schema.parse("logs", json!({ "tail": 0 })).is_err());

        let options = schema
            .parse(
                "logs",
                json!({ "level": "WARN", "since": "2026-01-01T00:00:00Z", "tail": 5 }),
            )
            .expect("valid");
        let log_options = options.log_options();
        assert_eq!(log_options.level.as_deref(), Some("warn"));
        assert_eq!(log_options.tail, Some(5));
        assert!(log_options.since.is_some());
    }
}
