//! Declarative command definitions.
//!
//! A [`CommandDefinition`] ties typed options (validated through a
//! [`Schema`] before the handler runs), argument metadata for help output,
//! and the business handler together. Definitions are assembled with
//! [`CommandBuilder`], which refuses to build an incomplete command.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EnvironmentConfig;
use crate::context::AppContext;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::Orchestrator;
use crate::platform::PlatformSet;
use crate::resolver::ServicePlatformInfo;

use super::results::CommandResults;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Summary => "summary",
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(format!(
                "unknown output format '{other}' (expected summary, table, json or yaml)"
            )),
        }
    }
}

/// Options every command accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonOptions {
    /// Falls back to `BERTH_ENV` when omitted.
    pub environment: Option<String>,
    /// `"all"` or a comma-separated list of service names.
    pub service: Option<String>,
    pub output: OutputFormat,
    pub dry_run: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// Typed options for one command.
pub trait CommandOptions: DeserializeOwned + Serialize + Send + Sync + 'static {
    fn common(&self) -> &CommonOptions;

    /// Semantic checks serde cannot express.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl CommandOptions for CommonOptions {
    fn common(&self) -> &CommonOptions {
        self
    }
}

/// Parses raw input into `O`, applying serde defaults and then `validate`.
pub struct Schema<O> {
    _options: PhantomData<fn() -> O>,
}

impl<O> Default for Schema<O> {
    fn default() -> Self {
        Self {
            _options: PhantomData,
        }
    }
}

impl<O> Clone for Schema<O> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<O> fmt::Debug for Schema<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("options", &std::any::type_name::<O>())
            .finish()
    }
}

impl<O: CommandOptions> Schema<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, command: &str, raw: Value) -> Result<O> {
        let raw = match raw {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let options: O = serde_json::from_value(raw)
            .map_err(|e| OrchestratorError::validation(command, e.to_string()))?;
        options
            .validate()
            .map_err(|message| OrchestratorError::validation(command, message))?;
        Ok(options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Flag,
    String,
    Number,
    List,
}

/// Metadata for one `--flag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<char>,
    pub kind: ArgKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ArgDef {
    pub fn new(name: impl Into<String>, kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short: None,
            kind,
            description: description.into(),
            default: None,
            aliases: Vec::new(),
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Flags and positionals of a command, independent of its schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArgSpec {
    pub flags: Vec<ArgDef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub positionals: Vec<String>,
}

impl ArgSpec {
    /// Flags shared by every command.
    pub fn common() -> Self {
        Self {
            flags: vec![
                ArgDef::new("environment", ArgKind::String, "Environment to operate on")
                    .short('e')
                    .alias("env"),
                ArgDef::new(
                    "service",
                    ArgKind::String,
                    "Service name, comma-separated list or \"all\"",
                )
                .short('s')
                .default_value("all"),
                ArgDef::new("output", ArgKind::String, "summary, table, json or yaml")
                    .short('o')
                    .default_value("summary"),
                ArgDef::new("dry-run", ArgKind::Flag, "Show what would happen without doing it"),
                ArgDef::new("verbose", ArgKind::Flag, "Verbose logging").short('v'),
                ArgDef::new("quiet", ArgKind::Flag, "Only print errors").short('q'),
            ],
            positionals: Vec::new(),
        }
    }

    pub fn flag(mut self, flag: ArgDef) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn positional(mut self, name: impl Into<String>) -> Self {
        self.positionals.push(name.into());
        self
    }

    pub fn find(&self, name: &str) -> Option<&ArgDef> {
        self.flags
            .iter()
            .find(|f| f.name == name || f.aliases.iter().any(|a| a == name))
    }

    /// Plain-text usage block.
    pub fn render_help(&self, command: &str) -> String {
        let mut usage = format!("Usage: berth {command}");
        for positional in &self.positionals {
            usage.push_str(&format!(" <{positional}>"));
        }
        usage.push_str(" [OPTIONS]\n\nOptions:\n");
        for flag in &self.flags {
            let short = flag
                .short
                .map(|c| format!("-{c}, "))
                .unwrap_or_else(|| "    ".to_string());
            let value = match flag.kind {
                ArgKind::Flag => String::new(),
                ArgKind::Number => " <N>".to_string(),
                ArgKind::String => " <VALUE>".to_string(),
                ArgKind::List => " <A,B,..>".to_string(),
            };
            let default = flag
                .default
                .as_deref()
                .map(|d| format!(" [default: {d}]"))
                .unwrap_or_default();
            usage.push_str(&format!(
                "  {short}--{}{value}\n      {}{default}\n",
                flag.name, flag.description
            ));
        }
        usage
    }
}

/// Everything a command handler may use, owned by one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub command: String,
    pub app: AppContext,
    pub environment: Arc<EnvironmentConfig>,
    pub platforms: Arc<PlatformSet>,
}

pub type CommandHandler<O> = Arc<
    dyn Fn(CommandContext, Vec<ServicePlatformInfo>, O) -> BoxFuture<'static, Result<CommandResults>>
        + Send
        + Sync,
>;

/// Documentation view of a command, independent of its option type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub arg_spec: ArgSpec,
    pub requires_environment: bool,
    pub requires_services: bool,
    pub examples: Vec<String>,
}

pub struct CommandDefinition<O: CommandOptions> {
    name: String,
    description: String,
    schema: Schema<O>,
    arg_spec: ArgSpec,
    requires_environment: bool,
    requires_services: bool,
    examples: Vec<String>,
    handler: CommandHandler<O>,
}

impl<O: CommandOptions> fmt::Debug for CommandDefinition<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("requires_environment", &self.requires_environment)
            .field("requires_services", &self.requires_services)
            .finish_non_exhaustive()
    }
}

impl<O: CommandOptions> CommandDefinition<O> {
    pub fn builder() -> CommandBuilder<O> {
        CommandBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &Schema<O> {
        &self.schema
    }

    pub fn arg_spec(&self) -> &ArgSpec {
        &self.arg_spec
    }

    pub fn requires_environment(&self) -> bool {
        self.requires_environment
    }

    pub fn requires_services(&self) -> bool {
        self.requires_services
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    pub fn info(&self) -> CommandInfo {
        CommandInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            arg_spec: self.arg_spec.clone(),
            requires_environment: self.requires_environment,
            requires_services: self.requires_services,
            examples: self.examples.clone(),
        }
    }

    /// Validate, resolve and hand over to the handler.
    ///
    /// Invalid options never reach the handler. A command that does not
    /// require services gets an empty service list.
    pub async fn execute(&self, orchestrator: &Orchestrator, raw: Value) -> Result<CommandResults> {
        let options = self.schema.parse(&self.name, raw)?;
        let common = options.common().clone();
        let app = orchestrator
            .app()
            .clone()
            .with_dry_run(orchestrator.app().dry_run() || common.dry_run)
            .with_verbose(orchestrator.app().verbose() || common.verbose);

        let environment = if self.requires_environment {
            orchestrator.load_environment(common.environment.as_deref())?
        } else {
            EnvironmentConfig {
                name: common.environment.clone(),
                ..Default::default()
            }
        };
        let services = if self.requires_services {
            orchestrator.resolve_services(&environment, common.service.as_deref())
        } else {
            Vec::new()
        };
        let platforms = orchestrator.platforms_for(&environment, &app)?;

        let context = CommandContext {
            command: self.name.clone(),
            app,
            environment: Arc::new(environment),
            platforms,
        };
        (self.handler)(context, services, options).await
    }
}

/// Object-safe view of a command so definitions with different option
/// types can live in one catalog.
#[async_trait]
pub trait AnyCommand: Send + Sync + fmt::Debug {
    fn info(&self) -> CommandInfo;

    async fn run(&self, orchestrator: &Orchestrator, raw: Value) -> Result<CommandResults>;
}

#[async_trait]
impl<O: CommandOptions> AnyCommand for CommandDefinition<O> {
    fn info(&self) -> CommandInfo {
        CommandDefinition::info(self)
    }

    async fn run(&self, orchestrator: &Orchestrator, raw: Value) -> Result<CommandResults> {
        self.execute(orchestrator, raw).await
    }
}

pub struct CommandBuilder<O: CommandOptions> {
    name: Option<String>,
    description: Option<String>,
    schema: Option<Schema<O>>,
    arg_spec: Option<ArgSpec>,
    requires_environment: bool,
    requires_services: bool,
    examples: Vec<String>,
    handler: Option<CommandHandler<O>>,
}

impl<O: CommandOptions> Default for CommandBuilder<O> {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            schema: None,
            arg_spec: None,
            requires_environment: true,
            requires_services: true,
            examples: Vec::new(),
            handler: None,
        }
    }
}

impl<O: CommandOptions> CommandBuilder<O> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn schema(mut self, schema: Schema<O>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn arg_spec(mut self, arg_spec: ArgSpec) -> Self {
        self.arg_spec = Some(arg_spec);
        self
    }

    pub fn requires_environment(mut self, required: bool) -> Self {
        self.requires_environment = required;
        self
    }

    pub fn requires_services(mut self, required: bool) -> Self {
        self.requires_services = required;
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CommandContext, Vec<ServicePlatformInfo>, O) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CommandResults>> + Send + 'static,
    {
        self.handler = Some(Arc::new(
            move |ctx, services, options| -> BoxFuture<'static, Result<CommandResults>> {
                Box::pin(handler(ctx, services, options))
            },
        ));
        self
    }

    /// Fails with every missing part listed, not just the first.
    pub fn build(self) -> Result<CommandDefinition<O>> {
        let mut missing = Vec::new();
        if self.name.is_none() {
            missing.push("name");
        }
        if self.description.is_none() {
            missing.push("description");
        }
        if self.schema.is_none() {
            missing.push("schema");
        }
        if self.arg_spec.is_none() {
            missing.push("argSpec");
        }
        if self.handler.is_none() {
            missing.push("handler");
        }

        match (
            self.name,
            self.description,
            self.schema,
            self.arg_spec,
            self.handler,
        ) {
            (Some(name), Some(description), Some(schema), Some(arg_spec), Some(handler)) => {
                Ok(CommandDefinition {
                    name,
                    description,
                    schema,
                    arg_spec,
                    requires_environment: self.requires_environment,
                    requires_services: self.requires_services,
                    examples: self.examples,
                    handler,
                })
            }
            _ => Err(OrchestratorError::InvalidCommand { missing }),
        }
    }
}
