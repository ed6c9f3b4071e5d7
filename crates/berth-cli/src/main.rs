//! Berth - multi-platform service orchestrator
//!
//! Usage:
//!   berth check -e staging             # Health of every service
//!   berth start -e dev -s api,worker   # Start selected services
//!   berth logs -e prod --level warn    # Merged logs
//!   berth describe start               # Options of one command

mod render;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use berth_core::commands::OutputFormat;
use berth_core::context::AppContext;
use berth_core::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(about = "Deploy and operate services across platforms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct GlobalArgs {
    /// Environment to operate on (defaults to $BERTH_ENV)
    #[arg(short, long, global = true, alias = "env")]
    environment: Option<String>,

    /// Service name, comma-separated list or "all"
    #[arg(short, long, global = true)]
    service: Option<String>,

    /// Output format: summary, table, json or yaml
    #[arg(short, long, global = true, default_value = "summary")]
    output: String,

    /// Show what would happen without doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print failures
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct BailArgs {
    /// Stop after the first failed service
    #[arg(short, long)]
    bail: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start services on their platforms
    Start {
        #[command(flatten)]
        bail: BailArgs,
        /// Start even if already running
        #[arg(short, long)]
        force: bool,
    },
    /// Stop running services
    Stop(BailArgs),
    /// Restart services
    Restart(BailArgs),
    /// Report service health
    Check {
        #[command(flatten)]
        bail: BailArgs,
        /// Also probe the health endpoint
        #[arg(long)]
        deep: bool,
    },
    /// Create the infrastructure services need
    Provision(BailArgs),
    /// Build and publish service artifacts
    Publish {
        #[command(flatten)]
        bail: BailArgs,
        /// Image tag
        #[arg(long, default_value = "latest")]
        tag: String,
    },
    /// Roll services forward to their latest artifact
    Update(BailArgs),
    /// Back up service data
    Backup {
        #[command(flatten)]
        bail: BailArgs,
        /// Archive to write
        #[arg(long)]
        file: Option<String>,
    },
    /// Restore service data from a backup
    Restore {
        #[command(flatten)]
        bail: BailArgs,
        /// Archive to restore
        #[arg(long)]
        file: String,
    },
    /// Run service test suites
    Test(BailArgs),
    /// Run a command inside one service
    Exec {
        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Snapshot of service status
    Watch {
        /// Also probe the health endpoint
        #[arg(long)]
        deep: bool,
    },
    /// Apply configuration to services
    Configure(BailArgs),
    /// Show merged logs across services
    Logs {
        /// Newest entries to keep
        #[arg(short = 'n', long, default_value_t = 100)]
        tail: usize,
        /// RFC 3339 start time
        #[arg(long)]
        since: Option<String>,
        /// Minimum level (debug, info, warn, error)
        #[arg(long)]
        level: Option<String>,
    },
    /// List the services of an environment
    List,
    /// Verify credentials for every platform an environment uses
    Credentials,
    /// Show the options of a command
    Describe {
        /// Command to describe; all commands when omitted
        command: Option<String>,
    },
}

impl Commands {
    /// Command name and command-specific options.
    fn into_request(self) -> (&'static str, Map<String, Value>) {
        let mut extra = Map::new();
        let mut put = |key: &str, value: Value| {
            extra.insert(key.to_string(), value);
        };
        let name = match self {
            Commands::Start { bail, force } => {
                put("bail", json!(bail.bail));
                put("force", json!(force));
                "start"
            }
            Commands::Stop(bail) => {
                put("bail", json!(bail.bail));
                "stop"
            }
            Commands::Restart(bail) => {
                put("bail", json!(bail.bail));
                "restart"
            }
            Commands::Check { bail, deep } => {
                put("bail", json!(bail.bail));
                put("deep", json!(deep));
                "check"
            }
            Commands::Provision(bail) => {
                put("bail", json!(bail.bail));
                "provision"
            }
            Commands::Publish { bail, tag } => {
                put("bail", json!(bail.bail));
                put("tag", json!(tag));
                "publish"
            }
            Commands::Update(bail) => {
                put("bail", json!(bail.bail));
                "update"
            }
            Commands::Backup { bail, file } => {
                put("bail", json!(bail.bail));
                if let Some(file) = file {
                    put("file", json!(file));
                }
                "backup"
            }
            Commands::Restore { bail, file } => {
                put("bail", json!(bail.bail));
                put("file", json!(file));
                "restore"
            }
            Commands::Test(bail) => {
                put("bail", json!(bail.bail));
                "test"
            }
            Commands::Exec { command } => {
                put("command", json!(command.join(" ")));
                "exec"
            }
            Commands::Watch { deep } => {
                put("deep", json!(deep));
                "watch"
            }
            Commands::Configure(bail) => {
                put("bail", json!(bail.bail));
                "configure"
            }
            Commands::Logs { tail, since, level } => {
                put("tail", json!(tail));
                if let Some(since) = since {
                    put("since", json!(since));
                }
                if let Some(level) = level {
                    put("level", json!(level));
                }
                "logs"
            }
            Commands::List => "list",
            Commands::Credentials => "credentials",
            Commands::Describe { .. } => "describe",
        };
        (name, extra)
    }
}

impl GlobalArgs {
    fn raw_options(&self, extra: Map<String, Value>) -> Value {
        let mut raw = Map::new();
        if let Some(environment) = &self.environment {
            raw.insert("environment".into(), json!(environment));
        }
        if let Some(service) = &self.service {
            raw.insert("service".into(), json!(service));
        }
        raw.insert("output".into(), json!(self.output));
        raw.insert("dryRun".into(), json!(self.dry_run));
        raw.insert("verbose".into(), json!(self.verbose));
        raw.insert("quiet".into(), json!(self.quiet));
        raw.extend(extra);
        Value::Object(raw)
    }

    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "berth=debug,info"
        } else if self.quiet {
            "error"
        } else {
            "berth=info,warn"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("BERTH_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| cli.global.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if !run_cli(cli).await? {
        std::process::exit(1);
    }
    Ok(())
}

/// Returns whether the command succeeded.
async fn run_cli(mut cli: Cli) -> Result<bool> {
    let format: OutputFormat = cli.global.output.parse().map_err(anyhow::Error::msg)?;
    cli.global.output = format.to_string();
    let app = AppContext::with_defaults()
        .context("Failed to set up the orchestrator context")?
        .with_dry_run(cli.global.dry_run)
        .with_verbose(cli.global.verbose);
    let orchestrator = Orchestrator::new(app)?;

    if let Commands::Describe { command } = &cli.command {
        render::print_description(orchestrator.catalog(), command.as_deref())?;
        return Ok(true);
    }

    let (name, extra) = cli.command.into_request();
    let raw = cli.global.raw_options(extra);
    tracing::debug!("Request for {}: {}", name, raw);
    let results = orchestrator.run(name, raw).await?;

    render::print_results(&results, format, cli.global.quiet)?;
    Ok(results.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments parse")
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["berth", "check", "-e", "prod", "-s", "api,db", "--deep", "-o", "json"]);
        assert_eq!(cli.global.environment.as_deref(), Some("prod"));
        assert_eq!(cli.global.service.as_deref(), Some("api,db"));
        assert_eq!(cli.global.output, "json");

        let (name, extra) = cli.command.into_request();
        assert_eq!(name, "check");
        assert_eq!(extra["deep"], true);
        assert_eq!(extra["bail"], false);
    }

    #[test]
    fn raw_options_use_camel_case() {
        let cli = parse(&["berth", "--dry-run", "start", "--bail", "--force"]);
        let (name, extra) = cli.command.into_request();
        let raw = cli.global.raw_options(extra);
        assert_eq!(name, "start");
        assert_eq!(raw["dryRun"], true);
        assert_eq!(raw["bail"], true);
        assert_eq!(raw["force"], true);
        assert_eq!(raw["output"], "summary");
        assert!(raw.get("environment").is_none());
    }

    #[test]
    fn exec_collects_trailing_command() {
        let cli = parse(&["berth", "exec", "-s", "api", "--", "ls", "-la", "/app"]);
        let (name, extra) = cli.command.into_request();
        assert_eq!(name, "exec");
        assert_eq!(extra["command"], "ls -la /app");
        assert_eq!(cli.global.service.as_deref(), Some("api"));
    }

    #[test]
    fn restore_requires_file() {
        assert!(Cli::try_parse_from(["berth", "restore"]).is_err());
        let cli = parse(&["berth", "restore", "--file", "db.sql"]);
        let (_, extra) = cli.command.into_request();
        assert_eq!(extra["file"], "db.sql");
    }

    #[test]
    fn logs_defaults() {
        let cli = parse(&["berth", "logs", "--level", "warn"]);
        let (_, extra) = cli.command.into_request();
        assert_eq!(extra["tail"], 100);
        assert_eq!(extra["level"], "warn");
        assert!(extra.get("since").is_none());
    }

    #[test]
    fn verbose_raises_log_level() {
        let cli = parse(&["berth", "list", "-v"]);
        assert_eq!(cli.global.log_filter(), "berth=debug,info");
        let cli = parse(&["berth", "list"]);
        assert_eq!(cli.global.log_filter(), "berth=info,warn");
    }
}
