//! Local container runtime (docker or podman).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EnvironmentConfig;
use crate::error::Result;
use crate::handler::{
    Extensions, HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport, ResourceInfo,
};
use crate::health::{DEFAULT_HEALTH_TIMEOUT, health_url, http_health_check};
use crate::process::{ProcessRunner, SystemRunner};
use crate::readiness::{ReadinessPolicy, wait_until_ready};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

use super::{
    CredentialCheck, LogEntry, LogOptions, PlatformProvider, PlatformStrategy, ServiceState,
    env_pairs, extension, render_command,
};

const PLATFORM: PlatformType = PlatformType::Container;

pub const RUNTIME_ENV: &str = "BERTH_CONTAINER_RUNTIME";

const DEFAULT_LOG_TAIL: usize = 200;

const INSPECT_FORMAT: &str = "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";

#[derive(Debug, Clone)]
pub struct ContainerOptions {
    runtime: String,
    runner: Arc<dyn ProcessRunner>,
    readiness: ReadinessPolicy,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            runtime: std::env::var(RUNTIME_ENV).unwrap_or_else(|_| "docker".to_string()),
            runner: Arc::new(SystemRunner::new()),
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl ContainerOptions {
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    async fn runtime_call(&self, args: Vec<String>) -> Result<crate::process::ProcessOutput> {
        self.runner.run(&self.runtime, &args).await
    }

    async fn container_status(&self, container: &str) -> Option<(String, String)> {
        let output = self
            .runtime_call(strings(["inspect", "--format", INSPECT_FORMAT, container]))
            .await
            .ok()?;
        if !output.success() {
            return None;
        }
        let line = output.stdout.trim();
        let (status, health) = line.split_once('|').unwrap_or((line, ""));
        Some((status.to_string(), health.to_string()))
    }
}

impl PlatformProvider for ContainerOptions {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let shared = Arc::new(self.clone());
        let all = &ServiceType::ALL;
        let buildable = &[
            ServiceType::Frontend,
            ServiceType::Backend,
            ServiceType::Inference,
            ServiceType::Proxy,
            ServiceType::Worker,
            ServiceType::Generic,
        ];

        let mut handlers = Vec::new();
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types("start", PLATFORM, all, move |ctx| {
            start(Arc::clone(&s), ctx)
        }));
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types("stop", PLATFORM, all, move |ctx| {
            stop(Arc::clone(&s), ctx)
        }));
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types("restart", PLATFORM, all, move |ctx| {
            restart(Arc::clone(&s), ctx)
        }));
        for command in ["check", "watch"] {
            let s = Arc::clone(&shared);
            handlers.extend(HandlerDescriptor::for_types(command, PLATFORM, all, move |ctx| {
                check(Arc::clone(&s), ctx)
            }));
        }
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types("exec", PLATFORM, all, move |ctx| {
            exec(Arc::clone(&s), ctx)
        }));
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types(
            "publish",
            PLATFORM,
            buildable,
            move |ctx| publish(Arc::clone(&s), ctx),
        ));
        let s = Arc::clone(&shared);
        handlers.push(HandlerDescriptor::new(
            "backup",
            PLATFORM,
            ServiceType::Database,
            move |ctx| backup(Arc::clone(&s), ctx),
        ));
        handlers
    }

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy> {
        Arc::new(ContainerPlatform {
            options: *self,
            registry,
        })
    }
}

#[derive(Debug)]
pub struct ContainerPlatform {
    options: ContainerOptions,
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl PlatformStrategy for ContainerPlatform {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn build_handler_context_extensions(
        &self,
        service: &dyn Service,
        _requires_discovery: bool,
    ) -> Result<Extensions> {
        let mut extensions = Extensions::new();
        extension(&mut extensions, "runtime", self.options.runtime.as_str());
        extension(&mut extensions, "containerName", self.resource_name(service));
        if let Some(image) = service.image() {
            extension(&mut extensions, "image", image);
        }
        Ok(extensions)
    }

    async fn collect_logs(
        &self,
        service: &dyn Service,
        options: &LogOptions,
    ) -> Option<Vec<LogEntry>> {
        let container = self.resource_name(service);
        let tail = options.tail.unwrap_or(DEFAULT_LOG_TAIL).to_string();
        let output = match self
            .options
            .runtime_call(strings(["logs", "--timestamps", "--tail", &tail, &container]))
            .await
        {
            Ok(output) if output.success() => output,
            Ok(output) => {
                debug!("No logs for {}: {}", container, output.diagnostic());
                return Some(Vec::new());
            }
            Err(e) => {
                debug!("No logs for {}: {}", container, e);
                return Some(Vec::new());
            }
        };
        let now = Utc::now();
        Some(
            output
                .stdout
                .lines()
                .chain(output.stderr.lines())
                .filter(|line| !line.trim().is_empty())
                .map(|line| LogEntry::parse_line(service.name(), PLATFORM, line, now))
                .collect(),
        )
    }

    async fn validate_credentials(&self, _environment: &EnvironmentConfig) -> CredentialCheck {
        let runtime = self.options.runtime.as_str();
        match self.options.runtime_call(strings(["version"])).await {
            Ok(output) if output.success() => CredentialCheck::valid(),
            Ok(output) => CredentialCheck::invalid(
                format!("{runtime} is installed but not reachable: {}", output.diagnostic()),
                format!("Start the {runtime} daemon or set {RUNTIME_ENV} to another runtime"),
            ),
            Err(e) => CredentialCheck::invalid(
                format!("{runtime} could not be run: {e}"),
                format!("Install {runtime} or set {RUNTIME_ENV} to an installed runtime"),
            ),
        }
    }

    async fn quick_check_running(&self, state: &ServiceState) -> bool {
        let Some(container) = state.resource_id.as_deref() else {
            return false;
        };
        matches!(
            self.options.container_status(container).await,
            Some((status, _)) if status == "running"
        )
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn container_name(ctx: &HandlerContext) -> String {
    ctx.extension_str("containerName")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.resource_name.clone())
}

fn run_args(ctx: &HandlerContext, container: &str, image: &str) -> Vec<String> {
    let service = ctx.service.as_ref();
    let requirements = service.requirements();
    let mut args = strings(["run", "-d", "--name", container]);

    for port in requirements.ports() {
        args.push("-p".to_string());
        args.push(format!("{port}:{port}"));
    }
    for pair in env_pairs(&requirements.environment) {
        args.push("-e".to_string());
        args.push(pair);
    }
    for (index, storage) in requirements.storage.iter().enumerate() {
        if let Some(mount) = storage.mount_path.as_deref() {
            args.push("-v".to_string());
            args.push(format!("{container}-data-{index}:{mount}"));
        }
    }
    let mut labels = vec![
        format!("berth.project={}", service.project()),
        format!("berth.service={}", service.name()),
        format!("berth.environment={}", service.environment()),
    ];
    labels.extend(requirements.labels.iter().map(|(k, v)| format!("{k}={v}")));
    for label in labels {
        args.push("--label".to_string());
        args.push(label);
    }
    if let Some(resources) = requirements.resources.as_ref() {
        if let Some(cpu) = resources.cpu.as_deref() {
            args.push(format!("--cpus={cpu}"));
        }
        if let Some(memory) = resources.memory.as_deref() {
            args.push(format!("--memory={}", memory.trim_end_matches('i').to_lowercase()));
        }
    }

    args.push(image.to_string());
    if let Some(command) = service.command_line() {
        args.extend(command.split_whitespace().map(str::to_string));
    }
    args
}

async fn start(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let container = container_name(&ctx);
    let Some(image) = ctx.service.image() else {
        return Ok(HandlerOutput::failed(format!(
            "No image configured for '{}'. Set \"image\" in its service config",
            ctx.service.name()
        )));
    };
    let args = run_args(&ctx, &container, &image);
    let resources = ResourceInfo::new(PLATFORM)
        .with("containerName", container.as_str())
        .with("image", image.as_str());

    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", render_command(&options.runtime, &args))
            .with_resources(resources));
    }

    // A stopped container with the same name would make `run` fail.
    let _ = options.runtime_call(strings(["rm", "-f", &container])).await;

    let output = options.runtime_call(args).await?;
    if !output.success() {
        return Err(ctx.failure(output.diagnostic()));
    }
    let container_id = output.stdout.trim().to_string();
    info!("Started container {} ({})", container, short_id(&container_id));

    let probe_options = Arc::clone(&options);
    let probe_container = container.clone();
    let attempts = wait_until_ready(&container, options.readiness, move || {
        let options = Arc::clone(&probe_options);
        let container = probe_container.clone();
        async move {
            matches!(
                options.container_status(&container).await,
                Some((status, health)) if status == "running" && health != "starting" && health != "unhealthy"
            )
        }
    })
    .await?;

    let mut result = HandlerOutput::ok()
        .with_metadata("attempts", attempts)
        .with_resources(resources.with("containerId", container_id));
    if let Some(endpoint) = ctx.service.endpoint() {
        result = result.with_endpoint(endpoint);
    }
    Ok(result)
}

async fn stop(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let container = container_name(&ctx);
    let args = strings(["stop", &container]);
    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", render_command(&options.runtime, &args)));
    }
    let output = options.runtime_call(args).await?;
    if output.success() {
        return Ok(HandlerOutput::ok().with_metadata("container", container));
    }
    if output.diagnostic().contains("No such container") {
        return Ok(HandlerOutput::ok()
            .with_metadata("container", container)
            .with_metadata("alreadyStopped", true));
    }
    Err(ctx.failure(output.diagnostic()))
}

async fn restart(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let container = container_name(&ctx);
    let args = strings(["restart", &container]);
    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", render_command(&options.runtime, &args)));
    }
    let output = options.runtime_call(args).await?;
    if !output.success() {
        return Err(ctx.failure(output.diagnostic()));
    }
    Ok(HandlerOutput::ok().with_metadata("container", container))
}

async fn check(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let container = container_name(&ctx);
    let Some((status, health)) = options.container_status(&container).await else {
        return Ok(HandlerOutput::from_health(
            HealthReport::unhealthy("not-found").with_detail("container", container.as_str()),
        ));
    };

    let healthy = status == "running" && (health.is_empty() || health == "healthy");
    let mut report = if healthy {
        HealthReport::healthy(status.as_str())
    } else {
        HealthReport::unhealthy(if status == "running" {
            health.as_str()
        } else {
            status.as_str()
        })
    }
    .with_detail("container", container.as_str());
    if !health.is_empty() {
        report = report.with_detail("containerHealth", health.as_str());
    }

    // Optional HTTP probe on top of the runtime's own view.
    if healthy
        && ctx.option_bool("deep")
        && let Some(endpoint) = ctx.service.endpoint()
    {
        let url = health_url(&endpoint, ctx.service.health_check_path().as_deref());
        let http = http_health_check(&url, DEFAULT_HEALTH_TIMEOUT).await;
        report = HealthReport {
            healthy: http.healthy,
            status: http.status.clone(),
            details: report.details,
        }
        .with_detail("http", serde_json::to_value(&http).unwrap_or(Value::Null));
    }

    let mut output = HandlerOutput::from_health(report)
        .with_resources(ResourceInfo::new(PLATFORM).with("containerName", container));
    if let Some(endpoint) = ctx.service.endpoint() {
        output = output.with_endpoint(endpoint);
    }
    Ok(output)
}

async fn exec(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let Some(command) = ctx.option_str("command").map(str::to_string) else {
        return Ok(HandlerOutput::failed("exec requires a command"));
    };
    let container = container_name(&ctx);
    let args = strings(["exec", &container, "sh", "-c", &command]);
    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", render_command(&options.runtime, &args)));
    }
    let output = options.runtime_call(args).await?;
    let result = if output.success() {
        HandlerOutput::ok()
    } else {
        HandlerOutput::failed(format!(
            "command exited with status {}",
            output.status.map_or("unknown".to_string(), |s| s.to_string())
        ))
    };
    Ok(result
        .with_metadata("exitCode", output.status)
        .with_metadata("stdout", output.stdout)
        .with_metadata("stderr", output.stderr))
}

async fn publish(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let service = ctx.service.as_ref();
    let requirements = service.requirements();
    let build = requirements.build.unwrap_or_default();
    if build.prebuilt == Some(true) {
        return Ok(HandlerOutput::ok().with_metadata("skipped", "image is prebuilt"));
    }

    let tag = ctx.option_str("tag").unwrap_or("latest");
    let image = service
        .config()
        .image
        .clone()
        .unwrap_or_else(|| format!("{}/{}:{tag}", service.project(), service.name()));
    let context_dir: PathBuf = service
        .project_root()
        .join(build.build_context.as_deref().unwrap_or("."));
    let dockerfile = context_dir.join(build.dockerfile.as_deref().unwrap_or("Dockerfile"));

    let mut args = strings(["build", "-t", &image, "-f"]);
    args.push(dockerfile.display().to_string());
    for (key, value) in &build.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(context_dir.display().to_string());

    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("image", image)
            .with_metadata("command", render_command(&options.runtime, &args)));
    }
    let output = options.runtime_call(args).await?;
    if !output.success() {
        return Err(ctx.failure(output.diagnostic()));
    }
    Ok(HandlerOutput::ok()
        .with_metadata("image", image.as_str())
        .with_resources(ResourceInfo::new(PLATFORM).with("image", image)))
}

async fn backup(options: Arc<ContainerOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let container = container_name(&ctx);
    let database = ctx
        .service
        .environment_variables()
        .get("POSTGRES_DB")
        .cloned()
        .unwrap_or_else(|| "postgres".to_string());
    let target = match ctx.option_str("file") {
        Some(path) => PathBuf::from(path),
        None => ctx.service.project_root().join("backups").join(format!(
            "{}-{}.sql",
            ctx.resource_name,
            Utc::now().format("%Y%m%dT%H%M%SZ")
        )),
    };
    let args = strings(["exec", &container, "pg_dump", "-U", "postgres", &database]);
    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("output", target.display().to_string())
            .with_metadata("command", render_command(&options.runtime, &args)));
    }

    let output = options.runtime_call(args).await?;
    if !output.success() {
        return Err(ctx.failure(output.diagnostic()));
    }
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, output.stdout.as_bytes()).await?;
    info!("Backed up {} to {}", database, target.display());
    Ok(HandlerOutput::ok()
        .with_metadata("output", target.display().to_string())
        .with_metadata("bytes", output.stdout.len() as u64))
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::platform::PlatformSet;
    use crate::process::scripted::ScriptedRunner;
    use crate::service::test_support::service_with;

    fn platform(runner: ScriptedRunner) -> (PlatformSet, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let options = ContainerOptions::default()
            .with_runtime("docker")
            .with_runner(runner.clone())
            .with_readiness(ReadinessPolicy {
                interval: Duration::from_millis(1),
                attempts: 3,
            });
        let set = PlatformSet::builder()
            .with(options)
            .expect("container registers")
            .build();
        (set, runner)
    }

    fn database() -> Arc<dyn Service> {
        service_with(
            "database",
            PLATFORM,
            ServiceConfig::on(PLATFORM).of_type(ServiceType::Database),
        )
    }

    #[tokio::test]
    async fn test_check_reports_running_container() {
        let (set, runner) = platform(ScriptedRunner::new().respond(0, "running|healthy\n"));
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("check", database(), &json!({}))
            .await;

        assert!(result.success, "{:?}", result.error);
        let health = result.health.expect("health");
        assert_eq!(health.status, "running");
        assert_eq!(health.details["containerHealth"], "healthy");
        assert_eq!(
            runner.calls(),
            vec![format!(
                "docker inspect --format {INSPECT_FORMAT} acme-database-test"
            )]
        );
    }

    #[tokio::test]
    async fn test_check_missing_container_is_unhealthy() {
        let (set, _) = platform(ScriptedRunner::new().respond(1, "Error: No such object"));
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("check", database(), &json!({}))
            .await;
        assert!(!result.success);
        assert_eq!(result.health.expect("health").status, "not-found");
    }

    #[tokio::test]
    async fn test_start_runs_and_waits() {
        let runner = ScriptedRunner::new()
            .respond(0, "") // rm -f
            .respond(0, "0123456789abcdef\n") // run
            .respond(0, "created|") // first probe
            .respond(0, "running|"); // second probe
        let (set, runner) = platform(runner);
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("start", database(), &json!({}))
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metadata["attempts"], 2);
        let resources = result.resources.expect("resources");
        assert_eq!(resources.identifiers["containerId"], "0123456789abcdef");

        let calls = runner.calls();
        let run = &calls[1];
        assert!(run.starts_with("docker run -d --name acme-database-test"), "{run}");
        assert!(run.contains("-p 5432:5432"), "{run}");
        assert!(run.contains("-e POSTGRES_DB=acme_test"), "{run}");
        assert!(
            run.contains("-v acme-database-test-data-0:/var/lib/postgresql/data"),
            "{run}"
        );
        assert!(run.ends_with("postgres:16-alpine"), "{run}");
    }

    #[tokio::test]
    async fn test_start_times_out_when_never_running() {
        let runner = ScriptedRunner::new()
            .respond(0, "")
            .respond(0, "abc")
            .respond(0, "restarting|")
            .respond(0, "restarting|")
            .respond(0, "restarting|");
        let (set, _) = platform(runner);
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("start", database(), &json!({}))
            .await;
        assert!(!result.success);
        assert!(
            result.error.as_deref().unwrap_or_default().contains("timed out"),
            "{:?}",
            result.error
        );
    }

    #[tokio::test]
    async fn test_start_without_image_fails_cleanly() {
        let (set, runner) = platform(ScriptedRunner::new());
        let backend = service_with(
            "backend",
            PLATFORM,
            ServiceConfig::on(PLATFORM).of_type(ServiceType::Backend),
        );
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("start", backend, &json!({}))
            .await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("No image configured"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_tolerates_missing_container() {
        let (set, _) = platform(ScriptedRunner::new().respond(1, "Error: No such container: x"));
        let result = set
            .get(PLATFORM)
            .expect("container")
            .execute("stop", database(), &json!({}))
            .await;
        assert!(result.success);
        assert_eq!(result.metadata["alreadyStopped"], true);
    }

    #[tokio::test]
    async fn test_logs_parse_timestamps() {
        let runner = ScriptedRunner::new().respond(
            0,
            "2024-05-01T10:00:01Z ready\n2024-05-01T10:00:00Z WARN slow start\n",
        );
        let (set, _) = platform(runner);
        let entries = set
            .get(PLATFORM)
            .expect("container")
            .collect_logs(database().as_ref(), &LogOptions::default())
            .await
            .expect("container produces logs");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, "warn");
        assert_eq!(entries[0].message, "ready");
    }

    #[tokio::test]
    async fn test_credentials_require_reachable_runtime() {
        let (set, _) = platform(ScriptedRunner::new().respond(1, "Cannot connect to the Docker daemon"));
        let check = set
            .get(PLATFORM)
            .expect("container")
            .validate_credentials(&EnvironmentConfig::default())
            .await;
        assert!(!check.valid);
        assert!(check.requires_action.expect("action").contains(RUNTIME_ENV));
    }
}
