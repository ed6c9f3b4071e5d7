//! Plain OS processes tracked through pid files.
//!
//! Layout under the state directory:
//! `pids/<resource>.pid` and `logs/<resource>.log`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::handler::{
    Extensions, HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport, ResourceInfo,
};
use crate::process::{ProcessRunner, SpawnRequest, SystemRunner};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

use super::{
    LogEntry, LogOptions, PlatformProvider, PlatformStrategy, ServiceState, extension,
};

const PLATFORM: PlatformType = PlatformType::Process;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    state_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl ProcessOptions {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            runner: Arc::new(SystemRunner::new()),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn pid_file(&self, resource: &str) -> PathBuf {
        self.state_dir.join("pids").join(format!("{resource}.pid"))
    }

    pub fn log_file(&self, resource: &str) -> PathBuf {
        self.state_dir.join("logs").join(format!("{resource}.log"))
    }

    async fn read_pid(&self, resource: &str) -> Option<u32> {
        let text = tokio::fs::read_to_string(self.pid_file(resource)).await.ok()?;
        text.trim().parse().ok()
    }

    /// `kill -0`: true when the pid exists and we may signal it.
    async fn is_alive(&self, pid: u32) -> bool {
        self.runner
            .run("kill", &["-0".to_string(), pid.to_string()])
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }
}

impl PlatformProvider for ProcessOptions {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let shared = Arc::new(self.clone());
        let all = &ServiceType::ALL;
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
        handlers
    }

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy> {
        Arc::new(ProcessPlatform {
            options: *self,
            registry,
        })
    }
}

#[derive(Debug)]
pub struct ProcessPlatform {
    options: ProcessOptions,
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl PlatformStrategy for ProcessPlatform {
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
        let resource = self.resource_name(service);
        let mut extensions = Extensions::new();
        extension(
            &mut extensions,
            "pidFile",
            self.options.pid_file(&resource).display().to_string(),
        );
        extension(
            &mut extensions,
            "logFile",
            self.options.log_file(&resource).display().to_string(),
        );
        Ok(extensions)
    }

    async fn collect_logs(
        &self,
        service: &dyn Service,
        options: &LogOptions,
    ) -> Option<Vec<LogEntry>> {
        let path = self.options.log_file(&self.resource_name(service));
        Some(read_log_tail(&path, service.name(), options.tail).await)
    }

    async fn quick_check_running(&self, state: &ServiceState) -> bool {
        let Some(resource) = state.resource_id.as_deref() else {
            return false;
        };
        match self.options.read_pid(resource).await {
            Some(pid) => self.options.is_alive(pid).await,
            None => false,
        }
    }
}

async fn read_log_tail(path: &Path, service: &str, tail: Option<usize>) -> Vec<LogEntry> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            debug!("No log file at {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let modified: DateTime<Utc> = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
    lines[skip..]
        .iter()
        .map(|line| LogEntry::parse_line(service, PLATFORM, line, modified))
        .collect()
}

async fn start(options: Arc<ProcessOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let service = ctx.service.as_ref();
    let Some(command_line) = service.command_line() else {
        return Ok(HandlerOutput::failed(format!(
            "No command configured for '{}'. Set \"command\" in its service config",
            service.name()
        )));
    };
    let mut parts = command_line.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(HandlerOutput::failed("command is empty"));
    };
    let args: Vec<String> = parts.map(str::to_string).collect();
    let pid_file = options.pid_file(&ctx.resource_name);
    let log_file = options.log_file(&ctx.resource_name);

    if let Some(pid) = options.read_pid(&ctx.resource_name).await
        && options.is_alive(pid).await
    {
        return Ok(HandlerOutput::ok()
            .with_metadata("pid", pid)
            .with_metadata("alreadyRunning", true));
    }

    let working_dir = service
        .config()
        .working_directory
        .as_deref()
        .map(|dir| service.project_root().join(dir))
        .unwrap_or_else(|| service.project_root().to_path_buf());

    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", command_line)
            .with_metadata("workingDirectory", working_dir.display().to_string()));
    }

    let mut env = service.environment_variables();
    if let Some(port) = service.port() {
        env.entry("PORT".to_string()).or_insert_with(|| port.to_string());
    }
    let pid = options
        .runner
        .spawn_detached(SpawnRequest {
            program,
            args,
            working_dir: Some(&working_dir),
            env,
            log_file: Some(&log_file),
        })
        .await?;

    if let Some(parent) = pid_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&pid_file, pid.to_string()).await?;
    info!("Started '{}' as pid {}", service.name(), pid);

    let mut output = HandlerOutput::ok().with_metadata("pid", pid).with_resources(
        ResourceInfo::new(PLATFORM)
            .with("pid", pid.to_string())
            .with("logFile", log_file.display().to_string()),
    );
    if let Some(endpoint) = service.endpoint() {
        output = output.with_endpoint(endpoint);
    }
    Ok(output)
}

async fn stop(options: Arc<ProcessOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let pid_file = options.pid_file(&ctx.resource_name);
    let Some(pid) = options.read_pid(&ctx.resource_name).await else {
        return Ok(HandlerOutput::ok().with_metadata("alreadyStopped", true));
    };
    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", format!("kill -TERM {pid}")));
    }

    if options.is_alive(pid).await {
        let output = options
            .runner
            .run("kill", &["-TERM".to_string(), pid.to_string()])
            .await?;
        if !output.success() {
            return Err(ctx.failure(output.diagnostic()));
        }
    } else {
        warn!("Stale pid file for '{}' (pid {})", ctx.service.name(), pid);
    }
    if let Err(e) = tokio::fs::remove_file(&pid_file).await {
        debug!("Could not remove {}: {}", pid_file.display(), e);
    }
    Ok(HandlerOutput::ok().with_metadata("pid", pid))
}

async fn restart(options: Arc<ProcessOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let stopped = stop(Arc::clone(&options), ctx.clone()).await?;
    if !stopped.success {
        return Ok(stopped);
    }
    start(options, ctx).await
}

async fn check(options: Arc<ProcessOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let report = match options.read_pid(&ctx.resource_name).await {
        None => HealthReport::unhealthy("stopped"),
        Some(pid) if options.is_alive(pid).await => {
            HealthReport::healthy("running").with_detail("pid", pid)
        }
        Some(pid) => HealthReport::unhealthy("crashed").with_detail("pid", pid),
    };
    let mut output = HandlerOutput::from_health(report);
    if let Some(endpoint) = ctx.service.endpoint() {
        output = output.with_endpoint(endpoint);
    }
    Ok(output)
}
