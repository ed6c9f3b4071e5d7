//! Process invocation used by platforms that shell out.
//!
//! Platforms hold an `Arc<dyn ProcessRunner>` so tests can substitute a
//! scripted runner for docker, kill and friends.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Upper bound for a single non-detached invocation.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// How to launch a long-running child that outlives the command.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub working_dir: Option<&'a Path>,
    pub env: BTreeMap<String, String>,
    /// File receiving stdout and stderr.
    pub log_file: Option<&'a Path>,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync + std::fmt::Debug {
    /// Run to completion and capture output.
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput>;

    /// Start a detached child and return its pid.
    async fn spawn_detached(&self, request: SpawnRequest<'_>) -> Result<u32>;
}

/// Runner backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        debug!("Running {} {}", program, args.join(" "));
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| OrchestratorError::Timeout {
                operation: format!("{program} {}", args.join(" ")),
                attempts: 1,
            })??;

        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, request: SpawnRequest<'_>) -> Result<u32> {
        debug!(
            "Spawning {} {} (log: {:?})",
            request.program,
            request.args.join(" "),
            request.log_file
        );
        let mut command = tokio::process::Command::new(request.program);
        command.args(&request.args).envs(&request.env).stdin(Stdio::null());
        if let Some(dir) = request.working_dir {
            command.current_dir(dir);
        }
        match request.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let log = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                command.stdout(log.try_clone()?).stderr(log);
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = command.spawn()?;
        child.id().ok_or_else(|| {
            OrchestratorError::Io(std::io::Error::other(format!(
                "{} exited before its pid could be read",
                request.program
            )))
        })
    }
}
