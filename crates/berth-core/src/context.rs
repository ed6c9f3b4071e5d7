//! Application context shared by every command invocation.

use std::path::{Path, PathBuf};

use crate::config::ConfigStore;
use crate::error::{OrchestratorError, Result};

/// Paths and global flags for one orchestrator process.
///
/// Frontends create this once and hand it to the orchestrator.
#[derive(Debug, Clone)]
pub struct AppContext {
    project_root: PathBuf,
    state_dir: PathBuf,
    dry_run: bool,
    verbose: bool,
}

impl AppContext {
    pub fn new(project_root: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            project_root,
            state_dir,
            dry_run: false,
            verbose: false,
        }
    }

    /// Current directory as project root, platform state directory for
    /// pid files and logs.
    pub fn with_defaults() -> Result<Self> {
        let project_root = std::env::current_dir()?;
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| {
                OrchestratorError::configuration(
                    "Could not determine a state directory",
                    "Set XDG_STATE_HOME or run from a user account with a home directory",
                )
            })?
            .join("berth");
        Ok(Self::new(project_root, state_dir))
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.project_root.clone())
    }
}
