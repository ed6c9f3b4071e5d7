//! Config store for loading environment files.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::migrate::apply_service_type_fallback;
use super::schema::EnvironmentConfig;
use crate::error::{OrchestratorError, Result};

/// Directory, relative to the project root, holding environment files.
pub const ENVIRONMENTS_DIR: &str = "environments";

const EXTENSIONS: [&str; 2] = ["json", "toml"];

/// Read-only access to `<project>/environments/<name>.{json,toml}`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    project_root: PathBuf,
}

impl ConfigStore {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn from_current_dir() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.project_root.join(ENVIRONMENTS_DIR)
    }

    /// Path of the file backing `environment`, if one exists.
    pub fn environment_path(&self, environment: &str) -> Option<PathBuf> {
        let dir = self.environments_dir();
        EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{environment}.{ext}")))
            .find(|path| path.is_file())
    }

    /// Names of every environment file present, sorted.
    pub fn available_environments(&self) -> Result<Vec<String>> {
        let dir = self.environments_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_config = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if is_config && let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Load and normalize an environment.
    pub fn load(&self, environment: &str) -> Result<EnvironmentConfig> {
        let Some(path) = self.environment_path(environment) else {
            let available = self.available_environments().unwrap_or_default();
            return Err(OrchestratorError::configuration(
                format!(
                    "Environment '{}' not found in {} (available: {})",
                    environment,
                    self.environments_dir().display(),
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
                format!(
                    "Create {}/{}.json with at least: {{ \"platform\": {{ \"default\": \"container\" }}, \"services\": {{}} }}",
                    ENVIRONMENTS_DIR, environment
                ),
            ));
        };

        debug!("Loading environment '{}' from {}", environment, path.display());
        let mut config = parse_environment_file(&path)?;
        if config.name.is_none() {
            config.name = Some(environment.to_string());
        }
        apply_service_type_fallback(&mut config);
        Ok(config)
    }
}

/// Parse an environment file, choosing the format from its extension.
pub fn parse_environment_file(path: &Path) -> Result<EnvironmentConfig> {
    let content = std::fs::read_to_string(path)?;
    let parse_error = |message: String| OrchestratorError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        _ => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlatformType, ServiceType};
    use tempfile::TempDir;

    fn write_env(temp: &TempDir, file: &str, content: &str) {
        let dir = temp.path().join(ENVIRONMENTS_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_load_json_environment() {
        let temp = TempDir::new().unwrap();
        write_env(
            &temp,
            "local.json",
            r#"{
                "platform": { "default": "container" },
                "services": {
                    "backend": { "type": "backend", "port": 4000 },
                    "database": { "platform": { "type": "external" } }
                }
            }"#,
        );

        let store = ConfigStore::new(temp.path());
        let config = store.load("local").expect("environment loads");

        assert_eq!(config.name(), "local");
        assert_eq!(config.default_platform(), Some(PlatformType::Container));
        assert_eq!(config.services["backend"].service_type(), ServiceType::Backend);
        // Undeclared type is migrated from the name while loading.
        assert_eq!(config.services["database"].service_type(), ServiceType::Database);
    }

    #[test]
    fn test_load_toml_environment() {
        let temp = TempDir::new().unwrap();
        write_env(
            &temp,
            "staging.toml",
            r#"
project = "semiont"

[platform]
default = "aws"

[services.frontend]
type = "frontend"

[services.frontend.annotations]
"command/supports-publish" = "true"
"#,
        );

        let config = ConfigStore::new(temp.path())
            .load("staging")
            .expect("toml environment loads");
        assert_eq!(config.project(), "semiont");
        assert_eq!(config.default_platform(), Some(PlatformType::ManagedCloud));
        assert_eq!(
            config.services["frontend"].annotations["command/supports-publish"],
            "true"
        );
    }

    #[test]
    fn test_missing_environment_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        write_env(&temp, "local.json", "{}");

        let err = ConfigStore::new(temp.path())
            .load("production")
            .expect_err("missing environment should fail");
        match err {
            OrchestratorError::Configuration {
                message,
                suggestion,
            } => {
                assert!(message.contains("production"));
                assert!(message.contains("local"));
                assert!(suggestion.contains("environments/production.json"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let temp = TempDir::new().unwrap();
        write_env(&temp, "broken.json", "{ not json");

        let err = ConfigStore::new(temp.path()).load("broken").unwrap_err();
        assert!(matches!(err, OrchestratorError::Parse { .. }));
    }

    #[test]
    fn test_available_environments_sorted() {
        let temp = TempDir::new().unwrap();
        write_env(&temp, "staging.toml", "");
        write_env(&temp, "local.json", "{}");
        write_env(&temp, "notes.txt", "ignored");

        let names = ConfigStore::new(temp.path())
            .available_environments()
            .unwrap();
        assert_eq!(names, vec!["local".to_string(), "staging".to_string()]);
    }
}
