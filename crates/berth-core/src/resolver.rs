//! Turning requested service names into `(name, platform, config)` triples.
//!
//! Resolution is lenient per service: one misconfigured entry is skipped
//! with a warning so the rest of the batch still runs. Whether a handler
//! exists for the command is not checked here; that surfaces at dispatch.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::config::{EnvironmentConfig, ServiceConfig};
use crate::error::{OrchestratorError, Result};
use crate::types::PlatformType;

/// Selector meaning every service in the environment.
pub const ALL_SERVICES: &str = "all";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServicePlatformInfo {
    pub name: String,
    pub platform: PlatformType,
    pub config: ServiceConfig,
}

/// Service-level `platform.type`, then the environment's `platform.default`.
pub fn get_service_platform(name: &str, environment: &EnvironmentConfig) -> Result<PlatformType> {
    if let Some(platform) = environment.service(name).and_then(ServiceConfig::platform_type) {
        return Ok(platform);
    }
    if let Some(platform) = environment.default_platform() {
        return Ok(platform);
    }
    Err(OrchestratorError::configuration(
        format!(
            "No platform configured for service '{name}' in environment '{}'",
            environment.name()
        ),
        format!(
            "Add a platform to the service in environments/{}.json:\n{}\n\
             or set a default for the environment:\n  \"platform\": {{ \"default\": \"container\" }}",
            environment.name(),
            example_block(name)
        ),
    ))
}

/// Resolve every requested name, skipping the ones that cannot be resolved.
pub fn resolve_service_deployments(
    names: &[String],
    environment: &EnvironmentConfig,
) -> Vec<ServicePlatformInfo> {
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        let Some(config) = environment.service(name) else {
            let available = environment.service_names();
            warn!(
                "Service '{}' is not defined in environment '{}'; skipping. Available services: {}. \
                 To add it:\n{}",
                name,
                environment.name(),
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                },
                example_block(name)
            );
            continue;
        };
        match get_service_platform(name, environment) {
            Ok(platform) => resolved.push(ServicePlatformInfo {
                name: name.clone(),
                platform,
                config: config.clone(),
            }),
            Err(e) => warn!("Skipping service '{}': {}", name, e),
        }
    }
    resolved
}

/// Service names grouped by their resolved platform. Services without a
/// platform are left out.
pub fn get_services_by_platform(
    environment: &EnvironmentConfig,
) -> BTreeMap<PlatformType, Vec<String>> {
    let mut grouped: BTreeMap<PlatformType, Vec<String>> = BTreeMap::new();
    for name in environment.service_names() {
        if let Ok(platform) = get_service_platform(name, environment) {
            grouped.entry(platform).or_default().push(name.to_string());
        }
    }
    grouped
}

/// Every service name in the environment, sorted.
pub fn get_services_in_environment(environment: &EnvironmentConfig) -> Vec<String> {
    environment
        .service_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Expand `"all"` or a comma-separated list into service names.
pub fn resolve_selector(selector: &str, environment: &EnvironmentConfig) -> Vec<String> {
    if selector.trim().eq_ignore_ascii_case(ALL_SERVICES) {
        return get_services_in_environment(environment);
    }
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn example_block(name: &str) -> String {
    format!(
        "  \"services\": {{\n    \"{name}\": {{\n      \"type\": \"backend\",\n      \
         \"platform\": {{ \"type\": \"container\" }}\n    }}\n  }}"
    )
}
