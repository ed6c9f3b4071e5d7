//! Compatibility adapter for configs written before service types were
//! required.
//!
//! Runs once while loading an environment. Everything downstream reads the
//! typed [`ServiceConfig::service_type`](crate::config::ServiceConfig::service_type).

use tracing::warn;

use super::schema::EnvironmentConfig;
use crate::types::ServiceType;

/// Guess a service type from its name.
pub fn infer_service_type_from_name(name: &str) -> ServiceType {
    let name = name.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

    if has(&["frontend", "web", "ui", "site"]) {
        ServiceType::Frontend
    } else if has(&["backend", "api", "server"]) {
        ServiceType::Backend
    } else if has(&["database", "postgres", "mysql", "db"]) {
        ServiceType::Database
    } else if has(&["graph", "neo4j", "neptune", "janus"]) {
        ServiceType::Graph
    } else if has(&["inference", "llm", "model", "ollama"]) {
        ServiceType::Inference
    } else if has(&["proxy", "envoy", "nginx", "gateway"]) {
        ServiceType::Proxy
    } else if has(&["filesystem", "storage", "fs", "bucket"]) {
        ServiceType::Filesystem
    } else if has(&["worker", "job", "queue"]) {
        ServiceType::Worker
    } else {
        ServiceType::Generic
    }
}

/// Fill in the type of every service that does not declare one.
///
/// Returns the names of services that were migrated.
pub fn apply_service_type_fallback(config: &mut EnvironmentConfig) -> Vec<String> {
    let environment = config.name().to_string();
    let mut migrated = Vec::new();
    for (name, service) in config.services.iter_mut() {
        if service.declared_service_type().is_some() {
            continue;
        }
        let inferred = infer_service_type_from_name(name);
        warn!(
            "Service '{}' in environment '{}' has no 'service/type' annotation; \
             inferred '{}' from its name. Declare it explicitly: \
             \"annotations\": {{ \"service/type\": \"{}\" }}",
            name, environment, inferred, inferred
        );
        service.service_type = Some(inferred);
        migrated.push(name.clone());
    }
    migrated
}
