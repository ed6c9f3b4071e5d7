//! Environment configuration: schema, loading and migration.
//!
//! The orchestrator treats loaded configuration as read-only input.

pub mod migrate;
pub mod schema;
pub mod store;

pub use schema::{
    CloudConfig, DEFAULT_PROJECT, EnvironmentConfig, PlatformDefaults, ServiceConfig,
    ServicePlatform,
};
pub use store::{ConfigStore, ENVIRONMENTS_DIR, parse_environment_file};
