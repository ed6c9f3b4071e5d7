//! Berth Core Library
//!
//! Decides which platform each service of a project runs on, which handler
//! implements a lifecycle command for that platform and service type, and
//! folds per-service outcomes into one command result.

pub mod capabilities;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod health;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod readiness;
pub mod registry;
pub mod requirements;
pub mod resolver;
pub mod service;
pub mod types;

pub use error::{OrchestratorError, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, EnvironmentConfig, ServiceConfig};
    pub use crate::context::AppContext;

    // Commands
    pub use crate::commands::{
        CommandCatalog, CommandDefinition, CommandInfo, CommandOptions, CommandResult,
        CommandResults, CommonOptions, OutputFormat, ResultAggregator,
    };
    pub use crate::orchestrator::Orchestrator;

    // Platforms and handlers
    pub use crate::handler::{HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport};
    pub use crate::platform::{PlatformProvider, PlatformSet, PlatformStrategy};
    pub use crate::registry::HandlerRegistry;

    // Services
    pub use crate::requirements::ServiceRequirements;
    pub use crate::service::{Service, ServiceFactory};
    pub use crate::types::{PlatformType, ServiceType};

    pub use crate::error::{OrchestratorError, Result};
}
