//! Environment configuration schema.
//!
//! One file per environment under `environments/`, e.g.
//! `environments/local.json`:
//!
//! ```json
//! {
//!   "platform": { "default": "container" },
//!   "services": {
//!     "backend": { "platform": { "type": "process" }, "port": 4000 }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::SERVICE_TYPE_ANNOTATION;
use crate::requirements::ServiceRequirements;
use crate::types::{PlatformType, ServiceType};

/// Resource prefix used when the config does not name the project.
pub const DEFAULT_PROJECT: &str = "berth";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Environment name. Filled from the file name when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Project name, used as the resource naming prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default)]
    pub platform: PlatformDefaults,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Managed-cloud settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<CloudConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<PlatformType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<ServicePlatform>,

    /// Declared service type. Also accepted as the `service/type` annotation.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Command line for process-platform services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Endpoint of an externally managed service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Health-check path, overriding the service default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,

    #[serde(default)]
    pub requirements: ServiceRequirements,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePlatform {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub platform_type: Option<PlatformType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Pre-discovered resource identifiers per service, e.g.
    /// `{ "backend": { "cluster": "main", "service": "backend-svc" } }`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, BTreeMap<String, String>>,
}

impl EnvironmentConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("default")
    }

    pub fn project(&self) -> &str {
        self.project.as_deref().unwrap_or(DEFAULT_PROJECT)
    }

    pub fn default_platform(&self) -> Option<PlatformType> {
        self.platform.default
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(|k| k.as_str()).collect()
    }

    /// Builder-style helper, mostly for tests and programmatic setups.
    pub fn with_service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.services.insert(name.into(), service);
        self
    }
}

impl ServiceConfig {
    pub fn on(platform: PlatformType) -> Self {
        Self {
            platform: Some(ServicePlatform {
                platform_type: Some(platform),
            }),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn platform_type(&self) -> Option<PlatformType> {
        self.platform.as_ref()?.platform_type
    }

    /// Service type as declared, from the `type` field or the
    /// `service/type` annotation. Unparseable annotations count as undeclared.
    pub fn declared_service_type(&self) -> Option<ServiceType> {
        self.service_type.or_else(|| {
            self.all_annotations()
                .get(SERVICE_TYPE_ANNOTATION)
                .and_then(|value| value.parse().ok())
        })
    }

    /// Service type after config normalization; undeclared means generic.
    pub fn service_type(&self) -> ServiceType {
        self.declared_service_type().unwrap_or(ServiceType::Generic)
    }

    /// Annotations from `requirements.annotations` overlaid with the
    /// top-level `annotations` map.
    pub fn all_annotations(&self) -> BTreeMap<String, String> {
        let mut merged = self.requirements.annotations.clone();
        merged.extend(
            self.annotations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}
