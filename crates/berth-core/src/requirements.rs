//! Platform-agnostic description of what a service needs.
//!
//! Every field is optional. A missing value means "the platform default
//! applies", never zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequirements {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage: Vec<StorageRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<DependencyRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityRequirement>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRequirement {
    pub persistent: Option<bool>,
    /// Human-readable size such as `10Gi`.
    pub size: Option<String>,
    pub mount_path: Option<String>,
    pub backup: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequirement {
    #[serde(default)]
    pub ports: Vec<u16>,
    pub protocol: Option<String>,
    pub needs_load_balancer: Option<bool>,
    pub health_check_path: Option<String>,
    pub health_check_port: Option<u16>,
    /// Seconds between health checks.
    pub health_check_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRequirement {
    /// Other services in the same environment.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub external: Vec<ExternalDependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDependency {
    pub name: String,
    pub url: Option<String>,
    pub required: Option<bool>,
    pub health_check: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirement {
    /// CPU in cores, e.g. `"0.5"`.
    pub cpu: Option<String>,
    /// Memory such as `512Mi`.
    pub memory: Option<String>,
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequirement {
    pub dockerfile: Option<String>,
    pub build_context: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    pub prebuilt: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRequirement {
    #[serde(default)]
    pub secrets: Vec<String>,
    pub run_as_user: Option<u32>,
    pub run_as_group: Option<u32>,
    pub read_only_root_filesystem: Option<bool>,
    pub allow_privilege_escalation: Option<bool>,
}

impl ServiceRequirements {
    pub fn ports(&self) -> &[u16] {
        self.network.as_ref().map(|n| n.ports.as_slice()).unwrap_or(&[])
    }

    pub fn health_check_path(&self) -> Option<&str> {
        self.network.as_ref()?.health_check_path.as_deref()
    }

    pub fn secrets(&self) -> &[String] {
        self.security
            .as_ref()
            .map(|s| s.secrets.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependency_services(&self) -> &[String] {
        self.dependencies
            .as_ref()
            .map(|d| d.services.as_slice())
            .unwrap_or(&[])
    }
}

/// Combine partial requirements left to right.
///
/// Lists concatenate (order and duplicates preserved), maps shallow-merge
/// with later values winning, scalars take the last value that is set.
pub fn merge_requirements<'a, I>(parts: I) -> ServiceRequirements
where
    I: IntoIterator<Item = &'a ServiceRequirements>,
{
    let mut merged = ServiceRequirements::default();
    for part in parts {
        merged.storage.extend(part.storage.iter().cloned());
        merge_option(&mut merged.network, part.network.as_ref(), merge_network);
        merge_option(
            &mut merged.dependencies,
            part.dependencies.as_ref(),
            merge_dependencies,
        );
        merge_option(&mut merged.resources, part.resources.as_ref(), merge_resources);
        merge_option(&mut merged.build, part.build.as_ref(), merge_build);
        merge_option(&mut merged.security, part.security.as_ref(), merge_security);
        extend_map(&mut merged.environment, &part.environment);
        extend_map(&mut merged.labels, &part.labels);
        extend_map(&mut merged.annotations, &part.annotations);
    }
    merged
}

fn merge_option<T: Clone>(base: &mut Option<T>, overlay: Option<&T>, merge: fn(&mut T, &T)) {
    match (base.as_mut(), overlay) {
        (Some(existing), Some(next)) => merge(existing, next),
        (None, Some(next)) => *base = Some(next.clone()),
        (_, None) => {}
    }
}

fn extend_map(base: &mut BTreeMap<String, String>, overlay: &BTreeMap<String, String>) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

fn last<T: Clone>(base: &mut Option<T>, overlay: &Option<T>) {
    if overlay.is_some() {
        base.clone_from(overlay);
    }
}

fn merge_network(base: &mut NetworkRequirement, overlay: &NetworkRequirement) {
    base.ports.extend(overlay.ports.iter().copied());
    last(&mut base.protocol, &overlay.protocol);
    last(&mut base.needs_load_balancer, &overlay.needs_load_balancer);
    last(&mut base.health_check_path, &overlay.health_check_path);
    last(&mut base.health_check_port, &overlay.health_check_port);
    last(&mut base.health_check_interval, &overlay.health_check_interval);
}

fn merge_dependencies(base: &mut DependencyRequirement, overlay: &DependencyRequirement) {
    base.services.extend(overlay.services.iter().cloned());
    base.external.extend(overlay.external.iter().cloned());
}

fn merge_resources(base: &mut ResourceRequirement, overlay: &ResourceRequirement) {
    last(&mut base.cpu, &overlay.cpu);
    last(&mut base.memory, &overlay.memory);
    last(&mut base.replicas, &overlay.replicas);
}

fn merge_build(base: &mut BuildRequirement, overlay: &BuildRequirement) {
    last(&mut base.dockerfile, &overlay.dockerfile);
    last(&mut base.build_context, &overlay.build_context);
    extend_map(&mut base.build_args, &overlay.build_args);
    last(&mut base.prebuilt, &overlay.prebuilt);
}

fn merge_security(base: &mut SecurityRequirement, overlay: &SecurityRequirement) {
    base.secrets.extend(overlay.secrets.iter().cloned());
    last(&mut base.run_as_user, &overlay.run_as_user);
    last(&mut base.run_as_group, &overlay.run_as_group);
    last(
        &mut base.read_only_root_filesystem,
        &overlay.read_only_root_filesystem,
    );
    last(
        &mut base.allow_privilege_escalation,
        &overlay.allow_privilege_escalation,
    );
}

/// Baseline requirements for common workload shapes.
pub mod presets {
    use super::*;

    pub fn stateless_api(port: u16) -> ServiceRequirements {
        ServiceRequirements {
            network: Some(NetworkRequirement {
                ports: vec![port],
                protocol: Some("tcp".to_string()),
                needs_load_balancer: Some(true),
                health_check_path: Some("/health".to_string()),
                health_check_port: Some(port),
                health_check_interval: Some(30),
            }),
            resources: Some(ResourceRequirement {
                cpu: Some("0.5".to_string()),
                memory: Some("512Mi".to_string()),
                replicas: Some(1),
            }),
            ..Default::default()
        }
    }

    pub fn database(port: u16, storage_size: &str) -> ServiceRequirements {
        ServiceRequirements {
            storage: vec![StorageRequirement {
                persistent: Some(true),
                size: Some(storage_size.to_string()),
                mount_path: None,
                backup: Some(true),
            }],
            network: Some(NetworkRequirement {
                ports: vec![port],
                protocol: Some("tcp".to_string()),
                needs_load_balancer: Some(false),
                ..Default::default()
            }),
            resources: Some(ResourceRequirement {
                cpu: Some("1".to_string()),
                memory: Some("1Gi".to_string()),
                replicas: Some(1),
            }),
            ..Default::default()
        }
    }

    pub fn static_site(port: u16) -> ServiceRequirements {
        ServiceRequirements {
            network: Some(NetworkRequirement {
                ports: vec![port],
                protocol: Some("tcp".to_string()),
                needs_load_balancer: Some(true),
                health_check_path: Some("/".to_string()),
                health_check_port: Some(port),
                health_check_interval: Some(30),
            }),
            ..Default::default()
        }
    }

    pub fn worker() -> ServiceRequirements {
        ServiceRequirements {
            resources: Some(ResourceRequirement {
                cpu: Some("0.25".to_string()),
                memory: Some("256Mi".to_string()),
                replicas: Some(1),
            }),
            ..Default::default()
        }
    }
}
