//! Managed cloud services.
//!
//! Resource identifiers (cluster, service, bucket, ...) come from a
//! [`ResourceDiscovery`] implementation. The default reads them from the
//! environment's `aws.resources` block, which is what deployment tooling
//! writes after provisioning.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EnvironmentConfig;
use crate::error::{OrchestratorError, Result};
use crate::handler::{
    Extensions, HandlerContext, HandlerDescriptor, HandlerOutput, HealthReport, ResourceInfo,
};
use crate::health::{DEFAULT_HEALTH_TIMEOUT, health_url, http_health_check};
use crate::process::{ProcessRunner, SystemRunner};
use crate::registry::HandlerRegistry;
use crate::service::Service;
use crate::types::{PlatformType, ServiceType};

use super::{CredentialCheck, PlatformProvider, PlatformStrategy, extension, render_command};

const PLATFORM: PlatformType = PlatformType::ManagedCloud;

pub const DEFAULT_REGION: &str = "us-east-1";

const CREDENTIAL_VARS: [&str; 4] = [
    "AWS_PROFILE",
    "AWS_ACCESS_KEY_ID",
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
];

const CLOUD_TYPES: [ServiceType; 6] = [
    ServiceType::Backend,
    ServiceType::Frontend,
    ServiceType::Database,
    ServiceType::Filesystem,
    ServiceType::Inference,
    ServiceType::Graph,
];

const DEPLOYABLE_TYPES: [ServiceType; 3] = [
    ServiceType::Backend,
    ServiceType::Frontend,
    ServiceType::Inference,
];

/// Looks up live identifiers for a service's cloud resources.
#[async_trait]
pub trait ResourceDiscovery: Send + Sync + fmt::Debug {
    async fn discover(
        &self,
        service: &dyn Service,
        resource_name: &str,
    ) -> Result<BTreeMap<String, String>>;
}

/// Discovery backed by identifiers declared in the environment config.
#[derive(Debug, Clone, Default)]
pub struct ConfigDiscovery {
    resources: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigDiscovery {
    pub fn new(resources: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceDiscovery for ConfigDiscovery {
    async fn discover(
        &self,
        service: &dyn Service,
        _resource_name: &str,
    ) -> Result<BTreeMap<String, String>> {
        match self.resources.get(service.name()) {
            Some(identifiers) if !identifiers.is_empty() => Ok(identifiers.clone()),
            _ => Err(OrchestratorError::configuration(
                format!(
                    "No managed-cloud resources found for '{}' in environment '{}'",
                    service.name(),
                    service.environment()
                ),
                format!(
                    "Run `berth provision --service {0}` and record the result in \
                     environments/{1}.json:\n  \"aws\": {{ \"resources\": {{ \"{0}\": \
                     {{ \"cluster\": \"...\", \"service\": \"...\" }} }} }}",
                    service.name(),
                    service.environment()
                ),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudOptions {
    region: String,
    account_id: Option<String>,
    discovery: Arc<dyn ResourceDiscovery>,
    runner: Arc<dyn ProcessRunner>,
    /// Snapshot of the credential-related process environment.
    credential_env: BTreeMap<String, String>,
}

impl CloudOptions {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: None,
            discovery: Arc::new(ConfigDiscovery::default()),
            runner: Arc::new(SystemRunner::new()),
            credential_env: BTreeMap::new(),
        }
    }

    /// Region, account and discovered resources from the environment's
    /// `aws` block, credentials from the process environment.
    pub fn from_environment(environment: &EnvironmentConfig) -> Self {
        let credential_env: BTreeMap<String, String> = CREDENTIAL_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok().map(|v| (var.to_string(), v)))
            .collect();
        let aws = environment.aws.clone().unwrap_or_default();
        let region = aws
            .region
            .or_else(|| credential_env.get("AWS_REGION").cloned())
            .or_else(|| credential_env.get("AWS_DEFAULT_REGION").cloned())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self {
            account_id: aws.account_id,
            discovery: Arc::new(ConfigDiscovery::new(aws.resources)),
            credential_env,
            ..Self::new(region)
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ResourceDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_credential_env(mut self, vars: BTreeMap<String, String>) -> Self {
        self.credential_env = vars;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn registry_host(&self) -> Option<String> {
        self.account_id
            .as_deref()
            .map(|account| format!("{account}.dkr.ecr.{}.amazonaws.com", self.region))
    }
}

impl PlatformProvider for CloudOptions {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn handlers(&self) -> Vec<HandlerDescriptor> {
        let shared = Arc::new(self.clone());
        let mut handlers: Vec<HandlerDescriptor> =
            HandlerDescriptor::for_types("check", PLATFORM, &CLOUD_TYPES, check)
                .into_iter()
                .map(HandlerDescriptor::with_discovery)
                .collect();
        handlers.extend(HandlerDescriptor::for_types(
            "provision",
            PLATFORM,
            &CLOUD_TYPES,
            provision,
        ));
        let s = Arc::clone(&shared);
        handlers.extend(HandlerDescriptor::for_types(
            "publish",
            PLATFORM,
            &DEPLOYABLE_TYPES,
            move |ctx| publish(Arc::clone(&s), ctx),
        ));
        let s = Arc::clone(&shared);
        handlers.extend(
            HandlerDescriptor::for_types("update", PLATFORM, &DEPLOYABLE_TYPES, move |ctx| {
                update(Arc::clone(&s), ctx)
            })
            .into_iter()
            .map(HandlerDescriptor::with_discovery),
        );
        handlers
    }

    fn into_strategy(self: Box<Self>, registry: Arc<HandlerRegistry>) -> Arc<dyn PlatformStrategy> {
        Arc::new(CloudPlatform {
            options: *self,
            registry,
        })
    }
}

#[derive(Debug)]
pub struct CloudPlatform {
    options: CloudOptions,
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl PlatformStrategy for CloudPlatform {
    fn platform_type(&self) -> PlatformType {
        PLATFORM
    }

    fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn build_handler_context_extensions(
        &self,
        service: &dyn Service,
        requires_discovery: bool,
    ) -> Result<Extensions> {
        let mut extensions = Extensions::new();
        extension(&mut extensions, "region", self.options.region.as_str());
        if let Some(account) = self.options.account_id.as_deref() {
            extension(&mut extensions, "accountId", account);
        }
        if requires_discovery {
            let resource_name = self.resource_name(service);
            let identifiers = self
                .options
                .discovery
                .discover(service, &resource_name)
                .await?;
            debug!("Discovered {:?} for {}", identifiers, service.name());
            extension(
                &mut extensions,
                "resources",
                Value::Object(
                    identifiers
                        .into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                ),
            );
        }
        Ok(extensions)
    }

    async fn validate_credentials(&self, _environment: &EnvironmentConfig) -> CredentialCheck {
        let env = &self.options.credential_env;
        if env.contains_key("AWS_PROFILE") || env.contains_key("AWS_ACCESS_KEY_ID") {
            return CredentialCheck::valid();
        }
        CredentialCheck::invalid(
            "No AWS credentials found in the environment",
            "Run `aws sso login --profile <profile>` and export AWS_PROFILE=<profile>, \
             or export AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
        )
    }
}

fn discovered(ctx: &HandlerContext) -> BTreeMap<String, String> {
    ctx.extensions
        .get("resources")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn resource_info(identifiers: &BTreeMap<String, String>) -> ResourceInfo {
    identifiers
        .iter()
        .fold(ResourceInfo::new(PLATFORM), |info, (k, v)| info.with(k, v.as_str()))
}

async fn check(ctx: HandlerContext) -> Result<HandlerOutput> {
    let identifiers = discovered(&ctx);
    let report = match ctx.service.config().url.as_deref() {
        Some(base) => {
            let url = health_url(base, ctx.service.health_check_path().as_deref());
            http_health_check(&url, DEFAULT_HEALTH_TIMEOUT).await
        }
        None => HealthReport::healthy("discovered"),
    };
    let mut output = HandlerOutput::from_health(report).with_resources(resource_info(&identifiers));
    if let Some(region) = ctx.extension_str("region") {
        output = output.with_metadata("region", region);
    }
    if let Some(endpoint) = ctx.service.config().url.clone() {
        output = output.with_endpoint(endpoint);
    }
    Ok(output)
}

/// Resources a service's requirements call for, in creation order.
pub fn plan_resources(service: &dyn Service) -> Vec<String> {
    let requirements = service.requirements();
    let mut plan = Vec::new();

    if service.service_type() == ServiceType::Database {
        let size = requirements
            .storage
            .first()
            .and_then(|s| s.size.as_deref())
            .unwrap_or("default");
        plan.push(format!("managed database instance ({size})"));
    } else {
        for storage in requirements.storage.iter().filter(|s| s.persistent == Some(true)) {
            plan.push(format!(
                "file system volume ({})",
                storage.size.as_deref().unwrap_or("default")
            ));
        }
    }
    if requirements.build.is_some() {
        plan.push("container image repository".to_string());
    }
    if let Some(resources) = requirements.resources.as_ref() {
        plan.push(format!(
            "service task (cpu {}, memory {}, replicas {})",
            resources.cpu.as_deref().unwrap_or("default"),
            resources.memory.as_deref().unwrap_or("default"),
            resources.replicas.unwrap_or(1)
        ));
    }
    if let Some(network) = requirements.network.as_ref() {
        if network.needs_load_balancer == Some(true) {
            plan.push("application load balancer".to_string());
        }
        for port in &network.ports {
            plan.push(format!("target group on port {port}"));
        }
    }
    for secret in requirements.secrets() {
        plan.push(format!("secret '{secret}'"));
    }
    plan
}

async fn provision(ctx: HandlerContext) -> Result<HandlerOutput> {
    let plan = plan_resources(ctx.service.as_ref());
    info!(
        "Planned {} resource(s) for '{}'",
        plan.len(),
        ctx.service.name()
    );
    Ok(HandlerOutput::ok()
        .with_metadata("planned", true)
        .with_metadata("resourceName", ctx.resource_name.as_str())
        .with_metadata("plan", plan))
}

async fn publish(options: Arc<CloudOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let Some(host) = options.registry_host() else {
        return Ok(HandlerOutput::failed(
            "Publishing needs an account id. Set \"aws\": { \"accountId\": \"...\" } in the environment config",
        ));
    };
    let tag = ctx.option_str("tag").unwrap_or("latest");
    let image = format!("{host}/{}:{tag}", ctx.resource_name);
    let service = ctx.service.as_ref();
    let build = service.requirements().build.unwrap_or_default();
    let context_dir = service
        .project_root()
        .join(build.build_context.as_deref().unwrap_or("."));

    let build_args = vec![
        "build".to_string(),
        "-t".to_string(),
        image.clone(),
        "-f".to_string(),
        context_dir
            .join(build.dockerfile.as_deref().unwrap_or("Dockerfile"))
            .display()
            .to_string(),
        context_dir.display().to_string(),
    ];
    let push_args = vec!["push".to_string(), image.clone()];

    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("image", image)
            .with_metadata(
                "commands",
                vec![
                    render_command("docker", &build_args),
                    render_command("docker", &push_args),
                ],
            ));
    }

    for args in [build_args, push_args] {
        let output = options.runner.run("docker", &args).await?;
        if !output.success() {
            return Err(ctx.failure(output.diagnostic()));
        }
    }
    Ok(HandlerOutput::ok()
        .with_metadata("image", image.as_str())
        .with_resources(ResourceInfo::new(PLATFORM).with("image", image)))
}

async fn update(options: Arc<CloudOptions>, ctx: HandlerContext) -> Result<HandlerOutput> {
    let identifiers = discovered(&ctx);
    let (Some(cluster), Some(service)) = (identifiers.get("cluster"), identifiers.get("service"))
    else {
        return Ok(HandlerOutput::failed(format!(
            "Discovered resources for '{}' lack a cluster or service id",
            ctx.service.name()
        ))
        .with_resources(resource_info(&identifiers)));
    };
    let args: Vec<String> = [
        "ecs",
        "update-service",
        "--cluster",
        cluster.as_str(),
        "--service",
        service.as_str(),
        "--force-new-deployment",
        "--region",
        options.region.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if ctx.dry_run {
        return Ok(HandlerOutput::ok()
            .with_metadata("dryRun", true)
            .with_metadata("command", render_command("aws", &args))
            .with_resources(resource_info(&identifiers)));
    }
    let output = options.runner.run("aws", &args).await?;
    if !output.success() {
        return Err(ctx.failure(output.diagnostic()));
    }
    Ok(HandlerOutput::ok()
        .with_metadata("deployment", "started")
        .with_resources(resource_info(&identifiers)))
}
