//! Sequential per-service dispatch.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::platform::ServiceState;
use crate::resolver::ServicePlatformInfo;
use crate::service::{Service, ServiceFactory};

use super::definition::CommandContext;
use super::results::{CommandResult, ExecutionContext, ResultAggregator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Stop right after the first failed result is recorded.
    pub stop_on_first_failure: bool,
    /// Run `start` even when the platform reports the service as running.
    pub force: bool,
}

impl DispatchPolicy {
    pub fn bail(stop_on_first_failure: bool) -> Self {
        Self {
            stop_on_first_failure,
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A fresh aggregator for `ctx`'s command and environment.
pub fn aggregator_for(ctx: &CommandContext) -> ResultAggregator {
    ResultAggregator::new(
        ctx.command.as_str(),
        ctx.environment.name(),
        ExecutionContext::current(ctx.app.project_root(), ctx.app.dry_run()),
    )
}

pub fn build_service(ctx: &CommandContext, info: &ServicePlatformInfo) -> Arc<dyn Service> {
    ServiceFactory::create(
        &info.name,
        info.platform,
        &ctx.app,
        &ctx.environment,
        &info.config,
    )
}

/// Fold `command` over `services` in request order.
///
/// Services whose capability set excludes the command are skipped with a
/// warning. Failures never abort the fold unless the policy says so.
pub async fn dispatch_services(
    ctx: &CommandContext,
    services: &[ServicePlatformInfo],
    command: &str,
    options: &Value,
    policy: DispatchPolicy,
) -> ResultAggregator {
    let mut aggregator = aggregator_for(ctx);

    for (index, info) in services.iter().enumerate() {
        let service = build_service(ctx, info);
        if !service.supports(command) {
            warn!("Skipping '{}': it does not support {}", info.name, command);
            aggregator.add_warning(format!(
                "Skipped {}: {} is not enabled (annotate \"command/supports-{}\": \"true\" to enable)",
                info.name, command, command
            ));
            continue;
        }

        let Some(platform) = ctx.platforms.get(info.platform) else {
            aggregator.add_result(CommandResult::failure(
                service.as_ref(),
                format!("Platform {} is not available", info.platform),
            ));
            if stop_after_failure(&mut aggregator, policy, services.len() - index - 1) {
                break;
            }
            continue;
        };

        if command == "start" && !policy.force {
            let state = ServiceState {
                entity: info.name.clone(),
                platform: info.platform,
                environment: ctx.environment.name().to_string(),
                resource_id: Some(platform.resource_name(service.as_ref())),
                metadata: Default::default(),
            };
            if platform.quick_check_running(&state).await {
                info!("'{}' is already running on {}", info.name, info.platform);
                aggregator.add_result(
                    CommandResult::succeeded(service.as_ref())
                        .with_metadata("alreadyRunning", true),
                );
                continue;
            }
        }

        debug!("Running {} for '{}' on {}", command, info.name, info.platform);
        let result = platform.execute(command, service, options).await;
        let failed = !result.success;
        aggregator.add_result(result);
        if failed && stop_after_failure(&mut aggregator, policy, services.len() - index - 1) {
            break;
        }
    }

    aggregator
}

fn stop_after_failure(
    aggregator: &mut ResultAggregator,
    policy: DispatchPolicy,
    remaining: usize,
) -> bool {
    if !policy.stop_on_first_failure {
        return false;
    }
    if remaining > 0 {
        aggregator.add_warning(format!(
            "Stopped after first failure; {remaining} service(s) not processed"
        ));
    }
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{EnvironmentConfig, ServiceConfig};
    use crate::platform::{MockOptions, MockState, PlatformSet};
    use crate::service::test_support::app;
    use crate::types::{PlatformType, ServiceType};

    fn context(environment: EnvironmentConfig, state: &MockState) -> CommandContext {
        let platforms = PlatformSet::builder()
            .with(MockOptions::with_state(state.clone()))
            .expect("mock registers")
            .build();
        CommandContext {
            command: "start".into(),
            app: app(),
            environment: Arc::new(environment),
            platforms: Arc::new(platforms),
        }
    }

    fn infos(environment: &EnvironmentConfig) -> Vec<ServicePlatformInfo> {
        environment
            .services
            .iter()
            .map(|(name, config)| ServicePlatformInfo {
                name: name.clone(),
                platform: config.platform_type().unwrap_or(PlatformType::Mock),
                config: config.clone(),
            })
            .collect()
    }

    fn mock(service_type: ServiceType) -> ServiceConfig {
        ServiceConfig::on(PlatformType::Mock).of_type(service_type)
    }

    #[tokio::test]
    async fn test_failures_continue_by_default() {
        let env = EnvironmentConfig::default()
            .with_service("a", mock(ServiceType::Backend).with_annotation("mock/fail-start", "true"))
            .with_service("b", mock(ServiceType::Backend))
            .with_service("c", mock(ServiceType::Backend));
        let ctx = context(env.clone(), &MockState::default());
        let agg =
            dispatch_services(&ctx, &infos(&env), "start", &json!({}), DispatchPolicy::default())
                .await;
        let results = agg.into_results();
        assert_eq!(results.summary().total, 3);
        assert_eq!(results.summary().failed, 1);
    }

    #[tokio::test]
    async fn test_bail_stops_after_first_failure() {
        let env = EnvironmentConfig::default()
            .with_service("a", mock(ServiceType::Backend).with_annotation("mock/fail-start", "true"))
            .with_service("b", mock(ServiceType::Backend))
            .with_service("c", mock(ServiceType::Backend));
        let state = MockState::default();
        let ctx = context(env.clone(), &state);
        let agg = dispatch_services(
            &ctx,
            &infos(&env),
            "start",
            &json!({}),
            DispatchPolicy::bail(true),
        )
        .await;
        assert_eq!(agg.results().len(), 1);
        assert_eq!(agg.results()[0].entity, "a");
        assert!(state.invocations("berth-b-default").is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_capability_is_skipped() {
        let env = EnvironmentConfig::default()
            .with_service("cache", mock(ServiceType::Generic))
            .with_service("db", mock(ServiceType::Database));
        let ctx = context(env.clone(), &MockState::default());
        let agg =
            dispatch_services(&ctx, &infos(&env), "backup", &json!({}), DispatchPolicy::default())
                .await;
        let results = agg.into_results();
        assert_eq!(results.results().len(), 1);
        assert_eq!(results.results()[0].entity, "db");
        assert_eq!(results.summary().warnings, 1);
        assert!(results.warnings()[0].contains("Skipped cache"));
    }

    #[tokio::test]
    async fn test_start_skips_running_services() {
        let env = EnvironmentConfig::default().with_service("api", mock(ServiceType::Backend));
        let state = MockState::default();
        state.set_running("berth-api-default", true);
        let ctx = context(env.clone(), &state);

        let agg =
            dispatch_services(&ctx, &infos(&env), "start", &json!({}), DispatchPolicy::default())
                .await;
        assert_eq!(agg.results()[0].metadata["alreadyRunning"], true);
        assert!(state.invocations("berth-api-default").is_empty());

        let forced = dispatch_services(
            &ctx,
            &infos(&env),
            "start",
            &json!({}),
            DispatchPolicy::default().with_force(true),
        )
        .await;
        assert!(forced.results()[0].metadata.get("alreadyRunning").is_none());
        assert_eq!(state.invocations("berth-api-default"), vec!["start"]);
    }

    #[tokio::test]
    async fn test_missing_platform_is_a_failed_result() {
        let env = EnvironmentConfig::default()
            .with_service("api", ServiceConfig::on(PlatformType::Container));
        let ctx = context(env.clone(), &MockState::default());
        let agg =
            dispatch_services(&ctx, &infos(&env), "check", &json!({}), DispatchPolicy::default())
                .await;
        assert!(!agg.is_success());
        assert!(
            agg.results()[0]
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("not available")
        );
    }
}
