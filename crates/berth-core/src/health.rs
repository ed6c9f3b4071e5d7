//! HTTP health probes.

use std::time::Duration;

use tracing::debug;

use crate::handler::HealthReport;

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// GET `url` and classify the answer. Never fails: transport errors become
/// an unhealthy report.
pub async fn http_health_check(url: &str, timeout: Duration) -> HealthReport {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            return HealthReport::unhealthy("error").with_detail("error", e.to_string());
        }
    };

    debug!("Health check {}", url);
    let started = std::time::Instant::now();
    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            let report = if status.is_success() {
                HealthReport::healthy("healthy")
            } else {
                HealthReport::unhealthy("unhealthy")
            };
            report
                .with_detail("url", url)
                .with_detail("httpStatus", status.as_u16())
                .with_detail("latencyMs", started.elapsed().as_millis() as u64)
        }
        Err(e) if e.is_timeout() => HealthReport::unhealthy("timeout")
            .with_detail("url", url)
            .with_detail("timeoutMs", timeout.as_millis() as u64),
        Err(e) => HealthReport::unhealthy("unreachable")
            .with_detail("url", url)
            .with_detail("error", e.to_string()),
    }
}

/// Join a base endpoint and a health path without doubling slashes.
pub fn health_url(base: &str, path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
        _ => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_joins_cleanly() {
        assert_eq!(
            health_url("http://localhost:4000/", Some("/health")),
            "http://localhost:4000/health"
        );
        assert_eq!(health_url("http://db:5432", None), "http://db:5432");
        assert_eq!(health_url("http://db:5432", Some("")), "http://db:5432");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unhealthy() {
        // Port 9 (discard) is closed on test machines.
        let report =
            http_health_check("http://127.0.0.1:9/health", Duration::from_secs(2)).await;
        assert!(!report.healthy);
        assert!(report.status == "unreachable" || report.status == "timeout");
    }
}
