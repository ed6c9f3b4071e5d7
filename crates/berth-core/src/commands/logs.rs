//! Log aggregation across services.
//!
//! The one place services are handled concurrently: fetches are read-only
//! and independent, so they fan out and are merged by timestamp afterwards.

use futures::future::join_all;
use tracing::debug;

use crate::platform::{LogEntry, LogOptions, level_rank};
use crate::resolver::ServicePlatformInfo;

use super::definition::CommandContext;
use super::dispatch::build_service;

#[derive(Debug, Clone, Default)]
pub struct LogAggregate {
    /// Oldest first.
    pub entries: Vec<LogEntry>,
    /// Services whose platform cannot produce logs.
    pub unavailable: Vec<String>,
}

pub async fn aggregate_logs(
    ctx: &CommandContext,
    services: &[ServicePlatformInfo],
    options: &LogOptions,
) -> LogAggregate {
    let fetches = services.iter().map(|info| async move {
        let service = build_service(ctx, info);
        let logs = match ctx.platforms.get(info.platform) {
            Some(platform) => platform.collect_logs(service.as_ref(), options).await,
            None => None,
        };
        (info.name.clone(), logs)
    });

    let mut aggregate = LogAggregate::default();
    for (name, logs) in join_all(fetches).await {
        match logs {
            Some(entries) => {
                debug!("{} log entries from '{}'", entries.len(), name);
                aggregate.entries.extend(entries);
            }
            None => aggregate.unavailable.push(name),
        }
    }

    aggregate.entries = filter_and_sort(aggregate.entries, options);
    aggregate
}

/// Drop entries below `level` or before `since`, order by time and keep
/// the newest `tail`.
pub fn filter_and_sort(mut entries: Vec<LogEntry>, options: &LogOptions) -> Vec<LogEntry> {
    if let Some(since) = options.since {
        entries.retain(|e| e.timestamp >= since);
    }
    if let Some(level) = options.level.as_deref() {
        let min = level_rank(level);
        entries.retain(|e| level_rank(&e.level) >= min);
    }
    // Stable, so lines with equal timestamps keep their per-service order.
    entries.sort_by_key(|e| e.timestamp);
    if let Some(tail) = options.tail
        && entries.len() > tail
    {
        entries.drain(..entries.len() - tail);
    }
    entries
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::types::PlatformType;

    fn entry(service: &str, at: DateTime<Utc>, level: &str) -> LogEntry {
        LogEntry {
            timestamp: at,
            service: service.into(),
            platform: PlatformType::Mock,
            level: level.into(),
            message: format!("{service} {level}"),
        }
    }

    #[test]
    fn test_sorted_filtered_and_tailed() {
        let t0 = Utc::now();
        let entries = vec![
            entry("backend", t0 + Duration::seconds(3), "info"),
            entry("database", t0 + Duration::seconds(1), "error"),
            entry("backend", t0, "debug"),
            entry("database", t0 + Duration::seconds(2), "warn"),
        ];

        let all = filter_and_sort(entries.clone(), &LogOptions::default());
        let order: Vec<_> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            order,
            vec!["backend debug", "database error", "database warn", "backend info"]
        );

        let warn_and_up = filter_and_sort(
            entries.clone(),
            &LogOptions {
                level: Some("warn".into()),
                ..Default::default()
            },
        );
        assert_eq!(warn_and_up.len(), 2);

        let tail = filter_and_sort(
            entries,
            &LogOptions {
                tail: Some(2),
                since: Some(t0 + Duration::seconds(1)),
                ..Default::default()
            },
        );
        let order: Vec<_> = tail.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(order, vec!["database warn", "backend info"]);
    }
}
