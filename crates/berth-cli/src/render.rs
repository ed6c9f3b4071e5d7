//! Terminal rendering of command results.

use anyhow::{Result, bail};
use console::style;

use berth_core::commands::{CommandCatalog, CommandResult, CommandResults, OutputFormat};
use berth_core::platform::LogEntry;

pub fn print_results(results: &CommandResults, format: OutputFormat, quiet: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(results)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(results)?),
        OutputFormat::Table => print_table(results, quiet),
        OutputFormat::Summary if results.command() == "logs" && !quiet => print_logs(results),
        OutputFormat::Summary => print_summary(results, quiet),
    }
    Ok(())
}

fn print_summary(results: &CommandResults, quiet: bool) {
    for result in results.results() {
        if quiet && result.success {
            continue;
        }
        let symbol = if result.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "{} {} ({}) {}",
            symbol,
            style(&result.entity).bold(),
            result.platform,
            detail(result)
        );
    }
    print_messages(results, quiet);

    if quiet {
        return;
    }
    let summary = results.summary();
    let line = format!(
        "{} {}: {} succeeded, {} failed, {} warnings in {}ms",
        results.command(),
        results.environment(),
        summary.succeeded,
        summary.failed,
        summary.warnings,
        results.duration().as_millis()
    );
    if results.is_success() {
        println!("{}", style(line).green());
    } else {
        println!("{}", style(line).red());
    }
    if results.execution_context().dry_run {
        println!("{}", style("(dry run, nothing was changed)").dim());
    }
}

fn print_table(results: &CommandResults, quiet: bool) {
    println!(
        "{:<20} {:<14} {:<10} {:<8} Detail",
        "Service", "Platform", "Type", "Status"
    );
    println!("{}", "-".repeat(80));
    for result in results.results() {
        if quiet && result.success {
            continue;
        }
        let service_type = result
            .service_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = if result.success { "ok" } else { "failed" };
        println!(
            "{:<20} {:<14} {:<10} {:<8} {}",
            truncate(&result.entity, 20),
            result.platform,
            service_type,
            status,
            truncate(&detail(result), 40)
        );
    }
    print_messages(results, quiet);
}

fn print_logs(results: &CommandResults) {
    let mut entries: Vec<LogEntry> = results
        .results()
        .iter()
        .filter_map(|r| r.metadata.get("logs"))
        .filter_map(|logs| serde_json::from_value::<Vec<LogEntry>>(logs.clone()).ok())
        .flatten()
        .collect();
    entries.sort_by_key(|e| e.timestamp);

    for entry in &entries {
        let level = match entry.level.as_str() {
            "error" => style(entry.level.as_str()).red(),
            "warn" => style(entry.level.as_str()).yellow(),
            "debug" => style(entry.level.as_str()).dim(),
            _ => style(entry.level.as_str()),
        };
        println!(
            "{} {:<12} {:<5} {}",
            style(entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ")).dim(),
            style(truncate(&entry.service, 12)).cyan(),
            level,
            entry.message
        );
    }
    print_messages(results, false);
}

fn print_messages(results: &CommandResults, quiet: bool) {
    for error in results.errors() {
        eprintln!("{} {}", style("error:").red().bold(), error);
    }
    if quiet {
        return;
    }
    for warning in results.warnings() {
        println!("  {} {}", style("⚠").yellow(), warning);
    }
}

/// One-line description of a result.
fn detail(result: &CommandResult) -> String {
    if let Some(error) = &result.error {
        return error.clone();
    }
    if result.metadata.get("alreadyRunning").and_then(|v| v.as_bool()) == Some(true) {
        return "already running".to_string();
    }
    if let Some(health) = &result.health {
        return health.status.clone();
    }
    if let Some(endpoint) = &result.endpoint {
        return endpoint.clone();
    }
    result
        .metadata
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

pub fn print_description(catalog: &CommandCatalog, command: Option<&str>) -> Result<()> {
    let Some(name) = command else {
        println!("Commands:");
        for info in catalog.infos() {
            println!("  {:<12} {}", info.name, info.description);
        }
        println!();
        println!("Run `berth describe <command>` for its options.");
        return Ok(());
    };

    let Some(found) = catalog.get(name) else {
        bail!(
            "Unknown command '{}'. Available commands: {}",
            name,
            catalog.names().join(", ")
        );
    };
    let info = found.info();
    println!("{}", info.description);
    println!();
    print!("{}", info.arg_spec.render_help(&info.name));
    if !info.examples.is_empty() {
        println!();
        println!("Examples:");
        for example in &info.examples {
            println!("  {example}");
        }
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
