//! Output formatting for aggregate reports

use anyhow::Result;
use serde_json::{json, Value};
use std::time::Duration;
use vmsctl_orchestrator::{AggregateReport, TargetReport, TargetStatus};

/// Print an aggregate report in the specified format
pub fn print_report(report: &AggregateReport, format: &str) -> Result<()> {
    let format = format.trim().to_lowercase();
    match format.as_str() {
        "json" | "j" => print_json(report)?,
        "csv" | "c" => print_csv(report),
        "table" | "text" | "t" | "" => print_table(report),
        _ => {
            eprintln!("Warning: Unknown format '{}', using default table format", format);
            print_table(report);
        }
    }
    Ok(())
}

/// Print results as ASCII table (targets are already sorted by key)
fn print_table(report: &AggregateReport) {
    if report.is_empty() {
        println!("\nNo results to display.\n");
        return;
    }

    println!("\n{:-<80}", "");
    println!("{:<24} {:<10} {:<10} {:<34}", "TARGET", "STATUS", "TIME", "DETAIL");
    println!("{:-<80}", "");

    for target in report.targets.values() {
        println!(
            "{:<24} {:<10} {:<10} {:<34}",
            truncate(&target.key, 24),
            target.status,
            format_duration(target.duration),
            truncate(&detail(target), 34)
        );
    }

    let summary = report.summary();
    println!("{:-<80}", "");
    println!("\nSummary:");
    println!("  Targets:   {}", summary.total);
    println!("  Passed:    {}", summary.passed);
    println!("  Partial:   {}", summary.partially_failed);
    println!("  Failed:    {}", summary.failed);
    println!("  Duration:  {}", format_duration(report.elapsed));

    let failures: Vec<&TargetReport> = report.failures().collect();
    if !failures.is_empty() {
        println!("\nErrors:");
        for target in failures {
            for error in &target.errors {
                println!("  {}", error);
            }
        }
    }
    println!();
}

/// Print results as JSON
fn print_json(report: &AggregateReport) -> Result<()> {
    let summary = report.summary();
    let output = json!({
        "run_info": {
            "run_id": report.run_id,
            "started_at": report.started_at,
            "duration_seconds": report.elapsed.as_secs_f64(),
            "duration_formatted": format_duration(report.elapsed),
            "success_rate": summary.success_rate(),
        },
        "summary": summary,
        "targets": report.targets,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Print results as CSV
fn print_csv(report: &AggregateReport) {
    println!("target,status,duration_ms,outputs,errors,sources,first_error");
    for target in report.targets.values() {
        let first_error = target
            .errors
            .first()
            .map(|e| csv_escape(&e.message))
            .unwrap_or_else(|| "\"\"".to_string());
        println!(
            "{},{},{},{},{},\"{}\",{}",
            csv_escape(&target.key),
            target.status,
            target.duration.as_millis(),
            target.output.len(),
            target.errors.len(),
            target.sources.join(" "),
            first_error
        );
    }
}

fn csv_escape(s: &str) -> String {
    let escaped = s.replace('"', "\"\"").replace('\n', " ").replace('\r', "");
    format!("\"{}\"", escaped)
}

/// One-line description of a target: its first error, or a hint of its output
fn detail(target: &TargetReport) -> String {
    match target.status {
        TargetStatus::Failed | TargetStatus::PartiallyFailed => target
            .errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_default(),
        TargetStatus::Passed => match target.output.as_slice() {
            [] => String::new(),
            [single] => compact(single),
            many => format!("{} values", many.len()),
        },
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
