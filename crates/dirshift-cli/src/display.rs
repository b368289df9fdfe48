//! Display utilities for the dirshift CLI

use crate::history::HistoryRecord;
use crate::scan::ScannedFolder;
use console::style;
use dirshift_types::{BatchSummary, DiskInfo, MigrationResult, RiskAssessment, RiskLevel};
use std::time::Duration;

/// Display mounted volumes
pub fn display_drives(drives: &[DiskInfo]) {
    println!("{}", style("Drives:").bold().underlined());
    for drive in drives {
        println!(
            "  {:<24} {:>10} free of {:>10} ({:.1}% used)  {}",
            style(drive.path.display()).cyan(),
            style(format_bytes(drive.free_space)).green(),
            format_bytes(drive.total_space),
            drive.usage_percent(),
            style(&drive.display_name).dim()
        );
    }
}

fn risk_label(level: RiskLevel) -> console::StyledObject<String> {
    let label = format!("{:<6}", level.to_string());
    match level {
        RiskLevel::Low => style(label).green(),
        RiskLevel::Medium => style(label).yellow(),
        RiskLevel::High => style(label).red().bold(),
    }
}

/// Display scanned migration candidates
pub fn display_folders(folders: &[ScannedFolder]) {
    println!("{}", style("Candidate folders:").bold().underlined());
    for folder in folders {
        println!(
            "  {} {:>10}  {}",
            risk_label(folder.assessment.risk_level),
            style(format_bytes(folder.candidate.size_bytes)).green(),
            style(folder.candidate.source_path.display()).cyan()
        );
    }
}

/// Display the warnings of an advisory assessment
pub fn display_assessment(name: &str, assessment: &RiskAssessment) {
    display_warning(&format!(
        "{} is {} risk ({:.0}% confidence)",
        name,
        assessment.risk_level,
        assessment.confidence * 100.0
    ));
    for warning in &assessment.warnings {
        println!("    • {}", style(warning).yellow());
    }
    for recommendation in &assessment.recommendations {
        println!("    • {}", style(recommendation).dim());
    }
}

/// Display one job outcome with its log
pub fn display_result(result: &MigrationResult) {
    let job = &result.job;
    if result.success {
        display_success(&format!("{} [{}] {}", job.name, job.id.short(), job.state));
    } else if result.is_cancelled() {
        display_warning(&format!("{} [{}] cancelled", job.name, job.id.short()));
    } else {
        display_error(&format!(
            "{} [{}] failed: {}",
            job.name,
            job.id.short(),
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if let Some(target) = &job.target_path {
        println!("    Target: {}", style(target.display()).cyan());
    }
    if let Some(backup) = &job.backup_path {
        println!("    Backup: {}", style(backup.display()).cyan());
    }
    if job.rollback_failed {
        display_error("    Rollback failed, the folder may need manual repair");
    }
    if result.stats.bytes_copied > 0 {
        println!(
            "    Copied {} in {} files ({}, {:.2} MB/s)",
            style(format_bytes(result.stats.bytes_copied)).green(),
            result.stats.files_copied,
            format_duration(result.stats.duration),
            result.stats.transfer_rate() / 1024.0 / 1024.0
        );
    }
    for line in &result.log {
        println!("    {}", style(line).dim());
    }
}

/// Display aggregate counts of a batch
pub fn display_summary(summary: &BatchSummary) {
    println!();
    println!("{}", style("Batch Summary:").bold().underlined());
    println!("  Jobs: {}", summary.total);
    println!("  Succeeded: {}", style(summary.succeeded).green());
    println!(
        "  Failed: {}",
        if summary.failed > 0 {
            style(summary.failed).red()
        } else {
            style(summary.failed).green()
        }
    );
    println!("  Cancelled: {}", style(summary.cancelled).yellow());
    if summary.rollback_failed > 0 {
        println!(
            "  Rollback failures: {}",
            style(summary.rollback_failed).red().bold()
        );
    }
    println!(
        "  Bytes copied: {}",
        style(format_bytes(summary.bytes_copied)).green()
    );
}

/// Display recorded outcomes, newest last
pub fn display_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        display_info("No migrations recorded yet");
        return;
    }
    for record in records {
        let result = &record.result;
        let outcome = if result.success {
            style("ok".to_string()).green()
        } else {
            style(
                result
                    .error_kind
                    .map_or_else(|| "failed".to_string(), |kind| kind.to_string()),
            )
            .red()
        };
        println!(
            "{}  {:<8} {}  {:<24} {} -> {}",
            style(record.recorded_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            record.operation.to_string(),
            result.job.id,
            outcome,
            result.job.source_path.display(),
            result
                .job
                .target_path
                .as_ref()
                .map_or_else(|| "-".to_string(), |path| path.display().to_string())
        );
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Display a warning message with proper formatting
pub fn display_warning(message: &str) {
    println!("{} {}", style("⚠").yellow().bold(), style(message).yellow());
}

/// Display an error message with proper formatting
pub fn display_error(message: &str) {
    println!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Display a success message with proper formatting
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}

/// Display an info message with proper formatting
pub fn display_info(message: &str) {
    println!("{} {}", style("ℹ").blue().bold(), style(message).blue());
}
