//! Formatting functions for command output.
//!
//! Pure functions returning strings; the commands decide where to print them.

use chrono::{DateTime, Utc};
use colored::Colorize;
use sandpool::pool::TemplateStats;
use sandpool::sandbox::CommandOutput;
use sandpool::templates::TemplateCatalog;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Startup information for `sandpool run`.
#[derive(Debug, Clone)]
pub(crate) struct BannerInfo {
    pub backend: String,
    pub templates: Vec<String>,
    pub pool_size: usize,
    pub max_age_secs: u64,
    pub active_policy: String,
}

/// Formats a duration in seconds for display (e.g., "1h 5m 30s").
pub(crate) fn format_secs(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Formats the startup banner.
pub(crate) fn format_banner(info: &BannerInfo) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Sandbox Pool Starting".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "  Backend:    {}", info.backend.cyan().bold()).unwrap();
    let templates = if info.templates.is_empty() {
        "(none)".to_string()
    } else {
        info.templates.join(", ")
    };
    writeln!(&mut out, "  Templates:  {}", templates.cyan()).unwrap();
    writeln!(&mut out, "  Pool size:  {}", info.pool_size.to_string().cyan()).unwrap();
    writeln!(
        &mut out,
        "  Max age:    {}",
        format_secs(info.max_age_secs).cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Active:     {}", info.active_policy.cyan()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "\n  {} to stop\n", "Ctrl+C".dimmed()).unwrap();

    out
}

/// Formats the heading printed above each stats table.
pub(crate) fn format_report_header(at: DateTime<Utc>) -> String {
    format!(
        "\n{} {}\n",
        "Pool stats".yellow().bold(),
        at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
    )
}

/// Formats per-template pool statistics as a table.
pub(crate) fn format_stats(stats: &BTreeMap<String, TemplateStats>) -> String {
    let mut out = String::new();

    if stats.is_empty() {
        writeln!(&mut out, "{} No pool activity yet.", "ℹ".blue()).unwrap();
        return out;
    }

    writeln!(
        &mut out,
        "{:<24} {:>5} {:>5} {:>6} {:>7} {:>8} {:>7} {:>8}",
        "TEMPLATE", "READY", "BUSY", "TARGET", "REQS", "HIT RATE", "ERRORS", "INIT"
    )
    .unwrap();

    for (template, s) in stats {
        let ready = format!("{:>5}", s.available);
        let ready = if s.available >= s.target_size {
            ready.green()
        } else if s.available == 0 {
            ready.red()
        } else {
            ready.yellow()
        };
        let errors = format!("{:>7}", s.errors);
        let errors = if s.errors > 0 {
            errors.red()
        } else {
            errors.normal()
        };

        writeln!(
            &mut out,
            "{:<24} {} {:>5} {:>6} {:>7} {:>7.1}% {} {:>6}ms",
            template.cyan(),
            ready,
            s.in_use,
            s.target_size,
            s.requests,
            s.hit_rate * 100.0,
            errors,
            s.avg_init_ms
        )
        .unwrap();
    }

    out
}

/// Formats the template catalog for `sandpool templates`.
pub(crate) fn format_catalog(catalog: &TemplateCatalog) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "Templates:".yellow().bold()).unwrap();
    for template in catalog.iter() {
        writeln!(
            &mut out,
            "  {:<24} {:<8} {}",
            template.id.cyan(),
            template.runtime.to_string(),
            template.image().dimmed()
        )
        .unwrap();
        if let Some(check) = template.warmup() {
            writeln!(&mut out, "  {:<24} warm-up: {}", "", check.dimmed()).unwrap();
        }
    }

    out
}

/// Formats the result of `sandpool exec` for the status line.
pub(crate) fn format_exec_status(sandbox_id: &str, is_new: bool, output: &CommandOutput) -> String {
    let origin = if is_new { "new" } else { "reused" };
    let status = if output.success() {
        format!("{} exit 0", "✓".green())
    } else {
        format!("{} exit {}", "✗".red(), output.exit_code)
    };
    format!("{status} in {} ({origin})", sandbox_id.cyan())
}
