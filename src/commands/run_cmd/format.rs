//! Formatting functions for run output display.
//!
//! Pure functions that return strings; printing happens in the caller.

use colored::Colorize;
use std::fmt::Write;

use super::report::Report;
use super::Shape;

/// Formats the startup banner.
pub(crate) fn format_banner(shape: Shape, run_id: &str, mount: &str) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(60).dimmed()).unwrap();
    writeln!(&mut out, "{}", "   Sandbox Stability Run".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(60).dimmed()).unwrap();
    writeln!(&mut out, "  Run:        {}", run_id.cyan()).unwrap();
    writeln!(&mut out, "  Shape:      {}", shape.to_string().cyan().bold()).unwrap();
    writeln!(
        &mut out,
        "  Sandboxes:  {}",
        shape.sandboxes().to_string().cyan()
    )
    .unwrap();
    writeln!(&mut out, "  Rounds:     {}", shape.rounds().to_string().cyan()).unwrap();
    writeln!(&mut out, "  Storage:    {}", mount.cyan()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(60).dimmed()).unwrap();

    out
}

/// Formats the final report.
pub(crate) fn format_report(report: &Report) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", "━".repeat(60).dimmed()).unwrap();
    writeln!(
        &mut out,
        "{}",
        format!("   {} - results", report.title).yellow().bold()
    )
    .unwrap();
    writeln!(&mut out, "{}", "━".repeat(60).dimmed()).unwrap();

    writeln!(&mut out, "  Sequences:     {}", report.total).unwrap();
    writeln!(
        &mut out,
        "  Succeeded:     {}",
        report.succeeded.to_string().green()
    )
    .unwrap();
    let failed = if report.failed > 0 {
        report.failed.to_string().red().bold()
    } else {
        report.failed.to_string().normal()
    };
    writeln!(&mut out, "  Failed:        {failed}").unwrap();
    writeln!(
        &mut out,
        "  Success rate:  {}",
        format_rate(report.success_rate)
    )
    .unwrap();
    writeln!(&mut out, "  Rounds:        {}", report.rounds).unwrap();
    writeln!(&mut out, "  Wall time:     {}", format_ms(report.wall_ms)).unwrap();

    writeln!(&mut out).unwrap();
    out.push_str(&format_metrics_table(report));

    if !report.failures.is_empty() {
        writeln!(&mut out, "\n  {}", "Failures".red().bold()).unwrap();
        for failure in &report.failures {
            writeln!(
                &mut out,
                "  {} {} ({})",
                "✗".red(),
                failure.label.bold(),
                failure.sandbox_id.as_deref().unwrap_or("no sandbox")
            )
            .unwrap();
            writeln!(&mut out, "      at:      {}", failure.failed_at.yellow()).unwrap();
            writeln!(&mut out, "      error:   {}", failure.error).unwrap();
            let cleanup = match &failure.cleanup {
                None => "not attempted".dimmed().to_string(),
                Some(c) if c.success => format!(
                    "killed after {} attempt(s) in {}",
                    c.attempts,
                    format_ms(c.duration_ms)
                )
                .green()
                .to_string(),
                Some(c) => format!(
                    "gave up after {} attempt(s): {}",
                    c.attempts,
                    c.error.as_deref().unwrap_or("unknown error")
                )
                .red()
                .to_string(),
            };
            writeln!(&mut out, "      cleanup: {cleanup}").unwrap();
        }
    }

    writeln!(&mut out, "{}", "━".repeat(60).dimmed()).unwrap();

    out
}

/// Formats the per-step statistics table.
fn format_metrics_table(report: &Report) -> String {
    let mut out = String::new();

    writeln!(
        &mut out,
        "  {:<12} {:>7} {:>9} {:>9} {:>9} {:>11}",
        "step", "samples", "min", "max", "avg", "total"
    )
    .unwrap();
    writeln!(&mut out, "  {}", "─".repeat(62).dimmed()).unwrap();
    for row in &report.metrics {
        writeln!(
            &mut out,
            "  {:<12} {:>7} {:>9} {:>9} {:>9} {:>11}",
            row.name,
            row.samples,
            format_ms(row.stats.min),
            format_ms(row.stats.max),
            format_ms(row.stats.avg),
            format_ms(row.stats.total)
        )
        .unwrap();
    }

    out
}

/// Formats a success percentage, colored by health.
fn format_rate(rate: f64) -> String {
    let text = format!("{rate:.1}%");
    if rate >= 100.0 {
        text.green().bold().to_string()
    } else if rate >= 90.0 {
        text.yellow().to_string()
    } else {
        text.red().bold().to_string()
    }
}

/// Formats milliseconds for display (e.g., "850ms", "12.3s").
pub(crate) fn format_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        #[allow(clippy::cast_precision_loss)]
        let secs = ms as f64 / 1000.0;
        format!("{secs:.1}s")
    }
}
