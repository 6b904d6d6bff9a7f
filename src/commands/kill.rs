//! Manual safe-kill of a sandbox left behind by an interrupted run.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::time::Duration;

use crate::cleanup::{safe_kill, SafeKillResult};
use crate::config::Config;
use crate::sandbox::{HttpPlatform, SandboxHandle, SandboxPlatform};

/// Kills `sandbox_id` with bounded retries, overriding the configured
/// attempt count and interval when given.
pub(crate) async fn run(
    config: &Config,
    sandbox_id: &str,
    attempts: Option<u32>,
    interval_ms: Option<u64>,
) -> Result<()> {
    config.validate_platform()?;
    let platform =
        HttpPlatform::new(&config.platform).context("Failed to build sandbox API client")?;

    let outcome = kill_by_id(&platform, config, sandbox_id, attempts, interval_ms).await;
    println!("{}", format_outcome(sandbox_id, &outcome));

    if !outcome.success {
        bail!(
            "Could not kill sandbox {sandbox_id}: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn kill_by_id(
    platform: &dyn SandboxPlatform,
    config: &Config,
    sandbox_id: &str,
    attempts: Option<u32>,
    interval_ms: Option<u64>,
) -> SafeKillResult {
    let attempts = attempts.unwrap_or(config.timing.kill_max_attempts);
    let interval = interval_ms.map_or_else(|| config.timing.kill_interval(), Duration::from_millis);
    let handle = SandboxHandle::detached(sandbox_id);
    safe_kill(platform, &handle, attempts, interval).await
}

fn format_outcome(sandbox_id: &str, outcome: &SafeKillResult) -> String {
    if outcome.success {
        format!(
            "{} Killed {} after {} attempt(s) in {}ms",
            "✓".green(),
            sandbox_id.bold(),
            outcome.attempts,
            outcome.duration_ms
        )
    } else {
        format!(
            "{} Gave up on {} after {} attempt(s) in {}ms",
            "✗".red(),
            sandbox_id.bold(),
            outcome.attempts,
            outcome.duration_ms
        )
    }
}
