//! Best-effort sandbox teardown for failure paths.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sandbox::{SandboxHandle, SandboxPlatform};
use crate::stats::elapsed_ms;

/// Outcome of [`safe_kill`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SafeKillResult {
    pub success: bool,
    /// Kill calls actually issued.
    pub attempts: u32,
    pub duration_ms: u64,
    /// Last failure message, set only when every attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Kills `handle`, retrying with a fixed `interval` up to `max_attempts` times.
///
/// Never fails: the outcome is reported in the result so callers can use it
/// from error paths. A sandbox the platform no longer knows counts as killed.
/// A `max_attempts` of zero still issues one attempt.
pub(crate) async fn safe_kill(
    platform: &dyn SandboxPlatform,
    handle: &SandboxHandle,
    max_attempts: u32,
    interval: Duration,
) -> SafeKillResult {
    let max_attempts = max_attempts.max(1);
    let start = Instant::now();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match platform.kill(handle).await {
            Ok(()) => {
                info!(
                    "Killed sandbox {} on attempt {}/{}",
                    handle.sandbox_id(),
                    attempt,
                    max_attempts
                );
                return SafeKillResult {
                    success: true,
                    attempts: attempt,
                    duration_ms: elapsed_ms(start),
                    error: None,
                };
            }
            Err(e) if e.is_not_found() => {
                info!(
                    "Sandbox {} already gone on attempt {}/{}",
                    handle.sandbox_id(),
                    attempt,
                    max_attempts
                );
                return SafeKillResult {
                    success: true,
                    attempts: attempt,
                    duration_ms: elapsed_ms(start),
                    error: None,
                };
            }
            Err(e) => {
                debug!(
                    "Kill attempt {}/{} for {} failed: {}",
                    attempt,
                    max_attempts,
                    handle.sandbox_id(),
                    e
                );
                last_error = e.to_string();
                if attempt < max_attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    warn!(
        "Giving up on sandbox {} after {} kill attempts: {}",
        handle.sandbox_id(),
        max_attempts,
        last_error
    );
    SafeKillResult {
        success: false,
        attempts: max_attempts,
        duration_ms: elapsed_ms(start),
        error: Some(last_error),
    }
}
