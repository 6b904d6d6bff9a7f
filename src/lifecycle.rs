//! One mount → list → execute → list → diff → unmount round.

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::sandbox::{FileInfo, SandboxError, SandboxHandle, SandboxPlatform};
use crate::stats::{diff_by_name, elapsed_ms, measure_time, FileSetDiff};
use crate::storage::{describe_mount, mount_command, unmount_command};

/// Language the probe program is written in.
const PROBE_LANGUAGE: &str = "python";

/// Milliseconds spent in each step of a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct LifecycleTimings {
    pub mount: u64,
    pub list_before: u64,
    pub run_code: u64,
    pub list_after: u64,
    pub unmount: u64,
}

/// Everything one round observed.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LifecycleResult {
    pub round: u32,
    pub timings: LifecycleTimings,
    pub files_before: Vec<FileInfo>,
    pub files_after: Vec<FileInfo>,
    pub diff: FileSetDiff,
    pub output: String,
}

/// Runs one lifecycle round against `handle`.
///
/// Mount, listing and execution failures abort the round. An unmount that
/// exits non-zero is logged and tolerated.
pub(crate) async fn run_round(
    platform: &dyn SandboxPlatform,
    handle: &SandboxHandle,
    storage: &StorageConfig,
    round: u32,
    verbose: bool,
) -> Result<LifecycleResult, SandboxError> {
    let id = handle.sandbox_id();
    let mount_path = storage.mount_path.as_str();
    if verbose {
        info!("[{id}] round {round}: mounting {}", describe_mount(storage));
    }

    let (mounted, mount) =
        measure_time(platform.run_command(handle, &mount_command(storage))).await?;
    if mounted.exit_code != 0 {
        return Err(SandboxError::command_failed(
            mounted.exit_code,
            mounted.stderr.trim(),
        ));
    }

    let (files_before, list_before) =
        measure_time(platform.list_directory(handle, mount_path)).await?;
    debug!("[{id}] round {round}: {} entries before", files_before.len());

    let file_name = probe_file_name(round, chrono::Utc::now().timestamp_millis());
    let (execution, run_code) = measure_time(platform.run_code(
        handle,
        &probe_program(mount_path, &file_name, round),
        PROBE_LANGUAGE,
    ))
    .await?;
    if execution.exit_code != 0 {
        let stderr = execution.stderr.trim();
        let stderr = if stderr.is_empty() {
            "unknown error"
        } else {
            stderr
        };
        return Err(SandboxError::command_failed(execution.exit_code, stderr));
    }

    let (files_after, list_after) =
        measure_time(platform.list_directory(handle, mount_path)).await?;
    let diff = diff_by_name(&files_before, &files_after);
    debug!(
        "[{id}] round {round}: {} added, {} removed",
        diff.added.len(),
        diff.removed.len()
    );

    // Unmount never aborts the round, so its errors are kept rather than raised
    let started = Instant::now();
    let unmounted = platform.run_command(handle, &unmount_command(storage)).await;
    let unmount = elapsed_ms(started);
    match unmounted {
        Ok(output) if output.exit_code != 0 => warn!(
            "[{id}] round {round}: unmount exited {}: {}",
            output.exit_code,
            output.stderr.trim()
        ),
        Ok(_) => {}
        Err(e) => warn!("[{id}] round {round}: unmount failed: {e}"),
    }

    let timings = LifecycleTimings {
        mount,
        list_before,
        run_code,
        list_after,
        unmount,
    };
    if verbose {
        info!(
            "[{id}] round {round}: mount {}ms, list {}ms, run {}ms, list {}ms, unmount {}ms",
            timings.mount, timings.list_before, timings.run_code, timings.list_after, timings.unmount
        );
    }

    Ok(LifecycleResult {
        round,
        timings,
        files_before,
        files_after,
        diff,
        output: execution.output_text(),
    })
}

/// Name of the file a round writes; unique per round and instant.
fn probe_file_name(round: u32, timestamp_ms: i64) -> String {
    format!("stability_{timestamp_ms}_round{round}.txt")
}

/// Python program that writes the probe file and prints a confirmation.
fn probe_program(mount_path: &str, file_name: &str, round: u32) -> String {
    let dir = serde_json::Value::String(mount_path.to_string());
    let name = serde_json::Value::String(file_name.to_string());
    format!(
        r#"import os
from datetime import datetime, timezone
MOUNT_DIR = {dir}
FILE_NAME = {name}
path = os.path.join(MOUNT_DIR, FILE_NAME)
with open(path, "w") as f:
    f.write("round {round} written at " + datetime.now(timezone.utc).isoformat() + "\n")
print("created " + path)
"#
    )
}
