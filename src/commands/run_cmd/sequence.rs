//! One sandbox's life: create, N rounds with pause/reconnect, kill.
//!
//! Any failure stops the sequence, records the step it happened in and
//! hands the current handle to safe-kill before returning.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cleanup::{safe_kill, SafeKillResult};
use crate::config::Config;
use crate::lifecycle::{run_round, LifecycleResult};
use crate::sandbox::{SandboxError, SandboxHandle, SandboxPlatform};
use crate::stats::measure_time;

/// Where pauses fall relative to rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PausePolicy {
    /// Pause right before each reconnect, plus once before the kill.
    BeforeReconnect,
    /// Pause after every round, including the last.
    AfterEveryRound,
}

/// What a sequence should do.
#[derive(Debug, Clone)]
pub(crate) struct SequencePlan {
    pub label: String,
    pub rounds: u32,
    pub pause_policy: PausePolicy,
}

/// Everything recorded about one sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct TestResult {
    pub label: String,
    pub sandbox_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// Step that was running when the sequence failed.
    pub failed_at: Option<String>,
    pub create_ms: Option<u64>,
    pub connect_ms: Vec<u64>,
    pub pause_ms: Vec<u64>,
    pub kill_ms: Option<u64>,
    pub rounds: Vec<LifecycleResult>,
    /// Safe-kill outcome, present only when the failure path ran.
    pub cleanup: Option<SafeKillResult>,
}

impl TestResult {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }
}

/// Shared inputs for every sequence of a run.
#[derive(Clone, Copy)]
pub(crate) struct SequenceContext<'a> {
    pub platform: &'a dyn SandboxPlatform,
    pub config: &'a Config,
    pub verbose: bool,
}

/// Runs a full sequence and returns its result. Never fails.
pub(crate) async fn run_sequence(ctx: SequenceContext<'_>, plan: SequencePlan) -> TestResult {
    let timeout = ctx.config.timing.sequence_timeout();
    let mut run = SequenceRun {
        ctx,
        timeout,
        deadline: Instant::now() + timeout,
        step: String::new(),
        handle: None,
        result: TestResult::new(&plan.label),
    };

    match run.drive(&plan).await {
        Ok(()) => {
            info!(
                "[{}] completed {} rounds on {}",
                plan.label,
                plan.rounds,
                run.result.sandbox_id.as_deref().unwrap_or("-")
            );
            run.result.success = true;
        }
        Err(e) => {
            if e.is_not_found() {
                warn!("[{}] sandbox disappeared at {}: {}", plan.label, run.step, e);
            } else if e.is_command_failure() {
                warn!("[{}] command failed at {}: {}", plan.label, run.step, e);
            } else {
                warn!("[{}] failed at {}: {}", plan.label, run.step, e);
            }
            run.result.error = Some(e.to_string());
            run.result.failed_at = Some(run.step.clone());
            run.cleanup().await;
        }
    }

    run.result
}

struct SequenceRun<'a> {
    ctx: SequenceContext<'a>,
    timeout: Duration,
    deadline: Instant,
    step: String,
    /// Handle currently held; replaced on every reconnect.
    handle: Option<SandboxHandle>,
    result: TestResult,
}

impl SequenceRun<'_> {
    async fn drive(&mut self, plan: &SequencePlan) -> Result<(), SandboxError> {
        self.enter("create");
        let (handle, ms) = measure_time(self.bounded(self.ctx.platform.create())).await?;
        info!("[{}] created sandbox {} in {}ms", plan.label, handle.sandbox_id(), ms);
        self.result.sandbox_id = Some(handle.sandbox_id().to_string());
        self.result.create_ms = Some(ms);
        self.handle = Some(handle);

        for round in 1..=plan.rounds {
            if round > 1 {
                if plan.pause_policy == PausePolicy::BeforeReconnect {
                    self.enter(format!("round {round} pause"));
                    self.pause().await?;
                }
                self.enter(format!("round {round} connect"));
                self.reconnect().await?;
            }

            self.enter(format!("round {round} lifecycle"));
            let lifecycle = {
                let handle = self.current()?;
                self.bounded(run_round(
                    self.ctx.platform,
                    handle,
                    &self.ctx.config.storage,
                    round,
                    self.ctx.verbose,
                ))
                .await?
            };
            let added = lifecycle.diff.added.len();
            self.result.rounds.push(lifecycle);

            self.enter(format!("round {round} verify"));
            if added == 0 {
                return Err(SandboxError::invariant(format!(
                    "round {round} added no files to the mount"
                )));
            }

            if plan.pause_policy == PausePolicy::AfterEveryRound {
                self.enter(format!("round {round} pause"));
                self.pause().await?;
            }
        }

        if plan.pause_policy == PausePolicy::BeforeReconnect {
            self.enter("final pause");
            self.pause().await?;
        }

        self.enter("kill");
        let ms = {
            let handle = self.current()?;
            measure_time(self.bounded(self.ctx.platform.kill(handle)))
                .await?
                .1
        };
        self.result.kill_ms = Some(ms);
        Ok(())
    }

    fn enter(&mut self, step: impl Into<String>) {
        self.step = step.into();
        debug!("[{}] {}", self.result.label, self.step);
    }

    fn current(&self) -> Result<&SandboxHandle, SandboxError> {
        self.handle
            .as_ref()
            .ok_or_else(|| SandboxError::request("no sandbox handle held"))
    }

    /// Races `operation` against the sequence deadline.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, SandboxError>
    where
        F: Future<Output = Result<T, SandboxError>>,
    {
        match tokio::time::timeout_at(self.deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::timeout(self.timeout)),
        }
    }

    /// Fixed wait around pause and reconnect.
    async fn settle(&self) -> Result<(), SandboxError> {
        let delay = self.ctx.config.timing.round_delay();
        self.bounded(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }

    async fn pause(&mut self) -> Result<(), SandboxError> {
        self.settle().await?;
        let ms = {
            let handle = self.current()?;
            measure_time(self.bounded(self.ctx.platform.pause(handle)))
                .await?
                .1
        };
        debug!("[{}] paused in {}ms", self.result.label, ms);
        self.result.pause_ms.push(ms);
        Ok(())
    }

    /// Swaps the held handle for a freshly connected one.
    async fn reconnect(&mut self) -> Result<(), SandboxError> {
        self.settle().await?;
        let sandbox_id = self.current()?.sandbox_id().to_string();
        let (fresh, ms) =
            measure_time(self.bounded(self.ctx.platform.connect(&sandbox_id))).await?;
        debug!("[{}] reconnected in {}ms", self.result.label, ms);
        self.result.connect_ms.push(ms);
        self.handle = Some(fresh);
        Ok(())
    }

    /// Failure path: kill whatever handle is held, recording the outcome.
    async fn cleanup(&mut self) {
        let Some(handle) = self.handle.as_ref() else {
            warn!(
                "[{}] no sandbox handle to clean up; a sandbox may be left behind",
                self.result.label
            );
            return;
        };

        let timing = &self.ctx.config.timing;
        let outcome = safe_kill(
            self.ctx.platform,
            handle,
            timing.kill_max_attempts,
            timing.kill_interval(),
        )
        .await;
        if outcome.success {
            info!(
                "[{}] cleanup killed {} after {} attempt(s)",
                self.result.label,
                handle.sandbox_id(),
                outcome.attempts
            );
        } else {
            warn!(
                "[{}] cleanup could not kill {}: {}",
                self.result.label,
                handle.sandbox_id(),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.result.cleanup = Some(outcome);
    }
}
