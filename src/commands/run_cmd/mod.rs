//! Stability run command.
//!
//! Drives one of the two workload shapes and reports on it:
//! - `sequence`: one sandbox's create → rounds → kill life
//! - `report`: aggregation of sequence results
//! - `format`: console rendering

mod format;
pub(crate) mod report;
pub(crate) mod sequence;

use anyhow::{bail, Context, Result};
use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::sandbox::{HttpPlatform, SandboxPlatform};
use crate::stats::elapsed_ms;
use crate::storage::describe_mount;

use format::{format_banner, format_report};
use report::{Report, RunInfo};
use sequence::{run_sequence, PausePolicy, SequenceContext, SequencePlan, TestResult};

/// The two supported workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// Many sandboxes concurrently, each for a few rounds.
    FanOut { sandboxes: u32, rounds: u32 },
    /// One sandbox for many rounds.
    Chain { rounds: u32 },
}

impl Shape {
    pub fn sandboxes(self) -> u32 {
        match self {
            Self::FanOut { sandboxes, .. } => sandboxes,
            Self::Chain { .. } => 1,
        }
    }

    pub fn rounds(self) -> u32 {
        match self {
            Self::FanOut { rounds, .. } | Self::Chain { rounds } => rounds,
        }
    }

    fn title(self) -> String {
        match self {
            Self::FanOut { sandboxes, rounds } => {
                format!("Fan-out: {sandboxes} sandboxes x {rounds} rounds")
            }
            Self::Chain { rounds } => format!("Chain: 1 sandbox x {rounds} rounds"),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FanOut { .. } => write!(f, "fan-out"),
            Self::Chain { .. } => write!(f, "chain"),
        }
    }
}

/// Runs every sequence of `shape` and returns their results.
///
/// Fan-out sequences are polled together on the current task; each one
/// stops at its own first failure while the others carry on.
pub(crate) async fn execute(
    platform: &dyn SandboxPlatform,
    config: &Config,
    shape: Shape,
    verbose: bool,
) -> Vec<TestResult> {
    let ctx = SequenceContext {
        platform,
        config,
        verbose,
    };

    match shape {
        Shape::FanOut { sandboxes, rounds } => {
            let sequences = (1..=sandboxes).map(|i| {
                run_sequence(
                    ctx,
                    SequencePlan {
                        label: format!("sandbox-{i}"),
                        rounds,
                        pause_policy: PausePolicy::BeforeReconnect,
                    },
                )
            });
            join_all(sequences).await
        }
        Shape::Chain { rounds } => {
            let plan = SequencePlan {
                label: "chain".to_string(),
                rounds,
                pause_policy: PausePolicy::AfterEveryRound,
            };
            vec![run_sequence(ctx, plan).await]
        }
    }
}

/// Runs a stability workload against the configured platform.
///
/// The report always prints; the command fails afterwards if any
/// sequence failed.
pub(crate) async fn run(config: &Config, shape: Shape, verbose: bool, json: bool) -> Result<()> {
    config.validate()?;
    let platform =
        HttpPlatform::new(&config.platform).context("Failed to build sandbox API client")?;

    let run_id = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>();
    if !json {
        print!(
            "{}",
            format_banner(shape, &run_id, &describe_mount(&config.storage))
        );
    }
    info!("Starting {} run {}", shape, run_id);

    let started_at = chrono::Utc::now();
    let start = Instant::now();
    let results = execute(&platform, config, shape, verbose).await;

    let report = Report::from_results(
        RunInfo {
            title: shape.title(),
            run_id,
            started_at,
            wall_ms: elapsed_ms(start),
        },
        &results,
    );

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", format_report(&report));
    }

    if !report.all_succeeded() {
        bail!(
            "{} of {} sequence(s) failed",
            report.failed,
            report.total
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{Fault, MockPlatform, Op};
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.timing.round_delay_ms = 1000;
        config.timing.kill_interval_ms = 500;
        config
    }

    fn report(results: &[TestResult]) -> Report {
        Report::from_results(
            RunInfo {
                title: "t".to_string(),
                run_id: "r".to_string(),
                started_at: Utc::now(),
                wall_ms: 0,
            },
            results,
        )
    }

    #[test]
    fn test_shape_accessors() {
        let fan_out = Shape::FanOut {
            sandboxes: 5,
            rounds: 2,
        };
        assert_eq!(fan_out.sandboxes(), 5);
        assert_eq!(fan_out.rounds(), 2);
        assert_eq!(fan_out.to_string(), "fan-out");

        let chain = Shape::Chain { rounds: 20 };
        assert_eq!(chain.sandboxes(), 1);
        assert_eq!(chain.rounds(), 20);
        assert_eq!(chain.title(), "Chain: 1 sandbox x 20 rounds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_of_five_rounds() {
        let platform = MockPlatform::new();
        let results = execute(&platform, &config(), Shape::Chain { rounds: 5 }, false).await;

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.rounds.len(), 5);
        assert!(result.rounds.iter().all(|r| r.diff.added.len() == 1));
        assert!(result.rounds.iter().all(|r| r.diff.removed.is_empty()));

        assert_eq!(platform.count(Op::Create), 1);
        assert_eq!(platform.count(Op::Connect), 4);
        assert_eq!(platform.count(Op::Pause), 5);
        assert_eq!(platform.count(Op::Kill), 1);
        assert_eq!(result.connect_ms.len(), 4);
        assert_eq!(result.pause_ms.len(), 5);

        let report = report(&results);
        assert!(report.all_succeeded());
        assert!((report.success_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.metric("mount").unwrap().samples, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_isolates_one_failure() {
        let platform = MockPlatform::new().fail_on(
            Op::RunCode,
            "mock-3",
            2,
            Fault::Exit(1, "Traceback: OSError".to_string()),
        );
        let shape = Shape::FanOut {
            sandboxes: 5,
            rounds: 2,
        };
        let results = execute(&platform, &config(), shape, false).await;

        assert_eq!(results.len(), 5);
        let failed: Vec<&TestResult> = results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(results.iter().filter(|r| r.success).count(), 4);

        let failure = failed[0];
        assert_eq!(failure.sandbox_id.as_deref(), Some("mock-3"));
        assert_eq!(failure.failed_at.as_deref(), Some("round 2 lifecycle"));
        assert!(failure.error.as_deref().unwrap().contains("OSError"));
        assert!(failure.cleanup.as_ref().unwrap().success);
        assert_eq!(failure.rounds.len(), 1);

        for id in 1..=5 {
            assert!(platform.is_killed(&format!("mock-{id}")));
        }
        // Four normal kills plus one cleanup kill
        assert_eq!(platform.count(Op::Kill), 5);

        let report = report(&results);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].failed_at, "round 2 lifecycle");
        assert!((report.success_rate - 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_sequences_run_concurrently() {
        let platform = MockPlatform::new().with_latency(Duration::from_millis(100));
        let shape = Shape::FanOut {
            sandboxes: 4,
            rounds: 2,
        };
        let start = Instant::now();
        let results = execute(&platform, &config(), shape, false).await;
        let elapsed = start.elapsed();

        assert!(results.iter().all(|r| r.success));
        // One sequence: 15 calls at 100ms plus 3 delays at 1s = 4.5s.
        // Serial execution of four would take four times as long.
        assert_eq!(elapsed, Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_rounds_stay_serial_per_sandbox() {
        let platform = MockPlatform::new();
        let shape = Shape::FanOut {
            sandboxes: 3,
            rounds: 3,
        };
        let results = execute(&platform, &config(), shape, false).await;
        assert!(results.iter().all(|r| r.success));

        for id in 1..=3 {
            let ops = platform.ops_for(&format!("mock-{id}"));
            let lifecycle = [Op::Mount, Op::List, Op::RunCode, Op::List, Op::Unmount];
            let mut expected = vec![Op::Create];
            expected.extend(lifecycle);
            for _ in 0..2 {
                expected.push(Op::Pause);
                expected.push(Op::Connect);
                expected.extend(lifecycle);
            }
            expected.push(Op::Pause);
            expected.push(Op::Kill);
            assert_eq!(ops, expected, "mock-{id}");
        }
    }
}
