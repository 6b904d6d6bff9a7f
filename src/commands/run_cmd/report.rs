//! Aggregates sequence results into the final report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::sequence::TestResult;
use crate::cleanup::SafeKillResult;
use crate::lifecycle::LifecycleTimings;
use crate::stats::{calculate_stats, TimingStats};

/// Statistics for one measured step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct MetricRow {
    pub name: &'static str,
    pub samples: usize,
    #[serde(flatten)]
    pub stats: TimingStats,
}

/// Diagnosis for one failed sequence.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct FailureSummary {
    pub label: String,
    pub sandbox_id: Option<String>,
    pub failed_at: String,
    pub error: String,
    pub cleanup: Option<SafeKillResult>,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Report {
    pub title: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub wall_ms: u64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of sequences that succeeded.
    pub success_rate: f64,
    pub rounds: usize,
    pub metrics: Vec<MetricRow>,
    pub failures: Vec<FailureSummary>,
}

/// Identity and timing of the run a report describes.
#[derive(Debug, Clone)]
pub(crate) struct RunInfo {
    pub title: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub wall_ms: u64,
}

impl Report {
    /// Builds the report. Samples from every sequence count, including the
    /// rounds a failed sequence completed before it stopped.
    pub fn from_results(info: RunInfo, results: &[TestResult]) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = total - succeeded;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 * 100.0 / total as f64
        };

        let timings: Vec<&LifecycleTimings> = results
            .iter()
            .flat_map(|r| r.rounds.iter().map(|round| &round.timings))
            .collect();

        let create: Vec<u64> = results.iter().filter_map(|r| r.create_ms).collect();
        let connect: Vec<u64> = results.iter().flat_map(|r| r.connect_ms.iter().copied()).collect();
        let pause: Vec<u64> = results.iter().flat_map(|r| r.pause_ms.iter().copied()).collect();
        let kill: Vec<u64> = results.iter().filter_map(|r| r.kill_ms).collect();
        let lifecycle_field = |get: fn(&LifecycleTimings) -> u64| -> Vec<u64> {
            timings.iter().map(|t| get(t)).collect()
        };

        let metrics = vec![
            metric("create", &create),
            metric("connect", &connect),
            metric("pause", &pause),
            metric("kill", &kill),
            metric("mount", &lifecycle_field(|t| t.mount)),
            metric("list_before", &lifecycle_field(|t| t.list_before)),
            metric("run_code", &lifecycle_field(|t| t.run_code)),
            metric("list_after", &lifecycle_field(|t| t.list_after)),
            metric("unmount", &lifecycle_field(|t| t.unmount)),
        ];

        let failures = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailureSummary {
                label: r.label.clone(),
                sandbox_id: r.sandbox_id.clone(),
                failed_at: r.failed_at.clone().unwrap_or_else(|| "unknown".to_string()),
                error: r.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                cleanup: r.cleanup.clone(),
            })
            .collect();

        Self {
            title: info.title,
            run_id: info.run_id,
            started_at: info.started_at,
            wall_ms: info.wall_ms,
            total,
            succeeded,
            failed,
            success_rate,
            rounds: timings.len(),
            metrics,
            failures,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.total > 0 && self.failed == 0
    }

    /// Looks up a metric row by name.
    pub fn metric(&self, name: &str) -> Option<&MetricRow> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

fn metric(name: &'static str, samples: &[u64]) -> MetricRow {
    MetricRow {
        name,
        samples: samples.len(),
        stats: calculate_stats(samples),
    }
}
