//! Timing and statistics helpers.
//!
//! Pure functions over elapsed-time samples plus the name-based file set
//! comparison used after every lifecycle round.

use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use tokio::time::Instant;

use crate::sandbox::FileInfo;

/// Summary statistics over a set of millisecond samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct TimingStats {
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    pub total: u64,
}

/// Files that appeared or disappeared between two directory snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct FileSetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Awaits `operation` and returns its output with the elapsed milliseconds.
///
/// Errors from the operation propagate unchanged; no timing is reported
/// for a failed operation.
pub(crate) async fn measure_time<F, T, E>(operation: F) -> Result<(T, u64), E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let value = operation.await?;
    Ok((value, elapsed_ms(start)))
}

/// Milliseconds elapsed since `start`, saturating at `u64::MAX`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Computes min/max/avg/total over `values`.
///
/// An empty input yields all zeros. The average rounds half away from zero;
/// samples are unsigned, so `2.5` becomes `3`.
pub(crate) fn calculate_stats(values: &[u64]) -> TimingStats {
    let (Some(&min), Some(&max)) = (values.iter().min(), values.iter().max()) else {
        return TimingStats::default();
    };

    let total: u64 = values.iter().sum();
    let count = values.len() as u64;
    // (2 * total + count) / (2 * count) == floor(total / count + 1/2)
    let avg = (2 * u128::from(total) + u128::from(count)) / (2 * u128::from(count));

    TimingStats {
        min,
        max,
        avg: u64::try_from(avg).unwrap_or(u64::MAX),
        total,
    }
}

/// Compares two snapshots by entry name.
///
/// `added` keeps the order of `after`, `removed` keeps the order of `before`.
pub(crate) fn diff_by_name(before: &[FileInfo], after: &[FileInfo]) -> FileSetDiff {
    let before_names: HashSet<&str> = before.iter().map(|f| f.name.as_str()).collect();
    let after_names: HashSet<&str> = after.iter().map(|f| f.name.as_str()).collect();

    let added = after
        .iter()
        .filter(|f| !before_names.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();
    let removed = before
        .iter()
        .filter(|f| !after_names.contains(f.name.as_str()))
        .map(|f| f.name.clone())
        .collect();

    FileSetDiff { added, removed }
}
