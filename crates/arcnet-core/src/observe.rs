// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timed-operation adapter and in-process operation metrics.
//!
//! Metric emission is a structured side effect behind a trivial adapter:
//! [`observed`] takes an operation label and an action, records duration
//! and outcome, and propagates the action's result untouched. Export to an
//! external metrics system is a separate concern and lives outside the
//! core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// OpMetrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LabelRecord {
    durations_us: Vec<u64>,
    failures: u64,
}

/// Thread-safe per-label operation recorder.
///
/// Clone freely; all clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct OpMetrics {
    inner: Arc<Mutex<BTreeMap<String, LabelRecord>>>,
}

impl OpMetrics {
    /// Create a new, empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed operation.
    pub fn record(&self, label: &str, duration_us: u64, ok: bool) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let rec = inner.entry(label.to_string()).or_default();
        rec.durations_us.push(duration_us);
        if !ok {
            rec.failures += 1;
        }
    }

    /// Summarise everything recorded so far, keyed by label.
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, OpSummary> {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner
            .iter()
            .map(|(label, rec)| {
                let mut sorted = rec.durations_us.clone();
                sorted.sort_unstable();
                let count = sorted.len();
                let mean = if count == 0 {
                    0.0
                } else {
                    sorted.iter().sum::<u64>() as f64 / count as f64
                };
                (
                    label.clone(),
                    OpSummary {
                        count,
                        failures: rec.failures,
                        mean_us: mean,
                        p50_us: percentile(&sorted, 50.0),
                        p99_us: percentile(&sorted, 99.0),
                    },
                )
            })
            .collect()
    }
}

/// Aggregated timings for one operation label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSummary {
    /// Number of recorded operations.
    pub count: usize,
    /// Number that returned an error.
    pub failures: u64,
    /// Mean duration in microseconds.
    pub mean_us: f64,
    /// Median duration in microseconds.
    pub p50_us: f64,
    /// 99th-percentile duration in microseconds.
    pub p99_us: f64,
}

/// Compute a percentile from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

// ---------------------------------------------------------------------------
// observed
// ---------------------------------------------------------------------------

/// Run `op`, recording its duration and outcome under `label`.
///
/// The result is propagated untouched; failures are logged at `warn`.
pub async fn observed<F, T, E>(metrics: &OpMetrics, label: &str, op: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let started = Instant::now();
    let result = op.await;
    let elapsed_us = started.elapsed().as_micros() as u64;
    match &result {
        Ok(_) => {
            metrics.record(label, elapsed_us, true);
            debug!(op = label, elapsed_us, "operation completed");
        }
        Err(e) => {
            metrics.record(label, elapsed_us, false);
            warn!(op = label, elapsed_us, error = %e, "operation failed");
        }
    }
    result
}
