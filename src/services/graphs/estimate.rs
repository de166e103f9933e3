use super::types::GraphKind;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Mutex;

/// Spare seconds added on top of the estimate so short jobs do not pin the
/// heuristic at its ceiling immediately.
const ESTIMATE_BUFFER_SECONDS: f64 = 3.0;

/// Observed render durations per (graph kind, span bucket, altitude limit),
/// seeded from measured defaults. Feeds the display-only progress heuristic;
/// nothing here affects correctness.
pub struct GenerationTimeHistory {
    observed: Mutex<HashMap<HistoryKey, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HistoryKey {
    graph: GraphKind,
    bucket_hours: u32,
    limit_altitude: bool,
}

fn bucket_hours(span: Duration) -> u32 {
    let hours = span.num_hours().max(0) as u32;
    for bucket in [24, 168, 720, 4320] {
        if hours <= bucket {
            return bucket;
        }
    }
    8760
}

/// Measured baselines: 3d plots are the slowest, the 7-day raw-tier bucket
/// dominates, aggregated tiers shrink long spans back down, and the
/// low-altitude band cuts the record count sharply.
fn default_seconds(graph: GraphKind, bucket_hours: u32, limit_altitude: bool) -> f64 {
    let base = match graph {
        GraphKind::Scatter3d => 10.0,
        GraphKind::Contour3d => 8.0,
        GraphKind::Scatter2d => 8.0,
        GraphKind::Contour2d | GraphKind::Density | GraphKind::WindDirection => 6.0,
        GraphKind::Heatmap | GraphKind::Temperature => 5.0,
    };
    let span_factor = match bucket_hours {
        24 => 0.4,
        168 => 1.0,
        720 => 0.6,
        4320 => 0.7,
        _ => 0.9,
    };
    let altitude_factor = if limit_altitude { 0.4 } else { 1.0 };
    base * span_factor * altitude_factor
}

impl GenerationTimeHistory {
    pub fn new() -> Self {
        Self {
            observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn estimated_seconds(
        &self,
        graph: GraphKind,
        span: Duration,
        limit_altitude: bool,
    ) -> f64 {
        let key = HistoryKey {
            graph,
            bucket_hours: bucket_hours(span),
            limit_altitude,
        };
        let observed = self.observed.lock().unwrap_or_else(|p| p.into_inner());
        observed
            .get(&key)
            .copied()
            .unwrap_or_else(|| default_seconds(graph, key.bucket_hours, limit_altitude))
    }

    pub fn record(
        &self,
        graph: GraphKind,
        span: Duration,
        limit_altitude: bool,
        elapsed_seconds: f64,
    ) {
        if elapsed_seconds <= 0.0 || !elapsed_seconds.is_finite() {
            return;
        }
        let key = HistoryKey {
            graph,
            bucket_hours: bucket_hours(span),
            limit_altitude,
        };
        let mut observed = self.observed.lock().unwrap_or_else(|p| p.into_inner());
        observed.insert(key, elapsed_seconds);
    }

    /// Elapsed-time progress guess for a running job, clamped to 10..=95 so
    /// it never claims completion.
    pub fn heuristic_progress(
        &self,
        graph: GraphKind,
        span: Duration,
        limit_altitude: bool,
        elapsed_seconds: f64,
    ) -> u8 {
        let estimate =
            self.estimated_seconds(graph, span, limit_altitude) + ESTIMATE_BUFFER_SECONDS;
        let fraction = (elapsed_seconds / estimate).clamp(0.0, 1.0);
        (10.0 + fraction * 85.0).min(95.0) as u8
    }
}

impl Default for GenerationTimeHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_time_overrides_default() {
        let history = GenerationTimeHistory::new();
        let span = Duration::days(7);
        let default = history.estimated_seconds(GraphKind::Scatter2d, span, false);
        history.record(GraphKind::Scatter2d, span, false, default * 3.0);
        assert_eq!(
            history.estimated_seconds(GraphKind::Scatter2d, span, false),
            default * 3.0
        );
    }

    #[test]
    fn recording_is_scoped_to_the_span_bucket() {
        let history = GenerationTimeHistory::new();
        history.record(GraphKind::Heatmap, Duration::days(7), false, 40.0);
        let other_bucket = history.estimated_seconds(GraphKind::Heatmap, Duration::days(200), false);
        assert_ne!(other_bucket, 40.0);
    }

    #[test]
    fn non_positive_samples_are_ignored() {
        let history = GenerationTimeHistory::new();
        let span = Duration::days(1);
        let default = history.estimated_seconds(GraphKind::Density, span, true);
        history.record(GraphKind::Density, span, true, 0.0);
        history.record(GraphKind::Density, span, true, -5.0);
        assert_eq!(history.estimated_seconds(GraphKind::Density, span, true), default);
    }

    #[test]
    fn heuristic_progress_is_bounded_and_monotonic() {
        let history = GenerationTimeHistory::new();
        let span = Duration::days(7);
        let early = history.heuristic_progress(GraphKind::Scatter3d, span, false, 0.0);
        let mid = history.heuristic_progress(GraphKind::Scatter3d, span, false, 5.0);
        let late = history.heuristic_progress(GraphKind::Scatter3d, span, false, 10_000.0);
        assert!(early >= 10);
        assert!(mid >= early);
        assert!(late <= 95);
    }
}
