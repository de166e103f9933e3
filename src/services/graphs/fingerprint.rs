use super::types::{GraphKind, QueryRange};
use chrono::{DateTime, Duration, TimeZone, Utc};
use xxhash_rust::xxh3::xxh3_64;

/// Tunables for collapsing rolling queries onto shared cache keys.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintPolicy {
    /// How close `end` must be to now for the query to count as rolling.
    pub rolling_tolerance: Duration,
    /// Bucket width the rolling `end` is floored to.
    pub cache_bucket: Duration,
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self {
            rolling_tolerance: Duration::seconds(600),
            cache_bucket: Duration::seconds(600),
        }
    }
}

/// Canonical identity of a visualization request.
///
/// A rolling query (end within tolerance of now) has its end floored to the
/// cache bucket, so repeated "last 7 days" requests issued within the same
/// bucket share a fingerprint. Explicit historical ranges are kept verbatim.
/// The span is carried in seconds, which makes the rolling start collapse
/// together with the bucketed end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobFingerprint {
    pub graph: GraphKind,
    pub span_seconds: i64,
    pub end_ts: i64,
    pub limit_altitude: bool,
}

impl JobFingerprint {
    pub fn compute(
        graph: GraphKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit_altitude: bool,
        now: DateTime<Utc>,
        policy: &FingerprintPolicy,
    ) -> Self {
        let span_seconds = (end - start).num_seconds().max(0);
        let rolling = (now - end).num_seconds().abs() <= policy.rolling_tolerance.num_seconds();
        let end_ts = if rolling {
            let bucket = policy.cache_bucket.num_seconds().max(1);
            end.timestamp().div_euclid(bucket) * bucket
        } else {
            end.timestamp()
        };
        Self {
            graph,
            span_seconds,
            end_ts,
            limit_altitude,
        }
    }

    /// The canonical window a job built from this fingerprint renders. Every
    /// request that collapsed onto the fingerprint observes the same window,
    /// so the shared artifact is correct for all of them.
    pub fn effective_range(&self) -> QueryRange {
        let end = Utc
            .timestamp_opt(self.end_ts, 0)
            .single()
            .unwrap_or_else(Utc::now);
        QueryRange {
            start: end - Duration::seconds(self.span_seconds),
            end,
        }
    }

    /// Short stable key used in logs.
    pub fn cache_key(&self) -> String {
        let text = format!(
            "{}|{}|{}|{}",
            self.graph.as_str(),
            self.span_seconds,
            self.end_ts,
            self.limit_altitude as u8,
        );
        format!("{:016x}", xxh3_64(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FingerprintPolicy {
        FingerprintPolicy::default()
    }

    #[test]
    fn rolling_queries_within_one_bucket_collapse() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 7, 30).unwrap();
        let a = JobFingerprint::compute(
            GraphKind::Scatter2d,
            now - Duration::days(7),
            now,
            false,
            now,
            &policy(),
        );
        let later = now + Duration::seconds(90);
        let b = JobFingerprint::compute(
            GraphKind::Scatter2d,
            later - Duration::days(7),
            later,
            false,
            later,
            &policy(),
        );
        assert_eq!(a, b);
        assert_eq!(a.end_ts % 600, 0);
    }

    #[test]
    fn rolling_queries_in_different_buckets_differ() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 1, 0).unwrap();
        let a = JobFingerprint::compute(
            GraphKind::Scatter2d,
            now - Duration::days(7),
            now,
            false,
            now,
            &policy(),
        );
        let later = now + Duration::seconds(900);
        let b = JobFingerprint::compute(
            GraphKind::Scatter2d,
            later - Duration::days(7),
            later,
            false,
            later,
            &policy(),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn historical_ranges_are_used_verbatim() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 7, 30).unwrap();
        let end = now - Duration::days(30);
        let fp = JobFingerprint::compute(
            GraphKind::Heatmap,
            end - Duration::days(7),
            end,
            false,
            now,
            &policy(),
        );
        assert_eq!(fp.end_ts, end.timestamp());
        assert_eq!(fp.effective_range().end, end);
    }

    #[test]
    fn distinct_requests_do_not_collide() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let start = now - Duration::days(7);
        let base = JobFingerprint::compute(GraphKind::Scatter2d, start, now, false, now, &policy());
        let other_graph =
            JobFingerprint::compute(GraphKind::Heatmap, start, now, false, now, &policy());
        let other_altitude =
            JobFingerprint::compute(GraphKind::Scatter2d, start, now, true, now, &policy());
        let other_span = JobFingerprint::compute(
            GraphKind::Scatter2d,
            now - Duration::days(14),
            now,
            false,
            now,
            &policy(),
        );
        assert_ne!(base, other_graph);
        assert_ne!(base, other_altitude);
        assert_ne!(base, other_span);
    }

    #[test]
    fn effective_range_preserves_span() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 4, 0).unwrap();
        let fp = JobFingerprint::compute(
            GraphKind::Density,
            now - Duration::days(7),
            now,
            false,
            now,
            &policy(),
        );
        let range = fp.effective_range();
        assert_eq!(range.span(), Duration::days(7));
    }
}
