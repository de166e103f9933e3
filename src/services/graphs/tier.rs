use chrono::Duration;

/// Data granularities the store can serve, ordered by coarseness. The
/// derived `Ord` encodes that ordering, which the monotonicity contract and
/// its tests lean on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AggregationTier {
    Raw,
    HalfHourGrid,
    ThreeHourGrid,
}

impl AggregationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationTier::Raw => "raw",
            AggregationTier::HalfHourGrid => "half_hour_grid",
            AggregationTier::ThreeHourGrid => "three_hour_grid",
        }
    }

    /// Time bucket width of the pre-aggregated grids; None for raw records.
    pub fn time_bin(&self) -> Option<Duration> {
        match self {
            AggregationTier::Raw => None,
            AggregationTier::HalfHourGrid => Some(Duration::minutes(30)),
            AggregationTier::ThreeHourGrid => Some(Duration::hours(3)),
        }
    }

    pub fn altitude_bin_meters(&self) -> Option<u32> {
        match self {
            AggregationTier::Raw => None,
            AggregationTier::HalfHourGrid | AggregationTier::ThreeHourGrid => Some(250),
        }
    }
}

/// Span-driven tier selection. Bounding the record count per query is what
/// lets a single fixed job timeout cover a 1-day and a 2-year span alike.
#[derive(Debug, Clone, Copy)]
pub struct TierPolicy {
    pub raw_max_days: f64,
    pub mid_max_days: f64,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            raw_max_days: 14.0,
            mid_max_days: 90.0,
        }
    }
}

impl TierPolicy {
    pub fn select(&self, span: Duration) -> AggregationTier {
        let days = span.num_seconds() as f64 / 86_400.0;
        if days <= self.raw_max_days {
            AggregationTier::Raw
        } else if days <= self.mid_max_days {
            AggregationTier::HalfHourGrid
        } else {
            AggregationTier::ThreeHourGrid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_expected_tier_per_span() {
        let policy = TierPolicy::default();
        assert_eq!(policy.select(Duration::days(10)), AggregationTier::Raw);
        assert_eq!(policy.select(Duration::days(14)), AggregationTier::Raw);
        assert_eq!(
            policy.select(Duration::days(45)),
            AggregationTier::HalfHourGrid
        );
        assert_eq!(
            policy.select(Duration::days(90)),
            AggregationTier::HalfHourGrid
        );
        assert_eq!(
            policy.select(Duration::days(200)),
            AggregationTier::ThreeHourGrid
        );
    }

    #[test]
    fn coarseness_is_monotonic_in_span() {
        let policy = TierPolicy::default();
        let mut previous = AggregationTier::Raw;
        for hours in (0..=24 * 400).step_by(6) {
            let tier = policy.select(Duration::hours(hours as i64));
            assert!(
                tier >= previous,
                "tier regressed from {:?} to {:?} at {hours}h",
                previous,
                tier
            );
            previous = tier;
        }
    }

    #[test]
    fn grid_tiers_carry_bucket_metadata() {
        assert!(AggregationTier::Raw.time_bin().is_none());
        assert_eq!(
            AggregationTier::HalfHourGrid.time_bin(),
            Some(Duration::minutes(30))
        );
        assert_eq!(
            AggregationTier::ThreeHourGrid.time_bin(),
            Some(Duration::hours(3))
        );
        assert_eq!(AggregationTier::ThreeHourGrid.altitude_bin_meters(), Some(250));
    }
}
