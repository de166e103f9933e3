use super::tier::AggregationTier;
use super::types::QueryRange;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::PgPool;

/// Records below this temperature are sentinel values from the decoder, not
/// measurements.
pub const TEMPERATURE_THRESHOLD_C: f64 = -100.0;
pub const ALTITUDE_MIN_M: f64 = 0.0;
pub const ALTITUDE_MAX_M: f64 = 14_000.0;
/// Upper bound applied when a request asks for the low-altitude band only.
pub const ALTITUDE_LIMIT_M: f64 = 2_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRecord {
    pub time: DateTime<Utc>,
    pub altitude: f64,
    pub temperature: f64,
    pub wind_x: Option<f64>,
    pub wind_y: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub max_altitude: Option<f64>,
    pub include_wind: bool,
}

impl FetchOptions {
    pub fn for_graph(graph: super::types::GraphKind, limit_altitude: bool) -> Self {
        Self {
            max_altitude: limit_altitude.then_some(ALTITUDE_LIMIT_M),
            include_wind: graph.needs_wind(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataRange {
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub count: i64,
}

/// Seam to the time-series store. The engine only depends on this trait;
/// tests substitute in-memory sources.
pub trait RecordSource: Send + Sync {
    fn fetch(
        &self,
        range: QueryRange,
        tier: AggregationTier,
        options: FetchOptions,
    ) -> BoxFuture<'_, Result<Vec<SensorRecord>>>;

    fn data_range(&self) -> BoxFuture<'_, Result<DataRange>>;
}

/// Drops sentinel and out-of-band rows before rendering. The fetch already
/// applies the altitude cap server-side; this guards the padded edges and
/// non-finite values.
pub fn prepare_records(records: Vec<SensorRecord>, max_altitude: Option<f64>) -> Vec<SensorRecord> {
    let alt_max = max_altitude.unwrap_or(ALTITUDE_MAX_M);
    records
        .into_iter()
        .filter(|record| {
            record.temperature.is_finite()
                && record.temperature > TEMPERATURE_THRESHOLD_C
                && record.altitude.is_finite()
                && record.altitude >= ALTITUDE_MIN_M
                && record.altitude <= alt_max
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    time: DateTime<Utc>,
    altitude: f64,
    temperature: f64,
    wind_x: Option<f64>,
    wind_y: Option<f64>,
}

impl From<RecordRow> for SensorRecord {
    fn from(row: RecordRow) -> Self {
        SensorRecord {
            time: row.time,
            altitude: row.altitude,
            temperature: row.temperature,
            wind_x: row.wind_x,
            wind_y: row.wind_y,
        }
    }
}

/// Postgres-backed source. Raw spans read the measurement table; longer
/// spans read the pre-aggregated altitude grids so row counts stay bounded.
pub struct PostgresRecordSource {
    db: PgPool,
}

impl PostgresRecordSource {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn query_for(tier: AggregationTier) -> &'static str {
        match tier {
            AggregationTier::Raw => {
                r#"
                SELECT time, altitude, temperature,
                       CASE WHEN $4 THEN wind_x END AS wind_x,
                       CASE WHEN $4 THEN wind_y END AS wind_y
                FROM meteorological_data
                WHERE time >= $1 AND time < $2
                  AND ($3::float8 IS NULL OR altitude <= $3)
                ORDER BY time ASC
                "#
            }
            AggregationTier::HalfHourGrid => {
                r#"
                SELECT bucket_time AS time, altitude, temperature,
                       CASE WHEN $4 THEN wind_x END AS wind_x,
                       CASE WHEN $4 THEN wind_y END AS wind_y
                FROM halfhourly_altitude_grid
                WHERE bucket_time >= $1 AND bucket_time < $2
                  AND ($3::float8 IS NULL OR altitude <= $3)
                ORDER BY bucket_time ASC
                "#
            }
            AggregationTier::ThreeHourGrid => {
                r#"
                SELECT bucket_time AS time, altitude, temperature,
                       CASE WHEN $4 THEN wind_x END AS wind_x,
                       CASE WHEN $4 THEN wind_y END AS wind_y
                FROM threehour_altitude_grid
                WHERE bucket_time >= $1 AND bucket_time < $2
                  AND ($3::float8 IS NULL OR altitude <= $3)
                ORDER BY bucket_time ASC
                "#
            }
        }
    }
}

impl RecordSource for PostgresRecordSource {
    fn fetch(
        &self,
        range: QueryRange,
        tier: AggregationTier,
        options: FetchOptions,
    ) -> BoxFuture<'_, Result<Vec<SensorRecord>>> {
        Box::pin(async move {
            let rows: Vec<RecordRow> = sqlx::query_as(Self::query_for(tier))
                .bind(range.start)
                .bind(range.end)
                .bind(options.max_altitude)
                .bind(options.include_wind)
                .fetch_all(&self.db)
                .await
                .with_context(|| format!("failed to fetch {} records", tier.as_str()))?;
            Ok(rows.into_iter().map(SensorRecord::from).collect())
        })
    }

    fn data_range(&self) -> BoxFuture<'_, Result<DataRange>> {
        Box::pin(async move {
            let row: (Option<DateTime<Utc>>, Option<DateTime<Utc>>, i64) = sqlx::query_as(
                r#"
                SELECT min(time), max(time), count(*)::BIGINT
                FROM meteorological_data
                "#,
            )
            .fetch_one(&self.db)
            .await
            .context("failed to fetch data range")?;
            Ok(DataRange {
                earliest: row.0,
                latest: row.1,
                count: row.2,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(altitude: f64, temperature: f64) -> SensorRecord {
        SensorRecord {
            time: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
            altitude,
            temperature,
            wind_x: None,
            wind_y: None,
        }
    }

    #[test]
    fn prepare_drops_sentinel_and_out_of_band_rows() {
        let records = vec![
            record(3_000.0, -12.5),
            record(3_000.0, -999.0),
            record(-50.0, 10.0),
            record(20_000.0, -55.0),
            record(500.0, f64::NAN),
        ];
        let kept = prepare_records(records, None);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].altitude, 3_000.0);
    }

    #[test]
    fn prepare_applies_the_low_altitude_cap() {
        let records = vec![record(1_500.0, 5.0), record(2_500.0, 2.0)];
        let kept = prepare_records(records, Some(ALTITUDE_LIMIT_M));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].altitude, 1_500.0);
    }
}
