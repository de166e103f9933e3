use crate::config::GraphConfig;
use crate::services::graphs::{
    AggregationTier, DataRange, FetchOptions, GraphJobService, GraphRenderer, JobStatus,
    QueryRange, RecordSource, RenderRequest, RenderedImage, SensorRecord,
};
use crate::state::AppState;
use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn test_config() -> GraphConfig {
    GraphConfig {
        database_url: "postgresql://postgres@localhost/sensors".to_string(),
        static_root: None,
        worker_slots: 2,
        job_timeout_seconds: 30,
        result_ttl_seconds: 60,
        eviction_interval_seconds: 60,
        max_retained_jobs: 100,
        pregeneration_enabled: false,
        pregeneration_interval_seconds: 1500,
        pregeneration_window_days: 7,
        rolling_tolerance_seconds: 600,
        cache_bucket_seconds: 600,
        tier_raw_max_days: 14.0,
        tier_mid_max_days: 90.0,
    }
}

/// In-memory source producing an even spread of synthetic records; counts
/// fetches so dedup tests can assert the pipeline ran exactly once.
pub struct CountingRecordSource {
    delay: Duration,
    fetch_calls: AtomicUsize,
}

impl CountingRecordSource {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl RecordSource for CountingRecordSource {
    fn fetch(
        &self,
        range: QueryRange,
        _tier: AggregationTier,
        options: FetchOptions,
    ) -> BoxFuture<'_, Result<Vec<SensorRecord>>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let count = 60;
            let step = range.span() / count;
            let records = (0..count)
                .map(|i| SensorRecord {
                    time: range.start + step * i,
                    altitude: 500.0 + (i as f64 * 211.0) % 9_500.0,
                    temperature: -55.0 + (i as f64 * 1.7) % 75.0,
                    wind_x: options.include_wind.then_some(3.5),
                    wind_y: options.include_wind.then_some(-1.5),
                })
                .collect();
            Ok(records)
        })
    }

    fn data_range(&self) -> BoxFuture<'_, Result<DataRange>> {
        Box::pin(async move {
            let latest = Utc::now();
            Ok(DataRange {
                earliest: Some(latest - chrono::Duration::days(365)),
                latest: Some(latest),
                count: 1_000_000,
            })
        })
    }
}

pub struct FailingRecordSource;

impl RecordSource for FailingRecordSource {
    fn fetch(
        &self,
        _range: QueryRange,
        _tier: AggregationTier,
        _options: FetchOptions,
    ) -> BoxFuture<'_, Result<Vec<SensorRecord>>> {
        Box::pin(async move { Err(anyhow::anyhow!("connection refused")) })
    }

    fn data_range(&self) -> BoxFuture<'_, Result<DataRange>> {
        Box::pin(async move { Err(anyhow::anyhow!("connection refused")) })
    }
}

#[derive(Default)]
pub struct StubRenderer;

impl GraphRenderer for StubRenderer {
    fn render(&self, request: &RenderRequest) -> Result<RenderedImage> {
        Ok(RenderedImage {
            bytes: format!("<svg data-graph=\"{}\"/>", request.graph.as_str()).into_bytes(),
            content_type: "image/svg+xml",
        })
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let graph_jobs = Arc::new(GraphJobService::new(
        &config,
        Arc::new(CountingRecordSource::slow(Duration::from_millis(0))),
        Arc::new(StubRenderer),
    ));
    graph_jobs.clone().start(CancellationToken::new());
    AppState { config, graph_jobs }
}

/// Polls the service until the job reaches the expected status; panics if a
/// different terminal state shows up first or the wait times out.
pub async fn wait_for_status(service: &Arc<GraphJobService>, id: Uuid, expected: JobStatus) {
    for _ in 0..500 {
        if let Some(status) = service.batch_status(&[id]).remove(&id.to_string()) {
            if status.status == expected {
                return;
            }
            if status.status.is_terminal() {
                panic!(
                    "job reached {:?} while waiting for {:?} (error: {:?})",
                    status.status, expected, status.error
                );
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {expected:?}");
}
