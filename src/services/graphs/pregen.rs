use super::runner::GraphJobService;
use super::types::GraphKind;
use crate::config::GraphConfig;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Proactively rebuilds the canonical default view (all graph kinds over the
/// default window) so the common interactive request is a cache hit. Goes
/// through the same gate as user requests, so it can never race a concurrent
/// user-triggered build of the same fingerprint.
#[derive(Clone)]
pub struct PregenerationService {
    graph_jobs: Arc<GraphJobService>,
    interval: Duration,
    window: chrono::Duration,
}

impl PregenerationService {
    pub fn new(graph_jobs: Arc<GraphJobService>, config: &GraphConfig) -> Self {
        Self {
            graph_jobs,
            interval: Duration::from_secs(config.pregeneration_interval_seconds.max(60)),
            window: chrono::Duration::days(config.pregeneration_window_days.max(1)),
        }
    }

    pub fn start(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            // Short grace period so startup finishes before the first sweep.
            let first = tokio::time::Instant::now() + Duration::from_secs(10);
            let mut ticker = tokio::time::interval_at(first, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.run_once();
            }
        });
    }

    /// One pre-generation sweep over every graph kind.
    pub fn run_once(&self) {
        let end = Utc::now();
        let start = end - self.window;
        let jobs = self
            .graph_jobs
            .create_jobs(&GraphKind::ALL, start, end, false, None);
        tracing::info!(
            jobs = jobs.len(),
            window_days = self.window.num_days(),
            "pre-generation sweep issued default-window builds"
        );
    }
}
