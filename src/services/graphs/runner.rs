use super::data::{prepare_records, DataRange, FetchOptions, RecordSource};
use super::estimate::GenerationTimeHistory;
use super::fingerprint::{FingerprintPolicy, JobFingerprint};
use super::registry::{ArtifactLookup, ClaimedJob, GateOutcome, JobRegistry};
use super::render::{GraphRenderer, RenderRequest, RenderedImage};
use super::tier::TierPolicy;
use super::types::{
    CreatedJob, GraphKind, JobStatsResponse, JobStatus, JobStatusPublic,
};
use crate::config::GraphConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Fraction added to each edge of the fetch window for grid-interpolating
/// graph kinds.
const FETCH_EXTENSION_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub worker_slots: usize,
    pub job_timeout: Duration,
    pub eviction_interval: Duration,
    pub fingerprints: FingerprintPolicy,
    pub tiers: TierPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            worker_slots: config.worker_slots.max(1),
            job_timeout: Duration::from_secs(config.job_timeout_seconds),
            eviction_interval: Duration::from_secs(config.eviction_interval_seconds),
            fingerprints: FingerprintPolicy {
                rolling_tolerance: chrono::Duration::seconds(config.rolling_tolerance_seconds),
                cache_bucket: chrono::Duration::seconds(config.cache_bucket_seconds),
            },
            tiers: TierPolicy {
                raw_max_days: config.tier_raw_max_days,
                mid_max_days: config.tier_mid_max_days,
            },
        }
    }
}

/// The job engine: fingerprint gate, FIFO queue, bounded worker slots, and
/// the render pipeline. One instance is shared by the HTTP handlers and the
/// pre-generation scheduler.
pub struct GraphJobService {
    registry: Arc<JobRegistry>,
    queue_rx: Mutex<Option<UnboundedReceiver<Uuid>>>,
    semaphore: Arc<Semaphore>,
    source: Arc<dyn RecordSource>,
    renderer: Arc<dyn GraphRenderer>,
    history: GenerationTimeHistory,
    settings: EngineSettings,
}

impl GraphJobService {
    pub fn new(
        config: &GraphConfig,
        source: Arc<dyn RecordSource>,
        renderer: Arc<dyn GraphRenderer>,
    ) -> Self {
        let settings = EngineSettings::from_config(config);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(JobRegistry::new(
            queue_tx,
            chrono::Duration::seconds(config.result_ttl_seconds as i64),
            config.max_retained_jobs,
        ));
        Self {
            registry,
            queue_rx: Mutex::new(Some(queue_rx)),
            semaphore: Arc::new(Semaphore::new(settings.worker_slots)),
            source,
            renderer,
            history: GenerationTimeHistory::new(),
            settings,
        }
    }

    /// Resolves each requested graph through the dedup gate. The returned
    /// ids do not reveal whether the build is fresh, joined, or cached.
    pub fn create_jobs(
        &self,
        graphs: &[GraphKind],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit_altitude: bool,
        retry_of: Option<Uuid>,
    ) -> Vec<CreatedJob> {
        let now = Utc::now();
        graphs
            .iter()
            .map(|&graph| {
                let fingerprint = JobFingerprint::compute(
                    graph,
                    start,
                    end,
                    limit_altitude,
                    now,
                    &self.settings.fingerprints,
                );
                let outcome = self.registry.get_or_create(fingerprint, retry_of, now);
                match outcome {
                    GateOutcome::Created(id) => tracing::info!(
                        job_id = %id,
                        graph = %graph,
                        cache_key = %fingerprint.cache_key(),
                        "registered graph build"
                    ),
                    GateOutcome::Joined(id) => tracing::debug!(
                        job_id = %id,
                        graph = %graph,
                        cache_key = %fingerprint.cache_key(),
                        "joined in-flight graph build"
                    ),
                    GateOutcome::CacheHit(id) => tracing::debug!(
                        job_id = %id,
                        graph = %graph,
                        cache_key = %fingerprint.cache_key(),
                        "graph cache hit"
                    ),
                }
                CreatedJob {
                    job_id: outcome.job_id(),
                    graph_name: graph,
                }
            })
            .collect()
    }

    /// One consistent snapshot per poll batch. While a job is Processing the
    /// reported progress is lifted by the elapsed-time heuristic, never past
    /// 95.
    pub fn batch_status(&self, ids: &[Uuid]) -> BTreeMap<String, JobStatusPublic> {
        let now = Utc::now();
        self.registry
            .batch_snapshot(ids)
            .into_iter()
            .map(|snapshot| {
                let elapsed =
                    crate::time::elapsed_seconds(snapshot.started_at, snapshot.completed_at, now);
                let mut progress = snapshot.progress;
                if snapshot.status == JobStatus::Processing {
                    if let Some(elapsed) = elapsed {
                        let heuristic = self.history.heuristic_progress(
                            snapshot.graph,
                            snapshot.range.span(),
                            snapshot.limit_altitude,
                            elapsed,
                        );
                        progress = progress.max(heuristic).min(95);
                    }
                }
                (
                    snapshot.id.to_string(),
                    JobStatusPublic {
                        status: snapshot.status,
                        progress,
                        stage: snapshot.stage,
                        error: snapshot.error,
                        elapsed_seconds: elapsed,
                        graph_name: snapshot.graph,
                    },
                )
            })
            .collect()
    }

    pub fn artifact(&self, id: Uuid) -> ArtifactLookup {
        self.registry.artifact(id, Utc::now())
    }

    pub fn stats(&self) -> JobStatsResponse {
        self.registry.stats()
    }

    pub async fn data_range(&self) -> Result<DataRange> {
        self.source.data_range().await
    }

    /// Spawns the dispatcher and the eviction sweep. The dispatcher drains
    /// the FIFO queue, takes a slot per job, and supervises each run with
    /// the per-job timeout; a hung pipeline is preempted from outside and
    /// its slot reclaimed.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            tracing::warn!("graph job service started twice; ignoring");
            return;
        };

        let dispatcher = self.clone();
        let dispatcher_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let job_id = tokio::select! {
                    _ = dispatcher_cancel.cancelled() => break,
                    received = queue_rx.recv() => match received {
                        Some(id) => id,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = dispatcher_cancel.cancelled() => break,
                    permit = dispatcher.semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let worker = dispatcher.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.run_one(job_id).await;
                });
            }
        });

        let sweeper = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.settings.eviction_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let removed = sweeper.registry.evict(Utc::now());
                if removed > 0 {
                    tracing::info!(removed, "evicted expired graph jobs");
                }
            }
        });
    }

    async fn run_one(&self, job_id: Uuid) {
        let Some(job) = self.registry.claim(job_id, Utc::now()) else {
            tracing::debug!(job_id = %job_id, "job vanished before execution");
            return;
        };
        tracing::info!(job_id = %job.id, graph = %job.graph, "graph job execution started");

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.job_timeout, self.execute(&job)).await;
        let finished_at = Utc::now();
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(image)) => {
                self.history.record(
                    job.graph,
                    job.range.span(),
                    job.limit_altitude,
                    elapsed.as_secs_f64(),
                );
                self.registry
                    .complete(job.id, image.bytes, image.content_type, finished_at);
                tracing::info!(
                    job_id = %job.id,
                    graph = %job.graph,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "graph job completed"
                );
            }
            Ok(Err(err)) => {
                self.registry.fail(job.id, format!("{err:#}"), finished_at);
                tracing::warn!(
                    job_id = %job.id,
                    graph = %job.graph,
                    error = %err,
                    "graph job failed"
                );
            }
            Err(_) => {
                self.registry
                    .mark_timeout(job.id, elapsed.as_secs(), finished_at);
                tracing::warn!(
                    job_id = %job.id,
                    graph = %job.graph,
                    elapsed_s = elapsed.as_secs(),
                    "graph job timed out; slot reclaimed"
                );
            }
        }
    }

    /// The render pipeline. Stage boundaries double as preemption points for
    /// the timeout supervisor; the render call itself runs on the blocking
    /// pool so a slow plot cannot stall the async workers.
    async fn execute(&self, job: &ClaimedJob) -> Result<RenderedImage> {
        let span = job.range.span();

        self.registry
            .update_progress(job.id, 10, "selecting aggregation tier");
        let tier = self.settings.tiers.select(span);
        tracing::debug!(job_id = %job.id, tier = tier.as_str(), "selected aggregation tier");

        self.registry.update_progress(job.id, 25, "fetching records");
        let fetch_range = if job.graph.extends_fetch_range() {
            job.range.extended_by(FETCH_EXTENSION_FRACTION)
        } else {
            job.range
        };
        let options = FetchOptions::for_graph(job.graph, job.limit_altitude);
        let records = self
            .source
            .fetch(fetch_range, tier, options)
            .await
            .context("data source fetch failed")?;

        self.registry.update_progress(job.id, 55, "preparing data");
        let records = prepare_records(records, options.max_altitude);
        tracing::debug!(job_id = %job.id, records = records.len(), "prepared records");

        self.registry.update_progress(job.id, 80, "rendering");
        let renderer = self.renderer.clone();
        let request = RenderRequest {
            graph: job.graph,
            range: job.range,
            limit_altitude: job.limit_altitude,
            records,
        };
        let image = tokio::task::spawn_blocking(move || renderer.render(&request))
            .await
            .context("render task aborted")??;

        self.registry.update_progress(job.id, 95, "encoding");
        Ok(image)
    }
}
