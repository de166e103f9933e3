use super::fingerprint::JobFingerprint;
use super::types::{GraphKind, JobStatsResponse, JobStatus, QueryRange};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ResultArtifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct GraphJob {
    id: Uuid,
    fingerprint: JobFingerprint,
    graph: GraphKind,
    range: QueryRange,
    limit_altitude: bool,
    status: JobStatus,
    progress: u8,
    stage: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    retry_of: Option<Uuid>,
    artifact: Option<Arc<ResultArtifact>>,
}

impl GraphJob {
    fn live_artifact(&self, now: DateTime<Utc>) -> Option<Arc<ResultArtifact>> {
        self.artifact
            .as_ref()
            .filter(|artifact| artifact.expires_at > now)
            .cloned()
    }
}

/// Read-only view of a job record, minus the artifact bytes.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub graph: GraphKind,
    pub range: QueryRange,
    pub limit_altitude: bool,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_of: Option<Uuid>,
}

/// Work item handed to a worker when it claims a Pending job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub graph: GraphKind,
    pub range: QueryRange,
    pub limit_altitude: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// A Pending/Processing job already covers this fingerprint.
    Joined(Uuid),
    /// A Completed job with a live artifact covers it; zero new work.
    CacheHit(Uuid),
    /// A fresh Pending job was registered and enqueued.
    Created(Uuid),
}

impl GateOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            GateOutcome::Joined(id) | GateOutcome::CacheHit(id) | GateOutcome::Created(id) => *id,
        }
    }
}

pub enum ArtifactLookup {
    NotFound,
    NotReady { status: JobStatus, progress: u8 },
    Failed { status: JobStatus, error: Option<String> },
    Ready(Arc<ResultArtifact>),
}

struct RegistryInner {
    jobs: HashMap<Uuid, GraphJob>,
    by_fingerprint: HashMap<JobFingerprint, Uuid>,
}

/// Authoritative in-memory store of job records and artifacts.
///
/// Every mutation happens under the single inner lock, which is what makes
/// the at-most-one-live-job-per-fingerprint invariant hold under concurrent
/// identical requests. The lock is a plain std mutex and is never held
/// across an await.
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
    queue: UnboundedSender<Uuid>,
    result_ttl: Duration,
    max_retained_jobs: usize,
}

impl JobRegistry {
    pub fn new(queue: UnboundedSender<Uuid>, result_ttl: Duration, max_retained_jobs: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                jobs: HashMap::new(),
                by_fingerprint: HashMap::new(),
            }),
            queue,
            result_ttl,
            max_retained_jobs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The dedup gate. This is the only place the fingerprint map is
    /// written; registration and enqueue happen in one critical section.
    pub fn get_or_create(
        &self,
        fingerprint: JobFingerprint,
        retry_of: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> GateOutcome {
        let mut inner = self.lock();

        if let Some(existing) = inner
            .by_fingerprint
            .get(&fingerprint)
            .and_then(|id| inner.jobs.get(id))
        {
            if !existing.status.is_terminal() {
                return GateOutcome::Joined(existing.id);
            }
            if existing.status == JobStatus::Completed && existing.live_artifact(now).is_some() {
                return GateOutcome::CacheHit(existing.id);
            }
        }

        let id = Uuid::new_v4();
        let job = GraphJob {
            id,
            fingerprint,
            graph: fingerprint.graph,
            range: fingerprint.effective_range(),
            limit_altitude: fingerprint.limit_altitude,
            status: JobStatus::Pending,
            progress: 0,
            stage: Some("queued".to_string()),
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: None,
            retry_of,
            artifact: None,
        };
        inner.jobs.insert(id, job);
        inner.by_fingerprint.insert(fingerprint, id);
        if self.queue.send(id).is_err() {
            tracing::warn!(job_id = %id, "job queue is closed; job will never run");
        }
        GateOutcome::Created(id)
    }

    /// Pending -> Processing. Returns None if the job vanished or was
    /// already claimed.
    pub fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Option<ClaimedJob> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id)?;
        if job.status != JobStatus::Pending {
            return None;
        }
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.progress = 10;
        job.stage = Some("starting".to_string());
        Some(ClaimedJob {
            id: job.id,
            graph: job.graph,
            range: job.range,
            limit_altitude: job.limit_altitude,
        })
    }

    /// Stage-boundary progress write; ignored once the job left Processing.
    pub fn update_progress(&self, id: Uuid, progress: u8, stage: &str) {
        let mut inner = self.lock();
        if let Some(job) = inner.jobs.get_mut(&id) {
            if job.status == JobStatus::Processing {
                job.progress = progress.min(100);
                job.stage = Some(stage.to_string());
            }
        }
    }

    pub fn complete(
        &self,
        id: Uuid,
        bytes: Vec<u8>,
        content_type: &'static str,
        now: DateTime<Utc>,
    ) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return;
        };
        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, status = job.status.as_str(), "ignoring completion for terminal job");
            return;
        }
        let expires_at = now + self.result_ttl;
        job.artifact = Some(Arc::new(ResultArtifact {
            bytes,
            content_type,
            expires_at,
        }));
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.stage = Some("complete".to_string());
        job.completed_at = Some(now);
        job.expires_at = Some(expires_at);
    }

    pub fn fail(&self, id: Uuid, error: String, now: DateTime<Utc>) {
        self.finish_with(id, JobStatus::Failed, error, "error", now);
    }

    pub fn mark_timeout(&self, id: Uuid, elapsed_seconds: u64, now: DateTime<Utc>) {
        self.finish_with(
            id,
            JobStatus::Timeout,
            format!("job timed out after {elapsed_seconds} s"),
            "timed out",
            now,
        );
    }

    fn finish_with(
        &self,
        id: Uuid,
        status: JobStatus,
        error: String,
        stage: &str,
        now: DateTime<Utc>,
    ) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&id) else {
            return;
        };
        if job.status.is_terminal() {
            tracing::debug!(job_id = %id, status = job.status.as_str(), "ignoring terminal transition for terminal job");
            return;
        }
        job.status = status;
        job.error = Some(error);
        job.stage = Some(stage.to_string());
        job.completed_at = Some(now);
        // Terminal records without artifacts are retained for the same TTL
        // so clients can still read the failure before eviction.
        job.expires_at = Some(now + self.result_ttl);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<JobSnapshot> {
        let inner = self.lock();
        inner.jobs.get(&id).map(snapshot_of)
    }

    /// One consistent pass for a whole poll batch; unknown ids are skipped.
    pub fn batch_snapshot(&self, ids: &[Uuid]) -> Vec<JobSnapshot> {
        let inner = self.lock();
        ids.iter()
            .filter_map(|id| inner.jobs.get(id).map(snapshot_of))
            .collect()
    }

    pub fn artifact(&self, id: Uuid, now: DateTime<Utc>) -> ArtifactLookup {
        let inner = self.lock();
        let Some(job) = inner.jobs.get(&id) else {
            return ArtifactLookup::NotFound;
        };
        match job.status {
            JobStatus::Pending | JobStatus::Processing => ArtifactLookup::NotReady {
                status: job.status,
                progress: job.progress,
            },
            JobStatus::Failed | JobStatus::Timeout => ArtifactLookup::Failed {
                status: job.status,
                error: job.error.clone(),
            },
            JobStatus::Completed => match job.live_artifact(now) {
                Some(artifact) => ArtifactLookup::Ready(artifact),
                None => ArtifactLookup::NotFound,
            },
        }
    }

    /// Time-based eviction plus size-pressure trimming: expired terminal
    /// jobs go first, then the oldest completed ones. Live jobs are never
    /// evicted.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();

        let mut removed: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && job.expires_at.map(|at| at <= now).unwrap_or(false)
            })
            .map(|job| job.id)
            .collect();
        for id in &removed {
            inner.jobs.remove(id);
        }

        if inner.jobs.len() > self.max_retained_jobs {
            let mut terminal: Vec<(DateTime<Utc>, Uuid)> = inner
                .jobs
                .values()
                .filter(|job| job.status.is_terminal())
                .map(|job| (job.completed_at.unwrap_or(job.created_at), job.id))
                .collect();
            terminal.sort();
            for (_, id) in terminal {
                if inner.jobs.len() <= self.max_retained_jobs {
                    break;
                }
                inner.jobs.remove(&id);
                removed.push(id);
            }
        }

        // Drop index entries whose job is gone or no longer matches them.
        let RegistryInner {
            jobs,
            by_fingerprint,
        } = &mut *inner;
        by_fingerprint.retain(|fingerprint, id| {
            jobs.get(id)
                .map(|job| job.fingerprint == *fingerprint)
                .unwrap_or(false)
        });
        removed.len()
    }

    pub fn stats(&self) -> JobStatsResponse {
        let inner = self.lock();
        let mut stats = JobStatsResponse::default();
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Timeout => stats.timeout += 1,
            }
        }
        stats.total = inner.jobs.len();
        stats
    }
}

fn snapshot_of(job: &GraphJob) -> JobSnapshot {
    JobSnapshot {
        id: job.id,
        graph: job.graph,
        range: job.range,
        limit_altitude: job.limit_altitude,
        status: job.status,
        progress: job.progress,
        stage: job.stage.clone(),
        error: job.error.clone(),
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        expires_at: job.expires_at,
        retry_of: job.retry_of,
    }
}
