use crate::services::graphs::{
    BatchStatusRequest, BatchStatusResponse, CreateRequest, CreateResponse, GraphKind, JobStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Wire seam for the polling client. Errors are transport failures
/// (network, gateway); job-level failures arrive as regular responses.
pub trait JobTransport: Send + Sync {
    fn create(&self, request: CreateRequest) -> BoxFuture<'_, Result<CreateResponse>>;
    fn batch_status(&self, job_ids: Vec<Uuid>) -> BoxFuture<'_, Result<BatchStatusResponse>>;
    /// Ok(None) is the server's NotFound (unknown id or expired artifact).
    fn fetch_result(&self, job_id: Uuid) -> BoxFuture<'_, Result<Option<FetchedArtifact>>>;
}

pub struct HttpJobTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpJobTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }
}

impl JobTransport for HttpJobTransport {
    fn create(&self, request: CreateRequest) -> BoxFuture<'_, Result<CreateResponse>> {
        Box::pin(async move {
            let response = self
                .http
                .post(format!("{}/api/graph/job", self.base_url))
                .json(&request)
                .send()
                .await
                .context("create request failed")?
                .error_for_status()
                .context("create request rejected")?;
            response
                .json::<CreateResponse>()
                .await
                .context("create response was not valid JSON")
        })
    }

    fn batch_status(&self, job_ids: Vec<Uuid>) -> BoxFuture<'_, Result<BatchStatusResponse>> {
        Box::pin(async move {
            let request = BatchStatusRequest {
                job_ids: job_ids.iter().map(Uuid::to_string).collect(),
            };
            let response = self
                .http
                .post(format!("{}/api/graph/jobs/status", self.base_url))
                .json(&request)
                .send()
                .await
                .context("status request failed")?
                .error_for_status()
                .context("status request rejected")?;
            response
                .json::<BatchStatusResponse>()
                .await
                .context("status response was not valid JSON")
        })
    }

    fn fetch_result(&self, job_id: Uuid) -> BoxFuture<'_, Result<Option<FetchedArtifact>>> {
        Box::pin(async move {
            let response = self
                .http
                .get(format!("{}/api/graph/job/{}/result", self.base_url, job_id))
                .send()
                .await
                .context("result request failed")?;
            match response.status() {
                StatusCode::OK => {
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = response
                        .bytes()
                        .await
                        .context("result body read failed")?
                        .to_vec();
                    Ok(Some(FetchedArtifact {
                        bytes,
                        content_type,
                    }))
                }
                StatusCode::NOT_FOUND => Ok(None),
                other => anyhow::bail!("unexpected result status {other}"),
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    /// Consecutive unsuccessful polls tolerated per job before the client
    /// gives up on it locally.
    pub failure_threshold: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub graphs: Vec<GraphKind>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit_altitude: bool,
}

#[derive(Debug, Clone)]
pub enum GraphOutcome {
    Completed {
        job_id: Uuid,
        bytes: Vec<u8>,
        content_type: String,
    },
    Failed {
        job_id: Uuid,
        status: Option<JobStatus>,
        error: String,
    },
}

impl GraphOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, GraphOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct GraphPollResult {
    pub graph: GraphKind,
    pub outcome: GraphOutcome,
    /// True when this slot went through its single automatic replacement.
    pub retried: bool,
}

struct TrackedJob {
    graph: GraphKind,
    job_id: Uuid,
    transport_failures: u32,
    retry_of: Option<Uuid>,
    outcome: Option<GraphOutcome>,
}

/// Client-side polling state machine.
///
/// Each job polls until terminal. Transport failures are counted separately
/// from job failures and masked below the threshold; at the threshold the
/// job is retried automatically exactly once (a fresh `create` linked via
/// `retry_of`), and a second breach is surfaced with no further action, so
/// retry storms are impossible.
pub struct JobPoller {
    transport: Arc<dyn JobTransport>,
    settings: PollSettings,
}

impl JobPoller {
    pub fn new(transport: Arc<dyn JobTransport>, settings: PollSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub async fn run(&self, spec: BatchSpec) -> Result<Vec<GraphPollResult>> {
        let created = self
            .transport
            .create(CreateRequest {
                graphs: spec.graphs.iter().map(|graph| graph.as_str().to_string()).collect(),
                start: spec.start,
                end: spec.end,
                limit_altitude: spec.limit_altitude,
                retry_of: None,
            })
            .await
            .context("initial job creation failed")?;

        let mut tracked: Vec<TrackedJob> = created
            .jobs
            .into_iter()
            .map(|job| TrackedJob {
                graph: job.graph_name,
                job_id: job.job_id,
                transport_failures: 0,
                retry_of: None,
                outcome: None,
            })
            .collect();

        loop {
            let outstanding: Vec<Uuid> = tracked
                .iter()
                .filter(|job| job.outcome.is_none())
                .map(|job| job.job_id)
                .collect();
            if outstanding.is_empty() {
                break;
            }

            tokio::time::sleep(self.settings.poll_interval).await;

            match self.transport.batch_status(outstanding).await {
                Ok(response) => {
                    for index in 0..tracked.len() {
                        if tracked[index].outcome.is_some() {
                            continue;
                        }
                        let key = tracked[index].job_id.to_string();
                        match response.jobs.get(&key) {
                            Some(status) => {
                                tracked[index].transport_failures = 0;
                                self.apply_status(&mut tracked[index], status.status, status.error.as_deref(), &spec)
                                    .await;
                            }
                            None => {
                                // The server no longer knows the id (evicted
                                // or lost); counts toward the same threshold.
                                self.note_poll_failure(
                                    &mut tracked[index],
                                    &spec,
                                    "job unknown to server",
                                )
                                .await;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "batch status poll failed");
                    for index in 0..tracked.len() {
                        if tracked[index].outcome.is_some() {
                            continue;
                        }
                        self.note_poll_failure(&mut tracked[index], &spec, "status poll failed")
                            .await;
                    }
                }
            }
        }

        Ok(tracked
            .into_iter()
            .map(|job| GraphPollResult {
                graph: job.graph,
                retried: job.retry_of.is_some(),
                // Every loop exit leaves an outcome on each slot.
                outcome: job.outcome.unwrap_or(GraphOutcome::Failed {
                    job_id: job.job_id,
                    status: None,
                    error: "polling ended without an outcome".to_string(),
                }),
            })
            .collect())
    }

    async fn apply_status(
        &self,
        job: &mut TrackedJob,
        status: JobStatus,
        error: Option<&str>,
        spec: &BatchSpec,
    ) {
        match status {
            JobStatus::Pending | JobStatus::Processing => {}
            JobStatus::Completed => match self.transport.fetch_result(job.job_id).await {
                Ok(Some(artifact)) => {
                    job.outcome = Some(GraphOutcome::Completed {
                        job_id: job.job_id,
                        bytes: artifact.bytes,
                        content_type: artifact.content_type,
                    });
                }
                Ok(None) => {
                    job.outcome = Some(GraphOutcome::Failed {
                        job_id: job.job_id,
                        status: Some(JobStatus::Completed),
                        error: "result expired before it was fetched".to_string(),
                    });
                }
                Err(err) => {
                    tracing::debug!(job_id = %job.job_id, error = %err, "result fetch failed");
                    self.note_poll_failure(job, spec, "result fetch failed").await;
                }
            },
            JobStatus::Failed | JobStatus::Timeout => {
                job.outcome = Some(GraphOutcome::Failed {
                    job_id: job.job_id,
                    status: Some(status),
                    error: error.unwrap_or("job failed").to_string(),
                });
            }
        }
    }

    /// One more unsuccessful poll for a still-outstanding job. Under the
    /// threshold the failure is masked; at the threshold the job is either
    /// replaced (first time) or surfaced (already a replacement).
    async fn note_poll_failure(&self, job: &mut TrackedJob, spec: &BatchSpec, reason: &str) {
        job.transport_failures += 1;
        if job.transport_failures < self.settings.failure_threshold {
            return;
        }

        if job.retry_of.is_some() {
            job.outcome = Some(GraphOutcome::Failed {
                job_id: job.job_id,
                status: None,
                error: format!(
                    "giving up after {} consecutive polling failures ({reason}); job was already retried once",
                    job.transport_failures
                ),
            });
            return;
        }

        let replacement = self
            .transport
            .create(CreateRequest {
                graphs: vec![job.graph.as_str().to_string()],
                start: spec.start,
                end: spec.end,
                limit_altitude: spec.limit_altitude,
                retry_of: Some(job.job_id),
            })
            .await;
        match replacement {
            Ok(response) if response.jobs.len() == 1 => {
                let previous = job.job_id;
                job.retry_of = Some(previous);
                job.job_id = response.jobs[0].job_id;
                job.transport_failures = 0;
                tracing::info!(
                    previous_job = %previous,
                    replacement_job = %job.job_id,
                    graph = %job.graph,
                    "replaced unresponsive graph job"
                );
            }
            Ok(_) => {
                job.outcome = Some(GraphOutcome::Failed {
                    job_id: job.job_id,
                    status: None,
                    error: "replacement creation returned an unexpected job list".to_string(),
                });
            }
            Err(err) => {
                job.outcome = Some(GraphOutcome::Failed {
                    job_id: job.job_id,
                    status: None,
                    error: format!("replacement creation failed: {err:#}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::graphs::{CreatedJob, JobStatusPublic};
    use chrono::Duration as ChronoDuration;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        create_requests: Mutex<Vec<CreateRequest>>,
        create_responses: Mutex<VecDeque<Result<CreateResponse>>>,
        status_responses: Mutex<VecDeque<Result<BatchStatusResponse>>>,
        results: Mutex<HashMap<Uuid, Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn push_create(&self, jobs: Vec<(Uuid, GraphKind)>) {
            self.create_responses
                .lock()
                .expect("lock")
                .push_back(Ok(CreateResponse {
                    jobs: jobs
                        .into_iter()
                        .map(|(job_id, graph_name)| CreatedJob { job_id, graph_name })
                        .collect(),
                }));
        }

        fn push_status(&self, entries: Vec<(Uuid, JobStatus, Option<&str>)>) {
            let jobs: BTreeMap<String, JobStatusPublic> = entries
                .into_iter()
                .map(|(id, status, error)| {
                    (
                        id.to_string(),
                        JobStatusPublic {
                            status,
                            progress: 50,
                            stage: None,
                            error: error.map(|value| value.to_string()),
                            elapsed_seconds: Some(1.0),
                            graph_name: GraphKind::Scatter2d,
                        },
                    )
                })
                .collect();
            self.status_responses
                .lock()
                .expect("lock")
                .push_back(Ok(BatchStatusResponse { jobs }));
        }

        fn push_status_error(&self, count: usize) {
            let mut responses = self.status_responses.lock().expect("lock");
            for _ in 0..count {
                responses.push_back(Err(anyhow::anyhow!("bad gateway")));
            }
        }

        fn put_result(&self, id: Uuid, bytes: &[u8]) {
            self.results.lock().expect("lock").insert(id, bytes.to_vec());
        }

        fn create_count(&self) -> usize {
            self.create_requests.lock().expect("lock").len()
        }

        fn create_request(&self, index: usize) -> CreateRequest {
            self.create_requests.lock().expect("lock")[index].clone()
        }
    }

    impl JobTransport for ScriptedTransport {
        fn create(&self, request: CreateRequest) -> BoxFuture<'_, Result<CreateResponse>> {
            Box::pin(async move {
                self.create_requests.lock().expect("lock").push(request);
                self.create_responses
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .unwrap_or_else(|| Err(anyhow::anyhow!("unscripted create")))
            })
        }

        fn batch_status(&self, _job_ids: Vec<Uuid>) -> BoxFuture<'_, Result<BatchStatusResponse>> {
            Box::pin(async move {
                self.status_responses
                    .lock()
                    .expect("lock")
                    .pop_front()
                    .unwrap_or_else(|| Err(anyhow::anyhow!("unscripted status")))
            })
        }

        fn fetch_result(&self, job_id: Uuid) -> BoxFuture<'_, Result<Option<FetchedArtifact>>> {
            Box::pin(async move {
                Ok(self
                    .results
                    .lock()
                    .expect("lock")
                    .get(&job_id)
                    .map(|bytes| FetchedArtifact {
                        bytes: bytes.clone(),
                        content_type: "image/svg+xml".to_string(),
                    }))
            })
        }
    }

    fn spec() -> BatchSpec {
        let end = Utc::now();
        BatchSpec {
            graphs: vec![GraphKind::Scatter2d],
            start: end - ChronoDuration::days(7),
            end,
            limit_altitude: false,
        }
    }

    fn poller(transport: Arc<ScriptedTransport>) -> JobPoller {
        JobPoller::new(
            transport,
            PollSettings {
                poll_interval: Duration::from_millis(1),
                failure_threshold: 5,
            },
        )
    }

    #[tokio::test]
    async fn fetches_artifact_once_the_job_completes() {
        let transport = Arc::new(ScriptedTransport::default());
        let job = Uuid::new_v4();
        transport.push_create(vec![(job, GraphKind::Scatter2d)]);
        transport.push_status(vec![(job, JobStatus::Processing, None)]);
        transport.push_status(vec![(job, JobStatus::Completed, None)]);
        transport.put_result(job, b"svg-bytes");

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        assert_eq!(results.len(), 1);
        assert!(results[0].outcome.is_completed());
        assert!(!results[0].retried);
        assert_eq!(transport.create_count(), 1);
    }

    #[tokio::test]
    async fn transient_transport_failures_below_threshold_are_masked() {
        let transport = Arc::new(ScriptedTransport::default());
        let job = Uuid::new_v4();
        transport.push_create(vec![(job, GraphKind::Scatter2d)]);
        transport.push_status_error(4);
        transport.push_status(vec![(job, JobStatus::Completed, None)]);
        transport.put_result(job, b"svg-bytes");

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        assert!(results[0].outcome.is_completed());
        assert!(!results[0].retried);
        assert_eq!(transport.create_count(), 1);
    }

    #[tokio::test]
    async fn threshold_breach_triggers_exactly_one_replacement() {
        let transport = Arc::new(ScriptedTransport::default());
        let original = Uuid::new_v4();
        let replacement = Uuid::new_v4();
        transport.push_create(vec![(original, GraphKind::Scatter2d)]);
        transport.push_create(vec![(replacement, GraphKind::Scatter2d)]);
        transport.push_status_error(5);
        transport.push_status(vec![(replacement, JobStatus::Completed, None)]);
        transport.put_result(replacement, b"svg-bytes");

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        assert!(results[0].outcome.is_completed());
        assert!(results[0].retried);
        assert_eq!(transport.create_count(), 2);
        let retry_request = transport.create_request(1);
        assert_eq!(retry_request.retry_of, Some(original));
        assert_eq!(retry_request.graphs, vec!["scatter_2d".to_string()]);
    }

    #[tokio::test]
    async fn second_breach_is_surfaced_without_further_retries() {
        let transport = Arc::new(ScriptedTransport::default());
        let original = Uuid::new_v4();
        let replacement = Uuid::new_v4();
        transport.push_create(vec![(original, GraphKind::Scatter2d)]);
        transport.push_create(vec![(replacement, GraphKind::Scatter2d)]);
        transport.push_status_error(10);

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        match &results[0].outcome {
            GraphOutcome::Failed { error, .. } => {
                assert!(error.contains("already retried once"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(results[0].retried);
        assert_eq!(transport.create_count(), 2);
    }

    #[tokio::test]
    async fn server_side_failure_is_terminal_without_retry() {
        let transport = Arc::new(ScriptedTransport::default());
        let job = Uuid::new_v4();
        transport.push_create(vec![(job, GraphKind::Scatter2d)]);
        transport.push_status(vec![(job, JobStatus::Failed, Some("render exploded"))]);

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        match &results[0].outcome {
            GraphOutcome::Failed { status, error, .. } => {
                assert_eq!(*status, Some(JobStatus::Failed));
                assert_eq!(error, "render exploded");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!results[0].retried);
        assert_eq!(transport.create_count(), 1);
    }

    #[tokio::test]
    async fn unknown_job_ids_count_toward_the_threshold() {
        let transport = Arc::new(ScriptedTransport::default());
        let original = Uuid::new_v4();
        let replacement = Uuid::new_v4();
        transport.push_create(vec![(original, GraphKind::Scatter2d)]);
        transport.push_create(vec![(replacement, GraphKind::Scatter2d)]);
        for _ in 0..5 {
            transport.push_status(vec![]);
        }
        transport.push_status(vec![(replacement, JobStatus::Completed, None)]);
        transport.put_result(replacement, b"svg-bytes");

        let results = poller(transport.clone()).run(spec()).await.expect("run");

        assert!(results[0].outcome.is_completed());
        assert_eq!(transport.create_count(), 2);
    }
}
