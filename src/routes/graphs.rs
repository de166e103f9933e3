use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::error::{bad_request, internal_error, not_found};
use crate::services::graphs::{
    ArtifactLookup, BatchStatusRequest, BatchStatusResponse, CreateRequest, CreateResponse,
    DataRangeResponse, GraphKind, JobStatsResponse,
};
use crate::state::AppState;
use crate::time::format_rfc3339;

#[utoipa::path(
    post,
    path = "/api/graph/job",
    tag = "graphs",
    request_body = CreateRequest,
    responses(
        (status = 200, description = "One job per requested graph (fresh, joined, or cached)", body = CreateResponse),
        (status = 400, description = "Invalid time range or unknown graph name")
    )
)]
pub(crate) async fn create_graph_jobs(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, (StatusCode, String)> {
    if request.graphs.is_empty() {
        return Err(bad_request("graphs list is required"));
    }
    if request.start >= request.end {
        return Err(bad_request("start must be before end"));
    }
    let mut kinds = Vec::with_capacity(request.graphs.len());
    for name in &request.graphs {
        match GraphKind::parse(name) {
            Some(kind) => kinds.push(kind),
            None => return Err(bad_request(format!("unknown graph name: {name}"))),
        }
    }

    let jobs = state.graph_jobs.create_jobs(
        &kinds,
        request.start,
        request.end,
        request.limit_altitude,
        request.retry_of,
    );
    Ok(Json(CreateResponse { jobs }))
}

#[utoipa::path(
    post,
    path = "/api/graph/jobs/status",
    tag = "graphs",
    request_body = BatchStatusRequest,
    responses(
        (status = 200, description = "Status per known job id; unknown ids are omitted", body = BatchStatusResponse)
    )
)]
pub(crate) async fn batch_job_status(
    State(state): State<AppState>,
    Json(request): Json<BatchStatusRequest>,
) -> Json<BatchStatusResponse> {
    let ids: Vec<Uuid> = request
        .job_ids
        .iter()
        .filter_map(|value| Uuid::parse_str(value.trim()).ok())
        .collect();
    Json(BatchStatusResponse {
        jobs: state.graph_jobs.batch_status(&ids),
    })
}

#[utoipa::path(
    get,
    path = "/api/graph/job/{id}/result",
    tag = "graphs",
    params(("id" = String, Path, description = "Job id (uuid)")),
    responses(
        (status = 200, description = "Rendered artifact"),
        (status = 202, description = "Job not finished yet"),
        (status = 404, description = "Unknown job or expired result"),
        (status = 500, description = "Job failed or timed out")
    )
)]
pub(crate) async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let job_id =
        Uuid::parse_str(&id).map_err(|_| bad_request("Invalid job id"))?;

    match state.graph_jobs.artifact(job_id) {
        ArtifactLookup::Ready(artifact) => {
            let headers = [
                (header::CONTENT_TYPE, artifact.content_type.to_string()),
                (
                    header::CACHE_CONTROL,
                    format!("private, max-age={}", state.config.result_ttl_seconds),
                ),
            ];
            Ok((headers, artifact.bytes.clone()).into_response())
        }
        ArtifactLookup::NotReady { status, progress } => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "error": "Job not completed",
                "status": status.as_str(),
                "progress": progress,
            })),
        )
            .into_response()),
        ArtifactLookup::Failed { status, error } => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": error.unwrap_or_else(|| "Job failed".to_string()),
                "status": status.as_str(),
            })),
        )
            .into_response()),
        ArtifactLookup::NotFound => Err(not_found("Job not found")),
    }
}

#[utoipa::path(
    get,
    path = "/api/graph/jobs/stats",
    tag = "graphs",
    responses((status = 200, description = "Job counts by status", body = JobStatsResponse))
)]
pub(crate) async fn job_stats(State(state): State<AppState>) -> Json<JobStatsResponse> {
    Json(state.graph_jobs.stats())
}

#[utoipa::path(
    get,
    path = "/api/data-range",
    tag = "graphs",
    responses(
        (status = 200, description = "Earliest/latest record timestamps", body = DataRangeResponse),
        (status = 500, description = "Store unreachable")
    )
)]
pub(crate) async fn data_range(
    State(state): State<AppState>,
) -> Result<Json<DataRangeResponse>, (StatusCode, String)> {
    let range = state
        .graph_jobs
        .data_range()
        .await
        .map_err(internal_error)?;
    Ok(Json(DataRangeResponse {
        earliest: range.earliest.map(format_rfc3339),
        latest: range.latest.map(format_rfc3339),
        count: range.count,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graph/job", post(create_graph_jobs))
        .route("/graph/jobs/status", post(batch_job_status))
        .route("/graph/jobs/stats", get(job_stats))
        .route("/graph/job/{id}/result", get(get_job_result))
        .route("/data-range", get(data_range))
}
