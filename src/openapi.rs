use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::health::HealthResponse;
use crate::services::graphs::{
    BatchStatusRequest, BatchStatusResponse, CreateRequest, CreateResponse, CreatedJob,
    DataRangeResponse, GraphKind, JobStatsResponse, JobStatus, JobStatusPublic,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::graphs::create_graph_jobs,
        crate::routes::graphs::batch_job_status,
        crate::routes::graphs::get_job_result,
        crate::routes::graphs::job_stats,
        crate::routes::graphs::data_range,
    ),
    components(schemas(
        HealthResponse,
        CreateRequest,
        CreateResponse,
        CreatedJob,
        BatchStatusRequest,
        BatchStatusResponse,
        JobStatusPublic,
        JobStatus,
        GraphKind,
        JobStatsResponse,
        DataRangeResponse,
    )),
    tags(
        (name = "graphs", description = "Asynchronous sensor graph generation")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_default()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(|| async { Json(openapi_json()) }))
}
