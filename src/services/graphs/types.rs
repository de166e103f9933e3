use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Closed set of renderable graph kinds. Creation requests naming anything
/// else are rejected before a job is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub enum GraphKind {
    #[serde(rename = "scatter_2d")]
    Scatter2d,
    #[serde(rename = "scatter_3d")]
    Scatter3d,
    #[serde(rename = "contour_2d")]
    Contour2d,
    #[serde(rename = "contour_3d")]
    Contour3d,
    #[serde(rename = "density")]
    Density,
    #[serde(rename = "heatmap")]
    Heatmap,
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "wind_direction")]
    WindDirection,
}

impl GraphKind {
    pub const ALL: [GraphKind; 8] = [
        GraphKind::Scatter2d,
        GraphKind::Scatter3d,
        GraphKind::Contour2d,
        GraphKind::Contour3d,
        GraphKind::Density,
        GraphKind::Heatmap,
        GraphKind::Temperature,
        GraphKind::WindDirection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Scatter2d => "scatter_2d",
            GraphKind::Scatter3d => "scatter_3d",
            GraphKind::Contour2d => "contour_2d",
            GraphKind::Contour3d => "contour_3d",
            GraphKind::Density => "density",
            GraphKind::Heatmap => "heatmap",
            GraphKind::Temperature => "temperature",
            GraphKind::WindDirection => "wind_direction",
        }
    }

    pub fn parse(value: &str) -> Option<GraphKind> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
    }

    /// Wind columns are only needed for the wind rose; the other kinds keep
    /// the fetch narrow.
    pub fn needs_wind(&self) -> bool {
        matches!(self, GraphKind::WindDirection)
    }

    /// Grid-interpolating kinds fetch a padded range so plot edges are
    /// well-conditioned.
    pub fn extends_fetch_range(&self) -> bool {
        matches!(self, GraphKind::Heatmap | GraphKind::Contour2d)
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        match self {
            GraphKind::Scatter3d | GraphKind::Contour3d => (1400, 1400),
            _ => (1200, 800),
        }
    }
}

impl std::fmt::Display for GraphKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }
}

/// Half-open UTC query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryRange {
    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    /// Pads both edges by the given fraction of the span.
    pub fn extended_by(&self, fraction: f64) -> QueryRange {
        let pad_ms = (self.span().num_milliseconds() as f64 * fraction) as i64;
        let pad = Duration::milliseconds(pad_ms);
        QueryRange {
            start: self.start - pad,
            end: self.end + pad,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateRequest {
    pub graphs: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub limit_altitude: bool,
    /// Set by the polling client on its single automatic replacement of a
    /// job it gave up on; links the fresh job to its predecessor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreatedJob {
    pub job_id: Uuid,
    pub graph_name: GraphKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateResponse {
    pub jobs: Vec<CreatedJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BatchStatusRequest {
    pub job_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobStatusPublic {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    pub graph_name: GraphKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BatchStatusResponse {
    /// Keyed by job id; ids the registry does not know are omitted.
    pub jobs: BTreeMap<String, JobStatusPublic>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobStatsResponse {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DataRangeResponse {
    pub earliest: Option<String>,
    pub latest: Option<String>,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_kind_round_trips_through_wire_names() {
        for kind in GraphKind::ALL {
            assert_eq!(GraphKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(GraphKind::parse("volume_render"), None);
    }

    #[test]
    fn terminal_statuses_are_exactly_the_three_end_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }

    #[test]
    fn range_extension_pads_both_edges() {
        let start = chrono::Utc::now();
        let range = QueryRange {
            start,
            end: start + Duration::hours(10),
        };
        let padded = range.extended_by(0.1);
        assert_eq!(range.start - padded.start, Duration::hours(1));
        assert_eq!(padded.end - range.end, Duration::hours(1));
    }
}
