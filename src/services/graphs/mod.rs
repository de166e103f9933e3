pub mod data;
pub mod estimate;
pub mod fingerprint;
pub mod pregen;
pub mod registry;
pub mod render;
pub mod runner;
pub mod tier;
pub mod types;

pub use data::{DataRange, FetchOptions, PostgresRecordSource, RecordSource, SensorRecord};
pub use fingerprint::{FingerprintPolicy, JobFingerprint};
pub use pregen::PregenerationService;
pub use registry::{ArtifactLookup, GateOutcome, JobRegistry};
pub use render::{GraphRenderer, RenderRequest, RenderedImage, ScatterSvgRenderer};
pub use runner::GraphJobService;
pub use tier::{AggregationTier, TierPolicy};
pub use types::{
    BatchStatusRequest, BatchStatusResponse, CreateRequest, CreateResponse, CreatedJob,
    DataRangeResponse, GraphKind, JobStatsResponse, JobStatus, JobStatusPublic, QueryRange,
};
